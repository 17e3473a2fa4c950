use crate::dns_resolver::{DnsResolver, Resolver};
use crate::messages::EventSink;
use crate::pinger::{PingConfig, PingEngine};
use crate::stop::StopHandle;
use crate::tracer::{TracerouteConfig, TracerouteEngine};
use crate::transport::{RawSocketTransport, Transport};

use log::warn;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Builds the transport for a run; the flag asks for a privileged socket.
pub type TransportFactory = Arc<dyn Fn(bool) -> Box<dyn Transport + Send> + Send + Sync>;

struct ActiveRun {
    stop: StopHandle,
    handle: JoinHandle<()>,
}

/// Front door for a UI: starts ping and traceroute runs on their own threads
/// and forwards their events to a clone of the sink.
pub struct Diagnostics<S, R = DnsResolver> {
    sink: S,
    resolver: R,
    transports: TransportFactory,
    ping_config: PingConfig,
    ping: Option<ActiveRun>,
    traceroute: Option<ActiveRun>,
    // Runs replaced by a newer start, still winding down.
    retired: Vec<ActiveRun>,
}

impl<S> Diagnostics<S, DnsResolver>
where
    S: EventSink + Clone + Send + 'static,
{
    pub fn new(sink: S) -> Self {
        Diagnostics {
            sink,
            resolver: DnsResolver::default(),
            transports: Arc::new(|privileged: bool| -> Box<dyn Transport + Send> {
                Box::new(RawSocketTransport::new(privileged))
            }),
            ping_config: PingConfig::default(),
            ping: None,
            traceroute: None,
            retired: Vec::new(),
        }
    }
}

impl<S, R> Diagnostics<S, R>
where
    S: EventSink + Clone + Send + 'static,
    R: Resolver + Clone + Send + 'static,
{
    pub fn with_resolver<R2: Resolver + Clone + Send + 'static>(self, resolver: R2) -> Diagnostics<S, R2> {
        Diagnostics {
            sink: self.sink,
            resolver,
            transports: self.transports,
            ping_config: self.ping_config,
            ping: self.ping,
            traceroute: self.traceroute,
            retired: self.retired,
        }
    }

    pub fn with_transports(mut self, transports: TransportFactory) -> Self {
        self.transports = transports;
        self
    }

    /// Settings for later pings other than the privileged flag, which
    /// `start_ping` takes per run.
    pub fn with_ping_config(mut self, config: PingConfig) -> Self {
        self.ping_config = config;
        self
    }

    /// Pings `host`; a ping already running is asked to stop first.
    pub fn start_ping(&mut self, host: &str, use_privileged: bool) -> io::Result<()> {
        self.stop_ping();
        let previous = self.ping.take();
        self.retire(previous);

        let config = PingConfig { privileged: use_privileged, ..self.ping_config.clone() };
        let stop = StopHandle::new();
        let transport = (self.transports)(use_privileged);
        let mut engine = PingEngine::new(transport, config).with_stop_handle(stop.clone());
        let mut sink = self.sink.clone();
        let resolver = self.resolver.clone();
        let host = host.to_string();

        let handle = thread::Builder::new().name("ping".to_string()).spawn(move || {
            if let Err(e) = engine.run(&host, &resolver, &mut sink) {
                warn!("ping {} failed: {}", host, e);
            }
        })?;
        self.ping = Some(ActiveRun { stop, handle });
        Ok(())
    }

    pub fn stop_ping(&mut self) {
        if let Some(run) = &self.ping {
            run.stop.stop();
        }
    }

    /// Traces the path to `host`; a traceroute already running is asked to
    /// stop first.
    pub fn start_traceroute(
        &mut self,
        host: &str,
        max_ttl: u8,
        timeout_micros: u64,
        max_attempts: u8,
        port: u16,
    ) -> io::Result<()> {
        self.start_traceroute_with(host, TracerouteConfig::from_micros(max_ttl, timeout_micros, max_attempts, port))
    }

    pub fn start_traceroute_with(&mut self, host: &str, config: TracerouteConfig) -> io::Result<()> {
        self.stop_traceroute();
        let previous = self.traceroute.take();
        self.retire(previous);

        let stop = StopHandle::new();
        let transport = (self.transports)(true);
        let mut engine = TracerouteEngine::new(transport, config).with_stop_handle(stop.clone());
        let mut sink = self.sink.clone();
        let resolver = self.resolver.clone();
        let host = host.to_string();

        let handle = thread::Builder::new().name("traceroute".to_string()).spawn(move || {
            if let Err(e) = engine.run(&host, &resolver, &mut sink) {
                warn!("traceroute {} failed: {}", host, e);
            }
        })?;
        self.traceroute = Some(ActiveRun { stop, handle });
        Ok(())
    }

    pub fn stop_traceroute(&mut self) {
        if let Some(run) = &self.traceroute {
            run.stop.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        [self.ping.as_ref(), self.traceroute.as_ref()]
            .into_iter()
            .flatten()
            .chain(self.retired.iter())
            .any(|run| !run.handle.is_finished())
    }

    /// Blocks until every run started so far, replaced ones included, has
    /// ended.
    pub fn wait(&mut self) {
        let runs = [self.ping.take(), self.traceroute.take()].into_iter().flatten();
        for run in self.retired.drain(..).chain(runs).collect::<Vec<_>>() {
            join(run);
        }
    }

    /// Keeps a stopped run around until its thread exits; finished ones are
    /// joined on the way.
    fn retire(&mut self, run: Option<ActiveRun>) {
        self.retired.extend(run);
        let (finished, running): (Vec<_>, Vec<_>) =
            self.retired.drain(..).partition(|run| run.handle.is_finished());
        self.retired = running;
        finished.into_iter().for_each(join);
    }
}

fn join(run: ActiveRun) {
    if run.handle.join().is_err() {
        warn!("probe thread panicked");
    }
}
