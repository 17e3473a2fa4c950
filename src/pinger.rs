use crate::dns_resolver::Resolver;
use crate::error::ProbeError;
use crate::messages::{EndReason, EventSink, PingOutcome, ProbeEvent, SessionEnd, SessionKind};
use crate::packet::{DEFAULT_PAYLOAD_SIZE, ECHO_HEADER_LEN};
use crate::parser::ReplyClassification;
use crate::session::{ProbeSession, SequenceAllocator, process_identifier};
use crate::stop::StopHandle;
use crate::transport::Transport;

use log::{debug, info};
use std::net::IpAddr;
use std::thread;
use std::time::Duration;

/// Probes per run.
pub const PING_COUNT: usize = 5;
pub const PING_TIMEOUT: Duration = Duration::from_secs(2);
pub const PING_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct PingConfig {
    pub count: usize,
    /// How long each probe waits for its echo reply.
    pub timeout: Duration,
    /// Pause between one probe finishing and the next being sent.
    pub interval: Duration,
    pub payload_size: usize,
    /// Raw sockets when true, unprivileged datagram ICMP sockets otherwise.
    pub privileged: bool,
}

impl Default for PingConfig {
    fn default() -> Self {
        PingConfig {
            count: PING_COUNT,
            timeout: PING_TIMEOUT,
            interval: PING_INTERVAL,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            privileged: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingSummary {
    pub destination: IpAddr,
    pub outcomes: Vec<PingOutcome>,
    pub stopped: bool,
}

impl PingSummary {
    pub fn transmitted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn received(&self) -> usize {
        self.outcomes.iter().filter(|o| o.round_trip.is_some()).count()
    }
}

/// Sequential echo probes against one destination.
pub struct PingEngine<T> {
    transport: T,
    config: PingConfig,
    identifier: u16,
    sequences: SequenceAllocator,
    stop: StopHandle,
}

impl<T: Transport> PingEngine<T> {
    pub fn new(transport: T, config: PingConfig) -> PingEngine<T> {
        PingEngine {
            transport,
            config,
            identifier: process_identifier(),
            sequences: SequenceAllocator::shared(),
            stop: StopHandle::new(),
        }
    }

    pub fn with_identifier(mut self, identifier: u16) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn with_sequences(mut self, sequences: SequenceAllocator) -> Self {
        self.sequences = sequences;
        self
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn config(&self) -> &PingConfig {
        &self.config
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Lazily sends `config.count` probes, one per `next()`. Calling it again
    /// starts a new run with fresh sequence numbers.
    pub fn probes(&mut self, destination: IpAddr) -> PingProbes<'_, T> {
        let session = ProbeSession::new(
            self.identifier,
            destination.is_ipv6(),
            self.config.payload_size,
            self.sequences.clone(),
        );
        PingProbes { engine: self, session, destination, sent: 0, finished: false }
    }

    /// Resolves `host`, runs every probe and reports through `sink`. The sink
    /// sees one event per probe and exactly one session end, including when
    /// the run fails.
    pub fn run<R, S>(&mut self, host: &str, resolver: &R, sink: &mut S) -> Result<PingSummary, ProbeError>
    where
        R: Resolver + ?Sized,
        S: EventSink + ?Sized,
    {
        let destination = match resolver.resolve(host) {
            Ok(destination) => destination,
            Err(e) => {
                sink.on_session_end(&ping_end(EndReason::Failed(e.clone()), &[]));
                return Err(e);
            }
        };
        info!("PING {} ({}): {} data bytes", host, destination, self.config.payload_size);

        let mut outcomes = Vec::with_capacity(self.config.count);
        let mut probes = self.probes(destination);
        for result in &mut probes {
            match result {
                Ok(outcome) => {
                    sink.on_probe_result(&ProbeEvent::Ping(outcome));
                    outcomes.push(outcome);
                }
                Err(e) => {
                    sink.on_session_end(&ping_end(EndReason::Failed(e.clone()), &outcomes));
                    return Err(e);
                }
            }
        }

        let stopped = probes.stopped();
        let reason = if stopped { EndReason::Stopped } else { EndReason::Completed };
        let end = ping_end(reason, &outcomes);
        info!("{}", end);
        sink.on_session_end(&end);

        Ok(PingSummary { destination, outcomes, stopped })
    }
}

/// Iterator over the outcomes of one ping run.
pub struct PingProbes<'a, T> {
    engine: &'a mut PingEngine<T>,
    session: ProbeSession,
    destination: IpAddr,
    sent: usize,
    finished: bool,
}

impl<T: Transport> PingProbes<'_, T> {
    /// True when the run ended because a stop was requested.
    pub fn stopped(&self) -> bool {
        self.sent < self.engine.config.count && self.engine.stop.is_stopped()
    }

    fn probe_once(&mut self) -> Result<PingOutcome, ProbeError> {
        let timeout = self.engine.config.timeout;
        let identity = self.session.send(&mut self.engine.transport, self.destination, None)?;
        let reply = self.session.await_reply(&mut self.engine.transport, &identity, timeout)?;

        let round_trip = match reply {
            Some(reply) if matches!(reply.classification, ReplyClassification::EchoReply { .. }) => {
                Some(reply.round_trip)
            }
            _ => None,
        };
        debug!("icmp_seq={} rtt={:?}", identity.sequence, round_trip);

        Ok(PingOutcome {
            sequence: identity.sequence,
            destination: self.destination,
            bytes: ECHO_HEADER_LEN + self.session.payload_len(),
            round_trip,
        })
    }
}

impl<T: Transport> Iterator for PingProbes<'_, T> {
    type Item = Result<PingOutcome, ProbeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.sent >= self.engine.config.count || self.engine.stop.is_stopped() {
            self.finished = true;
            return None;
        }

        if self.sent > 0 && !self.engine.config.interval.is_zero() {
            thread::sleep(self.engine.config.interval);
            if self.engine.stop.is_stopped() {
                self.finished = true;
                return None;
            }
        }

        let result = self.probe_once();
        self.sent += 1;
        if result.is_err() {
            self.finished = true;
        }
        Some(result)
    }
}

fn ping_end(reason: EndReason, outcomes: &[PingOutcome]) -> SessionEnd {
    SessionEnd {
        kind: SessionKind::Ping,
        reason,
        transmitted: outcomes.len(),
        received: outcomes.iter().filter(|o| o.round_trip.is_some()).count(),
    }
}
