use crate::dns_resolver::Resolver;
use crate::error::ProbeError;
use crate::messages::{EndReason, EventSink, HopAttempt, HopResult, ProbeEvent, SessionEnd, SessionKind};
use crate::packet::DEFAULT_PAYLOAD_SIZE;
use crate::parser::ReplyClassification;
use crate::session::{ProbeSession, Reply, SequenceAllocator, process_identifier};
use crate::stop::StopHandle;
use crate::transport::Transport;

use log::{debug, info};
use std::net::IpAddr;
use std::time::Duration;

pub const TRACEROUTE_PORT: u16 = 20000;
pub const TRACEROUTE_MAX_TTL: u8 = 30;
pub const TRACEROUTE_ATTEMPTS: u8 = 3;
pub const TRACEROUTE_TIMEOUT: Duration = Duration::from_micros(5_000_000);

/// What to do with the remaining attempts of a hop once the destination has
/// answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestinationPolicy {
    /// Keep probing so every hop has the same number of latency samples.
    #[default]
    CompleteAttempts,
    StopAtFirstReply,
}

#[derive(Debug, Clone)]
pub struct TracerouteConfig {
    pub max_ttl: u8,
    /// Per-attempt wait for a reply.
    pub timeout: Duration,
    pub max_attempts: u8,
    /// Kept for parity with UDP traceroute; ICMP probes carry no port.
    pub port: u16,
    pub payload_size: usize,
    pub destination_policy: DestinationPolicy,
}

impl TracerouteConfig {
    pub fn from_micros(max_ttl: u8, timeout_micros: u64, max_attempts: u8, port: u16) -> TracerouteConfig {
        TracerouteConfig {
            max_ttl,
            timeout: Duration::from_micros(timeout_micros),
            max_attempts,
            port,
            ..TracerouteConfig::default()
        }
    }
}

impl Default for TracerouteConfig {
    fn default() -> Self {
        TracerouteConfig {
            max_ttl: TRACEROUTE_MAX_TTL,
            timeout: TRACEROUTE_TIMEOUT,
            max_attempts: TRACEROUTE_ATTEMPTS,
            port: TRACEROUTE_PORT,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            destination_policy: DestinationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceState {
    Idle,
    ProbingHop,
    Done,
}

/// The state of one traceroute run, driven one attempt at a time. It holds no
/// socket, so the hop logic can be exercised on its own.
#[derive(Debug, Clone)]
pub struct TracerouteSession {
    state: TraceState,
    pub current_ttl: u8,
    pub attempts_this_ttl: u8,
    pub reached_destination: bool,
    pub hops: Vec<HopResult>,
    pending: Vec<HopAttempt>,
    hop_reached: bool,
    max_ttl: u8,
    max_attempts: u8,
    policy: DestinationPolicy,
}

impl TracerouteSession {
    pub fn new(config: &TracerouteConfig) -> TracerouteSession {
        TracerouteSession {
            state: TraceState::Idle,
            current_ttl: 0,
            attempts_this_ttl: 0,
            reached_destination: false,
            hops: Vec::new(),
            pending: Vec::new(),
            hop_reached: false,
            max_ttl: config.max_ttl,
            max_attempts: config.max_attempts,
            policy: config.destination_policy,
        }
    }

    pub fn state(&self) -> TraceState {
        self.state
    }

    /// Idle -> ProbingHop at TTL 1. A zero hop ceiling finishes at once.
    pub fn start(&mut self) {
        if self.state != TraceState::Idle {
            return;
        }
        if self.max_ttl == 0 {
            self.state = TraceState::Done;
            return;
        }
        self.state = TraceState::ProbingHop;
        self.current_ttl = 1;
        self.attempts_this_ttl = 0;
    }

    /// TTL for the next attempt, or `None` when the current hop is complete.
    pub fn next_attempt(&self) -> Option<u8> {
        if self.state != TraceState::ProbingHop || self.attempts_this_ttl >= self.max_attempts {
            return None;
        }
        if self.hop_reached && self.policy == DestinationPolicy::StopAtFirstReply {
            return None;
        }
        Some(self.current_ttl)
    }

    pub fn record(&mut self, attempt: HopAttempt, reached_destination: bool) {
        if self.state != TraceState::ProbingHop {
            return;
        }
        self.pending.push(attempt);
        self.attempts_this_ttl += 1;
        if reached_destination {
            self.hop_reached = true;
            self.reached_destination = true;
        }
    }

    /// Closes the current hop and moves to the next TTL, or to Done when the
    /// destination answered or the ceiling is reached.
    pub fn finish_hop(&mut self) -> Option<&HopResult> {
        if self.state != TraceState::ProbingHop {
            return None;
        }
        let reached = self.hop_reached;
        self.push_hop();

        if reached || self.current_ttl >= self.max_ttl {
            self.state = TraceState::Done;
        } else {
            self.current_ttl += 1;
            self.attempts_this_ttl = 0;
        }
        self.hops.last()
    }

    /// Ends the run early. A hop with some attempts already made is kept.
    pub fn stop(&mut self) -> Option<&HopResult> {
        if self.state == TraceState::Done {
            return None;
        }
        let was_probing = self.state == TraceState::ProbingHop;
        self.state = TraceState::Done;
        if was_probing && !self.pending.is_empty() {
            self.push_hop();
            return self.hops.last();
        }
        None
    }

    fn push_hop(&mut self) {
        let attempts = std::mem::take(&mut self.pending);
        self.hops.push(HopResult { ttl: self.current_ttl, attempts });
        self.hop_reached = false;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceReport {
    pub destination: IpAddr,
    pub hops: Vec<HopResult>,
    pub reached: bool,
    pub stopped: bool,
}

/// TTL-escalating echo probes towards one destination.
pub struct TracerouteEngine<T> {
    transport: T,
    config: TracerouteConfig,
    identifier: u16,
    sequences: SequenceAllocator,
    stop: StopHandle,
}

impl<T: Transport> TracerouteEngine<T> {
    pub fn new(transport: T, config: TracerouteConfig) -> TracerouteEngine<T> {
        TracerouteEngine {
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

    pub fn config(&self) -> &TracerouteConfig {
        &self.config
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Resolves `host` and walks the path. Every finished hop goes to the sink
    /// as it completes, followed by exactly one session end.
    pub fn run<R, S>(&mut self, host: &str, resolver: &R, sink: &mut S) -> Result<TraceReport, ProbeError>
    where
        R: Resolver + ?Sized,
        S: EventSink + ?Sized,
    {
        let destination = match resolver.resolve(host) {
            Ok(destination) => destination,
            Err(e) => {
                sink.on_session_end(&trace_end(EndReason::Failed(e.clone()), &[]));
                return Err(e);
            }
        };
        info!(
            "traceroute to {} ({}), {} hops max, {} attempts per hop, port {}",
            host, destination, self.config.max_ttl, self.config.max_attempts, self.config.port
        );

        let session = ProbeSession::new(
            self.identifier,
            destination.is_ipv6(),
            self.config.payload_size,
            self.sequences.clone(),
        );
        let mut trace = TracerouteSession::new(&self.config);
        trace.start();

        let mut stopped = false;
        while trace.state() == TraceState::ProbingHop {
            if self.stop.is_stopped() {
                stopped = true;
                if let Some(hop) = trace.stop() {
                    sink.on_probe_result(&ProbeEvent::Hop(hop.clone()));
                }
                break;
            }

            match trace.next_attempt() {
                Some(ttl) => match self.attempt(&session, destination, ttl) {
                    Ok((attempt, reached)) => trace.record(attempt, reached),
                    Err(e) => {
                        sink.on_session_end(&trace_end(EndReason::Failed(e.clone()), &trace.hops));
                        return Err(e);
                    }
                },
                None => {
                    if let Some(hop) = trace.finish_hop() {
                        debug!("hop {} finished", hop.ttl);
                        sink.on_probe_result(&ProbeEvent::Hop(hop.clone()));
                    }
                }
            }
        }

        let reached = trace.reached_destination;
        let reason = if reached {
            EndReason::DestinationReached
        } else if stopped {
            EndReason::Stopped
        } else {
            EndReason::HopLimit
        };
        let end = trace_end(reason, &trace.hops);
        info!("{}", end);
        sink.on_session_end(&end);

        Ok(TraceReport { destination, hops: trace.hops, reached, stopped })
    }

    /// One probe at `ttl`; returns what to record and whether the destination
    /// answered.
    fn attempt(&mut self, session: &ProbeSession, destination: IpAddr, ttl: u8) -> Result<(HopAttempt, bool), ProbeError> {
        let identity = session.send(&mut self.transport, destination, Some(ttl))?;
        let reply = session.await_reply(&mut self.transport, &identity, self.config.timeout)?;

        Ok(match reply {
            Some(Reply { classification: ReplyClassification::EchoReply { from, .. }, round_trip }) => {
                (HopAttempt { round_trip: Some(round_trip), responder: Some(from) }, true)
            }
            Some(Reply { classification: ReplyClassification::TimeExceeded { from, .. }, round_trip }) => {
                (HopAttempt { round_trip: Some(round_trip), responder: Some(from) }, false)
            }
            _ => (HopAttempt::NO_RESPONSE, false),
        })
    }
}

fn trace_end(reason: EndReason, hops: &[HopResult]) -> SessionEnd {
    let attempts = hops.iter().flat_map(|h| h.attempts.iter());
    SessionEnd {
        kind: SessionKind::Traceroute,
        reason,
        transmitted: attempts.clone().count(),
        received: attempts.filter(|a| a.round_trip.is_some()).count(),
    }
}
