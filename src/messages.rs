use crate::error::ProbeError;

use std::fmt;
use std::net::IpAddr;
use std::sync::mpsc::Sender;
use std::time::Duration;

/// Result of one ping probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingOutcome {
    pub sequence: u16,
    pub destination: IpAddr,
    pub bytes: usize,
    /// `None` when no matching echo reply arrived in time.
    pub round_trip: Option<Duration>,
}

impl fmt::Display for PingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.round_trip {
            Some(rtt) => write!(
                f,
                "{} bytes from {}: icmp_seq={} time={:.3} ms",
                self.bytes,
                self.destination,
                self.sequence,
                millis(rtt)
            ),
            None => write!(f, "Request timeout for icmp_seq {}", self.sequence),
        }
    }
}

/// One probe at a given TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HopAttempt {
    pub round_trip: Option<Duration>,
    pub responder: Option<IpAddr>,
}

impl HopAttempt {
    pub const NO_RESPONSE: HopAttempt = HopAttempt { round_trip: None, responder: None };
}

/// All attempts made at one TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopResult {
    pub ttl: u8,
    pub attempts: Vec<HopAttempt>,
}

impl HopResult {
    pub fn responded(&self) -> bool {
        self.attempts.iter().any(|a| a.round_trip.is_some())
    }
}

impl fmt::Display for HopResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:2}", self.ttl)?;
        let mut last_responder = None;
        for attempt in &self.attempts {
            match (attempt.responder, attempt.round_trip) {
                (Some(responder), Some(rtt)) => {
                    if last_responder != Some(responder) {
                        write!(f, "  {}", responder)?;
                        last_responder = Some(responder);
                    }
                    write!(f, "  {:.3} ms", millis(rtt))?;
                }
                _ => write!(f, "  *")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Ping,
    Traceroute,
}

#[derive(Debug, Clone)]
pub enum EndReason {
    /// Every ping probe was sent.
    Completed,
    DestinationReached,
    /// The traceroute ran out of TTLs.
    HopLimit,
    Stopped,
    Failed(ProbeError),
}

/// Emitted exactly once per run.
#[derive(Debug, Clone)]
pub struct SessionEnd {
    pub kind: SessionKind,
    pub reason: EndReason,
    pub transmitted: usize,
    pub received: usize,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            SessionKind::Ping => "ping",
            SessionKind::Traceroute => "traceroute",
        };
        match &self.reason {
            EndReason::Completed => write!(f, "{} finished", what)?,
            EndReason::DestinationReached => write!(f, "{} reached destination", what)?,
            EndReason::HopLimit => write!(f, "{} hit the hop limit", what)?,
            EndReason::Stopped => write!(f, "{} stopped", what)?,
            EndReason::Failed(e) => write!(f, "{} failed: {}", what, e)?,
        }
        if self.transmitted > 0 {
            let lost = self.transmitted - self.received;
            write!(
                f,
                ": {} transmitted, {} received, {:.0}% loss",
                self.transmitted,
                self.received,
                lost as f64 * 100.0 / self.transmitted as f64
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum ProbeEvent {
    Ping(PingOutcome),
    Hop(HopResult),
}

impl fmt::Display for ProbeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeEvent::Ping(outcome) => outcome.fmt(f),
            ProbeEvent::Hop(hop) => hop.fmt(f),
        }
    }
}

/// Where engines report progress. Called synchronously from the engine's
/// thread: once per completed probe or hop, then exactly once at the end.
pub trait EventSink {
    fn on_probe_result(&mut self, event: &ProbeEvent);
    fn on_session_end(&mut self, end: &SessionEnd);
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn on_probe_result(&mut self, event: &ProbeEvent) {
        (**self).on_probe_result(event)
    }

    fn on_session_end(&mut self, end: &SessionEnd) {
        (**self).on_session_end(end)
    }
}

/// Messages forwarded to a UI thread by the channel sink.
#[derive(Debug, Clone)]
pub enum SessionMessage {
    ProbeResult(ProbeEvent),
    SessionEnd(SessionEnd),
}

impl EventSink for Sender<SessionMessage> {
    fn on_probe_result(&mut self, event: &ProbeEvent) {
        // The receiver going away only means nobody is listening any more.
        let _ = self.send(SessionMessage::ProbeResult(event.clone()));
    }

    fn on_session_end(&mut self, end: &SessionEnd) {
        let _ = self.send(SessionMessage::SessionEnd(end.clone()));
    }
}

/// Turns events into the human-readable log lines a UI appends.
pub struct LineSink<F, E> {
    append: F,
    end: E,
}

impl<F: FnMut(String), E: FnMut(&SessionEnd)> LineSink<F, E> {
    pub fn new(append: F, end: E) -> Self {
        LineSink { append, end }
    }
}

impl<F: FnMut(String), E: FnMut(&SessionEnd)> EventSink for LineSink<F, E> {
    fn on_probe_result(&mut self, event: &ProbeEvent) {
        (self.append)(event.to_string());
    }

    fn on_session_end(&mut self, end: &SessionEnd) {
        (self.end)(end);
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
