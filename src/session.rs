use crate::error::ProbeError;
use crate::packet::{build_echo_request, probe_payload};
use crate::parser::{ReplyClassification, classify_icmp, classify_reply};
use crate::transport::{Framing, ReceivedPacket, Transport};

use log::debug;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

/// One in-flight probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeIdentity {
    pub identifier: u16,
    pub sequence: u16,
    pub sent_at: Instant,
}

/// A reply matched to a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub classification: ReplyClassification,
    pub round_trip: Duration,
}

static PROCESS_SEQUENCES: LazyLock<SequenceAllocator> = LazyLock::new(SequenceAllocator::new);

/// Hands out sequence numbers. Clones share the same counter, so engines that
/// share an identifier never put the same sequence number in flight twice
/// (until the 16-bit space wraps).
#[derive(Debug, Clone)]
pub struct SequenceAllocator(Arc<AtomicU16>);

impl SequenceAllocator {
    /// A counter starting at a random point.
    pub fn new() -> SequenceAllocator {
        SequenceAllocator::starting_at(rand::random::<u16>())
    }

    pub fn starting_at(first: u16) -> SequenceAllocator {
        SequenceAllocator(Arc::new(AtomicU16::new(first)))
    }

    /// The counter every engine in this process uses by default.
    pub fn shared() -> SequenceAllocator {
        PROCESS_SEQUENCES.clone()
    }

    pub fn next(&self) -> u16 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        SequenceAllocator::shared()
    }
}

/// Identifier derived from the process id, shared by every engine in the
/// process.
pub fn process_identifier() -> u16 {
    std::process::id() as u16
}

/// Builds, sends and matches echo probes for one engine.
pub struct ProbeSession {
    identifier: u16,
    is_v6: bool,
    payload: Vec<u8>,
    sequences: SequenceAllocator,
}

impl ProbeSession {
    pub fn new(identifier: u16, is_v6: bool, payload_size: usize, sequences: SequenceAllocator) -> ProbeSession {
        ProbeSession { identifier, is_v6, payload: probe_payload(payload_size), sequences }
    }

    pub fn is_v6(&self) -> bool {
        self.is_v6
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Sends one echo request with a fresh sequence number.
    pub fn send<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        destination: IpAddr,
        ttl: Option<u8>,
    ) -> Result<ProbeIdentity, ProbeError> {
        let sequence = self.sequences.next();
        let packet = build_echo_request(self.identifier, sequence, self.is_v6, &self.payload);

        transport
            .send_to(&packet, destination, ttl)
            .map_err(|e| ProbeError::socket("failed to send echo request", e))?;
        let sent_at = Instant::now();

        let identifier = transport.echo_identifier().unwrap_or(self.identifier);
        debug!("sent echo request to {} id={} seq={} ttl={:?}", destination, identifier, sequence, ttl);

        Ok(ProbeIdentity { identifier, sequence, sent_at })
    }

    /// True when the reply echoes both the identifier and the sequence number
    /// of `identity`.
    pub fn match_reply(classification: &ReplyClassification, identity: &ProbeIdentity) -> bool {
        classification.echoed() == Some((identity.identifier, identity.sequence))
    }

    /// Reads datagrams until one matches `identity` or `timeout` (counted from
    /// the send) elapses. Stray, unrelated and malformed datagrams are skipped.
    pub fn await_reply<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        identity: &ProbeIdentity,
        timeout: Duration,
    ) -> Result<Option<Reply>, ProbeError> {
        let deadline = identity.sent_at + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let received = transport
                .recv_from(remaining)
                .map_err(|e| ProbeError::socket("failed to receive reply", e))?;
            let Some(received) = received else {
                return Ok(None);
            };
            let received_at = Instant::now();

            let classification = classify_received(&received, self.is_v6);
            if Self::match_reply(&classification, identity) {
                return Ok(Some(Reply {
                    classification,
                    round_trip: received_at.saturating_duration_since(identity.sent_at),
                }));
            }

            match classification {
                ReplyClassification::Malformed { from } => {
                    debug!("discarding malformed datagram from {} ({} bytes)", from, received.data.len());
                }
                other => debug!("discarding reply not meant for seq={}: {:?}", identity.sequence, other),
            }
        }
    }
}

/// Classifies a received buffer according to its framing.
pub fn classify_received(received: &ReceivedPacket, is_v6: bool) -> ReplyClassification {
    match received.framing {
        Framing::Ip => classify_reply(&received.data, is_v6, received.source),
        Framing::Icmp => classify_icmp(&received.data, is_v6, received.source),
    }
}
