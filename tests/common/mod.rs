#![allow(dead_code)]

use netprobe::messages::{EventSink, ProbeEvent, SessionEnd};
use netprobe::packet::{IcmpPacket, echo_reply_type, time_exceeded_type};
use netprobe::{Framing, ProbeError, ReceivedPacket, Resolver, StopHandle, Transport};
use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

pub const LOCAL_V4: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
pub const TARGET_V4: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9));
pub const TARGET_V6: IpAddr = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 9));

/// Address of the router that answers for `ttl`.
pub fn router(ttl: u8, is_v6: bool) -> IpAddr {
    if is_v6 {
        IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0xffff, 0, 0, 0, 0, ttl as u16))
    } else {
        IpAddr::V4(Ipv4Addr::new(10, 1, 0, ttl))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentProbe {
    pub destination: IpAddr,
    pub ttl: Option<u8>,
    pub identifier: u16,
    pub sequence: u16,
}

/// A network path of routers in front of a destination.
pub struct SimulatedPath {
    /// TTL at which the destination answers; `None` means nothing ever does.
    pub destination_at: Option<u8>,
    /// Queue a stray reply and a truncated datagram ahead of every answer.
    pub noisy: bool,
    /// Kernel-assigned identifier replies carry, as datagram sockets do.
    pub rewritten_identifier: Option<u16>,
    pub fail_sends: bool,
    /// Raise the stop flag once this many probes have gone out.
    pub stop_after: Option<(usize, StopHandle)>,
    pub sent: Vec<SentProbe>,
    pending: VecDeque<ReceivedPacket>,
}

impl SimulatedPath {
    pub fn reaching_at(ttl: u8) -> SimulatedPath {
        SimulatedPath {
            destination_at: Some(ttl),
            noisy: false,
            rewritten_identifier: None,
            fail_sends: false,
            stop_after: None,
            sent: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn silent() -> SimulatedPath {
        SimulatedPath { destination_at: None, ..SimulatedPath::reaching_at(0) }
    }

    fn answer(&mut self, probe: &SentProbe, request: &[u8]) {
        let Some(destination_at) = self.destination_at else {
            return;
        };
        let is_v6 = probe.destination.is_ipv6();

        if self.noisy {
            let mut stray = IcmpPacket::echo_request(probe.identifier, probe.sequence.wrapping_sub(1), is_v6, &[]);
            stray.icmp_type = echo_reply_type(is_v6);
            self.pending.push_back(frame(probe.destination, &stray.encode()));
            self.pending.push_back(frame(probe.destination, &[echo_reply_type(is_v6), 0, 0]));
        }

        let ttl = probe.ttl.unwrap_or(u8::MAX);
        if ttl >= destination_at {
            let mut reply = IcmpPacket::decode(request).expect("probe decodes");
            reply.icmp_type = echo_reply_type(is_v6);
            reply.identifier = probe.identifier;
            self.pending.push_back(frame(probe.destination, &reply.encode()));
        } else {
            let from = router(ttl, is_v6);
            let mut icmp = vec![time_exceeded_type(is_v6), 0, 0, 0, 0, 0, 0, 0];
            icmp.extend_from_slice(&quoted_probe(probe.destination, request));
            self.pending.push_back(frame(from, &icmp));
        }
    }
}

impl Transport for SimulatedPath {
    fn send_to(&mut self, packet: &[u8], destination: IpAddr, ttl: Option<u8>) -> io::Result<()> {
        if self.fail_sends {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "operation not permitted"));
        }
        let request = IcmpPacket::decode(packet).expect("engine sends echo requests");
        let probe = SentProbe {
            destination,
            ttl,
            identifier: self.rewritten_identifier.unwrap_or(request.identifier),
            sequence: request.sequence,
        };
        self.sent.push(probe);
        self.answer(&probe, packet);

        if let Some((after, stop)) = &self.stop_after {
            if self.sent.len() >= *after {
                stop.stop();
            }
        }
        Ok(())
    }

    fn recv_from(&mut self, _timeout: Duration) -> io::Result<Option<ReceivedPacket>> {
        Ok(self.pending.pop_front())
    }

    fn echo_identifier(&self) -> Option<u16> {
        self.rewritten_identifier
    }
}

/// What a raw socket would hand over for an ICMP message from `from`.
pub fn frame(from: IpAddr, icmp: &[u8]) -> ReceivedPacket {
    match from {
        IpAddr::V4(src) => {
            let mut data = ipv4_header(src, LOCAL_V4, icmp.len());
            data.extend_from_slice(icmp);
            ReceivedPacket { data, source: from, framing: Framing::Ip }
        }
        IpAddr::V6(_) => ReceivedPacket { data: icmp.to_vec(), source: from, framing: Framing::Icmp },
    }
}

pub fn ipv4_header(src: Ipv4Addr, dst: Ipv4Addr, body_len: usize) -> Vec<u8> {
    let mut header = vec![0u8; 20];
    header[0] = 0x45;
    header[2..4].copy_from_slice(&((20 + body_len) as u16).to_be_bytes());
    header[8] = 64;
    header[9] = 1;
    header[12..16].copy_from_slice(&src.octets());
    header[16..20].copy_from_slice(&dst.octets());
    header
}

/// Original IP header plus the first 8 bytes of the probe, as routers quote it.
fn quoted_probe(destination: IpAddr, request: &[u8]) -> Vec<u8> {
    let mut quote = match destination {
        IpAddr::V4(dst) => ipv4_header(LOCAL_V4, dst, request.len()),
        IpAddr::V6(dst) => {
            let mut header = vec![0u8; 40];
            header[0] = 0x60;
            header[4..6].copy_from_slice(&(request.len() as u16).to_be_bytes());
            header[6] = 58;
            header[7] = 1;
            header[24..40].copy_from_slice(&dst.octets());
            header
        }
    };
    quote.extend_from_slice(&request[..8]);
    quote
}

/// Collects everything an engine reports.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<ProbeEvent>,
    pub ends: Vec<SessionEnd>,
}

impl EventSink for RecordingSink {
    fn on_probe_result(&mut self, event: &ProbeEvent) {
        self.events.push(event.clone());
    }

    fn on_session_end(&mut self, end: &SessionEnd) {
        self.ends.push(end.clone());
    }
}

#[derive(Clone, Copy)]
pub struct FailingResolver;

impl Resolver for FailingResolver {
    fn resolve(&self, host: &str) -> Result<IpAddr, ProbeError> {
        Err(ProbeError::resolution(host, None))
    }
}
