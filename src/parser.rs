use crate::packet::{ECHO_HEADER_LEN, echo_reply_type, echo_request_type, time_exceeded_type};

use pnet::packet::icmp::IcmpPacket;
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::EchoRequestPacket;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use std::net::IpAddr;

/// What a received datagram turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClassification {
    /// Echo reply; identifier and sequence come from the reply header.
    EchoReply { from: IpAddr, identifier: u16, sequence: u16 },
    /// Time exceeded; identifier and sequence come from the quoted original
    /// echo request.
    TimeExceeded { from: IpAddr, identifier: u16, sequence: u16 },
    Unrelated { from: IpAddr },
    Malformed { from: IpAddr },
}

impl ReplyClassification {
    pub fn responder(&self) -> IpAddr {
        match *self {
            ReplyClassification::EchoReply { from, .. }
            | ReplyClassification::TimeExceeded { from, .. }
            | ReplyClassification::Unrelated { from }
            | ReplyClassification::Malformed { from } => from,
        }
    }

    /// Identifier and sequence of the probe this reply answers, if any.
    pub fn echoed(&self) -> Option<(u16, u16)> {
        match *self {
            ReplyClassification::EchoReply { identifier, sequence, .. }
            | ReplyClassification::TimeExceeded { identifier, sequence, .. } => {
                Some((identifier, sequence))
            }
            _ => None,
        }
    }
}

/// Classifies a raw IP datagram.
///
/// ICMPv4 datagrams start with an IPv4 header whose length is taken from its
/// IHL field; ICMPv6 datagrams start directly at the ICMPv6 header, so the
/// responder is `from` (the socket-level source address). For ICMPv4 the
/// responder is read from the IP header.
pub fn classify_reply(datagram: &[u8], is_v6: bool, from: IpAddr) -> ReplyClassification {
    if is_v6 {
        return classify_icmp(datagram, true, from);
    }

    let Some(ipv4) = Ipv4Packet::new(datagram) else {
        return ReplyClassification::Malformed { from };
    };
    let header_len = ipv4.get_header_length() as usize * 4;
    if header_len < Ipv4Packet::minimum_packet_size() || datagram.len() < header_len {
        return ReplyClassification::Malformed { from };
    }

    let from = IpAddr::V4(ipv4.get_source());
    if ipv4.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
        return ReplyClassification::Unrelated { from };
    }

    classify_icmp(&datagram[header_len..], false, from)
}

/// Classifies a bare ICMP message (no IP header in front).
pub fn classify_icmp(icmp: &[u8], is_v6: bool, from: IpAddr) -> ReplyClassification {
    let Some(icmp_packet) = IcmpPacket::new(icmp) else {
        return ReplyClassification::Malformed { from };
    };
    let icmp_type = icmp_packet.get_icmp_type().0;

    if icmp_type == echo_reply_type(is_v6) {
        // ICMPv6 echo replies share the ICMPv4 layout.
        return match EchoReplyPacket::new(icmp) {
            Some(erp) => ReplyClassification::EchoReply {
                from,
                identifier: erp.get_identifier(),
                sequence: erp.get_sequence_number(),
            },
            None => ReplyClassification::Malformed { from },
        };
    }

    if icmp_type == time_exceeded_type(is_v6) {
        // 4 bytes of type/code/checksum and 4 unused bytes precede the quote.
        let Some(quoted) = icmp.get(ECHO_HEADER_LEN..) else {
            return ReplyClassification::Malformed { from };
        };
        return match original_probe(quoted, is_v6) {
            Quoted::Echo(identifier, sequence) => {
                ReplyClassification::TimeExceeded { from, identifier, sequence }
            }
            Quoted::Other => ReplyClassification::Unrelated { from },
            Quoted::Truncated => ReplyClassification::Malformed { from },
        };
    }

    ReplyClassification::Unrelated { from }
}

enum Quoted {
    Echo(u16, u16),
    Other,
    Truncated,
}

/// Re-parses the original IP header plus the first 8 bytes of the original
/// ICMP message quoted inside a time-exceeded payload.
fn original_probe(quoted: &[u8], is_v6: bool) -> Quoted {
    let (protocol_is_icmp, inner_icmp) = if is_v6 {
        let Some(ipv6) = Ipv6Packet::new(quoted) else {
            return Quoted::Truncated;
        };
        (
            ipv6.get_next_header() == IpNextHeaderProtocols::Icmpv6,
            &quoted[Ipv6Packet::minimum_packet_size()..],
        )
    } else {
        let Some(ipv4) = Ipv4Packet::new(quoted) else {
            return Quoted::Truncated;
        };
        let header_len = ipv4.get_header_length() as usize * 4;
        if header_len < Ipv4Packet::minimum_packet_size() || quoted.len() < header_len {
            return Quoted::Truncated;
        }
        (ipv4.get_next_level_protocol() == IpNextHeaderProtocols::Icmp, &quoted[header_len..])
    };

    if !protocol_is_icmp {
        return Quoted::Other;
    }

    match EchoRequestPacket::new(inner_icmp) {
        Some(original) if original.get_icmp_type().0 == echo_request_type(is_v6) => {
            Quoted::Echo(original.get_identifier(), original.get_sequence_number())
        }
        Some(_) => Quoted::Other,
        None => Quoted::Truncated,
    }
}
