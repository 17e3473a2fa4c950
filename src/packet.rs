use crate::checksum::checksum;

use pnet::packet::Packet;
use pnet::packet::icmp::echo_request::{EchoRequestPacket, MutableEchoRequestPacket};
use pnet::packet::icmp::{IcmpCode, IcmpType, IcmpTypes};
use pnet::packet::icmpv6::Icmpv6Types;

/// Type, code, checksum, identifier and sequence number.
pub const ECHO_HEADER_LEN: usize = 8;

/// Payload size used when a config does not say otherwise.
pub const DEFAULT_PAYLOAD_SIZE: usize = 56;

/// An ICMP echo-style message: the same layout serves echo requests and
/// replies for both ICMPv4 and ICMPv6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpPacket {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
    pub payload: Vec<u8>,
}

impl IcmpPacket {
    pub fn echo_request(identifier: u16, sequence: u16, is_v6: bool, payload: &[u8]) -> IcmpPacket {
        IcmpPacket {
            icmp_type: echo_request_type(is_v6),
            code: 0,
            checksum: 0,
            identifier,
            sequence,
            payload: payload.to_vec(),
        }
    }

    /// Serializes the message. The checksum is always computed afresh over the
    /// whole message with the checksum field zeroed, whatever `self.checksum`
    /// holds.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; ECHO_HEADER_LEN + self.payload.len()];

        if let Some(mut echo_packet) = MutableEchoRequestPacket::new(&mut buf) {
            echo_packet.set_icmp_type(IcmpType::new(self.icmp_type));
            echo_packet.set_icmp_code(IcmpCode::new(self.code));
            echo_packet.set_checksum(0);
            echo_packet.set_identifier(self.identifier);
            echo_packet.set_sequence_number(self.sequence);
            echo_packet.set_payload(&self.payload);
        }

        let echo_checksum = checksum(&buf);
        buf[2..4].copy_from_slice(&echo_checksum.to_be_bytes());
        buf
    }

    /// Reads an echo-style message; `None` when shorter than the 8-byte header.
    pub fn decode(bytes: &[u8]) -> Option<IcmpPacket> {
        let echo_packet = EchoRequestPacket::new(bytes)?;
        Some(IcmpPacket {
            icmp_type: echo_packet.get_icmp_type().0,
            code: echo_packet.get_icmp_code().0,
            checksum: echo_packet.get_checksum(),
            identifier: echo_packet.get_identifier(),
            sequence: echo_packet.get_sequence_number(),
            payload: echo_packet.payload().to_vec(),
        })
    }
}

/// Builds a ready-to-send echo request: type 8 (ICMPv4) or 128 (ICMPv6),
/// code 0, checksum filled in.
pub fn build_echo_request(identifier: u16, sequence: u16, is_v6: bool, payload: &[u8]) -> Vec<u8> {
    IcmpPacket::echo_request(identifier, sequence, is_v6, payload).encode()
}

/// Payload of `size` bytes with a recognisable incrementing pattern.
pub fn probe_payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

pub fn echo_request_type(is_v6: bool) -> u8 {
    if is_v6 { Icmpv6Types::EchoRequest.0 } else { IcmpTypes::EchoRequest.0 }
}

pub fn echo_reply_type(is_v6: bool) -> u8 {
    if is_v6 { Icmpv6Types::EchoReply.0 } else { IcmpTypes::EchoReply.0 }
}

pub fn time_exceeded_type(is_v6: bool) -> u8 {
    if is_v6 { Icmpv6Types::TimeExceeded.0 } else { IcmpTypes::TimeExceeded.0 }
}
