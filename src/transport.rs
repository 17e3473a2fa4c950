use log::debug;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Duration;

/// How a received buffer is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Starts with the IPv4 header.
    Ip,
    /// Starts directly at the ICMP header.
    Icmp,
}

#[derive(Debug, Clone)]
pub struct ReceivedPacket {
    pub data: Vec<u8>,
    pub source: IpAddr,
    pub framing: Framing,
}

/// The raw-socket capability the engines probe through. Each engine instance
/// owns its transport; nothing here has to be safe for concurrent callers.
pub trait Transport {
    /// Sends one ICMP message with the given IP TTL / hop limit.
    fn send_to(&mut self, packet: &[u8], destination: IpAddr, ttl: Option<u8>) -> io::Result<()>;

    /// Waits up to `timeout` for the next datagram; `Ok(None)` on timeout.
    fn recv_from(&mut self, timeout: Duration) -> io::Result<Option<ReceivedPacket>>;

    /// Identifier the kernel substitutes into outgoing echo requests, for
    /// sockets that rewrite it (unprivileged datagram ICMP sockets).
    fn echo_identifier(&self) -> Option<u16> {
        None
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_to(&mut self, packet: &[u8], destination: IpAddr, ttl: Option<u8>) -> io::Result<()> {
        (**self).send_to(packet, destination, ttl)
    }

    fn recv_from(&mut self, timeout: Duration) -> io::Result<Option<ReceivedPacket>> {
        (**self).recv_from(timeout)
    }

    fn echo_identifier(&self) -> Option<u16> {
        (**self).echo_identifier()
    }
}

/// ICMP socket built with `socket2`: `SOCK_RAW` when privileged, otherwise an
/// unprivileged `SOCK_DGRAM` ICMP socket where the platform offers one. The
/// socket is opened on first send, for the destination's address family.
pub struct RawSocketTransport {
    privileged: bool,
    socket: Option<IcmpSocket>,
    buffer: Vec<u8>,
}

struct IcmpSocket {
    // Converted to a std socket once configured, so reads go through the
    // safe `&mut [u8]` API and still report the sender's address.
    socket: UdpSocket,
    is_v6: bool,
    ttl: Option<u8>,
}

impl RawSocketTransport {
    pub fn new(privileged: bool) -> RawSocketTransport {
        RawSocketTransport { privileged, socket: None, buffer: vec![0u8; 1500] }
    }

    /// Opens the socket up front so permission problems surface early.
    pub fn open(destination: IpAddr, privileged: bool) -> io::Result<RawSocketTransport> {
        let mut transport = RawSocketTransport::new(privileged);
        transport.socket_for(destination.is_ipv6())?;
        Ok(transport)
    }

    fn socket_for(&mut self, is_v6: bool) -> io::Result<&mut IcmpSocket> {
        if self.socket.as_ref().is_none_or(|s| s.is_v6 != is_v6) {
            let (domain, protocol) = if is_v6 {
                (Domain::IPV6, Protocol::ICMPV6)
            } else {
                (Domain::IPV4, Protocol::ICMPV4)
            };
            let socket_type = if self.privileged { Type::RAW } else { Type::DGRAM };

            let socket = Socket::new(domain, socket_type, Some(protocol))?;
            debug!(
                "opened {} ICMP{} socket",
                if self.privileged { "raw" } else { "datagram" },
                if is_v6 { "v6" } else { "v4" }
            );
            self.socket = Some(IcmpSocket { socket: socket.into(), is_v6, ttl: None });
        }
        self.socket.as_mut().ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no ICMP socket"))
    }
}

impl IcmpSocket {
    fn apply_ttl(&mut self, ttl: Option<u8>) -> io::Result<()> {
        if ttl == self.ttl {
            return Ok(());
        }
        if let Some(ttl) = ttl {
            if self.is_v6 {
                SockRef::from(&self.socket).set_unicast_hops_v6(ttl as u32)?;
            } else {
                self.socket.set_ttl(ttl as u32)?;
            }
        }
        self.ttl = ttl;
        Ok(())
    }
}

/// Raw IPv4 sockets hand over the IP header; IPv6 ones never do. Datagram
/// ICMP sockets include it on some platforms only.
fn framing(is_v6: bool, privileged: bool, data: &[u8]) -> Framing {
    if is_v6 {
        return Framing::Icmp;
    }
    if privileged {
        return Framing::Ip;
    }
    if data.len() >= 20 && data[0] >> 4 == 4 { Framing::Ip } else { Framing::Icmp }
}

/// Echo identifier a datagram ICMP socket bound to `port` puts on the wire.
/// Linux rewrites it to the local port; elsewhere the identifier we wrote is
/// sent unchanged.
fn kernel_identifier(port: u16) -> Option<u16> {
    if cfg!(any(target_os = "linux", target_os = "android")) && port != 0 {
        Some(port)
    } else {
        None
    }
}

impl Transport for RawSocketTransport {
    fn send_to(&mut self, packet: &[u8], destination: IpAddr, ttl: Option<u8>) -> io::Result<()> {
        let icmp = self.socket_for(destination.is_ipv6())?;
        icmp.apply_ttl(ttl)?;
        icmp.socket.send_to(packet, SocketAddr::new(destination, 0))?;
        Ok(())
    }

    fn recv_from(&mut self, timeout: Duration) -> io::Result<Option<ReceivedPacket>> {
        let Some(icmp) = self.socket.as_ref() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "nothing sent yet"));
        };
        if timeout.is_zero() {
            return Ok(None);
        }
        icmp.socket.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        let (len, address) = match icmp.socket.recv_from(&mut self.buffer) {
            Ok(received) => received,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let data = self.buffer[..len].to_vec();
        let framing = framing(icmp.is_v6, self.privileged, &data);
        Ok(Some(ReceivedPacket { data, source: address.ip(), framing }))
    }

    fn echo_identifier(&self) -> Option<u16> {
        if self.privileged {
            return None;
        }
        // Bound by the kernel on first send.
        let icmp = self.socket.as_ref()?;
        kernel_identifier(icmp.socket.local_addr().ok()?.port())
    }
}
