//! ICMP probe engine: echo-request ping and TTL-escalating traceroute over
//! IPv4 and IPv6.

pub mod checksum;
pub mod diagnostics;
pub mod dns_resolver;
pub mod error;
pub mod messages;
pub mod packet;
pub mod parser;
pub mod pinger;
pub mod session;
pub mod stop;
pub mod tracer;
pub mod transport;

pub use diagnostics::Diagnostics;
pub use dns_resolver::{DnsResolver, Resolver, StaticResolver};
pub use error::ProbeError;
pub use messages::{EndReason, EventSink, HopAttempt, HopResult, PingOutcome, ProbeEvent, SessionEnd, SessionMessage};
pub use parser::{ReplyClassification, classify_reply};
pub use pinger::{PingConfig, PingEngine};
pub use session::{ProbeIdentity, ProbeSession, SequenceAllocator};
pub use stop::StopHandle;
pub use tracer::{DestinationPolicy, TraceReport, TracerouteConfig, TracerouteEngine, TracerouteSession};
pub use transport::{Framing, RawSocketTransport, ReceivedPacket, Transport};
