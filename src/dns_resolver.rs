use crate::error::ProbeError;

use log::debug;
use std::io;
use std::net::IpAddr;

/// Turns a host name or address literal into the address to probe.
pub trait Resolver {
    fn resolve(&self, host: &str) -> Result<IpAddr, ProbeError>;
}

/// Forward lookup through the system resolver. IPv4 answers are preferred
/// unless `prefer_v6` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver {
    pub prefer_v6: bool,
}

impl Resolver for DnsResolver {
    fn resolve(&self, host: &str) -> Result<IpAddr, ProbeError> {
        if let Ok(address) = host.parse::<IpAddr>() {
            return Ok(address);
        }

        let addresses = dns_lookup::lookup_host(host)
            .map_err(|e| ProbeError::resolution(host, Some(io::Error::from(e))))?;
        debug!("{} resolved to {:?}", host, addresses);

        let address = addresses
            .iter()
            .find(|a| a.is_ipv6() == self.prefer_v6)
            .or_else(|| addresses.first())
            .copied();
        address.ok_or_else(|| ProbeError::resolution(host, None))
    }
}

/// Always answers with the same address.
#[derive(Debug, Clone, Copy)]
pub struct StaticResolver(pub IpAddr);

impl Resolver for StaticResolver {
    fn resolve(&self, _host: &str) -> Result<IpAddr, ProbeError> {
        Ok(self.0)
    }
}

impl<R: Resolver + ?Sized> Resolver for &R {
    fn resolve(&self, host: &str) -> Result<IpAddr, ProbeError> {
        (**self).resolve(host)
    }
}
