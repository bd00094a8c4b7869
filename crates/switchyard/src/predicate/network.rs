//! Client address matching against a single address or a CIDR block.

use crate::error::PredicateError;
use ipnet::IpNet;
use std::net::IpAddr;

/// Compiled network for the IP predicate.
///
/// A bare address compiles to a host network (/32 or /128).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledNetwork {
    net: IpNet,
}

impl CompiledNetwork {
    pub fn compile(spec: &str) -> Result<Self, PredicateError> {
        let spec = spec.trim();
        let net = if spec.contains('/') {
            spec.parse::<IpNet>()
                .map_err(|_| PredicateError::InvalidNetwork(spec.to_string()))?
        } else {
            spec.parse::<IpAddr>()
                .map(IpNet::from)
                .map_err(|_| PredicateError::InvalidNetwork(spec.to_string()))?
        };
        Ok(Self { net })
    }

    /// IPv4-mapped IPv6 clients are compared as their IPv4 address.
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.net.contains(&ip.to_canonical())
    }

    pub fn net(&self) -> &IpNet {
        &self.net
    }
}
