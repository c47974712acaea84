//! Packs non-overlapping subnets into a base CIDR.
//!
//! Candidates of the requested prefix length are tried in ascending network
//! address order, so the lowest free slot always wins and freed subnets are
//! reused before fresh address space is touched. Works for IPv4 and IPv6.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use thiserror::Error;

/// Errors raised when carving a subnet out of a base CIDR.
#[derive(Debug, Error)]
pub enum CidrError {
    /// A CIDR string (base or reserved subnet) failed to parse.
    #[error("cannot parse cidr '{cidr}': {source}")]
    InvalidCidr {
        cidr: String,
        #[source]
        source: ipnet::AddrParseError,
    },

    /// The requested prefix length does not fit the base CIDR.
    #[error("prefix length /{requested} is not usable within {base}: it must be longer than the base prefix and at most /{max}")]
    InvalidPrefix {
        requested: u8,
        base: String,
        max: u8,
    },

    /// Every candidate subnet overlaps an existing reservation.
    #[error("no more space for a /{prefix_length} subnet in {base}")]
    NoSpace { base: String, prefix_length: u8 },
}

/// Finds the next free subnet of a fixed prefix length within a base CIDR,
/// given the reservations that already exist.
pub struct CidrCalculator<'a> {
    subnets: &'a BTreeMap<String, String>,
    prefix_length: u8,
    base: IpNet,
}

impl<'a> CidrCalculator<'a> {
    /// Build a calculator over the current reservations.
    ///
    /// Fails with [`CidrError::InvalidCidr`] when `base_cidr` does not parse
    /// and with [`CidrError::InvalidPrefix`] when `prefix_length` is not
    /// strictly longer than the base prefix or exceeds the address family
    /// width (32 for IPv4, 128 for IPv6).
    pub fn new(
        subnets: &'a BTreeMap<String, String>,
        prefix_length: u8,
        base_cidr: &str,
    ) -> Result<Self, CidrError> {
        let base: IpNet = base_cidr
            .parse()
            .map_err(|source| CidrError::InvalidCidr {
                cidr: base_cidr.to_string(),
                source,
            })?;
        let base = base.trunc();
        if prefix_length <= base.prefix_len() || prefix_length > base.max_prefix_len() {
            return Err(CidrError::InvalidPrefix {
                requested: prefix_length,
                base: base.to_string(),
                max: base.max_prefix_len(),
            });
        }
        Ok(Self {
            subnets,
            prefix_length,
            base,
        })
    }

    /// Return the lowest subnet of the configured prefix length that does
    /// not overlap any existing reservation.
    pub fn get_next_netmask(&self) -> Result<String, CidrError> {
        let reserved = self.reserved()?;
        let width = self.base.max_prefix_len();
        let block = 1u128 << (width - self.prefix_length);
        let base_start = addr_to_u128(self.base.network());
        let base_end = addr_to_u128(self.base.broadcast());

        let mut addr = base_start;
        loop {
            let candidate_end = match addr.checked_add(block - 1) {
                Some(end) if end <= base_end => end,
                _ => return Err(self.no_space()),
            };
            let candidate =
                net_at(addr, width, self.prefix_length).ok_or_else(|| self.no_space())?;
            // Overlap = containment in either direction; jump past the widest
            // reservation covering this candidate instead of stepping one
            // block at a time.
            let covering_end = reserved
                .iter()
                .filter(|net| candidate.contains(*net) || net.contains(&candidate))
                .map(|net| addr_to_u128(net.broadcast()))
                .max();
            match covering_end {
                None => return Ok(candidate.to_string()),
                Some(end) => {
                    let next = end
                        .max(candidate_end)
                        .checked_add(1)
                        .ok_or_else(|| self.no_space())?;
                    let offset = next - base_start;
                    let aligned = offset
                        .checked_add(block - 1)
                        .ok_or_else(|| self.no_space())?
                        / block
                        * block;
                    addr = base_start
                        .checked_add(aligned)
                        .ok_or_else(|| self.no_space())?;
                }
            }
        }
    }

    fn reserved(&self) -> Result<Vec<IpNet>, CidrError> {
        self.subnets
            .values()
            .map(|cidr| {
                cidr.parse::<IpNet>()
                    .map(|net| net.trunc())
                    .map_err(|source| CidrError::InvalidCidr {
                        cidr: cidr.clone(),
                        source,
                    })
            })
            .collect()
    }

    fn no_space(&self) -> CidrError {
        CidrError::NoSpace {
            base: self.base.to_string(),
            prefix_length: self.prefix_length,
        }
    }
}

fn addr_to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

fn net_at(addr: u128, width: u8, prefix_length: u8) -> Option<IpNet> {
    match width {
        32 => {
            let v4 = Ipv4Addr::from(u32::try_from(addr).ok()?);
            Ipv4Net::new(v4, prefix_length).ok().map(IpNet::V4)
        }
        _ => Ipv6Net::new(Ipv6Addr::from(addr), prefix_length)
            .ok()
            .map(IpNet::V6),
    }
}
