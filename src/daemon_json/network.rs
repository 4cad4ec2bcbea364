use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde_json::{Value, json};

/// Default subnet size carved out of an address pool when only a base is given.
pub const DEFAULT_POOL_SIZE: u8 = 24;

/// An address with a prefix length, e.g. `172.20.0.1/16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    pub addr: IpAddr,
    pub prefix: u8,
}

impl Cidr {
    fn max_prefix(&self) -> u8 {
        match self.addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }
}

impl FromStr for Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("'{s}' is not in CIDR notation (expected <address>/<prefix>)"))?;
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| format!("'{addr}' is not a valid IP address"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| format!("'{prefix}' is not a valid prefix length"))?;
        let cidr = Cidr { addr, prefix };
        if prefix > cidr.max_prefix() {
            return Err(format!(
                "prefix /{prefix} is too long for {addr} (max /{})",
                cidr.max_prefix()
            ));
        }
        Ok(cidr)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// One entry of `default-address-pools`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPool {
    pub base: Cidr,
    pub size: u8,
}

impl AddressPool {
    pub fn to_json(self) -> Value {
        json!({ "base": self.base.to_string(), "size": self.size })
    }
}

/// Accepts a bare CIDR (size defaults to 24) or Docker's own
/// `base=<cidr>,size=<n>` form.
impl FromStr for AddressPool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !s.contains('=') {
            let base: Cidr = s.parse()?;
            return AddressPool::checked(base, DEFAULT_POOL_SIZE.max(base.prefix));
        }

        let mut base = None;
        let mut size = None;
        for part in s.split(',') {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| format!("malformed address pool field '{part}'"))?;
            match key.trim() {
                "base" => base = Some(value.parse::<Cidr>()?),
                "size" => {
                    size = Some(
                        value
                            .trim()
                            .parse::<u8>()
                            .map_err(|_| format!("'{value}' is not a valid pool size"))?,
                    )
                }
                other => return Err(format!("unknown address pool field '{other}'")),
            }
        }
        let base = base.ok_or_else(|| "address pool is missing 'base'".to_string())?;
        AddressPool::checked(base, size.unwrap_or(DEFAULT_POOL_SIZE.max(base.prefix)))
    }
}

impl AddressPool {
    fn checked(base: Cidr, size: u8) -> Result<Self, String> {
        if size < base.prefix || size > base.max_prefix() {
            return Err(format!(
                "pool size /{size} must be between /{} and /{}",
                base.prefix,
                base.max_prefix()
            ));
        }
        Ok(AddressPool { base, size })
    }
}
