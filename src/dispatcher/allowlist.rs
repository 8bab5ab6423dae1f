//! CIDR allowlist
//!
//! Network ranges whose member addresses are always worth enriching. The
//! list is read once at startup from a newline-delimited file and is never
//! reloaded during a run.

use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use tracing::{debug, info};

use crate::error::DispatchError;

/// A network range. Host bits beyond the prefix are masked away on parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
    addr: IpAddr,
    prefix: u8,
}

impl Network {
    /// Parses `a.b.c.d/nn` (or a bare address, meaning a single host).
    ///
    /// Parsing is non-strict: `10.1.2.3/8` is accepted and becomes `10.0.0.0/8`.
    pub fn parse(literal: &str) -> Result<Self, DispatchError> {
        let invalid = || DispatchError::Config(format!("invalid network: {}", literal));

        let (addr, prefix) = match literal.split_once('/') {
            Some((addr, prefix)) => {
                let addr = IpAddr::from_str(addr).map_err(|_| invalid())?;
                let prefix = prefix.parse::<u8>().map_err(|_| invalid())?;
                (addr, prefix)
            }
            None => {
                let addr = IpAddr::from_str(literal).map_err(|_| invalid())?;
                (addr, max_prefix(&addr))
            }
        };

        if prefix > max_prefix(&addr) {
            return Err(invalid());
        }

        Ok(Self {
            addr: mask(addr, prefix),
            prefix,
        })
    }

    /// True when `ip` falls inside this range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {
                mask(*ip, self.prefix) == self.addr
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn mask(addr: IpAddr, prefix: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            IpAddr::V4((bits & mask).into())
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            IpAddr::V6((bits & mask).into())
        }
    }
}

fn has_alphabetic(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_alphabetic())
}

/// The set of allowlisted networks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allowlist {
    networks: Vec<Network>,
}

impl Allowlist {
    /// Builds an allowlist from already parsed networks.
    pub fn new(networks: Vec<Network>) -> Self {
        Self { networks }
    }

    /// Parses newline-delimited network literals.
    ///
    /// Lines containing letters (comments, headers, hostnames) and lines
    /// without a dot are skipped.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Config` naming the line when a remaining
    /// entry is not a valid network.
    ///
    /// # Examples
    ///
    /// ```
    /// use misp_dispatcher::dispatcher::Allowlist;
    ///
    /// let list = Allowlist::parse("# customer ranges\n203.0.113.0/24\n\n10.1.2.3/8\n").unwrap();
    /// assert_eq!(list.len(), 2);
    /// assert!(list.check_ip("10.200.0.1"));
    /// assert!(!list.check_ip("192.0.2.1"));
    /// ```
    pub fn parse(contents: &str) -> Result<Self, DispatchError> {
        let mut networks = Vec::new();

        for (number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if has_alphabetic(line) || !line.contains('.') {
                continue;
            }
            let network = Network::parse(line).map_err(|_| {
                DispatchError::Config(format!(
                    "invalid network on line {}: {}",
                    number + 1,
                    line
                ))
            })?;
            networks.push(network);
        }

        Ok(Self { networks })
    }

    /// Reads and parses the allowlist file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Io` if the file cannot be read and
    /// `DispatchError::Config` if an entry is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let allowlist = Self::parse(&contents)?;
        info!(
            path = %path.display(),
            networks = allowlist.len(),
            "Loaded CIDR allowlist"
        );
        Ok(allowlist)
    }

    /// Number of networks.
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// True when no network is allowlisted.
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// True when `value` is a raw IP address inside an allowlisted network.
    ///
    /// Never fails: anything that is not a bare address (hostnames, URLs,
    /// ranges, empty strings) is simply not an allowlisted IP.
    pub fn check_ip(&self, value: &str) -> bool {
        if has_alphabetic(value) {
            return false;
        }
        if !value
            .chars()
            .any(|c| c.is_ascii_digit() || c == '.' || c == '/')
        {
            return false;
        }

        let ip = match IpAddr::from_str(value) {
            Ok(ip) => ip,
            Err(_) => {
                debug!(value = %value, "Value does not contain an IP address");
                return false;
            }
        };

        self.networks.iter().any(|network| network.contains(&ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_network_parse_masks_host_bits() {
        let network = Network::parse("10.1.2.3/8").unwrap();
        assert_eq!(network.to_string(), "10.0.0.0/8");
    }

    #[test]
    fn test_network_parse_bare_address_is_host_route() {
        let network = Network::parse("192.0.2.9").unwrap();
        assert_eq!(network.to_string(), "192.0.2.9/32");
        assert!(network.contains(&"192.0.2.9".parse().unwrap()));
        assert!(!network.contains(&"192.0.2.10".parse().unwrap()));
    }

    #[test]
    fn test_network_parse_rejects_bad_prefix() {
        assert!(Network::parse("10.0.0.0/33").is_err());
        assert!(Network::parse("10.0.0/8").is_err());
        assert!(Network::parse("10.0.0.0/x").is_err());
    }

    #[test]
    fn test_network_zero_prefix_matches_everything_in_family() {
        let network = Network::parse("0.0.0.0/0").unwrap();
        assert!(network.contains(&"8.8.8.8".parse().unwrap()));
        assert!(!network.contains(&"::1".parse().unwrap()));
    }

    #[test]
    fn test_ipv6_network_contains() {
        let network = Network::parse("2001:db8::/32").unwrap();
        assert!(network.contains(&"2001:db8::1".parse().unwrap()));
        assert!(!network.contains(&"2001:db9::1".parse().unwrap()));
    }

    #[test]
    fn test_parse_skips_alphabetic_and_dotless_lines() {
        let list = Allowlist::parse(
            "Client ranges\n# comment 1.2.3.0/24\nexample.com\n2001:db8::/32\n\n198.51.100.0/24\n",
        )
        .unwrap();
        assert_eq!(list.len(), 1);
        assert!(list.check_ip("198.51.100.77"));
    }

    #[test]
    fn test_parse_reports_invalid_line() {
        let err = Allowlist::parse("198.51.100.0/24\n300.1.1.1/8\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_check_ip_members_and_non_members() {
        let list = Allowlist::parse("203.0.113.0/24\n10.0.0.0/8\n").unwrap();
        assert!(list.check_ip("203.0.113.7"));
        assert!(list.check_ip("203.0.113.255"));
        assert!(list.check_ip("10.20.30.40"));
        assert!(!list.check_ip("203.0.114.1"));
        assert!(!list.check_ip("11.0.0.1"));
    }

    #[test]
    fn test_check_ip_never_fails_on_garbage() {
        let list = Allowlist::parse("203.0.113.0/24\n").unwrap();
        for value in [
            "",
            "evil.example.com",
            "http://203.0.113.7/",
            "203.0.113",
            "203.0.113.7/32",
            "203.0.113.7:443",
            "---",
            " 203.0.113.7",
            "999.999.999.999",
        ] {
            assert!(!list.check_ip(value), "{:?} should not match", value);
        }
    }

    #[test]
    fn test_check_ip_rejects_ipv6_with_letters() {
        let list = Allowlist::new(vec![
            Network::parse("2001:db8::/32").unwrap(),
            Network::parse("2001:1::/32").unwrap(),
        ]);
        assert!(!list.check_ip("2001:db8::1"));
        assert!(list.check_ip("2001:1::1"));
    }

    #[test]
    fn test_empty_allowlist_matches_nothing() {
        let list = Allowlist::default();
        assert!(list.is_empty());
        assert!(!list.check_ip("203.0.113.7"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "203.0.113.0/24").unwrap();
        writeln!(file, "comment line").unwrap();

        let list = Allowlist::load(file.path()).unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = Allowlist::load("/nonexistent/allowlist.txt").unwrap_err();
        assert!(matches!(err, DispatchError::Io(_)));
    }
}
