//! Name resolution
//!
//! IPv4 only. Numeric hosts are parsed locally; names go to the transport's
//! resolver. Results are owned values, one per call.

use std::net::{Ipv4Addr, SocketAddrV4};

use sal_core::{kdebug, AddrInfoError, SalError, SalResult};

use crate::sal::Sal;

/// Caller hints for `getaddrinfo`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddrInfoHints {
    pub flags: i32,
    pub family: i32,
    pub socktype: i32,
    pub protocol: i32,
}

/// One resolved address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrInfo {
    pub flags: i32,
    pub family: i32,
    pub socktype: i32,
    pub protocol: i32,
    pub addr: SocketAddrV4,
    pub canonname: Option<String>,
}

/// Host entry returned by `gethostbyname`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnt {
    pub name: String,
    pub aliases: Vec<String>,
    pub addrtype: i32,
    pub length: usize,
    pub addr_list: Vec<Ipv4Addr>,
}

impl Sal {
    /// Resolve a node and service into one IPv4 socket address
    pub fn getaddrinfo(
        &self,
        node: Option<&str>,
        service: Option<&str>,
        hints: Option<&AddrInfoHints>,
    ) -> Result<AddrInfo, AddrInfoError> {
        if node.is_none() && service.is_none() {
            return Err(AddrInfoError::NoName);
        }
        let hints = hints.copied().unwrap_or_default();
        if hints.family != libc::AF_UNSPEC && hints.family != libc::AF_INET {
            kdebug!("getaddrinfo: family {} not supported", hints.family);
            return Err(AddrInfoError::Family);
        }

        let port = match service {
            Some(s) => parse_port(s).ok_or_else(|| {
                kdebug!("getaddrinfo: bad service {:?}", s);
                AddrInfoError::Service
            })?,
            None => 0,
        };

        let ip = match node {
            Some(name) if hints.flags & libc::AI_NUMERICHOST != 0 => {
                name.parse::<Ipv4Addr>().map_err(|_| {
                    kdebug!("getaddrinfo: {:?} is not a numeric host", name);
                    AddrInfoError::NoName
                })?
            }
            Some(name) => {
                if name.len() > self.config().dns_max_name_len {
                    kdebug!("getaddrinfo: name too long ({} bytes)", name.len());
                    return Err(AddrInfoError::Fail);
                }
                self.transport().domain_to_ip(name).map_err(|e| {
                    kdebug!("getaddrinfo: cannot resolve {:?}: {}", name, e);
                    AddrInfoError::Fail
                })?
            }
            None if hints.flags & libc::AI_PASSIVE != 0 => Ipv4Addr::UNSPECIFIED,
            None => Ipv4Addr::LOCALHOST,
        };

        Ok(AddrInfo {
            flags: 0,
            family: libc::AF_INET,
            socktype: hints.socktype,
            protocol: hints.protocol,
            addr: SocketAddrV4::new(ip, port),
            canonname: node.map(str::to_owned),
        })
    }

    /// Resolve a host name
    pub fn gethostbyname(&self, name: &str) -> SalResult<HostEnt> {
        if name.is_empty() {
            return Err(SalError::InvalidArgument);
        }
        let ip = self.transport().domain_to_ip(name).map_err(|e| {
            kdebug!("gethostbyname: cannot resolve {:?}: {}", name, e);
            e
        })?;

        let mut end = name.len().min(self.config().dns_max_name_len);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        Ok(HostEnt {
            name: name[..end].to_owned(),
            aliases: Vec::new(),
            addrtype: libc::AF_INET,
            length: 4,
            addr_list: vec![ip],
        })
    }
}

/// Release a result from `getaddrinfo`
pub fn freeaddrinfo(ai: AddrInfo) {
    drop(ai);
}

/// Decimal port in 1..=65535
fn parse_port(s: &str) -> Option<u16> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match s.parse::<u32>() {
        Ok(p @ 1..=65535) => Some(p as u16),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::setup;

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("80"), Some(80));
        assert_eq!(parse_port(" 443 "), Some(443));
        assert_eq!(parse_port("65535"), Some(65535));
        assert_eq!(parse_port("0"), None);
        assert_eq!(parse_port("65536"), None);
        assert_eq!(parse_port("http"), None);
        assert_eq!(parse_port("-1"), None);
        assert_eq!(parse_port("99999999999"), None);
    }

    #[test]
    fn test_getaddrinfo_argument_checks() {
        let (sal, _) = setup();
        assert_eq!(sal.getaddrinfo(None, None, None), Err(AddrInfoError::NoName));

        let v6 = AddrInfoHints { family: libc::AF_INET6, ..Default::default() };
        assert_eq!(sal.getaddrinfo(Some("1.2.3.4"), Some("80"), Some(&v6)), Err(AddrInfoError::Family));
        assert_eq!(sal.getaddrinfo(Some("1.2.3.4"), Some("0"), None), Err(AddrInfoError::Service));
    }

    #[test]
    fn test_getaddrinfo_numeric() {
        let (sal, _) = setup();
        let hints = AddrInfoHints {
            flags: libc::AI_NUMERICHOST,
            socktype: libc::SOCK_DGRAM,
            protocol: libc::IPPROTO_UDP,
            ..Default::default()
        };
        let ai = sal.getaddrinfo(Some("10.0.0.7"), Some("5683"), Some(&hints)).unwrap();
        assert_eq!(ai.addr, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 7), 5683));
        assert_eq!(ai.family, libc::AF_INET);
        assert_eq!(ai.socktype, libc::SOCK_DGRAM);
        assert_eq!(ai.protocol, libc::IPPROTO_UDP);
        assert_eq!(ai.canonname.as_deref(), Some("10.0.0.7"));
        freeaddrinfo(ai);

        assert_eq!(
            sal.getaddrinfo(Some("example.com"), Some("80"), Some(&hints)),
            Err(AddrInfoError::NoName)
        );
    }

    #[test]
    fn test_getaddrinfo_resolves_through_transport() {
        let (sal, lo) = setup();
        lo.add_host("broker.local", Ipv4Addr::new(192, 168, 1, 20));

        let ai = sal.getaddrinfo(Some("broker.local"), Some("1883"), None).unwrap();
        assert_eq!(ai.addr, SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 20), 1883));
        assert_eq!(sal.getaddrinfo(Some("nowhere.invalid"), Some("1"), None), Err(AddrInfoError::Fail));

        let long = "a".repeat(sal.config().dns_max_name_len + 1);
        assert_eq!(sal.getaddrinfo(Some(long.as_str()), None, None), Err(AddrInfoError::Fail));
    }

    #[test]
    fn test_getaddrinfo_no_node() {
        let (sal, _) = setup();
        let passive = AddrInfoHints { flags: libc::AI_PASSIVE, ..Default::default() };
        let ai = sal.getaddrinfo(None, Some("8080"), Some(&passive)).unwrap();
        assert_eq!(ai.addr, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 8080));
        assert!(ai.canonname.is_none());

        let ai = sal.getaddrinfo(None, Some("8080"), None).unwrap();
        assert_eq!(*ai.addr.ip(), Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_gethostbyname() {
        let (sal, lo) = setup();
        lo.add_host("gateway", Ipv4Addr::new(10, 1, 1, 1));

        let h = sal.gethostbyname("gateway").unwrap();
        assert_eq!(h.name, "gateway");
        assert_eq!(h.addrtype, libc::AF_INET);
        assert_eq!(h.length, 4);
        assert_eq!(h.addr_list, vec![Ipv4Addr::new(10, 1, 1, 1)]);
        assert!(h.aliases.is_empty());

        let h = sal.gethostbyname("127.0.0.1").unwrap();
        assert_eq!(h.addr_list, vec![Ipv4Addr::LOCALHOST]);

        assert!(sal.gethostbyname("unknown-host").is_err());
        assert_eq!(sal.gethostbyname(""), Err(SalError::InvalidArgument));
    }
}
