use std::str::FromStr;

use dns_wire::Protocol;
use url::Url;

use crate::error::NetworkError;

/// A `(protocol, address)` pair naming the server a measurement talks to.
///
/// `address` is `host:port` for UDP/TCP/DoT/DoQ and an absolute URL for DoH.
/// The protocol tag is the single source of truth for which transport runs
/// and which query-ID policy applies (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    pub protocol: Protocol,
    pub address: String,
}

impl ServerAddr {
    pub fn new(protocol: Protocol, address: impl Into<String>) -> Self {
        Self {
            protocol,
            address: address.into(),
        }
    }

    /// Splits `host:port` into its parts, filling in the protocol's default
    /// port (§4.A/§4.B) when `address` doesn't specify one. Not valid for DoH,
    /// whose address is a URL (use [`ServerAddr::doh_url`] instead).
    pub fn host_port(&self) -> Result<(String, u16), NetworkError> {
        if self.protocol == Protocol::Doh {
            return Err(NetworkError::InvalidAddress(
                "DoH addresses are URLs, not host:port".into(),
            ));
        }

        match self.address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| NetworkError::InvalidAddress(self.address.clone()))?;
                Ok((strip_brackets(host).to_owned(), port))
            }
            None => Ok((self.address.clone(), self.protocol.default_port())),
        }
    }

    pub fn doh_url(&self) -> Result<Url, NetworkError> {
        Url::parse(&self.address).map_err(|_| NetworkError::InvalidAddress(self.address.clone()))
    }
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// Parses a `dialDNS`-style URL (`udp://`, `tcp://`, `dot://`, `https://`) into
/// a [`ServerAddr`], per §4.B. Unsupported schemes fail deterministically.
pub fn parse_dial_dns_url(url: &str) -> Result<ServerAddr, NetworkError> {
    let parsed = Url::parse(url).map_err(|_| NetworkError::InvalidAddress(url.to_owned()))?;

    let protocol = match parsed.scheme() {
        "udp" => Protocol::Udp,
        "tcp" => Protocol::Tcp,
        "dot" => Protocol::Dot,
        "https" => Protocol::Doh,
        "doq" => Protocol::Doq,
        other => return Err(NetworkError::UnsupportedScheme(other.to_owned())),
    };

    if protocol == Protocol::Doh {
        return Ok(ServerAddr::new(protocol, url));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| NetworkError::InvalidAddress(url.to_owned()))?;
    let port = parsed.port().unwrap_or_else(|| protocol.default_port());

    Ok(ServerAddr::new(protocol, format!("{host}:{port}")))
}

impl FromStr for ServerAddr {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_dial_dns_url(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ftp_scheme_is_rejected() {
        let err = parse_dial_dns_url("ftp://dns.google").unwrap_err();

        assert!(matches!(err, NetworkError::UnsupportedScheme(s) if s == "ftp"));
    }

    #[test]
    fn udp_scheme_defaults_to_port_53() {
        let addr = parse_dial_dns_url("udp://dns.google").unwrap();

        assert_eq!(addr.protocol, Protocol::Udp);
        assert_eq!(addr.address, "dns.google:53");
    }

    #[test]
    fn dot_scheme_defaults_to_port_853() {
        let addr = parse_dial_dns_url("dot://dns.google").unwrap();

        assert_eq!(addr.address, "dns.google:853");
    }

    #[test]
    fn https_scheme_keeps_full_url() {
        let addr = parse_dial_dns_url("https://dns.google/dns-query").unwrap();

        assert_eq!(addr.protocol, Protocol::Doh);
        assert_eq!(addr.address, "https://dns.google/dns-query");
    }
}
