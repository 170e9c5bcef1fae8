//! The simulator's stand-in for DNS resolution (§4.G): instead of asking the
//! host OS, a measurement's "first hop" lookup of a hosted name resolves
//! straight to the synthetic address assigned to it.

use std::net::IpAddr;

use futures::future::BoxFuture;
use rbmk_net::{NetworkError, Resolver};

use crate::addresses::Addresses;

/// Resolves the small, fixed set of hostnames the simulator hosts
/// (`dns.google`, `www.example.com`, ...) to their synthetic IPs, and
/// anything else the way [`rbmk_net::resolver::SystemResolver`] would have
/// refused to: as an unresolvable name, so a scenario can't accidentally
/// reach the real Internet through a `Network` built on top of this.
#[derive(Debug, Clone)]
pub struct SimResolver {
    addresses: Addresses,
}

impl SimResolver {
    pub fn new(addresses: Addresses) -> Self {
        Self { addresses }
    }
}

impl Resolver for SimResolver {
    fn lookup_host<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, NetworkError>> {
        Box::pin(async move {
            if let Ok(ip) = host.parse::<IpAddr>() {
                return Ok(vec![ip]);
            }

            match self.addresses.ip_for_host(host) {
                Some(ip) => Ok(vec![ip]),
                None => Err(NetworkError::Resolve(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("host {host} is not hosted by this simulator"),
                ))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_hosted_names_to_their_synthetic_address() {
        let addresses = Addresses::default();
        let resolver = SimResolver::new(addresses);

        let ips = resolver.lookup_host("dns.google").await.unwrap();
        assert_eq!(ips, vec![addresses.dns_google]);
    }

    #[tokio::test]
    async fn refuses_names_the_simulator_does_not_host() {
        let resolver = SimResolver::new(Addresses::default());

        assert!(resolver.lookup_host("example.org").await.is_err());
    }
}
