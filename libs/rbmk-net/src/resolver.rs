use std::net::IpAddr;

use futures::future::BoxFuture;

use crate::error::NetworkError;

/// Resolves a hostname to the set of IPs a dial should try, in order.
///
/// Swappable so the QA simulator (Component G) can answer with its synthetic
/// address assignment instead of the host OS's real resolver.
pub trait Resolver: Send + Sync {
    fn lookup_host<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, NetworkError>>;
}

/// Resolves via the host operating system (`getaddrinfo`, through Tokio).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn lookup_host<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, NetworkError>> {
        Box::pin(async move {
            if let Ok(ip) = host.parse::<IpAddr>() {
                return Ok(vec![ip]);
            }

            let addrs = tokio::net::lookup_host((host, 0))
                .await
                .map_err(NetworkError::Resolve)?;

            Ok(addrs.map(|a| a.ip()).collect())
        })
    }
}
