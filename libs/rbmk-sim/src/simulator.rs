//! Wires an [`Addresses`] plan, a [`RootCa`], a shared [`Router`], and the
//! two hosted [`Stack`]s together into one runnable QA topology (§4.G).

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use dns_wire::Protocol;
use rbmk_net::{AddrTranslator, Network};

use crate::addresses::Addresses;
use crate::pki::{server_tls_config, PkiError, RootCa};
use crate::resolver::SimResolver;
use crate::router::Router;
use crate::servers::{self, DnsDatabase, HttpHandlerSlot};
use crate::stack::{Stack, StackError};

#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error("failed to resolve PKI cache directory: {0:#}")]
    CacheDir(anyhow::Error),
    #[error(transparent)]
    Pki(#[from] PkiError),
    #[error(transparent)]
    Tls(#[from] rustls::Error),
    #[error(transparent)]
    Stack(#[from] StackError),
}

/// A running QA topology: `dns.google` answering over all four transports it
/// supports, `www.example.com` serving HTTP/HTTPS with a replaceable
/// handler, both behind one shared packet-filter [`Router`] (§4.G).
///
/// Named `Simulator` rather than `Scenario` to stay out of the way of
/// `rbmk-scenarios`'s registry entry type, which owns that name instead.
pub struct Simulator {
    addresses: Addresses,
    router: Arc<Router>,
    root_ca: Arc<RootCa>,
    db: Arc<DnsDatabase>,
    dns_google: Arc<Stack>,
    www_example: Arc<Stack>,
    http_handler: HttpHandlerSlot,
}

impl Simulator {
    /// Brings up both hosts using the platform-default PKI cache directory
    /// (`known_dirs::qa_pki_cache_dir`, SPEC_FULL layer K), rather than a
    /// caller-chosen path. The entry point a standalone QA run should use.
    pub async fn start_default() -> Result<Self, SimulatorError> {
        let pki_cache_dir = known_dirs::qa_pki_cache_dir().map_err(SimulatorError::CacheDir)?;
        Self::start(&pki_cache_dir).await
    }

    /// Brings up both hosts. `pki_cache_dir` is where the root CA is
    /// minted/cached (§4.G: "files are read-only after creation").
    pub async fn start(pki_cache_dir: &Path) -> Result<Self, SimulatorError> {
        let addresses = Addresses::default();
        let router = Arc::new(Router::new());
        let root_ca = Arc::new(RootCa::load_or_create(pki_cache_dir)?);
        let db = Arc::new(DnsDatabase::seeded(&addresses));
        let http_handler = HttpHandlerSlot::new(servers::default_http_handler());

        let dns_google = Stack::new(addresses.dns_google, router.clone());
        dns_google
            .host_udp(Protocol::Udp, 53, servers::dns_udp_handler(db.clone()))
            .await?;
        dns_google
            .host_tcp(Protocol::Tcp, 53, servers::dns_tcp_handler(db.clone()))
            .await?;

        let dot_leaf = root_ca.issue_leaf("dns.google", addresses.dns_google)?;
        let dot_acceptor =
            tokio_rustls::TlsAcceptor::from(Arc::new(server_tls_config(dot_leaf, &["dot"])?));
        dns_google
            .host_tcp(Protocol::Dot, 853, servers::dns_tls_handler(db.clone(), dot_acceptor))
            .await?;

        let doh_leaf = root_ca.issue_leaf("dns.google", addresses.dns_google)?;
        let doh_acceptor =
            tokio_rustls::TlsAcceptor::from(Arc::new(server_tls_config(doh_leaf, &["h2"])?));
        dns_google
            .host_tcp(Protocol::Doh, 443, servers::doh_handler(db.clone(), doh_acceptor))
            .await?;

        // dns_wire::Protocol is a closed DNS-transport enumeration; www.example.com's
        // plain HTTP/HTTPS servers aren't a DNS transport at all, so this reuses `Tcp`
        // and `Doh` purely as this stack's internal front-proxy keys (never serialized,
        // never seen by `dns_wire` itself) since both pairs share identical framing:
        // raw TCP vs. TLS-terminated length-framed-by-protocol traffic.
        let www_example = Stack::new(addresses.www_example_com, router.clone());
        www_example
            .host_tcp(Protocol::Tcp, 80, servers::http_handler(http_handler.clone()))
            .await?;

        let https_leaf = root_ca.issue_leaf("www.example.com", addresses.www_example_com)?;
        let https_acceptor =
            tokio_rustls::TlsAcceptor::from(Arc::new(server_tls_config(https_leaf, &["http/1.1"])?));
        www_example
            .host_tcp(Protocol::Doh, 443, servers::https_handler(http_handler.clone(), https_acceptor))
            .await?;

        Ok(Self {
            addresses,
            router,
            root_ca,
            db,
            dns_google,
            www_example,
            http_handler,
        })
    }

    pub fn addresses(&self) -> Addresses {
        self.addresses
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn db(&self) -> &Arc<DnsDatabase> {
        &self.db
    }

    pub fn root_ca(&self) -> &Arc<RootCa> {
        &self.root_ca
    }

    /// The slot backing `www.example.com`'s HTTP/HTTPS handler — install a
    /// different one to change what a scenario's fetch sees.
    pub fn http_handler(&self) -> &HttpHandlerSlot {
        &self.http_handler
    }

    /// Builds a [`Network`] that trusts this simulator's root CA and
    /// redirects any dial targeting a hosted synthetic IP to that host's
    /// front proxy (§4.G: "B's dialer is replaced by G's client stack").
    pub fn network(&self) -> Network {
        let dns_google_ip = self.addresses.dns_google;
        let www_example_ip = self.addresses.www_example_com;
        let dns_google = self.dns_google.clone();
        let www_example = self.www_example.clone();

        let translate: Arc<AddrTranslator> = Arc::new(move |protocol, addr: SocketAddr| {
            let stack = if addr.ip() == dns_google_ip {
                &dns_google
            } else if addr.ip() == www_example_ip {
                &www_example
            } else {
                return addr;
            };

            stack.front_addr(protocol).unwrap_or(addr)
        });

        Network::with_root_store(self.root_ca.root_store())
            .with_resolver(Arc::new(SimResolver::new(self.addresses)))
            .with_translator(translate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_both_hosts_and_exposes_their_front_addresses() {
        let dir = known_dirs::qa_pki_cache_dir()
            .unwrap()
            .join(format!("test-{}", std::process::id()));
        let simulator = Simulator::start(&dir).await.unwrap();

        assert!(simulator.dns_google.front_addr(Protocol::Udp).is_some());
        assert!(simulator.dns_google.front_addr(Protocol::Tcp).is_some());
        assert!(simulator.dns_google.front_addr(Protocol::Dot).is_some());
        assert!(simulator.dns_google.front_addr(Protocol::Doh).is_some());
        assert!(simulator.www_example.front_addr(Protocol::Tcp).is_some());
        assert!(simulator.www_example.front_addr(Protocol::Doh).is_some());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn start_default_resolves_the_platform_pki_cache_dir() {
        let simulator = Simulator::start_default().await.unwrap();

        assert!(simulator.dns_google.front_addr(Protocol::Udp).is_some());
    }
}
