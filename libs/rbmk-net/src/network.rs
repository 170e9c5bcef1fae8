use std::net::SocketAddr;
use std::sync::Arc;

use dns_wire::Protocol;
use rbmk_observe::{system, Clock, Event, Msg, SharedSink, WireProtocol};
use socket_factory::{SocketFactory, TcpSocket, TcpStream, UdpSocket};
use tokio_rustls::TlsConnector;

use crate::dial_once::DialOnceGuard;
use crate::error::{JoinedErrors, NetworkError};
use crate::resolver::{Resolver, SystemResolver};

/// A hook letting the QA simulator redirect a dial at a synthetic address to
/// the real loopback socket that actually backs it, without the transports
/// above ever knowing the difference (§4.G: "B's dialer is replaced by G's
/// client stack").
pub type AddrTranslator = dyn Fn(Protocol, SocketAddr) -> SocketAddr + Send + Sync;

fn identity_translator() -> Arc<AddrTranslator> {
    Arc::new(|_protocol, addr| addr)
}

/// Bundles everything a DNS transport needs to reach a server: a dial
/// function, a TLS dial function, a resolver, a root CA pool, a clock, and an
/// event sink (§4.B). Cloning is cheap — every field is an `Arc`.
#[derive(Clone)]
pub struct Network {
    pub(crate) tcp_factory: Arc<dyn SocketFactory<TcpSocket>>,
    pub(crate) udp_factory: Arc<dyn SocketFactory<UdpSocket>>,
    pub(crate) tls_config: Arc<rustls::ClientConfig>,
    pub(crate) resolver: Arc<dyn Resolver>,
    pub(crate) translate: Arc<AddrTranslator>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) sink: SharedSink,
    pub(crate) dial_once: DialOnceGuard,
}

impl Network {
    /// A `Network` that dials the real host OS, trusting the public Web PKI —
    /// what every non-QA measurement uses.
    pub fn host() -> Self {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        Self::with_root_store(Arc::new(root_store))
    }

    pub fn with_root_store(root_store: Arc<rustls::RootCertStore>) -> Self {
        let mut tls_config = rustls::ClientConfig::builder()
            .with_root_certificates((*root_store).clone())
            .with_no_client_auth();
        tls_config.alpn_protocols = vec![b"dot".to_vec()];

        Self {
            tcp_factory: Arc::new(socket_factory::tcp),
            udp_factory: Arc::new(socket_factory::udp),
            tls_config: Arc::new(tls_config),
            resolver: Arc::new(SystemResolver),
            translate: identity_translator(),
            clock: system(),
            sink: rbmk_observe::null(),
            dial_once: DialOnceGuard::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_translator(mut self, translate: Arc<AddrTranslator>) -> Self {
        self.translate = translate;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Resolves `host` and returns the physical address a transport should
    /// actually connect to for `protocol`, applying the translator hook.
    pub async fn resolve_physical(
        &self,
        protocol: Protocol,
        host: &str,
        port: u16,
    ) -> Result<Vec<SocketAddr>, NetworkError> {
        let ips = self.resolver.lookup_host(host).await?;

        Ok(ips
            .into_iter()
            .map(|ip| (self.translate)(protocol, SocketAddr::new(ip, port)))
            .collect())
    }

    /// Dials a plain TCP connection to `host:port`, trying every resolved
    /// candidate in order and joining all failures (§4.B). Emits
    /// `connectStart`/`connectDone`.
    pub async fn dial_tcp(
        &self,
        protocol: Protocol,
        host: &str,
        port: u16,
    ) -> Result<TcpStream, NetworkError> {
        let logical = format!("{host}:{port}");
        let t0 = self.clock.now();
        self.sink.emit(
            Event::new(Msg::ConnectStart, t0)
                .with_server_addr(&logical)
                .with_protocol(WireProtocol::Tcp),
        );

        let candidates = match self.resolve_physical(protocol, host, port).await {
            Ok(candidates) => candidates,
            Err(e) => {
                self.emit_connect_done(t0, &logical, Some(e.to_string()));
                return Err(e);
            }
        };

        let mut errors = Vec::new();
        for addr in candidates {
            match self.try_connect_tcp(addr).await {
                Ok(stream) => {
                    self.sink.emit(
                        Event::new(Msg::ConnectDone, self.clock.now())
                            .with_t0(t0)
                            .with_server_addr(&logical)
                            .with_local_addr(
                                stream
                                    .local_addr()
                                    .map(|a| a.to_string())
                                    .unwrap_or_default(),
                            )
                            .with_remote_addr(addr)
                            .with_protocol(WireProtocol::Tcp),
                    );
                    return Ok(stream);
                }
                Err(e) => errors.push(e),
            }
        }

        let err = NetworkError::AllCandidatesFailed(JoinedErrors(errors));
        self.emit_connect_done(t0, &logical, Some(err.to_string()));
        Err(err)
    }

    async fn try_connect_tcp(&self, addr: SocketAddr) -> Result<TcpStream, std::io::Error> {
        let socket = self.tcp_factory.as_ref()(&addr)?;
        socket.connect(addr).await
    }

    fn emit_connect_done(&self, t0: time::OffsetDateTime, logical: &str, err: Option<String>) {
        let mut event = Event::new(Msg::ConnectDone, self.clock.now())
            .with_t0(t0)
            .with_server_addr(logical)
            .with_protocol(WireProtocol::Tcp);
        if let Some(e) = err {
            event = event.with_err(e, "IO");
        }
        self.sink.emit(event);
    }

    /// Wraps an established TCP stream in a TLS client session, deriving the
    /// server name from `host` (as `dialTLS` does per §4.B). Emits
    /// `tlsHandshakeStart`/`tlsHandshakeDone`.
    pub async fn dial_tls(
        &self,
        stream: TcpStream,
        host: &str,
        alpn: &[&str],
    ) -> Result<tokio_rustls::client::TlsStream<TcpStream>, NetworkError> {
        let t0 = self.clock.now();
        self.sink
            .emit(Event::new(Msg::TlsHandshakeStart, t0).with_server_addr(host));

        let mut config = (*self.tls_config).clone();
        config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();

        let server_name = rustls_pki_types::ServerName::try_from(host.to_owned())
            .map_err(|_| NetworkError::InvalidAddress(host.to_owned()))?;

        let connector = TlsConnector::from(Arc::new(config));
        let result = connector.connect(server_name, stream).await;

        let mut event = Event::new(Msg::TlsHandshakeDone, self.clock.now())
            .with_t0(t0)
            .with_server_addr(host);
        if let Err(e) = &result {
            event = event.with_err(e, "IO");
        }
        self.sink.emit(event);

        result.map_err(NetworkError::Tls)
    }

    /// Binds a local UDP socket and resolves the remote target (§4.D, UDP
    /// transport). Unlike TCP, a single candidate is used: UDP dialing is
    /// just a local bind, so there is nothing to "try" across resolved IPs
    /// beyond picking the first one. Emits `connectStart`/`connectDone` like
    /// every other dial path (§4.B).
    pub async fn dial_udp(
        &self,
        protocol: Protocol,
        host: &str,
        port: u16,
    ) -> Result<(UdpSocket, SocketAddr), NetworkError> {
        let logical = format!("{host}:{port}");
        let t0 = self.clock.now();
        self.sink.emit(
            Event::new(Msg::ConnectStart, t0)
                .with_server_addr(&logical)
                .with_protocol(WireProtocol::Udp),
        );

        match self.dial_udp_inner(protocol, host, port).await {
            Ok((socket, addr)) => {
                self.sink.emit(
                    Event::new(Msg::ConnectDone, self.clock.now())
                        .with_t0(t0)
                        .with_server_addr(&logical)
                        .with_local_addr(
                            socket
                                .local_addr()
                                .map(|a| a.to_string())
                                .unwrap_or_default(),
                        )
                        .with_remote_addr(addr)
                        .with_protocol(WireProtocol::Udp),
                );
                Ok((socket, addr))
            }
            Err(e) => {
                let mut event = Event::new(Msg::ConnectDone, self.clock.now())
                    .with_t0(t0)
                    .with_server_addr(&logical)
                    .with_protocol(WireProtocol::Udp);
                event = event.with_err(e.to_string(), "IO");
                self.sink.emit(event);
                Err(e)
            }
        }
    }

    async fn dial_udp_inner(
        &self,
        protocol: Protocol,
        host: &str,
        port: u16,
    ) -> Result<(UdpSocket, SocketAddr), NetworkError> {
        let candidates = self.resolve_physical(protocol, host, port).await?;
        let addr = *candidates
            .first()
            .ok_or_else(|| NetworkError::InvalidAddress(host.to_owned()))?;

        let bind_addr: SocketAddr = if addr.is_ipv4() {
            "0.0.0.0:0".parse().expect("valid socket address")
        } else {
            "[::]:0".parse().expect("valid socket address")
        };

        let socket = self
            .udp_factory
            .as_ref()(&bind_addr)
            .map_err(NetworkError::Io)?;

        Ok((socket, addr))
    }

    pub fn dial_once_guard(&self, key: impl Into<String>) -> Result<crate::dial_once::DialToken, NetworkError> {
        self.dial_once.guard(key)
    }

    /// Builds a `quinn` client config carrying this network's root CA pool
    /// and the `doq` ALPN (§4.D "DoQ": RFC 9250 requires ALPN `doq`).
    pub fn quic_client_config(&self) -> Result<quinn::ClientConfig, NetworkError> {
        let mut config = (*self.tls_config).clone();
        config.alpn_protocols = vec![b"doq".to_vec()];

        let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(config)
            .map_err(|e| NetworkError::Tls(std::io::Error::other(e)))?;

        Ok(quinn::ClientConfig::new(Arc::new(quic_crypto)))
    }
}
