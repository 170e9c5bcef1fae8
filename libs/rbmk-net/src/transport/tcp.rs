use dns_wire::{Protocol, Query, Response};
use futures::future::BoxFuture;
use rbmk_observe::{Event, Msg, WireProtocol};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::NetworkError;
use crate::network::Network;
use crate::transport::Exchange;

/// Shared implementation for the length-prefixed stream transports — plain
/// TCP and DNS-over-TLS — since the only difference between them is whether
/// the dialed connection is wrapped in a TLS session (§4.D "TCP and DoT").
///
/// One query per connection; connections are never pooled.
pub struct StreamTransport {
    network: Network,
    host: String,
    port: u16,
    tls: bool,
}

impl StreamTransport {
    pub fn tcp(network: Network, host: impl Into<String>, port: u16) -> Self {
        Self {
            network,
            host: host.into(),
            port,
            tls: false,
        }
    }

    pub fn dot(network: Network, host: impl Into<String>, port: u16) -> Self {
        Self {
            network,
            host: host.into(),
            port,
            tls: true,
        }
    }

    fn protocol(&self) -> Protocol {
        if self.tls {
            Protocol::Dot
        } else {
            Protocol::Tcp
        }
    }
}

impl Exchange for StreamTransport {
    fn exchange<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<Response, NetworkError>> {
        Box::pin(async move {
            let protocol = self.protocol();
            let tcp = self.network.dial_tcp(protocol, &self.host, self.port).await?;

            let t0 = self.network.clock().now();

            let response = if self.tls {
                let tls = self.network.dial_tls(tcp, &self.host, &["dot"]).await?;
                self.run_exchange(tls, query, t0).await?
            } else {
                self.run_exchange(tcp, query, t0).await?
            };

            Ok(response)
        })
    }
}

impl StreamTransport {
    async fn run_exchange<S>(
        &self,
        mut stream: S,
        query: &Query,
        t0: time::OffsetDateTime,
    ) -> Result<Response, NetworkError>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let protocol = self.protocol();
        let wire = query.as_bytes();
        if wire.len() > dns_wire::MAX_STREAM_MESSAGE_LEN {
            return Err(NetworkError::Codec(dns_wire::Error::TooLarge));
        }

        self.network.sink().emit(
            Event::new(Msg::DnsQuery, t0)
                .with_server_addr(format!("{}:{}", self.host, self.port))
                .with_protocol(WireProtocol::Tcp)
                .with_dns_raw_query(wire),
        );

        let mut framed = Vec::with_capacity(2 + wire.len());
        framed.extend_from_slice(&(wire.len() as u16).to_be_bytes());
        framed.extend_from_slice(wire);

        self.network.sink().emit(Event::new(Msg::WriteStart, self.network.clock().now()));
        stream.write_all(&framed).await.map_err(NetworkError::Io)?;
        self.network.sink().emit(
            Event::new(Msg::WriteDone, self.network.clock().now()).with_num_bytes(framed.len()),
        );

        self.network.sink().emit(Event::new(Msg::ReadStart, self.network.clock().now()));
        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await.map_err(NetworkError::Io)?;
        let len = u16::from_be_bytes(len_buf) as usize;

        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.map_err(NetworkError::Io)?;
        self.network.sink().emit(
            Event::new(Msg::ReadDone, self.network.clock().now()).with_num_bytes(2 + len),
        );

        let response = Response::parse(&body)?;

        self.network.sink().emit(
            Event::new(Msg::DnsResponse, self.network.clock().now())
                .with_t0(t0)
                .with_server_addr(format!("{}:{}", self.host, self.port))
                .with_protocol(WireProtocol::Tcp)
                .with_dns_raw_response(&body),
        );

        dns_wire::validate_response(query, &response, protocol)
            .map_err(NetworkError::InvalidResponse)?;

        self.network
            .sink()
            .emit(Event::new(Msg::CloseStart, self.network.clock().now()));
        let _ = stream.shutdown().await;
        self.network
            .sink()
            .emit(Event::new(Msg::CloseDone, self.network.clock().now()));

        Ok(response)
    }
}
