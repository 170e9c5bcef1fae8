use std::net::SocketAddr;

use dns_wire::{Protocol, Query, Response};
use futures::future::BoxFuture;
use quinn::Endpoint;
use rbmk_observe::{Event, Msg, WireProtocol};

use crate::error::NetworkError;
use crate::network::Network;
use crate::transport::Exchange;

/// DNS-over-QUIC transport (§4.D "DoQ", RFC 9250): one bidirectional stream
/// per query, framed exactly like TCP/DoT (2-byte big-endian length prefix),
/// FIN'd after the query is written (RFC 9250 §4.2 — some servers stall
/// without it), and the connection closed with error code 0x00 ("no error")
/// once the response has been read.
pub struct DoqTransport {
    network: Network,
    host: String,
    port: u16,
}

impl DoqTransport {
    pub fn new(network: Network, host: impl Into<String>, port: u16) -> Self {
        Self {
            network,
            host: host.into(),
            port,
        }
    }

    fn logical(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Exchange for DoqTransport {
    fn exchange<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<Response, NetworkError>> {
        Box::pin(async move { self.run(query).await })
    }
}

impl DoqTransport {
    async fn run(&self, query: &Query) -> Result<Response, NetworkError> {
        let candidates = self
            .network
            .resolve_physical(Protocol::Doq, &self.host, self.port)
            .await?;
        let remote = *candidates
            .first()
            .ok_or_else(|| NetworkError::InvalidAddress(self.host.clone()))?;

        let t0 = self.network.clock().now();
        self.network.sink().emit(
            Event::new(Msg::ConnectStart, t0)
                .with_server_addr(self.logical())
                .with_protocol(WireProtocol::Udp),
        );

        let result = self.exchange_inner(remote, query, t0).await;

        if let Err(e) = &result {
            self.network.sink().emit(
                Event::new(Msg::ConnectDone, self.network.clock().now())
                    .with_t0(t0)
                    .with_server_addr(self.logical())
                    .with_err(e, e.class()),
            );
        }

        result
    }

    async fn exchange_inner(
        &self,
        remote: SocketAddr,
        query: &Query,
        t0: time::OffsetDateTime,
    ) -> Result<Response, NetworkError> {
        let bind_addr: SocketAddr = if remote.is_ipv4() {
            "0.0.0.0:0".parse().expect("valid socket address")
        } else {
            "[::]:0".parse().expect("valid socket address")
        };

        let client_config = self.network.quic_client_config()?;

        let mut endpoint = Endpoint::client(bind_addr).map_err(NetworkError::Io)?;
        endpoint.set_default_client_config(client_config);

        let connecting = endpoint
            .connect(remote, &self.host)
            .map_err(|e| NetworkError::InvalidAddress(e.to_string()))?;

        let connection = connecting
            .await
            .map_err(|e| NetworkError::Io(std::io::Error::other(e)))?;

        self.network.sink().emit(
            Event::new(Msg::ConnectDone, self.network.clock().now())
                .with_t0(t0)
                .with_server_addr(self.logical())
                .with_remote_addr(remote)
                .with_protocol(WireProtocol::Udp),
        );

        let (mut send, mut recv) = connection
            .open_bi()
            .await
            .map_err(|e| NetworkError::Io(std::io::Error::other(e)))?;

        let wire = query.as_bytes();
        if wire.len() > dns_wire::MAX_STREAM_MESSAGE_LEN {
            return Err(NetworkError::Codec(dns_wire::Error::TooLarge));
        }

        self.network.sink().emit(
            Event::new(Msg::DnsQuery, t0)
                .with_server_addr(self.logical())
                .with_protocol(WireProtocol::Udp)
                .with_dns_raw_query(wire),
        );

        let mut framed = Vec::with_capacity(2 + wire.len());
        framed.extend_from_slice(&(wire.len() as u16).to_be_bytes());
        framed.extend_from_slice(wire);

        self.network
            .sink()
            .emit(Event::new(Msg::WriteStart, self.network.clock().now()));
        send.write_all(&framed)
            .await
            .map_err(|e| NetworkError::Io(std::io::Error::other(e)))?;
        send.finish()
            .map_err(|e| NetworkError::Io(std::io::Error::other(e)))?;
        self.network.sink().emit(
            Event::new(Msg::WriteDone, self.network.clock().now()).with_num_bytes(framed.len()),
        );

        self.network
            .sink()
            .emit(Event::new(Msg::ReadStart, self.network.clock().now()));
        let mut len_buf = [0u8; 2];
        recv.read_exact(&mut len_buf)
            .await
            .map_err(|e| NetworkError::Io(std::io::Error::other(e)))?;
        let len = u16::from_be_bytes(len_buf) as usize;

        let mut body = vec![0u8; len];
        recv.read_exact(&mut body)
            .await
            .map_err(|e| NetworkError::Io(std::io::Error::other(e)))?;
        self.network.sink().emit(
            Event::new(Msg::ReadDone, self.network.clock().now()).with_num_bytes(2 + len),
        );

        let response = Response::parse(&body)?;

        self.network.sink().emit(
            Event::new(Msg::DnsResponse, self.network.clock().now())
                .with_t0(t0)
                .with_server_addr(self.logical())
                .with_protocol(WireProtocol::Udp)
                .with_dns_raw_response(&body),
        );

        dns_wire::validate_response(query, &response, Protocol::Doq)
            .map_err(NetworkError::InvalidResponse)?;

        self.network
            .sink()
            .emit(Event::new(Msg::CloseStart, self.network.clock().now()));
        connection.close(quinn::VarInt::from_u32(0), b"no error");
        endpoint.wait_idle().await;
        self.network
            .sink()
            .emit(Event::new(Msg::CloseDone, self.network.clock().now()));

        Ok(response)
    }
}
