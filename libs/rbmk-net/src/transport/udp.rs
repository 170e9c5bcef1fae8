use std::future::poll_fn;
use std::time::Duration;

use dns_wire::{Protocol, Query, Response};
use futures::future::BoxFuture;
use rbmk_observe::{Event, Msg, WireProtocol};
use socket_factory::DatagramOut;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::NetworkError;
use crate::network::Network;
use crate::transport::Exchange;

/// Read buffer sized for the default EDNS(0) payload; large enough for any
/// unextended response too (§4.D UDP: "sized by EDNS0 maxSize, default 512").
const DEFAULT_READ_BUFFER_LEN: usize = 4096;
/// How long a read may go idle before the duplicate collector gives up
/// waiting for a straggling forged answer, once at least one response has
/// arrived (§4.E point 3).
const IDLE_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// A single send-once, read-once UDP exchange (§4.D UDP). No retries; a
/// resolver layer above this one is responsible for trying other servers.
pub struct UdpTransport {
    network: Network,
    host: String,
    port: u16,
    max_udp_payload: u16,
}

impl UdpTransport {
    pub fn new(network: Network, host: impl Into<String>, port: u16, max_udp_payload: u16) -> Self {
        Self {
            network,
            host: host.into(),
            port,
            max_udp_payload,
        }
    }
}

impl Exchange for UdpTransport {
    fn exchange<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<Response, NetworkError>> {
        Box::pin(async move {
            let (mut socket, remote) = self
                .network
                .dial_udp(Protocol::Udp, &self.host, self.port)
                .await?;

            let t0 = self.network.clock().now();
            self.network.sink().emit(
                Event::new(Msg::DnsQuery, t0)
                    .with_server_addr(remote)
                    .with_protocol(WireProtocol::Udp)
                    .with_dns_raw_query(query.as_bytes()),
            );

            socket
                .send(DatagramOut {
                    src: None,
                    dst: remote,
                    packet: std::borrow::Cow::Borrowed(query.as_bytes()),
                    segment_size: None,
                })
                .map_err(NetworkError::Io)?;

            let mut buffer = vec![0u8; self.max_udp_payload.max(512) as usize];
            let datagram = poll_fn(|cx| socket.poll_recv_from(&mut buffer, cx))
                .await
                .map_err(NetworkError::Io)?
                .next()
                .ok_or_else(|| NetworkError::ServerMisbehaving("empty datagram batch".into()))?;

            let response = Response::parse(datagram.packet)?;

            self.network.sink().emit(
                Event::new(Msg::DnsResponse, self.network.clock().now())
                    .with_t0(t0)
                    .with_server_addr(remote)
                    .with_protocol(WireProtocol::Udp)
                    .with_dns_raw_response(datagram.packet),
            );

            dns_wire::validate_response(query, &response, Protocol::Udp)
                .map_err(NetworkError::InvalidResponse)?;

            Ok(response)
        })
    }
}

/// The result of running the duplicate collector (§4.E): the first valid
/// response (what the measurement reports), plus every response observed on
/// the wire, in arrival order, valid or not (what the structured log
/// records — this is what makes residual censorship visible).
pub struct ExchangeOutcome {
    pub response: Response,
    pub observed: Vec<Response>,
}

/// Collects every UDP response arriving within the read window instead of
/// stopping at the first one (§4.E).
///
/// A background task owns the socket's read half and forwards each raw
/// datagram over an unbounded channel; the consumer loop here races that
/// channel against an idle timeout, decoding and validating as responses
/// arrive, so a forged answer that shows up before the legitimate one
/// doesn't stop the collector early.
pub struct DuplicateCollector {
    network: Network,
    host: String,
    port: u16,
    max_udp_payload: u16,
}

impl DuplicateCollector {
    pub fn new(network: Network, host: impl Into<String>, port: u16, max_udp_payload: u16) -> Self {
        Self {
            network,
            host: host.into(),
            port,
            max_udp_payload,
        }
    }

    pub async fn run(&self, query: &Query) -> Result<ExchangeOutcome, NetworkError> {
        let (mut socket, remote) = self
            .network
            .dial_udp(Protocol::Udp, &self.host, self.port)
            .await?;

        let t0 = self.network.clock().now();
        self.network.sink().emit(
            Event::new(Msg::DnsQuery, t0)
                .with_server_addr(remote)
                .with_protocol(WireProtocol::Udp)
                .with_dns_raw_query(query.as_bytes()),
        );

        socket
            .send(DatagramOut {
                src: None,
                dst: remote,
                packet: std::borrow::Cow::Borrowed(query.as_bytes()),
                segment_size: None,
            })
            .map_err(NetworkError::Io)?;

        let stop = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let reader_stop = stop.clone();
        let buffer_len = self.max_udp_payload.max(512) as usize;
        let reader = tokio::spawn(async move {
            let mut buffer = vec![0u8; buffer_len];

            loop {
                let recv = poll_fn(|cx| socket.poll_recv_from(&mut buffer, cx));

                let datagrams = tokio::select! {
                    _ = reader_stop.cancelled() => break,
                    result = recv => match result {
                        Ok(datagrams) => datagrams
                            .map(|d| d.packet.to_vec())
                            .collect::<Vec<_>>(),
                        Err(_) => break,
                    },
                };

                for raw in datagrams {
                    if tx.send(raw).is_err() {
                        return;
                    }
                }
            }
        });

        let mut observed = Vec::new();
        let mut first_valid = None;

        loop {
            let next = tokio::time::timeout(IDLE_READ_TIMEOUT, rx.recv()).await;

            let raw = match next {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(_) if !observed.is_empty() => break,
                Err(_) => {
                    stop.cancel();
                    let _ = reader.await;
                    return Err(NetworkError::Timeout);
                }
            };

            let Ok(response) = Response::parse(&raw) else {
                continue;
            };

            self.network.sink().emit(
                Event::new(Msg::DnsResponse, self.network.clock().now())
                    .with_t0(t0)
                    .with_server_addr(remote)
                    .with_protocol(WireProtocol::Udp)
                    .with_dns_raw_response(&raw),
            );

            let is_valid = dns_wire::validate_response(query, &response, Protocol::Udp).is_ok();
            observed.push(response.clone());

            if is_valid && first_valid.is_none() {
                first_valid = Some(response);
            }
        }

        stop.cancel();
        let _ = reader.await;

        first_valid
            .map(|response| ExchangeOutcome { response, observed })
            .ok_or_else(|| {
                NetworkError::ServerMisbehaving(format!(
                    "no valid response among {} received",
                    observed.len()
                ))
            })
    }
}
