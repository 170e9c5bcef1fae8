use std::net::SocketAddr;

use bytes::Bytes;
use dns_wire::{Protocol, Query, Response};
use futures::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::{TokioExecutor, TokioIo};
use rbmk_observe::{Event, Msg};

use crate::error::NetworkError;
use crate::network::Network;
use crate::transport::Exchange;

const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

/// DNS-over-HTTPS transport (§4.D "DoH", RFC 8484): POSTs the raw wire query
/// to the configured URL over HTTP/2 with `content-type:
/// application/dns-message` and requires the same content type back.
///
/// Reuses `Network::dial_tcp`/`dial_tls` rather than `http-client`'s own
/// dialer, so the `connectStart`/`connectDone`/`tlsHandshakeStart`/
/// `tlsHandshakeDone` events nest inside `httpRoundTripStart`/
/// `httpRoundTripDone` exactly as §8's `dnsOverHttpsSuccess` skeleton
/// requires; the HTTP/2 handshake itself (`hyper::client::conn::http2`) is
/// the same machinery `http-client` uses for its own POST.
pub struct DohTransport {
    network: Network,
    url: url::Url,
    max_response_len: usize,
}

impl DohTransport {
    pub fn new(network: Network, url: url::Url, max_response_len: usize) -> Self {
        Self {
            network,
            url,
            max_response_len,
        }
    }
}

impl Exchange for DohTransport {
    fn exchange<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<Response, NetworkError>> {
        Box::pin(async move { self.run(query).await })
    }
}

impl DohTransport {
    async fn run(&self, query: &Query) -> Result<Response, NetworkError> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| NetworkError::InvalidAddress(self.url.to_string()))?
            .to_owned();
        let port = self.url.port_or_known_default().unwrap_or(443);

        let t0 = self.network.clock().now();
        self.network.sink().emit(
            Event::new(Msg::DnsQuery, t0)
                .with_server_addr(self.url.as_str())
                .with_dns_raw_query(query.as_bytes()),
        );

        let rt_start = self.network.clock().now();
        self.network
            .sink()
            .emit(Event::new(Msg::HttpRoundTripStart, rt_start));

        let result = self.round_trip(&host, port, query).await;

        let mut done = Event::new(Msg::HttpRoundTripDone, self.network.clock().now()).with_t0(rt_start);
        if let Err(e) = &result {
            done = done.with_err(e, e.class());
        }
        self.network.sink().emit(done);

        let (body, local, remote) = result?;

        let response = Response::parse(&body)?;

        self.network.sink().emit({
            let mut event = Event::new(Msg::DnsResponse, self.network.clock().now())
                .with_t0(t0)
                .with_server_addr(self.url.as_str())
                .with_dns_raw_response(&body);
            if let Some(local) = local {
                event = event.with_local_addr(local);
            }
            if let Some(remote) = remote {
                event = event.with_remote_addr(remote);
            }
            event
        });

        dns_wire::validate_response(query, &response, Protocol::Doh)
            .map_err(NetworkError::InvalidResponse)?;

        Ok(response)
    }

    async fn round_trip(
        &self,
        host: &str,
        port: u16,
        query: &Query,
    ) -> Result<(Vec<u8>, Option<SocketAddr>, Option<SocketAddr>), NetworkError> {
        let tcp = self.network.dial_tcp(Protocol::Doh, host, port).await?;
        let local = tcp.local_addr().ok();
        let remote = tcp.peer_addr().ok();

        let tls = self.network.dial_tls(tcp, host, &["h2"]).await?;

        let (mut sender, conn) = hyper::client::conn::http2::Builder::new(TokioExecutor::new())
            .handshake(TokioIo::new(tls))
            .await
            .map_err(|e| NetworkError::ServerMisbehaving(format!("HTTP/2 handshake failed: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "DoH HTTP/2 connection ended");
            }
        });

        let request = http::Request::builder()
            .method(http::Method::POST)
            .uri(self.url.as_str())
            .header(http::header::CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)
            .body(Full::new(Bytes::copy_from_slice(query.as_bytes())))
            .map_err(|e| NetworkError::ServerMisbehaving(e.to_string()))?;

        sender
            .ready()
            .await
            .map_err(|e| NetworkError::Io(std::io::Error::other(e)))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| NetworkError::Io(std::io::Error::other(e)))?;

        let status = response.status();
        // Case-insensitive only on the header *name*; the value is compared exactly (§4.D).
        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        if status != http::StatusCode::OK {
            return Err(NetworkError::ServerMisbehaving(format!(
                "unexpected HTTP status {status}"
            )));
        }
        if content_type.as_deref() != Some(DNS_MESSAGE_CONTENT_TYPE) {
            return Err(NetworkError::ServerMisbehaving(format!(
                "unexpected content-type {content_type:?}"
            )));
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| NetworkError::Io(std::io::Error::other(e)))?
            .to_bytes();

        if body.len() > self.max_response_len {
            return Err(NetworkError::ServerMisbehaving(format!(
                "response body of {} bytes exceeds EDNS0 max size {}",
                body.len(),
                self.max_response_len
            )));
        }

        Ok((body.to_vec(), local, remote))
    }
}
