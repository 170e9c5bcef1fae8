//! Backend service logic the simulator's stacks host behind a [`crate::stack::Stack`]'s
//! proxy (§4.G "Servers"): the DNS responder shared by `dns.google`'s four
//! transports, and the replaceable HTTP handler `www.example.com` serves.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use dns_wire::{records, Query, RecordType, Response, ResponseBuilder, ResponseCode};
use futures::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

use crate::addresses::Addresses;
use crate::stack::{DatagramHandler, TcpHandler};

const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";
/// Plenty for every answer this simulator ever constructs; real truncation
/// behavior (§4.A EDNS0 `maxSize`) is exercised against `dns_wire` directly,
/// not re-derived here from the client's OPT record.
const MAX_UDP_REPLY_LEN: usize = 4096;

fn normalize(name: &str) -> String {
    let mut s = name.to_ascii_lowercase();
    if !s.ends_with('.') {
        s.push('.');
    }
    s
}

/// The simulator's "shared in-memory database" (§4.G): every transport
/// `dns.google` serves answers out of the same table, so a scenario sees
/// identical answers regardless of which protocol it measured over.
pub struct DnsDatabase {
    records: HashMap<(String, RecordType), Vec<dns_wire::OwnedRecordData>>,
    known_names: HashSet<String>,
}

impl DnsDatabase {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            known_names: HashSet::new(),
        }
    }

    /// The default topology's records: an A for `www.example.com` and one
    /// for `dns.google` itself, per §4.G's default address assignment.
    pub fn seeded(addresses: &Addresses) -> Self {
        let mut db = Self::new();
        db.insert_address("www.example.com", addresses.www_example_com);
        db.insert_address("dns.google", addresses.dns_google);
        db
    }

    pub fn insert_address(&mut self, name: &str, ip: IpAddr) {
        let rtype = match ip {
            IpAddr::V4(_) => RecordType::A,
            IpAddr::V6(_) => RecordType::Aaaa,
        };
        self.insert(name, rtype, records::ip(ip));
    }

    pub fn insert(&mut self, name: &str, rtype: RecordType, data: dns_wire::OwnedRecordData) {
        let key = normalize(name);
        self.known_names.insert(key.clone());
        self.records.entry((key, rtype)).or_default().push(data);
    }

    /// Builds the response a real DNS server would give for `query`: NXDOMAIN
    /// for a name this database doesn't host at all, NOERROR with an empty
    /// answer section ("no data", §4.F step 4) for a hosted name with
    /// nothing of the requested type, or NOERROR with the matching records.
    pub fn respond(&self, query: &Query) -> Response {
        let key = query.domain().to_string().to_ascii_lowercase();

        if !self.known_names.contains(&key) {
            return Response::nxdomain(query);
        }

        match self.records.get(&(key, query.qtype())) {
            Some(datas) if !datas.is_empty() => {
                let owner = query.domain();
                ResponseBuilder::for_query(query, ResponseCode::NOERROR)
                    .with_records(datas.iter().cloned().map(|d| (owner.clone(), 60u32, d)))
                    .build()
            }
            _ => Response::no_error(query),
        }
    }
}

impl Default for DnsDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the UDP datagram handler every plain-UDP DNS responder uses.
pub fn dns_udp_handler(db: Arc<DnsDatabase>) -> DatagramHandler {
    Arc::new(move |payload| {
        let db = db.clone();
        Box::pin(async move {
            let query = Query::parse(&payload).ok()?;
            let response = db.respond(&query);
            Some(response.into_bytes(MAX_UDP_REPLY_LEN))
        })
    })
}

/// Reads one length-prefixed query and writes one length-prefixed response,
/// then returns — matching the client transports' "one query per
/// connection; do not pool" contract (§4.D).
async fn serve_one_framed_exchange(stream: &mut (impl AsyncRead + AsyncWrite + Unpin), db: &DnsDatabase) {
    let mut len_buf = [0u8; 2];
    if stream.read_exact(&mut len_buf).await.is_err() {
        return;
    }
    let len = u16::from_be_bytes(len_buf) as usize;

    let mut body = vec![0u8; len];
    if stream.read_exact(&mut body).await.is_err() {
        return;
    }

    let Ok(query) = Query::parse(&body) else { return };
    let response = db.respond(&query);
    let bytes = response.into_bytes(dns_wire::MAX_STREAM_MESSAGE_LEN);

    let mut framed = Vec::with_capacity(2 + bytes.len());
    framed.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    framed.extend_from_slice(&bytes);

    let _ = stream.write_all(&framed).await;
    let _ = stream.shutdown().await;
}

/// Plain DNS/TCP backend: no TLS, otherwise identical framing to DoT.
pub fn dns_tcp_handler(db: Arc<DnsDatabase>) -> TcpHandler {
    Arc::new(move |mut stream| {
        let db = db.clone();
        Box::pin(async move {
            serve_one_framed_exchange(&mut stream, &db).await;
        })
    })
}

/// DNS-over-TLS backend: terminates TLS (ALPN `dot`) on the already-proxied
/// connection, then runs the same length-prefixed exchange as plain TCP.
pub fn dns_tls_handler(db: Arc<DnsDatabase>, acceptor: TlsAcceptor) -> TcpHandler {
    Arc::new(move |stream| {
        let db = db.clone();
        let acceptor = acceptor.clone();
        Box::pin(async move {
            let Ok(mut tls) = acceptor.accept(stream).await else { return };
            serve_one_framed_exchange(&mut tls, &db).await;
        })
    })
}

/// DNS-over-HTTPS backend (RFC 8484): terminates TLS (ALPN `h2`), then runs
/// an HTTP/2 server that answers POST `/dns-query` requests carrying
/// `content-type: application/dns-message`.
pub fn doh_handler(db: Arc<DnsDatabase>, acceptor: TlsAcceptor) -> TcpHandler {
    Arc::new(move |stream| {
        let db = db.clone();
        let acceptor = acceptor.clone();
        Box::pin(async move {
            let Ok(tls) = acceptor.accept(stream).await else { return };
            let io = TokioIo::new(tls);

            let service = service_fn(move |req: http::Request<Incoming>| {
                let db = db.clone();
                async move { Ok::<_, std::convert::Infallible>(answer_doh_request(req, &db).await) }
            });

            let _ = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await;
        })
    })
}

async fn answer_doh_request(
    req: http::Request<Incoming>,
    db: &DnsDatabase,
) -> http::Response<Full<Bytes>> {
    let is_dns_message = req
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        == Some(DNS_MESSAGE_CONTENT_TYPE);

    if req.method() != http::Method::POST || !is_dns_message {
        return http::Response::builder()
            .status(http::StatusCode::BAD_REQUEST)
            .body(Full::new(Bytes::new()))
            .expect("valid response");
    }

    let Ok(body) = req.into_body().collect().await else {
        return http::Response::builder()
            .status(http::StatusCode::BAD_REQUEST)
            .body(Full::new(Bytes::new()))
            .expect("valid response");
    };

    let Ok(query) = Query::parse(&body.to_bytes()) else {
        return http::Response::builder()
            .status(http::StatusCode::BAD_REQUEST)
            .body(Full::new(Bytes::new()))
            .expect("valid response");
    };

    let response = db.respond(&query).into_bytes(MAX_UDP_REPLY_LEN);

    http::Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)
        .body(Full::new(Bytes::from(response)))
        .expect("valid response")
}

/// A handler for `www.example.com`'s HTTP/HTTPS servers (§4.G: "a
/// replaceable handler").
pub type HttpHandler = Arc<dyn Fn(http::Request<Bytes>) -> BoxFuture<'static, http::Response<Bytes>> + Send + Sync>;

pub fn default_http_handler() -> HttpHandler {
    Arc::new(|_req| {
        Box::pin(async {
            http::Response::builder()
                .status(http::StatusCode::OK)
                .header(http::header::CONTENT_TYPE, "text/plain")
                .body(Bytes::from_static(b"hello from rbmk-sim\n"))
                .expect("valid response")
        })
    })
}

/// A swappable slot holding the current [`HttpHandler`] — what makes it
/// "replaceable" at runtime, the way a scenario editor would install a
/// different one for one subtest.
#[derive(Clone)]
pub struct HttpHandlerSlot(Arc<Mutex<HttpHandler>>);

impl HttpHandlerSlot {
    pub fn new(initial: HttpHandler) -> Self {
        Self(Arc::new(Mutex::new(initial)))
    }

    pub fn install(&self, handler: HttpHandler) {
        *self.0.lock() = handler;
    }

    pub fn get(&self) -> HttpHandler {
        self.0.lock().clone()
    }
}

async fn run_http_body(req: http::Request<Incoming>, slot: &HttpHandlerSlot) -> http::Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let bytes = body.collect().await.map(|b| b.to_bytes()).unwrap_or_default();
    let request = http::Request::from_parts(parts, bytes);

    let handler = slot.get();
    let response = handler(request).await;
    let (parts, body) = response.into_parts();

    http::Response::from_parts(parts, Full::new(body))
}

/// Plain-HTTP backend for `www.example.com`.
pub fn http_handler(slot: HttpHandlerSlot) -> TcpHandler {
    Arc::new(move |stream| {
        let slot = slot.clone();
        Box::pin(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let slot = slot.clone();
                async move { Ok::<_, std::convert::Infallible>(run_http_body(req, &slot).await) }
            });

            let _ = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .await;
        })
    })
}

/// TLS-terminating HTTPS backend for `www.example.com` (ALPN `http/1.1`).
pub fn https_handler(slot: HttpHandlerSlot, acceptor: TlsAcceptor) -> TcpHandler {
    Arc::new(move |stream: TcpStream| {
        let slot = slot.clone();
        let acceptor = acceptor.clone();
        Box::pin(async move {
            let Ok(tls) = acceptor.accept(stream).await else { return };
            let io = TokioIo::new(tls);
            let service = service_fn(move |req| {
                let slot = slot.clone();
                async move { Ok::<_, std::convert::Infallible>(run_http_body(req, &slot).await) }
            });

            let _ = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .await;
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responds_no_error_for_hosted_name_with_matching_record() {
        let db = DnsDatabase::seeded(&Addresses::default());
        let query = Query::new("www.example.com", RecordType::A, dns_wire::Protocol::Udp, &[]).unwrap();

        let response = db.respond(&query);

        assert_eq!(response.response_code(), ResponseCode::NOERROR);
        assert_eq!(response.records().count(), 1);
    }

    #[test]
    fn nxdomain_for_names_the_database_does_not_host() {
        let db = DnsDatabase::seeded(&Addresses::default());
        let query = Query::new("nonexistent.example.", RecordType::A, dns_wire::Protocol::Udp, &[]).unwrap();

        assert_eq!(db.respond(&query).response_code(), ResponseCode::NXDOMAIN);
    }

    #[test]
    fn no_data_for_hosted_name_missing_the_requested_type() {
        let db = DnsDatabase::seeded(&Addresses::default());
        let query = Query::new("www.example.com", RecordType::Aaaa, dns_wire::Protocol::Udp, &[]).unwrap();

        let response = db.respond(&query);
        assert_eq!(response.response_code(), ResponseCode::NOERROR);
        assert!(response.is_no_data(&query));
    }

    #[test]
    fn insert_address_picks_record_type_from_ip_family() {
        let mut db = DnsDatabase::new();
        db.insert_address("v6.example.", IpAddr::V6(std::net::Ipv6Addr::LOCALHOST));

        let query = Query::new("v6.example.", RecordType::Aaaa, dns_wire::Protocol::Udp, &[]).unwrap();
        assert_eq!(db.respond(&query).response_code(), ResponseCode::NOERROR);
    }
}
