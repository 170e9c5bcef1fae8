//! The measurement task (§4.F): build a query, drive exactly one exchange
//! over the transport the caller's [`ServerAddr`] names, render `dig`-style
//! output, and map the outcome to the abstract error taxonomy (§7).

pub mod dig_argv;
mod error;
pub mod render;

use std::io::Write;
use std::time::Duration;

use dns_wire::{Edns0, Protocol, Query, QueryOption, RecordType, Response};
use rbmk_net::transport::{DohTransport, DoqTransport, DuplicateCollector, Exchange, StreamTransport, UdpTransport};
use rbmk_net::{Network, ServerAddr};

pub use dig_argv::{DigArgvError, DigInvocation, LogsTarget};
pub use error::{classify_response, MeasurementError};
pub use render::ShortForm;

/// Default overall deadline for one measurement (§4.F step 1).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the measurement task needs to run one exchange (§4.F inputs).
#[derive(Debug, Clone)]
pub struct MeasurementRequest {
    pub name: String,
    pub rtype: RecordType,
    pub server: ServerAddr,
    pub edns0: Option<Edns0>,
    /// UDP only: race the duplicate collector instead of a single read (§4.E).
    pub wait_duplicates: bool,
    pub timeout: Duration,
    /// Whether to render the query block at all (`+qr`).
    pub print_query: bool,
    /// `None` suppresses short-form output entirely.
    pub short_form: Option<ShortForm>,
}

impl MeasurementRequest {
    pub fn new(name: impl Into<String>, rtype: RecordType, server: ServerAddr) -> Self {
        Self {
            name: name.into(),
            rtype,
            server,
            edns0: Some(Edns0::default()),
            wait_duplicates: false,
            timeout: DEFAULT_TIMEOUT,
            print_query: false,
            short_form: None,
        }
    }
}

/// The three independent output streams §4.F step 3 renders into. Point any
/// of them at `io::sink()` to suppress that block.
pub struct Writers<'a> {
    pub query: &'a mut dyn Write,
    pub response: &'a mut dyn Write,
    pub short: &'a mut dyn Write,
}

/// The successfully-decoded, wire-validated response of one measurement.
///
/// A `NoName`/`NoData`/`ServerMisbehaving`/`ServerTemporarilyMisbehaving`
/// classification is still reported as an `Err` even though the response
/// itself was rendered — `dig` prints an NXDOMAIN answer and still exits
/// non-zero for it, and this mirrors that.
#[derive(Debug)]
pub struct Outcome {
    pub response: Response,
}

/// Runs one measurement end to end: builds the query, dispatches to the
/// transport named by `request.server.protocol`, renders whatever was
/// received, then classifies the result.
pub async fn measure(
    network: &Network,
    request: &MeasurementRequest,
    writers: &mut Writers<'_>,
) -> Result<Outcome, MeasurementError> {
    tokio::time::timeout(request.timeout, run(network, request, writers))
        .await
        .unwrap_or(Err(MeasurementError::Timeout))
}

async fn run(
    network: &Network,
    request: &MeasurementRequest,
    writers: &mut Writers<'_>,
) -> Result<Outcome, MeasurementError> {
    let protocol = request.server.protocol;

    let mut options = Vec::new();
    if let Some(edns0) = request.edns0 {
        options.push(QueryOption::Edns0(edns0));
    }

    let query = Query::new(&request.name, request.rtype, protocol, &options)?;

    if request.print_query {
        render::query_block(writers.query, &query).map_err(io_err)?;
    }

    let response = exchange(network, request, &query).await?;

    render::response_block(writers.response, &response).map_err(io_err)?;
    if let Some(form) = request.short_form {
        render::short_block(writers.short, &query, &response, form).map_err(io_err)?;
    }

    classify_response(&response, &query)?;

    Ok(Outcome { response })
}

async fn exchange(
    network: &Network,
    request: &MeasurementRequest,
    query: &Query,
) -> Result<Response, MeasurementError> {
    let max_udp_payload = request
        .edns0
        .map(|e| e.max_udp_payload)
        .unwrap_or(dns_wire::DEFAULT_UDP_PAYLOAD_SIZE);

    match request.server.protocol {
        Protocol::Udp => {
            let (host, port) = request.server.host_port()?;

            if request.wait_duplicates {
                let collector = DuplicateCollector::new(network.clone(), host, port, max_udp_payload);
                Ok(collector.run(query).await?.response)
            } else {
                let transport = UdpTransport::new(network.clone(), host, port, max_udp_payload);
                Ok(transport.exchange(query).await?)
            }
        }
        Protocol::Tcp => {
            let (host, port) = request.server.host_port()?;
            let transport = StreamTransport::tcp(network.clone(), host, port);
            Ok(transport.exchange(query).await?)
        }
        Protocol::Dot => {
            let (host, port) = request.server.host_port()?;
            let transport = StreamTransport::dot(network.clone(), host, port);
            Ok(transport.exchange(query).await?)
        }
        Protocol::Doh => {
            let url = request.server.doh_url()?;
            let transport = DohTransport::new(network.clone(), url, max_udp_payload as usize);
            Ok(transport.exchange(query).await?)
        }
        Protocol::Doq => {
            let (host, port) = request.server.host_port()?;
            let transport = DoqTransport::new(network.clone(), host, port);
            Ok(transport.exchange(query).await?)
        }
    }
}

fn io_err(e: std::io::Error) -> MeasurementError {
    MeasurementError::Network(rbmk_net::NetworkError::Io(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns_wire::records;
    use rbmk_observe::{MemorySink, Msg};
    use std::io::Cursor;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn measures_a_successful_udp_exchange_against_a_local_responder() {
        let server = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            let query = Query::parse(&buf[..len]).unwrap();
            let response = dns_wire::ResponseBuilder::for_query(&query, dns_wire::ResponseCode::NOERROR)
                .with_records([(query.domain(), 60, records::a(Ipv4Addr::new(1, 2, 3, 4)))])
                .build();
            server.send_to(&response.into_bytes(512), from).await.unwrap();
        });

        let sink = MemorySink::new();
        let network = Network::host().with_sink(std::sync::Arc::new(sink.clone()));

        let request = MeasurementRequest::new(
            "example.com",
            RecordType::A,
            ServerAddr::new(Protocol::Udp, server_addr.to_string()),
        );

        let mut query_buf = Vec::new();
        let mut response_buf = Vec::new();
        let mut short_buf = Vec::new();
        let mut writers = Writers {
            query: &mut query_buf,
            response: &mut response_buf,
            short: &mut Cursor::new(&mut short_buf),
        };

        let outcome = measure(&network, &request, &mut writers).await.unwrap();

        assert_eq!(outcome.response.response_code(), dns_wire::ResponseCode::NOERROR);
        assert!(String::from_utf8(response_buf).unwrap().contains("1.2.3.4"));
        assert!(sink.events().iter().any(|e| e.msg == Msg::DnsResponse));
    }

    #[tokio::test]
    async fn nxdomain_is_reported_as_no_name_even_though_output_was_rendered() {
        let server = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            let query = Query::parse(&buf[..len]).unwrap();
            let response = Response::nxdomain(&query);
            server.send_to(&response.into_bytes(512), from).await.unwrap();
        });

        let network = Network::host();
        let request = MeasurementRequest::new(
            "nonexistent.example.",
            RecordType::A,
            ServerAddr::new(Protocol::Udp, server_addr.to_string()),
        );

        let mut query_buf = Vec::new();
        let mut response_buf = Vec::new();
        let mut short_buf = Vec::new();
        let mut writers = Writers {
            query: &mut query_buf,
            response: &mut response_buf,
            short: &mut short_buf,
        };

        let err = measure(&network, &request, &mut writers).await.unwrap_err();

        assert!(matches!(err, MeasurementError::NoName));
        assert!(!response_buf.is_empty());
    }

    #[tokio::test]
    async fn unreachable_server_times_out() {
        let network = Network::host();
        let mut request = MeasurementRequest::new(
            "example.com",
            RecordType::A,
            ServerAddr::new(Protocol::Udp, "203.0.113.1:53".to_owned()),
        );
        request.timeout = Duration::from_millis(50);

        let mut query_buf = Vec::new();
        let mut response_buf = Vec::new();
        let mut short_buf = Vec::new();
        let mut writers = Writers {
            query: &mut query_buf,
            response: &mut response_buf,
            short: &mut short_buf,
        };

        let err = measure(&network, &request, &mut writers).await.unwrap_err();

        assert!(matches!(err, MeasurementError::Timeout));
    }
}
