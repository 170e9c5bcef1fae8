//! The concrete scenarios (§8): one `rbmk dig`-style argument vector each,
//! optionally paired with a [`crate::scenario::Editor`] that mutates the
//! simulator before the measurement runs, plus the golden event sequence and
//! error expectation the runner checks the outcome against.

use std::net::IpAddr;
use std::sync::{Arc, Weak};

use dns_wire::{records, Query, ResponseBuilder, ResponseCode};

use crate::scenario::{Editor, Scenario, SeqItem};
use rbmk_observe::Msg;
use rbmk_sim::{Frame, FrameProtocol, Router, Simulator};

const MAX_FORGED_REPLY_LEN: usize = 4096;

/// Installs a filter that, on every UDP query for `domain`, forges a NOERROR
/// response carrying `forged_ip` and injects it alongside whatever the real
/// responder eventually sends — the "DNS-like-Iran" censor from §8's
/// `dnsOverUdpCensorship` scenario.
///
/// Captures a [`Weak<Router>`] rather than the simulator's own `Arc<Router>`
/// so the filter closure doesn't keep the router it's installed on alive
/// forever (mirrors `rbmk-sim`'s own `filter_can_inject_a_forged_frame_alongside_the_original` test).
pub fn censor_like_iran_for(domain: &str, forged_ip: IpAddr) -> Editor {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();

    Arc::new(move |simulator: &Simulator| {
        let for_filter: Weak<Router> = Arc::downgrade(simulator.router());
        let domain = domain.clone();

        simulator.router().install_filter(Arc::new(move |frame: &mut Frame| {
            if frame.protocol != FrameProtocol::Udp {
                return false;
            }

            let Ok(query) = Query::parse(&frame.payload) else {
                return false;
            };

            if query.domain().to_string().trim_end_matches('.').to_ascii_lowercase() != domain {
                return false;
            }

            let Some(router) = for_filter.upgrade() else {
                return false;
            };

            let response = ResponseBuilder::for_query(&query, ResponseCode::NOERROR)
                .with_records([(query.domain(), 60, records::ip(forged_ip))])
                .build();

            router.inject(Frame::new(
                frame.dst,
                frame.src,
                FrameProtocol::Udp,
                response.into_bytes(MAX_FORGED_REPLY_LEN),
            ));

            false
        }));
    })
}

fn udp_like_sequence(head: &[SeqItem]) -> Vec<SeqItem> {
    let mut seq = vec![SeqItem::Exact(Msg::ConnectStart), SeqItem::Exact(Msg::ConnectDone)];
    seq.extend_from_slice(head);
    seq
}

/// `rbmk dig +noall +logs @8.8.4.4 A www.example.com` over plain UDP.
pub fn dns_over_udp_success() -> Scenario {
    let seq = udp_like_sequence(&[
        SeqItem::Exact(Msg::DnsQuery),
        SeqItem::Wildcard,
        SeqItem::Exact(Msg::DnsResponse),
        SeqItem::Wildcard,
    ]);

    Scenario::new(
        "dnsOverUdpSuccess",
        &["+noall", "+logs", "@8.8.4.4", "A", "www.example.com"],
        seq,
    )
}

/// Same argv as [`dns_over_udp_success`], but a censor forges the A answer
/// for `www.example.com` before the real `dns.google` reply can arrive — the
/// event skeleton is unchanged, only the resolved address differs.
pub fn dns_over_udp_censorship(forged_ip: IpAddr) -> Scenario {
    let seq = udp_like_sequence(&[
        SeqItem::Exact(Msg::DnsQuery),
        SeqItem::Wildcard,
        SeqItem::Exact(Msg::DnsResponse),
        SeqItem::Wildcard,
    ]);

    Scenario::new(
        "dnsOverUdpCensorship",
        &["+noall", "+logs", "@8.8.4.4", "A", "www.example.com"],
        seq,
    )
    .with_editor(censor_like_iran_for("www.example.com", forged_ip))
}

/// `rbmk dig +noall +logs +tcp @8.8.4.4 A www.example.com`.
pub fn dns_over_tcp_success() -> Scenario {
    let seq = udp_like_sequence(&[
        SeqItem::Exact(Msg::DnsQuery),
        SeqItem::Wildcard,
        SeqItem::Exact(Msg::DnsResponse),
        SeqItem::Wildcard,
    ]);

    Scenario::new(
        "dnsOverTcpSuccess",
        &["+noall", "+logs", "+tcp", "@8.8.4.4", "A", "www.example.com"],
        seq,
    )
}

/// `rbmk dig +noall +logs +tls @8.8.4.4 A www.example.com`: a TLS handshake
/// runs between the TCP connect and the query itself.
pub fn dns_over_tls_success() -> Scenario {
    let seq = udp_like_sequence(&[
        SeqItem::Exact(Msg::TlsHandshakeStart),
        SeqItem::Wildcard,
        SeqItem::Exact(Msg::TlsHandshakeDone),
        SeqItem::Exact(Msg::DnsQuery),
        SeqItem::Wildcard,
        SeqItem::Exact(Msg::DnsResponse),
        SeqItem::Wildcard,
    ]);

    Scenario::new(
        "dnsOverTlsSuccess",
        &["+noall", "+logs", "+tls", "@8.8.4.4", "A", "www.example.com"],
        seq,
    )
}

/// `rbmk dig +noall +logs +https @8.8.4.4 A www.example.com`: the query is
/// framed as one HTTP/2 round trip, itself wrapping its own connect/TLS pair.
pub fn dns_over_https_success() -> Scenario {
    let seq = vec![
        SeqItem::Exact(Msg::DnsQuery),
        SeqItem::Exact(Msg::HttpRoundTripStart),
        SeqItem::Exact(Msg::ConnectStart),
        SeqItem::Exact(Msg::ConnectDone),
        SeqItem::Exact(Msg::TlsHandshakeStart),
        SeqItem::Wildcard,
        SeqItem::Exact(Msg::TlsHandshakeDone),
        SeqItem::Wildcard,
        SeqItem::Exact(Msg::HttpRoundTripDone),
        SeqItem::Exact(Msg::DnsResponse),
        SeqItem::Wildcard,
    ];

    Scenario::new(
        "dnsOverHttpsSuccess",
        &["+noall", "+logs", "+https", "@8.8.4.4", "A", "www.example.com"],
        seq,
    )
}

/// Every scenario the registry knows about, in the order §8 lists them.
pub fn all(forged_ip: IpAddr) -> Vec<Scenario> {
    vec![
        dns_over_udp_success(),
        dns_over_udp_censorship(forged_ip),
        dns_over_tcp_success(),
        dns_over_tls_success(),
        dns_over_https_success(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lists_five_scenarios_in_spec_order() {
        let scenarios = all("10.0.0.1".parse().unwrap());
        let names: Vec<_> = scenarios.iter().map(|s| s.name).collect();

        assert_eq!(
            names,
            [
                "dnsOverUdpSuccess",
                "dnsOverUdpCensorship",
                "dnsOverTcpSuccess",
                "dnsOverTlsSuccess",
                "dnsOverHttpsSuccess",
            ]
        );
    }

    #[test]
    fn censorship_scenario_carries_exactly_one_editor() {
        let scenario = dns_over_udp_censorship("10.0.0.1".parse().unwrap());
        assert_eq!(scenario.editors.len(), 1);
    }
}
