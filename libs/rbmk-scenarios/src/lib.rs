//! Scenario registry (§4.H): declarative censorship scenarios, each an
//! `rbmk dig`-style argument vector plus an optional simulator editor, run
//! against the QA topology from `rbmk-sim` and checked against a golden event
//! sequence with a greedy wildcard matcher.

pub mod matcher;
pub mod registry;
pub mod runner;
pub mod scenario;

pub use registry::{
    censor_like_iran_for, dns_over_https_success, dns_over_tcp_success, dns_over_tls_success,
    dns_over_udp_censorship, dns_over_udp_success,
};
pub use runner::{assert_matches, run, ScenarioOutcome};
pub use scenario::{Editor, Scenario, SeqItem};
