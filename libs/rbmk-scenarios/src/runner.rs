//! Runs one [`Scenario`] against a live [`Simulator`] and reports what
//! actually happened, for [`crate::matcher::matches`] to check against what
//! was expected (§8 property 6).

use std::io;

use dns_wire::Response;
use rbmk_measure::{dig_argv, MeasurementRequest, Writers};
use rbmk_observe::{Event, MemorySink, Sink};
use rbmk_sim::Simulator;

use crate::scenario::Scenario;

/// What a scenario run produced: the observed event stream, the measurement
/// error (if any, by its abstract §7 class), and the response it decoded
/// (even a classified-as-error one may still carry a response, e.g NXDOMAIN).
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub events: Vec<Event>,
    pub error_class: Option<&'static str>,
    pub response: Option<Response>,
}

/// Parses `scenario.argv`, applies its editors to `simulator`, then runs the
/// resulting measurement against the simulator's network with a
/// [`MemorySink`] attached, and collects everything the scenario's
/// `expectedSeq`/`expectedErr` need to be checked against.
pub async fn run(simulator: &Simulator, scenario: &Scenario) -> ScenarioOutcome {
    simulator.router().clear_filter();
    for editor in &scenario.editors {
        editor(simulator);
    }

    let sink = MemorySink::new();
    let network = simulator.network().with_sink(std::sync::Arc::new(sink.clone()));

    let invocation = match dig_argv::parse(&scenario.argv) {
        Ok(invocation) => invocation,
        Err(e) => {
            return ScenarioOutcome {
                events: sink.events(),
                error_class: Some(classify_argv_error(&e)),
                response: None,
            }
        }
    };

    let request: MeasurementRequest = invocation.request;

    let mut query_buf = io::sink();
    let mut response_buf = io::sink();
    let mut short_buf = io::sink();
    let mut writers = Writers {
        query: &mut query_buf,
        response: &mut response_buf,
        short: &mut short_buf,
    };

    match rbmk_measure::measure(&network, &request, &mut writers).await {
        Ok(outcome) => ScenarioOutcome {
            events: sink.events(),
            error_class: None,
            response: Some(outcome.response),
        },
        Err(e) => ScenarioOutcome {
            events: sink.events(),
            error_class: Some(e.class()),
            response: None,
        },
    }
}

fn classify_argv_error(e: &dig_argv::DigArgvError) -> &'static str {
    use dig_argv::DigArgvError::*;

    match e {
        HelpRequested => "HelpRequested",
        MissingName | MissingServer | UnknownType(_) | MissingLogsValue | UnknownOption(_)
        | TooManyArguments(_) => "InvalidQuery",
    }
}

/// Checks both halves of a scenario's expectation: the observed event stream
/// against `expected_seq` (via the greedy wildcard matcher), and the
/// observed error class (or its absence) against `expected_err`.
pub fn assert_matches(scenario: &Scenario, outcome: &ScenarioOutcome) -> bool {
    let err_matches = match (&scenario.expected_err, &outcome.error_class) {
        (None, None) => true,
        (Some(expected), Some(got)) => expected == got,
        _ => false,
    };

    err_matches && crate::matcher::matches(&scenario.expected_seq, &event_msgs(&outcome.events))
}

fn event_msgs(events: &[Event]) -> Vec<rbmk_observe::Msg> {
    events.iter().map(|e| e.msg).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;
    use std::net::IpAddr;

    async fn start_simulator() -> (Simulator, std::path::PathBuf) {
        let dir = known_dirs::qa_pki_cache_dir()
            .unwrap()
            .join(format!("scenarios-runner-test-{}", std::process::id()));
        let simulator = Simulator::start(&dir).await.unwrap();
        (simulator, dir)
    }

    #[tokio::test]
    async fn every_registered_scenario_matches_its_own_expectation() {
        let (simulator, dir) = start_simulator().await;
        let forged_ip: IpAddr = "198.51.100.7".parse().unwrap();

        for scenario in registry::all(forged_ip) {
            let outcome = run(&simulator, &scenario).await;
            assert!(
                assert_matches(&scenario, &outcome),
                "scenario {} did not match: events={:?} error_class={:?}",
                scenario.name,
                outcome.events.iter().map(|e| e.msg).collect::<Vec<_>>(),
                outcome.error_class,
            );
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn censorship_scenario_resolves_to_the_forged_address_not_the_real_one() {
        let (simulator, dir) = start_simulator().await;
        let forged_ip: IpAddr = "198.51.100.7".parse().unwrap();
        let scenario = registry::dns_over_udp_censorship(forged_ip);

        let outcome = run(&simulator, &scenario).await;

        let response = outcome.response.expect("censorship scenario still succeeds");
        let resolved: Vec<IpAddr> = response.records().filter_map(|r| dns_wire::record_addr(&r)).collect();

        assert_eq!(resolved, vec![forged_ip]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
