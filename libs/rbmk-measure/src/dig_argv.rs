//! Parses `rbmk dig`'s `dig(1)`-flavored argument vector (§6) into a
//! [`MeasurementRequest`] plus the handful of toggles that govern the CLI's
//! own output routing rather than the measurement itself.
//!
//! Lives here rather than in the `rbmk` binary so the scenario registry can
//! drive a measurement from the same `argv: Vec<String>` shape the spec's
//! concrete end-to-end scenarios are written against, without depending on
//! the binary crate.

use dns_wire::{Protocol, RecordType};
use rbmk_net::ServerAddr;

use crate::render::ShortForm;
use crate::MeasurementRequest;

#[derive(Debug, thiserror::Error)]
pub enum DigArgvError {
    #[error("-h/--help requested")]
    HelpRequested,
    #[error("missing query name")]
    MissingName,
    #[error("missing @server")]
    MissingServer,
    #[error("unrecognized type {0}; recognized: A, AAAA, CNAME, HTTPS, MX, NS")]
    UnknownType(String),
    #[error("--logs requires a file path or '-'")]
    MissingLogsValue,
    #[error("unrecognized option {0}")]
    UnknownOption(String),
    #[error("too many positional arguments starting at {0}")]
    TooManyArguments(String),
}

/// Where `--logs`/`+logs` route the structured event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogsTarget {
    Stdout,
    File(String),
}

/// The fully-parsed invocation: a [`MeasurementRequest`] ready for
/// [`crate::measure`], plus the output-routing flags that are the CLI's
/// concern rather than the measurement task's (§6).
#[derive(Debug, Clone)]
pub struct DigInvocation {
    pub request: MeasurementRequest,
    /// `--logs FILE`/`--logs -`: append structured events to a file, or mirror
    /// them to stdout.
    pub logs_target: Option<LogsTarget>,
    /// `+logs`: mirror structured logs to stdout in addition to `logs_target`.
    pub mirror_logs: bool,
    /// `--measure`: suppress the non-zero exit code on measurement failure.
    pub measure_flag: bool,
    /// `+noall`: suppress the default stdout writers (query/response blocks).
    pub noall: bool,
}

const RECOGNIZED_TYPES: &[&str] = &["A", "AAAA", "CNAME", "HTTPS", "MX", "NS"];

fn parse_rtype(raw: &str) -> Result<RecordType, DigArgvError> {
    let upper = raw.to_ascii_uppercase();
    if !RECOGNIZED_TYPES.contains(&upper.as_str()) {
        return Err(DigArgvError::UnknownType(raw.to_owned()));
    }

    match upper.as_str() {
        "A" => Ok(RecordType::A),
        "AAAA" => Ok(RecordType::Aaaa),
        "CNAME" => Ok(RecordType::Cname),
        "HTTPS" => Ok(RecordType::Https),
        "MX" => Ok(RecordType::Mx),
        "NS" => Ok(RecordType::Ns),
        _ => unreachable!("checked against RECOGNIZED_TYPES above"),
    }
}

fn build_server_addr(protocol: Protocol, token: &str) -> ServerAddr {
    if protocol == Protocol::Doh && !token.contains("://") {
        ServerAddr::new(protocol, format!("https://{token}/dns-query"))
    } else {
        ServerAddr::new(protocol, token.to_owned())
    }
}

/// Parses `argv` (the tokens after `rbmk dig`, not including that prefix).
pub fn parse(argv: &[String]) -> Result<DigInvocation, DigArgvError> {
    let mut server_token: Option<String> = None;
    let mut name: Option<String> = None;
    let mut rtype: Option<RecordType> = None;
    let mut protocol: Option<Protocol> = None;
    let mut wait_duplicates = false;
    let mut print_query = false;
    let mut short_form = None;
    let mut logs_target = None;
    let mut mirror_logs = false;
    let mut measure_flag = false;
    let mut noall = false;

    let mut i = 0;
    while i < argv.len() {
        let tok = argv[i].as_str();

        match tok {
            "-h" | "--help" => return Err(DigArgvError::HelpRequested),
            "--measure" => measure_flag = true,
            "--logs" => {
                i += 1;
                let value = argv.get(i).ok_or(DigArgvError::MissingLogsValue)?;
                logs_target = Some(if value == "-" {
                    LogsTarget::Stdout
                } else {
                    LogsTarget::File(value.clone())
                });
            }
            "+udp" => protocol = Some(Protocol::Udp),
            "+tcp" => protocol = Some(Protocol::Tcp),
            "+tls" => protocol = Some(Protocol::Dot),
            "+https" => protocol = Some(Protocol::Doh),
            "+udp=wait-duplicates" => {
                protocol = Some(Protocol::Udp);
                wait_duplicates = true;
            }
            "+qr" => print_query = true,
            "+short" => short_form = Some(ShortForm::Full),
            "+short=ip" => short_form = Some(ShortForm::IpOnly),
            "+logs" => mirror_logs = true,
            "+noall" => noall = true,
            t if t.starts_with('+') => return Err(DigArgvError::UnknownOption(t.to_owned())),
            t if t.starts_with('@') => server_token = Some(t[1..].to_owned()),
            t => {
                if name.is_none() {
                    name = Some(t.to_owned());
                } else if rtype.is_none() {
                    rtype = Some(parse_rtype(t)?);
                } else {
                    return Err(DigArgvError::TooManyArguments(t.to_owned()));
                }
            }
        }

        i += 1;
    }

    let name = name.ok_or(DigArgvError::MissingName)?;
    let server_token = server_token.ok_or(DigArgvError::MissingServer)?;
    let protocol = protocol.unwrap_or(Protocol::Udp);
    let server = build_server_addr(protocol, &server_token);

    let mut request = MeasurementRequest::new(name, rtype.unwrap_or(RecordType::A), server);
    request.wait_duplicates = wait_duplicates;
    request.print_query = print_query;
    request.short_form = short_form;

    Ok(DigInvocation {
        request,
        logs_target,
        mirror_logs,
        measure_flag,
        noall,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_the_default_udp_scenario_argv() {
        let invocation = parse(&argv(&["+noall", "+logs", "@8.8.4.4", "A", "www.example.com"])).unwrap();

        assert_eq!(invocation.request.server.protocol, Protocol::Udp);
        assert_eq!(invocation.request.server.address, "8.8.4.4");
        assert_eq!(invocation.request.name, "www.example.com");
        assert_eq!(invocation.request.rtype, RecordType::A);
        assert!(invocation.noall);
        assert!(invocation.mirror_logs);
    }

    #[test]
    fn plus_tls_selects_dot_protocol() {
        let invocation = parse(&argv(&["+noall", "+logs", "+tls", "@8.8.4.4", "A", "www.example.com"])).unwrap();

        assert_eq!(invocation.request.server.protocol, Protocol::Dot);
    }

    #[test]
    fn plus_https_builds_a_doh_query_url() {
        let invocation = parse(&argv(&["+https", "@8.8.4.4", "A", "www.example.com"])).unwrap();

        assert_eq!(invocation.request.server.protocol, Protocol::Doh);
        assert_eq!(invocation.request.server.address, "https://8.8.4.4/dns-query");
    }

    #[test]
    fn rejects_unknown_type() {
        let err = parse(&argv(&["@8.8.4.4", "www.example.com", "SOA"])).unwrap_err();

        assert!(matches!(err, DigArgvError::UnknownType(t) if t == "SOA"));
    }

    #[test]
    fn missing_server_is_a_usage_error() {
        let err = parse(&argv(&["www.example.com"])).unwrap_err();

        assert!(matches!(err, DigArgvError::MissingServer));
    }

    #[test]
    fn logs_dash_means_stdout() {
        let invocation = parse(&argv(&["--logs", "-", "@8.8.4.4", "www.example.com"])).unwrap();

        assert_eq!(invocation.logs_target, Some(LogsTarget::Stdout));
    }
}
