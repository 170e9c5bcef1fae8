//! `rbmk`: a clap-derived entry point over the DNS measurement engine (§6).
//! Currently offers a single subcommand, `dig`, whose argument vector mirrors
//! `dig(1)` and is parsed by `rbmk_measure::dig_argv`.
#![allow(clippy::print_stdout, clippy::print_stderr, reason = "this binary's entire job is printing dig(1)-style output")]

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rbmk_measure::{dig_argv, DigArgvError, LogsTarget, MeasurementRequest, Writers};
use rbmk_net::Network;
use rbmk_observe::{JsonlSink, SharedSink, Sink, TeeSink};

const HELP: &str = "\
rbmk dig [flags] [@SERVER] NAME [TYPE] [+option ...]

Flags:
  -h, --help        Show this help and exit
      --logs FILE   Append structured events to FILE ('-' for stdout)
      --measure     Suppress the non-zero exit code on measurement failure

Options (each prefixed with '+'):
  +udp                   Use the UDP transport (default)
  +tcp                   Use the TCP transport
  +tls                   Use DNS-over-TLS (port 853)
  +https                 Use DNS-over-HTTPS (path /dns-query, port 443)
  +udp=wait-duplicates   Race the duplicate collector instead of one read
  +qr                    Print the query block
  +short                 Print the short RDATA form
  +short=ip              Print the short form, IP addresses only
  +logs                  Mirror structured logs to stdout
  +noall                 Suppress the default stdout writers

Recognized TYPE values: A, AAAA, CNAME, HTTPS, MX, NS.
";

#[derive(Parser)]
#[command(name = "rbmk", about = "Really Basic Measurement Kit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs one DNS measurement and prints dig(1)-style output.
    Dig {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::setup_global_subscriber(tracing_subscriber::layer::Identity::default()) {
        eprintln!("rbmk: failed to set up logging: {e:#}");
        return ExitCode::FAILURE;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    tracing::debug!(args = ?std::env::args().collect::<Vec<_>>(), "starting");

    match cli.command {
        Command::Dig { args } => runtime.block_on(run_dig(args)),
    }
}

async fn run_dig(args: Vec<String>) -> ExitCode {
    let invocation = match dig_argv::parse(&args) {
        Ok(invocation) => invocation,
        Err(DigArgvError::HelpRequested) => {
            print!("{HELP}");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("rbmk dig: {e}");
            eprintln!("Run `rbmk dig --help` for usage.");
            return ExitCode::FAILURE;
        }
    };

    let sink = match build_sink(&invocation.logs_target, invocation.mirror_logs) {
        Ok(sink) => sink,
        Err(e) => {
            eprintln!("rbmk dig: {e}");
            return ExitCode::FAILURE;
        }
    };

    let network = Network::host().with_sink(sink);

    match run_measurement(&network, &invocation.request, invocation.noall).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("rbmk dig: {e}");
            if e.is_io_or_usage_error() || !invocation.measure_flag {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
    }
}

async fn run_measurement(
    network: &Network,
    request: &MeasurementRequest,
    noall: bool,
) -> Result<(), rbmk_measure::MeasurementError> {
    let mut query_out: Box<dyn Write> = if request.print_query {
        Box::new(io::stdout())
    } else {
        Box::new(io::sink())
    };
    let mut response_out: Box<dyn Write> = if noall { Box::new(io::sink()) } else { Box::new(io::stdout()) };
    let mut short_out: Box<dyn Write> = if request.short_form.is_some() {
        Box::new(io::stdout())
    } else {
        Box::new(io::sink())
    };

    let mut writers = Writers {
        query: &mut *query_out,
        response: &mut *response_out,
        short: &mut *short_out,
    };

    rbmk_measure::measure(network, request, &mut writers).await?;

    Ok(())
}

fn build_sink(logs_target: &Option<LogsTarget>, mirror_logs: bool) -> anyhow::Result<SharedSink> {
    let sink: SharedSink = match (logs_target, mirror_logs) {
        (None, false) => rbmk_observe::null(),
        (None, true) | (Some(LogsTarget::Stdout), _) => Arc::new(JsonlSink::new(io::stdout())),
        (Some(LogsTarget::File(path)), false) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path}"))?;
            Arc::new(JsonlSink::new(file))
        }
        (Some(LogsTarget::File(path)), true) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path}"))?;
            Arc::new(TeeSink::new(JsonlSink::new(file), JsonlSink::new(io::stdout())))
        }
    };

    Ok(sink)
}
