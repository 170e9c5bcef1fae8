use rbmk_net::error::NetworkError;

/// The abstract error taxonomy from §7, exhaustively mapped from either a
/// transport-level failure or a successfully-decoded response's RCODE.
///
/// Library code below this point (`dns-wire`, `rbmk-net`) returns its own
/// typed errors; this is the one place those get folded into the
/// spec's stable vocabulary, which is what the CLI boundary (the `rbmk`
/// binary) reports to the user and what decides the process exit status.
#[derive(Debug, thiserror::Error)]
pub enum MeasurementError {
    #[error("invalid query: {0}")]
    InvalidQuery(#[from] dns_wire::Error),
    #[error("invalid server address: {0}")]
    InvalidServerAddress(String),
    #[error("no such host")]
    NoName,
    #[error("no data")]
    NoData,
    #[error("server misbehaving")]
    ServerMisbehaving,
    #[error("server temporarily misbehaving")]
    ServerTemporarilyMisbehaving,
    #[error("measurement timed out")]
    Timeout,
    #[error(transparent)]
    Network(#[from] NetworkError),
}

impl MeasurementError {
    /// The abstract error-class string recorded in `errClass` when the CLI
    /// itself needs to report one (the transports already stamp their own
    /// I/O-level events with [`NetworkError::class`]).
    pub fn class(&self) -> &'static str {
        match self {
            MeasurementError::InvalidQuery(_) => "InvalidQuery",
            MeasurementError::InvalidServerAddress(_) => "InvalidQuery",
            MeasurementError::NoName => "NoName",
            MeasurementError::NoData => "NoData",
            MeasurementError::ServerMisbehaving => "ServerMisbehaving",
            MeasurementError::ServerTemporarilyMisbehaving => "ServerTemporarilyMisbehaving",
            MeasurementError::Timeout => "Timeout",
            MeasurementError::Network(e) => e.class(),
        }
    }

    /// Whether this failure should make the CLI exit non-zero even with
    /// `--measure` set (§4.F step 5: usage/I/O failures always count,
    /// measurement-semantic failures like NXDOMAIN don't when `--measure` is
    /// given).
    pub fn is_io_or_usage_error(&self) -> bool {
        matches!(
            self,
            MeasurementError::InvalidQuery(_)
                | MeasurementError::InvalidServerAddress(_)
                | MeasurementError::Timeout
                | MeasurementError::Network(_)
        )
    }
}

/// Maps a decoded response's RCODE (and answer/authority emptiness) to the
/// abstract kind per §4.F step 4 / §7. Called only after wire-level
/// validation (`dns_wire::validate_response`) has already passed.
pub fn classify_response(
    response: &dns_wire::Response,
    query: &dns_wire::Query,
) -> Result<(), MeasurementError> {
    use dns_wire::ResponseCode;

    match response.response_code() {
        ResponseCode::NOERROR => {
            if response.is_no_data(query) {
                Err(MeasurementError::NoData)
            } else {
                Ok(())
            }
        }
        ResponseCode::NXDOMAIN => Err(MeasurementError::NoName),
        ResponseCode::SERVFAIL => Err(MeasurementError::ServerTemporarilyMisbehaving),
        _ => Err(MeasurementError::ServerMisbehaving),
    }
}
