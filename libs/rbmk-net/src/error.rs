use std::fmt;

use dns_wire::Protocol;

/// Error kinds the measurement task (§7) maps to a stable, user-visible short
/// string. Library code throughout `rbmk-net` returns [`NetworkError`]; the
/// measurement task (`rbmk-measure`) is the only place these get turned into
/// the abstract taxonomy from the spec.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("invalid server address: {0}")]
    InvalidAddress(String),
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("unsupported protocol: {0:?}")]
    UnsupportedProtocol(Protocol),
    #[error("failed to resolve host: {0}")]
    Resolve(#[source] std::io::Error),
    #[error("{0}")]
    AllCandidatesFailed(JoinedErrors),
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
    #[error("TLS handshake failed: {0}")]
    Tls(#[source] std::io::Error),
    #[error("operation timed out")]
    Timeout,
    #[error("operation canceled")]
    Canceled,
    #[error("server misbehaving: {0}")]
    ServerMisbehaving(String),
    #[error("invalid DNS response: {0}")]
    InvalidResponse(#[from] dns_wire::ValidationError),
    #[error("invalid DNS message: {0}")]
    Codec(#[from] dns_wire::Error),
    #[error("dial attempted twice through the dial-once decorator")]
    DuplicateDial,
}

impl NetworkError {
    /// The abstract error-class string recorded in the `errClass` field of the
    /// failing event (§6/§7). Kept here, rather than only in `rbmk-measure`,
    /// because events are emitted from deep inside transport code that never
    /// sees a `MeasurementError`.
    pub fn class(&self) -> &'static str {
        match self {
            NetworkError::InvalidAddress(_) | NetworkError::UnsupportedProtocol(_) => {
                "InvalidQuery"
            }
            NetworkError::UnsupportedScheme(_) => "UnsupportedScheme",
            NetworkError::Resolve(_) | NetworkError::Io(_) | NetworkError::Tls(_) => "IO",
            NetworkError::AllCandidatesFailed(_) => "IO",
            NetworkError::Timeout => "Timeout",
            NetworkError::Canceled => "Canceled",
            NetworkError::ServerMisbehaving(_) => "ServerMisbehaving",
            NetworkError::InvalidResponse(_) | NetworkError::Codec(_) => "InvalidResponse",
            NetworkError::DuplicateDial => "DuplicateDial",
        }
    }
}

/// Every error collected while trying each resolved IP in order (§4.B: "on
/// failure joins all errors").
#[derive(Debug)]
pub struct JoinedErrors(pub Vec<std::io::Error>);

impl fmt::Display for JoinedErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to connect to any candidate address: ")?;

        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{e}")?;
        }

        Ok(())
    }
}

impl std::error::Error for JoinedErrors {}
