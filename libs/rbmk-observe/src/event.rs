use base64::Engine as _;
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// The closed vocabulary of event messages.
///
/// Consumers are expected to ignore unknown fields (and, by extension, cope with
/// unknown `msg` values) so the schema can grow without breaking old tooling;
/// the set of variants itself is closed for this crate's purposes, though, since
/// it is what every `expectedSeq` assertion in the scenario registry matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Msg {
    ConnectStart,
    ConnectDone,
    ReadStart,
    ReadDone,
    WriteStart,
    WriteDone,
    CloseStart,
    CloseDone,
    TlsHandshakeStart,
    TlsHandshakeDone,
    DnsQuery,
    DnsResponse,
    HttpRoundTripStart,
    HttpRoundTripDone,
    StunReflexiveAddress,
}

impl Msg {
    /// Whether this is one of the three "chatty" kinds the scenario registry's
    /// wildcard matcher is allowed to absorb ({read, write, close}, per §4.H).
    pub fn is_wildcardable(self) -> bool {
        matches!(
            self,
            Msg::ReadStart
                | Msg::ReadDone
                | Msg::WriteStart
                | Msg::WriteDone
                | Msg::CloseStart
                | Msg::CloseDone
        )
    }
}

/// The transport-layer protocol a connection rides on, independent of the DNS
/// application protocol (`serverProtocol`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WireProtocol {
    Tcp,
    Udp,
}

/// An immutable, append-only structured event.
///
/// Field names match §6 of the spec exactly (`camelCase`) so the JSONL output is
/// wire-compatible with other RBMK-family tooling. Unset optional fields are
/// omitted rather than emitted as `null`.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub msg: Msg,
    #[serde(with = "rfc3339")]
    pub t: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none", with = "rfc3339::option")]
    pub t0: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_protocol: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<WireProtocol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_raw_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_raw_response: Option<String>,
}

impl Event {
    /// Starts building an event of kind `msg`, stamped with `t` from the caller's clock.
    pub fn new(msg: Msg, t: OffsetDateTime) -> Self {
        Self {
            msg,
            t,
            t0: None,
            span_id: None,
            local_addr: None,
            remote_addr: None,
            server_addr: None,
            server_protocol: None,
            protocol: None,
            num_bytes: None,
            err: None,
            err_class: None,
            dns_raw_query: None,
            dns_raw_response: None,
        }
    }

    pub fn with_t0(mut self, t0: OffsetDateTime) -> Self {
        self.t0 = Some(t0);
        self
    }

    pub fn with_span_id(mut self, id: u64) -> Self {
        self.span_id = Some(id);
        self
    }

    pub fn with_local_addr(mut self, addr: impl ToString) -> Self {
        self.local_addr = Some(addr.to_string());
        self
    }

    pub fn with_remote_addr(mut self, addr: impl ToString) -> Self {
        self.remote_addr = Some(addr.to_string());
        self
    }

    pub fn with_server_addr(mut self, addr: impl ToString) -> Self {
        self.server_addr = Some(addr.to_string());
        self
    }

    pub fn with_server_protocol(mut self, proto: &'static str) -> Self {
        self.server_protocol = Some(proto);
        self
    }

    pub fn with_protocol(mut self, proto: WireProtocol) -> Self {
        self.protocol = Some(proto);
        self
    }

    pub fn with_num_bytes(mut self, n: usize) -> Self {
        self.num_bytes = Some(n);
        self
    }

    pub fn with_err(mut self, err: impl std::fmt::Display, class: &'static str) -> Self {
        self.err = Some(err.to_string());
        self.err_class = Some(class);
        self
    }

    pub fn with_dns_raw_query(mut self, bytes: &[u8]) -> Self {
        self.dns_raw_query = Some(base64::engine::general_purpose::STANDARD.encode(bytes));
        self
    }

    pub fn with_dns_raw_response(mut self, bytes: &[u8]) -> Self {
        self.dns_raw_response = Some(base64::engine::general_purpose::STANDARD.encode(bytes));
        self
    }
}

mod rfc3339 {
    use super::*;
    use serde::Serializer;

    pub fn serialize<S>(t: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = t.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&s)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S>(t: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match t {
                Some(t) => super::serialize(t, serializer),
                None => serializer.serialize_none(),
            }
        }
    }
}
