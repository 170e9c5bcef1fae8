//! DNS message wire codec.
//!
//! Builds and parses DNS messages on top of the [`domain`] crate, and adds the
//! protocol-specific policy a plain DNS library doesn't know about: which
//! transport a query is destined for changes how it must be encoded. RFC 8484
//! §4.1 and RFC 9250 §4.2.1 both mandate a zero query ID for DoH/DoQ; every
//! other transport uses a random one.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use domain::{
    base::{
        iana::Class, message_builder::AnswerBuilder, name::FlattenInto, HeaderCounts, Message,
        MessageBuilder, ParsedName, Question, RecordSection,
    },
    dep::octseq::OctetsInto,
    rdata::AllRecordData,
};

pub mod prelude {
    // Re-export trait names so other crates can call the functions on them.
    // We don't export the name though so that it cannot conflict.
    pub use domain::base::name::FlattenInto as _;
    pub use domain::base::RecordData as _;
    pub use domain::base::ToName as _;
}

pub const MAX_NAME_LEN: usize = domain::base::Name::MAX_LEN;
/// Messages larger than this can't be carried by a length-prefixed stream transport.
pub const MAX_STREAM_MESSAGE_LEN: usize = u16::MAX as usize;
/// Default EDNS(0) UDP payload size, used whenever the caller doesn't ask for a specific one.
pub const DEFAULT_UDP_PAYLOAD_SIZE: u16 = 512;
/// Block length used by EDNS(0) padding (RFC 7830 recommends 128 for queries).
const PADDING_BLOCK_LEN: usize = 128;
/// 4-byte option header (2-byte code + 2-byte length) every EDNS(0) option carries.
const OPT_HEADER_LEN: usize = 4;

pub type RecordType = domain::base::iana::Rtype;

pub type DomainNameRef<'a> = domain::base::Name<&'a [u8]>;
pub type Record<'a> =
    domain::base::Record<ParsedName<&'a [u8]>, AllRecordData<&'a [u8], ParsedName<&'a [u8]>>>;
pub type RecordData<'a> = AllRecordData<&'a [u8], ParsedName<&'a [u8]>>;

pub type DomainName = domain::base::Name<Vec<u8>>;
pub type OwnedRecord = domain::base::Record<DomainName, AllRecordData<Vec<u8>, DomainName>>;
pub type OwnedRecordData = AllRecordData<Vec<u8>, DomainName>;

pub type ResponseCode = domain::base::iana::Rcode;
pub type Opcode = domain::base::iana::Opcode;

/// A flattened view of a [`Response`]'s header, for `dig`-style rendering.
#[derive(Debug, Clone, Copy)]
pub struct HeaderSummary {
    pub id: u16,
    pub opcode: Opcode,
    pub rcode: ResponseCode,
    pub qr: bool,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

/// The closed set of transports a query can be sent over.
///
/// This is what decides the query-ID policy (zero vs. random) and whether the
/// wire format is length-prefixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
    Dot,
    Doh,
    Doq,
}

impl Protocol {
    /// Whether this transport length-prefixes messages and therefore rejects
    /// anything that doesn't fit in a `u16`.
    pub fn is_stream(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Dot | Protocol::Doq)
    }

    fn zero_id(self) -> bool {
        matches!(self, Protocol::Doh | Protocol::Doq)
    }

    /// The default port used when a server address doesn't specify one.
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Udp | Protocol::Tcp => 53,
            Protocol::Dot | Protocol::Doq => 853,
            Protocol::Doh => 443,
        }
    }
}

/// EDNS(0) flags, modeled as a bitset rather than individual bools so new flags
/// compose the same way `+option` flags do on the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdnsFlags {
    /// DNSSEC-OK.
    pub dnssec_ok: bool,
    /// RFC 7830 block-length padding.
    pub block_length_padding: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Edns0 {
    pub max_udp_payload: u16,
    pub flags: EdnsFlags,
}

impl Default for Edns0 {
    fn default() -> Self {
        Self {
            max_udp_payload: DEFAULT_UDP_PAYLOAD_SIZE,
            flags: EdnsFlags::default(),
        }
    }
}

/// A single step in building a [`Query`], applied in order.
#[derive(Debug, Clone, Copy)]
pub enum QueryOption {
    Edns0(Edns0),
    /// Forces a specific ID. Test hook only; real traffic relies on the protocol's policy.
    Id(u16),
}

#[derive(Clone)]
pub struct Query {
    inner: Message<Vec<u8>>,
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("qid", &self.inner.header().id())
            .field("type", &self.qtype())
            .field("domain", &self.domain())
            .finish()
    }
}

impl Query {
    pub fn parse(slice: &[u8]) -> Result<Self, Error> {
        let message = Message::from_octets(slice).map_err(|_| Error::TooShort)?;

        if message.header().qr() {
            return Err(Error::NotAQuery);
        }

        // We don't need to support multiple questions/qname in a single query because
        // nobody does it and since this run with each packet we want to squeeze as much optimization
        // as we can therefore we won't do it.
        //
        // See: https://stackoverflow.com/a/55093896
        let _ = message.sole_question()?; // Verify that there is exactly one question.

        Ok(Self {
            inner: message.octets_into(),
        })
    }

    /// Builds a new query for `name`/`rtype`, applying `options` in order.
    ///
    /// `name` is IDNA-ASCII-lowercased and made fully qualified (a trailing dot
    /// is appended if missing) before encoding. The ID is chosen per `protocol`'s
    /// policy unless overridden by [`QueryOption::Id`].
    pub fn new(
        name: &str,
        rtype: RecordType,
        protocol: Protocol,
        options: &[QueryOption],
    ) -> Result<Self, Error> {
        let fqdn = normalize_name(name)?;
        let domain = DomainName::vec_from_str(&fqdn).map_err(|_| Error::InvalidName)?;

        let mut builder = MessageBuilder::new_vec().question();
        builder.header_mut().set_qr(false);
        builder.header_mut().set_rd(true); // Default to recursion desired.

        if protocol.zero_id() {
            builder.header_mut().set_id(0);
        } else {
            builder.header_mut().set_random_id();
        }

        builder
            .push((domain, rtype))
            .expect("Vec-backed message builder never fails");

        let mut query = Self {
            inner: builder.into_message(),
        };

        for option in options {
            match *option {
                QueryOption::Edns0(edns) => query.append_edns0(edns)?,
                QueryOption::Id(id) => query.inner.header_mut().set_id(id),
            }
        }

        query.validate_for(protocol)?;

        Ok(query)
    }

    fn append_edns0(&mut self, edns: Edns0) -> Result<(), Error> {
        let mut bytes = self.inner.as_slice().to_vec();

        // Root name (1 byte) + TYPE (2) + CLASS=UDP payload (2) + TTL (4).
        let mut opt_header = Vec::with_capacity(9);
        opt_header.push(0u8); // root owner name
        opt_header.extend_from_slice(&41u16.to_be_bytes()); // TYPE=OPT
        opt_header.extend_from_slice(&edns.max_udp_payload.to_be_bytes()); // CLASS=requestor payload size

        let ttl: u32 = if edns.flags.dnssec_ok { 0x8000 } else { 0 };
        opt_header.extend_from_slice(&ttl.to_be_bytes());

        let mut rdata = Vec::new();
        if edns.flags.block_length_padding {
            let unpadded_total = bytes.len() + opt_header.len() + 2 /* rdlength */ + OPT_HEADER_LEN;
            let remainder = unpadded_total % PADDING_BLOCK_LEN;
            let pad_len = if remainder == 0 {
                0
            } else {
                PADDING_BLOCK_LEN - remainder
            };

            rdata.extend_from_slice(&12u16.to_be_bytes()); // OPT option-code 12 = PADDING
            rdata.extend_from_slice(&(pad_len as u16).to_be_bytes());
            rdata.extend(std::iter::repeat_n(0u8, pad_len));
        }

        opt_header.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&opt_header);
        bytes.extend_from_slice(&rdata);

        let counts = HeaderCounts::for_message_slice_mut(&mut bytes);
        let arcount = counts.arcount();
        counts.set_arcount(arcount + 1);

        self.inner = Message::from_octets(bytes)
            .map_err(|_| Error::TooLarge)?
            .octets_into();

        Ok(())
    }

    fn validate_for(&self, protocol: Protocol) -> Result<(), Error> {
        let len = self.inner.as_slice().len();
        let limit = if protocol.is_stream() {
            MAX_STREAM_MESSAGE_LEN
        } else {
            u16::MAX as usize
        };

        if len > limit {
            return Err(Error::TooLarge);
        }

        Ok(())
    }

    pub fn with_id(mut self, id: u16) -> Self {
        self.inner.header_mut().set_id(id);

        self
    }

    pub fn id(&self) -> u16 {
        self.inner.header().id()
    }

    pub fn domain(&self) -> DomainName {
        self.question().into_qname().flatten_into()
    }

    pub fn qtype(&self) -> RecordType {
        self.question().qtype()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.inner.into_octets()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.inner.as_slice()
    }

    pub fn as_message(&self) -> &Message<Vec<u8>> {
        &self.inner
    }

    fn question(&self) -> Question<ParsedName<&[u8]>> {
        self.inner.sole_question().expect("verified in ctor")
    }
}

/// ASCII-lowercases `name` and appends a trailing dot if it is missing.
///
/// IDNA is applied first so internationalized names are normalized to their
/// ASCII (`xn--`) form before the lowercasing/FQDN rules run.
fn normalize_name(name: &str) -> Result<String, Error> {
    let ascii = idna::domain_to_ascii(name).map_err(|_| Error::InvalidName)?;

    let mut lower = ascii.to_ascii_lowercase();
    if !lower.ends_with('.') {
        lower.push('.');
    }

    if lower.len() > MAX_NAME_LEN {
        return Err(Error::TooLarge);
    }

    Ok(lower)
}

impl TryFrom<&[u8]> for Query {
    type Error = Error;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        Self::parse(slice)
    }
}

impl TryFrom<&[u8]> for Response {
    type Error = Error;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        Self::parse(slice)
    }
}

#[derive(Clone)]
pub struct Response {
    inner: Message<Vec<u8>>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("qid", &self.inner.header().id())
            .field("domain", &self.domain())
            .field("type", &self.qtype())
            .field("response_code", &self.response_code())
            .finish_non_exhaustive()
    }
}

impl Response {
    /// Creates an empty, "NOERROR" response for the given query.
    pub fn no_error(query: &Query) -> Self {
        ResponseBuilder::for_query(query, ResponseCode::NOERROR).build()
    }

    pub fn servfail(query: &Query) -> Self {
        ResponseBuilder::for_query(query, ResponseCode::SERVFAIL).build()
    }

    pub fn nxdomain(query: &Query) -> Self {
        ResponseBuilder::for_query(query, ResponseCode::NXDOMAIN).build()
    }

    pub fn parse(slice: &[u8]) -> Result<Self, Error> {
        let message = Message::from_octets(slice).map_err(|_| Error::TooShort)?;

        if !message.header().qr() {
            return Err(Error::NotAResponse);
        }

        let _ = message.sole_question()?; // Verify that there is exactly one question.

        // Verify that we can parse the answers + all records.
        for record in message.answer()? {
            record?.into_any_record::<AllRecordData<_, _>>()?;
        }

        Ok(Self {
            inner: message.octets_into(),
        })
    }

    pub fn id(&self) -> u16 {
        self.inner.header().id()
    }

    pub fn truncated(&self) -> bool {
        self.inner.header().tc()
    }

    pub fn domain(&self) -> DomainName {
        self.question().into_qname().flatten_into()
    }

    pub fn qtype(&self) -> RecordType {
        self.question().qtype()
    }

    pub fn response_code(&self) -> ResponseCode {
        self.inner.header().rcode()
    }

    /// A snapshot of the header fields `dig`-style rendering needs; kept as a
    /// plain struct rather than exposing `domain`'s own header type so
    /// `rbmk-measure` doesn't need to depend on `domain` just to render text.
    pub fn header_summary(&self) -> HeaderSummary {
        let header = self.inner.header();
        let counts = self.inner.header_counts();

        HeaderSummary {
            id: header.id(),
            opcode: header.opcode(),
            rcode: header.rcode(),
            qr: header.qr(),
            aa: header.aa(),
            tc: header.tc(),
            rd: header.rd(),
            ra: header.ra(),
            qdcount: counts.qdcount(),
            ancount: counts.ancount(),
            nscount: counts.nscount(),
            arcount: counts.arcount(),
        }
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.answer().into_iter().map(|r| {
            r.expect("verified in ctor")
                .into_any_record::<AllRecordData<_, _>>()
                .expect("verified in ctor")
        })
    }

    /// The owner-matching answer RRs for `query`, following any CNAME chain present
    /// in the answer section. Order is preserved; an empty result is the "no data"
    /// sentinel and left for the caller to interpret.
    pub fn answers_for(&self, query: &Query) -> Vec<Record<'_>> {
        let qtype = query.qtype();
        let mut target = query.domain();
        let mut out = Vec::new();

        for record in self.records() {
            let owner: DomainName = record.owner().flatten_into();

            if !owner.name_eq(&target) {
                continue;
            }

            if let AllRecordData::Cname(cname) = record.data() {
                target = cname.cname().flatten_into();
                continue;
            }

            if record.rtype() == qtype && record.class() == Class::IN {
                out.push(record);
            }
        }

        out
    }

    /// Serializes this response into a byte slice.
    ///
    /// The `max_len` parameter specifies the maximum size of the payload.
    /// In case the payload is bigger than `max_len`, it will be truncated and the TC bit in the header will be set.
    pub fn into_bytes(mut self, max_len: usize) -> Vec<u8> {
        let qid = self.inner.header().id();

        let len = self.inner.as_slice().len();
        if len <= max_len {
            return self.inner.into_octets();
        }

        tracing::debug!(%len, %max_len, %qid, domain = %self.domain(), "Truncating DNS response");

        self.inner.header_mut().set_tc(true);

        let start_of_answer = self.answer().pos();

        let mut bytes = self.inner.into_octets();
        bytes.truncate(start_of_answer);

        let headercounts = HeaderCounts::for_message_slice_mut(&mut bytes);

        // We deleted everything after answers, reset all counts to 0.
        headercounts.as_slice_mut().fill(0);

        // Set the question count to 1.
        headercounts.set_qdcount(1);

        bytes
    }

    fn question(&self) -> Question<ParsedName<&[u8]>> {
        self.inner.sole_question().expect("verified in ctor")
    }

    fn answer(&self) -> RecordSection<'_, Vec<u8>> {
        self.inner.answer().expect("verified in ctor")
    }

    /// §4.F step 4: "success-with-no-answer-and-no-authority" → "no data".
    ///
    /// `query`'s answer set (after CNAME-chasing) and the authority section
    /// both being empty is what distinguishes a genuine "no data" answer from
    /// one a recursive resolver is still chasing (which would carry an SOA
    /// or NS record in the authority section instead).
    pub fn is_no_data(&self, query: &Query) -> bool {
        self.response_code() == ResponseCode::NOERROR
            && self.answers_for(query).is_empty()
            && self
                .inner
                .authority()
                .map(|section| section.into_iter().count() == 0)
                .unwrap_or(true)
    }
}

/// Extracts the address carried by an A/AAAA record, for short-form `dig`
/// rendering (`+short=ip`). `None` for any other record type.
pub fn record_addr(record: &Record<'_>) -> Option<std::net::IpAddr> {
    match record.data() {
        AllRecordData::A(a) => Some(std::net::IpAddr::V4(a.addr())),
        AllRecordData::Aaaa(aaaa) => Some(std::net::IpAddr::V6(aaaa.addr())),
        _ => None,
    }
}

/// The outcome of validating a [`Response`] against the [`Query`] that produced it.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("response bit not set")]
    NotAResponse,
    #[error("response ID {got} does not match query ID {want}")]
    IdMismatch { want: u16, got: u16 },
    #[error("response has no question matching the query")]
    QuestionMismatch,
}

/// Checks a response against the invariants every transport must uphold: response
/// bit set, ID match (except DoH/DoQ, where both sides are always zero), and the
/// question matching the query's name/class/type case-insensitively.
pub fn validate_response(
    query: &Query,
    response: &Response,
    protocol: Protocol,
) -> Result<(), ValidationError> {
    if !response.inner.header().qr() {
        return Err(ValidationError::NotAResponse);
    }

    if !protocol.zero_id() && response.id() != query.id() {
        return Err(ValidationError::IdMismatch {
            want: query.id(),
            got: response.id(),
        });
    }

    let question = response.question();
    let qtype = question.qtype();
    let qclass = question.qclass();
    let response_name: DomainName = question.into_qname().flatten_into();

    if !response_name.name_eq(&query.domain()) || qtype != query.qtype() || qclass != Class::IN {
        return Err(ValidationError::QuestionMismatch);
    }

    Ok(())
}

pub struct ResponseBuilder {
    inner: AnswerBuilder<Vec<u8>>,
}

impl ResponseBuilder {
    pub fn for_query(query: &Query, code: ResponseCode) -> Self {
        let inner = MessageBuilder::new_vec()
            .start_answer(&query.inner, code)
            .expect("Vec-backed message builder never fails");

        Self { inner }
    }

    pub fn with_records(mut self, records: impl IntoIterator<Item: Into<OwnedRecord>>) -> Self {
        for record in records {
            self.inner
                .push(record.into())
                .expect("Vec-backed message builder never fails");
        }

        self
    }

    pub fn build(self) -> Response {
        Response {
            inner: self.inner.into_message(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Bytes slice is too short to contain a message")]
    TooShort,
    #[error("DNS message is not a query")]
    NotAQuery,
    #[error("DNS message is not a response")]
    NotAResponse,
    #[error("name is not valid or not fully qualified")]
    InvalidName,
    #[error("query too large for transport")]
    TooLarge,
    #[error(transparent)]
    Parse(#[from] domain::base::wire::ParseError),
}

pub mod records {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    use domain::rdata::{rfc1035::TxtError, Aaaa, Cname, Ptr, Srv, Txt, A};

    use super::*;

    pub fn ptr(domain: DomainName) -> OwnedRecordData {
        OwnedRecordData::Ptr(Ptr::new(domain))
    }

    pub fn a(ip: Ipv4Addr) -> OwnedRecordData {
        OwnedRecordData::A(A::new(ip))
    }

    pub fn aaaa(ip: Ipv6Addr) -> OwnedRecordData {
        OwnedRecordData::Aaaa(Aaaa::new(ip))
    }

    pub fn ip(ip: IpAddr) -> OwnedRecordData {
        match ip {
            IpAddr::V4(ip) => a(ip),
            IpAddr::V6(ip) => aaaa(ip),
        }
    }

    pub fn txt(content: Vec<u8>) -> Result<OwnedRecordData, TxtError> {
        Ok(OwnedRecordData::Txt(Txt::from_octets(content)?))
    }

    pub fn srv(priority: u16, weight: u16, port: u16, target: DomainName) -> OwnedRecordData {
        OwnedRecordData::Srv(Srv::new(priority, weight, port, target))
    }

    pub fn cname(target: DomainName) -> OwnedRecordData {
        OwnedRecordData::Cname(Cname::new(target))
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn can_truncate_response() {
        let domain = DomainName::vec_from_str("example.com").unwrap();

        let query = Query::new("example.com", RecordType::A, Protocol::Udp, &[]).unwrap();
        let response = ResponseBuilder::for_query(&query, ResponseCode::NOERROR)
            .with_records(std::iter::repeat_n(
                (domain.clone(), 1, records::a(Ipv4Addr::LOCALHOST)),
                1000,
            ))
            .build();

        let bytes = response.into_bytes(1000);

        let parsed_response = Response::parse(&bytes).unwrap();

        assert!(parsed_response.truncated());
        assert_eq!(parsed_response.records().count(), 0);
        assert_eq!(parsed_response.domain(), domain);
    }

    #[test]
    fn udp_query_name_is_lowercased_and_qualified() {
        let query = Query::new("WWW.Example.COM", RecordType::A, Protocol::Udp, &[]).unwrap();

        assert_eq!(query.domain().to_string(), "www.example.com.");
    }

    #[test]
    fn doh_and_doq_force_zero_id() {
        let doh = Query::new("example.com", RecordType::A, Protocol::Doh, &[]).unwrap();
        let doq = Query::new("example.com", RecordType::A, Protocol::Doq, &[]).unwrap();

        assert_eq!(doh.id(), 0);
        assert_eq!(doq.id(), 0);
    }

    #[test]
    fn edns0_padding_rounds_up_to_block_length() {
        let query = Query::new(
            "example.com",
            RecordType::A,
            Protocol::Udp,
            &[QueryOption::Edns0(Edns0 {
                max_udp_payload: 1232,
                flags: EdnsFlags {
                    dnssec_ok: false,
                    block_length_padding: true,
                },
            })],
        )
        .unwrap();

        assert_eq!(query.as_bytes().len() % PADDING_BLOCK_LEN, 0);
    }

    #[test]
    fn oversize_stream_query_is_rejected() {
        let long_label = "a".repeat(63);
        let long_name = std::iter::repeat_n(long_label, 200)
            .collect::<Vec<_>>()
            .join(".");

        let result = Query::new(&long_name, RecordType::A, Protocol::Tcp, &[]);

        assert!(result.is_err());
    }

    #[test]
    fn validate_response_rejects_id_mismatch() {
        let query = Query::new("example.com", RecordType::A, Protocol::Udp, &[])
            .unwrap()
            .with_id(42);
        let response = Response::no_error(&query);
        let mut bytes = response.into_bytes(u16::MAX as usize);
        // Corrupt the ID to simulate a forged/duplicate response.
        bytes[0] = 0;
        bytes[1] = 1;
        let response = Response::parse(&bytes).unwrap();

        let err = validate_response(&query, &response, Protocol::Udp).unwrap_err();
        assert_eq!(err, ValidationError::IdMismatch { want: 42, got: 1 });
    }

    #[test]
    fn validate_response_ignores_id_for_doh() {
        let query = Query::new("example.com", RecordType::A, Protocol::Doh, &[]).unwrap();
        let response = Response::no_error(&query);

        validate_response(&query, &response, Protocol::Doh).unwrap();
    }
}
