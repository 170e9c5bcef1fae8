mod doh;
mod doq;
mod tcp;
mod udp;

pub use doh::DohTransport;
pub use doq::DoqTransport;
pub use tcp::StreamTransport;
pub use udp::{DuplicateCollector, ExchangeOutcome, UdpTransport};

use futures::future::BoxFuture;

use dns_wire::{Query, Response};

/// The shared contract every DNS transport satisfies (§4.D): send `query`,
/// return the first valid-looking response.
///
/// Deliberately not a state machine shared across transports — each
/// implementation owns its own `START → DIALING → WRITING → READING →
/// DECODED → DONE` progression because the dial, framing and close semantics
/// differ too much between UDP/TCP/DoH/DoQ to share code profitably. What
/// they share is this single entry point and the event vocabulary they all
/// emit through the `Network` they were built from.
pub trait Exchange {
    fn exchange<'a>(
        &'a self,
        query: &'a Query,
    ) -> BoxFuture<'a, Result<Response, crate::error::NetworkError>>;
}
