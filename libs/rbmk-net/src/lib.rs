//! Network abstraction and DNS transports (§4.B/§4.D): a single `Network`
//! bundling how to dial, resolve, and emit events, plus the five transports
//! built on top of it.

pub mod dial_once;
pub mod error;
pub mod network;
pub mod resolver;
pub mod server_addr;
pub mod transport;

pub use error::NetworkError;
pub use network::{AddrTranslator, Network};
pub use resolver::{Resolver, SystemResolver};
pub use server_addr::{parse_dial_dns_url, ServerAddr};
