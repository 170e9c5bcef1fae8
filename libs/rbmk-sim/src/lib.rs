//! QA simulator (§4.G): synthetic address assignment, an in-memory PKI,
//! loopback-backed DNS/HTTP responders, and a packet-filter router, all
//! wired together by [`simulator::Simulator`] into a topology
//! `rbmk-scenarios` can point a real [`rbmk_net::Network`] at.

pub mod addresses;
pub mod pki;
pub mod resolver;
pub mod router;
pub mod servers;
pub mod simulator;
pub mod stack;

pub use addresses::Addresses;
pub use pki::{LeafCert, PkiError, RootCa};
pub use resolver::SimResolver;
pub use router::{Filter, Frame, FrameProtocol, Router};
pub use servers::{DnsDatabase, HttpHandler, HttpHandlerSlot};
pub use simulator::{Simulator, SimulatorError};
pub use stack::{DatagramHandler, Stack, StackError, TcpHandler};
