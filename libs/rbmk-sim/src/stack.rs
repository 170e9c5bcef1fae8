//! A simulated host's network presence (§4.G "Stacks"): one synthetic IP,
//! a set of protocol-keyed listeners, and the proxy plumbing that threads
//! every byte exchanged with a client through the [`Router`] before it
//! reaches (or leaves) the real backend service that implements the DNS/HTTP
//! logic.
//!
//! A `Stack` never talks to a synthetic IP directly — there is no virtual L3
//! device here. Instead every backend binds a real loopback socket on an
//! OS-assigned port, and a thin "front" proxy (also a real loopback socket,
//! a distinct port) is what a dialing [`rbmk_net::Network`] is redirected to
//! via [`rbmk_net::AddrTranslator`]: the front proxy is the only thing
//! standing between a client and the backend, and every chunk it relays in
//! either direction is wrapped as one [`crate::router::Frame`] and handed to
//! [`Router::relay`] first. This is what lets a scenario's packet filter see
//! (and drop, mutate, or race with an injected duplicate) every byte a
//! measurement sends or receives, without the simulator needing a real IP
//! stack (smoltcp, TUN devices, ...) to get real sockets to listen on
//! synthetic addresses.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use dns_wire::Protocol;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;

use crate::router::{Frame, FrameProtocol, Router};

/// How long a per-flow UDP proxy keeps reading extra replies from the
/// backend after the first one, before assuming no more duplicates are
/// coming (§4.G invariant 2 still holds: each one that does arrive is
/// delivered in the order the backend produced it).
const UDP_FLOW_IDLE: Duration = Duration::from_millis(200);
const PROXY_BUF_LEN: usize = 16 * 1024;

impl From<Protocol> for FrameProtocol {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Udp => FrameProtocol::Udp,
            Protocol::Tcp => FrameProtocol::Tcp,
            Protocol::Dot => FrameProtocol::Tls,
            Protocol::Doh => FrameProtocol::Https,
            Protocol::Doq => FrameProtocol::Doq,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("failed to bind {0} listener: {1}")]
    Bind(&'static str, #[source] std::io::Error),
}

/// Accepts one UDP datagram's payload and returns the reply to send, if any.
/// `dns.google`'s responders are built on this (§4.G "shared in-memory
/// database").
pub type DatagramHandler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, Option<Vec<u8>>> + Send + Sync>;

/// Serves one accepted, already-proxied TCP connection end to end (reading
/// requests, writing responses, closing when done). Used for DNS/TCP, DNS
/// over TLS, and DoH backends alike — each wraps this with its own framing.
pub type TcpHandler = Arc<dyn Fn(TcpStream) -> BoxFuture<'static, ()> + Send + Sync>;

/// A virtual host bound to one synthetic IP (§3 "Stack").
///
/// Owns every backend and front-proxy task spawned on its behalf; dropping
/// the last `Arc<Stack>` aborts them all, closing every socket the host had
/// open (§3: "detachment closes all its sockets").
pub struct Stack {
    ip: IpAddr,
    router: Arc<Router>,
    fronts: Mutex<HashMap<Protocol, SocketAddr>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Stack {
    pub fn new(ip: IpAddr, router: Arc<Router>) -> Arc<Self> {
        Arc::new(Self {
            ip,
            router,
            fronts: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// The real loopback address a `Network` should be redirected to in
    /// order to reach this stack's `protocol` service — the value
    /// `rbmk_sim::Simulator`'s `AddrTranslator` hook returns.
    pub fn front_addr(&self, protocol: Protocol) -> Option<SocketAddr> {
        self.fronts.lock().get(&protocol).copied()
    }

    fn logical_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.ip, port)
    }

    fn remember(self: &Arc<Self>, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Hosts a UDP-based DNS responder (plain UDP or, once the session lives
    /// behind a QUIC endpoint elsewhere, the datagram half of other
    /// transports). `logical_port` is the port clients address (53 for DNS).
    pub async fn host_udp(
        self: &Arc<Self>,
        protocol: Protocol,
        logical_port: u16,
        handler: DatagramHandler,
    ) -> Result<(), StackError> {
        let backend = Arc::new(
            UdpSocket::bind((std::net::Ipv4Addr::LOCALHOST, 0))
                .await
                .map_err(|e| StackError::Bind("UDP backend", e))?,
        );
        let front = Arc::new(
            UdpSocket::bind((std::net::Ipv4Addr::LOCALHOST, 0))
                .await
                .map_err(|e| StackError::Bind("UDP front", e))?,
        );

        let front_addr = front.local_addr().map_err(|e| StackError::Bind("UDP front", e))?;
        self.fronts.lock().insert(protocol, front_addr);

        let server_addr = self.logical_addr(logical_port);
        let frame_protocol = FrameProtocol::from(protocol);
        let router = self.router.clone();

        // Backend: answers every datagram it receives directly, concurrently.
        let backend_task = {
            let backend = backend.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; PROXY_BUF_LEN];
                loop {
                    let Ok((n, peer)) = backend.recv_from(&mut buf).await else {
                        break;
                    };
                    let payload = buf[..n].to_vec();
                    let handler = handler.clone();
                    let backend = backend.clone();
                    tokio::spawn(async move {
                        if let Some(reply) = handler(payload).await {
                            let _ = backend.send_to(&reply, peer).await;
                        }
                    });
                }
            })
        };

        // Front proxy: every client datagram and every backend reply passes
        // through the router before being relayed onward.
        let front_task = tokio::spawn(async move {
            let mut buf = vec![0u8; PROXY_BUF_LEN];
            loop {
                let Ok((n, client)) = front.recv_from(&mut buf).await else {
                    break;
                };

                let query_frame = Frame::new(client, server_addr, frame_protocol, buf[..n].to_vec());
                let forwarded = router.relay(query_frame);

                deliver_injected(&front, &router, client).await;

                let Some(frame) = forwarded else { continue };

                let Ok(flow) = UdpSocket::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await else {
                    continue;
                };
                if flow.send_to(&frame.payload, backend.local_addr().expect("bound")).await.is_err() {
                    continue;
                }

                let front = front.clone();
                let router = router.clone();
                tokio::spawn(async move {
                    let mut reply_buf = vec![0u8; PROXY_BUF_LEN];
                    loop {
                        let recv = tokio::time::timeout(UDP_FLOW_IDLE, flow.recv_from(&mut reply_buf)).await;
                        let Ok(Ok((n, _))) = recv else { break };

                        let reply_frame =
                            Frame::new(server_addr, client, frame_protocol, reply_buf[..n].to_vec());
                        if let Some(reply) = router.relay(reply_frame) {
                            let _ = front.send_to(&reply.payload, client).await;
                        }

                        deliver_injected(&front, &router, client).await;
                    }
                });
            }
        });

        self.remember(backend_task);
        self.remember(front_task);

        Ok(())
    }

    /// Hosts a stream-based service (DNS/TCP, DNS-over-TLS, DoH): `handler`
    /// is invoked with one accepted, already-proxied connection per client.
    pub async fn host_tcp(
        self: &Arc<Self>,
        protocol: Protocol,
        logical_port: u16,
        handler: TcpHandler,
    ) -> Result<(), StackError> {
        let backend_listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| StackError::Bind("TCP backend", e))?;
        let backend_addr = backend_listener
            .local_addr()
            .map_err(|e| StackError::Bind("TCP backend", e))?;

        let front_listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| StackError::Bind("TCP front", e))?;
        let front_addr = front_listener
            .local_addr()
            .map_err(|e| StackError::Bind("TCP front", e))?;

        self.fronts.lock().insert(protocol, front_addr);

        let backend_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = backend_listener.accept().await else {
                    break;
                };
                let handler = handler.clone();
                tokio::spawn(handler(stream));
            }
        });

        let server_addr = self.logical_addr(logical_port);
        let frame_protocol = FrameProtocol::from(protocol);
        let router = self.router.clone();

        let front_task = tokio::spawn(async move {
            loop {
                let Ok((client_stream, client_peer)) = front_listener.accept().await else {
                    break;
                };
                let Ok(backend_stream) = TcpStream::connect(backend_addr).await else {
                    continue;
                };

                tokio::spawn(pump_bidirectional(
                    client_stream,
                    backend_stream,
                    client_peer,
                    server_addr,
                    frame_protocol,
                    router.clone(),
                ));
            }
        });

        self.remember(backend_task);
        self.remember(front_task);

        Ok(())
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// Sends any frame a filter queued via `Router::inject` that is addressed to
/// `client` right now — the mechanism behind forged/duplicate responses
/// racing (or replacing) the real one (§4.H).
async fn deliver_injected(front: &UdpSocket, router: &Router, client: SocketAddr) {
    for frame in router.drain_injected() {
        if frame.dst == client {
            let _ = front.send_to(&frame.payload, client).await;
        }
    }
}

async fn pump_bidirectional(
    client: TcpStream,
    backend: TcpStream,
    client_addr: SocketAddr,
    server_addr: SocketAddr,
    protocol: FrameProtocol,
    router: Arc<Router>,
) {
    let (client_read, client_write) = client.into_split();
    let (backend_read, backend_write) = backend.into_split();

    let upstream = pump(client_read, backend_write, client_addr, server_addr, protocol, router.clone());
    let downstream = pump(backend_read, client_write, server_addr, client_addr, protocol, router);

    let _ = tokio::join!(upstream, downstream);
}

async fn pump(
    mut reader: impl tokio::io::AsyncRead + Unpin,
    mut writer: impl tokio::io::AsyncWrite + Unpin,
    src: SocketAddr,
    dst: SocketAddr,
    protocol: FrameProtocol,
    router: Arc<Router>,
) {
    let mut buf = vec![0u8; PROXY_BUF_LEN];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };

        let frame = Frame::new(src, dst, protocol, buf[..n].to_vec());
        let Some(frame) = router.relay(frame) else { continue };

        if writer.write_all(&frame.payload).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn udp_proxy_relays_a_request_and_its_reply() {
        let router = Arc::new(Router::new());
        let stack = Stack::new(IpAddr::V4(Ipv4Addr::new(8, 8, 4, 4)), router);

        let handler: DatagramHandler = Arc::new(|payload| Box::pin(async move { Some(payload) }));
        stack.host_udp(Protocol::Udp, 53, handler).await.unwrap();

        let front = stack.front_addr(Protocol::Udp).unwrap();
        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        client.send_to(b"ping", front).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(&buf[..n], b"ping");
    }

    #[tokio::test]
    async fn tcp_proxy_relays_bytes_through_the_router() {
        let router = Arc::new(Router::new());
        let stack = Stack::new(IpAddr::V4(Ipv4Addr::new(8, 8, 4, 4)), router);

        let handler: TcpHandler = Arc::new(|mut stream| {
            Box::pin(async move {
                let mut buf = [0u8; 16];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let _ = stream.write_all(&buf[..n]).await;
            })
        });
        stack.host_tcp(Protocol::Tcp, 53, handler).await.unwrap();

        let front = stack.front_addr(Protocol::Tcp).unwrap();
        let mut client = TcpStream::connect(front).await.unwrap();
        client.write_all(b"hello").await.unwrap();

        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();

        assert_eq!(&buf[..n], b"hello");
    }
}
