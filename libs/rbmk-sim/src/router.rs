//! The simulator's router (§4.G "Router"): every frame any simulated server
//! or client sends passes through here before delivery, so a scenario editor
//! can install a filter that mutates or drops it.
//!
//! The router itself never touches a real socket — `rbmk-sim`'s proxies
//! (`udp_proxy`/`tcp_proxy`) are the ones moving bytes between the real
//! loopback sockets `Network` dials and each `Stack`'s real backend
//! listener; every chunk one of those proxies relays is wrapped as exactly
//! one [`Frame`] and handed to [`Router::relay`] first.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

/// The transport a [`Frame`] was captured on, for PCAP-style rendering and
/// for filters that only care about one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameProtocol {
    Udp,
    Tcp,
    Tls,
    Https,
    Doq,
}

/// One logical unit of traffic the router relays — the in-memory analogue of
/// a wire-level packet, coarse enough that a stream transport's read/write
/// calls each produce one frame rather than one per TCP segment.
#[derive(Debug, Clone)]
pub struct Frame {
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub protocol: FrameProtocol,
    pub payload: Vec<u8>,
    /// Extra copies a UDP filter wants sent after this one survives relay —
    /// the mechanism behind duplicate-response scenarios (§4.E/§8
    /// "dnsOverUdpCensorship" plays multiple forged answers through a
    /// combination of this and [`Router::inject`]).
    pub duplicate: u32,
}

impl Frame {
    pub fn new(src: SocketAddr, dst: SocketAddr, protocol: FrameProtocol, payload: Vec<u8>) -> Self {
        Self {
            src,
            dst,
            protocol,
            payload,
            duplicate: 0,
        }
    }
}

/// A packet filter: inspects (and may mutate) a frame in place, and returns
/// whether it should be dropped (§4.G: "the filter may mutate the frame or
/// drop it by returning true").
pub type Filter = Arc<dyn Fn(&mut Frame) -> bool + Send + Sync>;

fn pass_through() -> Filter {
    Arc::new(|_frame| false)
}

/// Forwards [`Frame`]s between simulated stacks, consulting the
/// currently-installed [`Filter`] for each one (§4.G invariants 2 and 3: frames
/// are delivered in arrival order, and a frame is entirely filtered by exactly
/// one filter value).
///
/// Single-threaded in spirit — every caller relays frames one at a time and
/// awaits the result before relaying the next — even though the lock
/// itself is a `parking_lot::Mutex` rather than an actor, since nothing here
/// ever holds it across an `.await`.
pub struct Router {
    filter: parking_lot::Mutex<Filter>,
    /// Frames a filter wants delivered out-of-band, alongside (or instead
    /// of) whatever it does to the frame passing through `relay` — how a
    /// censorship filter forges an extra response without owning a socket
    /// of its own (§4.H "forges a specific A response").
    injected: parking_lot::Mutex<VecDeque<Frame>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            filter: parking_lot::Mutex::new(pass_through()),
            injected: parking_lot::Mutex::new(VecDeque::new()),
        }
    }

    /// Queues `frame` for immediate out-of-band delivery by whichever proxy
    /// drains it next. Called by filter closures that capture a
    /// `Weak<Router>` to forge traffic (e.g. a reply sent before the real
    /// one arrives).
    pub fn inject(&self, frame: Frame) {
        self.injected.lock().push_back(frame);
    }

    /// Drains every frame queued by [`Router::inject`] since the last call.
    pub fn drain_injected(&self) -> Vec<Frame> {
        self.injected.lock().drain(..).collect()
    }

    /// Atomically replaces the packet filter (§4.G invariant 3).
    pub fn install_filter(&self, filter: Filter) {
        *self.filter.lock() = filter;
    }

    pub fn clear_filter(&self) {
        *self.filter.lock() = pass_through();
    }

    /// Wraps the current filter with one that observes every surviving and
    /// dropped frame before deferring to the previous decision — the PCAP
    /// export mechanism from §4.G ("installing a filter that clones each
    /// frame into a file and returns false").
    pub fn tap(&self, observe: impl Fn(&Frame) + Send + Sync + 'static) {
        let previous = self.filter.lock().clone();
        let next: Filter = Arc::new(move |frame: &mut Frame| {
            observe(frame);
            previous(frame)
        });
        *self.filter.lock() = next;
    }

    /// Runs `frame` through the current filter. `None` means it was dropped.
    pub fn relay(&self, mut frame: Frame) -> Option<Frame> {
        let filter = self.filter.lock().clone();
        let dropped = filter(&mut frame);

        if dropped {
            None
        } else {
            Some(frame)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn default_router_passes_every_frame() {
        let router = Router::new();
        let frame = Frame::new(addr(1), addr(2), FrameProtocol::Udp, vec![1, 2, 3]);

        let relayed = router.relay(frame).unwrap();
        assert_eq!(relayed.payload, vec![1, 2, 3]);
    }

    #[test]
    fn installed_filter_can_drop_frames() {
        let router = Router::new();
        router.install_filter(Arc::new(|_frame| true));

        let frame = Frame::new(addr(1), addr(2), FrameProtocol::Udp, vec![]);

        assert!(router.relay(frame).is_none());
    }

    #[test]
    fn installed_filter_can_mutate_surviving_frames() {
        let router = Router::new();
        router.install_filter(Arc::new(|frame: &mut Frame| {
            frame.payload = vec![0xff];
            false
        }));

        let frame = Frame::new(addr(1), addr(2), FrameProtocol::Udp, vec![1]);

        assert_eq!(router.relay(frame).unwrap().payload, vec![0xff]);
    }

    #[test]
    fn tap_observes_without_changing_the_verdict() {
        let router = Router::new();
        router.install_filter(Arc::new(|_frame| true));

        let seen = Arc::new(parking_lot::Mutex::new(0));
        let seen_clone = seen.clone();
        router.tap(move |_frame| *seen_clone.lock() += 1);

        let frame = Frame::new(addr(1), addr(2), FrameProtocol::Udp, vec![]);

        assert!(router.relay(frame).is_none());
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn filter_can_inject_a_forged_frame_alongside_the_original() {
        let router = Arc::new(Router::new());
        let for_filter = Arc::downgrade(&router);

        router.install_filter(Arc::new(move |frame: &mut Frame| {
            let router = for_filter.upgrade().expect("router outlives the filter in this test");
            router.inject(Frame::new(frame.dst, frame.src, FrameProtocol::Udp, vec![0xaa]));
            false
        }));

        let frame = Frame::new(addr(1), addr(2), FrameProtocol::Udp, vec![1]);
        let relayed = router.relay(frame).unwrap();
        assert_eq!(relayed.payload, vec![1]);

        let injected = router.drain_injected();
        assert_eq!(injected.len(), 1);
        assert_eq!(injected[0].payload, vec![0xaa]);
        assert!(router.drain_injected().is_empty());
    }
}
