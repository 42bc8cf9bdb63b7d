//! Demultiplexes inbound frames by COB-ID to subscribed handlers, and
//! accepts outbound frames for the bus. Mirrors the subscribe/dispatch
//! shape of `can-socket`'s tokio `Router`: a list of subscriptions behind a
//! mutex, pruned with `retain_mut` as receivers are dropped.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use can_socket::tokio::CanSocket;
use can_socket::{CanFrame, CanId, StandardId};

#[derive(Clone, Debug)]
pub struct Frame {
    pub cob_id: u16,
    pub data: Vec<u8>,
    pub timestamp: Instant,
}

/// A node's view of the bus: send frames, subscribe to a COB-ID.
///
/// COB-ID 0 (NMT) is delivered to every subscriber of COB-ID 0 regardless of
/// the `target_id` byte inside the payload — filtering by target is the NMT
/// slave's job, not the hub's.
pub trait Network: Send + Sync {
    fn send(&self, cob_id: u16, data: &[u8]);
    fn subscribe(&self, cob_id: u16) -> NetworkSubscription;
}

pub struct NetworkSubscription {
    receiver: mpsc::UnboundedReceiver<Frame>,
}

impl NetworkSubscription {
    pub async fn recv(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Frame> {
        tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
    }

    /// Non-blocking poll, used by tests that need to assert on a count of
    /// frames already queued rather than awaiting another one.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.receiver.try_recv().ok()
    }
}

struct Subscription {
    cob_id: u16,
    sender: mpsc::UnboundedSender<Frame>,
}

#[derive(Default)]
struct HubInner {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl HubInner {
    fn dispatch(&self, frame: Frame) {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        subscriptions.retain(|sub| {
            if sub.cob_id == frame.cob_id {
                sub.sender.send(frame.clone()).is_ok()
            } else {
                !sub.sender.is_closed()
            }
        });
    }

    fn subscribe(&self, cob_id: u16) -> NetworkSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscriptions.lock().unwrap().push(Subscription { cob_id, sender });
        NetworkSubscription { receiver }
    }
}

/// An in-memory bus used to wire two or more [`crate::node::LocalNode`]s
/// together for tests: every [`NetworkHandle`] obtained from the same
/// `VirtualBus` hears every frame any other handle sends.
#[derive(Clone, Default)]
pub struct VirtualBus {
    inner: Arc<HubInner>,
}

impl VirtualBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> NetworkHandle {
        NetworkHandle { inner: self.inner.clone() }
    }
}

#[derive(Clone)]
pub struct NetworkHandle {
    inner: Arc<HubInner>,
}

impl Network for NetworkHandle {
    fn send(&self, cob_id: u16, data: &[u8]) {
        self.inner.dispatch(Frame { cob_id, data: data.to_vec(), timestamp: Instant::now() });
    }

    fn subscribe(&self, cob_id: u16) -> NetworkSubscription {
        self.inner.subscribe(cob_id)
    }
}

/// Adapts a real SocketCAN interface (via `can-socket`) to the [`Network`]
/// trait. Send errors (e.g. bus-off) are logged and discarded rather than
/// propagated, matching the timer tasks' "never crash on a bad transmit"
/// contract.
pub struct CanBusNetwork {
    socket: Arc<CanSocket>,
    hub: Arc<HubInner>,
}

impl CanBusNetwork {
    /// Binds `interface` and spawns the background task that feeds received
    /// frames into the hub's subscriptions.
    pub async fn bind(interface: &str) -> std::io::Result<Self> {
        let socket = Arc::new(CanSocket::bind(interface)?);
        let hub = Arc::new(HubInner::default());

        let recv_socket = socket.clone();
        let recv_hub = hub.clone();
        tokio::spawn(async move {
            loop {
                match recv_socket.recv().await {
                    Ok(frame) => {
                        let cob_id = frame.id().as_u32() as u16;
                        recv_hub.dispatch(Frame { cob_id, data: frame.data().to_vec(), timestamp: Instant::now() });
                    }
                    Err(error) => {
                        log::warn!("CAN receive failed: {error}");
                    }
                }
            }
        });

        Ok(CanBusNetwork { socket, hub })
    }

    pub fn handle(self: &Arc<Self>) -> NetworkHandle {
        NetworkHandle { inner: self.hub.clone() }
    }
}

impl Network for CanBusNetwork {
    fn send(&self, cob_id: u16, data: &[u8]) {
        let Ok(id) = StandardId::new(cob_id) else {
            log::warn!("COB-ID 0x{cob_id:03X} is not a valid standard CAN id");
            return;
        };
        let Ok(frame) = CanFrame::new(CanId::Standard(id), data, None) else {
            log::warn!("failed to build CAN frame for COB-ID 0x{cob_id:03X}");
            return;
        };
        let socket = self.socket.clone();
        tokio::spawn(async move {
            if let Err(error) = socket.send(&frame).await {
                log::warn!("CAN send failed: {error}");
            }
        });
    }

    fn subscribe(&self, cob_id: u16) -> NetworkSubscription {
        self.hub.subscribe(cob_id)
    }
}
