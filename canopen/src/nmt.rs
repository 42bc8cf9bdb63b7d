//! NMT slave state machine and heartbeat producer. Commands arrive as
//! `[cs, target_id]` on COB-ID 0; the heartbeat producer is started and
//! stopped by writes to OD entry 0x1017 ("Producer heartbeat time").

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::network::Network;
use crate::node::LocalNode;

/// Mirrors the heartbeat `state_byte` encoding directly: the discriminants
/// below are the wire values, not array indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum NmtState {
    Initialising = 0,
    Stopped = 4,
    Operational = 5,
    PreOperational = 127,
}

mod command {
    pub const START: u8 = 1;
    pub const STOP: u8 = 2;
    pub const ENTER_PRE_OPERATIONAL: u8 = 128;
    pub const RESET_NODE: u8 = 129;
    pub const RESET_COMMUNICATION: u8 = 130;
}

const HEARTBEAT_INDEX: u16 = 0x1017;

/// Cheap `Clone`-able read/write handle on the current NMT state, shared
/// with the PDO engine for transmit gating.
#[derive(Clone)]
pub struct NmtStateHandle(Arc<AtomicU8>);

impl NmtStateHandle {
    fn new(initial: NmtState) -> Self {
        NmtStateHandle(Arc::new(AtomicU8::new(initial.into())))
    }

    pub fn get(&self) -> NmtState {
        NmtState::try_from(self.0.load(Ordering::Acquire)).unwrap_or(NmtState::Initialising)
    }

    fn set(&self, state: NmtState) {
        self.0.store(state.into(), Ordering::Release);
    }
}

pub struct NmtSlave {
    node_id: u8,
    node: Arc<LocalNode>,
    network: Arc<dyn Network>,
    state: NmtStateHandle,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    command_task: Mutex<Option<JoinHandle<()>>>,
    on_state_change: Mutex<Option<Arc<dyn Fn(NmtState) + Send + Sync>>>,
    heartbeat_sent: Arc<Notify>,
}

impl NmtSlave {
    /// Constructs the slave already in `PRE-OPERATIONAL`: the CiA 301 boot-up
    /// sequence only requires the `INITIALISING -> PRE-OPERATIONAL`
    /// auto-transition to have happened once setup completes, and there is
    /// no further setup step in this crate after `new` returns.
    pub fn new(node: Arc<LocalNode>, network: Arc<dyn Network>) -> Arc<Self> {
        let node_id = node.config.node_id;
        Arc::new(NmtSlave {
            node_id,
            node,
            network,
            state: NmtStateHandle::new(NmtState::PreOperational),
            heartbeat_task: Mutex::new(None),
            command_task: Mutex::new(None),
            on_state_change: Mutex::new(None),
            heartbeat_sent: Arc::new(Notify::new()),
        })
    }

    /// Suspends until the next heartbeat is emitted, or `timeout` elapses.
    /// Returns `false` on timeout. Mirrors the condvar-based
    /// `wait_for_reception` the Python implementation uses for PDOs, applied
    /// here to the heartbeat producer.
    pub async fn wait_for_heartbeat(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.heartbeat_sent.notified()).await.is_ok()
    }

    pub fn state_handle(&self) -> NmtStateHandle {
        self.state.clone()
    }

    pub fn state(&self) -> NmtState {
        self.state.get()
    }

    /// Registers a listener invoked whenever the NMT state changes, used by
    /// the PDO engine to re-gate TPDO transmission without polling.
    pub fn on_state_change(&self, listener: Arc<dyn Fn(NmtState) + Send + Sync>) {
        *self.on_state_change.lock().unwrap() = Some(listener);
    }

    /// Subscribes to the NMT channel and the heartbeat-time write hook, then
    /// emits the initial heartbeat if 0x1017 is already nonzero.
    pub fn start(self: &Arc<Self>) {
        let slave = self.clone();
        self.node.add_write_callback(Arc::new(move |index, subindex, _entry, data| {
            if index == HEARTBEAT_INDEX && subindex == 0 {
                let millis = u16::from_le_bytes([data.first().copied().unwrap_or(0), data.get(1).copied().unwrap_or(0)]);
                slave.reconfigure_heartbeat(millis);
            }
        }));

        let slave = self.clone();
        let mut subscription = self.network.subscribe(0);
        let handle = tokio::spawn(async move {
            while let Some(frame) = subscription.recv().await {
                slave.handle_command(&frame.data);
            }
        });
        *self.command_task.lock().unwrap() = Some(handle);

        if let Ok(bytes) = self.node.get_data(HEARTBEAT_INDEX, 0) {
            let millis = u16::from_le_bytes([bytes.first().copied().unwrap_or(0), bytes.get(1).copied().unwrap_or(0)]);
            if millis != 0 {
                self.reconfigure_heartbeat(millis);
            }
        }
    }

    /// Aborts the command-subscription loop and the heartbeat timer, if
    /// running. Leaves the current state and the registered state-change
    /// listener untouched; calling [`NmtSlave::start`] again resumes both.
    pub fn stop(&self) {
        if let Some(handle) = self.command_task.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.heartbeat_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn handle_command(self: &Arc<Self>, payload: &[u8]) {
        let (&cs, &target_id) = match (payload.first(), payload.get(1)) {
            (Some(cs), Some(target)) => (cs, target),
            _ => return,
        };
        if target_id != 0 && target_id != self.node_id {
            return;
        }

        match cs {
            command::START => self.set_state(NmtState::Operational),
            command::STOP => self.set_state(NmtState::Stopped),
            command::ENTER_PRE_OPERATIONAL => self.set_state(NmtState::PreOperational),
            // Reset node is a two-hop transition, INITIALISING then
            // PRE-OPERATIONAL, each emitting its own heartbeat.
            command::RESET_NODE => {
                self.set_state(NmtState::Initialising);
                self.set_state(NmtState::PreOperational);
            }
            command::RESET_COMMUNICATION => self.set_state(NmtState::PreOperational),
            _ => log::warn!("ignoring unknown NMT command 0x{cs:02X}"),
        }
    }

    fn set_state(&self, state: NmtState) {
        self.state.set(state);
        self.emit_heartbeat();
        if let Some(listener) = self.on_state_change.lock().unwrap().as_ref() {
            listener(state);
        }
    }

    fn emit_heartbeat(&self) {
        let byte: u8 = self.state.get().into();
        self.network.send(0x700 + self.node_id as u16, &[byte]);
        self.heartbeat_sent.notify_waiters();
    }

    fn reconfigure_heartbeat(self: &Arc<Self>, millis: u16) {
        if let Some(handle) = self.heartbeat_task.lock().unwrap().take() {
            handle.abort();
        }
        if millis == 0 {
            return;
        }
        self.emit_heartbeat();

        let slave = self.clone();
        let period = Duration::from_millis(millis as u64);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                slave.emit_heartbeat();
            }
        });
        *self.heartbeat_task.lock().unwrap() = Some(handle);
    }
}
