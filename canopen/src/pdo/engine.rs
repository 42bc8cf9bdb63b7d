//! Owns a node's RPDO and TPDO maps: reads their configuration from the OD
//! at startup, runs the TPDO transmit timers, listens for RPDO frames, and
//! re-reads a map's configuration whenever a write touches its comm or
//! mapping record.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::network::Network;
use crate::nmt::{NmtState, NmtStateHandle};
use crate::node::LocalNode;

use super::map::{PdoDirection, PdoMap};

pub struct PdoEngine {
    node: Arc<LocalNode>,
    network: Arc<dyn Network>,
    nmt_state: NmtStateHandle,
    rpdo: Vec<Arc<Mutex<PdoMap>>>,
    tpdo: Vec<Arc<Mutex<PdoMap>>>,
    rpdo_tasks: Mutex<Vec<Option<JoinHandle<()>>>>,
    tpdo_tasks: Mutex<Vec<Option<JoinHandle<()>>>>,
}

impl PdoEngine {
    /// Builds the default set of maps (numbered 1..=count in each
    /// direction), best-effort reading each from the OD. A map whose comm
    /// or mapping record isn't present in this node's OD is left
    /// unconfigured (disabled, empty mapping) rather than failing
    /// construction — not every node configures every PDO slot.
    pub fn new(node: Arc<LocalNode>, network: Arc<dyn Network>, nmt_state: NmtStateHandle, rpdo_count: u8, tpdo_count: u8) -> Arc<Self> {
        let node_id = node.config.node_id;

        let rpdo: Vec<_> = (1..=rpdo_count)
            .map(|n| {
                let mut map = PdoMap::new(PdoDirection::Rx, n, node_id).expect("n starts at 1");
                if let Err(error) = map.read(&node) {
                    log::debug!("RPDO{n} not configured in OD: {error}");
                }
                Arc::new(Mutex::new(map))
            })
            .collect();

        let tpdo: Vec<_> = (1..=tpdo_count)
            .map(|n| {
                let mut map = PdoMap::new(PdoDirection::Tx, n, node_id).expect("n starts at 1");
                if let Err(error) = map.read(&node) {
                    log::debug!("TPDO{n} not configured in OD: {error}");
                }
                map.update(&node);
                Arc::new(Mutex::new(map))
            })
            .collect();

        let rpdo_tasks = Mutex::new((0..rpdo.len()).map(|_| None).collect());
        let tpdo_tasks = Mutex::new((0..tpdo.len()).map(|_| None).collect());

        Arc::new(PdoEngine { node, network, nmt_state, rpdo, tpdo, rpdo_tasks, tpdo_tasks })
    }

    pub fn rpdo(&self, number: u8) -> Option<Arc<Mutex<PdoMap>>> {
        self.rpdo.get((number - 1) as usize).cloned()
    }

    pub fn tpdo(&self, number: u8) -> Option<Arc<Mutex<PdoMap>>> {
        self.tpdo.get((number - 1) as usize).cloned()
    }

    /// Suspends until the next frame is applied to RPDO `number`, or
    /// `timeout` elapses. Returns `false` on timeout. Mirrors
    /// `wait_for_reception` on the original Python implementation's PDO map.
    pub async fn wait_for_rpdo_reception(&self, number: u8, timeout: Duration) -> bool {
        let Some(map) = self.rpdo(number) else { return false };
        let notify = map.lock().unwrap().received.clone();
        tokio::time::timeout(timeout, notify.notified()).await.is_ok()
    }

    /// Spawns the RPDO receive loops and TPDO transmit timers for every
    /// currently-enabled map, and registers the write callback that
    /// reconfigures a map when its comm/mapping record changes.
    pub fn start(self: &Arc<Self>) {
        for i in 0..self.rpdo.len() {
            self.start_rpdo_listener(i);
        }
        for i in 0..self.tpdo.len() {
            self.reconfigure_tpdo(i);
        }

        let engine = self.clone();
        self.node.add_write_callback(Arc::new(move |index, _subindex, _entry, _data| {
            engine.on_od_write(index);
        }));
    }

    /// Aborts every RPDO receive loop and TPDO transmit timer. A map's
    /// configuration and last-received data are left intact; calling
    /// [`PdoEngine::start`] again re-derives and resumes both.
    pub fn stop(&self) {
        for task in self.rpdo_tasks.lock().unwrap().iter_mut() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
        for task in self.tpdo_tasks.lock().unwrap().iter_mut() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }

    /// Called by the NMT slave on every state transition: TPDOs gate their
    /// periodic transmission on `NMT == OPERATIONAL`.
    pub fn on_nmt_state_change(self: &Arc<Self>, _state: NmtState) {
        for i in 0..self.tpdo.len() {
            self.reconfigure_tpdo(i);
        }
    }

    fn on_od_write(self: &Arc<Self>, index: u16) {
        for i in 0..self.rpdo.len() {
            let (com, map_index) = { let m = self.rpdo[i].lock().unwrap(); (m.com_index, m.map_index) };
            if index == com || index == map_index {
                if let Err(error) = self.rpdo[i].lock().unwrap().read(&self.node) {
                    log::warn!("failed to re-read RPDO config: {error}");
                }
                self.start_rpdo_listener(i);
            }
        }
        for i in 0..self.tpdo.len() {
            let (com, map_index) = { let m = self.tpdo[i].lock().unwrap(); (m.com_index, m.map_index) };
            if index == com || index == map_index {
                if let Err(error) = self.tpdo[i].lock().unwrap().read(&self.node) {
                    log::warn!("failed to re-read TPDO config: {error}");
                }
                self.reconfigure_tpdo(i);
            }
        }
    }

    fn start_rpdo_listener(self: &Arc<Self>, i: usize) {
        if let Some(handle) = self.rpdo_tasks.lock().unwrap()[i].take() {
            handle.abort();
        }

        let (enabled, cob_id) = {
            let m = self.rpdo[i].lock().unwrap();
            (m.enabled, m.cob_id)
        };
        if !enabled {
            return;
        }

        let map = self.rpdo[i].clone();
        let node = self.node.clone();
        let mut subscription = self.network.subscribe(cob_id);
        let handle = tokio::spawn(async move {
            while let Some(frame) = subscription.recv().await {
                map.lock().unwrap().apply_received(&node, &frame.data);
            }
        });
        self.rpdo_tasks.lock().unwrap()[i] = Some(handle);
    }

    /// Re-derives whether this TPDO should be transmitting and restarts its
    /// timer accordingly. The periodic task only runs for event driven
    /// (`trans_type` 254/255) maps with a nonzero event timer while NMT is
    /// `OPERATIONAL`.
    fn reconfigure_tpdo(self: &Arc<Self>, i: usize) {
        if let Some(handle) = self.tpdo_tasks.lock().unwrap()[i].take() {
            handle.abort();
        }

        let (enabled, trans_type, period_ms, cob_id) = {
            let m = self.tpdo[i].lock().unwrap();
            (m.enabled, m.trans_type, m.event_timer_ms, m.cob_id)
        };
        let event_driven = matches!(trans_type, 254 | 255);
        if !enabled || !event_driven || period_ms == 0 || self.nmt_state.get() != NmtState::Operational {
            return;
        }

        let map = self.tpdo[i].clone();
        let node = self.node.clone();
        let network = self.network.clone();
        let nmt_state = self.nmt_state.clone();
        let period = Duration::from_millis(period_ms as u64);
        {
            let mut m = map.lock().unwrap();
            m.update(&node);
            network.send(cob_id, &m.data);
        }
        let handle = tokio::spawn(async move {
            let mut next = tokio::time::Instant::now() + period;
            loop {
                tokio::time::sleep_until(next).await;
                if nmt_state.get() == NmtState::Operational {
                    let data = {
                        let mut m = map.lock().unwrap();
                        m.update(&node);
                        m.data.clone()
                    };
                    network.send(cob_id, &data);
                }
                let now = tokio::time::Instant::now();
                next = if next + period > now { next + period } else { now };
            }
        });
        self.tpdo_tasks.lock().unwrap()[i] = Some(handle);
    }
}
