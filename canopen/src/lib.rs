//! CANopen (CiA 301) slave node core: object dictionary, SDO server, PDO
//! engine, NMT slave and heartbeat producer, and EMCY producer, wired
//! together over a COB-ID demultiplexing hub.
//!
//! The crate has no opinion on the transport beyond the [`network::Network`]
//! trait: [`network::VirtualBus`] wires two or more [`Node`]s together
//! in-process for tests, [`network::CanBusNetwork`] adapts a real SocketCAN
//! interface via `can-socket`.

pub mod codec;
pub mod dictionary;
pub mod emcy;
pub mod network;
pub mod nmt;
pub mod node;
pub mod pdo;
pub mod sdo;

use std::sync::{Arc, Mutex};

use dictionary::ObjectDictionary;
use emcy::EmcyProducer;
use network::Network;
use nmt::NmtSlave;
use node::{LocalNode, NodeConfig};
use pdo::PdoEngine;
use sdo::SdoServer;
use tokio::task::JoinHandle;

/// Default number of RPDO/TPDO slots a [`Node`] provisions when none is
/// requested explicitly; CiA 301's predefined connection set only covers
/// the first four of each, matching [`pdo::default_cob_id`].
pub const DEFAULT_PDO_COUNT: u8 = 4;

/// A complete slave node: the object dictionary and data store
/// ([`LocalNode`]), bound to an SDO server, PDO engine, NMT slave and EMCY
/// producer over one [`Network`]. Constructing one does not start any
/// background task; call [`Node::start`] once the object dictionary is
/// fully populated and the network is ready to carry traffic.
pub struct Node {
    pub local: Arc<LocalNode>,
    pub sdo: Arc<SdoServer>,
    pub pdo: Arc<PdoEngine>,
    pub nmt: Arc<NmtSlave>,
    pub emcy: Arc<EmcyProducer>,
    network: Arc<dyn Network>,
    sdo_task: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    pub fn new(config: NodeConfig, dictionary: ObjectDictionary, network: Arc<dyn Network>) -> Self {
        Self::with_pdo_counts(config, dictionary, network, DEFAULT_PDO_COUNT, DEFAULT_PDO_COUNT)
    }

    pub fn with_pdo_counts(
        config: NodeConfig,
        dictionary: ObjectDictionary,
        network: Arc<dyn Network>,
        rpdo_count: u8,
        tpdo_count: u8,
    ) -> Self {
        let node_id = config.node_id;
        let local = Arc::new(LocalNode::new(config, dictionary));
        let sdo = Arc::new(SdoServer::new(local.clone(), node_id));
        let nmt = NmtSlave::new(local.clone(), network.clone());
        let pdo = PdoEngine::new(local.clone(), network.clone(), nmt.state_handle(), rpdo_count, tpdo_count);
        let emcy = Arc::new(EmcyProducer::new(node_id, network.clone()));

        nmt.on_state_change({
            let pdo = pdo.clone();
            Arc::new(move |state| pdo.on_nmt_state_change(state))
        });

        Node { local, sdo, pdo, nmt, emcy, network, sdo_task: Mutex::new(None) }
    }

    /// Subscribes the SDO server to its request COB-ID, starts the PDO
    /// engine's listeners/timers and the NMT slave's command loop and
    /// heartbeat producer. Mirrors `associate_network` in the original
    /// Python implementation: after this call the node reacts to bus
    /// traffic without further driving from the caller.
    pub fn start(self: &Arc<Self>) {
        let sdo = self.sdo.clone();
        let mut requests = self.network.subscribe(sdo.rx_cob_id());
        let tx_cob_id = sdo.tx_cob_id();
        let network = self.network.clone();
        let handle = tokio::spawn(async move {
            while let Some(frame) = requests.recv().await {
                if let Some(response) = sdo.handle_request(&frame.data) {
                    network.send(tx_cob_id, &response);
                }
            }
        });
        *self.sdo_task.lock().unwrap() = Some(handle);

        self.pdo.start();
        self.nmt.start();
    }

    /// Graceful shutdown: aborts the SDO request loop, every PDO timer/
    /// receive loop and the NMT command loop/heartbeat producer, and drops
    /// this node's subscriptions from the network. Every listed task is a
    /// plain `abort()`, which takes effect immediately rather than on the
    /// task's own schedule, so this completes synchronously.
    pub fn remove_network(&self) {
        if let Some(handle) = self.sdo_task.lock().unwrap().take() {
            handle.abort();
        }
        self.pdo.stop();
        self.nmt.stop();
    }

    /// Alias for [`Node::remove_network`], matching the generic shutdown
    /// name most callers reach for first.
    pub fn stop(&self) {
        self.remove_network();
    }
}
