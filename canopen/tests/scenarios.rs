//! End-to-end scenarios: two nodes (IDs 2 and 3) sharing a [`VirtualBus`],
//! exercised the same way a real master would — raw SDO/NMT/PDO frames over
//! the shared bus, never by poking the other node's `LocalNode` directly.

use std::sync::Arc;
use std::time::Duration;

use assert2::{assert, let_assert};

use canopen::dictionary::{AccessType, DataType, ObjectDictionary, OdValue, Record, Variable};
use canopen::network::{Network, VirtualBus};
use canopen::node::NodeConfig;
use canopen::nmt::NmtState;
use canopen::pdo::pack_descriptor;
use canopen::Node;

fn build_dictionary(node_id: u8) -> ObjectDictionary {
    let builder = ObjectDictionary::builder()
        .variable(
            Variable::new(0x1008, "device name", DataType::VisibleString, AccessType::READ_WRITE)
                .with_bit_length(16 * 8),
        )
        .unwrap()
        .variable(
            Variable::new(0x1017, "producer heartbeat time", DataType::Unsigned16, AccessType::READ_WRITE)
                .with_default(OdValue::U16(0)),
        )
        .unwrap()
        .variable(Variable::new(0x2004, "test u16", DataType::Unsigned16, AccessType::READ_WRITE).with_default(OdValue::U16(0)))
        .unwrap()
        .variable(mapped_u32(0x2013, "rpdo mapped a"))
        .unwrap()
        .variable(mapped_u32(0x2010, "rpdo mapped b"))
        .unwrap()
        .variable(mapped_u32(0x2033, "tpdo mapped a"))
        .unwrap()
        .variable(mapped_u32(0x2030, "tpdo mapped b"))
        .unwrap();

    let mut identity = Record::new(0x1018, "identity object");
    identity.push(
        1,
        Variable::new(0x1018, "vendor id", DataType::Unsigned32, AccessType::READ_ONLY).with_default(OdValue::U32(0)),
    );

    let mut rpdo1_comm = Record::new(0x1400, "RPDO1 communication parameter");
    rpdo1_comm.push(1, Variable::new(0x1400, "cob id", DataType::Unsigned32, AccessType::READ_WRITE).with_default(OdValue::U32(0x200 + node_id as u32)));
    rpdo1_comm.push(2, Variable::new(0x1400, "transmission type", DataType::Unsigned8, AccessType::READ_WRITE).with_default(OdValue::U8(255)));
    rpdo1_comm.push(5, Variable::new(0x1400, "event timer", DataType::Unsigned16, AccessType::READ_WRITE).with_default(OdValue::U16(0)));

    let mut rpdo1_map = Record::new(0x1600, "RPDO1 mapping parameter");
    rpdo1_map.push(1, Variable::new(0x1600, "mapped 1", DataType::Unsigned32, AccessType::READ_WRITE).with_default(OdValue::U32(pack_descriptor(0x2013, 0, 32))));
    rpdo1_map.push(2, Variable::new(0x1600, "mapped 2", DataType::Unsigned32, AccessType::READ_WRITE).with_default(OdValue::U32(pack_descriptor(0x2010, 0, 32))));

    let mut tpdo2_comm = Record::new(0x1801, "TPDO2 communication parameter");
    tpdo2_comm.push(1, Variable::new(0x1801, "cob id", DataType::Unsigned32, AccessType::READ_WRITE).with_default(OdValue::U32(0x280 + node_id as u32)));
    tpdo2_comm.push(2, Variable::new(0x1801, "transmission type", DataType::Unsigned8, AccessType::READ_WRITE).with_default(OdValue::U8(255)));
    tpdo2_comm.push(5, Variable::new(0x1801, "event timer", DataType::Unsigned16, AccessType::READ_WRITE).with_default(OdValue::U16(0)));

    let mut tpdo2_map = Record::new(0x1A01, "TPDO2 mapping parameter");
    tpdo2_map.push(1, Variable::new(0x1A01, "mapped 1", DataType::Unsigned32, AccessType::READ_WRITE).with_default(OdValue::U32(pack_descriptor(0x2033, 0, 32))));
    tpdo2_map.push(2, Variable::new(0x1A01, "mapped 2", DataType::Unsigned32, AccessType::READ_WRITE).with_default(OdValue::U32(pack_descriptor(0x2030, 0, 32))));

    builder
        .record(identity)
        .unwrap()
        .record(rpdo1_comm)
        .unwrap()
        .record(rpdo1_map)
        .unwrap()
        .record(tpdo2_comm)
        .unwrap()
        .record(tpdo2_map)
        .unwrap()
        .build()
        .unwrap()
}

fn mapped_u32(index: u16, name: &str) -> Variable {
    Variable::new(index, name, DataType::Unsigned32, AccessType::READ_WRITE)
        .with_default(OdValue::U32(0))
        .pdo_mappable()
}

fn spawn_node(node_id: u8, bus: &VirtualBus) -> Arc<Node> {
    let network: Arc<dyn Network> = Arc::new(bus.handle());
    let node = Arc::new(Node::new(NodeConfig::new(node_id), build_dictionary(node_id), network));
    node.start();
    node
}

async fn sdo_upload(network: &Arc<dyn Network>, node_id: u8, index: u16, subindex: u8) -> Result<Vec<u8>, u32> {
    let mut responses = network.subscribe(0x580 + node_id as u16);
    let mut request = [0u8; 8];
    request[0] = 0x40;
    request[1..3].copy_from_slice(&index.to_le_bytes());
    request[3] = subindex;
    network.send(0x600 + node_id as u16, &request);

    let response = responses.recv_timeout(Duration::from_millis(500)).await.expect("sdo upload response");
    if response.data[0] == 0x80 {
        return Err(u32::from_le_bytes(response.data[4..8].try_into().unwrap()));
    }
    if response.data[0] & 0x02 != 0 {
        let n = ((response.data[0] >> 2) & 0x3) as usize;
        return Ok(response.data[4..4 + (4 - n)].to_vec());
    }

    let total = u32::from_le_bytes(response.data[4..8].try_into().unwrap()) as usize;
    let mut collected = Vec::with_capacity(total);
    let mut toggle = false;
    loop {
        let mut segment = [0u8; 8];
        segment[0] = 0x60 | ((toggle as u8) << 4);
        network.send(0x600 + node_id as u16, &segment);
        let response = responses.recv_timeout(Duration::from_millis(500)).await.expect("sdo segment response");
        if response.data[0] == 0x80 {
            return Err(u32::from_le_bytes(response.data[4..8].try_into().unwrap()));
        }
        let n = 7 - (((response.data[0] >> 1) & 0x7) as usize);
        collected.extend_from_slice(&response.data[1..1 + n]);
        let last = response.data[0] & 0x01 != 0;
        toggle = !toggle;
        if last {
            break;
        }
    }
    Ok(collected)
}

async fn sdo_download(network: &Arc<dyn Network>, node_id: u8, index: u16, subindex: u8, data: &[u8]) -> Result<(), u32> {
    let mut responses = network.subscribe(0x580 + node_id as u16);

    if data.len() <= 4 {
        let n = 4 - data.len();
        let mut request = [0u8; 8];
        request[0] = 0x23 | ((n as u8) << 2);
        request[1..3].copy_from_slice(&index.to_le_bytes());
        request[3] = subindex;
        request[4..4 + data.len()].copy_from_slice(data);
        network.send(0x600 + node_id as u16, &request);
        let response = responses.recv_timeout(Duration::from_millis(500)).await.expect("sdo download response");
        if response.data[0] == 0x80 {
            return Err(u32::from_le_bytes(response.data[4..8].try_into().unwrap()));
        }
        return Ok(());
    }

    let mut request = [0u8; 8];
    request[0] = 0x21;
    request[1..3].copy_from_slice(&index.to_le_bytes());
    request[3] = subindex;
    request[4..8].copy_from_slice(&(data.len() as u32).to_le_bytes());
    network.send(0x600 + node_id as u16, &request);
    let response = responses.recv_timeout(Duration::from_millis(500)).await.expect("initiate download response");
    if response.data[0] == 0x80 {
        return Err(u32::from_le_bytes(response.data[4..8].try_into().unwrap()));
    }

    let chunks: Vec<&[u8]> = data.chunks(7).collect();
    let mut toggle = false;
    for (i, chunk) in chunks.iter().enumerate() {
        let last = i == chunks.len() - 1;
        let unused = 7 - chunk.len();
        let mut segment = [0u8; 8];
        segment[0] = ((toggle as u8) << 4) | ((unused as u8) << 1) | (last as u8);
        segment[1..1 + chunk.len()].copy_from_slice(chunk);
        network.send(0x600 + node_id as u16, &segment);
        let response = responses.recv_timeout(Duration::from_millis(500)).await.expect("segment download response");
        if response.data[0] == 0x80 {
            return Err(u32::from_le_bytes(response.data[4..8].try_into().unwrap()));
        }
        toggle = !toggle;
    }
    Ok(())
}

fn send_nmt(network: &Arc<dyn Network>, cs: u8, target_id: u8) {
    network.send(0, &[cs, target_id]);
}

#[tokio::test]
async fn s1_local_write_is_visible_to_remote_sdo_read() {
    let bus = VirtualBus::new();
    let node2 = spawn_node(2, &bus);
    let _node3 = spawn_node(3, &bus);
    let remote: Arc<dyn Network> = Arc::new(bus.handle());

    node2.local.write_typed(0x1400, 1, &OdValue::U32(0x99), true).unwrap();

    let bytes = sdo_upload(&remote, 2, 0x1400, 1).await.unwrap();
    assert!(u32::from_le_bytes(bytes.try_into().unwrap()) == 0x99);
}

#[tokio::test]
async fn s2_segmented_string_round_trips_over_sdo() {
    let bus = VirtualBus::new();
    let _node2 = spawn_node(2, &bus);
    let remote: Arc<dyn Network> = Arc::new(bus.handle());

    let text = b"Some cool device";
    sdo_download(&remote, 2, 0x1008, 0, text).await.unwrap();
    let bytes = sdo_upload(&remote, 2, 0x1008, 0).await.unwrap();
    assert!(bytes == text);
}

#[tokio::test]
async fn s3_remote_write_is_visible_to_local_read() {
    let bus = VirtualBus::new();
    let node2 = spawn_node(2, &bus);
    let remote: Arc<dyn Network> = Arc::new(bus.handle());

    sdo_download(&remote, 2, 0x2004, 0, &0xFEFFu16.to_le_bytes()).await.unwrap();
    assert!(node2.local.read_typed(0x2004, 0).unwrap() == OdValue::U16(0xFEFF));
}

#[tokio::test(start_paused = true)]
async fn s4_heartbeat_time_write_starts_producer() {
    let bus = VirtualBus::new();
    let node2 = spawn_node(2, &bus);
    let remote: Arc<dyn Network> = Arc::new(bus.handle());
    let mut heartbeats = remote.subscribe(0x700 + 2);

    sdo_download(&remote, 2, 0x1017, 0, &1000u16.to_le_bytes()).await.unwrap();

    let frame = heartbeats.recv_timeout(Duration::from_millis(1100)).await.expect("heartbeat within 1.1s");
    assert!(frame.data == vec![127]);
    assert!(node2.nmt.state() == NmtState::PreOperational);
}

#[tokio::test]
async fn s5_broadcast_stop_affects_both_nodes() {
    let bus = VirtualBus::new();
    let node2 = spawn_node(2, &bus);
    let node3 = spawn_node(3, &bus);
    let remote: Arc<dyn Network> = Arc::new(bus.handle());

    send_nmt(&remote, 2, 0);
    tokio::task::yield_now().await;

    assert!(node2.nmt.state() == NmtState::Stopped);
    assert!(node3.nmt.state() == NmtState::Stopped);
}

#[tokio::test]
async fn s6_rpdo_reception_writes_back_into_od() {
    let bus = VirtualBus::new();
    let node2 = spawn_node(2, &bus);
    let remote: Arc<dyn Network> = Arc::new(bus.handle());

    let payload = [0x67, 0x00, 0x00, 0x00, 0x89, 0x00, 0x00, 0x00];
    remote.send(0x200 + 2, &payload);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let_assert!(OdValue::U32(a) = node2.local.read_typed(0x2013, 0).unwrap());
    let_assert!(OdValue::U32(b) = node2.local.read_typed(0x2010, 0).unwrap());
    assert!(a == 0x67);
    assert!(b == 0x89);
}

#[tokio::test(start_paused = true)]
async fn s7_tpdo_transmits_after_operational_and_event_timer_set() {
    let bus = VirtualBus::new();
    let node2 = spawn_node(2, &bus);
    let remote: Arc<dyn Network> = Arc::new(bus.handle());
    let mut tpdo2 = remote.subscribe(0x280 + 2);

    sdo_download(&remote, 2, 0x2033, 0, &0x1234u32.to_le_bytes()).await.unwrap();
    sdo_download(&remote, 2, 0x2030, 0, &0xABCDu32.to_le_bytes()).await.unwrap();
    sdo_download(&remote, 2, 0x1801, 5, &100u16.to_le_bytes()).await.unwrap();
    send_nmt(&remote, 1, 2);

    tokio::time::sleep(Duration::from_millis(500)).await;

    let map = node2.pdo.tpdo(2).expect("tpdo2 configured");
    let data = map.lock().unwrap().data.clone();
    assert!(data == vec![0x34, 0x12, 0x00, 0x00, 0xCD, 0xAB, 0x00, 0x00]);

    let frame = tpdo2.try_recv().expect("tpdo2 frame observed on bus");
    assert!(frame.data == data);
}

#[tokio::test]
async fn s8_upload_of_missing_index_aborts() {
    let bus = VirtualBus::new();
    let _node2 = spawn_node(2, &bus);
    let remote: Arc<dyn Network> = Arc::new(bus.handle());

    let err = sdo_upload(&remote, 2, 0x1234, 0).await.unwrap_err();
    assert!(err == 0x0602_0000);
}

#[tokio::test]
async fn s9_upload_of_missing_subindex_aborts() {
    let bus = VirtualBus::new();
    let _node2 = spawn_node(2, &bus);
    let remote: Arc<dyn Network> = Arc::new(bus.handle());

    let err = sdo_upload(&remote, 2, 0x1018, 100).await.unwrap_err();
    assert!(err == 0x0609_0011);
}
