//! The local node: owns the Object Dictionary, the authoritative current-value
//! store, and the read/write callback fabric that couples SDO, the PDO
//! engine, NMT and user code together.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::codec;
use crate::dictionary::{ObjectDictionary, OdValue, Variable};
use crate::sdo::SdoAbortedError;

/// `(index, subindex) -> Option<raw bytes>`. Callbacks run in registration
/// order; the first to return `Some` wins.
pub type ReadCallback = Arc<dyn Fn(u16, u8, &Variable) -> Option<Vec<u8>> + Send + Sync>;
/// `(index, subindex, raw bytes) -> ()`, invoked after a value has been
/// committed to the data store.
pub type WriteCallback = Arc<dyn Fn(u16, u8, &Variable, &[u8]) + Send + Sync>;

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub node_id: u8,
    pub sdo_timeout: Duration,
    /// Allowed heartbeat emission jitter before a peer is considered to have
    /// missed a beat; purely advisory, the producer itself is jitter-free
    /// beyond one scheduler quantum.
    pub heartbeat_jitter_tolerance: Duration,
}

impl NodeConfig {
    pub fn new(node_id: u8) -> Self {
        Self {
            node_id,
            sdo_timeout: Duration::from_millis(1000),
            heartbeat_jitter_tolerance: Duration::from_millis(100),
        }
    }
}

#[derive(Default, Clone)]
struct Callbacks {
    read: Vec<ReadCallback>,
    write: Vec<WriteCallback>,
}

/// Owns the OD (shared read-only with every subsystem) and the data store
/// (current values, authoritative). A single mutex protects both the store
/// and the callback lists; callbacks always run with the lock released so a
/// callback can freely call back into `get_data`/`set_data` without
/// deadlocking.
pub struct LocalNode {
    pub config: NodeConfig,
    dictionary: ObjectDictionary,
    data_store: Mutex<HashMap<(u16, u8), Vec<u8>>>,
    callbacks: Mutex<Callbacks>,
}

impl LocalNode {
    pub fn new(config: NodeConfig, dictionary: ObjectDictionary) -> Self {
        LocalNode {
            config,
            dictionary,
            data_store: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Callbacks::default()),
        }
    }

    pub fn dictionary(&self) -> &ObjectDictionary {
        &self.dictionary
    }

    pub fn add_read_callback(&self, callback: ReadCallback) {
        self.callbacks.lock().unwrap().read.push(callback);
    }

    pub fn add_write_callback(&self, callback: WriteCallback) {
        self.callbacks.lock().unwrap().write.push(callback);
    }

    fn resolve(&self, index: u16, subindex: u8) -> Result<&Variable, SdoAbortedError> {
        let object = self.dictionary.get(index).ok_or(SdoAbortedError::OBJECT_DOES_NOT_EXIST)?;
        object.get(subindex).ok_or(SdoAbortedError::SUBINDEX_DOES_NOT_EXIST)
    }

    /// Read resolution order: read-callbacks (first non-null wins) ->
    /// data store -> `parameter_value` -> `default` -> zero of the correct
    /// width.
    pub fn get_data(&self, index: u16, subindex: u8) -> Result<Vec<u8>, SdoAbortedError> {
        let entry = self.resolve(index, subindex)?;
        if !entry.access.is_readable() {
            return Err(SdoAbortedError::WRITE_ONLY);
        }

        let read_callbacks = self.callbacks.lock().unwrap().read.clone();
        for callback in &read_callbacks {
            if let Some(bytes) = callback(index, subindex, entry) {
                return Ok(bytes);
            }
        }

        if let Some(bytes) = self.data_store.lock().unwrap().get(&(index, subindex)) {
            return Ok(bytes.clone());
        }

        if let Some(value) = &entry.parameter_value {
            return codec::encode(entry, value, false).map_err(|_| SdoAbortedError::DATA_CANNOT_BE_TRANSFERRED);
        }
        if let Some(value) = &entry.default {
            return codec::encode(entry, value, false).map_err(|_| SdoAbortedError::DATA_CANNOT_BE_TRANSFERRED);
        }

        Ok(vec![0u8; entry.byte_length().max(1)])
    }

    /// Stores `data` for `(index, subindex)` and fires every write-callback,
    /// in registration order, with the store lock released.
    pub fn set_data(&self, index: u16, subindex: u8, data: Vec<u8>, check_writable: bool) -> Result<(), SdoAbortedError> {
        let entry = self.resolve(index, subindex)?.clone();
        if check_writable && !entry.access.is_writable() {
            return Err(SdoAbortedError::READ_ONLY);
        }

        self.data_store.lock().unwrap().insert((index, subindex), data.clone());

        let write_callbacks = self.callbacks.lock().unwrap().write.clone();
        for callback in &write_callbacks {
            callback(index, subindex, &entry, &data);
        }
        Ok(())
    }

    pub fn read_typed(&self, index: u16, subindex: u8) -> Result<OdValue, SdoAbortedError> {
        let entry = self.resolve(index, subindex)?;
        let bytes = self.get_data(index, subindex)?;
        codec::decode(entry, &bytes).map_err(|_| SdoAbortedError::DATA_CANNOT_BE_TRANSFERRED)
    }

    pub fn write_typed(&self, index: u16, subindex: u8, value: &OdValue, check_writable: bool) -> Result<(), SdoAbortedError> {
        let entry = self.resolve(index, subindex)?;
        let bytes = codec::encode(entry, value, false).map_err(|_| SdoAbortedError::DATA_CANNOT_BE_TRANSFERRED)?;
        self.set_data(index, subindex, bytes, check_writable)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dictionary::{AccessType, DataType, Variable};

    fn od_with_one_var() -> ObjectDictionary {
        let var = Variable::new(0x2000, "x", DataType::Unsigned32, AccessType::READ_WRITE)
            .with_default(OdValue::U32(7));
        ObjectDictionary::builder().variable(var).unwrap().build().unwrap()
    }

    #[test]
    fn falls_back_to_default_when_unset() {
        let node = LocalNode::new(NodeConfig::new(2), od_with_one_var());
        assert_eq!(node.read_typed(0x2000, 0).unwrap(), OdValue::U32(7));
    }

    #[test]
    fn set_then_get_round_trips() {
        let node = LocalNode::new(NodeConfig::new(2), od_with_one_var());
        node.write_typed(0x2000, 0, &OdValue::U32(0x1234), true).unwrap();
        assert_eq!(node.read_typed(0x2000, 0).unwrap(), OdValue::U32(0x1234));
    }

    #[test]
    fn write_callback_observes_new_value() {
        let node = LocalNode::new(NodeConfig::new(2), od_with_one_var());
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        node.add_write_callback(Arc::new(move |index, subindex, _entry, data| {
            *seen_clone.lock().unwrap() = Some((index, subindex, data.to_vec()));
        }));
        node.write_typed(0x2000, 0, &OdValue::U32(9), true).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some((0x2000, 0, 9u32.to_le_bytes().to_vec())));
    }

    #[test]
    fn nonexistent_index_aborts() {
        let node = LocalNode::new(NodeConfig::new(2), od_with_one_var());
        let err = node.get_data(0x1234, 0).unwrap_err();
        assert_eq!(err.code(), 0x0602_0000);
    }

    #[test]
    fn nonexistent_subindex_aborts() {
        let node = LocalNode::new(NodeConfig::new(2), od_with_one_var());
        let err = node.get_data(0x2000, 5).unwrap_err();
        assert_eq!(err.code(), 0x0609_0011);
    }

    #[test]
    fn read_write_through_array_entry() {
        use crate::dictionary::Array;

        let mut array = Array::new(0x2100, "measurements");
        array.push(1, Variable::new(0x2100, "channel 1", DataType::Unsigned16, AccessType::READ_WRITE).with_default(OdValue::U16(0)));
        array.push(2, Variable::new(0x2100, "channel 2", DataType::Unsigned16, AccessType::READ_WRITE).with_default(OdValue::U16(0)));
        let od = ObjectDictionary::builder().array(array).unwrap().build().unwrap();
        let node = LocalNode::new(NodeConfig::new(2), od);

        assert_eq!(node.read_typed(0x2100, 1).unwrap(), OdValue::U16(0));
        node.write_typed(0x2100, 2, &OdValue::U16(0x55), true).unwrap();
        assert_eq!(node.read_typed(0x2100, 2).unwrap(), OdValue::U16(0x55));
        let err = node.get_data(0x2100, 3).unwrap_err();
        assert_eq!(err.code(), 0x0609_0011);
    }
}
