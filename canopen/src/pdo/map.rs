use std::sync::Arc;

use tokio::sync::Notify;

use crate::codec;
use crate::dictionary::OdValue;
use crate::node::LocalNode;

use super::error::PdoConfigError;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PdoDirection {
    Rx,
    Tx,
}

/// One entry of a PDO mapping record: an OD variable plus the bit offset it
/// occupies within the assembled frame.
#[derive(Clone, Debug)]
pub struct MappedVariable {
    pub index: u16,
    pub subindex: u8,
    pub bit_offset: u16,
    pub bit_length: u16,
}

pub fn pack_descriptor(index: u16, subindex: u8, bit_length: u8) -> u32 {
    (index as u32) << 16 | (subindex as u32) << 8 | bit_length as u32
}

pub fn unpack_descriptor(descriptor: u32) -> (u16, u8, u8) {
    let index = (descriptor >> 16) as u16;
    let subindex = ((descriptor >> 8) & 0xFF) as u8;
    let bit_length = (descriptor & 0xFF) as u8;
    (index, subindex, bit_length)
}

/// One configured RPDO or TPDO. Mirrors the fields of the CiA 301
/// communication and mapping records it was read from, plus the assembled
/// frame buffer.
pub struct PdoMap {
    pub number: u8,
    pub direction: PdoDirection,
    pub com_index: u16,
    pub map_index: u16,
    pub cob_id: u16,
    pub enabled: bool,
    pub trans_type: u8,
    pub event_timer_ms: u16,
    pub mapping: Vec<MappedVariable>,
    pub data: Vec<u8>,
    /// Notified every time [`PdoMap::apply_received`] stores a fresh frame;
    /// lets a caller await the next reception instead of polling `data`.
    pub received: Arc<Notify>,
}

/// Default COB-IDs from the CiA 301 predefined connection set, valid only
/// for PDO numbers 1..4; beyond that a node has no default and must be
/// configured explicitly before use.
pub fn default_cob_id(direction: PdoDirection, number: u8, node_id: u8) -> Option<u16> {
    let base = match (direction, number) {
        (PdoDirection::Rx, 1) => 0x200,
        (PdoDirection::Rx, 2) => 0x300,
        (PdoDirection::Rx, 3) => 0x400,
        (PdoDirection::Rx, 4) => 0x500,
        (PdoDirection::Tx, 1) => 0x180,
        (PdoDirection::Tx, 2) => 0x280,
        (PdoDirection::Tx, 3) => 0x380,
        (PdoDirection::Tx, 4) => 0x480,
        _ => return None,
    };
    Some(base + node_id as u16)
}

impl PdoMap {
    /// PDO numbers are 1-based (there is no PDO 0); `number == 0` is
    /// rejected here rather than underflowing the comm/mapping index
    /// arithmetic below.
    pub fn new(direction: PdoDirection, number: u8, node_id: u8) -> Result<Self, PdoConfigError> {
        if number == 0 {
            return Err(PdoConfigError::InvalidPdoNumber(number));
        }
        let (com_base, map_base) = match direction {
            PdoDirection::Rx => (0x1400u16, 0x1600u16),
            PdoDirection::Tx => (0x1800u16, 0x1A00u16),
        };
        let n = (number - 1) as u16;
        Ok(PdoMap {
            number,
            direction,
            com_index: com_base + n,
            map_index: map_base + n,
            cob_id: default_cob_id(direction, number, node_id).unwrap_or(0),
            enabled: default_cob_id(direction, number, node_id).is_some(),
            trans_type: 255,
            event_timer_ms: 0,
            mapping: Vec::new(),
            data: Vec::new(),
            received: Arc::new(Notify::new()),
        })
    }

    /// Resolves the communication record (subindex 1: cob_id + enabled,
    /// subindex 2: transmission type, subindex 5: event timer) and the
    /// mapping record (subindex 0: count, subindex 1..n: descriptors),
    /// then reallocates `data` to fit.
    pub fn read(&mut self, node: &LocalNode) -> Result<(), PdoConfigError> {
        let comm_field = read_u32(node, self.com_index, 1)?;
        self.cob_id = (comm_field & 0x7FF) as u16;
        self.enabled = comm_field & 0x8000_0000 == 0;
        self.trans_type = read_u8(node, self.com_index, 2).unwrap_or(self.trans_type);
        self.event_timer_ms = read_u16(node, self.com_index, 5).unwrap_or(0);

        let count = read_u8(node, self.map_index, 0)?;
        let mut mapping = Vec::with_capacity(count as usize);
        let mut bit_offset = 0u16;
        for slot in 1..=count {
            let descriptor = read_u32(node, self.map_index, slot)?;
            let (index, subindex, bit_length) = unpack_descriptor(descriptor);
            let entry = node
                .dictionary()
                .get_variable(index, subindex)
                .ok_or(crate::sdo::SdoAbortedError::OBJECT_DOES_NOT_EXIST)?;
            if entry.bit_length != bit_length as u16 {
                return Err(PdoConfigError::BitLengthMismatch {
                    index,
                    subindex,
                    declared: bit_length as u16,
                    actual: entry.bit_length,
                });
            }
            mapping.push(MappedVariable { index, subindex, bit_offset, bit_length: bit_length as u16 });
            bit_offset += bit_length as u16;
        }

        if bit_offset > 64 {
            return Err(PdoConfigError::MappingTooWide { total_bits: bit_offset, count: mapping.len() });
        }

        self.mapping = mapping;
        self.data = vec![0u8; (bit_offset as usize).div_ceil(8)];
        Ok(())
    }

    /// Writes the mapping and communication records back to the OD, in the
    /// order {disable, new transmission type, clear mapping count, new
    /// mapping entries, new mapping count, re-enable} so a bus master never
    /// observes a half-written mapping on an active PDO.
    pub fn save(&self, node: &LocalNode) -> Result<(), PdoConfigError> {
        write_u32(node, self.com_index, 1, (self.cob_id as u32) | 0x8000_0000)?;
        write_u8(node, self.com_index, 2, self.trans_type)?;
        write_u16(node, self.com_index, 5, self.event_timer_ms)?;

        write_u8(node, self.map_index, 0, 0)?;
        for (slot, mapped) in self.mapping.iter().enumerate() {
            let descriptor = pack_descriptor(mapped.index, mapped.subindex, mapped.bit_length as u8);
            write_u32(node, self.map_index, (slot + 1) as u8, descriptor)?;
        }
        write_u8(node, self.map_index, 0, self.mapping.len() as u8)?;

        if self.enabled {
            write_u32(node, self.com_index, 1, self.cob_id as u32)?;
        }
        Ok(())
    }

    /// Fetches current bytes for every mapped variable from the node's data
    /// path and splices them into `data` at the right bit offset.
    pub fn update(&mut self, node: &LocalNode) {
        for mapped in &self.mapping {
            let Ok(bytes) = node.get_data(mapped.index, mapped.subindex) else { continue };
            splice_bits(&mut self.data, mapped.bit_offset, mapped.bit_length, &bytes);
        }
    }

    /// Stores an inbound frame payload and propagates each mapped
    /// variable's slice back into the node's data store, which is how an
    /// RPDO arrival becomes visible through SDO.
    pub fn apply_received(&mut self, node: &LocalNode, payload: &[u8]) {
        self.data = payload.to_vec();
        for mapped in &self.mapping {
            let bytes = extract_bits(&self.data, mapped.bit_offset, mapped.bit_length);
            let _ = node.set_data(mapped.index, mapped.subindex, bytes, true);
        }
        self.received.notify_waiters();
    }
}

fn splice_bits(data: &mut [u8], bit_offset: u16, bit_length: u16, value: &[u8]) {
    if bit_offset % 8 == 0 && bit_length % 8 == 0 {
        let start = (bit_offset / 8) as usize;
        let len = (bit_length / 8) as usize;
        if start + len <= data.len() {
            data[start..start + len].copy_from_slice(&value[..len.min(value.len())]);
        }
        return;
    }
    for bit in 0..bit_length {
        let src_bit = value.get((bit / 8) as usize).map(|b| (b >> (bit % 8)) & 1).unwrap_or(0);
        set_bit(data, bit_offset + bit, src_bit != 0);
    }
}

fn extract_bits(data: &[u8], bit_offset: u16, bit_length: u16) -> Vec<u8> {
    if bit_offset % 8 == 0 && bit_length % 8 == 0 {
        let start = (bit_offset / 8) as usize;
        let len = (bit_length / 8) as usize;
        return data.get(start..start + len).map(<[u8]>::to_vec).unwrap_or_else(|| vec![0u8; len]);
    }
    let mut out = vec![0u8; (bit_length as usize).div_ceil(8)];
    for bit in 0..bit_length {
        if get_bit(data, bit_offset + bit) {
            out[(bit / 8) as usize] |= 1 << (bit % 8);
        }
    }
    out
}

fn get_bit(data: &[u8], bit: u16) -> bool {
    data.get((bit / 8) as usize).map(|b| (b >> (bit % 8)) & 1 != 0).unwrap_or(false)
}

fn set_bit(data: &mut [u8], bit: u16, value: bool) {
    if let Some(byte) = data.get_mut((bit / 8) as usize) {
        if value {
            *byte |= 1 << (bit % 8);
        } else {
            *byte &= !(1 << (bit % 8));
        }
    }
}

fn read_u8(node: &LocalNode, index: u16, subindex: u8) -> Result<u8, PdoConfigError> {
    match node.read_typed(index, subindex)? {
        OdValue::U8(v) => Ok(v),
        other => Ok(other.as_i128().unwrap_or(0) as u8),
    }
}

fn read_u16(node: &LocalNode, index: u16, subindex: u8) -> Result<u16, PdoConfigError> {
    match node.read_typed(index, subindex)? {
        OdValue::U16(v) => Ok(v),
        other => Ok(other.as_i128().unwrap_or(0) as u16),
    }
}

fn read_u32(node: &LocalNode, index: u16, subindex: u8) -> Result<u32, PdoConfigError> {
    match node.read_typed(index, subindex)? {
        OdValue::U32(v) => Ok(v),
        other => Ok(other.as_i128().unwrap_or(0) as u32),
    }
}

fn write_u8(node: &LocalNode, index: u16, subindex: u8, value: u8) -> Result<(), PdoConfigError> {
    write_raw(node, index, subindex, OdValue::U8(value))
}

fn write_u16(node: &LocalNode, index: u16, subindex: u8, value: u16) -> Result<(), PdoConfigError> {
    write_raw(node, index, subindex, OdValue::U16(value))
}

fn write_u32(node: &LocalNode, index: u16, subindex: u8, value: u32) -> Result<(), PdoConfigError> {
    write_raw(node, index, subindex, OdValue::U32(value))
}

fn write_raw(node: &LocalNode, index: u16, subindex: u8, value: OdValue) -> Result<(), PdoConfigError> {
    let entry = node.dictionary().get_variable(index, subindex).ok_or(crate::sdo::SdoAbortedError::OBJECT_DOES_NOT_EXIST)?;
    let bytes = codec::encode(entry, &value, false).map_err(|_| crate::sdo::SdoAbortedError::DATA_CANNOT_BE_TRANSFERRED)?;
    node.set_data(index, subindex, bytes, false)?;
    Ok(())
}
