//! Emergency producer: emits the 8-byte EMCY frame on COB-ID `0x80 + node_id`,
//! de-duplicating on the last emitted error code.

use std::sync::{Arc, Mutex};

use crate::network::Network;

pub struct EmcyProducer {
    node_id: u8,
    network: Arc<dyn Network>,
    last_code: Mutex<Option<u16>>,
}

impl EmcyProducer {
    pub fn new(node_id: u8, network: Arc<dyn Network>) -> Self {
        EmcyProducer { node_id, network, last_code: Mutex::new(None) }
    }

    pub fn cob_id(&self) -> u16 {
        0x80 + self.node_id as u16
    }

    /// Emits `[err_code_lo, err_code_hi, err_register, mfr_specific x 5]`.
    /// A repeat of the same `error_code` as the last emission is skipped.
    pub fn send(&self, error_code: u16, error_register: u8, manufacturer_specific: [u8; 5]) {
        let mut last = self.last_code.lock().unwrap();
        if *last == Some(error_code) {
            return;
        }
        *last = Some(error_code);
        drop(last);

        let [lo, hi] = error_code.to_le_bytes();
        let mut frame = [0u8; 8];
        frame[0] = lo;
        frame[1] = hi;
        frame[2] = error_register;
        frame[3..8].copy_from_slice(&manufacturer_specific);
        self.network.send(self.cob_id(), &frame);
    }

    /// Clears the de-duplication state so the next `send` always emits,
    /// regardless of whether it repeats the previous code (CiA 301 uses
    /// error code 0x0000 itself as the "error cleared" signal).
    pub fn reset(&self) {
        *self.last_code.lock().unwrap() = None;
    }
}
