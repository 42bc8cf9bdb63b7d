use thiserror::Error;

use crate::sdo::SdoAbortedError;

#[derive(Debug, Error)]
pub enum PdoConfigError {
    #[error("PDO number {0} is out of range")]
    InvalidPdoNumber(u8),

    #[error("mapping descriptor for 0x{index:04X}:{subindex} declares bit_length {declared}, but the OD entry is {actual} bits")]
    BitLengthMismatch { index: u16, subindex: u8, declared: u16, actual: u16 },

    #[error("mapping exceeds 64 bits total ({total_bits} bits across {count} entries)")]
    MappingTooWide { total_bits: u16, count: usize },

    #[error(transparent)]
    Sdo(#[from] SdoAbortedError),
}
