use thiserror::Error;

/// Malformed OD input, raised only while a dictionary is being built.
/// Never surfaced at runtime — by the time a node is constructed the OD is
/// known-good and immutable.
#[derive(Debug, Error)]
pub enum ObjectDictionaryError {
    #[error("index 0x{index:04X} is already in use")]
    DuplicateIndex { index: u16 },

    #[error("subindex {subindex} of 0x{index:04X} is already in use")]
    DuplicateSubindex { index: u16, subindex: u8 },

    #[error("variable 0x{index:04X}:{subindex} has pdo_mappable = true but bit_length {bit_length} is not one of 1, 8, 16, 24, 32, 64")]
    InvalidPdoMappableWidth { index: u16, subindex: u8, bit_length: u16 },

    #[error("variable 0x{index:04X}:{subindex} has default value outside [min, max]")]
    DefaultOutOfRange { index: u16, subindex: u8 },

    #[error("variable 0x{index:04X}:{subindex} names an encodable range for value_descriptions that data_type {data_type:?} cannot represent")]
    ValueDescriptionOutOfRange { index: u16, subindex: u8, data_type: super::DataType },
}
