use num_enum::{IntoPrimitive, TryFromPrimitive};

/// CiA 301 basic data type codes (object 0x0002..0x001B in the data type area).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum DataType {
    Boolean = 0x0001,
    Integer8 = 0x0002,
    Integer16 = 0x0003,
    Integer32 = 0x0004,
    Unsigned8 = 0x0005,
    Unsigned16 = 0x0006,
    Unsigned32 = 0x0007,
    Real32 = 0x0008,
    VisibleString = 0x0009,
    OctetString = 0x000A,
    UnicodeString = 0x000B,
    Domain = 0x000F,
    Integer64 = 0x0015,
    Unsigned64 = 0x001B,
    Real64 = 0x0011,
}

impl DataType {
    /// Width in bits for the fixed-size numeric types; `None` for the
    /// variable-length string/domain types (their width is whatever the
    /// OD entry's `bit_length` says).
    pub fn fixed_bit_width(self) -> Option<u16> {
        match self {
            DataType::Boolean => Some(1),
            DataType::Integer8 | DataType::Unsigned8 => Some(8),
            DataType::Integer16 | DataType::Unsigned16 => Some(16),
            DataType::Integer32 | DataType::Unsigned32 | DataType::Real32 => Some(32),
            DataType::Integer64 | DataType::Unsigned64 | DataType::Real64 => Some(64),
            DataType::VisibleString
            | DataType::OctetString
            | DataType::UnicodeString
            | DataType::Domain => None,
        }
    }

    pub fn is_signed_integer(self) -> bool {
        matches!(
            self,
            DataType::Integer8 | DataType::Integer16 | DataType::Integer32 | DataType::Integer64
        )
    }

    pub fn is_unsigned_integer(self) -> bool {
        matches!(
            self,
            DataType::Boolean
                | DataType::Unsigned8
                | DataType::Unsigned16
                | DataType::Unsigned32
                | DataType::Unsigned64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::Real32 | DataType::Real64)
    }

    pub fn is_string_or_domain(self) -> bool {
        matches!(
            self,
            DataType::VisibleString
                | DataType::OctetString
                | DataType::UnicodeString
                | DataType::Domain
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fixed_width_matches_cia301() {
        assert_eq!(DataType::Unsigned32.fixed_bit_width(), Some(32));
        assert_eq!(DataType::VisibleString.fixed_bit_width(), None);
    }
}
