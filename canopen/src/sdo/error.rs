use thiserror::Error;

/// A CANopen SDO abort code (CiA 301 §7.2.4.3), surfaced both as the payload
/// of an outgoing abort frame and as the error type for in-process OD
/// access when a request is syntactically valid but semantically refused.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("SDO abort 0x{0:08X}")]
pub struct SdoAbortedError(pub u32);

impl SdoAbortedError {
    pub const READ_ONLY: Self = Self(0x0601_0001);
    pub const WRITE_ONLY: Self = Self(0x0601_0002);
    pub const OBJECT_DOES_NOT_EXIST: Self = Self(0x0602_0000);
    pub const SUBINDEX_DOES_NOT_EXIST: Self = Self(0x0609_0011);
    pub const RESOURCE_NOT_AVAILABLE: Self = Self(0x060A_0023);
    pub const COMMAND_SPECIFIER_INVALID: Self = Self(0x0504_0001);
    pub const TOGGLE_BIT_NOT_ALTERNATED: Self = Self(0x0504_0003);
    pub const DATA_CANNOT_BE_TRANSFERRED: Self = Self(0x0800_0020);

    pub fn code(&self) -> u32 {
        self.0
    }
}

/// Protocol-level failure local to this side of the exchange: unexpected
/// command specifier, toggle mismatch, timeout. Always aborts the session.
#[derive(Debug, Error)]
pub enum SdoCommunicationError {
    #[error("unexpected command specifier 0x{0:02X}")]
    UnexpectedCommandSpecifier(u8),
    #[error("toggle bit not alternated")]
    ToggleMismatch,
    #[error("request timed out")]
    Timeout,
    #[error("segment buffer overflow")]
    BufferOverflow,
    #[error("remote aborted the transfer with code 0x{0:08X}")]
    RemoteAborted(u32),
}
