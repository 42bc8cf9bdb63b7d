/// Read/write permissions for an OD entry, CiA 301 `AccessType` (ro/wo/rw/const).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AccessType {
    pub read_access: bool,
    pub write_access: bool,
    /// `const`: readable, never writable over SDO/PDO once the node exists.
    pub constant: bool,
}

impl AccessType {
    pub const READ_ONLY: AccessType = AccessType { read_access: true, write_access: false, constant: false };
    pub const WRITE_ONLY: AccessType = AccessType { read_access: false, write_access: true, constant: false };
    pub const READ_WRITE: AccessType = AccessType { read_access: true, write_access: true, constant: false };
    pub const CONST: AccessType = AccessType { read_access: true, write_access: false, constant: true };

    pub fn is_readable(&self) -> bool {
        self.read_access
    }

    pub fn is_writable(&self) -> bool {
        self.write_access && !self.constant
    }
}
