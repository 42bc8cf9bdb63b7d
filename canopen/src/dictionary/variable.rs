use std::collections::HashMap;

use super::{AccessType, DataType, OdValue};

/// A leaf OD entry. Either standalone (`subindex == 0`, `parent == None`) or
/// reachable through exactly one [`super::Record`]/[`super::Array`], whose
/// index is kept here as a plain back-reference rather than an owning link
/// (the dictionary owns every `Variable`; nothing owns a `Variable` twice).
#[derive(Clone, Debug)]
pub struct Variable {
    pub index: u16,
    pub subindex: u8,
    pub name: String,
    pub data_type: DataType,
    pub bit_length: u16,
    pub access: AccessType,
    pub pdo_mappable: bool,
    pub default: Option<OdValue>,
    pub min: Option<OdValue>,
    pub max: Option<OdValue>,
    pub factor: f64,
    pub unit: String,
    pub value_descriptions: HashMap<i128, String>,
    /// EDS `ParameterValue` equivalent: an application-provided initial
    /// value distinct from `default`, consulted before it in the read
    /// resolution order.
    pub parameter_value: Option<OdValue>,
    pub parent: Option<u16>,
}

impl Variable {
    /// Builds a standalone variable (`subindex = 0`, no parent). Records and
    /// arrays wrap this with their own subindex assignment.
    pub fn new(index: u16, name: impl Into<String>, data_type: DataType, access: AccessType) -> Self {
        let bit_length = data_type.fixed_bit_width().unwrap_or(0);
        Variable {
            index,
            subindex: 0,
            name: name.into(),
            data_type,
            bit_length,
            access,
            pdo_mappable: false,
            default: None,
            min: None,
            max: None,
            factor: 1.0,
            unit: String::new(),
            value_descriptions: HashMap::new(),
            parameter_value: None,
            parent: None,
        }
    }

    pub fn with_bit_length(mut self, bit_length: u16) -> Self {
        self.bit_length = bit_length;
        self
    }

    pub fn with_default(mut self, default: OdValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_range(mut self, min: OdValue, max: OdValue) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn pdo_mappable(mut self) -> Self {
        self.pdo_mappable = true;
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub(crate) fn at_subindex(mut self, subindex: u8, parent: u16) -> Self {
        self.subindex = subindex;
        self.parent = Some(parent);
        self
    }

    /// Length in bytes of the byte-aligned wire representation, per the
    /// codec's convention that integer/float types are always byte-aligned
    /// in the OD (fractional widths only ever occur inside a PDO frame).
    pub fn byte_length(&self) -> usize {
        (self.bit_length as usize).div_ceil(8)
    }
}
