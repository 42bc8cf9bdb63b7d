use std::collections::HashMap;

use super::{Array, ObjectDictionaryError, ObjectType, Record, Variable};

/// The node's addressable state surface: an ordered mapping from 16-bit
/// index to OD entry. Built once via [`ObjectDictionaryBuilder`] and never
/// mutated afterwards — current values live in the node's data store, not
/// here (see the module-level docs on [`crate::node::LocalNode`]).
#[derive(Clone, Debug, Default)]
pub struct ObjectDictionary {
    objects: HashMap<u16, ObjectType>,
    name_to_index: HashMap<String, u16>,
}

impl ObjectDictionary {
    pub fn builder() -> ObjectDictionaryBuilder {
        ObjectDictionaryBuilder::new()
    }

    pub fn get(&self, index: u16) -> Option<&ObjectType> {
        self.objects.get(&index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&ObjectType> {
        let index = *self.name_to_index.get(name)?;
        self.objects.get(&index)
    }

    /// Resolves a leaf variable directly, the lookup the codec, SDO server
    /// and PDO engine all go through.
    pub fn get_variable(&self, index: u16, subindex: u8) -> Option<&Variable> {
        self.objects.get(&index)?.get(subindex)
    }

    pub fn contains_index(&self, index: u16) -> bool {
        self.objects.contains_key(&index)
    }

    pub fn indices(&self) -> impl Iterator<Item = u16> + '_ {
        self.objects.keys().copied()
    }
}

pub struct ObjectDictionaryBuilder {
    objects: HashMap<u16, ObjectType>,
    name_to_index: HashMap<String, u16>,
}

impl ObjectDictionaryBuilder {
    pub fn new() -> Self {
        Self { objects: HashMap::new(), name_to_index: HashMap::new() }
    }

    pub fn variable(mut self, var: Variable) -> Result<Self, ObjectDictionaryError> {
        validate_variable(&var)?;
        self.insert(var.index, var.name.clone(), ObjectType::Variable(var))?;
        Ok(self)
    }

    pub fn record(mut self, record: Record) -> Result<Self, ObjectDictionaryError> {
        for subindex in record.subindices() {
            validate_variable(record.get(*subindex).expect("subindex came from record's own index"))?;
        }
        let index = record.index;
        let name = record.name.clone();
        self.insert(index, name, ObjectType::Record(record))?;
        Ok(self)
    }

    pub fn array(mut self, array: Array) -> Result<Self, ObjectDictionaryError> {
        for subindex in array.subindices() {
            validate_variable(array.get(*subindex).expect("subindex came from array's own index"))?;
        }
        let index = array.index;
        let name = array.name.clone();
        self.insert(index, name, ObjectType::Array(array))?;
        Ok(self)
    }

    fn insert(&mut self, index: u16, name: String, object: ObjectType) -> Result<(), ObjectDictionaryError> {
        if self.objects.contains_key(&index) {
            return Err(ObjectDictionaryError::DuplicateIndex { index });
        }
        self.name_to_index.insert(name, index);
        self.objects.insert(index, object);
        Ok(())
    }

    pub fn build(self) -> Result<ObjectDictionary, ObjectDictionaryError> {
        Ok(ObjectDictionary { objects: self.objects, name_to_index: self.name_to_index })
    }
}

impl Default for ObjectDictionaryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_variable(var: &Variable) -> Result<(), ObjectDictionaryError> {
    if var.pdo_mappable && !matches!(var.bit_length, 1 | 8 | 16 | 24 | 32 | 64) {
        return Err(ObjectDictionaryError::InvalidPdoMappableWidth {
            index: var.index,
            subindex: var.subindex,
            bit_length: var.bit_length,
        });
    }

    if let (Some(min), Some(default), Some(max)) = (&var.min, &var.default, &var.max) {
        if let (Some(min), Some(default), Some(max)) = (min.as_i128(), default.as_i128(), max.as_i128()) {
            if !(min <= default && default <= max) {
                return Err(ObjectDictionaryError::DefaultOutOfRange { index: var.index, subindex: var.subindex });
            }
        }
    }

    for key in var.value_descriptions.keys() {
        let in_range = match (var.data_type.is_signed_integer(), var.data_type.is_unsigned_integer()) {
            (true, _) => encodable_signed_range(var.bit_length).contains(key),
            (_, true) => encodable_unsigned_range(var.bit_length).contains(key),
            _ => true,
        };
        if !in_range {
            return Err(ObjectDictionaryError::ValueDescriptionOutOfRange {
                index: var.index,
                subindex: var.subindex,
                data_type: var.data_type,
            });
        }
    }

    Ok(())
}

fn encodable_signed_range(bit_length: u16) -> std::ops::RangeInclusive<i128> {
    if bit_length == 0 || bit_length > 64 {
        return 0..=0;
    }
    let half = 1i128 << (bit_length - 1);
    -half..=(half - 1)
}

fn encodable_unsigned_range(bit_length: u16) -> std::ops::RangeInclusive<i128> {
    if bit_length == 0 || bit_length > 64 {
        return 0..=0;
    }
    0..=((1i128 << bit_length) - 1)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dictionary::{AccessType, DataType, OdValue};

    #[test]
    fn accepts_well_formed_array() {
        let mut array = Array::new(0x2100, "measurements");
        array.push(1, Variable::new(0x2100, "channel 1", DataType::Unsigned16, AccessType::READ_WRITE).with_default(OdValue::U16(0)));
        array.push(2, Variable::new(0x2100, "channel 2", DataType::Unsigned16, AccessType::READ_WRITE).with_default(OdValue::U16(0)));
        let od = ObjectDictionary::builder().array(array).unwrap().build().unwrap();
        assert_eq!(od.get_variable(0x2100, 1).unwrap().name, "channel 1");
        assert_eq!(od.get_variable(0x2100, 2).unwrap().name, "channel 2");
        assert!(od.get_variable(0x2100, 3).is_none());
    }

    #[test]
    fn rejects_duplicate_index() {
        let a = Variable::new(0x2000, "a", DataType::Unsigned8, AccessType::READ_WRITE);
        let b = Variable::new(0x2000, "b", DataType::Unsigned8, AccessType::READ_WRITE);
        let err = ObjectDictionary::builder().variable(a).unwrap().variable(b).unwrap_err();
        assert!(matches!(err, ObjectDictionaryError::DuplicateIndex { index: 0x2000 }));
    }

    #[test]
    fn rejects_bad_pdo_mappable_width() {
        let var = Variable::new(0x2001, "a", DataType::Unsigned32, AccessType::READ_WRITE)
            .with_bit_length(20)
            .pdo_mappable();
        let err = ObjectDictionary::builder().variable(var).unwrap_err();
        assert!(matches!(err, ObjectDictionaryError::InvalidPdoMappableWidth { .. }));
    }

    #[test]
    fn accepts_well_formed_record() {
        let mut record = Record::new(0x1400, "RPDO1 communication parameter");
        record.push(1, Variable::new(0x1400, "cob id", DataType::Unsigned32, AccessType::READ_WRITE)
            .with_default(OdValue::U32(0x200)));
        let od = ObjectDictionary::builder().record(record).unwrap().build().unwrap();
        assert_eq!(od.get_variable(0x1400, 1).unwrap().name, "cob id");
    }
}
