use super::{Array, Record, Variable};

/// Tagged variant over the three OD entry shapes. Matching on the tag is
/// the only way to reach the underlying `Variable`/`Record`/`Array` —
/// there is no inheritance hierarchy to walk.
#[derive(Clone, Debug)]
pub enum ObjectType {
    Variable(Variable),
    Record(Record),
    Array(Array),
}

impl ObjectType {
    pub fn index(&self) -> u16 {
        match self {
            ObjectType::Variable(var) => var.index,
            ObjectType::Record(rec) => rec.index,
            ObjectType::Array(arr) => arr.index,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ObjectType::Variable(var) => &var.name,
            ObjectType::Record(rec) => &rec.name,
            ObjectType::Array(arr) => &arr.name,
        }
    }

    pub fn var(&self) -> Option<&Variable> {
        match self {
            ObjectType::Variable(var) => Some(var),
            _ => None,
        }
    }

    pub fn record(&self) -> Option<&Record> {
        match self {
            ObjectType::Record(rec) => Some(rec),
            _ => None,
        }
    }

    pub fn array(&self) -> Option<&Array> {
        match self {
            ObjectType::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Resolves a subindex to its leaf `Variable`, regardless of which
    /// variant this object is. Standalone variables only answer to
    /// subindex 0.
    pub fn get(&self, subindex: u8) -> Option<&Variable> {
        match self {
            ObjectType::Variable(var) => (subindex == 0).then_some(var),
            ObjectType::Record(rec) => rec.get(subindex),
            ObjectType::Array(arr) => arr.get(subindex),
        }
    }

    pub fn get_mut(&mut self, subindex: u8) -> Option<&mut Variable> {
        match self {
            ObjectType::Variable(var) => (subindex == 0).then_some(var),
            ObjectType::Record(rec) => rec.get_mut(subindex),
            ObjectType::Array(arr) => arr.get_mut(subindex),
        }
    }
}
