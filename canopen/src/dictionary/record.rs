use std::collections::HashMap;

use super::{AccessType, DataType, OdValue, Variable};

/// A named group of heterogeneous sub-variables keyed by subindex 1..n.
/// Subindex 0 is always present and holds the implicit "highest subindex
/// supported" UNSIGNED8.
#[derive(Clone, Debug)]
pub struct Record {
    pub name: String,
    pub index: u16,
    index_to_variable: HashMap<u8, Variable>,
    name_to_subindex: HashMap<String, u8>,
    order: Vec<u8>,
}

impl Record {
    pub fn new(index: u16, name: impl Into<String>) -> Self {
        let name = name.into();
        let mut record = Record {
            name: name.clone(),
            index,
            index_to_variable: HashMap::new(),
            name_to_subindex: HashMap::new(),
            order: Vec::new(),
        };
        record.push_highest_subindex();
        record
    }

    fn push_highest_subindex(&mut self) {
        let count = Variable::new(self.index, "highest sub-index supported", DataType::Unsigned8, AccessType::READ_ONLY)
            .at_subindex(0, self.index);
        self.insert(count);
    }

    /// Inserts (or replaces) a sub-variable at `var.subindex`, preserving
    /// insertion order for subindices other than 0. Subindex 0's default is
    /// refreshed to the new highest subindex afterwards, so callers never
    /// patch it by hand.
    pub fn push(&mut self, subindex: u8, var: Variable) {
        let var = var.at_subindex(subindex, self.index);
        self.insert(var);
        let highest = self.highest_subindex();
        if let Some(count) = self.index_to_variable.get_mut(&0) {
            count.default = Some(OdValue::U8(highest));
        }
    }

    fn insert(&mut self, var: Variable) {
        let subindex = var.subindex;
        if subindex != 0 && !self.order.contains(&subindex) {
            self.order.push(subindex);
        }
        self.name_to_subindex.insert(var.name.clone(), subindex);
        self.index_to_variable.insert(subindex, var);
    }

    pub fn get(&self, subindex: u8) -> Option<&Variable> {
        self.index_to_variable.get(&subindex)
    }

    pub fn get_mut(&mut self, subindex: u8) -> Option<&mut Variable> {
        self.index_to_variable.get_mut(&subindex)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Variable> {
        let subindex = *self.name_to_subindex.get(name)?;
        self.index_to_variable.get(&subindex)
    }

    /// Subindices in insertion order, excluding 0.
    pub fn subindices(&self) -> &[u8] {
        &self.order
    }

    pub fn highest_subindex(&self) -> u8 {
        self.order.iter().copied().max().unwrap_or(0)
    }
}
