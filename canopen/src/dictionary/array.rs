use std::collections::HashMap;

use super::{AccessType, DataType, Variable};

/// Like [`super::Record`] but sub-variables are homogeneous; subindex 0
/// holds the current count rather than a fixed "highest subindex" constant.
#[derive(Clone, Debug)]
pub struct Array {
    pub name: String,
    pub index: u16,
    index_to_variable: HashMap<u8, Variable>,
    order: Vec<u8>,
}

impl Array {
    pub fn new(index: u16, name: impl Into<String>) -> Self {
        let name = name.into();
        let mut array = Array {
            name: name.clone(),
            index,
            index_to_variable: HashMap::new(),
            order: Vec::new(),
        };
        let count = Variable::new(index, "number of entries", DataType::Unsigned8, AccessType::READ_ONLY)
            .at_subindex(0, index);
        array.index_to_variable.insert(0, count);
        array
    }

    pub fn push(&mut self, subindex: u8, var: Variable) {
        let var = var.at_subindex(subindex, self.index);
        if subindex != 0 && !self.order.contains(&subindex) {
            self.order.push(subindex);
        }
        self.index_to_variable.insert(subindex, var);
    }

    pub fn get(&self, subindex: u8) -> Option<&Variable> {
        self.index_to_variable.get(&subindex)
    }

    pub fn get_mut(&mut self, subindex: u8) -> Option<&mut Variable> {
        self.index_to_variable.get_mut(&subindex)
    }

    pub fn subindices(&self) -> &[u8] {
        &self.order
    }

    pub fn len(&self) -> u8 {
        self.order.len() as u8
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
