use crate::memory::LogicalValue;
use crate::types::RegisterId;
use serde::{Deserialize, Serialize};

/// A storage element holding a single value, created when a memory is small
/// and simple enough to live in flops.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Register {
    id: RegisterId,
    initial_value: LogicalValue,
    name: Option<String>,
}

impl Register {
    pub fn new(id: RegisterId, initial_value: LogicalValue, name: Option<String>) -> Register {
        Register {
            id,
            initial_value,
            name,
        }
    }

    pub fn id(&self) -> RegisterId {
        self.id
    }

    pub fn initial_value(&self) -> &LogicalValue {
        &self.initial_value
    }

    pub(crate) fn set_initial_value(&mut self, initial_value: LogicalValue) {
        self.initial_value = initial_value;
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn bits(&self) -> usize {
        self.initial_value.bit_size()
    }
}
