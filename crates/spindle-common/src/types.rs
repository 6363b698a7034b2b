//! Scalar element types and device tags

use serde::{Deserialize, Serialize};

/// Element types a tensor storage can hold.
///
/// The variant names double as the storage class names on the wire
/// (`Float` becomes a `FloatStorage` global), so they must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Float,
    Double,
    Half,
    Long,
    Int,
    Short,
    Char,
    Byte,
    Bool,
}

impl ScalarType {
    /// Size of one element in bytes.
    pub fn element_size(self) -> usize {
        match self {
            ScalarType::Double | ScalarType::Long => 8,
            ScalarType::Float | ScalarType::Int => 4,
            ScalarType::Half | ScalarType::Short => 2,
            ScalarType::Char | ScalarType::Byte | ScalarType::Bool => 1,
        }
    }

    /// Canonical name, as used to form storage class identifiers.
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Float => "Float",
            ScalarType::Double => "Double",
            ScalarType::Half => "Half",
            ScalarType::Long => "Long",
            ScalarType::Int => "Int",
            ScalarType::Short => "Short",
            ScalarType::Char => "Char",
            ScalarType::Byte => "Byte",
            ScalarType::Bool => "Bool",
        }
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Where a storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    Cuda(usize),
}

impl Device {
    pub fn is_cpu(self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::Cpu
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}
