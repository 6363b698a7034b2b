//! The two custom reconstructor classes this dialect knows

use crate::error::{PickleError, Result};

/// Module that exports the custom reconstructors on the consumer side.
pub const PICKLE_MODULE: &str = "torch.jit._pickle";

/// Custom classes reconstructed by REDUCE/BUILD.
///
/// The discriminants are the integer tags legacy `__main__` streams carry
/// in place of a class marker.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PicklerClass {
    Tensor = 0,
    IntList = 1,
}

impl PicklerClass {
    /// Reconstructor name the encoder writes.
    pub fn name(self) -> &'static str {
        match self {
            PicklerClass::Tensor => "build_tensor_from_id",
            PicklerClass::IntList => "build_intlist",
        }
    }

    /// Resolve a reconstructor name, accepting the aliases older writers
    /// emitted.
    pub fn from_name(module: &str, name: &str) -> Result<Self> {
        match name {
            "build_tensor_from_id" | "TensorID" => Ok(PicklerClass::Tensor),
            "build_intlist" | "IntList" => Ok(PicklerClass::IntList),
            _ => Err(PickleError::UnknownGlobal {
                module: module.to_owned(),
                name: name.to_owned(),
            }),
        }
    }

    /// Resolve a legacy integer tag.
    pub fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            0 => Some(PicklerClass::Tensor),
            1 => Some(PicklerClass::IntList),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PicklerClass;

    #[test]
    fn names_resolve_with_aliases() {
        for (name, cls) in [
            ("build_tensor_from_id", PicklerClass::Tensor),
            ("TensorID", PicklerClass::Tensor),
            ("build_intlist", PicklerClass::IntList),
            ("IntList", PicklerClass::IntList),
        ] {
            assert_eq!(PicklerClass::from_name("torch.jit._pickle", name).unwrap(), cls);
        }
        assert!(PicklerClass::from_name("torch.jit._pickle", "build_floatlist").is_err());
    }

    #[test]
    fn tags_match_discriminants() {
        assert_eq!(PicklerClass::from_tag(0), Some(PicklerClass::Tensor));
        assert_eq!(PicklerClass::from_tag(1), Some(PicklerClass::IntList));
        assert_eq!(PicklerClass::from_tag(2), None);
        assert_eq!(PicklerClass::from_tag(-1), None);
    }
}
