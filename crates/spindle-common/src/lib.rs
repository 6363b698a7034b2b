//! Shared value and tensor types for the spindle runtime
//!
//! This crate provides the dynamic [`Value`] type the serialization layer
//! operates on, together with the tensor handle and storage abstractions
//! it references.

pub mod tensor;
pub mod types;
pub mod value;

pub use tensor::{Storage, TensorHandle};
pub use types::{Device, ScalarType};
pub use value::{DictObject, IntListObject, ListObject, ObjectId, StrObject, TupleObject, Value};
