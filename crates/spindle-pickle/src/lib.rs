//! Tensor-aware pickle (protocol 2) codec
//!
//! The encoder walks a [`Value`] tree depth-first and produces a byte
//! program a stock pickle interpreter can consume; the decoder is a stack
//! machine over the same opcode subset. Tensors travel either as
//! positions in a caller-owned side table or as literal storage records
//! appended after the program.

pub mod class;
pub mod decode;
pub mod encode;
pub mod error;
pub mod opcode;

pub use class::{PICKLE_MODULE, PicklerClass};
pub use decode::Unpickler;
pub use encode::{PROTOCOL_VERSION, Pickler};
pub use error::{PickleError, Result};
pub use opcode::OpCode;

use spindle_common::{TensorHandle, Value};

/// Encode `values` as the elements of one top-level tuple, embedding any
/// tensors literally.
pub fn encode_values(values: &[Value]) -> Result<Vec<u8>> {
    let mut pickler = Pickler::new();
    pickler.begin();
    pickler.begin_tuple();
    for value in values {
        pickler.write(value)?;
    }
    pickler.end_tuple();
    pickler.finish()?;
    Ok(pickler.into_bytes())
}

/// Encode `values` with tensors appended to `tensor_table` and written as
/// references by position.
pub fn encode_values_with_tensor_table(
    values: &[Value],
    tensor_table: &mut Vec<TensorHandle>,
) -> Result<Vec<u8>> {
    let mut pickler = Pickler::with_tensor_table(tensor_table);
    pickler.begin();
    pickler.begin_tuple();
    for value in values {
        pickler.write(value)?;
    }
    pickler.end_tuple();
    pickler.finish()?;
    Ok(pickler.into_bytes())
}

/// Decode the elements of the single top-level container in `bytes`.
pub fn decode_values(bytes: &[u8]) -> Result<Vec<Value>> {
    Unpickler::new(bytes).parse()
}

/// Decode with tensor references resolved against `tensor_table`.
pub fn decode_values_with_tensor_table(
    bytes: &[u8],
    tensor_table: &[TensorHandle],
) -> Result<Vec<Value>> {
    Unpickler::with_tensor_table(bytes, tensor_table).parse()
}
