//! Depth-first pickle encoder
//!
//! Walks a [`Value`] tree in emission order, appending opcodes and
//! operands onto an in-memory buffer. Repeated container identities are
//! collapsed into memo back-references; tensors either go through the
//! caller's side table or are staged for literal emission after STOP.

use std::collections::HashMap;

use spindle_common::{IntListObject, ObjectId, TensorHandle, Value};

use crate::class::{PICKLE_MODULE, PicklerClass};
use crate::error::{PickleError, Result};
use crate::opcode::OpCode;

/// The one pickle protocol this codec speaks.
pub const PROTOCOL_VERSION: u8 = 2;

/// Archive magic number, 10 little-endian bytes of 0x1950a86a20f9469cfc6c.
const ARCHIVE_MAGIC: [u8; 10] = [0x6c, 0xfc, 0x9c, 0x46, 0xf9, 0x20, 0x6a, 0xa8, 0x50, 0x19];

/// Archive format version carried by the preamble.
const ARCHIVE_VERSION: u16 = 1001;

/// Encoder for one pickle session.
///
/// Construct with [`Pickler::new`] for literal tensor embedding or
/// [`Pickler::with_tensor_table`] to encode tensors as side-table
/// references. The buffer, memo state, and staged tensors all live for
/// exactly one session.
pub struct Pickler<'a> {
    buffer: Vec<u8>,
    /// Container identity -> memo id, for values.
    memo: HashMap<ObjectId, u32>,
    /// Textual global -> memo id. Globals are keyed by string because the
    /// same logical global may be rebuilt as a fresh string each time.
    global_memo: HashMap<String, u32>,
    /// Next memo id to hand out; u64 so exhaustion is detectable.
    next_memo_id: u64,
    tensor_table: Option<&'a mut Vec<TensorHandle>>,
    literal_tensors: Vec<TensorHandle>,
}

impl<'a> Pickler<'a> {
    /// Literal mode: tensors are embedded after the program.
    pub fn new() -> Self {
        Pickler {
            buffer: Vec::new(),
            memo: HashMap::new(),
            global_memo: HashMap::new(),
            next_memo_id: 0,
            tensor_table: None,
            literal_tensors: Vec::new(),
        }
    }

    /// Reference mode: tensors are appended to `tensor_table` and encoded
    /// by their position in it.
    pub fn with_tensor_table(tensor_table: &'a mut Vec<TensorHandle>) -> Self {
        Pickler { tensor_table: Some(tensor_table), ..Pickler::new() }
    }

    /// Emit PROTO. Call exactly once at the start of the session.
    pub fn begin(&mut self) {
        self.push_op(OpCode::Proto);
        self.buffer.push(PROTOCOL_VERSION);
    }

    /// Open the top-level tuple.
    pub fn begin_tuple(&mut self) {
        self.push_op(OpCode::Mark);
    }

    /// Close the top-level tuple.
    pub fn end_tuple(&mut self) {
        self.push_op(OpCode::Tuple);
    }

    /// Append one value's encoding.
    pub fn write(&mut self, value: &Value) -> Result<()> {
        if let Some(id) = value.object_id() {
            if let Some(&memo_id) = self.memo.get(&id) {
                self.emit_get(memo_id);
                return Ok(());
            }
        }
        match value {
            Value::None => self.push_op(OpCode::None),
            Value::Bool(true) => self.push_op(OpCode::NewTrue),
            Value::Bool(false) => self.push_op(OpCode::NewFalse),
            Value::Int(n) => self.write_int(*n),
            Value::Double(d) => self.write_double(*d),
            Value::String(s) => {
                self.write_unicode(s.as_str());
                self.memoize(s.id())?;
            }
            Value::List(list) => {
                self.push_op(OpCode::EmptyList);
                self.memoize(list.id())?;
                self.push_op(OpCode::Mark);
                for item in list.elements().iter() {
                    self.write(item)?;
                }
                self.push_op(OpCode::Appends);
            }
            Value::Tuple(tuple) => {
                self.push_op(OpCode::Mark);
                for item in tuple.elements() {
                    self.write(item)?;
                }
                self.push_op(OpCode::Tuple);
                self.memoize(tuple.id())?;
            }
            Value::Dict(dict) => {
                self.push_op(OpCode::EmptyDict);
                self.memoize(dict.id())?;
                self.push_op(OpCode::Mark);
                // The dict's declared iteration order is authoritative.
                for (key, val) in dict.entries().iter() {
                    self.write(key)?;
                    self.write(val)?;
                }
                self.push_op(OpCode::SetItems);
            }
            Value::IntList(list) => self.write_int_list(list)?,
            Value::Tensor(tensor) => self.write_tensor(tensor)?,
        }
        Ok(())
    }

    /// Emit STOP, then the key program and raw records for any literal
    /// tensors staged during the session.
    pub fn finish(&mut self) -> Result<()> {
        self.push_op(OpCode::Stop);

        if !self.literal_tensors.is_empty() {
            // A second complete program listing each tensor's storage key,
            // so the archive layer can locate the trailing records.
            let tensors = std::mem::take(&mut self.literal_tensors);
            self.begin();
            self.push_op(OpCode::Mark);
            for tensor in &tensors {
                let key = tensor.storage_key().to_string();
                self.write_unicode(&key);
            }
            self.push_op(OpCode::Tuple);
            self.push_op(OpCode::Stop);

            for tensor in &tensors {
                self.write_tensor_record(tensor);
            }
        }
        tracing::debug!(bytes = self.buffer.len(), "pickle encode finished");
        Ok(())
    }

    /// Borrow the accumulated output.
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the session, yielding the output buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Emit the three standalone programs an archive carries ahead of the
    /// main program: magic number, format version, and system info.
    pub fn write_archive_preamble(&mut self) {
        self.begin();
        self.push_op(OpCode::Long1);
        self.buffer.push(ARCHIVE_MAGIC.len() as u8);
        self.buffer.extend_from_slice(&ARCHIVE_MAGIC);
        self.push_op(OpCode::Stop);

        self.begin();
        self.push_op(OpCode::BinInt2);
        self.buffer.extend_from_slice(&ARCHIVE_VERSION.to_le_bytes());
        self.push_op(OpCode::Stop);

        // System info is ignored on load, an empty dict suffices.
        self.begin();
        self.push_op(OpCode::EmptyDict);
        self.push_op(OpCode::Stop);
    }

    fn push_op(&mut self, op: OpCode) {
        self.buffer.push(op as u8);
    }

    /// Opcode selection is strictly by range: one signed byte, four
    /// little-endian bytes, or an 8-byte LONG1.
    fn write_int(&mut self, n: i64) {
        if (i64::from(i8::MIN)..=i64::from(i8::MAX)).contains(&n) {
            self.push_op(OpCode::BinInt1);
            self.buffer.push(n as i8 as u8);
        } else if (i64::from(i32::MIN)..=i64::from(i32::MAX)).contains(&n) {
            self.push_op(OpCode::BinInt);
            self.buffer.extend_from_slice(&(n as i32).to_le_bytes());
        } else {
            self.push_op(OpCode::Long1);
            self.buffer.push(8);
            self.buffer.extend_from_slice(&n.to_le_bytes());
        }
    }

    /// Pickle floats are big-endian on the wire.
    fn write_double(&mut self, d: f64) {
        self.push_op(OpCode::BinFloat);
        self.buffer.extend_from_slice(&d.to_be_bytes());
    }

    fn write_unicode(&mut self, s: &str) {
        self.push_op(OpCode::BinUnicode);
        self.buffer.extend_from_slice(&(s.len() as u32).to_le_bytes());
        self.buffer.extend_from_slice(s.as_bytes());
    }

    /// A string operand that gets a memo slot of its own on every
    /// emission (fresh identity each time, never a GET).
    fn write_memoized_str(&mut self, s: &str) -> Result<()> {
        self.write_unicode(s);
        self.emit_put()?;
        Ok(())
    }

    /// Allocate the next memo id and emit the matching PUT.
    fn emit_put(&mut self) -> Result<u32> {
        if self.next_memo_id > u64::from(u32::MAX) {
            return Err(PickleError::TooManyMemoIds);
        }
        let memo_id = self.next_memo_id as u32;
        self.next_memo_id += 1;
        if memo_id <= u32::from(u8::MAX) {
            self.push_op(OpCode::BinPut);
            self.buffer.push(memo_id as u8);
        } else {
            self.push_op(OpCode::LongBinPut);
            self.buffer.extend_from_slice(&memo_id.to_le_bytes());
        }
        Ok(memo_id)
    }

    /// PUT binding the container identity, so later emissions GET it.
    fn memoize(&mut self, id: ObjectId) -> Result<()> {
        let memo_id = self.emit_put()?;
        self.memo.insert(id, memo_id);
        Ok(())
    }

    fn emit_get(&mut self, memo_id: u32) {
        if memo_id <= u32::from(u8::MAX) {
            self.push_op(OpCode::BinGet);
            self.buffer.push(memo_id as u8);
        } else {
            self.push_op(OpCode::LongBinGet);
            self.buffer.extend_from_slice(&memo_id.to_le_bytes());
        }
    }

    /// `name` is the full `module\nname\n` pair. First emission writes
    /// GLOBAL and a PUT; later emissions of the same text GET it.
    fn write_global(&mut self, name: &str) -> Result<()> {
        if let Some(&memo_id) = self.global_memo.get(name) {
            self.emit_get(memo_id);
            return Ok(());
        }
        self.push_op(OpCode::Global);
        self.buffer.extend_from_slice(name.as_bytes());
        let memo_id = self.emit_put()?;
        self.global_memo.insert(name.to_owned(), memo_id);
        Ok(())
    }

    fn write_class(&mut self, cls: PicklerClass) -> Result<()> {
        self.write_global(&format!("{PICKLE_MODULE}\n{}\n", cls.name()))
    }

    /// Reduce arguments are spread before calling the reconstructor, so
    /// the backing list travels inside a one-element tuple.
    fn write_int_list(&mut self, list: &IntListObject) -> Result<()> {
        self.write_class(PicklerClass::IntList)?;
        self.push_op(OpCode::Mark);

        self.push_op(OpCode::EmptyList);
        self.emit_put()?;
        self.push_op(OpCode::Mark);
        for &item in list.elements().iter() {
            self.write_int(item);
        }
        self.push_op(OpCode::Appends);

        self.push_op(OpCode::Tuple);
        self.push_op(OpCode::Reduce);
        self.memoize(list.id())?;
        Ok(())
    }

    fn write_tensor(&mut self, tensor: &TensorHandle) -> Result<()> {
        if let Some(table) = self.tensor_table.as_deref_mut() {
            table.push(tensor.clone());
            let tensor_id = table.len() as i64 - 1;
            self.write_class(PicklerClass::Tensor)?;
            self.push_op(OpCode::Mark);
            self.write_int(tensor_id);
            self.push_op(OpCode::Tuple);
            self.push_op(OpCode::Reduce);
            Ok(())
        } else {
            self.write_literal_tensor(tensor)
        }
    }

    /// Literal tensors ride along in the same binary: the program carries
    /// the rebuild call and a persistent id naming the storage, the bytes
    /// follow after STOP. Byte strings cap out at 4 GiB, so the raw
    /// storage cannot live inside the program itself.
    fn write_literal_tensor(&mut self, tensor: &TensorHandle) -> Result<()> {
        // Arguments: storage, storage_offset, size, stride, requires_grad,
        // backward_hooks.
        self.write_global("torch._utils\n_rebuild_tensor_v2\n")?;
        self.push_op(OpCode::Mark);

        // Persistent id tuple handed to the consumer's persistent_load.
        self.push_op(OpCode::Mark);
        self.write_memoized_str("storage")?;
        let storage_class = format!("torch\n{}Storage\n", tensor.scalar_type().name());
        self.write_global(&storage_class)?;
        self.write_memoized_str(&tensor.storage_key().to_string())?;
        self.write_memoized_str("cpu")?;
        self.write_int(tensor.numel());
        self.push_op(OpCode::None);
        self.push_op(OpCode::Tuple);
        self.push_op(OpCode::BinPersid);

        // Storage offset.
        self.write_int(0);

        self.push_op(OpCode::Mark);
        for &size in tensor.sizes() {
            self.write_int(size);
        }
        self.push_op(OpCode::Tuple);

        self.push_op(OpCode::Mark);
        for &stride in tensor.strides() {
            self.write_int(stride);
        }
        self.push_op(OpCode::Tuple);

        if tensor.requires_grad() {
            self.push_op(OpCode::NewTrue);
        } else {
            self.push_op(OpCode::NewFalse);
        }

        // Empty ordered dict for the backward hooks.
        self.write_global("collections\nOrderedDict\n")?;
        self.push_op(OpCode::EmptyTuple);
        self.push_op(OpCode::Reduce);

        self.push_op(OpCode::Tuple);
        self.push_op(OpCode::Reduce);

        self.literal_tensors.push(tensor.clone());
        Ok(())
    }

    /// One trailing record: 8-byte little-endian element count, then the
    /// whole storage's bytes.
    fn write_tensor_record(&mut self, tensor: &TensorHandle) {
        self.buffer.extend_from_slice(&tensor.numel().to_le_bytes());
        let (cpu_tensor, record_size) = tensor.writeable_tensor();
        let data = cpu_tensor.storage().data();
        self.buffer.extend_from_slice(&data[..record_size as usize]);
    }
}

impl Default for Pickler<'_> {
    fn default() -> Self {
        Self::new()
    }
}
