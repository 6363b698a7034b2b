//! Stack-machine pickle decoder
//!
//! Replays an opcode program against a value stack, a mark stack, and a
//! memo table. Custom classes ride the stack as marker entries until a
//! REDUCE (or the legacy NEWOBJ/BUILD pair) consumes them.

use spindle_common::{TensorHandle, Value};

use crate::class::PicklerClass;
use crate::encode::PROTOCOL_VERSION;
use crate::error::{PickleError, Result};
use crate::opcode::OpCode;

/// One slot on the working stack: a finished value, or a class marker
/// pushed by GLOBAL and awaiting its arguments. Kept separate from
/// [`Value`] so markers can never leak into decoded output.
#[derive(Debug, Clone)]
enum StackEntry {
    Value(Value),
    Class(PicklerClass),
}

impl StackEntry {
    fn into_value(self) -> Result<Value> {
        match self {
            StackEntry::Value(value) => Ok(value),
            StackEntry::Class(cls) => Err(PickleError::MalformedStream(format!(
                "class marker {cls:?} where a value was expected"
            ))),
        }
    }
}

/// Decoder for one pickle session.
///
/// Reads exactly one program (PROTO through STOP) from the front of the
/// input; trailing bytes such as literal tensor records are left
/// untouched.
pub struct Unpickler<'a> {
    input: &'a [u8],
    pos: usize,
    stack: Vec<StackEntry>,
    marks: Vec<usize>,
    memo: Vec<Option<StackEntry>>,
    tensor_table: Option<&'a [TensorHandle]>,
    last_opcode: Option<OpCode>,
}

impl<'a> Unpickler<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Unpickler {
            input,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: Vec::new(),
            tensor_table: None,
            last_opcode: None,
        }
    }

    /// Resolve tensor references against `tensor_table`, by position.
    pub fn with_tensor_table(input: &'a [u8], tensor_table: &'a [TensorHandle]) -> Self {
        Unpickler { tensor_table: Some(tensor_table), ..Unpickler::new(input) }
    }

    /// Run the program and return the elements of the single top-level
    /// container it left behind (a tuple, or a generic list from legacy
    /// writers).
    pub fn parse(mut self) -> Result<Vec<Value>> {
        self.run()?;
        if self.stack.len() != 1 {
            return Err(PickleError::MalformedStream(format!(
                "expected 1 element on the stack after STOP, found {}",
                self.stack.len()
            )));
        }
        let top = match self.stack.pop() {
            Some(entry) => entry.into_value()?,
            None => return Err(PickleError::MalformedStream("empty stack after STOP".into())),
        };
        let values = match top {
            Value::Tuple(tuple) => tuple.elements().to_vec(),
            Value::List(list) => list.to_vec(),
            other => {
                return Err(PickleError::MalformedStream(format!(
                    "top-level value must be a Tuple or List, found {}",
                    other.kind()
                )));
            }
        };
        tracing::debug!(values = values.len(), consumed = self.pos, "pickle parse finished");
        Ok(values)
    }

    fn run(&mut self) -> Result<()> {
        if self.read_opcode()? != OpCode::Proto {
            return Err(PickleError::MalformedStream(
                "expected PROTO opcode at the start of the stream".into(),
            ));
        }
        let version = self.read_u8()?;
        if version != PROTOCOL_VERSION {
            return Err(PickleError::MalformedStream(format!(
                "unsupported pickle protocol {version}, only protocol {PROTOCOL_VERSION} is \
                 supported"
            )));
        }

        loop {
            if self.pos >= self.input.len() {
                return Err(PickleError::MalformedStream(
                    "ran out of input without finding a STOP opcode".into(),
                ));
            }
            let opcode = self.read_opcode()?;
            if opcode == OpCode::Stop {
                if !self.marks.is_empty() {
                    return Err(PickleError::UnbalancedContainer(format!(
                        "{} mark(s) still open at STOP",
                        self.marks.len()
                    )));
                }
                return Ok(());
            }
            self.step(opcode)?;
            self.last_opcode = Some(opcode);
        }
    }

    fn step(&mut self, opcode: OpCode) -> Result<()> {
        match opcode {
            OpCode::Mark => self.marks.push(self.stack.len()),
            OpCode::None => self.push_value(Value::None),
            OpCode::NewTrue => self.push_value(Value::Bool(true)),
            OpCode::NewFalse => self.push_value(Value::Bool(false)),
            OpCode::BinInt1 => {
                let n = self.read_u8()? as i8;
                self.push_value(Value::Int(i64::from(n)));
            }
            OpCode::BinInt => {
                let n = self.read_i32()?;
                self.push_value(Value::Int(i64::from(n)));
            }
            OpCode::Long1 => {
                let length = self.read_u8()?;
                if length != 8 {
                    return Err(PickleError::MalformedStream(format!(
                        "LONG1 length {length} is unsupported, expected 8"
                    )));
                }
                let n = self.read_i64()?;
                self.push_value(Value::Int(n));
            }
            OpCode::BinFloat => {
                let d = self.read_f64_be()?;
                self.push_value(Value::Double(d));
            }
            OpCode::BinUnicode => {
                let length = self.read_u32()? as usize;
                let bytes = self.read_bytes(length)?;
                let s = std::str::from_utf8(bytes).map_err(|_| {
                    PickleError::MalformedStream("BINUNICODE payload is not valid UTF-8".into())
                })?;
                self.push_value(Value::string(s));
            }
            OpCode::EmptyList => self.push_empty_list()?,
            OpCode::EmptyTuple => self.push_value(Value::tuple(Vec::new())),
            OpCode::EmptyDict => self.push_value(Value::dict(Vec::new())),
            OpCode::Tuple => self.close_tuple()?,
            OpCode::Appends => self.close_list()?,
            OpCode::SetItems => self.close_dict()?,
            OpCode::BinPut => {
                let id = u32::from(self.read_u8()?);
                self.bind_memo(id)?;
            }
            OpCode::LongBinPut => {
                let id = self.read_u32()?;
                self.bind_memo(id)?;
            }
            OpCode::BinGet => {
                let id = u32::from(self.read_u8()?);
                self.push_memo(id)?;
            }
            OpCode::LongBinGet => {
                let id = self.read_u32()?;
                self.push_memo(id)?;
            }
            OpCode::Global => self.read_global()?,
            OpCode::NewObj => {
                // Discard the empty argument tuple; the class tag beneath
                // it stays for BUILD.
                self.pop_entry("NEWOBJ")?;
            }
            OpCode::Build => self.build()?,
            OpCode::Reduce => self.reduce()?,
            other => {
                return Err(PickleError::MalformedStream(format!(
                    "unexpected opcode {other:?} (0x{:02x}) at offset {}",
                    other as u8,
                    self.pos - 1
                )));
            }
        }
        Ok(())
    }

    fn push_value(&mut self, value: Value) {
        self.stack.push(StackEntry::Value(value));
    }

    /// EMPTY_LIST is overloaded by older writers: after NEWOBJ it
    /// specializes based on the integer class tag below, and with a class
    /// marker on top it specializes based on that marker. Plain streams
    /// just get a generic list.
    fn push_empty_list(&mut self) -> Result<()> {
        if self.last_opcode == Some(OpCode::NewObj) {
            let tag = match self.stack.last() {
                Some(StackEntry::Value(Value::Int(n))) => *n,
                Some(_) => {
                    return Err(PickleError::MalformedStream(
                        "list specialization after NEWOBJ without an integer class tag".into(),
                    ));
                }
                None => {
                    return Err(PickleError::UnbalancedContainer(
                        "EMPTY_LIST after NEWOBJ with an empty stack".into(),
                    ));
                }
            };
            if !(0..=i64::from(u8::MAX)).contains(&tag) {
                return Err(PickleError::MalformedStream(format!(
                    "could not decode class tag {tag}"
                )));
            }
            if tag == PicklerClass::IntList as i64 {
                self.push_value(Value::int_list(Vec::new()));
            }
        } else if let Some(StackEntry::Class(cls)) = self.stack.last() {
            match cls {
                PicklerClass::IntList => self.push_value(Value::int_list(Vec::new())),
                PicklerClass::Tensor => {
                    return Err(PickleError::MalformedStream(
                        "unknown list specialization".into(),
                    ));
                }
            }
        } else {
            self.push_value(Value::list(Vec::new()));
        }
        Ok(())
    }

    /// Pop the innermost mark, validating it still points into the stack.
    fn pop_mark(&mut self, op: &str) -> Result<usize> {
        let start = self
            .marks
            .pop()
            .ok_or_else(|| PickleError::UnbalancedContainer(format!("{op} with no open MARK")))?;
        if start > self.stack.len() {
            return Err(PickleError::UnbalancedContainer(format!(
                "{op} mark at {start} is beyond the stack of {}",
                self.stack.len()
            )));
        }
        Ok(start)
    }

    fn close_tuple(&mut self) -> Result<()> {
        let start = self.pop_mark("TUPLE")?;
        let mut elements = Vec::with_capacity(self.stack.len() - start);
        for entry in self.stack.drain(start..) {
            elements.push(entry.into_value()?);
        }
        self.push_value(Value::tuple(elements));
        Ok(())
    }

    fn close_list(&mut self) -> Result<()> {
        let start = self.pop_mark("APPENDS")?;
        if start == 0 {
            return Err(PickleError::UnbalancedContainer(
                "APPENDS with no target container".into(),
            ));
        }
        let items: Vec<StackEntry> = self.stack.drain(start..).collect();
        let target = match &self.stack[start - 1] {
            StackEntry::Value(value) => value.clone(),
            StackEntry::Class(_) => {
                return Err(PickleError::MalformedStream(
                    "APPENDS target is a class marker".into(),
                ));
            }
        };
        match target {
            Value::List(list) => {
                for entry in items {
                    list.push(entry.into_value()?);
                }
            }
            Value::IntList(list) => {
                for entry in items {
                    match entry.into_value()? {
                        Value::Int(n) => list.push(n),
                        other => {
                            return Err(PickleError::UnsupportedType(format!(
                                "IntList element must be Int, found {}",
                                other.kind()
                            )));
                        }
                    }
                }
            }
            other => {
                return Err(PickleError::MalformedStream(format!(
                    "APPENDS target must be a list, found {}",
                    other.kind()
                )));
            }
        }
        Ok(())
    }

    fn close_dict(&mut self) -> Result<()> {
        let start = self.pop_mark("SETITEMS")?;
        if start == 0 {
            return Err(PickleError::UnbalancedContainer(
                "SETITEMS with no target container".into(),
            ));
        }
        if (self.stack.len() - start) % 2 != 0 {
            return Err(PickleError::MalformedStream(
                "SETITEMS with an odd number of stack items".into(),
            ));
        }
        let items: Vec<StackEntry> = self.stack.drain(start..).collect();
        let dict = match &self.stack[start - 1] {
            StackEntry::Value(Value::Dict(dict)) => dict.clone(),
            StackEntry::Value(other) => {
                return Err(PickleError::MalformedStream(format!(
                    "SETITEMS target must be a Dict, found {}",
                    other.kind()
                )));
            }
            StackEntry::Class(_) => {
                return Err(PickleError::MalformedStream(
                    "SETITEMS target is a class marker".into(),
                ));
            }
        };
        let mut items = items.into_iter();
        while let (Some(key), Some(value)) = (items.next(), items.next()) {
            dict.insert(key.into_value()?, value.into_value()?);
        }
        Ok(())
    }

    /// Bind `id` to a clone of the stack top; the stack is unchanged.
    fn bind_memo(&mut self, id: u32) -> Result<()> {
        // Writers allocate ids densely, so an id can never exceed the
        // number of PUT opcodes the input could even hold.
        if id as usize > self.input.len() {
            return Err(PickleError::MalformedStream(format!(
                "memo id {id} is not plausible for an input of {} bytes",
                self.input.len()
            )));
        }
        let entry = self
            .stack
            .last()
            .cloned()
            .ok_or_else(|| PickleError::UnbalancedContainer("PUT with an empty stack".into()))?;
        let index = id as usize;
        if self.memo.len() <= index {
            self.memo.resize(index + 1, None);
        }
        self.memo[index] = Some(entry);
        Ok(())
    }

    fn push_memo(&mut self, id: u32) -> Result<()> {
        let entry = self
            .memo
            .get(id as usize)
            .and_then(|slot| slot.clone())
            .ok_or(PickleError::MemoMiss(id))?;
        self.stack.push(entry);
        Ok(())
    }

    fn read_global(&mut self) -> Result<()> {
        let module = self.read_identifier()?;
        let name = self.read_identifier()?;
        let cls = PicklerClass::from_name(&module, &name)?;
        if module == "__main__" {
            // Oldest writers carried the class as a bare integer tag.
            self.push_value(Value::Int(i64::from(cls as u8)));
        } else {
            self.stack.push(StackEntry::Class(cls));
        }
        Ok(())
    }

    /// Legacy reconstruction: the class tag was pushed as an integer and
    /// the state argument sits on top of it.
    fn build(&mut self) -> Result<()> {
        let state = self.pop_value("BUILD")?;
        let tag = match self.pop_value("BUILD")? {
            Value::Int(n) => n,
            other => {
                return Err(PickleError::MalformedStream(format!(
                    "BUILD class tag must be Int, found {}",
                    other.kind()
                )));
            }
        };
        let cls = PicklerClass::from_tag(tag).ok_or_else(|| {
            PickleError::MalformedStream(format!("unknown class tag {tag} for BUILD"))
        })?;
        match cls {
            PicklerClass::Tensor => {
                let tensor = self.lookup_tensor(&state)?;
                self.push_value(Value::Tensor(tensor));
            }
            PicklerClass::IntList => self.push_value(state),
        }
        Ok(())
    }

    fn reduce(&mut self) -> Result<()> {
        let args = match self.pop_value("REDUCE")? {
            Value::Tuple(tuple) => tuple,
            other => {
                return Err(PickleError::MalformedStream(format!(
                    "REDUCE argument must be a Tuple, found {}",
                    other.kind()
                )));
            }
        };
        let cls = match self.pop_entry("REDUCE")? {
            StackEntry::Class(cls) => cls,
            StackEntry::Value(other) => {
                return Err(PickleError::MalformedStream(format!(
                    "REDUCE callee must be a class marker, found {}",
                    other.kind()
                )));
            }
        };
        let first = args.elements().first().cloned().ok_or_else(|| {
            PickleError::MalformedStream("REDUCE argument tuple is empty".into())
        })?;
        match cls {
            PicklerClass::Tensor => {
                let tensor = self.lookup_tensor(&first)?;
                self.push_value(Value::Tensor(tensor));
            }
            PicklerClass::IntList => match first {
                Value::IntList(_) => self.push_value(first),
                other => {
                    return Err(PickleError::UnsupportedType(format!(
                        "IntList reconstruction expects an IntList argument, found {}",
                        other.kind()
                    )));
                }
            },
        }
        Ok(())
    }

    fn lookup_tensor(&self, value: &Value) -> Result<TensorHandle> {
        let index = match value {
            Value::Int(n) => *n,
            other => {
                return Err(PickleError::MalformedStream(format!(
                    "tensor id must be Int, found {}",
                    other.kind()
                )));
            }
        };
        let table = self.tensor_table.ok_or_else(|| {
            PickleError::MalformedStream(
                "tensor reference but no tensor table was supplied".into(),
            )
        })?;
        usize::try_from(index)
            .ok()
            .and_then(|i| table.get(i))
            .cloned()
            .ok_or_else(|| {
                PickleError::MalformedStream(format!(
                    "tensor id {index} out of range for a table of {}",
                    table.len()
                ))
            })
    }

    fn pop_entry(&mut self, op: &str) -> Result<StackEntry> {
        self.stack
            .pop()
            .ok_or_else(|| PickleError::UnbalancedContainer(format!("{op} with an empty stack")))
    }

    fn pop_value(&mut self, op: &str) -> Result<Value> {
        self.pop_entry(op)?.into_value()
    }

    fn read_opcode(&mut self) -> Result<OpCode> {
        let byte = self.read_u8()?;
        OpCode::from_u8(byte).ok_or_else(|| {
            PickleError::MalformedStream(format!(
                "unknown opcode 0x{byte:02x} at offset {}",
                self.pos - 1
            ))
        })
    }

    /// Two newline-terminated identifiers follow a GLOBAL; only
    /// `[A-Za-z0-9._]` may appear before the newline.
    fn read_identifier(&mut self) -> Result<String> {
        let start = self.pos;
        loop {
            let byte = match self.input.get(self.pos) {
                Some(&b) => b,
                None => {
                    return Err(PickleError::MalformedStream(
                        "identifier ran past the end of input, expected a newline".into(),
                    ));
                }
            };
            if byte == b'\n' {
                break;
            }
            if !(byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'.') {
                return Err(PickleError::MalformedStream(format!(
                    "found byte 0x{byte:02x} in an identifier, identifiers must be qualified \
                     names"
                )));
            }
            self.pos += 1;
        }
        let ident: String = self.input[start..self.pos].iter().map(|&b| b as char).collect();
        self.pos += 1; // consume the newline
        Ok(ident)
    }

    fn read_u8(&mut self) -> Result<u8> {
        match self.input.get(self.pos) {
            Some(&byte) => {
                self.pos += 1;
                Ok(byte)
            }
            None => Err(PickleError::MalformedStream("unexpected end of input".into())),
        }
    }

    fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(length).filter(|&end| end <= self.input.len()).ok_or_else(
            || {
                PickleError::MalformedStream(format!(
                    "operand of {length} bytes overruns the remaining {} bytes of input",
                    self.input.len() - self.pos
                ))
            },
        )?;
        let bytes = &self.input[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let bytes = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(buf))
    }

    /// Pickle floats are big-endian on the wire.
    fn read_f64_be(&mut self) -> Result<f64> {
        let bytes = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(f64::from_be_bytes(buf))
    }
}
