//! The tagged dynamic value the serialization layer operates on
//!
//! Container variants (`String`, `List`, `Tuple`, `Dict`, `IntList`) are
//! shared handles: cloning a [`Value`] clones the handle, not the payload,
//! and every freshly constructed container receives a process-unique
//! [`ObjectId`]. The serializer keys its memoization table on that id, so
//! two structurally equal containers are still distinct objects unless one
//! is a clone of the other.

use std::cell::{Ref, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::TensorHandle;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(0);

/// Stable identity of one container instance.
///
/// Ids are allocated from a process-wide counter and never reused, so an
/// id observed once stays unique for the life of the process even after
/// the container is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug)]
struct StrCell {
    id: ObjectId,
    value: String,
}

/// Shared immutable string.
#[derive(Debug, Clone)]
pub struct StrObject(Rc<StrCell>);

impl StrObject {
    pub fn new(value: impl Into<String>) -> Self {
        StrObject(Rc::new(StrCell { id: ObjectId::next(), value: value.into() }))
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn as_str(&self) -> &str {
        &self.0.value
    }
}

#[derive(Debug)]
struct ListCell {
    id: ObjectId,
    elements: RefCell<Vec<Value>>,
}

/// Shared mutable list of values.
#[derive(Debug, Clone)]
pub struct ListObject(Rc<ListCell>);

impl ListObject {
    pub fn new(elements: Vec<Value>) -> Self {
        ListObject(Rc::new(ListCell { id: ObjectId::next(), elements: RefCell::new(elements) }))
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn elements(&self) -> Ref<'_, Vec<Value>> {
        self.0.elements.borrow()
    }

    pub fn push(&self, value: Value) {
        self.0.elements.borrow_mut().push(value);
    }

    pub fn len(&self) -> usize {
        self.0.elements.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.0.elements.borrow().clone()
    }
}

#[derive(Debug)]
struct TupleCell {
    id: ObjectId,
    elements: Vec<Value>,
}

/// Shared immutable tuple of values.
#[derive(Debug, Clone)]
pub struct TupleObject(Rc<TupleCell>);

impl TupleObject {
    pub fn new(elements: Vec<Value>) -> Self {
        TupleObject(Rc::new(TupleCell { id: ObjectId::next(), elements }))
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn elements(&self) -> &[Value] {
        &self.0.elements
    }

    pub fn len(&self) -> usize {
        self.0.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.elements.is_empty()
    }
}

#[derive(Debug)]
struct DictCell {
    id: ObjectId,
    entries: RefCell<Vec<(Value, Value)>>,
}

/// Shared mutable mapping with insertion-order iteration.
///
/// Keys compare structurally; inserting an existing key replaces the value
/// in place, keeping the key's original position.
#[derive(Debug, Clone)]
pub struct DictObject(Rc<DictCell>);

impl DictObject {
    pub fn new() -> Self {
        DictObject(Rc::new(DictCell { id: ObjectId::next(), entries: RefCell::new(Vec::new()) }))
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn entries(&self) -> Ref<'_, Vec<(Value, Value)>> {
        self.0.entries.borrow()
    }

    pub fn insert(&self, key: Value, value: Value) {
        let mut entries = self.0.entries.borrow_mut();
        for entry in entries.iter_mut() {
            if entry.0 == key {
                entry.1 = value;
                return;
            }
        }
        entries.push((key, value));
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.0.entries.borrow().iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    pub fn len(&self) -> usize {
        self.0.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DictObject {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct IntListCell {
    id: ObjectId,
    elements: RefCell<Vec<i64>>,
}

/// Shared mutable homogeneous list of 64-bit integers.
#[derive(Debug, Clone)]
pub struct IntListObject(Rc<IntListCell>);

impl IntListObject {
    pub fn new(elements: Vec<i64>) -> Self {
        IntListObject(Rc::new(IntListCell {
            id: ObjectId::next(),
            elements: RefCell::new(elements),
        }))
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn elements(&self) -> Ref<'_, Vec<i64>> {
        self.0.elements.borrow()
    }

    pub fn push(&self, value: i64) {
        self.0.elements.borrow_mut().push(value);
    }

    pub fn len(&self) -> usize {
        self.0.elements.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<i64> {
        self.0.elements.borrow().clone()
    }
}

/// A dynamically typed runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(StrObject),
    List(ListObject),
    Tuple(TupleObject),
    Dict(DictObject),
    IntList(IntListObject),
    Tensor(TensorHandle),
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Value::String(StrObject::new(value))
    }

    pub fn list(elements: Vec<Value>) -> Self {
        Value::List(ListObject::new(elements))
    }

    pub fn tuple(elements: Vec<Value>) -> Self {
        Value::Tuple(TupleObject::new(elements))
    }

    /// Build a dict from pairs, applying insert-replacement semantics.
    pub fn dict(pairs: Vec<(Value, Value)>) -> Self {
        let dict = DictObject::new();
        for (key, value) in pairs {
            dict.insert(key, value);
        }
        Value::Dict(dict)
    }

    pub fn int_list(elements: Vec<i64>) -> Self {
        Value::IntList(IntListObject::new(elements))
    }

    /// Identity of the container instance, if this variant is a container.
    ///
    /// Scalars (and tensors, which the serializer handles separately)
    /// have no object identity and return `None`.
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Value::String(s) => Some(s.id()),
            Value::List(l) => Some(l.id()),
            Value::Tuple(t) => Some(t.id()),
            Value::Dict(d) => Some(d.id()),
            Value::IntList(l) => Some(l.id()),
            _ => None,
        }
    }

    /// Variant name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Double(_) => "Double",
            Value::String(_) => "String",
            Value::List(_) => "List",
            Value::Tuple(_) => "Tuple",
            Value::Dict(_) => "Dict",
            Value::IntList(_) => "IntList",
            Value::Tensor(_) => "Tensor",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&TensorHandle> {
        match self {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }
}

/// Structural equality. Containers compare by contents, not identity;
/// tensors compare by handle identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::String(a), Value::String(b)) => a.as_str() == b.as_str(),
            (Value::List(a), Value::List(b)) => *a.elements() == *b.elements(),
            (Value::Tuple(a), Value::Tuple(b)) => a.elements() == b.elements(),
            (Value::Dict(a), Value::Dict(b)) => *a.entries() == *b.entries(),
            (Value::IntList(a), Value::IntList(b)) => *a.elements() == *b.elements(),
            (Value::Tensor(a), Value::Tensor(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}
