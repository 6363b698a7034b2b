//! Opaque tensor handles and their backing storages

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Device, ScalarType};

static NEXT_STORAGE_KEY: AtomicU64 = AtomicU64::new(1);

/// Contiguous byte buffer underlying one or more tensor views.
///
/// Every storage receives a session-unique key at construction; the
/// serializer uses it to name the storage on the wire.
#[derive(Debug)]
pub struct Storage {
    key: u64,
    device: Device,
    data: Vec<u8>,
}

impl Storage {
    pub fn new(device: Device, data: Vec<u8>) -> Rc<Self> {
        Rc::new(Storage { key: NEXT_STORAGE_KEY.fetch_add(1, Ordering::Relaxed), device, data })
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug)]
struct TensorCell {
    scalar_type: ScalarType,
    sizes: Vec<i64>,
    strides: Vec<i64>,
    storage_offset: i64,
    requires_grad: bool,
    storage: Rc<Storage>,
}

/// Cheap-to-clone handle onto a tensor view.
///
/// Clones share the underlying cell; [`TensorHandle::ptr_eq`] tells two
/// clones of the same handle apart from two distinct tensors over the
/// same storage.
#[derive(Debug, Clone)]
pub struct TensorHandle(Rc<TensorCell>);

impl TensorHandle {
    pub fn new(
        scalar_type: ScalarType,
        sizes: Vec<i64>,
        strides: Vec<i64>,
        storage_offset: i64,
        requires_grad: bool,
        storage: Rc<Storage>,
    ) -> Self {
        TensorHandle(Rc::new(TensorCell {
            scalar_type,
            sizes,
            strides,
            storage_offset,
            requires_grad,
            storage,
        }))
    }

    /// A contiguous view over `storage` starting at offset 0.
    pub fn contiguous(scalar_type: ScalarType, sizes: Vec<i64>, storage: Rc<Storage>) -> Self {
        let strides = contiguous_strides(&sizes);
        Self::new(scalar_type, sizes, strides, 0, false, storage)
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.0.scalar_type
    }

    pub fn sizes(&self) -> &[i64] {
        &self.0.sizes
    }

    pub fn strides(&self) -> &[i64] {
        &self.0.strides
    }

    pub fn storage_offset(&self) -> i64 {
        self.0.storage_offset
    }

    pub fn requires_grad(&self) -> bool {
        self.0.requires_grad
    }

    pub fn storage(&self) -> &Storage {
        &self.0.storage
    }

    pub fn device(&self) -> Device {
        self.0.storage.device()
    }

    pub fn element_size(&self) -> usize {
        self.0.scalar_type.element_size()
    }

    /// Number of elements in the view (product of sizes).
    pub fn numel(&self) -> i64 {
        self.0.sizes.iter().product()
    }

    /// Number of elements the whole storage can hold.
    pub fn storage_numel(&self) -> usize {
        self.0.storage.len() / self.element_size()
    }

    /// Session-stable identifier of the underlying storage.
    pub fn storage_key(&self) -> u64 {
        self.0.storage.key()
    }

    /// Handle identity: true iff both handles refer to the same tensor cell.
    pub fn ptr_eq(&self, other: &TensorHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Materialize a handle whose storage bytes are readable from host
    /// memory, together with the record byte count
    /// (`element_size * storage_numel`).
    ///
    /// CPU tensors are returned as-is; device-resident storages are copied
    /// into a fresh CPU storage covered by a flat contiguous view.
    pub fn writeable_tensor(&self) -> (TensorHandle, u64) {
        let record_size = (self.element_size() * self.storage_numel()) as u64;
        if self.device().is_cpu() {
            return (self.clone(), record_size);
        }
        let storage = Storage::new(Device::Cpu, self.storage().data().to_vec());
        let sizes = vec![self.storage_numel() as i64];
        let cpu = TensorHandle::new(self.scalar_type(), sizes, vec![1], 0, false, storage);
        (cpu, record_size)
    }
}

fn contiguous_strides(sizes: &[i64]) -> Vec<i64> {
    let mut strides = vec![1i64; sizes.len()];
    for i in (0..sizes.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * sizes[i + 1].max(1);
    }
    strides
}

#[cfg(test)]
mod tests {
    use super::contiguous_strides;

    #[test]
    fn strides_row_major() {
        assert_eq!(contiguous_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(contiguous_strides(&[5]), vec![1]);
        assert!(contiguous_strides(&[]).is_empty());
    }

    #[test]
    fn strides_skip_zero_dims() {
        assert_eq!(contiguous_strides(&[2, 0, 3]), vec![3, 3, 1]);
    }
}
