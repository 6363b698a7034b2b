//! Edge-case tests for tensor handles and storages.
//!
//! Tests cover:
//! - Element sizes and names for every scalar type
//! - Storage key assignment
//! - View geometry (numel, contiguous strides)
//! - Handle identity (ptr_eq)
//! - Writeable-tensor materialization for cpu and cuda storages

use spindle_common::{Device, ScalarType, Storage, TensorHandle};

// ---------------------------------------------------------------------------
// Scalar types
// ---------------------------------------------------------------------------

#[test]
fn element_sizes() {
    assert_eq!(ScalarType::Double.element_size(), 8);
    assert_eq!(ScalarType::Long.element_size(), 8);
    assert_eq!(ScalarType::Float.element_size(), 4);
    assert_eq!(ScalarType::Int.element_size(), 4);
    assert_eq!(ScalarType::Half.element_size(), 2);
    assert_eq!(ScalarType::Short.element_size(), 2);
    assert_eq!(ScalarType::Char.element_size(), 1);
    assert_eq!(ScalarType::Byte.element_size(), 1);
    assert_eq!(ScalarType::Bool.element_size(), 1);
}

#[test]
fn scalar_type_names() {
    assert_eq!(ScalarType::Float.name(), "Float");
    assert_eq!(ScalarType::Half.to_string(), "Half");
}

#[test]
fn device_display() {
    assert_eq!(Device::Cpu.to_string(), "cpu");
    assert_eq!(Device::Cuda(1).to_string(), "cuda:1");
    assert!(Device::Cpu.is_cpu());
    assert!(!Device::Cuda(0).is_cpu());
    assert_eq!(Device::default(), Device::Cpu);
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[test]
fn storage_keys_are_unique() {
    let a = Storage::new(Device::Cpu, vec![0; 4]);
    let b = Storage::new(Device::Cpu, vec![0; 4]);
    assert_ne!(a.key(), b.key());
}

#[test]
fn storage_key_is_stable_across_views() {
    let storage = Storage::new(Device::Cpu, vec![0; 16]);
    let a = TensorHandle::contiguous(ScalarType::Float, vec![4], storage.clone());
    let b = TensorHandle::contiguous(ScalarType::Float, vec![2, 2], storage);
    assert_eq!(a.storage_key(), b.storage_key());
}

// ---------------------------------------------------------------------------
// View geometry
// ---------------------------------------------------------------------------

#[test]
fn contiguous_view_geometry() {
    let storage = Storage::new(Device::Cpu, vec![0; 24]);
    let tensor = TensorHandle::contiguous(ScalarType::Float, vec![2, 3], storage);
    assert_eq!(tensor.numel(), 6);
    assert_eq!(tensor.strides(), &[3, 1]);
    assert_eq!(tensor.storage_offset(), 0);
    assert_eq!(tensor.storage_numel(), 6);
    assert!(!tensor.requires_grad());
}

#[test]
fn storage_numel_covers_the_whole_storage() {
    // A 2-element view over an 8-element storage still records 8 elements.
    let storage = Storage::new(Device::Cpu, vec![0; 32]);
    let tensor = TensorHandle::new(ScalarType::Float, vec![2], vec![1], 4, false, storage);
    assert_eq!(tensor.numel(), 2);
    assert_eq!(tensor.storage_numel(), 8);
}

// ---------------------------------------------------------------------------
// Handle identity
// ---------------------------------------------------------------------------

#[test]
fn clones_are_ptr_equal() {
    let storage = Storage::new(Device::Cpu, vec![0; 4]);
    let tensor = TensorHandle::contiguous(ScalarType::Byte, vec![4], storage);
    let alias = tensor.clone();
    assert!(tensor.ptr_eq(&alias));
}

#[test]
fn distinct_views_are_not_ptr_equal() {
    let storage = Storage::new(Device::Cpu, vec![0; 4]);
    let a = TensorHandle::contiguous(ScalarType::Byte, vec![4], storage.clone());
    let b = TensorHandle::contiguous(ScalarType::Byte, vec![4], storage);
    assert!(!a.ptr_eq(&b));
}

// ---------------------------------------------------------------------------
// Writeable tensors
// ---------------------------------------------------------------------------

#[test]
fn writeable_tensor_on_cpu_is_the_same_handle() {
    let storage = Storage::new(Device::Cpu, vec![1, 2, 3, 4]);
    let tensor = TensorHandle::contiguous(ScalarType::Byte, vec![4], storage);
    let (cpu, record_size) = tensor.writeable_tensor();
    assert!(cpu.ptr_eq(&tensor));
    assert_eq!(record_size, 4);
}

#[test]
fn writeable_tensor_materializes_cuda_storage() {
    let bytes: Vec<u8> = (0..16).collect();
    let storage = Storage::new(Device::Cuda(0), bytes.clone());
    let tensor = TensorHandle::contiguous(ScalarType::Float, vec![2, 2], storage);
    let (cpu, record_size) = tensor.writeable_tensor();
    assert!(!cpu.ptr_eq(&tensor));
    assert!(cpu.device().is_cpu());
    assert_eq!(cpu.storage().data(), bytes.as_slice());
    assert_eq!(record_size, 16);
    assert_eq!(cpu.sizes(), &[4]);
    assert_eq!(cpu.strides(), &[1]);
}

#[test]
fn record_size_is_element_size_times_storage_size() {
    let storage = Storage::new(Device::Cuda(0), vec![0; 48]);
    let tensor = TensorHandle::contiguous(ScalarType::Long, vec![2], storage);
    let (_, record_size) = tensor.writeable_tensor();
    assert_eq!(record_size, 48);
}
