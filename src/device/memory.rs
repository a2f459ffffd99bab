// Copyright 2024-2026 GG-ACCEL Contributors
// Licensed under the Apache License, Version 2.0

//! Device addresses, allocation records and element types.

use std::fmt;

/// Opaque device address. Never dereferenced on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    pub const NULL: DevicePtr = DevicePtr(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` past this one.
    pub fn offset(self, bytes: usize) -> DevicePtr {
        DevicePtr(self.0 + bytes as u64)
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:012x}", self.0)
    }
}

/// A handle representing a device memory allocation.
#[derive(Debug, Clone)]
pub struct GpuAllocation {
    pub id: u64,
    pub ptr: DevicePtr,
    pub size: usize,
    pub device_index: usize,
}

/// Element types that may be copied byte-for-byte between host and device.
///
/// # Safety
///
/// Implementors must be plain data: no padding, no pointers, and every bit
/// pattern must be a valid value.
pub unsafe trait DeviceRepr: Copy + Send + Sync + 'static {}

macro_rules! device_repr {
    ($($t:ty),* $(,)?) => {
        $(unsafe impl DeviceRepr for $t {})*
    };
}

device_repr!(u8, i8, u16, i16, u32, i32, u64, i64, usize, isize, f32, f64);
device_repr!(half::f16, half::bf16);

/// Element types with a multiplicative identity.
pub trait ConstOne: DeviceRepr {
    const ONE: Self;
}

macro_rules! const_one {
    ($one:expr => $($t:ty),*) => {
        $(impl ConstOne for $t {
            const ONE: Self = $one;
        })*
    };
}

const_one!(1 => u8, i8, u16, i16, u32, i32, u64, i64, usize, isize);
const_one!(1.0 => f32, f64);

impl ConstOne for half::f16 {
    const ONE: Self = half::f16::ONE;
}

impl ConstOne for half::bf16 {
    const ONE: Self = half::bf16::ONE;
}

/// Byte length of `count` elements of `T`, or `None` on overflow.
pub fn byte_len<T: DeviceRepr>(count: usize) -> Option<usize> {
    count.checked_mul(std::mem::size_of::<T>())
}

/// View a slice of device-representable values as raw bytes.
pub fn as_bytes<T: DeviceRepr>(values: &[T]) -> &[u8] {
    // DeviceRepr guarantees plain data without padding.
    unsafe { std::slice::from_raw_parts(values.as_ptr().cast::<u8>(), std::mem::size_of_val(values)) }
}
