use std::mem::size_of;
use std::slice;

/// Marker for the wire structs: `#[repr(C, packed)]`, made only of byte-sized fields, valid for
/// every bit pattern.
///
/// # Safety
/// Implementors must have alignment 1, no padding, and no invalid bit patterns.
pub unsafe trait Plain: Copy {}

/// Return a slice of the bytes in the given struct.
pub fn as_bytes<T: Plain>(x: &T) -> &[u8] {
    unsafe { slice::from_raw_parts(x as *const T as *const u8, size_of::<T>()) }
}

/// This is kind of like `std::mem::transmute_copy`, but safer because:
///  * the output type is restricted to `Plain` structs
///  * the input type may only be a byte slice
///  * the length of the input is asserted to be big enough to construct the output
pub fn from_bytes<T: Plain>(bytes: &[u8]) -> T {
    assert!(bytes.len() >= size_of::<T>());
    unsafe { (bytes.as_ptr() as *const T).read_unaligned() }
}
