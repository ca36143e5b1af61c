/*
 * @file cffi.rs
 * @author Mike Hamburg
 * @copyright 2020-2022 Rambus Inc.
 *
 * C foreign function interface.
 * All boilerplate over the eight core operations.
 */

use crate::{
    provision_columns, provision_max_rows, serialized_size, UniformBuilder, UniformMap,
    STD_BINCODE_CONFIG,
};
use bincode::encode_into_slice;
use core::ptr::NonNull;
use core::slice::{from_raw_parts, from_raw_parts_mut};

#[no_mangle]
/// Minimum storage width in bits for a map holding `rows` keys
pub extern "C" fn lfr_uniform_provision_columns(rows: usize) -> usize {
    provision_columns(rows)
}

#[no_mangle]
/// Largest key capacity for a storage width of `columns` bits; 0 if too small
pub extern "C" fn lfr_uniform_provision_max_rows(columns: usize) -> usize {
    provision_max_rows(columns)
}

#[no_mangle]
/// Create a builder.  Return NULL on invalid parameters or allocation failure
pub extern "C" fn lfr_uniform_builder_new(
    capacity_rows: usize,
    augmented_bits: u32,
    salt: u64,
) -> *mut UniformBuilder {
    match UniformBuilder::new(capacity_rows, augmented_bits as usize, salt) {
        Ok(builder) => Box::into_raw(Box::new(builder)),
        Err(_) => std::ptr::null_mut(),
    }
}

#[no_mangle]
/// Clear a builder's rows, keeping its allocation and block count
pub unsafe extern "C" fn lfr_uniform_builder_reset(mut ptr: NonNull<UniformBuilder>) {
    ptr.as_mut().reset();
}

#[no_mangle]
/// Number of rows inserted so far
pub unsafe extern "C" fn lfr_uniform_builder_len(ptr: NonNull<UniformBuilder>) -> usize {
    ptr.as_ref().len()
}

#[no_mangle]
/// The builder's realized storage width, in blocks
pub unsafe extern "C" fn lfr_uniform_builder_blocks(ptr: NonNull<UniformBuilder>) -> usize {
    ptr.as_ref().block_count()
}

#[no_mangle]
/// Insert one key/value pair.  Return 0 on success, -1 when out of capacity
pub unsafe extern "C" fn lfr_uniform_builder_insert(
    mut ptr: NonNull<UniformBuilder>,
    key: *const u8,
    key_len: usize,
    value: u64,
) -> i32 {
    match ptr.as_mut().insert(from_raw_parts(key, key_len), value) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

#[no_mangle]
/// Solve and return a fresh map, or NULL if this salt's placement is unsolvable.
/// `nthreads` of 0 selects the default
pub unsafe extern "C" fn lfr_uniform_build_threaded(
    mut ptr: NonNull<UniformBuilder>,
    nthreads: usize,
) -> *mut UniformMap {
    match ptr.as_mut().build(nthreads) {
        Ok(map) => Box::into_raw(Box::new(map)),
        Err(_) => std::ptr::null_mut(),
    }
}

#[no_mangle]
/// Look up a key.  Never fails; unknown keys return arbitrary values
pub unsafe extern "C" fn lfr_uniform_query(
    ptr: NonNull<UniformMap>,
    key: *const u8,
    key_len: usize,
) -> u64 {
    ptr.as_ref().query(from_raw_parts(key, key_len))
}

#[no_mangle]
/// Encode to output_buf, if it's big enough.  Return the serialized size of the object, in bytes.
pub unsafe extern "C" fn lfr_uniform_map_encode(
    ptr: NonNull<UniformMap>,
    output_buf: *mut u8,
    output_buf_size: usize,
) -> usize {
    let required_size = serialized_size(ptr.as_ref(), STD_BINCODE_CONFIG).unwrap();
    if required_size <= output_buf_size && !output_buf.is_null() {
        encode_into_slice(
            ptr.as_ref(),
            from_raw_parts_mut(output_buf, output_buf_size),
            STD_BINCODE_CONFIG,
        )
        .unwrap();
    }
    required_size
}

#[no_mangle]
/// Destroy and free a builder
pub unsafe extern "C" fn lfr_uniform_builder_free(ptr: *mut UniformBuilder) {
    if !ptr.is_null() {
        drop(Box::from_raw(ptr));
    }
}

#[no_mangle]
/// Destroy and free a map
pub unsafe extern "C" fn lfr_uniform_map_free(ptr: *mut UniformMap) {
    if !ptr.is_null() {
        drop(Box::from_raw(ptr));
    }
}
