//! Handle tables for values too big to pass on the WASM stack.
//!
//! Contracts refer to big integers and byte buffers by integer handles; the
//! values live here. Frame boundaries snapshot the tables, so nested frames
//! cannot observe each other's handles.

use std::collections::BTreeMap;

use num_bigint::BigInt;
use num_traits::Zero;

use vulcan_primitives::{VMError, VMResult};

#[derive(Debug, Clone, Default)]
struct ManagedState {
    big_ints: BTreeMap<i32, BigInt>,
    buffers: BTreeMap<i32, Vec<u8>>,
    next_handle: i32,
}

/// Big-integer and managed-buffer tables of the current frame.
#[derive(Debug, Default)]
pub struct ManagedTypesContext {
    state: ManagedState,
    state_stack: Vec<ManagedState>,
}

impl ManagedTypesContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_state(&mut self) {
        self.state = ManagedState::default();
    }

    pub fn push_state(&mut self) {
        self.state_stack.push(self.state.clone());
    }

    pub fn pop_set_active(&mut self) {
        if let Some(state) = self.state_stack.pop() {
            self.state = state;
        }
    }

    pub fn pop_discard(&mut self) {
        self.state_stack.pop();
    }

    pub fn clear_state_stack(&mut self) {
        self.state_stack.clear();
    }

    pub fn state_stack_depth(&self) -> usize {
        self.state_stack.len()
    }

    fn take_handle(&mut self) -> i32 {
        let handle = self.state.next_handle;
        self.state.next_handle += 1;
        handle
    }

    // ── Big integers ──

    pub fn put_big_int(&mut self, value: i64) -> i32 {
        let handle = self.take_handle();
        self.state.big_ints.insert(handle, BigInt::from(value));
        handle
    }

    pub fn set_big_int(&mut self, handle: i32, value: BigInt) {
        self.state.big_ints.insert(handle, value);
    }

    pub fn big_int(&self, handle: i32) -> VMResult<BigInt> {
        self.state
            .big_ints
            .get(&handle)
            .cloned()
            .ok_or(VMError::NoBigIntUnderHandle)
    }

    /// Read the value, creating a zero if the handle was never seen.
    pub fn big_int_or_create(&mut self, handle: i32) -> BigInt {
        self.state
            .big_ints
            .entry(handle)
            .or_insert_with(BigInt::zero)
            .clone()
    }

    pub fn two_big_ints(&self, first: i32, second: i32) -> VMResult<(BigInt, BigInt)> {
        Ok((self.big_int(first)?, self.big_int(second)?))
    }

    // ── Managed buffers ──

    pub fn new_buffer(&mut self) -> i32 {
        let handle = self.take_handle();
        self.state.buffers.insert(handle, Vec::new());
        handle
    }

    pub fn new_buffer_from_bytes(&mut self, bytes: &[u8]) -> i32 {
        let handle = self.take_handle();
        self.state.buffers.insert(handle, bytes.to_vec());
        handle
    }

    pub fn set_bytes(&mut self, handle: i32, bytes: &[u8]) {
        self.state.buffers.insert(handle, bytes.to_vec());
    }

    pub fn bytes(&self, handle: i32) -> VMResult<Vec<u8>> {
        self.state
            .buffers
            .get(&handle)
            .cloned()
            .ok_or(VMError::NoManagedBufferUnderHandle)
    }

    /// Returns false when the handle does not exist.
    pub fn append_bytes(&mut self, handle: i32, bytes: &[u8]) -> bool {
        match self.state.buffers.get_mut(&handle) {
            Some(buffer) => {
                buffer.extend_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    pub fn buffer_length(&self, handle: i32) -> i32 {
        self.state
            .buffers
            .get(&handle)
            .map(|b| b.len() as i32)
            .unwrap_or(-1)
    }

    pub fn get_slice(&self, handle: i32, start: i32, length: i32) -> VMResult<Vec<u8>> {
        let buffer = self
            .state
            .buffers
            .get(&handle)
            .ok_or(VMError::NoManagedBufferUnderHandle)?;
        check_slice_bounds(buffer, start, length)?;
        let start = start as usize;
        Ok(buffer[start..start + length as usize].to_vec())
    }

    /// Remove a slice and return the resulting buffer contents.
    pub fn delete_slice(&mut self, handle: i32, start: i32, length: i32) -> VMResult<Vec<u8>> {
        let buffer = self
            .state
            .buffers
            .get_mut(&handle)
            .ok_or(VMError::NoManagedBufferUnderHandle)?;
        check_slice_bounds(buffer, start, length)?;
        let start = start as usize;
        buffer.drain(start..start + length as usize);
        Ok(buffer.clone())
    }

    /// Insert bytes at a position and return the resulting buffer contents.
    pub fn insert_slice(&mut self, handle: i32, start: i32, slice: &[u8]) -> VMResult<Vec<u8>> {
        let buffer = self
            .state
            .buffers
            .get_mut(&handle)
            .ok_or(VMError::NoManagedBufferUnderHandle)?;
        if start < 0 || start as usize > buffer.len() {
            return Err(VMError::BadBounds);
        }
        let tail = buffer.split_off(start as usize);
        buffer.extend_from_slice(slice);
        buffer.extend_from_slice(&tail);
        Ok(buffer.clone())
    }
}

fn check_slice_bounds(buffer: &[u8], start: i32, length: i32) -> VMResult<()> {
    if start < 0 || length < 0 {
        return Err(VMError::BadBounds);
    }
    let end = start as usize + length as usize;
    if end > buffer.len() {
        return Err(VMError::BadBounds);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_int_handles() {
        let mut context = ManagedTypesContext::new();
        let a = context.put_big_int(10);
        let b = context.put_big_int(-4);
        assert_ne!(a, b);
        assert_eq!(context.big_int(a).unwrap(), BigInt::from(10));
        assert_eq!(context.big_int(b).unwrap(), BigInt::from(-4));
        assert_eq!(context.big_int(999).unwrap_err(), VMError::NoBigIntUnderHandle);
        assert_eq!(context.big_int_or_create(999), BigInt::zero());
        assert!(context.big_int(999).is_ok());
    }

    #[test]
    fn test_buffer_slices() {
        let mut context = ManagedTypesContext::new();
        let handle = context.new_buffer_from_bytes(b"hello world");
        assert_eq!(context.buffer_length(handle), 11);
        assert_eq!(context.get_slice(handle, 6, 5).unwrap(), b"world");
        assert!(context.get_slice(handle, 6, 6).is_err());
        assert!(context.get_slice(handle, -1, 2).is_err());

        let after_delete = context.delete_slice(handle, 5, 6).unwrap();
        assert_eq!(after_delete, b"hello");

        let after_insert = context.insert_slice(handle, 5, b", big").unwrap();
        assert_eq!(after_insert, b"hello, big");
    }

    #[test]
    fn test_append_to_missing_buffer() {
        let mut context = ManagedTypesContext::new();
        assert!(!context.append_bytes(5, b"data"));
        let handle = context.new_buffer();
        assert!(context.append_bytes(handle, b"data"));
        assert_eq!(context.bytes(handle).unwrap(), b"data");
    }

    #[test]
    fn test_state_stack_isolates_handles() {
        let mut context = ManagedTypesContext::new();
        let outer = context.put_big_int(7);

        context.push_state();
        let inner = context.put_big_int(8);
        context.set_big_int(outer, BigInt::from(100));
        context.pop_set_active();

        // The outer frame sees its original value; the inner handle is gone.
        assert_eq!(context.big_int(outer).unwrap(), BigInt::from(7));
        assert!(context.big_int(inner).is_err());
    }
}
