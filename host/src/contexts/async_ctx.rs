//! Registered asynchronous calls of the current frame.
//!
//! Calls live in named, ordered groups. Whatever cannot be resolved in-shard
//! is serialised and persisted under a reserved storage key, so the context
//! can be reloaded when callbacks arrive from other shards. Nodes are plain
//! values keyed by generated call-ids; no pointers cross the persistence
//! boundary.

use serde::{Deserialize, Serialize};
use tracing::trace;

use vulcan_primitives::types::CALLBACK_FUNCTION_NAME;
use vulcan_primitives::{Address, CallType, ReturnCode, VMError, VMInput, VMResult};

/// Group id of the single legacy async call of a frame.
pub const LEGACY_ASYNC_CALL_GROUP_ID: &str = "LegacyAsync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AsyncCallStatus {
    Pending,
    Resolved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AsyncCallExecutionMode {
    Local,
    Remote,
    BuiltinCrossShard,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncCall {
    pub call_id: Vec<u8>,
    pub status: AsyncCallStatus,
    pub execution_mode: AsyncCallExecutionMode,
    pub destination: Address,
    pub data: Vec<u8>,
    pub value_bytes: Vec<u8>,
    /// Gas the developer asked for; zero means "share what is left".
    pub provided_gas: u64,
    /// Effective gas, computed during async gas setup.
    pub gas_limit: u64,
    pub gas_locked: u64,
    pub success_callback: String,
    pub error_callback: String,
    pub callback_closure: Option<Vec<u8>>,
}

impl AsyncCall {
    pub fn is_local(&self) -> bool {
        self.execution_mode == AsyncCallExecutionMode::Local
    }

    pub fn is_remote(&self) -> bool {
        !self.is_local()
    }

    pub fn total_gas(&self) -> u64 {
        self.gas_limit.saturating_add(self.gas_locked)
    }

    /// Resolve or reject according to the destination's return code.
    pub fn update_status(&mut self, return_code: ReturnCode) {
        self.status = if return_code.is_ok() {
            AsyncCallStatus::Resolved
        } else {
            AsyncCallStatus::Rejected
        };
    }

    /// The callback to run for the current status; empty means none.
    pub fn callback_name(&self) -> &str {
        match self.status {
            AsyncCallStatus::Rejected => &self.error_callback,
            _ => &self.success_callback,
        }
    }

    pub fn has_callback(&self) -> bool {
        !self.callback_name().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncCallGroup {
    pub identifier: String,
    pub callback: String,
    pub callback_data: Vec<u8>,
    pub callback_gas: u64,
    pub calls: Vec<AsyncCall>,
}

impl AsyncCallGroup {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            callback: String::new(),
            callback_data: Vec::new(),
            callback_gas: 0,
            calls: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn has_pending_calls(&self) -> bool {
        self.calls
            .iter()
            .any(|call| call.status == AsyncCallStatus::Pending)
    }

    pub fn find_call_by_destination(&self, destination: &[u8]) -> Option<usize> {
        self.calls
            .iter()
            .position(|call| call.destination == destination)
    }
}

/// The persisted form of a pending async context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncContextState {
    pub address: Address,
    pub call_id: Vec<u8>,
    pub caller_addr: Address,
    pub caller_call_id: Vec<u8>,
    pub callback_async_initiator_call_id: Vec<u8>,
    pub call_type: CallType,
    pub call_groups: Vec<AsyncCallGroup>,
    /// Raw child results, in the callback wire format.
    pub return_data: Vec<u8>,
    pub gas_accumulated: u64,
    pub generated_call_count: u64,
}

impl AsyncContextState {
    pub fn serialize(&self) -> VMResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| VMError::AsyncContextDecode(e.to_string()))
    }

    pub fn deserialize(data: &[u8]) -> VMResult<Self> {
        serde_json::from_slice(data).map_err(|e| VMError::AsyncContextDecode(e.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct AsyncContext {
    state: AsyncContextState,
    state_stack: Vec<AsyncContextState>,
}

impl AsyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_state(&mut self) {
        self.state = AsyncContextState::default();
    }

    pub fn init_state_from_input(&mut self, sc_address: &[u8], input: &VMInput) {
        self.state = AsyncContextState {
            address: sc_address.to_vec(),
            call_id: input.current_tx_hash.clone(),
            caller_addr: input.caller_addr.clone(),
            caller_call_id: input.prev_tx_hash.clone(),
            callback_async_initiator_call_id: Vec::new(),
            call_type: input.call_type,
            call_groups: Vec::new(),
            return_data: Vec::new(),
            gas_accumulated: 0,
            generated_call_count: 0,
        };
    }

    // ── State stack ──

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

    // ── Accessors ──

    pub fn address(&self) -> &[u8] {
        &self.state.address
    }

    pub fn call_id(&self) -> &[u8] {
        &self.state.call_id
    }

    pub fn caller_address(&self) -> &[u8] {
        &self.state.caller_addr
    }

    pub fn caller_call_id(&self) -> &[u8] {
        &self.state.caller_call_id
    }

    pub fn call_type(&self) -> CallType {
        self.state.call_type
    }

    pub fn state(&self) -> &AsyncContextState {
        &self.state
    }

    pub fn replace_state(&mut self, state: AsyncContextState) {
        self.state = state;
    }

    pub fn return_data(&self) -> &[u8] {
        &self.state.return_data
    }

    pub fn set_return_data(&mut self, data: Vec<u8>) {
        self.state.return_data = data;
    }

    pub fn gas_accumulated(&self) -> u64 {
        self.state.gas_accumulated
    }

    pub fn accumulate_gas(&mut self, gas: u64) {
        self.state.gas_accumulated = self.state.gas_accumulated.saturating_add(gas);
    }

    // ── Groups and calls ──

    pub fn has_pending_call_groups(&self) -> bool {
        !self.state.call_groups.is_empty()
    }

    /// Complete when every group has drained.
    pub fn is_complete(&self) -> bool {
        self.state.call_groups.iter().all(|g| g.is_complete())
    }

    pub fn call_groups(&self) -> &[AsyncCallGroup] {
        &self.state.call_groups
    }

    pub fn call_groups_mut(&mut self) -> &mut Vec<AsyncCallGroup> {
        &mut self.state.call_groups
    }

    pub fn get_call_group(&self, group_id: &str) -> Option<&AsyncCallGroup> {
        self.state
            .call_groups
            .iter()
            .find(|g| g.identifier == group_id)
    }

    fn destination_already_called(&self, destination: &[u8]) -> bool {
        self.state
            .call_groups
            .iter()
            .any(|group| group.find_call_by_destination(destination).is_some())
    }

    /// Fresh identifier for a call registered by this context.
    pub fn generate_new_call_id(&mut self) -> Vec<u8> {
        self.state.generated_call_count += 1;
        let mut id = self.state.call_id.clone();
        id.extend_from_slice(&self.state.generated_call_count.to_be_bytes());
        id
    }

    /// Add a call to a group, creating the group in registration order.
    pub fn register_async_call(&mut self, group_id: &str, mut call: AsyncCall) -> VMResult<()> {
        if self.destination_already_called(&call.destination) {
            return Err(VMError::OnlyOneAsyncCallToAddress);
        }

        call.call_id = self.generate_new_call_id();
        let group = match self
            .state
            .call_groups
            .iter_mut()
            .find(|g| g.identifier == group_id)
        {
            Some(group) => group,
            None => {
                self.state.call_groups.push(AsyncCallGroup::new(group_id));
                self.state.call_groups.last_mut().expect("just pushed")
            }
        };
        group.calls.push(call);
        trace!(target: "vulcan::async", group_id, "async call registered");
        Ok(())
    }

    /// The legacy single-call form; at most one per frame.
    pub fn register_legacy_async_call(&mut self, mut call: AsyncCall) -> VMResult<()> {
        if self.get_call_group(LEGACY_ASYNC_CALL_GROUP_ID).is_some() {
            return Err(VMError::OnlyOneLegacyAsyncCall);
        }
        call.success_callback = CALLBACK_FUNCTION_NAME.to_string();
        call.error_callback = CALLBACK_FUNCTION_NAME.to_string();
        self.register_async_call(LEGACY_ASYNC_CALL_GROUP_ID, call)
    }

    pub fn set_group_callback(
        &mut self,
        group_id: &str,
        callback_name: &str,
        data: &[u8],
        gas: u64,
    ) -> VMResult<()> {
        let group = self
            .state
            .call_groups
            .iter_mut()
            .find(|g| g.identifier == group_id)
            .ok_or(VMError::AsyncCallGroupDoesNotExist)?;
        if group.is_complete() {
            return Err(VMError::AsyncCallGroupAlreadyComplete);
        }
        group.callback = callback_name.to_string();
        group.callback_data = data.to_vec();
        group.callback_gas = gas;
        Ok(())
    }

    /// Locate the pending call whose destination sent an incoming callback.
    pub fn find_call_by_destination(&self, destination: &[u8]) -> Option<(usize, usize)> {
        for (group_index, group) in self.state.call_groups.iter().enumerate() {
            if let Some(call_index) = group.find_call_by_destination(destination) {
                return Some((group_index, call_index));
            }
        }
        None
    }

    /// Remove a call; its group is dropped when it drains.
    pub fn remove_call(&mut self, group_index: usize, call_index: usize) -> AsyncCall {
        let group = &mut self.state.call_groups[group_index];
        let call = group.calls.remove(call_index);
        if group.calls.is_empty() {
            self.state.call_groups.remove(group_index);
        }
        call
    }

    /// Remove a completed call by its id, cleaning its group.
    pub fn delete_call_by_id(&mut self, call_id: &[u8]) -> VMResult<()> {
        for (group_index, group) in self.state.call_groups.iter().enumerate() {
            if let Some(call_index) = group.calls.iter().position(|c| c.call_id == call_id) {
                self.remove_call(group_index, call_index);
                return Ok(());
            }
        }
        Err(VMError::AsyncCallNotFound)
    }

    /// Drop resolved and rejected calls, keeping only what is pending.
    pub fn retain_pending_calls(&mut self) {
        for group in &mut self.state.call_groups {
            group
                .calls
                .retain(|call| call.status == AsyncCallStatus::Pending);
        }
        self.state.call_groups.retain(|group| !group.calls.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_call(destination: &[u8]) -> AsyncCall {
        AsyncCall {
            call_id: Vec::new(),
            status: AsyncCallStatus::Pending,
            execution_mode: AsyncCallExecutionMode::Unknown,
            destination: destination.to_vec(),
            data: b"fn@01".to_vec(),
            value_bytes: Vec::new(),
            provided_gas: 0,
            gas_limit: 0,
            gas_locked: 0,
            success_callback: "onSuccess".to_string(),
            error_callback: "onError".to_string(),
            callback_closure: None,
        }
    }

    #[test]
    fn test_register_in_groups_preserves_order() {
        let mut context = AsyncContext::new();
        context.register_async_call("groupB", pending_call(b"dest1")).unwrap();
        context.register_async_call("groupA", pending_call(b"dest2")).unwrap();
        context.register_async_call("groupB", pending_call(b"dest3")).unwrap();

        let identifiers: Vec<&str> = context
            .call_groups()
            .iter()
            .map(|g| g.identifier.as_str())
            .collect();
        assert_eq!(identifiers, vec!["groupB", "groupA"]);
        assert_eq!(context.call_groups()[0].calls.len(), 2);
    }

    #[test]
    fn test_only_one_call_per_destination() {
        let mut context = AsyncContext::new();
        context.register_async_call("g", pending_call(b"dest")).unwrap();
        assert_eq!(
            context
                .register_async_call("other", pending_call(b"dest"))
                .unwrap_err(),
            VMError::OnlyOneAsyncCallToAddress
        );
    }

    #[test]
    fn test_only_one_legacy_async_call() {
        let mut context = AsyncContext::new();
        context.register_legacy_async_call(pending_call(b"dest1")).unwrap();
        assert_eq!(
            context
                .register_legacy_async_call(pending_call(b"dest2"))
                .unwrap_err(),
            VMError::OnlyOneLegacyAsyncCall
        );

        // Legacy registration forces the implicit callback name.
        let group = context.get_call_group(LEGACY_ASYNC_CALL_GROUP_ID).unwrap();
        assert_eq!(group.calls[0].success_callback, CALLBACK_FUNCTION_NAME);
        assert_eq!(group.calls[0].error_callback, CALLBACK_FUNCTION_NAME);
    }

    #[test]
    fn test_generated_call_ids_are_unique() {
        let mut context = AsyncContext::new();
        let mut input = VMInput::default();
        input.current_tx_hash = b"txhash".to_vec();
        context.init_state_from_input(b"sc", &input);

        context.register_async_call("g", pending_call(b"dest1")).unwrap();
        context.register_async_call("g", pending_call(b"dest2")).unwrap();
        let group = context.get_call_group("g").unwrap();
        assert_ne!(group.calls[0].call_id, group.calls[1].call_id);
        assert!(group.calls[0].call_id.starts_with(b"txhash"));
    }

    #[test]
    fn test_remove_call_drops_empty_group() {
        let mut context = AsyncContext::new();
        context.register_async_call("g", pending_call(b"dest")).unwrap();
        let (group_index, call_index) = context.find_call_by_destination(b"dest").unwrap();
        let removed = context.remove_call(group_index, call_index);
        assert_eq!(removed.destination, b"dest");
        assert!(context.is_complete());
        assert!(!context.has_pending_call_groups());
    }

    #[test]
    fn test_callback_name_follows_status() {
        let mut call = pending_call(b"dest");
        call.update_status(ReturnCode::Ok);
        assert_eq!(call.status, AsyncCallStatus::Resolved);
        assert_eq!(call.callback_name(), "onSuccess");

        call.update_status(ReturnCode::UserError);
        assert_eq!(call.status, AsyncCallStatus::Rejected);
        assert_eq!(call.callback_name(), "onError");
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut context = AsyncContext::new();
        let mut input = VMInput::default();
        input.current_tx_hash = b"tx".to_vec();
        input.caller_addr = b"caller".to_vec();
        context.init_state_from_input(b"owner", &input);
        context.register_async_call("g", pending_call(b"dest")).unwrap();

        let bytes = context.state().serialize().unwrap();
        let restored = AsyncContextState::deserialize(&bytes).unwrap();
        assert_eq!(&restored, context.state());
    }

    #[test]
    fn test_deserialize_garbage_fails() {
        assert!(matches!(
            AsyncContextState::deserialize(b"not json").unwrap_err(),
            VMError::AsyncContextDecode(_)
        ));
    }

    #[test]
    fn test_group_callback_requires_live_group() {
        let mut context = AsyncContext::new();
        assert_eq!(
            context
                .set_group_callback("missing", "cb", b"", 0)
                .unwrap_err(),
            VMError::AsyncCallGroupDoesNotExist
        );

        context.register_async_call("g", pending_call(b"dest")).unwrap();
        context.set_group_callback("g", "cb", b"data", 50).unwrap();
        assert_eq!(context.get_call_group("g").unwrap().callback, "cb");
    }
}
