//! Host construction parameters.

use std::time::Duration;

use vulcan_primitives::gas::GasSchedule;
use vulcan_primitives::{VMError, VMResult};

/// All parameters required to build a [`crate::VmHost`].
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// VM type marker mixed into deployed contract addresses.
    pub vm_type: Vec<u8>,
    /// Upper bound on gas per block; exposed to contracts via the EEI.
    pub block_gas_limit: u64,
    /// Parsed gas schedule; swappable at runtime under the execution gate.
    pub gas_schedule: GasSchedule,
    /// Chain-reserved storage key prefix contracts may read but never write.
    pub reserved_key_prefix: Vec<u8>,
    /// Watchdog deadline for one top-level execution.
    pub execution_timeout: Duration,
    /// Forwarded to the executor's engine configuration.
    pub sigsegv_passthrough: bool,
    /// Maximum depth of concurrently live WASM instances.
    pub max_instances: u64,
}

/// Lower bound on the watchdog deadline; shorter values are raised to this.
pub const MIN_EXECUTION_TIMEOUT: Duration = Duration::from_secs(1);

/// Bound of the warm-instance cache.
pub const WARM_INSTANCE_CACHE_SIZE: usize = 100;

/// Default maximum instance-stack depth.
pub const DEFAULT_MAX_INSTANCES: u64 = 10;

impl HostConfig {
    pub fn validate(&self) -> VMResult<()> {
        if self.vm_type.is_empty() {
            return Err(VMError::InvalidArgument("empty vm type".to_string()));
        }
        if self.reserved_key_prefix.is_empty() {
            return Err(VMError::InvalidArgument(
                "empty reserved key prefix".to_string(),
            ));
        }
        if self.block_gas_limit == 0 {
            return Err(VMError::InvalidArgument("zero block gas limit".to_string()));
        }
        Ok(())
    }

    /// The configured timeout, clamped to the supported minimum.
    pub fn effective_timeout(&self) -> Duration {
        self.execution_timeout.max(MIN_EXECUTION_TIMEOUT)
    }
}
