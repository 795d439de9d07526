//! The seven execution contexts owned by the host.
//!
//! Every context keeps a stack of saved states so nested calls can commit or
//! roll back independently. The host pushes and pops all stacks together;
//! their depths are identical at every suspension point.
//!
//! Contexts never hold references to each other. Operations that span
//! contexts take the siblings they need as explicit parameters, and the
//! host methods split-borrow its fields to provide them.

pub mod async_ctx;
pub mod blockchain;
pub mod managed_types;
pub mod metering;
pub mod output;
pub mod runtime;
pub mod storage;

pub use async_ctx::{
    AsyncCall, AsyncCallExecutionMode, AsyncCallGroup, AsyncCallStatus, AsyncContext,
};
pub use blockchain::BlockchainContext;
pub use managed_types::ManagedTypesContext;
pub use metering::MeteringContext;
pub use output::OutputContext;
pub use runtime::RuntimeContext;
pub use storage::{StorageContext, StorageStatus};
