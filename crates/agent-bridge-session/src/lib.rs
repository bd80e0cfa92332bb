//! Session orchestration for the agent bridge.
//!
//! Provides:
//! - `SessionRegistry` - Bind conversations to remote agents
//! - `MemorySynchronizer` - Read-through block cache with remote-wins writes
//! - `CommandDispatcher` - Single entry point, serialized per session
//! - Binding storage implementations (memory)

pub mod dispatcher;
pub mod memory_sync;
pub mod registry;
pub mod storage;

#[cfg(test)]
mod testing;

pub use dispatcher::{Command, CommandDispatcher, DispatchOutput};
pub use memory_sync::MemorySynchronizer;
pub use registry::{SessionRegistry, SessionSlot};
