//! Core abstractions for the agent session bridge.
//!
//! This crate provides the fundamental building blocks:
//! - `Agent`, `MemoryBlock`, `Session`, `Message` - Domain model
//! - `StreamEvent` / `EventStream` - Incremental agent responses
//! - `BridgeError` / `ErrorKind` - Error taxonomy shared by every layer
//! - `BridgeConfig` - Deserializable configuration
//! - `AgentApi` and `BindingStore` traits

pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::BridgeConfig;
pub use error::{BridgeError, ErrorKind};
pub use event::{EventStream, FailureReason, StreamEvent};
pub use traits::{AgentApi, BindingStore};
pub use types::{Agent, ArchivalPassage, MemoryBlock, Message, Role, Session};
