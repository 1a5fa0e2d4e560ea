//! bonsai-core - Core chat types shared across the bonsai crates
//!
//! This crate provides the foundational types the budget engine consumes:
//! - `message` - Role, Message and constructor helpers
//! - `tools` - tool invocation and tool definition records

pub mod message;
pub mod tools;

pub use message::{Message, Role};
pub use tools::{FunctionCall, FunctionSchema, ToolCall, ToolSchema};
