//! # Anyi Core
//!
//! Domain types, traits, and error definitions for the Anyi flow engine.
//! This crate has no HTTP or configuration dependencies; it defines the
//! model that the provider, config and flow crates implement against.
//!
//! ## Design Philosophy
//!
//! Every pluggable part is a trait here: [`ChatClient`] for model providers,
//! [`StepExecutor`] and [`StepValidator`] for what a step does and how its
//! output is checked. Implementations live in their own crates, which keeps
//! the engine testable with scripted mocks.

pub mod client;
pub mod context;
pub mod error;
pub mod message;
pub mod step;
pub mod template;

// Re-export key types at crate root for ergonomics
pub use client::{
    ChatClient, ChatOptions, ChatResponse, FunctionDefinition, FunctionParam, ResponseFormat,
    ResponseInfo,
};
pub use context::{FlowContext, Memory};
pub use error::{
    Error, ExecutorError, FlowError, ProviderError, RegistryError, Result, TemplateError,
};
pub use message::{Message, MessageToolCall, Role};
pub use step::{StepEnv, StepExecutor, StepValidator};
pub use template::{Template, render};
