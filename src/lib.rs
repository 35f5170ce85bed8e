#![forbid(unsafe_code)]

//! # flowsmith
//!
//! Turns a project description and a flowchart into working source code, one
//! generative-model stage at a time: first a function-call chart of the
//! required features, then a file manifest of the target project, then the
//! implementation of every manifest file, synthesized concurrently.
//!
//! The interesting parts live in three layers:
//!
//! - [`gateway`] - a uniform chat interface over interchangeable model
//!   backends, with bounded rate-limit retry.
//! - [`extract`] - liberal recovery of JSON (and code blocks) from model
//!   replies that rarely arrive clean.
//! - [`pipeline`] - the staged orchestration itself, persisting every raw
//!   response so a failed extraction never loses work.

pub mod extract;
pub mod gateway;
pub mod manifest;
pub mod pipeline;
pub mod prompts;
pub mod store;

pub use gateway::{
    ChatGateway, ChatModel, ChatRequest, ChatResponse, Message, ProviderError, ProviderGateway,
    RetryConfig, RetryingGateway,
};
pub use manifest::{FileManifest, FileManifestEntry, FunctionCallChart, NONE_OBJECT};
pub use pipeline::{
    ChartOutput, FeatureChangeOutput, ManifestOutput, Pipeline, PipelineConfig, PipelineError,
    ProjectSnapshot, SynthesisReport,
};
pub use store::{FileRef, FileStore, FsStore, MemoryStore, ProjectKey, ProjectState, ProjectStore};
