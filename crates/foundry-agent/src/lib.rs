//! Record schemas, tasks, tag handlers and the retrying agent for Foundry.
//!
//! Provides the closed [`ElementKind`] set with its schemas and batch
//! validation, [`Task`] templates, the [`Handler`] trait with the data, file
//! and command handlers, the [`HandlerRegistry`], and [`Agent`], which sends a
//! task to its model and dispatches the reply's records to handlers.

pub mod agent;
pub mod element;
pub mod events;
pub mod handler;
pub mod retry;
pub mod task;

pub use agent::{Agent, TaskOutput, DEFAULT_MAX_ATTEMPTS};
pub use element::{
    create_elements, validate_records, CodeSegment, CommandElement, ElementKind, ElementRegistry,
    ElementSchema, FieldKind, FieldSpec, FileElement, FunctionalityTest, Implementation,
    Requirement,
};
pub use events::{AgentEvent, EventEmitter};
pub use handler::{
    CommandHandler, DataHandler, DynHandler, FileHandler, Handler, HandlerPaths, HandlerRegistry,
    UnknownTagPolicy,
};
pub use retry::BackoffPolicy;
pub use task::Task;
