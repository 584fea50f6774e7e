//! Allow-list and subscription workflows

pub mod executor;
pub mod types;

pub use executor::{random_entry_name, WorkflowExecutor, WorkflowRunner, WorkflowSettings};
pub use types::{Receipt, TaskSelection, WorkflowKind, WorkflowParams, WorkflowResult};
