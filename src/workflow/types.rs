//! Workflow types

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::storage::{BlobId, ImageChoice};

/// Which workflows a batch runs for every wallet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TaskSelection {
    Allowlist,
    Subscription,
    #[default]
    Both,
}

impl TaskSelection {
    pub fn kinds(&self) -> &'static [WorkflowKind] {
        match self {
            TaskSelection::Allowlist => &[WorkflowKind::Allowlist],
            TaskSelection::Subscription => &[WorkflowKind::Subscription],
            TaskSelection::Both => &[WorkflowKind::Allowlist, WorkflowKind::Subscription],
        }
    }
}

impl fmt::Display for TaskSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskSelection::Allowlist => write!(f, "allowlist"),
            TaskSelection::Subscription => write!(f, "subscription"),
            TaskSelection::Both => write!(f, "both"),
        }
    }
}

/// One of the two fixed multi-step workflows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    Allowlist,
    Subscription,
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowKind::Allowlist => write!(f, "Allowlist"),
            WorkflowKind::Subscription => write!(f, "Subscription"),
        }
    }
}

/// Inputs shared by every workflow invocation in a batch
#[derive(Debug, Clone)]
pub struct WorkflowParams {
    pub image: ImageChoice,
    /// Extra identities added to each allow-list besides the wallet itself
    pub extra_identities: Vec<String>,
    /// Iterations per invocation
    pub count: u32,
}

impl WorkflowParams {
    pub fn new(image: ImageChoice) -> Self {
        Self {
            image,
            extra_identities: Vec::new(),
            count: 1,
        }
    }
}

/// Ids produced by one completed iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt {
    Allowlist {
        allowlist_id: String,
        entry_id: String,
        blob_id: BlobId,
    },
    Subscription {
        service_id: String,
        entry_id: String,
        blob_id: BlobId,
    },
}

/// Outcome of one workflow invocation
#[derive(Debug)]
pub struct WorkflowResult {
    pub kind: WorkflowKind,
    /// Iterations that completed before any failure
    pub receipts: Vec<Receipt>,
    pub error: Option<Error>,
}

impl WorkflowResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_selection_kinds() {
        assert_eq!(TaskSelection::Allowlist.kinds(), &[WorkflowKind::Allowlist]);
        assert_eq!(
            TaskSelection::Both.kinds(),
            &[WorkflowKind::Allowlist, WorkflowKind::Subscription]
        );
        assert_eq!(TaskSelection::default(), TaskSelection::Both);
    }

    #[test]
    fn test_task_selection_serde() {
        let task: TaskSelection = serde_json::from_str("\"subscription\"").unwrap();
        assert_eq!(task, TaskSelection::Subscription);
        assert_eq!(task.to_string(), "subscription");
    }

    #[test]
    fn test_result_success_flag() {
        let ok = WorkflowResult {
            kind: WorkflowKind::Allowlist,
            receipts: Vec::new(),
            error: None,
        };
        let failed = WorkflowResult {
            kind: WorkflowKind::Subscription,
            receipts: Vec::new(),
            error: Some(Error::UploadExhausted { attempts: 15 }),
        };
        assert!(ok.succeeded());
        assert!(!failed.succeeded());
    }
}
