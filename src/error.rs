//! Error Types
//!
//! Two layers of errors:
//!
//! - [`GraphBuildError`]: raised while the graph is built or a run is
//!   configured, before anything executes.
//! - [`FlowError`]: everything a run can fail with. Graph errors are wrapped
//!   so that callers only ever deal with one type at the run boundary.

use std::io;

use thiserror::Error;

use crate::workflow::port::PortDirection;

/// Errors detected while building or configuring a workflow graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphBuildError {
    #[error("Process '{0}' already exists")]
    DuplicateProcess(String),

    #[error("Process name must not be empty")]
    EmptyProcessName,

    #[error("Process '{process}' already has a {direction} port named '{port}'")]
    DuplicatePort {
        process: String,
        port: String,
        direction: PortDirection,
    },

    #[error("Process '{process}' has no {direction} port named '{port}'")]
    UnknownPort {
        process: String,
        port: String,
        direction: PortDirection,
    },

    #[error("Unknown process id {0}")]
    UnknownProcess(usize),

    #[error("Cannot connect {from} port to {to} port ({detail})")]
    IncompatiblePorts {
        from: PortDirection,
        to: PortDirection,
        detail: String,
    },

    #[error("In-port '{process}.{port}' already has an upstream connection")]
    MultipleProducers { process: String, port: String },

    #[error("Connecting '{from}' to '{to}' would create a cycle")]
    CycleDetected { from: String, to: String },

    #[error("In-port '{process}.{port}' is not connected to any producer")]
    UnconnectedPort { process: String, port: String },

    #[error("Port reference '{process}.{port}' is ambiguous (both in-port and param-port)")]
    AmbiguousPort { process: String, port: String },

    #[error("Invalid command template for '{process}': {reason}")]
    InvalidTemplate { process: String, reason: String },

    #[error("Workflow has no processes")]
    EmptyWorkflow,

    #[error("Invalid process name pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error(
        "No process name matches '{pattern}'. Available processes:\n  {}",
        .available.join("\n  ")
    )]
    NoMatchingProcess {
        pattern: String,
        available: Vec<String>,
    },
}

/// Errors surfaced by a workflow run.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Graph(#[from] GraphBuildError),

    #[error("Process '{process}': could not resolve path for out-port '{port}': {reason}")]
    PathResolution {
        process: String,
        port: String,
        reason: String,
    },

    #[error("Process '{process}' failed: {reason}\n  command: {command}")]
    Execution {
        process: String,
        command: String,
        reason: String,
    },

    #[error("Process '{process}': in-port '{port}' closed without delivering any input")]
    PortClosedUnexpectedly { process: String, port: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FlowError {
    /// Name of the process the error belongs to, if any.
    pub fn process(&self) -> Option<&str> {
        match self {
            Self::PathResolution { process, .. }
            | Self::Execution { process, .. }
            | Self::PortClosedUnexpectedly { process, .. } => Some(process),
            _ => None,
        }
    }

    /// True for errors that abort a run (as opposed to build-time errors).
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            Self::Execution { .. } | Self::PortClosedUnexpectedly { .. }
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = FlowError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_error_display() {
        let err = GraphBuildError::MultipleProducers {
            process: "merge".to_string(),
            port: "bams".to_string(),
        };
        assert!(err.to_string().contains("merge.bams"));

        let err = GraphBuildError::DuplicatePort {
            process: "align".to_string(),
            port: "bam".to_string(),
            direction: PortDirection::Out,
        };
        assert!(err.to_string().contains("out"));
        assert!(err.to_string().contains("bam"));
    }

    #[test]
    fn test_no_matching_process_lists_names() {
        let err = GraphBuildError::NoMatchingProcess {
            pattern: "^call".to_string(),
            available: vec!["align".to_string(), "merge".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("'^call'"));
        assert!(msg.ends_with("  align\n  merge"));
    }

    #[test]
    fn test_flow_error_wraps_graph_error() {
        let err: FlowError = GraphBuildError::EmptyWorkflow.into();
        assert!(matches!(err, FlowError::Graph(GraphBuildError::EmptyWorkflow)));
        assert_eq!(err.to_string(), "Workflow has no processes");
        assert!(err.process().is_none());
    }

    #[test]
    fn test_execution_error_names_process_and_command() {
        let err = FlowError::Execution {
            process: "align_samples".to_string(),
            command: "bwa mem ref.fa r1.fq".to_string(),
            reason: "exit status 2".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("align_samples"));
        assert!(msg.contains("bwa mem ref.fa r1.fq"));
        assert_eq!(err.process(), Some("align_samples"));
        assert!(err.is_execution_failure());
    }

    #[test]
    fn test_port_closed_is_execution_failure() {
        let err = FlowError::PortClosedUnexpectedly {
            process: "p".to_string(),
            port: "in".to_string(),
        };
        assert!(err.is_execution_failure());
        assert_eq!(err.process(), Some("p"));
    }
}
