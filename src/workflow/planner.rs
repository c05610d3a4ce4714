//! Execution Planner
//!
//! Decides which processes take part in a run and tracks their status:
//! - Run selection (everything, or the upstream closure of the processes
//!   whose names match a pattern)
//! - Per-process status and metrics
//! - Progress reporting

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use log::{debug, info};
use regex::Regex;
use serde::Serialize;

use crate::error::GraphBuildError;

use super::model::Workflow;
use super::process::ProcessId;
use super::validator::validate_workflow;

/// Status of a process during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum ProcessStatus {
    /// Not started yet
    Pending,
    /// Coordinating thread is running
    Running,
    /// All invocations finished successfully
    Completed,
    /// Failed with error message
    Failed(String),
    /// Every invocation was skipped (outputs already existed)
    Skipped,
    /// Stopped because another process failed
    Aborted,
}

impl ProcessStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// Execution metrics for a single process.
#[derive(Debug, Clone)]
pub struct ProcessMetrics {
    pub start_time: Option<Instant>,
    pub end_time: Option<Instant>,
    pub duration_ms: Option<u128>,
    /// External commands actually invoked
    pub invocations: usize,
    /// Invocations skipped because their outputs existed
    pub skipped_invocations: usize,
    pub status: ProcessStatus,
}

impl ProcessMetrics {
    fn new() -> Self {
        Self {
            start_time: None,
            end_time: None,
            duration_ms: None,
            invocations: 0,
            skipped_invocations: 0,
            status: ProcessStatus::Pending,
        }
    }

    fn finish(&mut self, status: ProcessStatus) {
        let now = Instant::now();
        self.end_time = Some(now);
        if let Some(start) = self.start_time {
            self.duration_ms = Some(now.duration_since(start).as_millis());
        }
        self.status = status;
    }
}

/// Selects the processes of a run and tracks their progress.
#[derive(Debug)]
pub struct ExecutionPlanner {
    /// Selected processes in topological order
    order: Vec<ProcessId>,
    selected: HashSet<ProcessId>,
    names: HashMap<ProcessId, String>,
    metrics: HashMap<ProcessId, ProcessMetrics>,
}

impl ExecutionPlanner {
    /// Plans a run of the whole workflow.
    pub fn new(workflow: &Workflow) -> Result<Self, GraphBuildError> {
        Self::with_selection(workflow, None)
    }

    /// Plans a run of the processes matching `pattern` and everything
    /// upstream of them.
    pub fn for_pattern(workflow: &Workflow, pattern: &str) -> Result<Self, GraphBuildError> {
        let selection = select_upstream_of(workflow, pattern)?;
        Self::with_selection(workflow, Some(selection))
    }

    fn with_selection(
        workflow: &Workflow,
        selection: Option<HashSet<ProcessId>>,
    ) -> Result<Self, GraphBuildError> {
        let order = validate_workflow(workflow, selection.as_ref())?;
        let selected: HashSet<ProcessId> = order.iter().copied().collect();

        let names = order
            .iter()
            .filter_map(|id| workflow.process(*id).map(|p| (*id, p.name().to_string())))
            .collect();
        let metrics = order.iter().map(|id| (*id, ProcessMetrics::new())).collect();

        info!(
            "Planned run: {} of {} processes selected",
            order.len(),
            workflow.len()
        );

        Ok(Self {
            order,
            selected,
            names,
            metrics,
        })
    }

    /// Selected processes in topological order.
    pub fn order(&self) -> &[ProcessId] {
        &self.order
    }

    pub fn is_selected(&self, id: ProcessId) -> bool {
        self.selected.contains(&id)
    }

    pub fn name(&self, id: ProcessId) -> &str {
        self.names.get(&id).map(String::as_str).unwrap_or_default()
    }

    pub fn mark_running(&mut self, id: ProcessId) {
        if let Some(metrics) = self.metrics.get_mut(&id) {
            metrics.start_time = Some(Instant::now());
            metrics.status = ProcessStatus::Running;
        }
    }

    /// Adds to a process's invocation counters.
    pub fn record_invocations(&mut self, id: ProcessId, invoked: usize, skipped: usize) {
        if let Some(metrics) = self.metrics.get_mut(&id) {
            metrics.invocations += invoked;
            metrics.skipped_invocations += skipped;
        }
    }

    /// Marks a process as done. It counts as skipped when it had
    /// invocations and every one of them was skipped.
    pub fn mark_completed(&mut self, id: ProcessId) {
        if let Some(metrics) = self.metrics.get_mut(&id) {
            let status = if metrics.invocations == 0 && metrics.skipped_invocations > 0 {
                ProcessStatus::Skipped
            } else {
                ProcessStatus::Completed
            };
            debug!("Process {} finished: {:?}", id, status);
            metrics.finish(status);
        }
    }

    pub fn mark_failed(&mut self, id: ProcessId, error: String) {
        if let Some(metrics) = self.metrics.get_mut(&id) {
            metrics.finish(ProcessStatus::Failed(error));
        }
    }

    pub fn mark_aborted(&mut self, id: ProcessId) {
        if let Some(metrics) = self.metrics.get_mut(&id) {
            if !metrics.status.is_finished() {
                metrics.finish(ProcessStatus::Aborted);
            }
        }
    }

    /// Marks every unfinished process as aborted.
    pub fn abort_remaining(&mut self) {
        for metrics in self.metrics.values_mut() {
            if !metrics.status.is_finished() {
                metrics.finish(ProcessStatus::Aborted);
            }
        }
    }

    pub fn has_work_remaining(&self) -> bool {
        self.metrics.values().any(|m| !m.status.is_finished())
    }

    /// Progress as (finished, total).
    pub fn progress(&self) -> (usize, usize) {
        let finished = self.metrics.values().filter(|m| m.status.is_finished()).count();
        (finished, self.order.len())
    }

    pub fn status(&self, id: ProcessId) -> Option<&ProcessStatus> {
        self.metrics.get(&id).map(|m| &m.status)
    }

    pub fn get_metrics(&self) -> &HashMap<ProcessId, ProcessMetrics> {
        &self.metrics
    }

    /// Names of processes whose metrics satisfy `pred`, in topological order.
    pub fn names_with(&self, pred: impl Fn(&ProcessMetrics) -> bool) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.metrics.get(*id).map_or(false, &pred))
            .map(|id| self.name(*id).to_string())
            .collect()
    }
}

/// Returns the processes whose names match `pattern`, plus every process
/// upstream of them.
pub fn select_upstream_of(
    workflow: &Workflow,
    pattern: &str,
) -> Result<HashSet<ProcessId>, GraphBuildError> {
    let regex = Regex::new(pattern).map_err(|e| GraphBuildError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    let matching: Vec<ProcessId> = workflow
        .processes()
        .iter()
        .filter(|p| regex.is_match(p.name()))
        .map(|p| p.id())
        .collect();

    if matching.is_empty() {
        return Err(GraphBuildError::NoMatchingProcess {
            pattern: pattern.to_string(),
            available: workflow.process_names(),
        });
    }

    let mut selection = HashSet::new();
    let mut stack = matching;
    while let Some(id) = stack.pop() {
        if selection.insert(id) {
            stack.extend(workflow.upstream(id));
        }
    }

    debug!("Pattern '{}' selects {} processes", pattern, selection.len());
    Ok(selection)
}
