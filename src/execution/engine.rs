//! Workflow Execution Engine
//!
//! The scheduler. It validates and plans the run, wires a bounded channel
//! for every connection between selected processes, and gives each selected
//! process its own coordinating thread. Ordering comes from port blocking
//! alone; the [`TaskPool`] bounds how many external commands run at once.
//!
//! ```text
//!   planner ──▶ wire ports ──▶ spawn one thread per process
//!                                   │ completion (id, result)
//!                                   ▼
//!                            event loop (mpsc) ──▶ RunReport
//! ```
//!
//! The first failure aborts the pool: nothing new starts, in-flight commands
//! finish and their results are discarded, and `run` returns that error.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{error, info, warn};
use serde::Serialize;

use crate::config::RunConfig;
use crate::error::{FlowError, GraphBuildError};
use crate::monitoring::{EventType, ExecutionTimeline};
use crate::workflow::planner::{ExecutionPlanner, ProcessStatus};
use crate::workflow::port::{port_channel, InPort, OutPort, PortRef, TokenSender};
use crate::workflow::process::ProcessId;
use crate::workflow::Workflow;

use super::pool::TaskPool;
use super::runner::{run_process_with, ProcessOutcome, ProcessPorts, RunContext};
use super::task::remove_files;

/// Messages from process threads to the event loop.
enum Signal {
    /// First input arrived (or, for generators, the thread began)
    Started(ProcessId),
    /// The process returned; sent exactly once per thread
    Finished(ProcessId, Result<ProcessOutcome, FlowError>),
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub workflow: String,
    pub started_at: DateTime<Local>,
    pub duration_ms: u64,
    /// Processes that completed, in topological order
    pub executed: Vec<String>,
    /// Processes whose every invocation was skipped
    pub skipped: Vec<String>,
    /// External commands invoked (rendered only, in a dry run)
    pub invocations: usize,
    pub statuses: BTreeMap<String, ProcessStatus>,
    pub removed_temp_files: usize,
    pub dry_run: bool,
    #[serde(skip)]
    pub timeline: ExecutionTimeline,
}

impl RunReport {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Human-readable summary including the Gantt chart.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Workflow '{}' completed: {} processes, {} commands, {} skipped",
            self.workflow,
            self.executed.len(),
            self.invocations,
            self.skipped.len()
        );
        if self.removed_temp_files > 0 {
            out.push_str(&format!(", {} temporary files removed", self.removed_temp_files));
        }
        out.push_str(&format!("\nTotal execution time: {:.2?}\n", self.duration()));
        out.push_str(&self.timeline.gantt_chart());
        out
    }
}

/// Workflow execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use sciflow::execution::Engine;
/// use sciflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("pipeline.yaml")?;
///     let mut engine = Engine::new(workflow);
///     engine.set_max_tasks(4);
///     engine.set_working_dir("/data/analysis");
///
///     let report = engine.run_to_pattern("align.*")?;
///     println!("{}", report.summary());
///     Ok(())
/// }
/// ```
pub struct Engine {
    workflow: Workflow,
    config: RunConfig,
}

impl Engine {
    /// Creates an engine using the workflow's own task limit.
    pub fn new(workflow: Workflow) -> Self {
        let config = RunConfig {
            max_tasks: workflow.max_tasks(),
            ..RunConfig::default()
        };
        Self { workflow, config }
    }

    /// Creates an engine with an explicit configuration.
    pub fn with_config(workflow: Workflow, config: RunConfig) -> Self {
        Self { workflow, config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn set_max_tasks(&mut self, max: usize) {
        self.config.max_tasks = max.max(1);
    }

    pub fn set_channel_capacity(&mut self, capacity: usize) {
        self.config.channel_capacity = capacity.max(1);
    }

    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.config.working_dir = Some(dir.into());
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.config.dry_run = dry_run;
    }

    pub fn set_skip_existing(&mut self, skip: bool) {
        self.config.skip_existing = skip;
    }

    pub fn set_atomic_outputs(&mut self, atomic: bool) {
        self.config.atomic_outputs = atomic;
    }

    pub fn set_remove_temp_files(&mut self, remove: bool) {
        self.config.remove_temp_files = remove;
    }

    /// Runs every process of the workflow.
    pub fn run(self) -> Result<RunReport, FlowError> {
        let planner = ExecutionPlanner::new(&self.workflow)?;
        self.execute(planner)
    }

    /// Runs the processes whose names match `pattern` and everything
    /// upstream of them; nothing downstream is started.
    pub fn run_to_pattern(self, pattern: &str) -> Result<RunReport, FlowError> {
        let planner = ExecutionPlanner::for_pattern(&self.workflow, pattern)?;
        self.execute(planner)
    }

    fn execute(self, mut planner: ExecutionPlanner) -> Result<RunReport, FlowError> {
        let started_at = Local::now();
        let mut timeline = ExecutionTimeline::new();

        if let Some(dir) = &self.config.working_dir {
            if !dir.is_dir() {
                return Err(FlowError::Config(format!(
                    "working directory does not exist: {}",
                    dir.display()
                )));
            }
        }

        info!(
            "Starting workflow '{}' ({} processes, max tasks: {}, dry run: {})",
            self.workflow.name(),
            planner.order().len(),
            self.config.max_tasks,
            self.config.dry_run
        );

        let pool = TaskPool::new(self.config.max_tasks);
        let ctx = RunContext {
            pool: pool.clone(),
            working_dir: self.config.working_dir.clone(),
            atomic_outputs: self.config.atomic_outputs,
            skip_existing: self.config.skip_existing,
            dry_run: self.config.dry_run,
        };

        let mut ports = self.wire_ports(&planner);
        let (tx, rx): (Sender<Signal>, Receiver<Signal>) = channel();
        let mut handles = Vec::with_capacity(planner.order().len());

        for id in planner.order().to_vec() {
            let process = self
                .workflow
                .process(id)
                .cloned()
                .ok_or(GraphBuildError::UnknownProcess(id.index()))?;
            let process_ports = ports.remove(&id).unwrap_or_default();
            let tx = tx.clone();
            let ctx = ctx.clone();

            let spawned = thread::Builder::new()
                .name(format!("sciflow-{}", process.name()))
                .spawn(move || {
                    let start_tx = tx.clone();
                    let mut on_start = move || {
                        // The receiver outlives every process thread
                        let _ = start_tx.send(Signal::Started(id));
                    };
                    let result = run_process_with(&process, process_ports, &ctx, &mut on_start);
                    if let Err(e) = tx.send(Signal::Finished(id, result)) {
                        error!("Failed to send completion signal: {}", e);
                    }
                });

            match spawned {
                Ok(handle) => handles.push((id, handle)),
                Err(e) => {
                    pool.abort();
                    return Err(FlowError::Io(e));
                }
            }
        }
        drop(tx);

        let mut first_error: Option<FlowError> = None;
        let mut temp_files: Vec<String> = Vec::new();

        // The loop ends when every thread has dropped its senders
        while let Ok(signal) = rx.recv() {
            let (id, result) = match signal {
                Signal::Started(id) => {
                    planner.mark_running(id);
                    timeline.add_event(planner.name(id), EventType::Started);
                    continue;
                }
                Signal::Finished(id, result) => (id, result),
            };
            let name = planner.name(id).to_string();
            match result {
                Ok(outcome) if outcome.aborted => {
                    warn!("Process '{}' stopped: run aborted", name);
                    planner.mark_aborted(id);
                    timeline.add_event(name, EventType::Aborted);
                }
                Ok(outcome) => {
                    planner.record_invocations(id, outcome.invocations, outcome.skipped);
                    planner.mark_completed(id);
                    temp_files.extend(outcome.temp_files);
                    let event = match planner.status(id) {
                        Some(ProcessStatus::Skipped) => EventType::Skipped,
                        _ => EventType::Completed,
                    };
                    info!(
                        "Process '{}' finished ({} commands, {} skipped)",
                        name, outcome.invocations, outcome.skipped
                    );
                    timeline.add_event(name, event);
                }
                Err(e) => {
                    error!("Process '{}' failed: {}", name, e);
                    planner.mark_failed(id, e.to_string());
                    timeline.add_event(name, EventType::Failed);
                    // A root failure outranks a missing input it may have caused
                    let replace = match &first_error {
                        None => true,
                        Some(FlowError::PortClosedUnexpectedly { .. }) => {
                            !matches!(e, FlowError::PortClosedUnexpectedly { .. })
                        }
                        Some(_) => false,
                    };
                    if replace {
                        first_error = Some(e);
                    }
                }
            }

            let (done, total) = planner.progress();
            info!("Progress: {}/{} processes", done, total);
        }

        for (id, handle) in handles {
            if handle.join().is_err() {
                let name = planner.name(id).to_string();
                error!("Process '{}' panicked", name);
                planner.mark_failed(id, "process thread panicked".to_string());
                first_error.get_or_insert(FlowError::Execution {
                    process: name,
                    command: String::new(),
                    reason: "process thread panicked".to_string(),
                });
            }
        }

        planner.abort_remaining();
        timeline.finish();

        if let Some(e) = first_error {
            error!("Workflow '{}' failed", self.workflow.name());
            return Err(e);
        }

        let removed_temp_files = if self.config.remove_temp_files && !self.config.dry_run {
            remove_files(&temp_files, self.config.working_dir.as_deref())
        } else {
            0
        };

        let statuses = planner
            .order()
            .iter()
            .filter_map(|id| planner.status(*id).map(|s| (planner.name(*id).to_string(), s.clone())))
            .collect();
        let invocations = planner.get_metrics().values().map(|m| m.invocations).sum();

        Ok(RunReport {
            workflow: self.workflow.name().to_string(),
            started_at,
            duration_ms: timeline.elapsed().as_millis() as u64,
            executed: planner.names_with(|m| m.status == ProcessStatus::Completed),
            skipped: planner.names_with(|m| m.status == ProcessStatus::Skipped),
            invocations,
            statuses,
            removed_temp_files,
            dry_run: self.config.dry_run,
            timeline,
        })
    }

    /// Creates the run-time ports of every selected process. Connections
    /// into unselected processes are left out, so their out-ports simply
    /// have fewer consumers.
    fn wire_ports(&self, planner: &ExecutionPlanner) -> HashMap<ProcessId, ProcessPorts> {
        let mut ports: HashMap<ProcessId, ProcessPorts> = HashMap::new();
        let mut senders: HashMap<PortRef, TokenSender> = HashMap::new();

        for &id in planner.order() {
            let Some(process) = self.workflow.process(id) else { continue };
            let entry = ports.entry(id).or_default();

            for spec in process.ports() {
                if spec.direction.is_input() {
                    let (tx, rx) = port_channel(self.config.channel_capacity);
                    entry.inputs.push((spec.clone(), InPort::new(spec.name.clone(), rx)));
                    senders.insert(PortRef::new(id, spec.name.clone(), spec.direction), tx);
                } else {
                    entry
                        .outputs
                        .insert(spec.name.clone(), OutPort::new(spec.name.clone()));
                }
            }
        }

        for connection in self.workflow.connections() {
            if !planner.is_selected(connection.from.process) || !planner.is_selected(connection.to.process) {
                continue;
            }
            let Some(sender) = senders.get(&connection.to) else { continue };
            if let Some(out) = ports
                .get_mut(&connection.from.process)
                .and_then(|p| p.outputs.get_mut(&connection.from.name))
            {
                // Fan-in producers share one channel through cloned senders
                out.attach(sender.clone());
            }
        }

        // The originals drop here, so each in-port closes with its last producer
        ports
    }
}
