//! Process Run Loops
//!
//! One function per process kind. Each runs on the process's own
//! coordinating thread, blocks only on its ports (and on the task pool
//! before invoking a command), and closes its out-ports when it returns.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;

use crossbeam_channel::Select;
use log::{debug, info};

use crate::error::FlowError;
use crate::workflow::path_rule::TaskView;
use crate::workflow::port::{InPort, OutPort, PortDirection, PortSpec};
use crate::workflow::process::{Process, ProcessKind, SUBSTREAM_OUT_PORT};
use crate::workflow::template::CommandTemplate;
use crate::workflow::token::{FileToken, Token};

use super::pool::TaskPool;
use super::task::{
    ensure_output_directories, finalize_outputs, outputs_exist, run_command, temp_path,
};

/// Settings shared by every process thread of a run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub pool: TaskPool,
    pub working_dir: Option<PathBuf>,
    pub atomic_outputs: bool,
    pub skip_existing: bool,
    pub dry_run: bool,
}

impl RunContext {
    pub fn new(pool: TaskPool) -> Self {
        Self {
            pool,
            working_dir: None,
            atomic_outputs: true,
            skip_existing: false,
            dry_run: false,
        }
    }
}

/// Run-time endpoints of one process, wired by the engine.
#[derive(Debug, Default)]
pub struct ProcessPorts {
    /// In-ports (data and param) in declaration order
    pub inputs: Vec<(PortSpec, InPort)>,
    /// Out-ports by name
    pub outputs: BTreeMap<String, OutPort>,
}

impl ProcessPorts {
    fn close_outputs(&mut self) {
        for port in self.outputs.values_mut() {
            port.close();
        }
    }
}

/// What a process did during a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutcome {
    /// Commands invoked (or rendered, in a dry run)
    pub invocations: usize,
    /// Invocations skipped because their outputs existed
    pub skipped: usize,
    /// Tokens sent on out-ports
    pub emitted: usize,
    /// Outputs marked temporary
    pub temp_files: Vec<String>,
    /// Stopped early because the run was aborted
    pub aborted: bool,
}

/// Fires a callback the first time a process becomes active.
struct StartSignal<'a> {
    hook: Option<&'a mut dyn FnMut()>,
}

impl StartSignal<'_> {
    fn fire(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook();
        }
    }
}

/// Runs one process to completion.
pub fn run_process(
    process: &Process,
    ports: ProcessPorts,
    ctx: &RunContext,
) -> Result<ProcessOutcome, FlowError> {
    run_process_with(process, ports, ctx, &mut || {})
}

/// Runs one process to completion, calling `on_start` once when it becomes
/// active: at once for generators, on the first input for everything else.
pub fn run_process_with(
    process: &Process,
    mut ports: ProcessPorts,
    ctx: &RunContext,
    on_start: &mut dyn FnMut(),
) -> Result<ProcessOutcome, FlowError> {
    debug!("Process '{}' ({}) started", process.name(), process.kind().label());
    let mut started = StartSignal { hook: Some(on_start) };

    let result = match process.kind() {
        ProcessKind::ParamSource { values } => {
            started.fire();
            let tokens = values.iter().map(Token::param);
            Ok(run_generator(&mut ports, tokens, ctx))
        }
        ProcessKind::FileSource { paths } => {
            started.fire();
            let tokens = paths.iter().map(|p| Token::file(p.as_str(), Some(process.id())));
            Ok(run_generator(&mut ports, tokens, ctx))
        }
        ProcessKind::StreamToSubStream => Ok(run_stream_to_substream(&mut ports, &mut started)),
        ProcessKind::Command { template } => {
            run_command_process(process, template, &mut ports, ctx, &mut started)
        }
    };

    // Abort before closing, so consumers woken by the closure see the abort
    if result.is_err() {
        ctx.pool.abort();
    }
    started.fire();
    ports.close_outputs();
    result
}

/// Sends each token in order on every out-port, then closes.
fn run_generator(
    ports: &mut ProcessPorts,
    tokens: impl Iterator<Item = Token>,
    ctx: &RunContext,
) -> ProcessOutcome {
    let mut outcome = ProcessOutcome::default();
    for token in tokens {
        if ctx.pool.is_aborted() {
            outcome.aborted = true;
            break;
        }
        for port in ports.outputs.values_mut() {
            port.send(token.clone());
        }
        outcome.emitted += 1;
    }
    outcome
}

/// Buffers the whole in-stream and emits it as one batch.
fn run_stream_to_substream(ports: &mut ProcessPorts, started: &mut StartSignal) -> ProcessOutcome {
    let mut buffer = Vec::new();
    for (_, port) in ports.inputs.iter_mut() {
        while let Some(token) = port.receive() {
            started.fire();
            buffer.push(token);
        }
    }
    debug!("Collected {} tokens into one substream", buffer.len());

    let batch = Token::Batch(buffer);
    if let Some(port) = ports.outputs.get_mut(SUBSTREAM_OUT_PORT) {
        port.send(batch);
    }
    ProcessOutcome {
        emitted: 1,
        ..ProcessOutcome::default()
    }
}

/// One in-port of a command process and what it has delivered so far.
struct InputSlot {
    spec: PortSpec,
    port: InPort,
    /// Tokens drained ahead of use while waiting on another port
    pending: VecDeque<Token>,
    last: Option<Token>,
    consumed: usize,
    constant: bool,
}

impl InputSlot {
    fn new(spec: PortSpec, port: InPort) -> Self {
        Self {
            spec,
            port,
            pending: VecDeque::new(),
            last: None,
            consumed: 0,
            constant: false,
        }
    }
}

/// Blocks until slot `wanted` has a token or is closed.
///
/// Every open port is watched at once and whatever arrives is queued on
/// its slot, so an upstream feeding several of these ports never stalls
/// on a full channel while another port is awaited.
fn next_token(slots: &mut [InputSlot], wanted: usize) -> Option<Token> {
    loop {
        if let Some(token) = slots[wanted].pending.pop_front() {
            return Some(token);
        }
        if slots[wanted].port.is_closed() {
            return None;
        }

        let (index, result) = {
            let open: Vec<(usize, _)> = slots
                .iter()
                .enumerate()
                .filter_map(|(i, slot)| slot.port.receiver().map(|rx| (i, rx)))
                .collect();
            let mut select = Select::new();
            for &(_, rx) in &open {
                select.recv(rx);
            }
            let op = select.select();
            let (index, rx) = open[op.index()];
            (index, op.recv(rx))
        };

        if let Some(token) = slots[index].port.accept(result) {
            slots[index].pending.push_back(token);
        }
    }
}

enum Tuple {
    Ready(TaskView),
    Exhausted,
    Aborted,
}

/// Receives the next input tuple.
///
/// A port that closed after one token keeps supplying it; a port that closed
/// after several ends the stream. A stream where every port closed empty is
/// empty, not an error.
fn next_tuple(
    process: &str,
    slots: &mut [InputSlot],
    first: bool,
    ctx: &RunContext,
) -> Result<Tuple, FlowError> {
    if slots.is_empty() {
        return Ok(if first {
            Tuple::Ready(TaskView::new(process, BTreeMap::new(), BTreeMap::new()))
        } else {
            Tuple::Exhausted
        });
    }

    let mut fresh = false;
    let mut empty_port = None;

    for i in 0..slots.len() {
        if slots[i].constant {
            continue;
        }
        match next_token(slots, i) {
            Some(token) => {
                let slot = &mut slots[i];
                slot.last = Some(token);
                slot.consumed += 1;
                fresh = true;
            }
            None => match slots[i].consumed {
                0 => {
                    empty_port.get_or_insert_with(|| slots[i].spec.name.clone());
                }
                1 => slots[i].constant = true,
                _ => return Ok(Tuple::Exhausted),
            },
        }
    }

    if let Some(port) = empty_port {
        if slots.iter().any(|s| s.consumed > 0) {
            // A failed upstream closes its ports after aborting the run
            if ctx.pool.is_aborted() {
                debug!("Process '{}': in-port '{}' closed by an aborted run", process, port);
                return Ok(Tuple::Aborted);
            }
            return Err(FlowError::PortClosedUnexpectedly {
                process: process.to_string(),
                port,
            });
        }
        debug!("Process '{}': empty input stream", process);
        return Ok(Tuple::Exhausted);
    }

    if !fresh {
        return Ok(Tuple::Exhausted);
    }

    let mut inputs = BTreeMap::new();
    let mut params = BTreeMap::new();
    for slot in slots.iter() {
        let Some(token) = &slot.last else { continue };
        if slot.spec.direction == PortDirection::ParamIn {
            params.insert(
                slot.spec.name.clone(),
                token.as_str().unwrap_or_default().to_string(),
            );
        } else {
            inputs.insert(slot.spec.name.clone(), token.clone());
        }
    }
    Ok(Tuple::Ready(TaskView::new(process, inputs, params)))
}

/// Loops receive → resolve → render → invoke → send until the inputs run out.
fn run_command_process(
    process: &Process,
    template: &CommandTemplate,
    ports: &mut ProcessPorts,
    ctx: &RunContext,
    started: &mut StartSignal,
) -> Result<ProcessOutcome, FlowError> {
    let name = process.name();
    let working_dir = ctx.working_dir.as_deref();
    let out_ports: Vec<String> = process
        .ports_of(PortDirection::Out)
        .map(|p| p.name.clone())
        .collect();

    let mut slots: Vec<InputSlot> = ports
        .inputs
        .drain(..)
        .map(|(spec, port)| InputSlot::new(spec, port))
        .collect();

    let mut outcome = ProcessOutcome::default();
    let mut first = true;

    loop {
        let view = match next_tuple(name, &mut slots, first, ctx)? {
            Tuple::Ready(view) => view,
            Tuple::Exhausted => break,
            Tuple::Aborted => {
                outcome.aborted = true;
                break;
            }
        };
        first = false;
        started.fire();

        let resolved = resolve_outputs(process, &out_ports, &view)?;
        let final_paths: Vec<String> = resolved.iter().map(|(_, path)| path.clone()).collect();
        let rendered: HashMap<String, String> = resolved
            .iter()
            .map(|(port, path)| {
                let path = if ctx.atomic_outputs { temp_path(path) } else { path.clone() };
                (port.clone(), path)
            })
            .collect();

        let command = template
            .render(view.inputs(), view.params(), &rendered)
            .map_err(|e| FlowError::Execution {
                process: name.to_string(),
                command: template.text().to_string(),
                reason: format!("cannot render command: {}", e),
            })?;

        if ctx.skip_existing && outputs_exist(&final_paths, working_dir) {
            info!("Process '{}': outputs exist, skipping: {}", name, final_paths.join(", "));
            outcome.skipped += 1;
        } else if ctx.dry_run {
            info!("[DRY RUN] {}: {}", name, command);
            outcome.invocations += 1;
        } else {
            let Some(slot) = ctx.pool.acquire() else {
                debug!("Process '{}': run aborted before invocation", name);
                outcome.aborted = true;
                break;
            };
            ensure_output_directories(&final_paths, working_dir)?;
            run_command(name, &command, working_dir)?;
            drop(slot);

            if ctx.pool.is_aborted() {
                debug!("Process '{}': run aborted, discarding results", name);
                outcome.aborted = true;
                break;
            }
            if ctx.atomic_outputs {
                finalize_outputs(&final_paths, working_dir)?;
            }
            outcome.invocations += 1;
        }

        for (port, path) in resolved {
            let temp = process.is_temp(&port);
            if temp {
                outcome.temp_files.push(path.clone());
            }
            let token = Token::File(FileToken {
                path,
                producer: Some(process.id()),
                temp,
            });
            if let Some(out) = ports.outputs.get_mut(&port) {
                out.send(token);
                outcome.emitted += 1;
            }
        }
    }

    Ok(outcome)
}

/// Resolves every out-port path of one invocation.
fn resolve_outputs(
    process: &Process,
    out_ports: &[String],
    view: &TaskView,
) -> Result<Vec<(String, String)>, FlowError> {
    out_ports
        .iter()
        .map(|port| {
            let error = |reason: String| FlowError::PathResolution {
                process: process.name().to_string(),
                port: port.clone(),
                reason,
            };
            let rule = process
                .path_rule(port)
                .ok_or_else(|| error("no path rule set".to_string()))?;
            let path = rule.resolve(view).map_err(error)?;
            Ok((port.clone(), path))
        })
        .collect()
}
