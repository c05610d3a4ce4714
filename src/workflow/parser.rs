//! Workflow Parser
//!
//! Loads workflow graphs from YAML definitions. The document lists
//! processes, generators and aggregators, then the connections between
//! their ports as `process.port` endpoints:
//!
//! ```yaml
//! name: caw-preprocessing
//! max_tasks: 4
//! processes:
//!   - name: download_apps
//!     command: wget http://uppnex.se/apps.tar.gz -O {o:apps}
//!     outputs:
//!       apps: { static: data/uppnex_apps.tar.gz }
//!   - name: unzip_apps
//!     command: zcat {i:targz} > {o:tar}
//!     outputs:
//!       tar: { replace: { input: targz, search: ".gz", with: "" } }
//!     temp: [tar]
//! connections:
//!   - { from: download_apps.apps, to: unzip_apps.targz }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::Deserialize;

use crate::error::{FlowError, GraphBuildError};

use super::model::Workflow;
use super::port::{PortDirection, PortRef};
use super::process::ProcessId;

fn default_max_tasks() -> usize {
    num_cpus::get()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkflowDef {
    name: String,
    #[serde(default = "default_max_tasks")]
    max_tasks: usize,
    #[serde(default)]
    processes: Vec<ProcessDef>,
    #[serde(default)]
    param_sources: Vec<ParamSourceDef>,
    #[serde(default)]
    file_sources: Vec<FileSourceDef>,
    #[serde(default)]
    substreams: Vec<SubstreamDef>,
    #[serde(default)]
    connections: Vec<ConnectionDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProcessDef {
    name: String,
    command: String,
    #[serde(default)]
    outputs: BTreeMap<String, OutputDef>,
    #[serde(default)]
    temp: Vec<String>,
}

/// Path rule of one out-port. Exactly one field must be set.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OutputDef {
    #[serde(rename = "static")]
    static_path: Option<String>,
    replace: Option<ReplaceDef>,
    template: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReplaceDef {
    input: String,
    search: String,
    with: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ParamSourceDef {
    name: String,
    values: Vec<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSourceDef {
    name: String,
    paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SubstreamDef {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConnectionDef {
    from: String,
    to: String,
}

/// Loads a workflow from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use sciflow::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("pipeline.yaml")?;
///     println!("Loaded {} processes", workflow.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: impl AsRef<Path>) -> Result<Workflow, FlowError> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|e| {
        FlowError::Config(format!(
            "Failed to read workflow file '{}': {}. Check that the file exists and is readable.",
            path.display(),
            e
        ))
    })?;
    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    parse_workflow(&yaml_content)
}

/// Parses a workflow from YAML text.
///
/// Only the document and its wiring are checked here. Unconnected
/// in-ports and cycles are reported when a run is planned, so a partial
/// graph can still run the subset selected with `--procs`.
pub fn parse_workflow(content: &str) -> Result<Workflow, FlowError> {
    let def: WorkflowDef = serde_yaml::from_str(content)
        .map_err(|e| FlowError::Config(format!("Failed to parse workflow YAML: {}", e)))?;

    let workflow = build_workflow(def)?;

    info!(
        "Parsed workflow '{}': {} processes, {} connections",
        workflow.name(),
        workflow.len(),
        workflow.connections().len()
    );
    Ok(workflow)
}

fn build_workflow(def: WorkflowDef) -> Result<Workflow, FlowError> {
    let mut wf = Workflow::new(def.name, def.max_tasks);

    for source in def.param_sources {
        let values = source
            .values
            .iter()
            .map(|v| scalar_to_string(&source.name, v))
            .collect::<Result<Vec<_>, _>>()?;
        wf.new_param_source(&source.name, values)?;
    }

    for source in def.file_sources {
        wf.new_file_source(&source.name, source.paths)?;
    }

    for substream in def.substreams {
        wf.new_stream_to_substream(&substream.name)?;
    }

    for process in def.processes {
        let id = wf.new_process(&process.name, &process.command)?;
        for (port, output) in process.outputs {
            apply_output(&mut wf, id, &process.name, &port, output)?;
        }
        for port in &process.temp {
            wf.mark_temp(id, port)?;
        }
    }

    for connection in def.connections {
        let from = source_endpoint(&wf, &connection.from)?;
        let to = target_endpoint(&wf, &connection.to)?;
        wf.connect(from, to)?;
    }

    Ok(wf)
}

fn apply_output(
    wf: &mut Workflow,
    id: ProcessId,
    process: &str,
    port: &str,
    output: OutputDef,
) -> Result<(), FlowError> {
    match output {
        OutputDef {
            static_path: Some(path),
            replace: None,
            template: None,
        } => wf.set_path_static(id, port, &path)?,
        OutputDef {
            static_path: None,
            replace: Some(r),
            template: None,
        } => wf.set_path_replace(id, &r.input, port, &r.search, &r.with)?,
        OutputDef {
            static_path: None,
            replace: None,
            template: Some(template),
        } => wf.set_path_template(id, port, &template)?,
        _ => {
            return Err(FlowError::Config(format!(
                "Output '{}.{}' must set exactly one of static, replace or template",
                process, port
            )))
        }
    }
    Ok(())
}

fn scalar_to_string(source: &str, value: &serde_yaml::Value) -> Result<String, FlowError> {
    match value {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(FlowError::Config(format!(
            "Parameter source '{}' has a non-scalar value: {:?}",
            source, other
        ))),
    }
}

/// Splits `process.port` at its last dot.
fn split_endpoint<'a>(wf: &Workflow, endpoint: &'a str) -> Result<(ProcessId, &'a str), FlowError> {
    let (process, port) = endpoint
        .rsplit_once('.')
        .filter(|(p, port)| !p.is_empty() && !port.is_empty())
        .ok_or_else(|| {
            FlowError::Config(format!(
                "Invalid endpoint '{}': expected 'process.port'",
                endpoint
            ))
        })?;
    let id = wf.find(process).ok_or_else(|| {
        FlowError::Config(format!(
            "Endpoint '{}' references unknown process '{}'",
            endpoint, process
        ))
    })?;
    Ok((id, port))
}

/// Resolves the producing side of a connection: an out-port or a
/// param-out port.
fn source_endpoint(wf: &Workflow, endpoint: &str) -> Result<PortRef, FlowError> {
    let (id, port) = split_endpoint(wf, endpoint)?;
    let process = wf.process(id).ok_or(GraphBuildError::UnknownProcess(id.index()))?;

    let direction = [PortDirection::Out, PortDirection::ParamOut]
        .into_iter()
        .find(|d| process.has_port(port, *d))
        .ok_or_else(|| GraphBuildError::UnknownPort {
            process: process.name().to_string(),
            port: port.to_string(),
            direction: PortDirection::Out,
        })?;
    Ok(PortRef::new(id, port, direction))
}

/// Resolves the consuming side of a connection: an in-port or a param-port.
fn target_endpoint(wf: &Workflow, endpoint: &str) -> Result<PortRef, FlowError> {
    let (id, port) = split_endpoint(wf, endpoint)?;
    let process = wf.process(id).ok_or(GraphBuildError::UnknownProcess(id.index()))?;

    let direction = match (
        process.has_port(port, PortDirection::In),
        process.has_port(port, PortDirection::ParamIn),
    ) {
        (true, true) => {
            return Err(GraphBuildError::AmbiguousPort {
                process: process.name().to_string(),
                port: port.to_string(),
            }
            .into())
        }
        (true, false) => PortDirection::In,
        (false, true) => PortDirection::ParamIn,
        (false, false) => {
            return Err(GraphBuildError::UnknownPort {
                process: process.name().to_string(),
                port: port.to_string(),
                direction: PortDirection::In,
            }
            .into())
        }
    };
    Ok(PortRef::new(id, port, direction))
}
