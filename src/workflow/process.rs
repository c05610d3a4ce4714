//! Processes
//!
//! A process is a named node of the workflow graph. Most processes wrap one
//! shell command template; the other kinds are the leaf generators
//! (parameter and file sources) and the stream-to-substream aggregator.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::error::GraphBuildError;

use super::path_rule::PathRule;
use super::port::{PortDirection, PortRef, PortSpec};
use super::template::CommandTemplate;

/// Name of the single out-port of generators and aggregators.
pub const OUT_PORT: &str = "out";

/// Name of the aggregator's in-port.
pub const SUBSTREAM_IN_PORT: &str = "in";

/// Name of the aggregator's out-port.
pub const SUBSTREAM_OUT_PORT: &str = "substream";

/// Strongly-typed handle to a process inside one [`Workflow`](super::Workflow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProcessId(pub(crate) usize);

impl ProcessId {
    pub fn index(self) -> usize {
        self.0
    }

    /// Data in-port reference.
    pub fn input(self, name: &str) -> PortRef {
        PortRef::new(self, name, PortDirection::In)
    }

    /// Data out-port reference.
    pub fn out(self, name: &str) -> PortRef {
        PortRef::new(self, name, PortDirection::Out)
    }

    /// Param in-port reference.
    pub fn param(self, name: &str) -> PortRef {
        PortRef::new(self, name, PortDirection::ParamIn)
    }

    /// Param out-port reference.
    pub fn param_out(self, name: &str) -> PortRef {
        PortRef::new(self, name, PortDirection::ParamOut)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a process does when it runs.
#[derive(Debug, Clone)]
pub enum ProcessKind {
    /// Shell command rendered from a template
    Command { template: CommandTemplate },
    /// Emits a fixed sequence of parameter values
    ParamSource { values: Vec<String> },
    /// Emits a fixed sequence of file paths
    FileSource { paths: Vec<String> },
    /// Collects a whole stream into one batch token
    StreamToSubStream,
}

impl ProcessKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::ParamSource { .. } => "param-source",
            Self::FileSource { .. } => "file-source",
            Self::StreamToSubStream => "stream-to-substream",
        }
    }
}

/// One node of the workflow graph.
#[derive(Debug, Clone)]
pub struct Process {
    id: ProcessId,
    name: String,
    kind: ProcessKind,
    ports: Vec<PortSpec>,
    path_rules: HashMap<String, PathRule>,
    temp_outputs: HashSet<String>,
}

impl Process {
    /// Creates a command process; ports are declared from the template.
    pub(crate) fn command(id: ProcessId, name: &str, template: CommandTemplate) -> Self {
        let ports = template.ports();
        Self::with_ports(id, name, ProcessKind::Command { template }, ports)
    }

    pub(crate) fn param_source(id: ProcessId, name: &str, values: Vec<String>) -> Self {
        let port = PortSpec {
            name: OUT_PORT.to_string(),
            direction: PortDirection::ParamOut,
        };
        Self::with_ports(id, name, ProcessKind::ParamSource { values }, vec![port])
    }

    pub(crate) fn file_source(id: ProcessId, name: &str, paths: Vec<String>) -> Self {
        let port = PortSpec {
            name: OUT_PORT.to_string(),
            direction: PortDirection::Out,
        };
        Self::with_ports(id, name, ProcessKind::FileSource { paths }, vec![port])
    }

    pub(crate) fn stream_to_substream(id: ProcessId, name: &str) -> Self {
        let ports = vec![
            PortSpec {
                name: SUBSTREAM_IN_PORT.to_string(),
                direction: PortDirection::In,
            },
            PortSpec {
                name: SUBSTREAM_OUT_PORT.to_string(),
                direction: PortDirection::Out,
            },
        ];
        Self::with_ports(id, name, ProcessKind::StreamToSubStream, ports)
    }

    fn with_ports(id: ProcessId, name: &str, kind: ProcessKind, ports: Vec<PortSpec>) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind,
            ports,
            path_rules: HashMap::new(),
            temp_outputs: HashSet::new(),
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ProcessKind {
        &self.kind
    }

    /// Command template text, for command processes.
    pub fn command_text(&self) -> Option<&str> {
        match &self.kind {
            ProcessKind::Command { template } => Some(template.text()),
            _ => None,
        }
    }

    pub fn is_command(&self) -> bool {
        matches!(self.kind, ProcessKind::Command { .. })
    }

    pub fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    /// Ports of one direction, in declaration order.
    pub fn ports_of(&self, direction: PortDirection) -> impl Iterator<Item = &PortSpec> {
        self.ports.iter().filter(move |p| p.direction == direction)
    }

    /// All in-ports (data and param).
    pub fn input_ports(&self) -> impl Iterator<Item = &PortSpec> {
        self.ports.iter().filter(|p| p.direction.is_input())
    }

    pub fn has_port(&self, name: &str, direction: PortDirection) -> bool {
        self.ports
            .iter()
            .any(|p| p.name == name && p.direction == direction)
    }

    /// Registers a port. Names are unique per direction.
    pub fn declare_port(
        &mut self,
        name: &str,
        direction: PortDirection,
    ) -> Result<(), GraphBuildError> {
        if self.has_port(name, direction) {
            return Err(GraphBuildError::DuplicatePort {
                process: self.name.clone(),
                port: name.to_string(),
                direction,
            });
        }
        self.ports.push(PortSpec {
            name: name.to_string(),
            direction,
        });
        Ok(())
    }

    /// Associates a path rule with an out-port, declaring the port if the
    /// template does not mention it (outputs named by tool conventions).
    pub fn set_path_rule(&mut self, port: &str, rule: PathRule) -> Result<(), GraphBuildError> {
        if !self.is_command() {
            return Err(GraphBuildError::UnknownPort {
                process: self.name.clone(),
                port: port.to_string(),
                direction: PortDirection::Out,
            });
        }
        if let Some(source) = rule.source_port() {
            if !self.has_port(source, PortDirection::In) {
                return Err(GraphBuildError::UnknownPort {
                    process: self.name.clone(),
                    port: source.to_string(),
                    direction: PortDirection::In,
                });
            }
        }
        if !self.has_port(port, PortDirection::Out) {
            self.declare_port(port, PortDirection::Out)?;
        }
        self.path_rules.insert(port.to_string(), rule);
        Ok(())
    }

    pub fn path_rule(&self, port: &str) -> Option<&PathRule> {
        self.path_rules.get(port)
    }

    /// Flags an out-port's files as intermediate.
    pub fn mark_temp(&mut self, port: &str) -> Result<(), GraphBuildError> {
        if !self.has_port(port, PortDirection::Out) {
            return Err(GraphBuildError::UnknownPort {
                process: self.name.clone(),
                port: port.to_string(),
                direction: PortDirection::Out,
            });
        }
        self.temp_outputs.insert(port.to_string());
        Ok(())
    }

    pub fn is_temp(&self, port: &str) -> bool {
        self.temp_outputs.contains(port)
    }
}
