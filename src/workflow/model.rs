//! Workflow Graph Model
//!
//! The workflow is built imperatively by client code: create processes,
//! attach path rules, connect ports. Building never executes anything; the
//! finished graph is handed to the [`Engine`](crate::execution::Engine).
//!
//! # Example
//!
//! ```
//! use sciflow::workflow::Workflow;
//!
//! let mut wf = Workflow::new("caw-preprocessing", 4);
//!
//! let download = wf.new_process("download_apps", "wget http://uppnex.se/apps.tar.gz -O {o:apps}")?;
//! wf.set_path_static(download, "apps", "data/uppnex_apps.tar.gz")?;
//!
//! let unzip = wf.new_process("unzip_apps", "zcat {i:targz} > {o:tar}")?;
//! wf.set_path_replace(unzip, "targz", "tar", ".gz", "")?;
//! wf.connect(download.out("apps"), unzip.input("targz"))?;
//!
//! assert_eq!(wf.len(), 2);
//! # Ok::<(), sciflow::GraphBuildError>(())
//! ```

use std::collections::HashSet;

use log::debug;
use serde::Serialize;

use crate::error::GraphBuildError;

use super::path_rule::{PathRule, TaskView};
use super::port::{PortDirection, PortRef, PortSpec};
use super::process::{Process, ProcessId, ProcessKind, OUT_PORT};
use super::template::CommandTemplate;

/// Directed edge from an out-port to an in-port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub from: PortRef,
    pub to: PortRef,
}

/// A workflow graph: a registry of processes plus the connections between
/// their ports.
#[derive(Debug, Clone)]
pub struct Workflow {
    name: String,
    max_tasks: usize,
    processes: Vec<Process>,
    connections: Vec<Connection>,
}

impl Workflow {
    /// Creates an empty workflow that runs at most `max_tasks` commands at once.
    pub fn new(name: impl Into<String>, max_tasks: usize) -> Self {
        Self {
            name: name.into(),
            max_tasks: max_tasks.max(1),
            processes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    pub fn set_max_tasks(&mut self, max_tasks: usize) {
        self.max_tasks = max_tasks.max(1);
    }

    fn add(
        &mut self,
        name: &str,
        build: impl FnOnce(ProcessId, &str) -> Process,
    ) -> Result<ProcessId, GraphBuildError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GraphBuildError::EmptyProcessName);
        }
        if self.find(name).is_some() {
            return Err(GraphBuildError::DuplicateProcess(name.to_string()));
        }
        let id = ProcessId(self.processes.len());
        self.processes.push(build(id, name));
        debug!("Added process '{}' ({})", name, id);
        Ok(id)
    }

    /// Creates a command process. Ports are declared from the placeholders
    /// in `command`.
    pub fn new_process(&mut self, name: &str, command: &str) -> Result<ProcessId, GraphBuildError> {
        let template =
            CommandTemplate::parse(command).map_err(|e| GraphBuildError::InvalidTemplate {
                process: name.to_string(),
                reason: e.to_string(),
            })?;
        self.add(name, |id, name| Process::command(id, name, template))
    }

    /// Creates a generator emitting `values` on its param out-port `out`.
    pub fn new_param_source<I, S>(&mut self, name: &str, values: I) -> Result<ProcessId, GraphBuildError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.add(name, |id, name| Process::param_source(id, name, values))
    }

    /// Creates a generator emitting file tokens for `paths` on its out-port `out`.
    pub fn new_file_source<I, S>(&mut self, name: &str, paths: I) -> Result<ProcessId, GraphBuildError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths = paths.into_iter().map(Into::into).collect();
        self.add(name, |id, name| Process::file_source(id, name, paths))
    }

    /// Creates a stream-to-substream aggregator (`in` → `substream`).
    pub fn new_stream_to_substream(&mut self, name: &str) -> Result<ProcessId, GraphBuildError> {
        self.add(name, Process::stream_to_substream)
    }

    fn process_entry(&mut self, id: ProcessId) -> Result<&mut Process, GraphBuildError> {
        self.processes
            .get_mut(id.0)
            .ok_or(GraphBuildError::UnknownProcess(id.0))
    }

    /// Registers an extra port on a process.
    pub fn declare_port(
        &mut self,
        id: ProcessId,
        name: &str,
        direction: PortDirection,
    ) -> Result<(), GraphBuildError> {
        self.process_entry(id)?.declare_port(name, direction)
    }

    pub fn set_path_rule(&mut self, id: ProcessId, port: &str, rule: PathRule) -> Result<(), GraphBuildError> {
        self.process_entry(id)?.set_path_rule(port, rule)
    }

    pub fn set_path_static(&mut self, id: ProcessId, port: &str, path: &str) -> Result<(), GraphBuildError> {
        self.set_path_rule(id, port, PathRule::Static(path.to_string()))
    }

    /// Out-port `out_port` gets the path on `in_port` with `search` replaced.
    pub fn set_path_replace(
        &mut self,
        id: ProcessId,
        in_port: &str,
        out_port: &str,
        search: &str,
        replace: &str,
    ) -> Result<(), GraphBuildError> {
        let rule = PathRule::Replace {
            in_port: in_port.to_string(),
            search: search.to_string(),
            replace: replace.to_string(),
        };
        self.set_path_rule(id, out_port, rule)
    }

    /// Out-port path from a template such as `{i:orig}.ungz`.
    pub fn set_path_template(&mut self, id: ProcessId, port: &str, template: &str) -> Result<(), GraphBuildError> {
        let parsed = CommandTemplate::parse(template).map_err(|e| GraphBuildError::InvalidTemplate {
            process: self.process_name(id),
            reason: e.to_string(),
        })?;
        if parsed.has_outputs() {
            return Err(GraphBuildError::InvalidTemplate {
                process: self.process_name(id),
                reason: format!("path template '{}' may not reference out-ports", template),
            });
        }
        self.set_path_rule(id, port, PathRule::Template(parsed))
    }

    pub fn set_path_custom<F>(&mut self, id: ProcessId, port: &str, f: F) -> Result<(), GraphBuildError>
    where
        F: Fn(&TaskView) -> String + Send + Sync + 'static,
    {
        self.set_path_rule(id, port, PathRule::custom(f))
    }

    /// Flags the files of an out-port as intermediate.
    pub fn mark_temp(&mut self, id: ProcessId, port: &str) -> Result<(), GraphBuildError> {
        self.process_entry(id)?.mark_temp(port)
    }

    /// Wires an out-port to an in-port.
    ///
    /// Fails if the directions do not match, either port is undeclared, the
    /// in-port already has a producer (aggregator in-ports excepted), or the
    /// edge would close a cycle.
    pub fn connect(&mut self, from: PortRef, to: PortRef) -> Result<(), GraphBuildError> {
        let producer = self
            .process(from.process)
            .ok_or(GraphBuildError::UnknownProcess(from.process.0))?;
        let consumer = self
            .process(to.process)
            .ok_or(GraphBuildError::UnknownProcess(to.process.0))?;

        if from.direction.feeds() != Some(to.direction) {
            return Err(GraphBuildError::IncompatiblePorts {
                from: from.direction,
                to: to.direction,
                detail: format!(
                    "{}.{} -> {}.{}",
                    producer.name(),
                    from.name,
                    consumer.name(),
                    to.name
                ),
            });
        }

        for (process, port) in [(producer, &from), (consumer, &to)] {
            if !process.has_port(&port.name, port.direction) {
                return Err(GraphBuildError::UnknownPort {
                    process: process.name().to_string(),
                    port: port.name.clone(),
                    direction: port.direction,
                });
            }
        }

        let fan_in = matches!(consumer.kind(), ProcessKind::StreamToSubStream);
        if !fan_in && self.producer_of(&to).is_some() {
            return Err(GraphBuildError::MultipleProducers {
                process: consumer.name().to_string(),
                port: to.name.clone(),
            });
        }

        if from.process == to.process || self.reaches(to.process, from.process) {
            return Err(GraphBuildError::CycleDetected {
                from: format!("{}.{}", producer.name(), from.name),
                to: format!("{}.{}", consumer.name(), to.name),
            });
        }

        debug!(
            "Connected {}.{} -> {}.{}",
            producer.name(),
            from.name,
            consumer.name(),
            to.name
        );
        self.connections.push(Connection { from, to });
        Ok(())
    }

    /// Feeds a constant parameter value into a param in-port through a
    /// one-element generator named `<process>_<port>_value`.
    pub fn connect_value(&mut self, to: PortRef, value: &str) -> Result<ProcessId, GraphBuildError> {
        let name = format!("{}_{}_value", self.process_name(to.process), to.name);
        let source = self.new_param_source(&name, [value])?;
        self.connect(source.param_out(OUT_PORT), to)?;
        Ok(source)
    }

    fn process_name(&self, id: ProcessId) -> String {
        self.process(id)
            .map(|p| p.name().to_string())
            .unwrap_or_else(|| id.to_string())
    }

    /// True if `target` is reachable from `start` along connections.
    fn reaches(&self, start: ProcessId, target: ProcessId) -> bool {
        let mut stack = vec![start];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if seen.insert(current) {
                stack.extend(self.downstream(current));
            }
        }
        false
    }

    /// The connection feeding an in-port, if any.
    pub fn producer_of(&self, port: &PortRef) -> Option<&Connection> {
        self.connections.iter().find(|c| &c.to == port)
    }

    /// Processes feeding `id`, without repeats.
    pub fn upstream(&self, id: ProcessId) -> Vec<ProcessId> {
        let mut ids: Vec<ProcessId> = self
            .connections
            .iter()
            .filter(|c| c.to.process == id)
            .map(|c| c.from.process)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Processes fed by `id`, without repeats.
    pub fn downstream(&self, id: ProcessId) -> Vec<ProcessId> {
        let mut ids: Vec<ProcessId> = self
            .connections
            .iter()
            .filter(|c| c.from.process == id)
            .map(|c| c.to.process)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn process(&self, id: ProcessId) -> Option<&Process> {
        self.processes.get(id.0)
    }

    /// Looks up a process by name.
    pub fn find(&self, name: &str) -> Option<ProcessId> {
        self.processes.iter().find(|p| p.name() == name).map(|p| p.id())
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Sorted process names.
    pub fn process_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processes.iter().map(|p| p.name().to_string()).collect();
        names.sort();
        names
    }

    /// Processes with no upstream connection.
    pub fn root_processes(&self) -> Vec<&Process> {
        self.processes
            .iter()
            .filter(|p| self.upstream(p.id()).is_empty())
            .collect()
    }

    /// Processes nothing depends on.
    pub fn leaf_processes(&self) -> Vec<&Process> {
        self.processes
            .iter()
            .filter(|p| self.downstream(p.id()).is_empty())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Serializable view of the graph (used by `--plot`).
    pub fn topology(&self) -> Topology {
        let endpoint = |port: &PortRef| format!("{}.{}", self.process_name(port.process), port.name);

        Topology {
            name: self.name.clone(),
            max_tasks: self.max_tasks,
            processes: self
                .processes
                .iter()
                .map(|p| ProcessSummary {
                    name: p.name().to_string(),
                    kind: p.kind().label(),
                    command: p.command_text().map(str::to_string),
                    ports: p.ports().to_vec(),
                })
                .collect(),
            connections: self
                .connections
                .iter()
                .map(|c| EdgeSummary {
                    from: endpoint(&c.from),
                    to: endpoint(&c.to),
                })
                .collect(),
        }
    }
}

/// Graph topology without any run-time state.
#[derive(Debug, Clone, Serialize)]
pub struct Topology {
    pub name: String,
    pub max_tasks: usize,
    pub processes: Vec<ProcessSummary>,
    pub connections: Vec<EdgeSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub name: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub ports: Vec<PortSpec>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeSummary {
    pub from: String,
    pub to: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::process::{SUBSTREAM_IN_PORT, SUBSTREAM_OUT_PORT};

    fn chain() -> (Workflow, ProcessId, ProcessId) {
        let mut wf = Workflow::new("test", 2);
        let a = wf.new_process("a", "echo a > {o:out}").unwrap();
        let b = wf.new_process("b", "cat {i:in} > {o:out}").unwrap();
        wf.connect(a.out("out"), b.input("in")).unwrap();
        (wf, a, b)
    }

    #[test]
    fn test_new_process_and_lookup() {
        let (wf, a, b) = chain();
        assert_eq!(wf.len(), 2);
        assert_eq!(wf.find("a"), Some(a));
        assert_eq!(wf.find("b"), Some(b));
        assert!(wf.find("c").is_none());
        assert_eq!(wf.process(b).unwrap().name(), "b");
        assert_eq!(wf.process_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_process_name() {
        let mut wf = Workflow::new("test", 1);
        wf.new_process("align", "echo").unwrap();
        let err = wf.new_file_source("align", ["x"]).unwrap_err();
        assert_eq!(err, GraphBuildError::DuplicateProcess("align".to_string()));
    }

    #[test]
    fn test_empty_process_name() {
        let mut wf = Workflow::new("test", 1);
        assert_eq!(
            wf.new_process("  ", "echo").unwrap_err(),
            GraphBuildError::EmptyProcessName
        );
    }

    #[test]
    fn test_invalid_template() {
        let mut wf = Workflow::new("test", 1);
        let err = wf.new_process("bad", "echo {o:x:r:,}").unwrap_err();
        assert!(matches!(err, GraphBuildError::InvalidTemplate { .. }));
    }

    #[test]
    fn test_max_tasks_at_least_one() {
        let mut wf = Workflow::new("test", 0);
        assert_eq!(wf.max_tasks(), 1);
        wf.set_max_tasks(8);
        assert_eq!(wf.max_tasks(), 8);
    }

    #[test]
    fn test_second_producer_rejected_in_either_order() {
        let (mut wf, _a, b) = chain();
        let c = wf.new_process("c", "echo c > {o:out}").unwrap();
        let err = wf.connect(c.out("out"), b.input("in")).unwrap_err();
        assert!(matches!(err, GraphBuildError::MultipleProducers { .. }));

        // Reverse build order: the later producer still fails
        let mut wf = Workflow::new("test", 2);
        let b = wf.new_process("b", "cat {i:in}").unwrap();
        let c = wf.new_process("c", "echo > {o:out}").unwrap();
        let a = wf.new_process("a", "echo > {o:out}").unwrap();
        wf.connect(c.out("out"), b.input("in")).unwrap();
        assert!(matches!(
            wf.connect(a.out("out"), b.input("in")),
            Err(GraphBuildError::MultipleProducers { .. })
        ));
        assert_eq!(wf.connections().len(), 1);
    }

    #[test]
    fn test_aggregator_accepts_fan_in() {
        let mut wf = Workflow::new("test", 2);
        let agg = wf.new_stream_to_substream("collect").unwrap();
        for fold in 0..3 {
            let p = wf.new_process(&format!("fold{}", fold), "echo > {o:res}").unwrap();
            wf.connect(p.out("res"), agg.input(SUBSTREAM_IN_PORT)).unwrap();
        }
        let merge = wf.new_process("merge", "cat {i:all|join: }").unwrap();
        wf.connect(agg.out(SUBSTREAM_OUT_PORT), merge.input("all")).unwrap();
        assert_eq!(wf.upstream(agg).len(), 3);
    }

    #[test]
    fn test_cycle_detected() {
        let mut wf = Workflow::new("test", 2);
        let a = wf.new_process("a", "cat {i:in} > {o:out}").unwrap();
        let b = wf.new_process("b", "cat {i:in} > {o:out}").unwrap();
        let c = wf.new_process("c", "cat {i:in} > {o:out}").unwrap();
        wf.connect(a.out("out"), b.input("in")).unwrap();
        wf.connect(b.out("out"), c.input("in")).unwrap();

        let err = wf.connect(c.out("out"), a.input("in")).unwrap_err();
        assert!(matches!(err, GraphBuildError::CycleDetected { .. }));
    }

    #[test]
    fn test_self_loop_detected() {
        let mut wf = Workflow::new("test", 1);
        let a = wf.new_process("a", "cat {i:in} > {o:out}").unwrap();
        assert!(matches!(
            wf.connect(a.out("out"), a.input("in")),
            Err(GraphBuildError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_incompatible_directions() {
        let mut wf = Workflow::new("test", 1);
        let idx = wf.new_param_source("idx", ["1"]).unwrap();
        let p = wf.new_process("p", "cat {i:in} # {p:index}").unwrap();

        let err = wf.connect(idx.param_out(OUT_PORT), p.input("in")).unwrap_err();
        assert!(matches!(err, GraphBuildError::IncompatiblePorts { .. }));

        let err = wf.connect(p.input("in"), p.param("index")).unwrap_err();
        assert!(matches!(err, GraphBuildError::IncompatiblePorts { .. }));

        assert!(wf.connect(idx.param_out(OUT_PORT), p.param("index")).is_ok());
    }

    #[test]
    fn test_unknown_port() {
        let (mut wf, a, b) = chain();
        let err = wf.connect(a.out("nope"), b.input("in")).unwrap_err();
        assert!(matches!(err, GraphBuildError::UnknownPort { .. }));
    }

    #[test]
    fn test_unknown_process() {
        let (mut wf, a, _) = chain();
        let ghost = ProcessId(99);
        assert_eq!(
            wf.connect(a.out("out"), ghost.input("in")),
            Err(GraphBuildError::UnknownProcess(99))
        );
    }

    #[test]
    fn test_connect_value() {
        let mut wf = Workflow::new("test", 1);
        let copy = wf.new_process("create_runcopy", "cp {i:orig} {o:copy} # {p:runid}").unwrap();
        let src = wf.connect_value(copy.param("runid"), "testrun").unwrap();
        assert_eq!(wf.process(src).unwrap().name(), "create_runcopy_runid_value");
        assert!(wf.producer_of(&copy.param("runid")).is_some());
    }

    #[test]
    fn test_root_and_leaf_detection() {
        let (wf, a, b) = chain();
        let roots = wf.root_processes();
        let leaves = wf.leaf_processes();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id(), a);
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].id(), b);
    }

    #[test]
    fn test_path_template_rejects_outputs() {
        let (mut wf, a, _) = chain();
        assert!(wf.set_path_template(a, "out", "{o:out}.x").is_err());
        assert!(wf.set_path_template(a, "out", "data/a.txt").is_ok());
    }

    #[test]
    fn test_topology_summary() {
        let (wf, _, _) = chain();
        let topo = wf.topology();
        assert_eq!(topo.processes.len(), 2);
        assert_eq!(topo.connections.len(), 1);
        assert_eq!(topo.connections[0].from, "a.out");
        assert_eq!(topo.connections[0].to, "b.in");
        assert_eq!(topo.processes[0].kind, "command");
    }
}
