//! Workflow Definition Module
//!
//! Data structures for building, loading and validating flow-based
//! workflow graphs.
//!
//! # Structure
//!
//! - [`token`]: Values flowing between processes
//! - [`port`]: Port descriptions and the channel endpoints behind them
//! - [`template`]: Command templates with `{i:}`, `{o:}` and `{p:}` placeholders
//! - [`path_rule`]: How out-port paths are derived
//! - [`process`]: Processes, generators and aggregators
//! - [`model`]: The workflow graph
//! - [`parser`]: YAML loading
//! - [`validator`]: Graph validation and topological ordering
//! - [`planner`]: Process selection and run-state tracking

pub mod model;
pub mod parser;
pub mod path_rule;
pub mod planner;
pub mod port;
pub mod process;
pub mod template;
pub mod token;
pub mod validator;

pub use model::{Connection, Topology, Workflow};
pub use parser::{load_workflow, parse_workflow};
pub use path_rule::{PathRule, TaskView};
pub use planner::{ExecutionPlanner, ProcessStatus};
pub use port::{InPort, OutPort, PortDirection, PortRef, PortSpec};
pub use process::{Process, ProcessId, ProcessKind};
pub use template::CommandTemplate;
pub use token::{FileToken, Token};
