//! SciFlow - Flow-Based Scientific Pipeline Engine
//!
//! Build a graph of shell-command processes connected port to port, then
//! run it: every process streams file and parameter tokens to its
//! consumers over bounded channels while a shared pool caps how many
//! external commands execute at once.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`workflow`]: Graph model, command templates, YAML loading and planning
//! - [`execution`]: Scheduler, per-process run loops and the task pool
//! - [`config`]: Run configuration
//! - [`monitoring`]: Execution timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use sciflow::execution::Engine;
//! use sciflow::workflow::Workflow;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut wf = Workflow::new("caw-preprocessing", 4);
//!
//!     let download = wf.new_process("download_apps", "wget http://uppnex.se/apps.tar.gz -O {o:apps}")?;
//!     wf.set_path_static(download, "apps", "data/uppnex_apps.tar.gz")?;
//!
//!     let unzip = wf.new_process("unzip_apps", "zcat {i:targz} > {o:tar}")?;
//!     wf.set_path_replace(unzip, "targz", "tar", ".gz", "")?;
//!     wf.connect(download.out("apps"), unzip.input("targz"))?;
//!
//!     let report = Engine::new(wf).run()?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use config::RunConfig;
pub use error::{FlowError, GraphBuildError};
pub use execution::{Engine, RunReport};
pub use workflow::parser::load_workflow;
pub use workflow::{ProcessId, Token, Workflow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "SciFlow";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "SciFlow");
    }

    #[test]
    fn test_module_exports_workflow() {
        let mut workflow = Workflow::new("exports", 1);
        assert!(workflow.is_empty());
        let id: ProcessId = workflow.new_process("hello", "echo hello").unwrap();
        assert_eq!(workflow.find("hello"), Some(id));
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
