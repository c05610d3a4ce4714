//! SciFlow CLI Entry Point
//!
//! Provides command-line interface for workflow execution.
//!
//! # Usage
//!
//! ```bash
//! # Execute a workflow
//! sciflow workflow.yaml
//!
//! # Run only the processes matching a pattern, and what they depend on
//! sciflow workflow.yaml --procs 'align.*'
//!
//! # Print the graph as JSON without running anything
//! sciflow workflow.yaml --plot
//!
//! # Dry run mode (preview commands)
//! sciflow workflow.yaml --dry-run
//!
//! # Limit concurrent commands, in a given working directory
//! sciflow workflow.yaml --maxtasks 8 --working-dir /path/to/data
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info};

use sciflow::execution::Engine;
use sciflow::workflow::parser::load_workflow;
use sciflow::{RunConfig, APP_NAME, VERSION};

/// Default workflow file used when none is specified.
const DEFAULT_WORKFLOW: &str = "workflow.yaml";

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    workflow_path: String,
    config_path: Option<PathBuf>,
    procs: Option<String>,
    plot: bool,
    dry_run: bool,
    skip_existing: bool,
    working_dir: Option<PathBuf>,
    max_tasks: Option<usize>,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workflow_path: DEFAULT_WORKFLOW.to_string(),
            config_path: None,
            procs: None,
            plot: false,
            dry_run: false,
            skip_existing: false,
            working_dir: None,
            max_tasks: None,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Flow-Based Scientific Pipeline Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: sciflow [OPTIONS] <WORKFLOW_FILE>");
    println!();
    println!("Arguments:");
    println!("  <WORKFLOW_FILE>     Path to workflow YAML file");
    println!();
    println!("Options:");
    println!("  --maxtasks N        Maximum concurrent commands (default: CPU count)");
    println!("  --procs REGEX       Run matching processes and everything upstream of them");
    println!("  --plot              Print the workflow graph as JSON and exit");
    println!("  --config FILE       Load run settings from a YAML file");
    println!("  --working-dir PATH  Directory commands run in");
    println!("  --skip-existing     Skip commands whose outputs already exist");
    println!("  --dry-run           Preview commands without execution");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  sciflow pipeline.yaml");
    println!("  sciflow pipeline.yaml --procs 'merge_bams.*'");
    println!("  sciflow pipeline.yaml --working-dir /data/analysis --maxtasks 8");
}

/// Returns the value following an option.
fn option_value<'a>(args: &'a [String], i: &mut usize, option: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires an argument", option))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut positional_index = 0;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--dry-run" => config.dry_run = true,
            "--skip-existing" => config.skip_existing = true,
            "--plot" => config.plot = true,
            "--verbose" | "-v" => config.verbose = true,
            "--working-dir" => {
                config.working_dir = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            "--config" => {
                config.config_path = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            "--procs" => {
                config.procs = Some(option_value(args, &mut i, arg)?.to_string());
            }
            "--maxtasks" => {
                let value = option_value(args, &mut i, arg)?;
                let max: usize = value
                    .parse()
                    .map_err(|_| format!("Invalid maxtasks value: {}", value))?;
                if max == 0 {
                    return Err("--maxtasks must be at least 1".to_string());
                }
                config.max_tasks = Some(max);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                match positional_index {
                    0 => config.workflow_path = arg.clone(),
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("{} {}", "Error:".red().bold(), e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);

    let workflow = load_workflow(&config.workflow_path).map_err(|e| {
        error!("Failed to load workflow: {}", e);
        format!(
            "Could not load workflow from '{}': {}",
            config.workflow_path, e
        )
    })?;

    if config.plot {
        println!("{}", serde_json::to_string_pretty(&workflow.topology())?);
        return Ok(());
    }

    print_banner();

    let mut engine = match &config.config_path {
        Some(path) => Engine::with_config(workflow, RunConfig::load(path)?),
        None => Engine::new(workflow),
    };

    if let Some(max) = config.max_tasks {
        engine.set_max_tasks(max);
    }
    if let Some(dir) = config.working_dir {
        engine.set_working_dir(dir);
    }
    if config.dry_run {
        engine.set_dry_run(true);
        info!("Mode: DRY RUN (commands will not execute)");
        println!();
    }
    if config.skip_existing {
        engine.set_skip_existing(true);
    }

    match &engine.config().working_dir {
        Some(dir) => info!("Working directory: {}", dir.display()),
        None => info!("Working directory: {}", env::current_dir()?.display()),
    }

    let report = match &config.procs {
        Some(pattern) => {
            info!("Running processes matching '{}' and their upstream", pattern);
            engine.run_to_pattern(pattern)?
        }
        None => engine.run()?,
    };

    println!();
    println!("{}", report.summary().green());

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("sciflow")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_defaults() {
        let config = parse_arguments(&args(&[])).unwrap();
        assert_eq!(config.workflow_path, DEFAULT_WORKFLOW);
        assert!(config.max_tasks.is_none());
        assert!(!config.plot);
    }

    #[test]
    fn test_parse_all_options() {
        let config = parse_arguments(&args(&[
            "caw.yaml",
            "--maxtasks",
            "8",
            "--procs",
            "align.*",
            "--working-dir",
            "/data",
            "--config",
            "run.yaml",
            "--skip-existing",
            "--dry-run",
            "--plot",
        ]))
        .unwrap();

        assert_eq!(config.workflow_path, "caw.yaml");
        assert_eq!(config.max_tasks, Some(8));
        assert_eq!(config.procs.as_deref(), Some("align.*"));
        assert_eq!(config.working_dir, Some(PathBuf::from("/data")));
        assert_eq!(config.config_path, Some(PathBuf::from("run.yaml")));
        assert!(config.skip_existing);
        assert!(config.dry_run);
        assert!(config.plot);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_arguments(&args(&["--maxtasks"])).is_err());
        assert!(parse_arguments(&args(&["--maxtasks", "zero"])).is_err());
        assert!(parse_arguments(&args(&["--maxtasks", "0"])).is_err());
        assert!(parse_arguments(&args(&["--bogus"])).is_err());
        assert!(parse_arguments(&args(&["a.yaml", "b.yaml"])).is_err());
    }
}
