//! Workflow Validation
//!
//! Checks run before execution:
//! - Workflow is not empty
//! - Every in-port of a selected process has a producer
//! - No cycles (Kahn's algorithm, which also yields the topological order)
//!
//! Wiring errors such as a second producer are already rejected by
//! [`Workflow::connect`], so a graph that passes here can be scheduled.

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, info};

use crate::error::GraphBuildError;

use super::model::Workflow;
use super::port::PortRef;
use super::process::ProcessId;

/// Validates the processes in `selection` (all processes if `None`).
///
/// Returns the selection in topological order.
pub fn validate_workflow(
    workflow: &Workflow,
    selection: Option<&HashSet<ProcessId>>,
) -> Result<Vec<ProcessId>, GraphBuildError> {
    info!(
        "Validating workflow '{}' with {} processes",
        workflow.name(),
        workflow.len()
    );

    if workflow.is_empty() {
        return Err(GraphBuildError::EmptyWorkflow);
    }

    let selected = |id: ProcessId| selection.map_or(true, |s| s.contains(&id));

    for process in workflow.processes().iter().filter(|p| selected(p.id())) {
        for port in process.input_ports() {
            let port_ref = PortRef::new(process.id(), port.name.clone(), port.direction);
            if workflow.producer_of(&port_ref).is_none() {
                return Err(GraphBuildError::UnconnectedPort {
                    process: process.name().to_string(),
                    port: port.name.clone(),
                });
            }
        }

        if workflow.upstream(process.id()).is_empty() {
            debug!("Process '{}' is a root process", process.name());
        }
    }

    let order: Vec<ProcessId> = topological_order(workflow)?
        .into_iter()
        .filter(|id| selected(*id))
        .collect();

    info!("Workflow validated: {} processes selected", order.len());
    Ok(order)
}

/// Orders all processes so that producers come before consumers, using
/// Kahn's algorithm. Ties keep creation order, so the result is
/// deterministic for a given build sequence.
pub fn topological_order(workflow: &Workflow) -> Result<Vec<ProcessId>, GraphBuildError> {
    let mut in_degree: HashMap<ProcessId, usize> = workflow
        .processes()
        .iter()
        .map(|p| (p.id(), workflow.upstream(p.id()).len()))
        .collect();

    let mut queue: VecDeque<ProcessId> = workflow
        .processes()
        .iter()
        .map(|p| p.id())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    let mut sorted = Vec::with_capacity(workflow.len());

    while let Some(current) = queue.pop_front() {
        sorted.push(current);

        for successor in workflow.downstream(current) {
            if let Some(degree) = in_degree.get_mut(&successor) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(successor);
                }
            }
        }
    }

    if sorted.len() != workflow.len() {
        // connect() rejects cycles, so this only guards hand-built graphs
        let stuck = workflow
            .processes()
            .iter()
            .find(|p| !sorted.contains(&p.id()))
            .map(|p| p.name().to_string())
            .unwrap_or_default();
        return Err(GraphBuildError::CycleDetected {
            from: stuck.clone(),
            to: stuck,
        });
    }

    debug!(
        "Topological order: {:?}",
        sorted
            .iter()
            .filter_map(|id| workflow.process(*id).map(|p| p.name()))
            .collect::<Vec<_>>()
    );

    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Workflow {
        let mut wf = Workflow::new("test", 2);
        let c = wf.new_process("c", "cat {i:in} > {o:out}").unwrap();
        let a = wf.new_process("a", "echo a > {o:out}").unwrap();
        let b = wf.new_process("b", "cat {i:in} > {o:out}").unwrap();
        wf.connect(a.out("out"), b.input("in")).unwrap();
        wf.connect(b.out("out"), c.input("in")).unwrap();
        wf
    }

    fn names(wf: &Workflow, ids: &[ProcessId]) -> Vec<String> {
        ids.iter()
            .map(|id| wf.process(*id).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_valid_workflow() {
        let wf = chain();
        let order = validate_workflow(&wf, None).unwrap();
        assert_eq!(names(&wf, &order), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_workflow() {
        let wf = Workflow::new("empty", 1);
        assert_eq!(
            validate_workflow(&wf, None),
            Err(GraphBuildError::EmptyWorkflow)
        );
    }

    #[test]
    fn test_unconnected_in_port() {
        let mut wf = Workflow::new("test", 1);
        wf.new_process("lonely", "cat {i:in} > {o:out}").unwrap();
        let err = validate_workflow(&wf, None).unwrap_err();
        assert_eq!(
            err,
            GraphBuildError::UnconnectedPort {
                process: "lonely".to_string(),
                port: "in".to_string(),
            }
        );
    }

    #[test]
    fn test_unconnected_param_port() {
        let mut wf = Workflow::new("test", 1);
        wf.new_process("p", "echo {p:cost} > {o:out}").unwrap();
        assert!(matches!(
            validate_workflow(&wf, None),
            Err(GraphBuildError::UnconnectedPort { .. })
        ));
    }

    #[test]
    fn test_selection_ignores_unselected_ports() {
        let mut wf = chain();
        wf.new_process("orphan", "cat {i:in}").unwrap();
        assert!(validate_workflow(&wf, None).is_err());

        let a = wf.find("a").unwrap();
        let b = wf.find("b").unwrap();
        let selection: HashSet<ProcessId> = [a, b].into_iter().collect();
        let order = validate_workflow(&wf, Some(&selection)).unwrap();
        assert_eq!(names(&wf, &order), vec!["a", "b"]);
    }

    #[test]
    fn test_topological_sort_multiple_roots() {
        let mut wf = Workflow::new("test", 1);
        wf.new_process("x", "echo x").unwrap();
        wf.new_process("y", "echo y").unwrap();
        wf.new_process("z", "echo z").unwrap();
        let order = topological_order(&wf).unwrap();
        // Independent processes keep creation order
        assert_eq!(names(&wf, &order), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_topological_sort_diamond() {
        let mut wf = Workflow::new("test", 1);
        let top = wf.new_process("top", "echo > {o:out}").unwrap();
        let left = wf.new_process("left", "cat {i:in} > {o:out}").unwrap();
        let right = wf.new_process("right", "cat {i:in} > {o:out}").unwrap();
        let join = wf.new_process("join", "cat {i:l} {i:r}").unwrap();
        wf.connect(top.out("out"), left.input("in")).unwrap();
        wf.connect(top.out("out"), right.input("in")).unwrap();
        wf.connect(left.out("out"), join.input("l")).unwrap();
        wf.connect(right.out("out"), join.input("r")).unwrap();

        let order = topological_order(&wf).unwrap();
        assert_eq!(order.first(), Some(&top));
        assert_eq!(order.last(), Some(&join));
    }
}
