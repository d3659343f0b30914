//! Deterministic diagram rendering for a resolved `DependencyGraph`.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::model::{Task, TaskId};
use crate::resolver::DependencyGraph;

/// Render the graph as a Mermaid `graph TD` flowchart, one subgraph per
/// batch, with node labels drawn from the task description.
pub fn to_mermaid(graph: &DependencyGraph, tasks: &[Task]) -> String {
    let by_id: HashMap<&TaskId, &Task> = tasks.iter().map(|t| (&t.id, t)).collect();
    let mut out = String::from("graph TD\n");

    for (i, batch) in graph.batches.iter().enumerate() {
        writeln!(out, "  subgraph batch{i}[\"Batch {i}\"]").unwrap();
        let mut ids: Vec<&TaskId> = batch.iter().collect();
        ids.sort();
        for id in ids {
            let label = by_id
                .get(id)
                .map(|t| t.description.as_str())
                .unwrap_or("");
            writeln!(out, "    {}[\"{}: {}\"]", node_name(id), id, escape(label)).unwrap();
        }
        out.push_str("  end\n");
    }

    for task in tasks {
        for dep in &task.depends_on {
            writeln!(out, "  {} --> {}", node_name(dep), node_name(&task.id)).unwrap();
        }
    }

    out
}

/// Render the graph as an ASCII list of batches, one line per task.
pub fn to_ascii(graph: &DependencyGraph, tasks: &[Task]) -> String {
    let by_id: HashMap<&TaskId, &Task> = tasks.iter().map(|t| (&t.id, t)).collect();
    let mut out = String::new();

    for (i, batch) in graph.batches.iter().enumerate() {
        writeln!(out, "Batch {i}:").unwrap();
        let mut ids: Vec<&TaskId> = batch.iter().collect();
        ids.sort();
        for id in ids {
            let label = by_id
                .get(id)
                .map(|t| t.description.as_str())
                .unwrap_or("");
            writeln!(out, "  - {id}: {label}").unwrap();
        }
    }

    if !graph.circular_deps.is_empty() {
        out.push_str("Cycles:\n");
        for cycle in &graph.circular_deps {
            let ids: Vec<String> = cycle.iter().map(|id| id.to_string()).collect();
            writeln!(out, "  - {}", ids.join(" -> ")).unwrap();
        }
    }

    out
}

fn node_name(id: &TaskId) -> String {
    format!("n_{}", id.0.replace(|c: char| !c.is_ascii_alphanumeric(), "_"))
}

fn escape(label: &str) -> String {
    label.replace('"', "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DependencyType, EpicId};
    use std::collections::BTreeSet;

    fn sample() -> (DependencyGraph, Vec<Task>) {
        let tasks = vec![
            Task {
                id: TaskId::from("t1"),
                epic_id: EpicId::from("e1"),
                priority: 0,
                description: "set up schema".into(),
                action: String::new(),
                depends_on: BTreeSet::new(),
                dependency_type: DependencyType::Hard,
                done: false,
                predicted_files: None,
            },
            Task {
                id: TaskId::from("t2"),
                epic_id: EpicId::from("e1"),
                priority: 0,
                description: "add endpoint".into(),
                action: String::new(),
                depends_on: BTreeSet::from([TaskId::from("t1")]),
                dependency_type: DependencyType::Hard,
                done: false,
                predicted_files: None,
            },
        ];
        let graph = DependencyGraph {
            batches: vec![
                BTreeSet::from([TaskId::from("t1")]),
                BTreeSet::from([TaskId::from("t2")]),
            ],
            task_order: vec![TaskId::from("t1"), TaskId::from("t2")],
            circular_deps: Vec::new(),
            missing_deps: BTreeSet::new(),
        };
        (graph, tasks)
    }

    #[test]
    fn mermaid_output_is_deterministic() {
        let (graph, tasks) = sample();
        let a = to_mermaid(&graph, &tasks);
        let b = to_mermaid(&graph, &tasks);
        assert_eq!(a, b);
        assert!(a.contains("graph TD"));
        assert!(a.contains("n_t1 --> n_t2"));
    }

    #[test]
    fn ascii_output_lists_batches_in_order() {
        let (graph, tasks) = sample();
        let rendered = to_ascii(&graph, &tasks);
        let batch0_pos = rendered.find("Batch 0").unwrap();
        let batch1_pos = rendered.find("Batch 1").unwrap();
        assert!(batch0_pos < batch1_pos);
    }
}
