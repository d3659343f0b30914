//! Topological batching of tasks into parallel execution batches (§4.A).

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::model::{DependencyType, Epic, EpicId, Task, TaskId};

/// Output of [`resolve`]: ordered batches plus diagnostics. Persisted
/// verbatim as the project's plan (§6 `PlanStore`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub batches: Vec<BTreeSet<TaskId>>,
    pub task_order: Vec<TaskId>,
    pub circular_deps: Vec<BTreeSet<TaskId>>,
    pub missing_deps: BTreeSet<(TaskId, TaskId)>,
}

impl DependencyGraph {
    pub fn is_acyclic(&self) -> bool {
        self.circular_deps.is_empty()
    }
}

struct TaskView<'a> {
    task: &'a Task,
    epic_priority: i64,
}

/// Build the dependency graph for a set of pending tasks and their epics.
///
/// Never fails: cycles and dangling references are reported as diagnostics
/// rather than errors, per §4.A.
pub fn resolve(tasks: &[Task], epics: &[Epic]) -> DependencyGraph {
    let epic_by_id: HashMap<&EpicId, &Epic> = epics.iter().map(|e| (&e.id, e)).collect();
    let task_by_id: HashMap<&TaskId, TaskView> = tasks
        .iter()
        .map(|t| {
            let epic_priority = epic_by_id.get(&t.epic_id).map(|e| e.priority).unwrap_or(0);
            (&t.id, TaskView { task: t, epic_priority })
        })
        .collect();

    // epic_id -> task ids belonging to it, for expanding epic-level edges.
    let mut tasks_by_epic: HashMap<&EpicId, Vec<&TaskId>> = HashMap::new();
    for t in tasks {
        tasks_by_epic.entry(&t.epic_id).or_default().push(&t.id);
    }

    let mut hard_edges: HashMap<TaskId, BTreeSet<TaskId>> = HashMap::new(); // successor -> predecessors
    let mut soft_edges: HashMap<TaskId, BTreeSet<TaskId>> = HashMap::new();
    let mut missing_deps: BTreeSet<(TaskId, TaskId)> = BTreeSet::new();

    for t in tasks {
        for dep in &t.depends_on {
            if task_by_id.contains_key(dep) {
                match t.dependency_type {
                    DependencyType::Hard => {
                        hard_edges.entry(t.id.clone()).or_default().insert(dep.clone());
                    }
                    DependencyType::Soft => {
                        soft_edges.entry(t.id.clone()).or_default().insert(dep.clone());
                    }
                }
            } else {
                missing_deps.insert((t.id.clone(), dep.clone()));
            }
        }
    }

    // Expand epic-level hard edges: E1 -> E2 becomes a hard edge from every
    // task of E1 to every task of E2.
    for epic in epics {
        for dep_epic in &epic.depends_on {
            if !tasks_by_epic.contains_key(dep_epic) {
                continue;
            }
            let Some(successors) = tasks_by_epic.get(&epic.id) else {
                continue;
            };
            let predecessors = &tasks_by_epic[dep_epic];
            for succ in successors {
                for pred in predecessors {
                    hard_edges
                        .entry((*succ).clone())
                        .or_default()
                        .insert((*pred).clone());
                }
            }
        }
    }

    // in-degree over hard edges only; soft edges never gate layering.
    let mut in_degree: HashMap<TaskId, usize> = tasks.iter().map(|t| (t.id.clone(), 0)).collect();
    let mut successors: HashMap<TaskId, Vec<TaskId>> = HashMap::new(); // predecessor -> successors
    for (succ, preds) in &hard_edges {
        *in_degree.get_mut(succ).unwrap() += preds.len();
        for pred in preds {
            successors.entry(pred.clone()).or_default().push(succ.clone());
        }
    }

    let mut remaining: HashSet<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();
    let mut batches: Vec<BTreeSet<TaskId>> = Vec::new();
    let mut task_order: Vec<TaskId> = Vec::new();

    loop {
        let mut ready: Vec<&TaskId> = remaining
            .iter()
            .filter(|id| in_degree.get(*id).copied().unwrap_or(0) == 0)
            .collect();
        if ready.is_empty() {
            break;
        }

        ready.sort_by(|a, b| {
            let ta = &task_by_id[a];
            let tb = &task_by_id[b];
            ta.task
                .priority
                .cmp(&tb.task.priority)
                .then(ta.epic_priority.cmp(&tb.epic_priority))
                .then(a.0.cmp(&b.0))
        });

        let batch_ids: Vec<TaskId> = ready.into_iter().cloned().collect();
        for id in &batch_ids {
            remaining.remove(id);
            if let Some(succs) = successors.get(id) {
                for succ in succs {
                    if let Some(d) = in_degree.get_mut(succ) {
                        *d = d.saturating_sub(1);
                    }
                }
            }
        }

        // Soft-edge ordering within the batch: soft predecessor before
        // soft successor when both fall in this batch.
        let batch_order = order_by_soft_edges(&batch_ids, &soft_edges);
        task_order.extend(batch_order);
        batches.push(batch_ids.into_iter().collect());
    }

    let circular_deps = weakly_connected_components(&remaining, &hard_edges);

    let graph = DependencyGraph {
        batches,
        task_order,
        circular_deps,
        missing_deps,
    };

    flatten_file_conflicts(graph, tasks)
}

/// Stable ordering of one batch's tasks that places a soft predecessor
/// ahead of its soft successor whenever both are present.
///
/// A mutual (or longer) soft-dependency cycle within the batch is valid
/// input — soft edges never gate layering — so this can't assume an
/// acyclic order exists. It runs Kahn's algorithm over the in-batch soft
/// edges and, once no more nodes have zero remaining soft in-degree,
/// appends whatever is left (the residual cycle) in original relative
/// order rather than looping.
fn order_by_soft_edges(batch: &[TaskId], soft_edges: &HashMap<TaskId, BTreeSet<TaskId>>) -> Vec<TaskId> {
    let in_batch: HashSet<&TaskId> = batch.iter().collect();
    let position: HashMap<&TaskId, usize> = batch.iter().enumerate().map(|(i, id)| (id, i)).collect();

    // successor -> in-batch soft predecessors still owed
    let mut in_degree: HashMap<&TaskId, usize> = batch.iter().map(|id| (id, 0)).collect();
    let mut successors: HashMap<&TaskId, Vec<&TaskId>> = HashMap::new();
    for id in batch {
        let Some(preds) = soft_edges.get(id) else {
            continue;
        };
        for pred in preds {
            if in_batch.contains(pred) {
                *in_degree.get_mut(id).unwrap() += 1;
                successors.entry(pred).or_default().push(id);
            }
        }
    }

    let mut remaining: HashSet<&TaskId> = batch.iter().collect();
    let mut order: Vec<TaskId> = Vec::with_capacity(batch.len());

    loop {
        let mut ready: Vec<&TaskId> = remaining
            .iter()
            .copied()
            .filter(|id| in_degree[id] == 0)
            .collect();
        if ready.is_empty() {
            break;
        }
        ready.sort_by_key(|id| position[id]);
        for id in ready {
            remaining.remove(id);
            order.push(id.clone());
            if let Some(succs) = successors.get(id) {
                for succ in succs {
                    if let Some(d) = in_degree.get_mut(succ) {
                        *d = d.saturating_sub(1);
                    }
                }
            }
        }
    }

    // Residual soft cycle: keep original relative order rather than
    // attempting to break it arbitrarily.
    let mut leftover: Vec<&TaskId> = remaining.into_iter().collect();
    leftover.sort_by_key(|id| position[id]);
    order.extend(leftover.into_iter().cloned());
    order
}

/// Group the nodes left over after Kahn's sort terminates into their
/// weakly connected components, each reported as one `circular_deps` entry.
fn weakly_connected_components(
    remaining: &HashSet<TaskId>,
    hard_edges: &HashMap<TaskId, BTreeSet<TaskId>>,
) -> Vec<BTreeSet<TaskId>> {
    if remaining.is_empty() {
        return Vec::new();
    }

    let mut undirected: HashMap<&TaskId, Vec<&TaskId>> = HashMap::new();
    for (succ, preds) in hard_edges {
        if !remaining.contains(succ) {
            continue;
        }
        for pred in preds {
            if remaining.contains(pred) {
                undirected.entry(succ).or_default().push(pred);
                undirected.entry(pred).or_default().push(succ);
            }
        }
    }

    let mut visited: HashSet<&TaskId> = HashSet::new();
    let mut components = Vec::new();
    let mut ids: Vec<&TaskId> = remaining.iter().collect();
    ids.sort();

    for start in ids {
        if visited.contains(start) {
            continue;
        }
        let mut component = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);
        visited.insert(start);
        while let Some(node) = queue.pop_front() {
            component.insert(node.clone());
            if let Some(neighbors) = undirected.get(node) {
                for n in neighbors {
                    if visited.insert(n) {
                        queue.push_back(n);
                    }
                }
            }
        }
        components.push(component);
    }
    components
}

/// After the pure topological pass, push the lower-priority task of any
/// in-batch predicted-file collision into the next batch. Capped at
/// `tasks.len()` iterations to guarantee termination (§4.A).
fn flatten_file_conflicts(mut graph: DependencyGraph, tasks: &[Task]) -> DependencyGraph {
    let task_by_id: HashMap<&TaskId, &Task> = tasks.iter().map(|t| (&t.id, t)).collect();
    let max_iterations = tasks.len().max(1);

    for _ in 0..max_iterations {
        let mut moved = false;

        'batches: for batch_idx in 0..graph.batches.len() {
            let mut seen_files: HashMap<&std::path::Path, &TaskId> = HashMap::new();
            let mut ordered: Vec<&TaskId> = graph.batches[batch_idx].iter().collect();
            ordered.sort_by_key(|id| std::cmp::Reverse(task_by_id[*id].priority));

            for id in ordered {
                let task = task_by_id[id];
                for file in task.predicted_files() {
                    if let Some(existing) = seen_files.get(file.as_path()) {
                        let existing_task = task_by_id[*existing];
                        let loser = if task.priority < existing_task.priority {
                            id.clone()
                        } else {
                            (*existing).clone()
                        };
                        if batch_idx + 1 >= graph.batches.len() {
                            graph.batches.push(BTreeSet::new());
                        }
                        graph.batches[batch_idx].remove(&loser);
                        graph.batches[batch_idx + 1].insert(loser);
                        moved = true;
                        break 'batches;
                    }
                    seen_files.insert(file.as_path(), id);
                }
            }
        }

        if !moved {
            break;
        }
    }

    graph.batches.retain(|b| !b.is_empty());
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DependencyType, Epic, EpicId, Task, TaskId};
    use std::collections::BTreeSet;

    fn epic(id: &str, priority: i64, depends_on: &[&str]) -> Epic {
        Epic {
            id: EpicId::from(id),
            name: id.to_string(),
            priority,
            depends_on: depends_on.iter().map(|s| EpicId::from(*s)).collect(),
        }
    }

    fn task(id: &str, epic_id: &str, priority: i64, hard_deps: &[&str]) -> Task {
        Task {
            id: TaskId::from(id),
            epic_id: EpicId::from(epic_id),
            priority,
            description: String::new(),
            action: String::new(),
            depends_on: hard_deps.iter().map(|s| TaskId::from(*s)).collect(),
            dependency_type: DependencyType::Hard,
            done: false,
            predicted_files: None,
        }
    }

    #[test]
    fn linear_chain_produces_three_singleton_batches() {
        let epics = vec![epic("e1", 0, &[])];
        let tasks = vec![
            task("t1", "e1", 0, &[]),
            task("t2", "e1", 0, &["t1"]),
            task("t3", "e1", 0, &["t2"]),
        ];
        let graph = resolve(&tasks, &epics);
        assert_eq!(graph.batches.len(), 3);
        assert_eq!(graph.batches[0], BTreeSet::from([TaskId::from("t1")]));
        assert_eq!(graph.batches[1], BTreeSet::from([TaskId::from("t2")]));
        assert_eq!(graph.batches[2], BTreeSet::from([TaskId::from("t3")]));
        assert!(graph.is_acyclic());
    }

    #[test]
    fn diamond_dependency_produces_three_batches() {
        let epics = vec![epic("e1", 0, &[]), epic("e2", 0, &[]), epic("e3", 0, &[])];
        let tasks = vec![
            task("t1", "e1", 0, &[]),
            task("t2", "e2", 0, &["t1"]),
            task("t3", "e3", 0, &["t1"]),
            task("t4", "e1", 0, &["t2", "t3"]),
        ];
        let graph = resolve(&tasks, &epics);
        assert_eq!(graph.batches.len(), 3);
        assert_eq!(graph.batches[0], BTreeSet::from([TaskId::from("t1")]));
        assert_eq!(
            graph.batches[1],
            BTreeSet::from([TaskId::from("t2"), TaskId::from("t3")])
        );
        assert_eq!(graph.batches[2], BTreeSet::from([TaskId::from("t4")]));
    }

    #[test]
    fn cycle_is_reported_and_batches_empty() {
        let epics = vec![epic("e1", 0, &[])];
        let tasks = vec![
            task("t1", "e1", 0, &["t3"]),
            task("t2", "e1", 0, &["t1"]),
            task("t3", "e1", 0, &["t2"]),
        ];
        let graph = resolve(&tasks, &epics);
        assert!(graph.batches.is_empty());
        assert_eq!(graph.circular_deps.len(), 1);
        assert_eq!(
            graph.circular_deps[0],
            BTreeSet::from([TaskId::from("t1"), TaskId::from("t2"), TaskId::from("t3")])
        );
    }

    #[test]
    fn missing_dependency_is_recorded_and_non_fatal() {
        let epics = vec![epic("e1", 0, &[])];
        let tasks = vec![task("t1", "e1", 0, &["ghost"])];
        let graph = resolve(&tasks, &epics);
        assert_eq!(graph.batches.len(), 1);
        assert!(graph
            .missing_deps
            .contains(&(TaskId::from("t1"), TaskId::from("ghost"))));
    }

    #[test]
    fn conflicting_predicted_files_split_lower_priority_task_into_next_batch() {
        let epics = vec![epic("e2", 0, &[]), epic("e3", 0, &[])];
        let mut t2 = task("t2", "e2", 5, &[]);
        t2.predicted_files = Some(vec!["a.txt".into()]);
        let mut t3 = task("t3", "e3", 1, &[]);
        t3.predicted_files = Some(vec!["a.txt".into()]);

        let graph = resolve(&[t2, t3], &epics);
        assert_eq!(graph.batches.len(), 2);
        assert!(graph.batches[0].contains(&TaskId::from("t2")));
        assert!(graph.batches[1].contains(&TaskId::from("t3")));
    }

    #[test]
    fn epic_level_dependency_expands_to_hard_task_edges() {
        let epics = vec![epic("e1", 0, &[]), epic("e2", 0, &["e1"])];
        let tasks = vec![task("t1", "e1", 0, &[]), task("t2", "e2", 0, &[])];
        let graph = resolve(&tasks, &epics);
        assert_eq!(graph.batches.len(), 2);
        assert_eq!(graph.batches[0], BTreeSet::from([TaskId::from("t1")]));
        assert_eq!(graph.batches[1], BTreeSet::from([TaskId::from("t2")]));
    }

    #[test]
    fn empty_task_set_yields_no_batches() {
        let graph = resolve(&[], &[]);
        assert!(graph.batches.is_empty());
        assert!(graph.circular_deps.is_empty());
    }

    #[test]
    fn resolving_the_produced_task_order_is_idempotent() {
        let epics = vec![epic("e1", 0, &[])];
        let tasks = vec![
            task("t1", "e1", 0, &[]),
            task("t2", "e1", 0, &["t1"]),
            task("t3", "e1", 0, &["t2"]),
        ];
        let first = resolve(&tasks, &epics);
        let second = resolve(&tasks, &epics);
        assert_eq!(first.batches, second.batches);
    }
}
