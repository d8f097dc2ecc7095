//! Task Graph Engine: builds an in-memory DAG from a [`TaskTree`] and
//! computes the runnable frontier and completion via a Kahn's-algorithm
//! topological sort, with cycle detection.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::contracts::{Event, EventType, RelationKind, Task, TaskId, TaskStatus, TaskTree};
use crate::error::RunnerError;

/// Derived from a [`TaskTree`]; rebuilt from scratch on every refresh, never
/// mutated in place.
#[derive(Debug, Clone)]
pub struct Graph {
    pub root_id: TaskId,
    tasks: HashMap<TaskId, Task>,
    children: HashMap<TaskId, Vec<TaskId>>,
    depends_on: HashMap<TaskId, Vec<TaskId>>,
    /// Events observed while normalizing the tree (dangling deps, etc.),
    /// surfaced to the caller so they can be emitted through the Event Bus.
    pub diagnostics: Vec<Event>,
}

impl Graph {
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn children_of(&self, id: &TaskId) -> &[TaskId] {
        self.children.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn dependencies_of(&self, id: &TaskId) -> &[TaskId] {
        self.depends_on.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// A task is a leaf if it has no `parent`-kind children, i.e. nothing
    /// depends on it hierarchically. Epics/containers are never leaves.
    pub fn is_leaf(&self, id: &TaskId) -> bool {
        self.children_of(id).is_empty()
    }

    pub fn all_descendant_leaves(&self, root: &TaskId) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut stack = vec![root.clone()];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let kids = self.children_of(&id);
            if kids.is_empty() {
                if self.tasks.contains_key(&id) {
                    out.push(id);
                }
            } else {
                stack.extend(kids.iter().cloned());
            }
        }
        out
    }
}

/// Normalizes `tree`, fills indices, detects cycles among `depends_on`
/// edges, drops self-dependencies and dependencies on tasks outside the
/// root's descendant scope (emitting `graph_dangling_dep`), and rewrites
/// out-of-scope `parent` edges to the root.
pub fn build_graph(tree: &TaskTree) -> Result<Graph, RunnerError> {
    let mut tasks: HashMap<TaskId, Task> = tree.tasks.clone();
    tasks.insert(tree.root.id.clone(), tree.root.clone());

    let in_scope: HashSet<TaskId> = tasks.keys().cloned().collect();

    let mut children: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
    let mut depends_on: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
    let mut diagnostics = Vec::new();

    for relation in &tree.relations {
        match relation.kind {
            RelationKind::Parent => {
                if relation.from == relation.to {
                    continue;
                }
                let parent = if in_scope.contains(&relation.to) {
                    relation.to.clone()
                } else {
                    tree.root.id.clone()
                };
                children.entry(parent).or_default().push(relation.from.clone());
            }
            RelationKind::DependsOn => {
                if relation.from == relation.to {
                    continue;
                }
                if !in_scope.contains(&relation.to) {
                    diagnostics.push(
                        Event::new(EventType::GraphDanglingDep)
                            .with_task(relation.from.clone(), "")
                            .with_metadata("missing_dependency", relation.to.clone()),
                    );
                    continue;
                }
                depends_on.entry(relation.from.clone()).or_default().push(relation.to.clone());
            }
            RelationKind::Blocks => {
                // Reverse of depends_on; redundant for traversal purposes here.
            }
        }
    }

    // Also respect each Task's own metadata-carried `dependencies` list,
    // applying the same dangling-dependency drop policy.
    for (id, task) in tasks.iter() {
        for dep in task.dependencies() {
            if dep == *id {
                continue;
            }
            if !in_scope.contains(&dep) {
                diagnostics.push(
                    Event::new(EventType::GraphDanglingDep)
                        .with_task(id.clone(), task.title.clone())
                        .with_metadata("missing_dependency", dep),
                );
                continue;
            }
            let list = depends_on.entry(id.clone()).or_default();
            if !list.contains(&dep) {
                list.push(dep);
            }
        }
    }

    detect_cycles(&in_scope, &depends_on)?;

    for list in children.values_mut() {
        list.sort();
    }
    for list in depends_on.values_mut() {
        list.sort();
    }

    Ok(Graph {
        root_id: tree.root.id.clone(),
        tasks,
        children,
        depends_on,
        diagnostics,
    })
}

fn detect_cycles(nodes: &HashSet<TaskId>, edges: &HashMap<TaskId, Vec<TaskId>>) -> Result<(), RunnerError> {
    let mut in_degree: HashMap<TaskId, usize> = nodes.iter().map(|n| (n.clone(), 0)).collect();
    for targets in edges.values() {
        for t in targets {
            if let Some(count) = in_degree.get_mut(t) {
                *count += 1;
            }
        }
    }

    let mut queue: VecDeque<TaskId> = in_degree
        .iter()
        .filter(|&(_, deg)| *deg == 0)
        .map(|(id, _)| id.clone())
        .collect();
    let mut visited = 0usize;

    while let Some(node) = queue.pop_front() {
        visited += 1;
        if let Some(targets) = edges.get(&node) {
            for t in targets {
                if let Some(count) = in_degree.get_mut(t) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(t.clone());
                    }
                }
            }
        }
    }

    if visited != nodes.len() {
        let participants: Vec<String> = in_degree
            .into_iter()
            .filter(|(_, deg)| *deg > 0)
            .map(|(id, _)| id)
            .collect();
        return Err(RunnerError::CycleDetected(participants));
    }
    Ok(())
}

/// Returns the frontier: runnable leaves whose dependencies are satisfied
/// and whose status is `open`, ordered by `(priority ascending nulls-last,
/// TaskID ascending)`.
pub fn get_next_available(graph: &Graph) -> Vec<Task> {
    let mut frontier: Vec<Task> = graph
        .all_descendant_leaves(&graph.root_id)
        .into_iter()
        .filter_map(|id| graph.task(&id).cloned())
        .filter(|task| task.status == TaskStatus::Open)
        .filter(|task| dependencies_satisfied(graph, task))
        .collect();

    frontier.sort_by(|a, b| match (a.priority(), b.priority()) {
        (Some(pa), Some(pb)) => pa.cmp(&pb).then_with(|| a.id.cmp(&b.id)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    });
    frontier
}

fn dependencies_satisfied(graph: &Graph, task: &Task) -> bool {
    graph.dependencies_of(&task.id).iter().all(|dep| {
        graph
            .task(dep)
            .map(|d| d.status == TaskStatus::Closed)
            .unwrap_or(true) // absent == dropped as dangling, treated as satisfied
    })
}

/// True when no runnable leaves remain and no leaf is `in_progress`.
pub fn is_complete(graph: &Graph) -> bool {
    graph
        .all_descendant_leaves(&graph.root_id)
        .iter()
        .filter_map(|id| graph.task(id))
        .all(|task| task.status.is_terminal())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn task(id: &str, status: TaskStatus, parent: Option<&str>) -> Task {
        Task {
            id: id.into(),
            title: id.into(),
            description: String::new(),
            status,
            parent_id: parent.map(|s| s.into()),
            metadata: Map::new(),
        }
    }

    fn tree_with(tasks: Vec<Task>, relations: Vec<TaskRelationShorthand>) -> TaskTree {
        let root = task("R", TaskStatus::Open, None);
        let mut map: Map<TaskId, Task> = Map::new();
        for t in tasks {
            map.insert(t.id.clone(), t);
        }
        let relations = relations
            .into_iter()
            .map(|(kind, from, to)| crate::contracts::TaskRelation {
                kind,
                from: from.to_string(),
                to: to.to_string(),
            })
            .collect();
        TaskTree {
            root,
            tasks: map,
            relations,
        }
    }

    type TaskRelationShorthand = (RelationKind, &'static str, &'static str);

    #[test]
    fn frontier_orders_by_priority_then_id() {
        let mut a = task("A", TaskStatus::Open, Some("R"));
        a.metadata.insert("priority".into(), "1".into());
        let mut b = task("B", TaskStatus::Open, Some("R"));
        b.metadata.insert("priority".into(), "0".into());
        let tree = tree_with(
            vec![a, b],
            vec![(RelationKind::Parent, "A", "R"), (RelationKind::Parent, "B", "R")],
        );
        let graph = build_graph(&tree).unwrap();
        let frontier = get_next_available(&graph);
        assert_eq!(frontier.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["B", "A"]);
    }

    #[test]
    fn unsatisfied_dependency_blocks_dispatch() {
        let mut a = task("A", TaskStatus::Open, Some("R"));
        a.metadata.insert("dependencies".into(), "B".into());
        let b = task("B", TaskStatus::Open, Some("R"));
        let tree = tree_with(
            vec![a, b],
            vec![(RelationKind::Parent, "A", "R"), (RelationKind::Parent, "B", "R")],
        );
        let graph = build_graph(&tree).unwrap();
        let frontier = get_next_available(&graph);
        assert_eq!(frontier.len(), 1);
        assert_eq!(frontier[0].id, "B");
    }

    #[test]
    fn dangling_dependency_is_dropped_and_reported() {
        let mut a = task("A", TaskStatus::Open, Some("R"));
        a.metadata.insert("dependencies".into(), "GHOST".into());
        let tree = tree_with(vec![a], vec![(RelationKind::Parent, "A", "R")]);
        let graph = build_graph(&tree).unwrap();
        assert_eq!(graph.diagnostics.len(), 1);
        let frontier = get_next_available(&graph);
        assert_eq!(frontier.len(), 1);
        assert_eq!(frontier[0].id, "A");
    }

    #[test]
    fn cycle_is_detected() {
        let mut a = task("A", TaskStatus::Open, Some("R"));
        a.metadata.insert("dependencies".into(), "B".into());
        let mut b = task("B", TaskStatus::Open, Some("R"));
        b.metadata.insert("dependencies".into(), "A".into());
        let tree = tree_with(
            vec![a, b],
            vec![(RelationKind::Parent, "A", "R"), (RelationKind::Parent, "B", "R")],
        );
        let err = build_graph(&tree).unwrap_err();
        assert!(matches!(err, RunnerError::CycleDetected(_)));
    }

    #[test]
    fn container_complete_when_descendants_terminal() {
        let a = task("A", TaskStatus::Closed, Some("R"));
        let b = task("B", TaskStatus::Blocked, Some("R"));
        let tree = tree_with(
            vec![a, b],
            vec![(RelationKind::Parent, "A", "R"), (RelationKind::Parent, "B", "R")],
        );
        let graph = build_graph(&tree).unwrap();
        assert!(is_complete(&graph));
    }

    #[test]
    fn incomplete_while_leaf_open() {
        let a = task("A", TaskStatus::Open, Some("R"));
        let tree = tree_with(vec![a], vec![(RelationKind::Parent, "A", "R")]);
        let graph = build_graph(&tree).unwrap();
        assert!(!is_complete(&graph));
    }
}
