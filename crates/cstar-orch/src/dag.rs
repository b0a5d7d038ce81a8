//! Step-graph algorithms: cycle detection, ready frontier, dependents.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use cstar_store::StepStatus;

use cstar_core::domain::error::{CstarError, Result};

use crate::workplan::Step;

/// Kahn's algorithm. Returns a topological order or a cycle error naming
/// the steps left in the cycle.
pub fn topo_order(steps: &[Step]) -> Result<Vec<String>> {
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for step in steps {
        in_degree.entry(step.name.as_str()).or_insert(0);
        for dep in &step.depends_on {
            *in_degree.entry(step.name.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(step.name.as_str());
        }
    }

    // Seed with declaration order so the result is deterministic.
    let mut queue: VecDeque<&str> = steps
        .iter()
        .filter(|s| in_degree[s.name.as_str()] == 0)
        .map(|s| s.name.as_str())
        .collect();

    let mut order = Vec::new();
    while let Some(name) = queue.pop_front() {
        order.push(name.to_string());
        for dependent in dependents.get(name).into_iter().flatten() {
            let degree = in_degree.get_mut(dependent).expect("all steps seeded");
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() != steps.len() {
        let stuck: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(n, _)| *n)
            .collect();
        return Err(CstarError::Validation(format!(
            "step graph has a cycle involving: {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

/// Steps ready to submit: currently `UNSUBMITTED` with every dependency
/// `COMPLETED`. Declaration order is preserved.
pub fn ready_frontier<'a>(
    steps: &'a [Step],
    statuses: &BTreeMap<String, StepStatus>,
) -> Vec<&'a Step> {
    steps
        .iter()
        .filter(|step| {
            statuses.get(&step.name).copied() == Some(StepStatus::Unsubmitted)
                && step.depends_on.iter().all(|dep| {
                    statuses.get(dep).copied() == Some(StepStatus::Completed)
                })
        })
        .collect()
}

/// Every step downstream of `root`, transitively.
pub fn transitive_dependents(steps: &[Step], root: &str) -> BTreeSet<String> {
    let mut result = BTreeSet::new();
    let mut queue = VecDeque::from([root.to_string()]);
    while let Some(current) = queue.pop_front() {
        for step in steps {
            if step.depends_on.contains(&current) && result.insert(step.name.clone()) {
                queue.push_back(step.name.clone());
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str, deps: &[&str]) -> Step {
        Step {
            name: name.to_string(),
            application: "roms-marbl".to_string(),
            blueprint: format!("/plans/{name}.yaml"),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            blueprint_overrides: None,
            compute_overrides: None,
            workflow_overrides: None,
        }
    }

    #[test]
    fn topo_order_respects_dependencies() {
        let steps = vec![step("c", &["b"]), step("a", &[]), step("b", &["a"])];
        let order = topo_order(&steps).unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn cycle_detected() {
        let steps = vec![step("a", &["b"]), step("b", &["a"])];
        let err = topo_order(&steps).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn frontier_in_declaration_order() {
        let steps = vec![step("job1", &[]), step("job2", &["job1"]), step("job3", &[])];
        let mut statuses: BTreeMap<String, StepStatus> = BTreeMap::new();
        for s in &steps {
            statuses.insert(s.name.clone(), StepStatus::Unsubmitted);
        }

        let ready: Vec<&str> = ready_frontier(&steps, &statuses)
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(ready, ["job1", "job3"]);

        statuses.insert("job1".to_string(), StepStatus::Completed);
        statuses.insert("job3".to_string(), StepStatus::Running);
        let ready: Vec<&str> = ready_frontier(&steps, &statuses)
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(ready, ["job2"]);
    }

    #[test]
    fn dependents_transitive() {
        let steps = vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["b"]),
            step("d", &[]),
        ];
        let deps = transitive_dependents(&steps, "a");
        assert_eq!(deps, BTreeSet::from(["b".to_string(), "c".to_string()]));
        assert!(transitive_dependents(&steps, "d").is_empty());
    }
}
