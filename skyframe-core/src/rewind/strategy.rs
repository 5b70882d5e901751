//! Rewind planning.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexSet;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::RewindPlan;
use crate::action::{ActionGraph, ActionId, Artifact};
use crate::config::RewindConfig;
use crate::error::{RewindError, RewindResult};
use crate::graph::Graph;
use crate::key::Key;

/// Plans rewinds and tracks which actions are currently being rewound.
///
/// One strategy is shared by every evaluation of an evaluator, so two
/// evaluations that lose the same input do not both reset its producer.
#[derive(Debug)]
pub struct RewindStrategy {
    max_repeated_lost_inputs: usize,
    in_progress: Mutex<HashSet<ActionId>>,
    lost_counts: Mutex<HashMap<(Key, Artifact), usize>>,
}

impl RewindStrategy {
    /// A strategy allowing each node to lose the same input at most
    /// `max_repeated_lost_inputs` times.
    pub fn new(max_repeated_lost_inputs: usize) -> Self {
        Self {
            max_repeated_lost_inputs,
            in_progress: Mutex::new(HashSet::new()),
            lost_counts: Mutex::new(HashMap::new()),
        }
    }

    /// A strategy configured from `config`.
    pub fn from_config(config: &RewindConfig) -> Self {
        Self::new(config.max_repeated_lost_inputs)
    }

    /// Plan the rewind for `failed`, which requested `failed_deps` and then
    /// found `lost_inputs` missing.
    ///
    /// Actions in the returned plan are marked in progress until
    /// [`release`](Self::release)d.
    pub fn plan_rewind(
        &self,
        failed: &Key,
        failed_deps: &IndexSet<Key>,
        lost_inputs: &[Artifact],
        actions: &dyn ActionGraph,
        graph: &Graph,
    ) -> RewindResult<RewindPlan> {
        self.check_lost_inputs(failed, failed_deps, lost_inputs, actions)?;

        let mut plan = RewindPlan::new(failed.clone());
        let mut visited: HashSet<ActionId> = HashSet::new();
        let mut queue: VecDeque<Artifact> = lost_inputs.iter().cloned().collect();
        let mut in_progress = self.in_progress.lock();

        while let Some(artifact) = queue.pop_front() {
            let Some(id) = artifact.generating_action() else {
                continue;
            };
            if !visited.insert(id.clone()) {
                continue;
            }
            if in_progress.contains(id) {
                debug!(action = %id, "producer already being rewound; deferring");
                plan.deferred.push(id.clone());
                continue;
            }
            let Some(action) = graph.generating_action(&artifact) else {
                debug!(action = %id, "producer not known yet; deferring");
                plan.deferred.push(id.clone());
                continue;
            };

            plan.nodes_to_restart.insert(actions.artifact_key(&artifact));
            plan.nodes_to_restart.insert(actions.action_key(id));
            plan.actions_to_reset.insert(id.clone());
            in_progress.insert(id.clone());

            if action.propagates_inputs_insensitively() {
                for input in action.inputs().iter().filter(|input| !input.is_source()) {
                    plan.nodes_to_restart.insert(actions.artifact_key(input));
                    queue.push_back(input.clone());
                }
            }
        }

        debug!(
            failed = %failed,
            nodes = plan.nodes_to_restart.len(),
            actions = plan.actions_to_reset.len(),
            partial = plan.is_partial(),
            "planned rewind"
        );
        Ok(plan)
    }

    /// Mark an action as no longer being rewound.
    pub fn release(&self, action: &ActionId) {
        self.in_progress.lock().remove(action);
    }

    /// Whether `action` is part of a rewind that has not finished.
    pub fn is_in_progress(&self, action: &ActionId) -> bool {
        self.in_progress.lock().contains(action)
    }

    fn check_lost_inputs(
        &self,
        failed: &Key,
        failed_deps: &IndexSet<Key>,
        lost_inputs: &[Artifact],
        actions: &dyn ActionGraph,
    ) -> RewindResult<()> {
        for artifact in lost_inputs {
            if artifact.is_source() {
                return Err(RewindError::LostSourceInput {
                    failed: failed.clone(),
                    artifact: artifact.clone(),
                });
            }
            if !failed_deps.contains(&actions.artifact_key(artifact)) {
                return Err(RewindError::UndeclaredInput {
                    failed: failed.clone(),
                    artifact: artifact.clone(),
                });
            }
        }

        // Only a request that can be honored counts against the limit.
        let mut counts = self.lost_counts.lock();
        for artifact in lost_inputs {
            let count = counts.get(&(failed.clone(), artifact.clone())).copied().unwrap_or(0) + 1;
            if count > self.max_repeated_lost_inputs {
                warn!(failed = %failed, artifact = %artifact, count, "input lost too many times");
                return Err(RewindError::RepeatedLostInput {
                    failed: failed.clone(),
                    artifact: artifact.clone(),
                    count,
                });
            }
        }
        for artifact in lost_inputs {
            *counts.entry((failed.clone(), artifact.clone())).or_insert(0) += 1;
        }
        Ok(())
    }
}

impl Default for RewindStrategy {
    fn default() -> Self {
        Self::from_config(&RewindConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::graph::{EvaluationId, NodeOutput};
    use crate::key::{FunctionName, Value};
    use tokio::sync::mpsc::unbounded_channel;

    const RULE: FunctionName = FunctionName::new("RULE");
    const ARTIFACT: FunctionName = FunctionName::new("ARTIFACT");
    const ACTION: FunctionName = FunctionName::new("ACTION_EXECUTION");

    struct Actions;

    impl ActionGraph for Actions {
        fn artifact_key(&self, artifact: &Artifact) -> Key {
            Key::new(ARTIFACT, artifact.exec_path().to_string())
        }

        fn action_key(&self, action: &ActionId) -> Key {
            Key::new(ACTION, action.clone())
        }
    }

    /// A graph where rule `name` generated `actions`.
    fn graph_with_rule(name: &str, actions: Vec<Action>) -> (Graph, Key) {
        let graph = Graph::new();
        let rule = Key::new(RULE, name.to_string());
        let (tx, _rx) = unbounded_channel();
        let eval = EvaluationId::new();
        graph.create_if_absent(&rule).claim(eval, &tx);
        graph.set_done(
            &rule,
            eval,
            NodeOutput::Value(Value::with_actions(name.to_string(), actions)),
            vec![],
        );
        (graph, rule)
    }

    fn deps(keys: &[Key]) -> IndexSet<Key> {
        keys.iter().cloned().collect()
    }

    #[test]
    fn rewinds_lost_input_and_its_producer() {
        let (graph, rule) = graph_with_rule("p", vec![Action::new("Compile")]);
        let producer = ActionId::new(rule, 0);
        let lost = Artifact::derived("out/i.o", producer.clone());
        let failed = Key::new(ACTION, "f".to_string());
        let strategy = RewindStrategy::new(5);

        let plan = strategy
            .plan_rewind(&failed, &deps(&[Actions.artifact_key(&lost)]), &[lost.clone()], &Actions, &graph)
            .unwrap();

        let expected: IndexSet<Key> = [
            failed.clone(),
            Actions.artifact_key(&lost),
            Actions.action_key(&producer),
        ]
        .into_iter()
        .collect();
        assert_eq!(plan.nodes_to_restart(), &expected);
        assert_eq!(plan.actions_to_reset().len(), 1);
        assert!(!plan.is_partial());
        assert!(strategy.is_in_progress(&producer));

        strategy.release(&producer);
        assert!(!strategy.is_in_progress(&producer));
    }

    #[test]
    fn insensitive_producer_widens_to_its_inputs() {
        // Rule actions: #0 = R produces J, #1 = Q bundles J (and a source) into I.
        let rule = Key::new(RULE, "bundle".to_string());
        let r = ActionId::new(rule.clone(), 0);
        let q = ActionId::new(rule.clone(), 1);
        let j = Artifact::derived("out/j.jar", r.clone());
        let i = Artifact::derived("out/i.zip", q.clone());
        let (graph, _) = graph_with_rule(
            "bundle",
            vec![
                Action::new("Javac").with_outputs([j.clone()]),
                Action::new("Zip")
                    .with_inputs([j.clone(), Artifact::source("res/icon.png")])
                    .with_outputs([i.clone()])
                    .propagating_inputs_insensitively(),
            ],
        );
        let failed = Key::new(ACTION, "deploy".to_string());

        let plan = RewindStrategy::new(5)
            .plan_rewind(&failed, &deps(&[Actions.artifact_key(&i)]), &[i.clone()], &Actions, &graph)
            .unwrap();

        for key in [
            failed.clone(),
            Actions.artifact_key(&i),
            Actions.action_key(&q),
            Actions.artifact_key(&j),
            Actions.action_key(&r),
        ] {
            assert!(plan.nodes_to_restart().contains(&key), "missing {key}");
        }
        assert_eq!(plan.nodes_to_restart().len(), 5);
        assert_eq!(plan.actions_to_reset().len(), 2);
    }

    #[test]
    fn lost_source_input_is_unrecoverable() {
        let graph = Graph::new();
        let src = Artifact::source("AndroidManifest.xml");
        let failed = Key::new(ACTION, "merge".to_string());
        let err = RewindStrategy::new(5)
            .plan_rewind(&failed, &deps(&[Actions.artifact_key(&src)]), &[src], &Actions, &graph)
            .unwrap_err();
        assert!(matches!(err, RewindError::LostSourceInput { .. }));
    }

    #[test]
    fn undeclared_input_is_rejected() {
        let (graph, rule) = graph_with_rule("undeclared", vec![Action::new("Compile")]);
        let lost = Artifact::derived("out/other.o", ActionId::new(rule, 0));
        let failed = Key::new(ACTION, "link".to_string());
        let err = RewindStrategy::new(5)
            .plan_rewind(&failed, &IndexSet::new(), &[lost], &Actions, &graph)
            .unwrap_err();
        assert!(matches!(err, RewindError::UndeclaredInput { .. }));
    }

    #[test]
    fn rejected_request_does_not_count_as_a_loss() {
        let (graph, rule) = graph_with_rule("mixed", vec![Action::new("Compile")]);
        let producer = ActionId::new(rule, 0);
        let lost = Artifact::derived("out/mixed.o", producer.clone());
        let undeclared = Artifact::derived("out/elsewhere.o", producer.clone());
        let failed = Key::new(ACTION, "mixed-consumer".to_string());
        let lost_deps = deps(&[Actions.artifact_key(&lost)]);
        let strategy = RewindStrategy::new(1);

        let err = strategy
            .plan_rewind(&failed, &lost_deps, &[lost.clone(), undeclared], &Actions, &graph)
            .unwrap_err();
        assert!(matches!(err, RewindError::UndeclaredInput { .. }));
        let err = strategy
            .plan_rewind(&failed, &lost_deps, &[lost.clone(), Artifact::source("mixed.c")], &Actions, &graph)
            .unwrap_err();
        assert!(matches!(err, RewindError::LostSourceInput { .. }));

        // The single allowed loss is still available.
        strategy
            .plan_rewind(&failed, &lost_deps, &[lost], &Actions, &graph)
            .unwrap();
        assert!(strategy.is_in_progress(&producer));
    }

    #[test]
    fn concurrent_rewind_of_same_producer_is_deferred() {
        let (graph, rule) = graph_with_rule("shared", vec![Action::new("Compile")]);
        let producer = ActionId::new(rule, 0);
        let lost = Artifact::derived("out/shared.o", producer);
        let strategy = RewindStrategy::new(5);
        let lost_deps = deps(&[Actions.artifact_key(&lost)]);

        let first = Key::new(ACTION, "first".to_string());
        let second = Key::new(ACTION, "second".to_string());
        let plan1 = strategy
            .plan_rewind(&first, &lost_deps, &[lost.clone()], &Actions, &graph)
            .unwrap();
        let plan2 = strategy
            .plan_rewind(&second, &lost_deps, &[lost], &Actions, &graph)
            .unwrap();

        assert!(!plan1.is_partial());
        assert!(plan2.is_partial());
        assert_eq!(plan2.nodes_to_restart().len(), 1);
        assert!(plan2.actions_to_reset().is_empty());
    }

    #[test]
    fn unknown_producer_is_deferred() {
        let graph = Graph::new();
        let rule = Key::new(RULE, "never-built".to_string());
        let lost = Artifact::derived("out/x.o", ActionId::new(rule, 0));
        let failed = Key::new(ACTION, "consumer".to_string());
        let plan = RewindStrategy::new(5)
            .plan_rewind(&failed, &deps(&[Actions.artifact_key(&lost)]), &[lost], &Actions, &graph)
            .unwrap();
        assert!(plan.is_partial());
    }

    #[test]
    fn repeated_loss_hits_the_limit() {
        let (graph, rule) = graph_with_rule("flaky", vec![Action::new("Compile")]);
        let producer = ActionId::new(rule, 0);
        let lost = Artifact::derived("out/flaky.o", producer.clone());
        let failed = Key::new(ACTION, "flaky-consumer".to_string());
        let lost_deps = deps(&[Actions.artifact_key(&lost)]);
        let strategy = RewindStrategy::new(1);

        strategy
            .plan_rewind(&failed, &lost_deps, &[lost.clone()], &Actions, &graph)
            .unwrap();
        strategy.release(&producer);
        let err = strategy
            .plan_rewind(&failed, &lost_deps, &[lost], &Actions, &graph)
            .unwrap_err();
        assert!(matches!(err, RewindError::RepeatedLostInput { count: 2, .. }));
    }
}
