//! The build driver.
//!
//! One driver runs per `evaluate` call. It is the only scheduler for that
//! evaluation: it claims nodes, decides whether they re-verify or recompute,
//! hands functions to the worker pool and reacts to their outcomes. Worker
//! threads never touch the driver's bookkeeping; they report back over a
//! channel.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use super::{ErrorInfo, EvaluationOptions, EvaluationResult, EvaluationStats, Evaluator};
use crate::action::{ActionId, Artifact};
use crate::cycle::{find_cycles, CycleInfo};
use crate::error::{EvalResult, EvaluationError, RewindError};
use crate::function::{EnvReport, Environment, FunctionError, Outcome};
use crate::graph::{Claim, DepGroup, DoneSnapshot, EvaluationId, Graph, NodeOutput, NodeState, StartKind};
use crate::invalidation::notify_dirtied;
use crate::key::{Key, Value, Version};
use crate::rewind::RewindPlan;

/// A restart whose dependencies were all available already makes no
/// progress. One is tolerated (a dependency may finish between the
/// function's lookup and the driver's); the next is a contract violation.
const NO_PROGRESS_RESTART_LIMIT: u32 = 1;

#[derive(Debug)]
enum Phase {
    /// Checking the previous dependency groups of a dirty node, one group at
    /// a time.
    Reverify {
        groups: Vec<DepGroup>,
        next: usize,
        last_evaluated: Version,
    },
    /// Waiting to run, or waiting for requested dependencies.
    Compute,
    /// The function is running on a worker.
    Running,
}

/// A node this evaluation has claimed and not finished.
#[derive(Debug)]
struct Pending {
    phase: Phase,
    /// Requested dependencies that are not done yet.
    outstanding: IndexSet<Key>,
    /// Every dependency requested by the current computation, grouped.
    groups: Vec<DepGroup>,
    seen: HashSet<Key>,
    /// Some computation read a transient failure and recovered from it.
    transient_deps: bool,
    no_progress_restarts: u32,
}

impl Pending {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            outstanding: IndexSet::new(),
            groups: Vec::new(),
            seen: HashSet::new(),
            transient_deps: false,
            no_progress_restarts: 0,
        }
    }

    fn merge_groups(&mut self, groups: Vec<DepGroup>) {
        for group in groups {
            let fresh: DepGroup = group
                .into_iter()
                .filter(|key| self.seen.insert(key.clone()))
                .collect();
            if !fresh.is_empty() {
                self.groups.push(fresh);
            }
        }
    }
}

/// A function invocation that returned.
struct Computed {
    key: Key,
    result: Result<Outcome, FunctionError>,
    report: EnvReport,
}

enum Wake {
    Computed(Computed),
    ForeignDone(Key),
    Interrupt,
    InterruptClosed,
    Idle,
}

pub(crate) struct Driver<'a> {
    evaluator: &'a Evaluator,
    graph: Arc<Graph>,
    evaluation: EvaluationId,
    options: EvaluationOptions,
    roots: Vec<Key>,

    owned: IndexMap<Key, Pending>,
    /// For each unfinished key, the owned nodes waiting on it.
    parents: HashMap<Key, IndexSet<Key>>,
    /// Keys in flight in another evaluation that this one waits on.
    foreign: IndexSet<Key>,
    ready: VecDeque<Key>,
    checks: VecDeque<Key>,
    running: usize,

    failure: Option<(Key, ErrorInfo)>,
    bubbled: Option<(Key, ErrorInfo)>,
    stats: EvaluationStats,
    rewinds: Vec<RewindPlan>,
    /// Action nodes reset by a rewind, until they finish again.
    rewound: HashMap<Key, ActionId>,

    events_tx: mpsc::UnboundedSender<Computed>,
    events_rx: mpsc::UnboundedReceiver<Computed>,
    waiter_tx: mpsc::UnboundedSender<Key>,
    waiter_rx: mpsc::UnboundedReceiver<Key>,
    interrupt_rx: watch::Receiver<bool>,
    interrupt_open: bool,
}

impl<'a> Driver<'a> {
    pub(crate) fn new(evaluator: &'a Evaluator, roots: &[Key], options: EvaluationOptions) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (waiter_tx, waiter_rx) = mpsc::unbounded_channel();
        let interrupt_rx = options.interrupt.subscribe();
        Self {
            evaluator,
            graph: Arc::clone(evaluator.graph()),
            evaluation: EvaluationId::new(),
            options,
            roots: roots.to_vec(),
            owned: IndexMap::new(),
            parents: HashMap::new(),
            foreign: IndexSet::new(),
            ready: VecDeque::new(),
            checks: VecDeque::new(),
            running: 0,
            failure: None,
            bubbled: None,
            stats: EvaluationStats::default(),
            rewinds: Vec::new(),
            rewound: HashMap::new(),
            events_tx,
            events_rx,
            waiter_tx,
            waiter_rx,
            interrupt_rx,
            interrupt_open: true,
        }
    }

    pub(crate) async fn run(mut self) -> EvalResult<EvaluationResult> {
        let roots = self.roots.clone();
        for root in &roots {
            if let Some(snapshot) = self.request(root, None) {
                if let NodeOutput::Error(error) = &snapshot.output {
                    self.record_failure(root, error);
                }
            }
        }

        let mut stall_checked = false;
        loop {
            if self.is_stopping() {
                if self.running == 0 {
                    break;
                }
            } else {
                self.drain_checks();
                self.dispatch_ready();
                if self.is_idle() {
                    if self.owned.is_empty() && self.foreign.is_empty() {
                        break;
                    }
                    if !stall_checked {
                        stall_checked = true;
                        if self.resolve_stall() {
                            continue;
                        }
                    }
                    if self.foreign.is_empty() {
                        let pending = self.owned.len();
                        warn!(pending, "evaluation stalled without a cycle");
                        self.abandon_all();
                        self.release_rewinds();
                        return Err(EvaluationError::Stalled { pending });
                    }
                }
            }

            match self.next_wake().await {
                Wake::Computed(computed) => self.on_computed(computed),
                Wake::ForeignDone(key) => self.on_foreign_done(key),
                Wake::InterruptClosed => self.interrupt_open = false,
                Wake::Interrupt | Wake::Idle => {}
            }
            stall_checked = false;
        }

        self.finish()
    }

    fn is_stopping(&self) -> bool {
        self.failure.is_some() || self.options.interrupt.is_interrupted()
    }

    fn is_idle(&self) -> bool {
        self.running == 0 && self.ready.is_empty() && self.checks.is_empty()
    }

    async fn next_wake(&mut self) -> Wake {
        let interrupt_open = self.interrupt_open;
        tokio::select! {
            Some(computed) = self.events_rx.recv() => Wake::Computed(computed),
            Some(key) = self.waiter_rx.recv() => Wake::ForeignDone(key),
            changed = self.interrupt_rx.changed(), if interrupt_open => match changed {
                Ok(()) => Wake::Interrupt,
                Err(_) => Wake::InterruptClosed,
            },
            else => Wake::Idle,
        }
    }

    // ------------------------------------------------------------------------
    // Requesting and claiming
    // ------------------------------------------------------------------------

    /// Ask for `key` on behalf of `parent`. Returns the result if the key is
    /// already done; otherwise `parent` is resumed when it finishes.
    fn request(&mut self, key: &Key, parent: Option<&Key>) -> Option<DoneSnapshot> {
        if self.owned.contains_key(key) || self.foreign.contains(key) {
            self.add_parent(key, parent);
            return None;
        }

        let node = self.graph.create_if_absent(key);
        match node.claim(self.evaluation, &self.waiter_tx) {
            Claim::Done(snapshot) => {
                self.stats.cache_hits += 1;
                Some(snapshot)
            }
            Claim::Owned => {
                warn!(key = %key, "claimed node is missing from the driver");
                self.add_parent(key, parent);
                None
            }
            Claim::Waiting => {
                trace!(key = %key, "waiting on another evaluation");
                self.foreign.insert(key.clone());
                self.add_parent(key, parent);
                None
            }
            Claim::Started(_) if self.evaluator.registry().function_for(key).is_none() => {
                let error = ErrorInfo::from_failure(
                    key,
                    FunctionError::persistent(format!(
                        "no function registered for {}",
                        key.function_name()
                    )),
                );
                self.graph
                    .set_done(key, self.evaluation, NodeOutput::Error(error.clone()), Vec::new());
                self.add_parent(key, parent);
                self.record_failure(key, &error);
                self.parents.remove(key);
                Some(DoneSnapshot {
                    output: NodeOutput::Error(error),
                    last_changed: self.graph.version(),
                    transient: false,
                })
            }
            Claim::Started(kind) => {
                self.add_parent(key, parent);
                let phase = match kind {
                    StartKind::Fresh | StartKind::Rebuild => {
                        self.ready.push_back(key.clone());
                        Phase::Compute
                    }
                    StartKind::Reverify {
                        groups,
                        last_evaluated,
                    } => {
                        self.checks.push_back(key.clone());
                        Phase::Reverify {
                            groups,
                            next: 0,
                            last_evaluated,
                        }
                    }
                };
                trace!(key = %key, ?phase, "claimed node");
                self.owned.insert(key.clone(), Pending::new(phase));
                None
            }
        }
    }

    fn add_parent(&mut self, key: &Key, parent: Option<&Key>) {
        if let Some(parent) = parent {
            self.parents
                .entry(key.clone())
                .or_default()
                .insert(parent.clone());
        }
    }

    /// Make `parent` wait for `deps`.
    fn await_deps(&mut self, parent: &Key, deps: Vec<Key>) {
        if let Some(node) = self.graph.get_node(parent) {
            node.record_temporary_deps(deps.iter());
        }
        if let Some(pending) = self.owned.get_mut(parent) {
            pending.outstanding.extend(deps);
            pending.no_progress_restarts = 0;
        }
    }

    // ------------------------------------------------------------------------
    // Re-verification
    // ------------------------------------------------------------------------

    fn drain_checks(&mut self) {
        while let Some(key) = self.checks.pop_front() {
            if self.is_stopping() {
                break;
            }
            self.process_check(&key);
        }
    }

    /// Walk the previous dependency groups of a dirty node. Stops at the
    /// first group with a dependency that changed after the node was last
    /// verified, or that is not done yet.
    fn process_check(&mut self, key: &Key) {
        loop {
            let (group, last_evaluated) = {
                let Some(pending) = self.owned.get(key) else {
                    return;
                };
                if !pending.outstanding.is_empty() {
                    return;
                }
                let Phase::Reverify {
                    groups,
                    next,
                    last_evaluated,
                } = &pending.phase
                else {
                    return;
                };
                match groups.get(*next) {
                    Some(group) => (group.clone(), *last_evaluated),
                    None => break,
                }
            };

            let mut changed = false;
            let mut waiting = Vec::new();
            for dep in &group {
                match self.request(dep, Some(key)) {
                    Some(snapshot) => changed |= snapshot.last_changed > last_evaluated,
                    None => waiting.push(dep.clone()),
                }
            }

            if changed {
                trace!(key = %key, "dependency changed; recomputing");
                if let Some(pending) = self.owned.get_mut(key) {
                    pending.phase = Phase::Compute;
                    pending.outstanding.clear();
                }
                self.ready.push_back(key.clone());
                return;
            }
            if !waiting.is_empty() {
                self.await_deps(key, waiting);
                return;
            }
            if let Some(Pending {
                phase: Phase::Reverify { next, .. },
                ..
            }) = self.owned.get_mut(key)
            {
                *next += 1;
            }
        }

        self.finish_clean(key);
    }

    // ------------------------------------------------------------------------
    // Running functions
    // ------------------------------------------------------------------------

    fn dispatch_ready(&mut self) {
        while self.running < self.options.parallelism {
            let Some(key) = self.ready.pop_front() else {
                break;
            };
            let Some(pending) = self.owned.get_mut(&key) else {
                continue;
            };
            if !matches!(pending.phase, Phase::Compute) || !pending.outstanding.is_empty() {
                continue;
            }
            let Some(function) = self.evaluator.registry().function_for(&key).cloned() else {
                continue;
            };
            pending.phase = Phase::Running;
            self.running += 1;
            self.stats.functions_invoked += 1;
            trace!(key = %key, running = self.running, "dispatching function");

            let mut env = Environment::new(
                key.clone(),
                Arc::clone(&self.graph),
                self.evaluation,
                self.options.interrupt.clone(),
                self.options.keep_going,
            );
            let events = self.events_tx.clone();
            tokio::task::spawn_blocking(move || {
                let result = catch_unwind(AssertUnwindSafe(|| function.compute(&key, &mut env)))
                    .unwrap_or_else(|payload| {
                        Err(FunctionError::persistent(format!(
                            "function for {key} panicked: {}",
                            panic_message(&*payload)
                        )))
                    });
                // The receiver is gone only if the driver already returned.
                let _ = events.send(Computed {
                    key,
                    result,
                    report: env.into_report(),
                });
            });
        }
    }

    fn on_computed(&mut self, computed: Computed) {
        let Computed {
            key,
            result,
            report,
        } = computed;
        self.running -= 1;
        let stopping = self.is_stopping();

        let Some(pending) = self.owned.get_mut(&key) else {
            warn!(key = %key, "result for a node this evaluation does not own");
            return;
        };
        pending.phase = Phase::Compute;
        let missing = report.values_missing();
        pending.transient_deps |= report.transient_deps;
        pending.merge_groups(report.groups);
        if let Some(node) = self.graph.get_node(&key) {
            node.record_temporary_deps(pending.seen.iter());
        }

        match result {
            Err(error) => {
                debug!(key = %key, error = %error, transience = %error.transience(), "function failed");
                self.finish_error(&key, ErrorInfo::from_failure(&key, error));
            }
            Ok(Outcome::Done(_)) if missing => {
                warn!(key = %key, "function returned a value while dependencies were missing");
                self.finish_error(
                    &key,
                    ErrorInfo::from_failure(
                        &key,
                        FunctionError::persistent(format!(
                            "{} returned a value although dependencies were missing",
                            key.function_name()
                        )),
                    ),
                );
            }
            Ok(Outcome::Done(value)) => self.finish_value(&key, value),
            Ok(Outcome::NeedsDeps(deps)) => {
                self.stats.restarts += 1;
                if !stopping {
                    self.on_needs_deps(&key, deps, report.missing, report.dep_errors);
                }
            }
            Ok(Outcome::LostInputs(lost)) => {
                if !stopping {
                    self.rewind(&key, lost);
                }
            }
        }
    }

    fn on_needs_deps(
        &mut self,
        key: &Key,
        deps: Vec<Key>,
        missing: IndexSet<Key>,
        dep_errors: IndexMap<Key, ErrorInfo>,
    ) {
        let mut requested: IndexSet<Key> = deps.into_iter().collect();
        requested.extend(missing);
        if requested.is_empty() && dep_errors.is_empty() {
            warn!(key = %key, "function restarted without requesting anything");
            self.finish_error(
                key,
                ErrorInfo::from_failure(
                    key,
                    FunctionError::persistent(format!(
                        "{} asked for a restart without requesting any dependency",
                        key.function_name()
                    )),
                ),
            );
            return;
        }

        let mut child_errors: Vec<ErrorInfo> = dep_errors
            .iter()
            .filter(|(dep, _)| !requested.contains(*dep))
            .map(|(_, error)| error.clone())
            .collect();
        let mut waiting = Vec::new();
        for dep in &requested {
            match self.request(dep, Some(key)) {
                Some(DoneSnapshot {
                    output: NodeOutput::Error(error),
                    ..
                }) => child_errors.push(error),
                Some(_) => {}
                None => waiting.push(dep.clone()),
            }
        }

        let fail_now = !child_errors.is_empty() && (!self.options.keep_going || waiting.is_empty());
        if fail_now {
            self.finish_error(key, ErrorInfo::from_children(key, child_errors.iter()));
        } else if !waiting.is_empty() {
            self.await_deps(key, waiting);
        } else if let Some(pending) = self.owned.get_mut(key) {
            pending.no_progress_restarts += 1;
            if pending.no_progress_restarts > NO_PROGRESS_RESTART_LIMIT {
                warn!(key = %key, "restart made no progress");
                self.finish_error(
                    key,
                    ErrorInfo::from_failure(
                        key,
                        FunctionError::persistent(format!(
                            "{} keeps restarting although its dependencies are done",
                            key.function_name()
                        )),
                    ),
                );
            } else {
                self.ready.push_back(key.clone());
            }
        }
    }

    // ------------------------------------------------------------------------
    // Rewinding
    // ------------------------------------------------------------------------

    fn rewind(&mut self, key: &Key, lost: Vec<Artifact>) {
        let evaluator = self.evaluator;
        let Some(rewinding) = evaluator.rewinding() else {
            let error = RewindError::Disabled { failed: key.clone() };
            self.finish_error(
                key,
                ErrorInfo::from_failure(key, FunctionError::persistent(error.to_string()).with_source(error)),
            );
            return;
        };

        let deps: IndexSet<Key> = self
            .owned
            .get(key)
            .map(|pending| pending.groups.iter().flatten().cloned().collect())
            .unwrap_or_default();

        let plan = match rewinding.strategy.plan_rewind(
            key,
            &deps,
            &lost,
            &*rewinding.actions,
            &self.graph,
        ) {
            Ok(plan) => plan,
            Err(error) => {
                warn!(key = %key, error = %error, "cannot recover lost inputs");
                self.finish_error(
                    key,
                    ErrorInfo::from_failure(
                        key,
                        FunctionError::persistent(format!("cannot recover lost inputs: {error}"))
                            .with_source(error),
                    ),
                );
                return;
            }
        };

        let mut dirtied = Vec::new();
        let mut dependents = Vec::new();
        for node in plan.nodes_to_restart().iter().filter(|node| *node != key) {
            if let Some(rdeps) = self.graph.reset_for_rewind(node) {
                dirtied.push(node.clone());
                dependents.extend(rdeps);
            }
        }
        // Dependents outside the plan must not keep serving the old outputs
        // if this evaluation stops before the reset nodes are rebuilt.
        dependents.retain(|dep| !plan.nodes_to_restart().contains(dep) && !self.owned.contains_key(dep));
        let restarted = dirtied.len();
        dirtied.extend(self.graph.mark_dirty(&dependents, false));
        notify_dirtied(evaluator.registry(), &dirtied);

        for action in plan.actions_to_reset() {
            rewinding.actions.reset_action(action);
            self.rewound
                .insert(rewinding.actions.action_key(action), action.clone());
        }

        info!(
            key = %key,
            lost = lost.len(),
            restarted,
            dirtied = dirtied.len() - restarted,
            partial = plan.is_partial(),
            "rewinding lost inputs"
        );
        self.stats.rewinds += 1;
        self.rewinds.push(plan);
        self.ready.push_back(key.clone());
    }

    fn release_rewound(&mut self, key: &Key) {
        if let Some(action) = self.rewound.remove(key) {
            if let Some(rewinding) = self.evaluator.rewinding() {
                rewinding.strategy.release(&action);
            }
        }
    }

    fn release_rewinds(&mut self) {
        if let Some(rewinding) = self.evaluator.rewinding() {
            for action in self.rewound.values() {
                rewinding.strategy.release(action);
            }
        }
        self.rewound.clear();
    }

    // ------------------------------------------------------------------------
    // Finishing nodes
    // ------------------------------------------------------------------------

    fn finish_value(&mut self, key: &Key, value: Value) {
        let (groups, transient_deps) = self
            .owned
            .swap_remove(key)
            .map(|pending| (pending.groups, pending.transient_deps))
            .unwrap_or_default();
        let changed = self
            .graph
            .complete(key, self.evaluation, NodeOutput::Value(value), groups, transient_deps);
        self.stats.nodes_computed += 1;
        trace!(key = %key, changed, "node done");
        self.release_rewound(key);
        self.notify_parents(key);
    }

    fn finish_error(&mut self, key: &Key, error: ErrorInfo) {
        let (groups, transient_deps) = self
            .owned
            .swap_remove(key)
            .map(|pending| (pending.groups, pending.transient_deps))
            .unwrap_or_default();
        self.graph.complete(
            key,
            self.evaluation,
            NodeOutput::Error(error.clone()),
            groups,
            transient_deps,
        );
        self.stats.nodes_computed += 1;
        trace!(key = %key, "node failed");
        self.record_failure(key, &error);
        self.release_rewound(key);
        self.notify_parents(key);
    }

    fn finish_clean(&mut self, key: &Key) {
        self.owned.swap_remove(key);
        self.graph.mark_clean(key, self.evaluation);
        self.stats.verified_clean += 1;
        trace!(key = %key, "dirty node verified unchanged");
        self.notify_parents(key);
    }

    fn notify_parents(&mut self, key: &Key) {
        let Some(parents) = self.parents.remove(key) else {
            return;
        };
        for parent in parents {
            let Some(pending) = self.owned.get_mut(&parent) else {
                continue;
            };
            if !pending.outstanding.shift_remove(key) || !pending.outstanding.is_empty() {
                continue;
            }
            match pending.phase {
                Phase::Reverify { .. } => self.checks.push_back(parent),
                Phase::Compute => self.ready.push_back(parent),
                Phase::Running => {}
            }
        }
    }

    fn on_foreign_done(&mut self, key: Key) {
        if !self.foreign.shift_remove(&key) {
            return;
        }
        if let Some(snapshot) = self.request(&key, None) {
            if let NodeOutput::Error(error) = &snapshot.output {
                self.record_failure(&key, error);
            }
            self.notify_parents(&key);
        }
    }

    /// In fail-fast mode, remember the first failure and the error its
    /// nearest root would see.
    fn record_failure(&mut self, key: &Key, error: &ErrorInfo) {
        if self.options.keep_going || self.failure.is_some() {
            return;
        }
        debug!(key = %key, "first failure; stopping evaluation");
        self.failure = Some((key.clone(), error.clone()));
        self.bubbled = Some(self.bubble_to_root(key, error));
    }

    fn bubble_to_root(&self, key: &Key, error: &ErrorInfo) -> (Key, ErrorInfo) {
        let mut current = (key.clone(), error.clone());
        let mut visited: HashSet<Key> = HashSet::new();
        visited.insert(key.clone());
        while !self.roots.contains(&current.0) {
            let parent = self
                .parents
                .get(&current.0)
                .and_then(|parents| parents.iter().find(|parent| !visited.contains(*parent)))
                .cloned();
            let Some(parent) = parent else {
                break;
            };
            visited.insert(parent.clone());
            let error = ErrorInfo::from_children(&parent, [&current.1]);
            current = (parent, error);
        }
        current
    }

    // ------------------------------------------------------------------------
    // Stalls and cycles
    // ------------------------------------------------------------------------

    /// Nothing is running or runnable but nodes are unfinished. Look for
    /// cycles among the pending edges and fail their members.
    fn resolve_stall(&mut self) -> bool {
        let graph = Arc::clone(&self.graph);
        let evaluation = self.evaluation;
        let owned = &self.owned;
        let pending_deps = |key: &Key| -> Vec<Key> {
            if let Some(pending) = owned.get(key) {
                return pending.outstanding.iter().cloned().collect();
            }
            match graph.get_node(key) {
                Some(node) if node.state() == NodeState::InFlight => node
                    .temporary_deps()
                    .into_iter()
                    .filter(|dep| graph.lookup_done(dep, evaluation).is_none())
                    .collect(),
                _ => Vec::new(),
            }
        };
        let start: Vec<Key> = self.roots.iter().chain(owned.keys()).cloned().collect();
        let cycles = find_cycles(&start, &pending_deps);

        if cycles.is_empty() {
            debug!(pending = self.owned.len(), foreign = self.foreign.len(), "stalled without a cycle");
            return false;
        }

        let mut resolved = false;
        for cycle in cycles {
            for (i, member) in cycle.iter().enumerate() {
                if !self.owned.contains_key(member) {
                    continue;
                }
                let mut rotated = cycle.clone();
                rotated.rotate_left(i);
                debug!(key = %member, len = cycle.len(), "node is part of a dependency cycle");
                self.finish_error(member, ErrorInfo::from_cycle(CycleInfo::new(rotated)));
                resolved = true;
            }
        }
        resolved
    }

    // ------------------------------------------------------------------------
    // Result
    // ------------------------------------------------------------------------

    fn abandon_all(&mut self) {
        for key in self.owned.keys() {
            if let Some(node) = self.graph.get_node(key) {
                node.abandon(self.evaluation);
            }
        }
        self.owned.clear();
    }

    fn finish(mut self) -> EvalResult<EvaluationResult> {
        let interrupted = self.options.interrupt.is_interrupted();
        self.abandon_all();
        self.release_rewinds();

        if interrupted {
            info!("evaluation interrupted");
            return Err(EvaluationError::Interrupted);
        }

        let mut result = EvaluationResult::default();
        for root in &self.roots {
            match self.graph.lookup_done(root, self.evaluation) {
                Some(DoneSnapshot {
                    output: NodeOutput::Value(value),
                    ..
                }) => {
                    result.values.insert(root.clone(), value);
                }
                Some(DoneSnapshot {
                    output: NodeOutput::Error(error),
                    ..
                }) => {
                    result.errors.insert(root.clone(), error);
                }
                None => {}
            }
        }
        if let Some((key, error)) = self.bubbled.take() {
            result.errors.entry(key).or_insert(error);
        }
        result.stats = self.stats;
        result.rewinds = std::mem::take(&mut self.rewinds);

        info!(
            values = result.values.len(),
            errors = result.errors.len(),
            functions = self.stats.functions_invoked,
            restarts = self.stats.restarts,
            verified_clean = self.stats.verified_clean,
            "evaluation finished"
        );
        Ok(result)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
