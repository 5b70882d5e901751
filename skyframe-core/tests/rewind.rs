//! Integration Tests for Lost-Input Rewinding
//!
//! A tiny build: RULE nodes declare actions, ACTION nodes execute them into a
//! fake output tree and ARTIFACT nodes stand for the files. SOURCE nodes read
//! source contents, which flow into every value built from them. Deleting
//! outputs from the tree behind the engine's back simulates a remote cache
//! eviction.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use skyframe_core::action::{Action, ActionGraph, ActionId, Artifact};
use skyframe_core::evaluator::Evaluator;
use skyframe_core::function::{FunctionError, FunctionRegistry, FunctionRegistryBuilder, Outcome};
use skyframe_core::graph::NodeState;
use skyframe_core::key::{FunctionName, Key, Value};

const SOURCE: FunctionName = FunctionName::new("SOURCE");
const RULE: FunctionName = FunctionName::new("RULE");
const ARTIFACT: FunctionName = FunctionName::new("ARTIFACT");
const ACTION: FunctionName = FunctionName::new("ACTION_EXECUTION");

/// Maps artifacts and actions onto the functions above.
#[derive(Default)]
struct BuildActions {
    resets: Mutex<Vec<ActionId>>,
}

impl ActionGraph for BuildActions {
    fn artifact_key(&self, artifact: &Artifact) -> Key {
        Key::new(ARTIFACT, artifact.clone())
    }

    fn action_key(&self, action: &ActionId) -> Key {
        Key::new(ACTION, action.clone())
    }

    fn reset_action(&self, action: &ActionId) {
        self.resets.lock().push(action.clone());
    }
}

/// Sources, output tree and per-mnemonic execution counts.
#[derive(Default)]
struct Build {
    rules: HashMap<String, Vec<Action>>,
    sources: Mutex<HashMap<String, i64>>,
    outputs: Mutex<HashSet<String>>,
    runs: Mutex<HashMap<String, usize>>,
}

impl Build {
    fn write_source(&self, path: &str, contents: i64) {
        self.sources.lock().insert(path.to_string(), contents);
    }

    fn runs(&self, mnemonic: &str) -> usize {
        self.runs.lock().get(mnemonic).copied().unwrap_or(0)
    }

    fn delete(&self, path: &str) {
        self.outputs.lock().remove(path);
    }
}

fn source_key(path: &str) -> Key {
    Key::new(SOURCE, path.to_string())
}

fn rule(name: &str) -> Key {
    Key::new(RULE, name.to_string())
}

fn action_key(owner: &str, index: usize) -> Key {
    Key::new(ACTION, ActionId::new(rule(owner), index))
}

fn artifact_key(artifact: &Artifact) -> Key {
    Key::new(ARTIFACT, artifact.clone())
}

/// ACTION values name the mnemonic and the values of the inputs, e.g.
/// `Compile(app.c=0)`; a derived ARTIFACT has the value of its producer.
fn build_registry(build: &Arc<Build>) -> FunctionRegistryBuilder {
    let for_source = Arc::clone(build);
    let for_rule = Arc::clone(build);
    let for_action = Arc::clone(build);

    FunctionRegistry::builder()
        .register_fn(SOURCE, move |key, _env| {
            let path = key.argument::<String>().cloned().unwrap_or_default();
            Ok(Outcome::done(for_source.sources.lock().get(&path).copied().unwrap_or(0)))
        })
        .register_fn(RULE, move |key, _env| {
            let name = key.argument::<String>().cloned().unwrap_or_default();
            let actions = for_rule.rules.get(&name).cloned().unwrap_or_default();
            Ok(Outcome::Done(Value::with_actions(name, actions)))
        })
        .register_fn(ARTIFACT, |key, env| {
            let Some(artifact) = key.argument::<Artifact>() else {
                return Err(FunctionError::persistent("not an artifact"));
            };
            let path = artifact.exec_path().to_string();
            match artifact.generating_action() {
                Some(producer) => match env.get_as::<String>(&Key::new(ACTION, producer.clone())) {
                    Some(output) => Ok(Outcome::done(output)),
                    None => Ok(env.restart()),
                },
                None => match env.get_as::<i64>(&source_key(&path)) {
                    Some(contents) => Ok(Outcome::done(format!("{path}={contents}"))),
                    None => Ok(env.restart()),
                },
            }
        })
        .register_fn(ACTION, move |key, env| {
            let Some(id) = key.argument::<ActionId>().cloned() else {
                return Err(FunctionError::persistent("not an action"));
            };
            let Some(owner) = env.get_value(id.owner()) else {
                return Ok(env.restart());
            };
            let Some(action) = owner.actions().get(id.index()).cloned() else {
                return Err(FunctionError::persistent(format!("{id} does not exist")));
            };
            let inputs: Vec<Key> = action.inputs().iter().map(artifact_key).collect();
            let values = env.get_values(&inputs);
            if env.values_missing() {
                return Ok(env.restart());
            }
            let read: Vec<String> = values
                .iter()
                .flatten()
                .filter_map(|value| value.downcast_ref::<String>().cloned())
                .collect();

            let lost: Vec<Artifact> = {
                let outputs = for_action.outputs.lock();
                action
                    .inputs()
                    .iter()
                    .filter(|input| !input.is_source() && !outputs.contains(input.exec_path()))
                    .cloned()
                    .collect()
            };
            if !lost.is_empty() {
                return Ok(Outcome::LostInputs(lost));
            }

            *for_action
                .runs
                .lock()
                .entry(action.mnemonic().to_string())
                .or_insert(0) += 1;
            let mut outputs = for_action.outputs.lock();
            for output in action.outputs() {
                outputs.insert(output.exec_path().to_string());
            }
            Ok(Outcome::done(format!("{}({})", action.mnemonic(), read.join(","))))
        })
}

fn rewinding_evaluator(build: &Arc<Build>, actions: Arc<BuildActions>) -> Evaluator {
    Evaluator::builder(build_registry(build).build())
        .action_graph(actions)
        .build()
        .unwrap()
}

/// `app`: Compile produces out/app.o, Link consumes it.
fn compile_and_link() -> (Build, Artifact) {
    let object = Artifact::derived("out/app.o", ActionId::new(rule("app"), 0));
    let compile = Action::new("Compile")
        .with_inputs([Artifact::source("app.c")])
        .with_outputs([object.clone()]);
    let link = Action::new("Link")
        .with_inputs([object.clone()])
        .with_outputs([Artifact::derived("out/app", ActionId::new(rule("app"), 1))]);

    let mut build = Build::default();
    build.rules.insert("app".to_string(), vec![compile, link]);
    (build, object)
}

#[test]
fn lost_input_is_regenerated_within_the_evaluation() {
    let (build, object) = compile_and_link();
    let build = Arc::new(build);
    let actions = Arc::new(BuildActions::default());
    let ev = rewinding_evaluator(&build, Arc::clone(&actions));
    let link = action_key("app", 1);

    let result = ev.evaluate(&[link.clone()], ev.default_options()).unwrap();
    assert_eq!(
        result.get_as::<String>(&link).map(String::as_str),
        Some("Link(Compile(app.c=0))")
    );
    assert!(result.rewinds().is_empty());

    // The object file disappears and Link runs again.
    build.delete("out/app.o");
    ev.invalidate_changed(&[link.clone()]);
    let result = ev.evaluate(&[link.clone()], ev.default_options()).unwrap();

    assert_eq!(
        result.get_as::<String>(&link).map(String::as_str),
        Some("Link(Compile(app.c=0))")
    );
    assert_eq!(build.runs("Compile"), 2);
    assert_eq!(build.runs("Link"), 2);
    assert_eq!(result.stats().rewinds, 1);

    let plan = &result.rewinds()[0];
    assert_eq!(plan.failed(), &link);
    let restarted: Vec<Key> = plan.nodes_to_restart().iter().cloned().collect();
    assert_eq!(
        restarted,
        vec![link.clone(), artifact_key(&object), action_key("app", 0)]
    );
    assert!(!plan.is_partial());
    assert_eq!(*actions.resets.lock(), vec![ActionId::new(rule("app"), 0)]);
}

#[test]
fn insensitive_producers_rewind_their_inputs_too() {
    let classes = Artifact::derived("out/classes.jar", ActionId::new(rule("apk"), 0));
    let package = Artifact::derived("out/app.apk", ActionId::new(rule("apk"), 1));
    let javac = Action::new("Javac")
        .with_inputs([Artifact::source("Main.java")])
        .with_outputs([classes.clone()]);
    let zip = Action::new("Zip")
        .with_inputs([classes.clone(), Artifact::source("res/icon.png")])
        .with_outputs([package.clone()])
        .propagating_inputs_insensitively();
    let deploy = Action::new("Deploy").with_inputs([package.clone()]);

    let mut build = Build::default();
    build.rules.insert("apk".to_string(), vec![javac, zip, deploy]);
    let build = Arc::new(build);
    let ev = rewinding_evaluator(&build, Arc::new(BuildActions::default()));
    let deploy = action_key("apk", 2);

    ev.evaluate(&[deploy.clone()], ev.default_options()).unwrap();

    build.delete("out/app.apk");
    build.delete("out/classes.jar");
    ev.invalidate_changed(&[deploy.clone()]);
    let result = ev.evaluate(&[deploy.clone()], ev.default_options()).unwrap();

    assert!(result.get(&deploy).is_some());
    assert_eq!(build.runs("Javac"), 2);
    assert_eq!(build.runs("Zip"), 2);
    assert_eq!(build.runs("Deploy"), 2);

    let plan = &result.rewinds()[0];
    assert_eq!(plan.nodes_to_restart().len(), 5);
    assert!(plan.nodes_to_restart().contains(&artifact_key(&classes)));
    assert!(plan.nodes_to_restart().contains(&action_key("apk", 0)));
    assert_eq!(plan.actions_to_reset().len(), 2);
}

/// A rewind that resets nodes and then stops before rebuilding them must not
/// hide later source edits from the nodes that consumed the old outputs.
#[test]
fn unfinished_rewind_does_not_leave_dependents_stale() {
    const SHIPS: FunctionName = FunctionName::new("SHIPS");
    const GIVES_UP: FunctionName = FunctionName::new("GIVES_UP");
    let generated = Artifact::derived("out/x", ActionId::new(rule("gen"), 0));
    let generate = Action::new("Generate")
        .with_inputs([Artifact::source("s.txt")])
        .with_outputs([generated.clone()]);

    let mut build = Build::default();
    build.rules.insert("gen".to_string(), vec![generate]);
    build.write_source("s.txt", 1);
    let build = Arc::new(build);

    let rewound = Arc::new(AtomicBool::new(false));
    let (for_ships, for_gives_up) = (generated.clone(), generated.clone());
    let (tree, flag) = (Arc::clone(&build), Arc::clone(&rewound));
    let registry = build_registry(&build)
        .register_fn(SHIPS, move |_key, env| {
            let Some(output) = env.get_as::<String>(&artifact_key(&for_ships)) else {
                return Ok(env.restart());
            };
            Ok(Outcome::done(output))
        })
        .register_fn(GIVES_UP, move |_key, env| {
            if flag.load(Ordering::SeqCst) {
                return Err(FunctionError::persistent("gave up after rewinding"));
            }
            env.get_value(&artifact_key(&for_gives_up));
            if env.values_missing() {
                return Ok(env.restart());
            }
            if !tree.outputs.lock().contains(for_gives_up.exec_path()) {
                flag.store(true, Ordering::SeqCst);
                return Ok(Outcome::LostInputs(vec![for_gives_up.clone()]));
            }
            Ok(Outcome::done(()))
        })
        .build();
    let ev = Evaluator::builder(registry)
        .action_graph(Arc::new(BuildActions::default()))
        .build()
        .unwrap();
    let ships = Key::new(SHIPS, ());
    let gives_up = Key::new(GIVES_UP, ());
    let state = |key: &Key| ev.graph().get_node(key).map(|node| node.state());

    let result = ev
        .evaluate(&[ships.clone(), gives_up.clone()], ev.default_options())
        .unwrap();
    assert_eq!(
        result.get_as::<String>(&ships).map(String::as_str),
        Some("Generate(s.txt=1)")
    );

    // The rewind resets the producer, then the consumer fails before it is
    // rebuilt and fail-fast ends the evaluation.
    build.delete("out/x");
    ev.invalidate_changed(&[gives_up.clone()]);
    let result = ev.evaluate(&[gives_up.clone()], ev.default_options()).unwrap();
    assert!(result.error(&gives_up).is_some());
    assert_eq!(result.stats().rewinds, 1);
    assert_eq!(state(&action_key("gen", 0)), Some(NodeState::Changed));
    assert_eq!(state(&ships), Some(NodeState::Dirty));

    build.write_source("s.txt", 2);
    ev.invalidate_changed(&[source_key("s.txt")]);
    let result = ev.evaluate(&[ships.clone()], ev.default_options()).unwrap();
    assert_eq!(
        result.get_as::<String>(&ships).map(String::as_str),
        Some("Generate(s.txt=2)")
    );
    assert_eq!(build.runs("Generate"), 2);
}

#[test]
fn lost_source_file_fails_the_node() {
    const LOSES_SOURCE: FunctionName = FunctionName::new("LOSES_SOURCE");
    let build = Arc::new(Build::default());
    let registry = build_registry(&build)
        .register_fn(LOSES_SOURCE, |_key, env| {
            let source = Artifact::source("BUILD");
            env.get_value(&artifact_key(&source));
            if env.values_missing() {
                return Ok(env.restart());
            }
            Ok(Outcome::LostInputs(vec![source]))
        })
        .build();
    let ev = Evaluator::builder(registry)
        .action_graph(Arc::new(BuildActions::default()))
        .build()
        .unwrap();
    let key = Key::new(LOSES_SOURCE, ());

    let result = ev.evaluate(&[key.clone()], ev.default_options()).unwrap();
    let message = result.error(&key).unwrap().to_string();
    assert!(message.contains("cannot recover lost inputs"), "{message}");
    assert!(result.rewinds().is_empty());
}

#[test]
fn lost_inputs_without_an_action_graph_are_an_error() {
    let (build, _) = compile_and_link();
    let build = Arc::new(build);
    let ev = Evaluator::new(build_registry(&build).build()).unwrap();
    let link = action_key("app", 1);

    ev.evaluate(&[link.clone()], ev.default_options()).unwrap();
    build.delete("out/app.o");
    ev.invalidate_changed(&[link.clone()]);

    let result = ev.evaluate(&[link.clone()], ev.default_options()).unwrap();
    let message = result.error(&link).unwrap().to_string();
    assert!(message.contains("rewinding is disabled"), "{message}");
    assert_eq!(build.runs("Compile"), 1);
}
