//! Cycle finder over pending dependency edges.

use std::collections::{HashMap, HashSet, VecDeque};

use super::info::same_rotation;
use crate::key::Key;

/// The unfinished part of the dependency graph: for each node still waiting,
/// the dependencies it is waiting on.
pub trait PendingGraph {
    /// Dependencies of `key` that are requested but not finished.
    fn pending_deps(&self, key: &Key) -> Vec<Key>;
}

impl<F> PendingGraph for F
where
    F: Fn(&Key) -> Vec<Key>,
{
    fn pending_deps(&self, key: &Key) -> Vec<Key> {
        self(key)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Finished,
}

struct Frame {
    key: Key,
    deps: Vec<Key>,
    next: usize,
}

/// Find the cycles reachable from `roots` along pending edges.
///
/// Each distinct cycle is returned once, starting at the member the search
/// reached first. Self-cycles come back as single-member cycles. Every node
/// that lies on some cycle is a member of at least one returned cycle.
pub fn find_cycles<G>(roots: &[Key], graph: &G) -> Vec<Vec<Key>>
where
    G: PendingGraph + ?Sized,
{
    let mut marks: HashMap<Key, Mark> = HashMap::new();
    let mut edges: HashMap<Key, Vec<Key>> = HashMap::new();
    let mut order: Vec<Key> = Vec::new();
    let mut cycles: Vec<Vec<Key>> = Vec::new();

    for root in roots {
        if marks.contains_key(root) {
            continue;
        }
        marks.insert(root.clone(), Mark::OnStack);
        order.push(root.clone());
        let deps = graph.pending_deps(root);
        edges.insert(root.clone(), deps.clone());
        let mut stack = vec![Frame {
            key: root.clone(),
            deps,
            next: 0,
        }];

        // Iterative DFS; dependency chains can be deeper than the call stack.
        while let Some(frame) = stack.last_mut() {
            if frame.next == frame.deps.len() {
                let key = frame.key.clone();
                stack.pop();
                marks.insert(key, Mark::Finished);
                continue;
            }
            let child = frame.deps[frame.next].clone();
            frame.next += 1;

            match marks.get(&child).copied() {
                Some(Mark::Finished) => {}
                Some(Mark::OnStack) => {
                    let start = stack
                        .iter()
                        .position(|frame| frame.key == child)
                        .unwrap_or(0);
                    let cycle: Vec<Key> = stack[start..].iter().map(|frame| frame.key.clone()).collect();
                    push_cycle(&mut cycles, cycle);
                }
                None => {
                    marks.insert(child.clone(), Mark::OnStack);
                    order.push(child.clone());
                    let deps = graph.pending_deps(&child);
                    edges.insert(child.clone(), deps.clone());
                    stack.push(Frame {
                        key: child,
                        deps,
                        next: 0,
                    });
                }
            }
        }
    }

    // Back edges into a finished part of a component are not seen above.
    let covered: HashSet<Key> = cycles.iter().flatten().cloned().collect();
    if covered.len() < order.len() {
        let mut covered = covered;
        for component in strongly_connected(&order, &edges) {
            let members: HashSet<Key> = component.iter().cloned().collect();
            for key in &component {
                if covered.contains(key) {
                    continue;
                }
                if let Some(cycle) = cycle_through(key, &members, &edges) {
                    covered.extend(cycle.iter().cloned());
                    push_cycle(&mut cycles, cycle);
                }
            }
        }
    }

    cycles
}

fn push_cycle(cycles: &mut Vec<Vec<Key>>, cycle: Vec<Key>) {
    if !cycles.iter().any(|found| same_rotation(found, &cycle)) {
        tracing::debug!(len = cycle.len(), first = %cycle[0], "found dependency cycle");
        cycles.push(cycle);
    }
}

struct Link {
    index: usize,
    low: usize,
}

/// Tarjan's algorithm over `edges`, keeping components with more than one
/// member. Members are listed in `order`.
fn strongly_connected(order: &[Key], edges: &HashMap<Key, Vec<Key>>) -> Vec<Vec<Key>> {
    let mut links: HashMap<Key, Link> = HashMap::new();
    let mut on_stack: HashSet<Key> = HashSet::new();
    let mut stack: Vec<Key> = Vec::new();
    let mut components: Vec<Vec<Key>> = Vec::new();

    for start in order {
        if links.contains_key(start) {
            continue;
        }
        let mut work: Vec<(Key, usize)> = Vec::new();
        let index = links.len();
        links.insert(start.clone(), Link { index, low: index });
        stack.push(start.clone());
        on_stack.insert(start.clone());
        work.push((start.clone(), 0));

        while let Some((key, next)) = work.pop() {
            let deps = edges.get(&key).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(dep) = deps.get(next) {
                work.push((key.clone(), next + 1));
                match links.get(dep).map(|link| link.index) {
                    None => {
                        let index = links.len();
                        links.insert(dep.clone(), Link { index, low: index });
                        stack.push(dep.clone());
                        on_stack.insert(dep.clone());
                        work.push((dep.clone(), 0));
                    }
                    Some(dep_index) if on_stack.contains(dep) => {
                        if let Some(link) = links.get_mut(&key) {
                            link.low = link.low.min(dep_index);
                        }
                    }
                    Some(_) => {}
                }
                continue;
            }

            let Some(&Link { index, low }) = links.get(&key) else {
                continue;
            };
            if let Some((parent, _)) = work.last() {
                if let Some(link) = links.get_mut(parent) {
                    link.low = link.low.min(low);
                }
            }
            if low == index {
                let mut component = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack.remove(&member);
                    let done = member == key;
                    component.push(member);
                    if done {
                        break;
                    }
                }
                if component.len() > 1 {
                    let members: HashSet<Key> = component.into_iter().collect();
                    components.push(order.iter().filter(|key| members.contains(*key)).cloned().collect());
                }
            }
        }
    }

    components
}

/// Shortest cycle from `start` back to itself inside `members`.
fn cycle_through(start: &Key, members: &HashSet<Key>, edges: &HashMap<Key, Vec<Key>>) -> Option<Vec<Key>> {
    let mut previous: HashMap<Key, Key> = HashMap::new();
    let mut queue: VecDeque<Key> = VecDeque::from([start.clone()]);

    while let Some(key) = queue.pop_front() {
        for dep in edges.get(&key).into_iter().flatten() {
            if dep == start {
                let mut cycle = vec![key.clone()];
                let mut at = &key;
                while let Some(prev) = previous.get(at) {
                    cycle.push(prev.clone());
                    at = prev;
                }
                cycle.reverse();
                return Some(cycle);
            }
            if members.contains(dep) && !previous.contains_key(dep) {
                previous.insert(dep.clone(), key.clone());
                queue.push_back(dep.clone());
            }
        }
    }
    None
}
