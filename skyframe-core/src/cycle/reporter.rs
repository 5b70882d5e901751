//! Human-readable cycle reports.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use super::CycleInfo;
use crate::key::{FunctionName, Key};

/// Renders keys of one function name for cycle reports.
pub trait KeyDescriber: Send + Sync {
    /// A short description of `key`, e.g. a target label.
    fn describe(&self, key: &Key) -> String;
}

impl<F> KeyDescriber for F
where
    F: Fn(&Key) -> String + Send + Sync,
{
    fn describe(&self, key: &Key) -> String {
        self(key)
    }
}

/// Formats [`CycleInfo`] records.
///
/// Keys without a registered describer print in their `Display` form.
///
/// ```text
/// cycle in dependency graph:
///     //app:bin
/// .-> //lib:a
/// |   //lib:b
/// `-- //lib:a
/// ```
#[derive(Default, Clone)]
pub struct CycleReporter {
    describers: HashMap<FunctionName, Arc<dyn KeyDescriber>>,
}

impl CycleReporter {
    /// A reporter with no describers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `describer` for every key of `function`.
    pub fn with_describer(
        mut self,
        function: FunctionName,
        describer: impl KeyDescriber + 'static,
    ) -> Self {
        self.describers.insert(function, Arc::new(describer));
        self
    }

    /// Describe one key.
    pub fn describe(&self, key: &Key) -> String {
        match self.describers.get(&key.function_name()) {
            Some(describer) => describer.describe(key),
            None => key.to_string(),
        }
    }

    /// Render one cycle.
    pub fn report(&self, info: &CycleInfo) -> String {
        let mut out = String::from("cycle in dependency graph:\n");
        for key in info.path_to_cycle() {
            let _ = writeln!(out, "    {}", self.describe(key));
        }
        let cycle = info.cycle();
        for (i, key) in cycle.iter().enumerate() {
            let prefix = if i == 0 { ".-> " } else { "|   " };
            let _ = writeln!(out, "{prefix}{}", self.describe(key));
        }
        if let Some(first) = cycle.first() {
            let _ = writeln!(out, "`-- {}", self.describe(first));
        }
        out
    }

    /// Render every cycle, separated by blank lines.
    pub fn report_all<'a>(&self, cycles: impl IntoIterator<Item = &'a CycleInfo>) -> String {
        cycles
            .into_iter()
            .map(|info| self.report(info))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
