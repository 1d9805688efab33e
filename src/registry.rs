//! Step definition registry
//!
//! Built once per wizard and read-only afterwards. Lookups are by name;
//! iteration follows the declared (or explicitly configured) order.

pub mod definition;

pub use definition::{
    GuardArgs, HookArgs, NextSpec, NextTargets, Policy, RetryPolicy, StepDefinition,
};

use crate::error::{WizardError, WizardResult};
use crate::state_machine::{Context, StepData, StepName};
use std::collections::{HashMap, HashSet};

/// Immutable map from step name to definition
#[derive(Debug)]
pub struct StepRegistry {
    steps: HashMap<StepName, StepDefinition>,
    order: Vec<StepName>,
}

impl StepRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> WizardResult<&StepDefinition> {
        self.steps
            .get(name)
            .ok_or_else(|| WizardError::UnknownStep(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Step names in order
    pub fn order(&self) -> &[StepName] {
        &self.order
    }

    pub fn first(&self) -> &str {
        // Non-empty by construction
        self.order.first().map_or("", String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|s| s == name)
    }

    pub fn step_after(&self, name: &str) -> Option<&str> {
        let index = self.position(name)?;
        self.order.get(index + 1).map(String::as_str)
    }

    /// All other steps, starting with the one after `from` and wrapping around.
    /// On the last step the first candidate is the first step.
    fn others_from(&self, from: &str) -> Vec<StepName> {
        let start = self.position(from).map_or(0, |i| i + 1);
        let len = self.order.len();
        (0..len)
            .map(|offset| &self.order[(start + offset) % len])
            .filter(|name| name.as_str() != from)
            .cloned()
            .collect()
    }

    /// Candidate successors of `from`, most preferred first.
    ///
    /// `next()` takes the first candidate; helpers use the whole set for
    /// reachability. Names produced by a dynamic `next` must be registered.
    pub fn resolve_next(
        &self,
        from: &str,
        context: &Context,
        data: &StepData,
    ) -> WizardResult<Vec<StepName>> {
        let definition = self.get(from)?;
        let candidates = match definition.next_spec() {
            NextSpec::Sequential => self
                .step_after(from)
                .map(|s| vec![s.to_string()])
                .unwrap_or_default(),
            NextSpec::Steps(steps) => steps.clone(),
            NextSpec::Any => self.others_from(from),
            NextSpec::Dynamic(f) => match f(context, data) {
                NextTargets::Steps(steps) => steps,
                NextTargets::Any => self.others_from(from),
            },
        };

        if let Some(unknown) = candidates.iter().find(|s| !self.contains(s)) {
            return Err(WizardError::UnknownStep(unknown.clone()));
        }
        Ok(candidates)
    }
}

/// Builder for [`StepRegistry`]
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    steps: Vec<(StepName, StepDefinition)>,
    order: Option<Vec<StepName>>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn step(mut self, name: impl Into<StepName>, definition: StepDefinition) -> Self {
        self.steps.push((name.into(), definition));
        self
    }

    /// Explicit step order. Steps left out are appended in declaration order.
    #[must_use]
    pub fn order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepName>,
    {
        self.order = Some(order.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> WizardResult<StepRegistry> {
        if self.steps.is_empty() {
            return Err(WizardError::InvalidRegistry(
                "at least one step is required".to_string(),
            ));
        }

        let mut declared = Vec::with_capacity(self.steps.len());
        let mut steps = HashMap::with_capacity(self.steps.len());
        for (name, definition) in self.steps {
            if steps.contains_key(&name) {
                return Err(WizardError::InvalidRegistry(format!(
                    "duplicate step '{name}'"
                )));
            }
            declared.push(name.clone());
            steps.insert(name, definition);
        }

        for (name, definition) in &steps {
            if let NextSpec::Steps(targets) = definition.next_spec() {
                if let Some(missing) = targets.iter().find(|t| !steps.contains_key(*t)) {
                    return Err(WizardError::InvalidRegistry(format!(
                        "step '{name}' lists unknown next step '{missing}'"
                    )));
                }
            }
        }

        let order = match self.order {
            None => declared,
            Some(explicit) => {
                let mut seen = HashSet::new();
                for name in &explicit {
                    if !steps.contains_key(name) {
                        return Err(WizardError::InvalidRegistry(format!(
                            "order lists unknown step '{name}'"
                        )));
                    }
                    if !seen.insert(name.clone()) {
                        return Err(WizardError::InvalidRegistry(format!(
                            "order lists step '{name}' twice"
                        )));
                    }
                }
                let rest: Vec<StepName> = declared
                    .into_iter()
                    .filter(|name| !seen.contains(name))
                    .collect();
                explicit.into_iter().chain(rest).collect()
            }
        };

        Ok(StepRegistry { steps, order })
    }
}
