//! Step definitions
//!
//! A step is a bundle of optional caller-supplied behavior. Async callbacks are
//! stored boxed so that steps with different closure types fit in one registry.

use crate::error::ErrorValue;
use crate::runtime::HookHandle;
use crate::state_machine::{Context, StepData, StepMeta, StepName};
use futures::future::{self, BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub type ValidateFn =
    Arc<dyn Fn(StepData, Context) -> BoxFuture<'static, Result<(), ErrorValue>> + Send + Sync>;
pub type GuardFn = Arc<dyn Fn(GuardArgs) -> BoxFuture<'static, bool> + Send + Sync>;
pub type HookFn = Arc<
    dyn Fn(HookArgs) -> BoxFuture<'static, Result<Option<StepData>, ErrorValue>> + Send + Sync,
>;
pub type NextFn = Arc<dyn Fn(&Context, &StepData) -> NextTargets + Send + Sync>;
pub type CompleteFn = Arc<dyn Fn(Option<&StepData>, &Context) -> bool + Send + Sync>;
pub type DataFn = Arc<dyn Fn(&Context, Option<&StepData>) -> StepData + Send + Sync>;

// ============================================================================
// Callback Arguments
// ============================================================================

/// Arguments passed to `can_enter` / `can_exit` guards
#[derive(Debug, Clone)]
pub struct GuardArgs {
    pub from: StepName,
    pub to: StepName,
    pub context: Context,
    /// For exit guards the data just committed for `from`; for enter guards
    /// whatever `to` currently holds
    pub data: Option<StepData>,
}

/// Arguments passed to `before_enter` / `before_exit` hooks
#[derive(Debug, Clone)]
pub struct HookArgs {
    /// Step that owns the hook
    pub step: StepName,
    pub from: StepName,
    pub to: StepName,
    /// Context as of the moment the hook was invoked
    pub context: Context,
    pub data: Option<StepData>,
    /// Context updates and event emission
    pub handle: HookHandle,
}

// ============================================================================
// Next Resolution
// ============================================================================

/// Candidate targets produced by a dynamic `next`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextTargets {
    Steps(Vec<StepName>),
    /// Every other step is reachable
    Any,
}

impl NextTargets {
    pub fn one(step: impl Into<StepName>) -> Self {
        NextTargets::Steps(vec![step.into()])
    }

    pub fn none() -> Self {
        NextTargets::Steps(Vec::new())
    }
}

/// How a step names its successors
#[derive(Clone, Default)]
pub enum NextSpec {
    /// The following step in registry order
    #[default]
    Sequential,
    Steps(Vec<StepName>),
    Any,
    Dynamic(NextFn),
}

impl fmt::Debug for NextSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextSpec::Sequential => f.write_str("Sequential"),
            NextSpec::Steps(steps) => f.debug_tuple("Steps").field(steps).finish(),
            NextSpec::Any => f.write_str("Any"),
            NextSpec::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

// ============================================================================
// Policies
// ============================================================================

/// A policy value, fixed or computed from the context
#[derive(Clone)]
pub enum Policy<T> {
    Fixed(T),
    Computed(Arc<dyn Fn(&Context) -> T + Send + Sync>),
}

impl<T: Copy> Policy<T> {
    pub fn resolve(&self, context: &Context) -> T {
        match self {
            Policy::Fixed(value) => *value,
            Policy::Computed(f) => f(context),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Policy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Fixed(value) => f.debug_tuple("Fixed").field(value).finish(),
            Policy::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Retry settings for failing validation and hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_retries > 0
    }
}

#[derive(Clone)]
enum DataInit {
    Value(StepData),
    Computed(DataFn),
}

// ============================================================================
// Step Definition
// ============================================================================

/// Immutable description of one step
#[derive(Clone)]
pub struct StepDefinition {
    data: Option<DataInit>,
    validate: Option<ValidateFn>,
    next: NextSpec,
    can_enter: Option<GuardFn>,
    can_exit: Option<GuardFn>,
    before_enter: Option<HookFn>,
    before_exit: Option<HookFn>,
    complete: Option<CompleteFn>,
    weight: Policy<f64>,
    required: Policy<bool>,
    retry: Policy<RetryPolicy>,
    meta: Option<StepMeta>,
}

impl Default for StepDefinition {
    fn default() -> Self {
        Self {
            data: None,
            validate: None,
            next: NextSpec::default(),
            can_enter: None,
            can_exit: None,
            before_enter: None,
            before_exit: None,
            complete: None,
            weight: Policy::Fixed(1.0),
            required: Policy::Fixed(true),
            retry: Policy::Fixed(RetryPolicy::default()),
            meta: None,
        }
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("next", &self.next)
            .field("has_default_data", &self.data.is_some())
            .field("validate", &self.validate.is_some())
            .field("can_enter", &self.can_enter.is_some())
            .field("can_exit", &self.can_exit.is_some())
            .field("before_enter", &self.before_enter.is_some())
            .field("before_exit", &self.before_exit.is_some())
            .field("weight", &self.weight)
            .field("required", &self.required)
            .field("retry", &self.retry)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

#[allow(clippy::return_self_not_must_use)] // Builder methods
impl StepDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- data ----

    /// Default data, used until the step has committed data of its own
    pub fn data(mut self, data: StepData) -> Self {
        self.data = Some(DataInit::Value(data));
        self
    }

    /// Default data computed from the context and any data already present
    pub fn data_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, Option<&StepData>) -> StepData + Send + Sync + 'static,
    {
        self.data = Some(DataInit::Computed(Arc::new(f)));
        self
    }

    // ---- validation ----

    pub fn validate<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(StepData, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ErrorValue>> + Send + 'static,
    {
        self.validate = Some(Arc::new(move |data, context| f(data, context).boxed()));
        self
    }

    pub fn validate_sync<F>(mut self, f: F) -> Self
    where
        F: Fn(&StepData, &Context) -> Result<(), ErrorValue> + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(move |data, context| {
            future::ready(f(&data, &context)).boxed()
        }));
        self
    }

    // ---- next ----

    pub fn next<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepName>,
    {
        self.next = NextSpec::Steps(steps.into_iter().map(Into::into).collect());
        self
    }

    pub fn next_any(mut self) -> Self {
        self.next = NextSpec::Any;
        self
    }

    pub fn next_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, &StepData) -> NextTargets + Send + Sync + 'static,
    {
        self.next = NextSpec::Dynamic(Arc::new(f));
        self
    }

    // ---- guards ----

    pub fn can_enter<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(GuardArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.can_enter = Some(Arc::new(move |args| f(args).boxed()));
        self
    }

    pub fn can_enter_sync<F>(mut self, f: F) -> Self
    where
        F: Fn(&GuardArgs) -> bool + Send + Sync + 'static,
    {
        self.can_enter = Some(Arc::new(move |args| future::ready(f(&args)).boxed()));
        self
    }

    pub fn can_exit<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(GuardArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.can_exit = Some(Arc::new(move |args| f(args).boxed()));
        self
    }

    pub fn can_exit_sync<F>(mut self, f: F) -> Self
    where
        F: Fn(&GuardArgs) -> bool + Send + Sync + 'static,
    {
        self.can_exit = Some(Arc::new(move |args| future::ready(f(&args)).boxed()));
        self
    }

    // ---- hooks ----

    /// Runs after the step becomes active. A returned value is merged into the
    /// step's data.
    pub fn before_enter<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<StepData>, ErrorValue>> + Send + 'static,
    {
        self.before_enter = Some(Arc::new(move |args| f(args).boxed()));
        self
    }

    /// Runs before leaving the step. The returned value is ignored.
    pub fn before_exit<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<StepData>, ErrorValue>> + Send + 'static,
    {
        self.before_exit = Some(Arc::new(move |args| f(args).boxed()));
        self
    }

    // ---- progress ----

    pub fn complete<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&StepData>, &Context) -> bool + Send + Sync + 'static,
    {
        self.complete = Some(Arc::new(f));
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = Policy::Fixed(weight);
        self
    }

    pub fn weight_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context) -> f64 + Send + Sync + 'static,
    {
        self.weight = Policy::Computed(Arc::new(f));
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Policy::Fixed(required);
        self
    }

    pub fn required_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.required = Policy::Computed(Arc::new(f));
        self
    }

    // ---- retries ----

    pub fn retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.retry = Policy::Fixed(RetryPolicy::new(max_retries, delay));
        self
    }

    pub fn retries_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context) -> RetryPolicy + Send + Sync + 'static,
    {
        self.retry = Policy::Computed(Arc::new(f));
        self
    }

    pub fn meta(mut self, meta: StepMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    // ========================================================================
    // Accessors used by the engine and helpers
    // ========================================================================

    pub fn next_spec(&self) -> &NextSpec {
        &self.next
    }

    pub fn default_meta(&self) -> Option<&StepMeta> {
        self.meta.as_ref()
    }

    /// Data the step starts with when nothing has been committed
    pub fn default_data(&self, context: &Context, current: Option<&StepData>) -> Option<StepData> {
        match &self.data {
            None => None,
            Some(DataInit::Value(value)) => Some(value.clone()),
            Some(DataInit::Computed(f)) => Some(f(context, current)),
        }
    }

    /// Committed data if there is any, otherwise the default
    pub fn resolve_data(&self, context: &Context, committed: Option<&StepData>) -> Option<StepData> {
        committed
            .cloned()
            .or_else(|| self.default_data(context, None))
    }

    pub fn weight_for(&self, context: &Context) -> f64 {
        self.weight.resolve(context)
    }

    pub fn required_for(&self, context: &Context) -> bool {
        self.required.resolve(context)
    }

    pub fn retry_for(&self, context: &Context) -> RetryPolicy {
        self.retry.resolve(context)
    }

    /// Completion check; without a `complete` predicate a step is complete
    /// once it has committed data.
    pub fn is_complete(&self, data: Option<&StepData>, context: &Context) -> bool {
        match &self.complete {
            Some(f) => f(data, context),
            None => data.is_some(),
        }
    }

    pub(crate) fn validator(&self) -> Option<&ValidateFn> {
        self.validate.as_ref()
    }

    pub(crate) fn enter_guard(&self) -> Option<&GuardFn> {
        self.can_enter.as_ref()
    }

    pub(crate) fn exit_guard(&self) -> Option<&GuardFn> {
        self.can_exit.as_ref()
    }

    pub(crate) fn enter_hook(&self) -> Option<&HookFn> {
        self.before_enter.as_ref()
    }

    pub(crate) fn exit_hook(&self) -> Option<&HookFn> {
        self.before_exit.as_ref()
    }
}
