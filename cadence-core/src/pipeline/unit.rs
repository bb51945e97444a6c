//! Work unit and route selector contracts, plus closure-backed implementations
//!
//! Both traits are opaque to the orchestrator: it hands them an owned
//! [`KickoffInput`] and gets back a [`StageOutput`] or an error. Units that
//! keep internal state override `fork` so each kickoff gets its own instance.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use super::input::KickoffInput;
use super::output::StageOutput;

/// Opaque executable that turns an input mapping into a stage output
#[async_trait]
pub trait WorkUnit: Send + Sync {
    /// Name used in traces, logs and error reports
    fn name(&self) -> &str;

    /// Execute against an owned copy of the current input
    async fn execute(&self, input: KickoffInput) -> anyhow::Result<StageOutput>;

    /// Produce a fresh instance for one kickoff.
    ///
    /// `None` means the unit holds no mutable state and can be shared by
    /// every kickoff.
    fn fork(&self) -> Option<Arc<dyn WorkUnit>> {
        None
    }
}

/// Opaque decision function whose structured output carries routing metadata
#[async_trait]
pub trait RouteSelector: Send + Sync {
    /// Name used in traces, logs and error reports
    fn name(&self) -> &str;

    /// Decide on a route for the current input
    async fn execute(&self, input: KickoffInput) -> anyhow::Result<StageOutput>;

    /// Produce a fresh instance for one kickoff. See [`WorkUnit::fork`].
    fn fork(&self) -> Option<Arc<dyn RouteSelector>> {
        None
    }
}

type UnitFn =
    Arc<dyn Fn(KickoffInput) -> BoxFuture<'static, anyhow::Result<StageOutput>> + Send + Sync>;

/// Work unit backed by a closure
#[derive(Clone)]
pub struct FnUnit {
    name: String,
    func: UnitFn,
}

impl std::fmt::Debug for FnUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnUnit").field("name", &self.name).finish()
    }
}

impl FnUnit {
    /// Create a unit from a synchronous closure
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(KickoffInput) -> anyhow::Result<StageOutput> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        Self {
            name: name.into(),
            func: Arc::new(
                move |input: KickoffInput| -> BoxFuture<'static, anyhow::Result<StageOutput>> {
                    let func = Arc::clone(&func);
                    Box::pin(async move { func(input) })
                },
            ),
        }
    }

    /// Create a unit from an async closure
    pub fn new_async<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(KickoffInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<StageOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(
                move |input: KickoffInput| -> BoxFuture<'static, anyhow::Result<StageOutput>> {
                    Box::pin(func(input))
                },
            ),
        }
    }

    /// Wrap into a shareable trait object
    pub fn shared(self) -> Arc<dyn WorkUnit> {
        Arc::new(self)
    }
}

#[async_trait]
impl WorkUnit for FnUnit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: KickoffInput) -> anyhow::Result<StageOutput> {
        (self.func)(input).await
    }
}

/// Route selector backed by a closure
#[derive(Clone)]
pub struct FnSelector {
    name: String,
    func: UnitFn,
}

impl std::fmt::Debug for FnSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSelector").field("name", &self.name).finish()
    }
}

impl FnSelector {
    /// Create a selector from a synchronous closure
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(KickoffInput) -> anyhow::Result<StageOutput> + Send + Sync + 'static,
    {
        let FnUnit { name, func } = FnUnit::new(name, func);
        Self { name, func }
    }

    /// Wrap into a shareable trait object
    pub fn shared(self) -> Arc<dyn RouteSelector> {
        Arc::new(self)
    }
}

#[async_trait]
impl RouteSelector for FnSelector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: KickoffInput) -> anyhow::Result<StageOutput> {
        (self.func)(input).await
    }
}

/// Wraps a stateful unit type so every kickoff gets a freshly built instance
pub struct PerKickoff<U> {
    template: U,
    factory: Arc<dyn Fn() -> U + Send + Sync>,
}

impl<U: WorkUnit + 'static> PerKickoff<U> {
    /// Build the template instance from `factory`; forks call it again
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> U + Send + Sync + 'static,
    {
        Self {
            template: factory(),
            factory: Arc::new(factory),
        }
    }
}

#[async_trait]
impl<U: WorkUnit + 'static> WorkUnit for PerKickoff<U> {
    fn name(&self) -> &str {
        self.template.name()
    }

    async fn execute(&self, input: KickoffInput) -> anyhow::Result<StageOutput> {
        self.template.execute(input).await
    }

    fn fork(&self) -> Option<Arc<dyn WorkUnit>> {
        Some(Arc::new((self.factory)()))
    }
}

type RulePredicate = Box<dyn Fn(&KickoffInput) -> bool + Send + Sync>;

/// Rule-based selector that writes the first matching route label under a
/// decision key.
///
/// Downstream units read the merged key from their input to decide what to
/// do; the orchestrator itself never branches on it.
pub struct FieldRouter {
    name: String,
    decision_key: String,
    rules: Vec<(String, RulePredicate)>,
    default_route: String,
}

impl std::fmt::Debug for FieldRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldRouter")
            .field("name", &self.name)
            .field("decision_key", &self.decision_key)
            .field("routes", &self.routes())
            .field("default_route", &self.default_route)
            .finish()
    }
}

impl FieldRouter {
    /// Create a router with a fallback route and the default `route` key
    pub fn new(name: impl Into<String>, default_route: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            decision_key: "route".to_string(),
            rules: Vec::new(),
            default_route: default_route.into(),
        }
    }

    /// Change the key the decision is written under
    pub fn decision_key(mut self, key: impl Into<String>) -> Self {
        self.decision_key = key.into();
        self
    }

    /// Add a rule; rules are checked in insertion order
    pub fn add_rule<F>(mut self, route: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&KickoffInput) -> bool + Send + Sync + 'static,
    {
        self.rules.push((route.into(), Box::new(predicate)));
        self
    }

    /// Add a rule matching when `field` equals `value`
    pub fn add_field_equals_rule(
        self,
        route: impl Into<String>,
        field: impl Into<String>,
        value: Value,
    ) -> Self {
        let field = field.into();
        self.add_rule(route, move |input| input.get(&field) == Some(&value))
    }

    /// Add a rule matching when the numeric `field` is at least `threshold`
    pub fn add_threshold_rule(
        self,
        route: impl Into<String>,
        field: impl Into<String>,
        threshold: f64,
    ) -> Self {
        let field = field.into();
        self.add_rule(route, move |input| {
            input
                .get(&field)
                .and_then(Value::as_f64)
                .is_some_and(|v| v >= threshold)
        })
    }

    /// Route labels in rule order, followed by the default
    pub fn routes(&self) -> Vec<&str> {
        self.rules
            .iter()
            .map(|(route, _)| route.as_str())
            .chain(std::iter::once(self.default_route.as_str()))
            .collect()
    }

    fn decide(&self, input: &KickoffInput) -> &str {
        self.rules
            .iter()
            .find(|(_, predicate)| predicate(input))
            .map(|(route, _)| route.as_str())
            .unwrap_or(self.default_route.as_str())
    }
}

#[async_trait]
impl RouteSelector for FieldRouter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: KickoffInput) -> anyhow::Result<StageOutput> {
        let route = self.decide(&input);
        let mut decision = serde_json::Map::new();
        decision.insert(self.decision_key.clone(), Value::String(route.to_string()));
        Ok(StageOutput::structured(Value::Object(decision)).with_raw(route))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fn_unit_sync() {
        let unit = FnUnit::new("double", |input| {
            let v = input.get_i64("v").unwrap_or_default();
            Ok(StageOutput::structured(json!({"v": v * 2})))
        });

        let output = unit
            .execute(KickoffInput::new().with("v", 21))
            .await
            .unwrap();
        assert_eq!(unit.name(), "double");
        assert_eq!(output.get("v"), Some(&json!(42)));
        assert!(unit.fork().is_none());
    }

    #[tokio::test]
    async fn test_fn_unit_async_error() {
        let unit = FnUnit::new_async("flaky", |_input| async move {
            Err::<StageOutput, _>(anyhow::anyhow!("upstream unavailable"))
        });

        let err = unit.execute(KickoffInput::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "upstream unavailable");
    }

    struct Counter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WorkUnit for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn execute(&self, _input: KickoffInput) -> anyhow::Result<StageOutput> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(StageOutput::structured(json!({"calls": n})))
        }
    }

    #[tokio::test]
    async fn test_per_kickoff_forks_fresh_state() {
        let unit = PerKickoff::new(|| Counter {
            calls: AtomicUsize::new(0),
        });

        unit.execute(KickoffInput::new()).await.unwrap();
        unit.execute(KickoffInput::new()).await.unwrap();

        let fork = unit.fork().expect("stateful unit must fork");
        let output = fork.execute(KickoffInput::new()).await.unwrap();
        assert_eq!(output.get("calls"), Some(&json!(1)));
        assert_eq!(fork.name(), "counter");
    }

    #[tokio::test]
    async fn test_field_router_first_match_wins() {
        let router = FieldRouter::new("triage", "standard")
            .add_field_equals_rule("urgent", "priority", json!("high"))
            .add_threshold_rule("review", "risk", 0.8);

        assert_eq!(router.routes(), vec!["urgent", "review", "standard"]);

        let urgent = KickoffInput::new().with("priority", "high").with("risk", 0.9);
        let output = router.execute(urgent).await.unwrap();
        assert_eq!(output.get("route"), Some(&json!("urgent")));
        assert_eq!(output.raw, "urgent");

        let review = KickoffInput::new().with("risk", 0.95);
        let output = router.execute(review).await.unwrap();
        assert_eq!(output.get("route"), Some(&json!("review")));

        let output = router.execute(KickoffInput::new()).await.unwrap();
        assert_eq!(output.get("route"), Some(&json!("standard")));
    }

    #[tokio::test]
    async fn test_field_router_custom_key() {
        let router = FieldRouter::new("lang", "en").decision_key("language");
        let output = router.execute(KickoffInput::new()).await.unwrap();
        assert_eq!(output.get("language"), Some(&json!("en")));
        assert!(output.get("route").is_none());
    }
}
