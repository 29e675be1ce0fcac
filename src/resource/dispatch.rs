//! Dispatch strategies
//!
//! Lifts a scope-level describer into the multi-scope [`Describer`] contract.
//! The four strategies share one implementation; they differ only along two
//! axes:
//!
//! | strategy                         | concurrency | breadth  |
//! |----------------------------------|-------------|----------|
//! | `SequentialRegional`             | sequential  | regional |
//! | `ParallelRegional`               | parallel    | regional |
//! | `SequentialGlobal`               | sequential  | global   |
//! | get (single resource)            | parallel    | either   |
//!
//! Per-scope failures never abort sibling scopes. Errors whose code is on the
//! [`BenignPolicy`] count as an empty scope. Everything else is recorded in
//! [`ResourceSet::errors`] and the call still succeeds. Only sink failures
//! escape as an error.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::describer::{DescribeTarget, Describer, GetScope, ListScope};
use super::{Emitter, Resource, ResourceSet, Sink, Tags};
use crate::context::{DescribeContext, Fields, ScopeContext};
use crate::error::{ApiError, Error, SinkError};
use crate::provider::ScopedClient;
use crate::scope::{Scope, ScopeKind, GLOBAL_SCOPE};

pub const CODE_PANIC: &str = "Panic";
pub const CODE_CANCELLED: &str = "Cancelled";
pub const CODE_INTERNAL: &str = "Internal";

/// How a list call walks its scopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    SequentialRegional,
    #[default]
    ParallelRegional,
    SequentialGlobal,
}

impl Strategy {
    pub fn scope_kind(self) -> ScopeKind {
        match self {
            Strategy::SequentialRegional | Strategy::ParallelRegional => ScopeKind::Regional,
            Strategy::SequentialGlobal => ScopeKind::Global,
        }
    }

    pub fn is_parallel(self) -> bool {
        matches!(self, Strategy::ParallelRegional)
    }
}

/// Provider error codes that mean "not applicable here"
#[derive(Debug, Clone, Default)]
pub struct BenignPolicy {
    codes: HashSet<String>,
    scoped: BTreeMap<String, HashSet<String>>,
}

impl BenignPolicy {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
            scoped: BTreeMap::new(),
        }
    }

    /// Codes that are benign only in `scope`
    pub fn with_scope_codes<I, S>(mut self, scope: impl Into<String>, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scoped
            .entry(scope.into())
            .or_default()
            .extend(codes.into_iter().map(Into::into));
        self
    }

    pub fn is_benign(&self, scope: &str, error: &anyhow::Error) -> bool {
        let Some(api) = ApiError::find(error) else {
            return false;
        };
        let scoped = self.scoped.get(scope);
        api.codes()
            .any(|code| self.codes.contains(code) || scoped.is_some_and(|s| s.contains(code)))
    }
}

/// Terminal state of one unit of work
#[derive(Debug)]
enum Outcome<T> {
    Done(T),
    Benign,
    Failed { message: String, code: String },
}

/// Run one scope-level call: race it against the context, catch panics, classify errors
async fn guard<T, F>(cx: &ScopeContext, benign: &BenignPolicy, call: F) -> Outcome<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let result = tokio::select! {
        result = AssertUnwindSafe(call).catch_unwind() => result,
        why = cx.describe.done() => {
            return Outcome::Failed {
                message: why.to_string(),
                code: CODE_CANCELLED.to_string(),
            };
        }
    };

    match result {
        Ok(Ok(value)) => Outcome::Done(value),
        Ok(Err(err)) if benign.is_benign(cx.region(), &err) => {
            tracing::debug!(
                scope = %cx.region(),
                resource_type = %cx.resource_type,
                error = %err,
                "benign error, treating scope as empty"
            );
            Outcome::Benign
        }
        Ok(Err(err)) => {
            let code = ApiError::find(&err)
                .map(|api| api.machine_code().to_string())
                .unwrap_or_else(|| CODE_INTERNAL.to_string());
            Outcome::Failed {
                message: format!("{:#}", err),
                code,
            }
        }
        Err(panic_info) => Outcome::Failed {
            message: format!("panic: {}", panic_message(&*panic_info)),
            code: CODE_PANIC.to_string(),
        },
    }
}

fn panic_message(panic_info: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Spawn one task per scope and wait for exactly one result from each
///
/// Results come back in `scopes` order, whatever order the tasks finished in.
async fn fan_out<T, F, Fut>(scopes: &[Scope], unit: F) -> Vec<(Scope, Outcome<T>)>
where
    F: Fn(Scope) -> Fut,
    Fut: Future<Output = Outcome<T>> + Send + 'static,
    T: Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(scopes.len().max(1));

    for (index, scope) in scopes.iter().enumerate() {
        let tx = tx.clone();
        let work = unit(scope.clone());
        tokio::spawn(async move {
            let outcome = work.await;
            // Capacity equals the number of units, so this never waits
            let _ = tx.send((index, outcome)).await;
        });
    }
    drop(tx);

    let mut slots: Vec<Option<Outcome<T>>> = scopes.iter().map(|_| None).collect();
    for _ in 0..scopes.len() {
        match rx.recv().await {
            Some((index, outcome)) => slots[index] = Some(outcome),
            None => break,
        }
    }

    scopes
        .iter()
        .cloned()
        .zip(slots)
        .map(|(scope, outcome)| {
            // A task that died outside its guard never reported; account for it anyway
            let outcome = outcome.unwrap_or_else(|| Outcome::Failed {
                message: "scope task terminated without reporting".to_string(),
                code: CODE_PANIC.to_string(),
            });
            (scope, outcome)
        })
        .collect()
}

/// Outcome of listing one scope
type ListOutcome = Outcome<Result<Vec<Resource>, SinkError>>;

/// A scope-level describer lifted into the full contract
pub struct Dispatch<C: ScopedClient> {
    strategy: Strategy,
    lister: Arc<dyn ListScope<C>>,
    getter: Option<Arc<dyn GetScope<C>>>,
    benign: Arc<BenignPolicy>,
}

impl<C: ScopedClient> Dispatch<C> {
    pub fn new(strategy: Strategy, lister: impl ListScope<C> + 'static) -> Self {
        Self {
            strategy,
            lister: Arc::new(lister),
            getter: None,
            benign: Arc::new(BenignPolicy::default()),
        }
    }

    pub fn sequential_regional(lister: impl ListScope<C> + 'static) -> Self {
        Self::new(Strategy::SequentialRegional, lister)
    }

    pub fn parallel_regional(lister: impl ListScope<C> + 'static) -> Self {
        Self::new(Strategy::ParallelRegional, lister)
    }

    pub fn sequential_global(lister: impl ListScope<C> + 'static) -> Self {
        Self::new(Strategy::SequentialGlobal, lister)
    }

    pub fn with_get(mut self, getter: impl GetScope<C> + 'static) -> Self {
        self.getter = Some(Arc::new(getter));
        self
    }

    pub fn with_benign(mut self, benign: BenignPolicy) -> Self {
        self.benign = Arc::new(benign);
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn supports_get(&self) -> bool {
        self.getter.is_some()
    }

    fn tags(&self, target: &DescribeTarget<C>, scope: &Scope) -> Tags {
        let region = match self.strategy.scope_kind() {
            ScopeKind::Regional => scope.name.clone(),
            ScopeKind::Global => GLOBAL_SCOPE.to_string(),
        };
        Tags {
            account: target.account_id.clone(),
            region,
            partition: scope.partition.clone(),
            resource_type: target.resource_type.clone(),
        }
    }

    /// Build the unit of work that lists one scope
    fn list_unit(
        &self,
        cx: &DescribeContext,
        target: &DescribeTarget<C>,
        sink: &Option<Sink>,
        scope: Scope,
    ) -> impl Future<Output = ListOutcome> + Send + 'static {
        let lister = self.lister.clone();
        let benign = self.benign.clone();
        let scx = cx.for_scope(&scope, &target.account_id, &target.resource_type);
        let client = target.client.for_scope(&scope);
        let mut emitter = Emitter::new(self.tags(target, &scope), sink.clone());
        if self.strategy.scope_kind() == ScopeKind::Global {
            emitter = emitter.deduplicating();
        }

        async move {
            let outcome = guard(&scx, &benign, lister.list(&scx, &client, &emitter)).await;

            if let Some(err) = emitter.failure() {
                return Outcome::Done(Err(err.clone()));
            }

            match outcome {
                Outcome::Done(mut resources) => {
                    for resource in &mut resources {
                        resource.tag(emitter.tags());
                    }
                    Outcome::Done(Ok(resources))
                }
                Outcome::Benign => Outcome::Benign,
                Outcome::Failed { message, code } => Outcome::Failed { message, code },
            }
        }
    }

    async fn list_sequential(
        &self,
        cx: &DescribeContext,
        target: &DescribeTarget<C>,
        sink: &Option<Sink>,
    ) -> Result<ResourceSet, Error> {
        let global = self.strategy.scope_kind() == ScopeKind::Global;
        let mut output = ResourceSet::new();
        let mut merged = Vec::new();
        let mut answered = false;

        for scope in &target.scopes {
            let outcome = self.list_unit(cx, target, sink, scope.clone()).await;
            match outcome {
                Outcome::Done(Err(err)) => return Err(Error::Sink(err)),
                Outcome::Done(Ok(resources)) if global => {
                    merged.extend(resources);
                    answered = true;
                    // Global resources exist once; the first answer is enough
                    break;
                }
                Outcome::Benign if global => answered = true,
                other => record(&mut output, target, scope, other),
            }
        }

        if answered {
            output
                .resources
                .insert(GLOBAL_SCOPE.to_string(), dedup_by_identity(merged));
        }

        Ok(output)
    }

    async fn list_parallel(
        &self,
        cx: &DescribeContext,
        target: &DescribeTarget<C>,
        sink: &Option<Sink>,
    ) -> Result<ResourceSet, Error> {
        let results = fan_out(&target.scopes, |scope| self.list_unit(cx, target, sink, scope)).await;

        let mut output = ResourceSet::new();
        let mut sink_error = None;
        for (scope, outcome) in results {
            match outcome {
                Outcome::Done(Err(err)) => {
                    tracing::warn!(scope = %scope.name, error = %err, "sink aborted scope");
                    sink_error.get_or_insert(err);
                }
                other => record(&mut output, target, &scope, other),
            }
        }

        match sink_error {
            Some(err) => Err(Error::Sink(err)),
            None => Ok(output),
        }
    }
}

/// Fold one scope outcome into the aggregate
fn record<C>(output: &mut ResourceSet, target: &DescribeTarget<C>, scope: &Scope, outcome: ListOutcome) {
    match outcome {
        Outcome::Done(Ok(resources)) => {
            output.resources.insert(scope.name.clone(), resources);
        }
        Outcome::Done(Err(_)) => {}
        Outcome::Benign => {
            output.resources.insert(scope.name.clone(), Vec::new());
        }
        Outcome::Failed { message, code } => {
            tracing::warn!(
                scope = %scope.name,
                resource_type = %target.resource_type,
                account = %target.account_id,
                code = %code,
                error = %message,
                "failed to describe scope"
            );
            output.errors.insert(scope.name.clone(), message);
            output.error_code = Some(code);
        }
    }
}

/// Keep the first resource seen for each identity, preserving order
fn dedup_by_identity(resources: Vec<Resource>) -> Vec<Resource> {
    let mut seen = HashSet::new();
    resources
        .into_iter()
        .filter(|resource| seen.insert(resource.identity().to_string()))
        .collect()
}

#[async_trait]
impl<C: ScopedClient> Describer<C> for Dispatch<C> {
    async fn list(
        &self,
        cx: &DescribeContext,
        target: &DescribeTarget<C>,
        sink: Option<Sink>,
    ) -> Result<ResourceSet, Error> {
        tracing::debug!(
            resource_type = %target.resource_type,
            strategy = ?self.strategy,
            scopes = target.scopes.len(),
            streaming = sink.is_some(),
            "listing resources"
        );

        if self.strategy.is_parallel() {
            self.list_parallel(cx, target, &sink).await
        } else {
            self.list_sequential(cx, target, &sink).await
        }
    }

    async fn get(
        &self,
        cx: &DescribeContext,
        target: &DescribeTarget<C>,
        fields: &Fields,
    ) -> Result<ResourceSet, Error> {
        let Some(getter) = &self.getter else {
            return Err(Error::GetNotSupported(target.resource_type.clone()));
        };
        let fields = Arc::new(fields.clone());

        if self.strategy.scope_kind() == ScopeKind::Global {
            return Ok(self.get_global(cx, target, getter, &fields).await);
        }

        let results = fan_out(&target.scopes, |scope| {
            self.get_unit(cx, target, getter, &fields, scope)
        })
        .await;

        let mut output = ResourceSet::new();
        for (scope, outcome) in results {
            record(&mut output, target, &scope, outcome);
        }
        Ok(output)
    }
}

impl<C: ScopedClient> Dispatch<C> {
    /// Build the unit of work that looks a resource up in one scope
    fn get_unit(
        &self,
        cx: &DescribeContext,
        target: &DescribeTarget<C>,
        getter: &Arc<dyn GetScope<C>>,
        fields: &Arc<Fields>,
        scope: Scope,
    ) -> impl Future<Output = ListOutcome> + Send + 'static {
        let getter = getter.clone();
        let benign = self.benign.clone();
        let fields = fields.clone();
        let tags = self.tags(target, &scope);
        let scx = cx.for_scope(&scope, &target.account_id, &target.resource_type);
        let client = target.client.for_scope(&scope);

        async move {
            match guard(&scx, &benign, getter.get(&scx, &client, &fields)).await {
                Outcome::Done(found) => {
                    let found: Vec<Resource> = found
                        .into_iter()
                        .map(|mut resource| {
                            resource.tag(&tags);
                            resource
                        })
                        .collect();
                    Outcome::Done(Ok(found))
                }
                Outcome::Benign => Outcome::Benign,
                Outcome::Failed { message, code } => Outcome::Failed { message, code },
            }
        }
    }

    /// A global resource answers the same everywhere; ask until one scope answers
    async fn get_global(
        &self,
        cx: &DescribeContext,
        target: &DescribeTarget<C>,
        getter: &Arc<dyn GetScope<C>>,
        fields: &Arc<Fields>,
    ) -> ResourceSet {
        let mut output = ResourceSet::new();
        let mut answer = None;

        for scope in &target.scopes {
            match self.get_unit(cx, target, getter, fields, scope.clone()).await {
                Outcome::Done(Ok(found)) => {
                    answer = Some(found);
                    break;
                }
                Outcome::Benign => {
                    answer.get_or_insert_with(Vec::new);
                }
                other => record(&mut output, target, scope, other),
            }
        }

        if let Some(found) = answer {
            output
                .resources
                .insert(GLOBAL_SCOPE.to_string(), dedup_by_identity(found));
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TriggerType;
    use crate::resource::sink_fn;
    use crate::testing::{FakeClient, StaticGetter, StaticLister};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn target(scopes: &[&str]) -> DescribeTarget<FakeClient> {
        DescribeTarget {
            client: FakeClient::new("acme-prod"),
            account_id: "acme-prod".to_string(),
            scopes: scopes.iter().map(|s| Scope::new(*s, "gcp")).collect(),
            resource_type: "Test/Widget".to_string(),
        }
    }

    fn cx() -> DescribeContext {
        DescribeContext::new(TriggerType::Manual)
    }

    fn widget(id: &str) -> Resource {
        Resource::new(id, format!("widget-{}", id), json!({ "id": id }))
    }

    fn api_error(status: u16, reason: &str) -> ApiError {
        ApiError {
            status,
            code: "UNAVAILABLE".to_string(),
            reasons: vec![reason.to_string()],
            message: reason.to_string(),
        }
    }

    fn recording_sink() -> (Sink, Arc<Mutex<Vec<String>>>) {
        let sunk = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let sunk = sunk.clone();
            sink_fn(move |r| {
                sunk.lock().unwrap().push(r.id);
                Ok(())
            })
        };
        (sink, sunk)
    }

    fn forbidden() -> ApiError {
        ApiError {
            status: 403,
            code: "PERMISSION_DENIED".to_string(),
            reasons: vec!["accessNotConfigured".to_string()],
            message: "API disabled".to_string(),
        }
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        for strategy in [Strategy::SequentialRegional, Strategy::ParallelRegional] {
            let lister = StaticLister::new()
                .with_scope("scope1", vec![widget("1")])
                .with_error("scope2", "throttled")
                .with_scope("scope3", vec![widget("3")]);
            let dispatch = Dispatch::new(strategy, lister);

            let set = dispatch
                .list(&cx(), &target(&["scope1", "scope2", "scope3"]), None)
                .await
                .expect("partial failure is not fatal");

            assert_eq!(set.resources["scope1"].len(), 1);
            assert_eq!(set.resources["scope3"].len(), 1);
            assert!(!set.resources.contains_key("scope2"));
            assert!(set.errors["scope2"].contains("throttled"));
            assert_eq!(set.error_code.as_deref(), Some(CODE_INTERNAL));
        }
    }

    #[tokio::test]
    async fn test_resources_are_tagged_by_dispatcher() {
        let lister = StaticLister::new().with_scope("us-east1", vec![widget("1")]);
        let set = Dispatch::parallel_regional(lister)
            .list(&cx(), &target(&["us-east1"]), None)
            .await
            .unwrap();

        let resource = &set.resources["us-east1"][0];
        assert_eq!(resource.account, "acme-prod");
        assert_eq!(resource.region, "us-east1");
        assert_eq!(resource.partition, "gcp");
        assert_eq!(resource.resource_type, "Test/Widget");
    }

    #[tokio::test]
    async fn test_benign_error_counts_as_empty_scope() {
        let lister = StaticLister::new()
            .with_scope("a", vec![widget("1")])
            .with_api_error("b", forbidden());
        let dispatch = Dispatch::sequential_regional(lister)
            .with_benign(BenignPolicy::new(["accessNotConfigured"]));

        let set = dispatch.list(&cx(), &target(&["a", "b"]), None).await.unwrap();

        assert_eq!(set.resources["b"], Vec::<Resource>::new());
        assert!(set.errors.is_empty());
        assert_eq!(set.error_code, None);
    }

    #[tokio::test]
    async fn test_scope_specific_benign_code() {
        let lister = StaticLister::new()
            .with_api_error("a", forbidden())
            .with_api_error("b", forbidden());
        let dispatch = Dispatch::parallel_regional(lister)
            .with_benign(BenignPolicy::default().with_scope_codes("b", ["PERMISSION_DENIED"]));

        let set = dispatch.list(&cx(), &target(&["a", "b"]), None).await.unwrap();

        assert!(set.errors.contains_key("a"));
        assert_eq!(set.resources["b"].len(), 0);
        assert_eq!(set.error_code.as_deref(), Some("accessNotConfigured"));
    }

    #[tokio::test]
    async fn test_panic_is_recorded_for_its_scope_only() {
        let lister = StaticLister::new()
            .with_scope("a", vec![widget("1")])
            .with_panic("b")
            .with_scope("c", vec![widget("3")]);

        let set = Dispatch::parallel_regional(lister)
            .list(&cx(), &target(&["a", "b", "c"]), None)
            .await
            .unwrap();

        assert_eq!(set.resources.len(), 2);
        assert!(set.errors["b"].starts_with("panic:"));
        assert_eq!(set.error_code.as_deref(), Some(CODE_PANIC));
    }

    #[tokio::test]
    async fn test_sequential_global_stops_at_first_success_and_dedups() {
        let first = widget("1");
        let mut duplicate = widget("1");
        duplicate.description = json!({ "id": "1", "copy": true });

        let lister = StaticLister::new()
            .with_error("a", "unreachable")
            .with_scope("b", vec![first.clone(), widget("2"), duplicate])
            .with_scope("c", vec![widget("9")]);
        let calls = lister.calls();

        let set = Dispatch::sequential_global(lister)
            .list(&cx(), &target(&["a", "b", "c"]), None)
            .await
            .unwrap();

        let global = &set.resources[GLOBAL_SCOPE];
        assert_eq!(global.len(), 2);
        assert_eq!(global[0].description, first.description);
        assert_eq!(global[0].region, GLOBAL_SCOPE);
        assert!(set.errors.contains_key("a"));
        assert_eq!(calls.lock().unwrap().as_slice(), ["a", "b"]);
    }

    #[tokio::test]
    async fn test_sink_failure_aborts_branch_and_surfaces() {
        let lister = StaticLister::new().with_scope("a", vec![widget("1"), widget("2"), widget("3")]);
        let sunk = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = {
            let sunk = sunk.clone();
            let calls = calls.clone();
            sink_fn(move |r| {
                if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                    return Err(SinkError::new(r.id, "closed"));
                }
                sunk.lock().unwrap().push(r.id);
                Ok(())
            })
        };

        let err = Dispatch::sequential_regional(lister)
            .list(&cx(), &target(&["a"]), Some(sink))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Sink(ref e) if e.resource_id == "2"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sunk.lock().unwrap().as_slice(), ["1"]);
    }

    #[tokio::test]
    async fn test_streaming_leaves_scopes_empty_but_present() {
        let lister = StaticLister::new()
            .with_scope("a", vec![widget("1")])
            .with_scope("b", vec![widget("2")]);
        let sunk = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let sunk = sunk.clone();
            sink_fn(move |r| {
                sunk.lock().unwrap().push(r);
                Ok(())
            })
        };

        let set = Dispatch::parallel_regional(lister)
            .list(&cx(), &target(&["a", "b"]), Some(sink))
            .await
            .unwrap();

        assert_eq!(set.resource_count(), 0);
        assert_eq!(set.resources.len(), 2);
        let sunk = sunk.lock().unwrap();
        assert_eq!(sunk.len(), 2);
        assert!(sunk.iter().all(|r| r.resource_type == "Test/Widget"));
    }

    #[tokio::test]
    async fn test_cancelled_context_fails_every_scope() {
        let cx = cx();
        cx.cancel();
        let lister = StaticLister::new().with_hang("a").with_hang("b");

        let set = Dispatch::parallel_regional(lister)
            .list(&cx, &target(&["a", "b"]), None)
            .await
            .unwrap();

        assert_eq!(set.errors.len(), 2);
        assert_eq!(set.error_code.as_deref(), Some(CODE_CANCELLED));
    }

    #[tokio::test]
    async fn test_get_keeps_every_match() {
        let getter = StaticGetter::new()
            .with_match("a", widget("7"))
            .with_match("c", widget("7"));
        let dispatch = Dispatch::parallel_regional(StaticLister::new()).with_get(getter);
        let mut fields = Fields::new();
        fields.insert("id".to_string(), "7".to_string());

        let set = dispatch
            .get(&cx(), &target(&["a", "b", "c"]), &fields)
            .await
            .unwrap();

        assert_eq!(set.resources["a"].len(), 1);
        assert_eq!(set.resources["b"].len(), 0);
        assert_eq!(set.resources["c"][0].region, "c");
    }

    #[tokio::test]
    async fn test_get_without_getter_is_rejected() {
        let dispatch = Dispatch::parallel_regional(StaticLister::new());
        let err = dispatch
            .get(&cx(), &target(&["a"]), &Fields::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GetNotSupported(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_errors_fold_in_scope_order() {
        let lister = StaticLister::new()
            .with_api_error("a", api_error(429, "rateLimitExceeded"))
            .with_delay("a", Duration::from_secs(2))
            .with_api_error("b", api_error(503, "backendError"));

        let set = Dispatch::parallel_regional(lister)
            .list(&cx(), &target(&["a", "b"]), None)
            .await
            .unwrap();

        assert_eq!(set.errors.len(), 2);
        assert_eq!(set.error_code.as_deref(), Some("backendError"));
    }

    #[tokio::test]
    async fn test_parallel_sink_failure_surfaces_after_rendezvous() {
        let lister = StaticLister::new()
            .with_scope("a", vec![widget("1")])
            .with_scope("b", vec![widget("2"), widget("3")])
            .with_scope("c", vec![widget("4")]);
        let calls = lister.calls();
        let sunk = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let sunk = sunk.clone();
            sink_fn(move |r| {
                if r.id == "2" {
                    return Err(SinkError::new(r.id, "closed"));
                }
                sunk.lock().unwrap().push(r.id);
                Ok(())
            })
        };

        let err = Dispatch::parallel_regional(lister)
            .list(&cx(), &target(&["a", "b", "c"]), Some(sink))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Sink(ref e) if e.resource_id == "2"));
        assert_eq!(calls.lock().unwrap().len(), 3);
        let mut sunk = sunk.lock().unwrap().clone();
        sunk.sort();
        assert_eq!(sunk, vec!["1", "4"]);
    }

    #[tokio::test]
    async fn test_sequential_global_streams_each_identity_once() {
        let lister =
            StaticLister::new().with_scope("a", vec![widget("1"), widget("1"), widget("2")]);
        let (sink, sunk) = recording_sink();

        let set = Dispatch::sequential_global(lister)
            .list(&cx(), &target(&["a", "b"]), Some(sink))
            .await
            .unwrap();

        assert_eq!(sunk.lock().unwrap().as_slice(), ["1", "2"]);
        assert!(set.resources.contains_key(GLOBAL_SCOPE));
        assert_eq!(set.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_global_get_answers_once_under_global_key() {
        let getter = StaticGetter::new()
            .with_match("a", widget("logs"))
            .with_match("b", widget("logs"))
            .with_match("c", widget("logs"));
        let dispatch = Dispatch::sequential_global(StaticLister::new()).with_get(getter);
        let mut fields = Fields::new();
        fields.insert("id".to_string(), "logs".to_string());

        let set = dispatch
            .get(&cx(), &target(&["a", "b", "c"]), &fields)
            .await
            .unwrap();

        let keys: Vec<&str> = set.resources.keys().map(String::as_str).collect();
        assert_eq!(keys, vec![GLOBAL_SCOPE]);
        let found = &set.resources[GLOBAL_SCOPE];
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].region, GLOBAL_SCOPE);
        assert!(set.errors.is_empty());
    }

    #[tokio::test]
    async fn test_global_get_absent_stops_at_first_answer() {
        let getter = StaticGetter::new().with_match("b", widget("logs"));
        let dispatch = Dispatch::sequential_global(StaticLister::new()).with_get(getter);
        let mut fields = Fields::new();
        fields.insert("id".to_string(), "missing".to_string());

        let set = dispatch
            .get(&cx(), &target(&["a", "b"]), &fields)
            .await
            .unwrap();

        assert_eq!(set.resources[GLOBAL_SCOPE], Vec::<Resource>::new());
        assert_eq!(set.resources.len(), 1);
    }
}
