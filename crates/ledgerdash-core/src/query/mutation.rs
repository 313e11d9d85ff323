//! One-shot writes with optimistic update and rollback hooks.
//!
//! A [`Mutation`] is not addressed by a query key and never touches the cache
//! itself; callers typically invalidate affected keys from `on_success` or
//! `on_settled`.
//!
//! Concurrent calls on one runner are not serialized. Each writes its own
//! terminal state into the shared `{data, error, is_loading}` when it settles,
//! so the call that settles last wins. Use one runner per independent write
//! when that matters.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::client::QueryClient;
use super::error::QueryError;

pub type MutationFn<V, R> = Arc<dyn Fn(V) -> BoxFuture<'static, anyhow::Result<R>> + Send + Sync>;
pub type OnMutateFn<V, C> = Arc<dyn Fn(&V) -> C + Send + Sync>;
pub type OnSuccessFn<V, R> = Arc<dyn Fn(&R, &V) + Send + Sync>;
pub type OnErrorFn<V, C> = Arc<dyn Fn(&QueryError, &V, Option<&C>) + Send + Sync>;
pub type OnSettledFn<V, R> = Arc<dyn Fn(Option<&R>, Option<&QueryError>, &V) + Send + Sync>;

pub struct MutationOptions<V, R, C = ()> {
    pub mutation_fn: MutationFn<V, R>,
    pub on_mutate: Option<OnMutateFn<V, C>>,
    pub on_success: Option<OnSuccessFn<V, R>>,
    pub on_error: Option<OnErrorFn<V, C>>,
    pub on_settled: Option<OnSettledFn<V, R>>,
}

impl<V, R, C> MutationOptions<V, R, C>
where
    V: Send + 'static,
    R: Send + 'static,
{
    pub fn new<F, Fut>(mutation_fn: F) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        Self {
            mutation_fn: Arc::new(move |variables| mutation_fn(variables).boxed()),
            on_mutate: None,
            on_success: None,
            on_error: None,
            on_settled: None,
        }
    }

    /// Runs before the write; its return value is the rollback context
    /// handed to `on_error`.
    pub fn on_mutate(mut self, f: impl Fn(&V) -> C + Send + Sync + 'static) -> Self {
        self.on_mutate = Some(Arc::new(f));
        self
    }

    pub fn on_success(mut self, f: impl Fn(&R, &V) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(
        mut self,
        f: impl Fn(&QueryError, &V, Option<&C>) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_settled(
        mut self,
        f: impl Fn(Option<&R>, Option<&QueryError>, &V) + Send + Sync + 'static,
    ) -> Self {
        self.on_settled = Some(Arc::new(f));
        self
    }
}

#[derive(Debug, Clone)]
pub struct MutationState<R> {
    pub data: Option<R>,
    pub error: Option<QueryError>,
    pub is_loading: bool,
}

impl<R> Default for MutationState<R> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: false,
        }
    }
}

impl<R> MutationState<R> {
    pub fn is_error(&self) -> bool {
        !self.is_loading && self.error.is_some()
    }

    pub fn is_success(&self) -> bool {
        !self.is_loading && self.error.is_none() && self.data.is_some()
    }
}

pub struct Mutation<V, R, C = ()> {
    client: QueryClient,
    options: Arc<MutationOptions<V, R, C>>,
    state: Arc<watch::Sender<MutationState<R>>>,
}

impl<V, R, C> Clone for Mutation<V, R, C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            options: Arc::clone(&self.options),
            state: Arc::clone(&self.state),
        }
    }
}

impl<V, R, C> Mutation<V, R, C>
where
    V: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    pub fn new(client: QueryClient, options: MutationOptions<V, R, C>) -> Self {
        let (state, _) = watch::channel(MutationState::default());
        Self {
            client,
            options: Arc::new(options),
            state: Arc::new(state),
        }
    }

    /// The client this runner was built with, for invalidating after a write.
    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    /// Run the mutation in the background. Failures are reported through the
    /// callbacks and the exposed state only.
    ///
    /// `on_mutate` has run and the state shows loading by the time this
    /// returns.
    pub fn mutate(&self, variables: V) {
        let context = self.begin(&variables);
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.execute(variables, context).await {
                debug!(error = %err, "Background mutation failed");
            }
        });
    }

    pub async fn mutate_async(&self, variables: V) -> Result<R, QueryError> {
        let context = self.begin(&variables);
        self.execute(variables, context).await
    }

    /// Apply the optimistic update and mark the runner loading.
    fn begin(&self, variables: &V) -> Option<C> {
        let context = self.options.on_mutate.as_ref().map(|f| f(variables));
        self.state.send_modify(|state| {
            state.is_loading = true;
            state.error = None;
        });
        context
    }

    async fn execute(&self, variables: V, context: Option<C>) -> Result<R, QueryError> {
        let options = &self.options;
        let result = (options.mutation_fn)(variables.clone())
            .await
            .map_err(QueryError::failed);

        match &result {
            Ok(data) => {
                let stored = data.clone();
                self.state.send_modify(move |state| {
                    state.data = Some(stored);
                    state.error = None;
                    state.is_loading = false;
                });
                if let Some(on_success) = &options.on_success {
                    on_success(data, &variables);
                }
            }
            Err(err) => {
                warn!(error = %err, "Mutation failed");
                let stored = err.clone();
                self.state.send_modify(move |state| {
                    state.data = None;
                    state.error = Some(stored);
                    state.is_loading = false;
                });
                if let Some(on_error) = &options.on_error {
                    on_error(err, &variables, context.as_ref());
                }
            }
        }

        if let Some(on_settled) = &options.on_settled {
            on_settled(result.as_ref().ok(), result.as_ref().err(), &variables);
        }
        result
    }

    pub fn reset(&self) {
        self.state.send_replace(MutationState::default());
    }

    pub fn state(&self) -> MutationState<R> {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<MutationState<R>> {
        self.state.subscribe()
    }

    pub fn data(&self) -> Option<R> {
        self.state.borrow().data.clone()
    }

    pub fn error(&self) -> Option<QueryError> {
        self.state.borrow().error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn is_error(&self) -> bool {
        self.state.borrow().is_error()
    }

    pub fn is_success(&self) -> bool {
        self.state.borrow().is_success()
    }
}
