//! Middleware pipeline around dispatch.
//!
//! A middleware receives the store API, the action and a [`Next`] handle
//! for the rest of the chain. It may call `next.run` zero times
//! (short-circuit), once, or several times, optionally with a modified
//! action, and may read the state before and after. Middleware run in
//! registration order; the last one registered sits closest to the reducer.

mod logging;

pub use logging::LoggingMiddleware;

use crate::actions::Action;
use crate::error::Result;
use crate::state::State;
use std::sync::Arc;

/// What a middleware can do with the store.
pub trait StoreApi {
    /// Current state.
    fn get_state(&self) -> State;

    /// Dispatch a new action. Fails with `Reentrancy` while a dispatch is in flight.
    fn dispatch(&self, action: Action) -> Result<Action>;
}

/// Interceptor wrapped around dispatch.
pub trait Middleware: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "middleware"
    }

    fn handle(&self, api: &dyn StoreApi, action: Action, next: Next<'_>) -> Result<Action>;
}

/// The remainder of the middleware chain, ending in the reducer.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    api: &'a dyn StoreApi,
    base: &'a dyn Fn(Action) -> Result<Action>,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        chain: &'a [Arc<dyn Middleware>],
        api: &'a dyn StoreApi,
        base: &'a dyn Fn(Action) -> Result<Action>,
    ) -> Self {
        Self { chain, api, base }
    }

    /// Pass `action` to the next middleware, or to the reducer at the end.
    pub fn run(&self, action: Action) -> Result<Action> {
        match self.chain.split_first() {
            Some((head, rest)) => head.handle(
                self.api,
                action,
                Next {
                    chain: rest,
                    api: self.api,
                    base: self.base,
                },
            ),
            None => (self.base)(action),
        }
    }

    /// Number of middleware left before the reducer.
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }
}

/// Middleware backed by a closure.
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&dyn StoreApi, Action, Next<'_>) -> Result<Action> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, api: &dyn StoreApi, action: Action, next: Next<'_>) -> Result<Action> {
        (self.f)(api, action, next)
    }
}

/// Wrap a closure as middleware.
pub fn middleware_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn Middleware>
where
    F: Fn(&dyn StoreApi, Action, Next<'_>) -> Result<Action> + Send + Sync + 'static,
{
    Arc::new(FnMiddleware {
        name: name.into(),
        f,
    })
}
