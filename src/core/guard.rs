//! Callbacks and the guard/payload resolver.
//!
//! Every callback site (guard, action, entry, exit) holds a [`Callback`]
//! with up to two overloads: a parameterless one and a payload-typed one.
//! [`resolve`] decides which overload runs for a given fire, purely from
//! what the caller supplied and what overloads exist.

use crate::model::CallbackRef;
use futures::future::{BoxFuture, FutureExt};
use std::any::{Any, TypeId};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Error type user callbacks return.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

pub type CallbackResult<T> = Result<T, CallbackError>;

/// Guard predicate over the machine context.
pub type Guard<C> = Callback<C, bool>;

/// Action, entry or exit callback over the machine context.
pub type Action<C> = Callback<C, ()>;

/// Run-time type of a payload.
#[derive(Clone, Copy, Debug)]
pub struct PayloadType {
    id: TypeId,
    name: &'static str,
}

impl PayloadType {
    pub fn of<P: Any>() -> Self {
        Self {
            id: TypeId::of::<P>(),
            name: std::any::type_name::<P>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        self.id == payload.kind.id
    }
}

impl PartialEq for PayloadType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PayloadType {}

/// Type-erased data passed along with a trigger.
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    kind: PayloadType,
}

impl Payload {
    pub fn new<P: Any + Send + Sync>(value: P) -> Self {
        Self {
            value: Arc::new(value),
            kind: PayloadType::of::<P>(),
        }
    }

    pub fn kind(&self) -> PayloadType {
        self.kind
    }

    pub fn downcast_ref<P: Any>(&self) -> Option<&P> {
        self.value.downcast_ref::<P>()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("type", &self.kind.name)
            .finish()
    }
}

/// Which overload of a callback runs for one invocation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Dispatch {
    /// Invoke the parameterless overload.
    Plain,
    /// Invoke the payload-typed overload.
    Typed,
    /// Do not invoke anything; a skipped guard evaluates to `false`.
    Skip,
}

/// Decide which overload runs.
///
/// `payload_matches` is `None` when no payload was supplied, otherwise
/// whether the supplied payload has the typed overload's type.
pub fn resolve(accepts_payload: bool, has_plain: bool, payload_matches: Option<bool>) -> Dispatch {
    if !accepts_payload {
        return Dispatch::Plain;
    }
    match (payload_matches, has_plain) {
        (Some(true), _) => Dispatch::Typed,
        (_, true) => Dispatch::Plain,
        (_, false) => Dispatch::Skip,
    }
}

/// Failures raised by the engine while invoking a callback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvocationError {
    #[error("callback '{callback}' expected a payload of type {expected}")]
    PayloadMismatch {
        callback: String,
        expected: &'static str,
    },

    #[error("asynchronous callback '{callback}' cannot run on a synchronous machine")]
    AsyncOnSyncMachine { callback: String },
}

type SyncFn<C, R> = Arc<dyn Fn(&C, Option<&Payload>) -> CallbackResult<R> + Send + Sync>;

type AsyncFn<C, R> = Arc<
    dyn Fn(Arc<C>, Option<Payload>, CancellationToken) -> BoxFuture<'static, CallbackResult<R>>
        + Send
        + Sync,
>;

enum Body<C, R> {
    Sync(SyncFn<C, R>),
    Async(AsyncFn<C, R>),
}

impl<C, R> Clone for Body<C, R> {
    fn clone(&self) -> Self {
        match self {
            Body::Sync(f) => Body::Sync(Arc::clone(f)),
            Body::Async(f) => Body::Async(Arc::clone(f)),
        }
    }
}

impl<C, R> Body<C, R> {
    fn is_async(&self) -> bool {
        matches!(self, Body::Async(_))
    }
}

fn sync_body<C, R, F>(f: F) -> Body<C, R>
where
    F: Fn(&C, Option<&Payload>) -> CallbackResult<R> + Send + Sync + 'static,
{
    Body::Sync(Arc::new(f))
}

fn async_body<C, R, F>(f: F) -> Body<C, R>
where
    F: Fn(Arc<C>, Option<Payload>, CancellationToken) -> BoxFuture<'static, CallbackResult<R>>
        + Send
        + Sync
        + 'static,
{
    Body::Async(Arc::new(f))
}

/// A named callback with a parameterless and/or a payload-typed overload.
///
/// Synchronous bodies borrow the context. Asynchronous bodies receive a
/// shared handle to it plus the cancellation token of the current fire.
/// Contexts that need mutation use interior mutability.
///
/// # Example
///
/// ```rust
/// use nestfsm::core::{Guard, Payload};
///
/// struct Account {
///     balance: u32,
/// }
///
/// let covers = Guard::<Account>::typed_predicate("covers", |acct: &Account, amount: &u32| {
///     acct.balance >= *amount
/// });
///
/// assert!(covers.accepts_payload());
/// assert!(!covers.has_plain());
/// ```
pub struct Callback<C, R> {
    name: String,
    plain: Option<Body<C, R>>,
    typed: Option<(PayloadType, Body<C, R>)>,
}

impl<C, R> Clone for Callback<C, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            plain: self.plain.clone(),
            typed: self.typed.clone(),
        }
    }
}

impl<C, R> fmt::Debug for Callback<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("name", &self.name)
            .field("is_async", &self.is_async())
            .field("payload", &self.typed.as_ref().map(|(kind, _)| kind.name()))
            .field("has_plain", &self.plain.is_some())
            .finish()
    }
}

impl<C, R> Callback<C, R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_async(&self) -> bool {
        self.plain.as_ref().is_some_and(Body::is_async)
            || self.typed.as_ref().is_some_and(|(_, b)| b.is_async())
    }

    pub fn accepts_payload(&self) -> bool {
        self.typed.is_some()
    }

    pub fn has_plain(&self) -> bool {
        self.plain.is_some()
    }

    pub fn payload_type(&self) -> Option<PayloadType> {
        self.typed.as_ref().map(|(kind, _)| *kind)
    }

    /// Callback-free description used in models and plans.
    pub fn reference(&self) -> CallbackRef {
        CallbackRef {
            name: self.name.clone(),
            is_async: self.is_async(),
            accepts_payload: self.accepts_payload(),
            has_plain: self.has_plain(),
        }
    }

    /// Add `fallback`'s parameterless overload if this callback has none.
    pub fn or_else(mut self, fallback: Callback<C, R>) -> Self {
        if self.plain.is_none() {
            self.plain = fallback.plain;
        }
        self
    }

    pub fn dispatch(&self, payload: Option<&Payload>) -> Dispatch {
        let matches =
            payload.map(|p| self.typed.as_ref().is_some_and(|(kind, _)| kind.matches(p)));
        resolve(self.accepts_payload(), self.has_plain(), matches)
    }

    fn select(&self, payload: Option<&Payload>) -> Option<&Body<C, R>> {
        match self.dispatch(payload) {
            Dispatch::Plain => self.plain.as_ref(),
            Dispatch::Typed => self.typed.as_ref().map(|(_, body)| body),
            Dispatch::Skip => None,
        }
    }

    /// Invoke on a synchronous machine. `None` means the callback was skipped.
    pub(crate) fn call_sync(&self, context: &C, payload: Option<&Payload>) -> Option<CallbackResult<R>> {
        let body = self.select(payload)?;
        Some(match body {
            Body::Sync(f) => f(context, payload),
            Body::Async(_) => Err(InvocationError::AsyncOnSyncMachine {
                callback: self.name.clone(),
            }
            .into()),
        })
    }

    /// Invoke on an asynchronous machine. `None` means the callback was skipped.
    pub(crate) async fn call(
        &self,
        context: &Arc<C>,
        payload: Option<&Payload>,
        token: &CancellationToken,
    ) -> Option<CallbackResult<R>> {
        let body = self.select(payload)?;
        Some(match body {
            Body::Sync(f) => f(context.as_ref(), payload),
            Body::Async(f) => f(Arc::clone(context), payload.cloned(), token.clone()).await,
        })
    }
}

impl<C, R> Callback<C, R>
where
    C: Send + Sync + 'static,
    R: Send + 'static,
{
    /// Parameterless synchronous callback.
    pub fn sync<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&C) -> CallbackResult<R> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            plain: Some(sync_body(move |context, _payload| f(context))),
            typed: None,
        }
    }

    /// Parameterless asynchronous callback.
    pub fn asynchronous<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<C>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult<R>> + Send + 'static,
    {
        Self {
            name: name.into(),
            plain: Some(async_body(move |context, _payload, token| {
                f(context, token).boxed()
            })),
            typed: None,
        }
    }

    /// Synchronous callback that requires a payload of type `P`.
    pub fn typed<P, F>(name: impl Into<String>, f: F) -> Self
    where
        P: Any + Send + Sync,
        F: Fn(&C, &P) -> CallbackResult<R> + Send + Sync + 'static,
    {
        let name = name.into();
        let kind = PayloadType::of::<P>();
        let label = name.clone();
        let body = sync_body(move |context, payload: Option<&Payload>| {
            match payload.and_then(|p| p.downcast_ref::<P>()) {
                Some(value) => f(context, value),
                None => Err(InvocationError::PayloadMismatch {
                    callback: label.clone(),
                    expected: kind.name(),
                }
                .into()),
            }
        });
        Self {
            name,
            plain: None,
            typed: Some((kind, body)),
        }
    }

    /// Asynchronous callback that requires a payload of type `P`.
    pub fn typed_async<P, F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        P: Any + Clone + Send + Sync,
        F: Fn(Arc<C>, P, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult<R>> + Send + 'static,
    {
        let name = name.into();
        let kind = PayloadType::of::<P>();
        let label = name.clone();
        let body = async_body(move |context, payload: Option<Payload>, token| {
            match payload.as_ref().and_then(|p| p.downcast_ref::<P>()).cloned() {
                Some(value) => f(context, value, token).boxed(),
                None => {
                    let error = InvocationError::PayloadMismatch {
                        callback: label.clone(),
                        expected: kind.name(),
                    };
                    async move { Err::<R, CallbackError>(error.into()) }.boxed()
                }
            }
        });
        Self {
            name,
            plain: None,
            typed: Some((kind, body)),
        }
    }
}

impl<C: Send + Sync + 'static> Callback<C, bool> {
    /// Infallible parameterless guard.
    pub fn predicate<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        Self::sync(name, move |context| Ok(f(context)))
    }

    /// Infallible guard that requires a payload of type `P`.
    pub fn typed_predicate<P, F>(name: impl Into<String>, f: F) -> Self
    where
        P: Any + Send + Sync,
        F: Fn(&C, &P) -> bool + Send + Sync + 'static,
    {
        Self::typed(name, move |context, payload: &P| Ok(f(context, payload)))
    }
}

impl<C: Send + Sync + 'static> Callback<C, ()> {
    /// Infallible parameterless action.
    pub fn effect<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&C) + Send + Sync + 'static,
    {
        Self::sync(name, move |context| {
            f(context);
            Ok(())
        })
    }

    /// Infallible action that requires a payload of type `P`.
    pub fn typed_effect<P, F>(name: impl Into<String>, f: F) -> Self
    where
        P: Any + Send + Sync,
        F: Fn(&C, &P) + Send + Sync + 'static,
    {
        Self::typed(name, move |context, payload: &P| {
            f(context, payload);
            Ok(())
        })
    }
}
