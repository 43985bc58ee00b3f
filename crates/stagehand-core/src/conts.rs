//! Continuation combinators

use std::marker::PhantomData;
use std::sync::Arc;

use crate::cont::Cont;
use crate::error::BoxError;
use crate::stage::Stage;

pub use crate::fault::is_non_fatal;

struct Ignore<T>(PhantomData<fn(T)>);

impl<T> Cont<T> for Ignore<T> {
    fn bind(&self, _value: T) {}

    fn trap(&self, _error: BoxError) {}
}

/// A continuation that discards its outcome
pub fn ignore<T: 'static>() -> Arc<dyn Cont<T>> {
    Arc::new(Ignore(PhantomData))
}

struct FromFn<F>(F);

impl<T, F> Cont<T> for FromFn<F>
where
    F: Fn(Result<T, BoxError>) + Send + Sync,
{
    fn bind(&self, value: T) {
        (self.0)(Ok(value))
    }

    fn trap(&self, error: BoxError) {
        (self.0)(Err(error))
    }
}

/// A continuation over a closure receiving the outcome as a `Result`
pub fn from_fn<T, F>(f: F) -> Arc<dyn Cont<T>>
where
    T: 'static,
    F: Fn(Result<T, BoxError>) + Send + Sync + 'static,
{
    Arc::new(FromFn(f))
}

struct Map<U, F> {
    cont: Arc<dyn Cont<U>>,
    f: F,
}

impl<T, U, F> Cont<T> for Map<U, F>
where
    F: Fn(T) -> U + Send + Sync,
{
    fn bind(&self, value: T) {
        self.cont.bind((self.f)(value))
    }

    fn trap(&self, error: BoxError) {
        self.cont.trap(error)
    }
}

/// Transform bound values before passing them on; errors pass through
pub fn map<T, U, F>(cont: Arc<dyn Cont<U>>, f: F) -> Arc<dyn Cont<T>>
where
    T: 'static,
    U: 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    Arc::new(Map { cont, f })
}

struct Constant<T, U> {
    cont: Arc<dyn Cont<U>>,
    value: U,
    _input: PhantomData<fn(T)>,
}

impl<T, U> Cont<T> for Constant<T, U>
where
    U: Clone + Send + Sync,
{
    fn bind(&self, _value: T) {
        self.cont.bind(self.value.clone())
    }

    fn trap(&self, error: BoxError) {
        self.cont.trap(error)
    }
}

/// Replace any bound value with `value`; errors pass through
pub fn constant<T, U>(cont: Arc<dyn Cont<U>>, value: U) -> Arc<dyn Cont<T>>
where
    T: 'static,
    U: Clone + Send + Sync + 'static,
{
    Arc::new(Constant {
        cont,
        value,
        _input: PhantomData,
    })
}

struct Async<S, T> {
    stage: Arc<S>,
    cont: Arc<dyn Cont<T>>,
}

impl<S, T> Cont<T> for Async<S, T>
where
    S: Stage + 'static,
    T: Send + 'static,
{
    fn bind(&self, value: T) {
        self.stage.call(Arc::clone(&self.cont)).try_bind(value);
    }

    fn trap(&self, error: BoxError) {
        self.stage.call(Arc::clone(&self.cont)).try_trap(error);
    }
}

/// Decouple the completing thread from `cont`: every completion is
/// re-dispatched through a fresh call on `stage`
pub fn async_cont<S, T>(stage: Arc<S>, cont: Arc<dyn Cont<T>>) -> Arc<dyn Cont<T>>
where
    S: Stage + 'static,
    T: Send + 'static,
{
    Arc::new(Async { stage, cont })
}
