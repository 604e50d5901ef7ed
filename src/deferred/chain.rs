use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::DeferredError;

type SuccessFn<T, E> = Box<dyn FnOnce(T) -> Result<T, E> + Send>;
type FailureFn<T, E> = Box<dyn FnOnce(E) -> Result<T, E> + Send>;
type BothFn<T, E> = Box<dyn FnOnce(Result<T, E>) -> Result<T, E> + Send>;

enum Callbacks<T, E> {
    Pair {
        on_success: Option<SuccessFn<T, E>>,
        on_failure: Option<FailureFn<T, E>>,
    },
    Both(BothFn<T, E>),
}

impl<T, E> Callbacks<T, E> {
    /// Feed `current` through whichever handler matches its kind. A missing
    /// handler passes the value through untouched.
    fn run(self, current: Result<T, E>) -> Result<T, E> {
        match (self, current) {
            (Callbacks::Pair { on_success: Some(f), .. }, Ok(value)) => f(value),
            (Callbacks::Pair { on_failure: Some(f), .. }, Err(error)) => f(error),
            (Callbacks::Pair { .. }, current) => current,
            (Callbacks::Both(f), current) => f(current),
        }
    }
}

struct State<T, E: fmt::Debug> {
    fired: bool,
    succeeded: bool,
    /// `None` before firing and while a handler holds the value.
    outcome: Option<Result<T, E>>,
    chain: VecDeque<Callbacks<T, E>>,
    running: bool,
}

impl<T, E: fmt::Debug> Drop for State<T, E> {
    fn drop(&mut self) {
        if let Some(Err(error)) = &self.outcome {
            tracing::warn!(error = ?error, "Deferred failure was never handled");
        }
    }
}

/// A result that arrives later, with success and failure continuations.
///
/// Fires at most once through [`resolve`](Self::resolve) or
/// [`reject`](Self::reject). Each attached pair sees the outcome left by the
/// pair before it: a success handler returning `Err` switches the chain to
/// failure, and a failure handler returning `Ok` recovers it. Pairs attached
/// after firing run immediately.
///
/// Clones share the same underlying result. Dropping the last handle while the
/// chain ends in failure logs a warning.
pub struct Deferred<T, E: fmt::Debug> {
    state: Arc<Mutex<State<T, E>>>,
}

impl<T, E: fmt::Debug> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T, E: fmt::Debug> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Deferred")
            .field("fired", &state.fired)
            .field("succeeded", &state.succeeded)
            .field("pending_callbacks", &state.chain.len())
            .finish()
    }
}

impl<T, E: fmt::Debug> Deferred<T, E> {
    fn lock(&self) -> MutexGuard<'_, State<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T, E> Default for Deferred<T, E>
where
    T: Send + 'static,
    E: fmt::Debug + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Deferred<T, E>
where
    T: Send + 'static,
    E: fmt::Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                fired: false,
                succeeded: false,
                outcome: None,
                chain: VecDeque::new(),
                running: false,
            })),
        }
    }

    /// A deferred that has already succeeded with `value`.
    pub fn resolved(value: T) -> Self {
        let deferred = Self::new();
        deferred.fire(Ok(value)).ok();
        deferred
    }

    /// A deferred that has already failed with `error`.
    pub fn rejected(error: E) -> Self {
        let deferred = Self::new();
        deferred.fire(Err(error)).ok();
        deferred
    }

    pub fn add_callbacks<S, F>(&self, on_success: S, on_failure: F) -> &Self
    where
        S: FnOnce(T) -> Result<T, E> + Send + 'static,
        F: FnOnce(E) -> Result<T, E> + Send + 'static,
    {
        self.push(Callbacks::Pair {
            on_success: Some(Box::new(on_success)),
            on_failure: Some(Box::new(on_failure)),
        })
    }

    /// Attach a success handler; failures pass through it unchanged.
    pub fn add_callback<S>(&self, on_success: S) -> &Self
    where
        S: FnOnce(T) -> Result<T, E> + Send + 'static,
    {
        self.push(Callbacks::Pair {
            on_success: Some(Box::new(on_success)),
            on_failure: None,
        })
    }

    /// Attach a failure handler; successes pass through it unchanged.
    pub fn add_errback<F>(&self, on_failure: F) -> &Self
    where
        F: FnOnce(E) -> Result<T, E> + Send + 'static,
    {
        self.push(Callbacks::Pair {
            on_success: None,
            on_failure: Some(Box::new(on_failure)),
        })
    }

    /// Attach one handler that sees either outcome.
    pub fn add_both<B>(&self, handler: B) -> &Self
    where
        B: FnOnce(Result<T, E>) -> Result<T, E> + Send + 'static,
    {
        self.push(Callbacks::Both(Box::new(handler)))
    }

    pub fn resolve(&self, value: T) -> Result<(), DeferredError> {
        self.fire(Ok(value))
    }

    pub fn reject(&self, error: E) -> Result<(), DeferredError> {
        self.fire(Err(error))
    }

    pub fn is_fired(&self) -> bool {
        self.lock().fired
    }

    /// Whether the chain currently holds a success value.
    pub fn succeeded(&self) -> Result<bool, DeferredError> {
        let state = self.lock();
        if !state.fired {
            return Err(DeferredError::NotFired);
        }
        Ok(state.succeeded)
    }

    /// A copy of the current value, once fired and while no handler is running.
    pub fn outcome(&self) -> Option<Result<T, E>>
    where
        T: Clone,
        E: Clone,
    {
        self.lock().outcome.clone()
    }

    fn push(&self, callbacks: Callbacks<T, E>) -> &Self {
        let fired = {
            let mut state = self.lock();
            state.chain.push_back(callbacks);
            state.fired
        };
        if fired {
            self.drain();
        }
        self
    }

    fn fire(&self, outcome: Result<T, E>) -> Result<(), DeferredError> {
        {
            let mut state = self.lock();
            if state.fired {
                return Err(DeferredError::AlreadyFired);
            }
            state.fired = true;
            state.succeeded = outcome.is_ok();
            state.outcome = Some(outcome);
        }
        self.drain();
        Ok(())
    }

    /// Run queued callbacks one at a time without holding the lock, so
    /// handlers may attach further callbacks to this same deferred.
    fn drain(&self) {
        loop {
            let (callbacks, current) = {
                let mut state = self.lock();
                if state.running {
                    // The active drain will pick up anything queued meanwhile.
                    return;
                }
                let Some(current) = state.outcome.take() else {
                    return;
                };
                let Some(callbacks) = state.chain.pop_front() else {
                    state.outcome = Some(current);
                    return;
                };
                state.running = true;
                (callbacks, current)
            };

            let next = callbacks.run(current);

            let mut state = self.lock();
            state.succeeded = next.is_ok();
            state.outcome = Some(next);
            state.running = false;
        }
    }
}
