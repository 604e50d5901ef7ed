use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use crate::deferred::Deferred;

struct Tally<T, E> {
    waiting: usize,
    slots: Vec<Option<Result<T, E>>>,
}

/// Fires once every member has fired, carrying each member's outcome in the
/// order the members were given, whatever order they completed in.
///
/// Dereferences to the group's own [`Deferred`], so callbacks are attached the
/// same way as on a single result. An empty group fires immediately.
pub struct DeferredGroup<T, E: fmt::Debug> {
    deferred: Deferred<Vec<Result<T, E>>, E>,
}

impl<T, E> DeferredGroup<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    pub fn new(members: &[Deferred<T, E>]) -> Self {
        let deferred = Deferred::new();

        if members.is_empty() {
            deferred.resolve(Vec::new()).ok();
            return Self { deferred };
        }

        let tally = Arc::new(Mutex::new(Tally {
            waiting: members.len(),
            slots: vec![None; members.len()],
        }));

        for (position, member) in members.iter().enumerate() {
            let tally = Arc::clone(&tally);
            let group = deferred.clone();

            member.add_both(move |outcome| {
                let finished = {
                    let mut tally = tally.lock().unwrap_or_else(PoisonError::into_inner);
                    tally.slots[position] = Some(outcome.clone());
                    tally.waiting -= 1;
                    (tally.waiting == 0)
                        .then(|| tally.slots.drain(..).flatten().collect::<Vec<_>>())
                };

                if let Some(results) = finished {
                    if let Err(e) = group.resolve(results) {
                        tracing::warn!(error = %e, "Deferred group fired twice");
                    }
                }
                outcome
            });
        }

        Self { deferred }
    }

    /// Handle to the group's result, detached from the member list.
    pub fn deferred(&self) -> Deferred<Vec<Result<T, E>>, E> {
        self.deferred.clone()
    }
}

impl<T, E: fmt::Debug> Deref for DeferredGroup<T, E> {
    type Target = Deferred<Vec<Result<T, E>>, E>;

    fn deref(&self) -> &Self::Target {
        &self.deferred
    }
}
