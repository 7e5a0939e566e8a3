//! Observer notification for session state transitions.
//!
//! Observers are invoked in registration order with an immutable snapshot of the
//! session. A failing or panicking observer is logged and does not stop the rest.

use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use super::models::Session;

pub type ObserverResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Reacts to session transitions. Implementations must not call back into the
/// cache; they run while its delivery lock is held.
pub trait SessionObserver: Send + Sync {
    fn on_session(&self, session: &Session) -> ObserverResult;
}

impl<F> SessionObserver for F
where
    F: Fn(&Session) -> ObserverResult + Send + Sync,
{
    fn on_session(&self, session: &Session) -> ObserverResult {
        self(session)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct ObserverList {
    entries: Vec<(SubscriptionId, Arc<dyn SessionObserver>)>,
    next_id: u64,
}

impl ObserverList {
    /// Appends `observer`. Registering the same observer twice invokes it twice.
    pub fn subscribe(&mut self, observer: Arc<dyn SessionObserver>) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.entries.push((id, observer));
        id
    }

    /// Appends `observer` unless the same `Arc` is already registered.
    ///
    /// Returns the subscription and whether it was newly created.
    pub fn subscribe_unique(&mut self, observer: Arc<dyn SessionObserver>) -> (SubscriptionId, bool) {
        let existing = self
            .entries
            .iter()
            .find(|(_, registered)| same_observer(registered, &observer))
            .map(|(id, _)| *id);
        match existing {
            Some(id) => (id, false),
            None => (self.subscribe(observer), true),
        }
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Observers in invocation order, so they can be called without holding a lock.
    pub fn snapshot(&self) -> Vec<Arc<dyn SessionObserver>> {
        self.entries
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }
}

fn same_observer(a: &Arc<dyn SessionObserver>, b: &Arc<dyn SessionObserver>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Invokes every observer with `session`; returns how many failed.
pub fn notify(observers: &[Arc<dyn SessionObserver>], session: &Session) -> usize {
    let mut failures = 0;
    for (index, observer) in observers.iter().enumerate() {
        match panic::catch_unwind(AssertUnwindSafe(|| observer.on_session(session))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                failures += 1;
                error!(observer = index, error = %err, "session observer failed");
            }
            Err(_) => {
                failures += 1;
                error!(observer = index, "session observer panicked");
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Arc<dyn SessionObserver> {
        let log = Arc::clone(log);
        Arc::new(move |_: &Session| -> ObserverResult {
            log.lock().expect("log").push(name);
            Ok(())
        })
    }

    #[test]
    fn notifies_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut list = ObserverList::default();
        list.subscribe(recorder(&log, "nav"));
        list.subscribe(recorder(&log, "dashboard"));

        notify(&list.snapshot(), &Session::signed_out());
        assert_eq!(*log.lock().expect("log"), vec!["nav", "dashboard"]);
    }

    #[test]
    fn duplicate_subscription_is_invoked_twice() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let observer = recorder(&log, "nav");
        let mut list = ObserverList::default();
        list.subscribe(Arc::clone(&observer));
        list.subscribe(observer);

        notify(&list.snapshot(), &Session::signed_out());
        assert_eq!(*log.lock().expect("log"), vec!["nav", "nav"]);
    }

    #[test]
    fn unique_subscription_is_deduplicated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let observer = recorder(&log, "nav");
        let mut list = ObserverList::default();
        let (first, created) = list.subscribe_unique(Arc::clone(&observer));
        assert!(created);
        let (second, created) = list.subscribe_unique(observer);
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn failing_observers_do_not_stop_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut list = ObserverList::default();
        list.subscribe(Arc::new(|_: &Session| -> ObserverResult {
            Err("render failed".into())
        }));
        list.subscribe(Arc::new(|_: &Session| -> ObserverResult { panic!("boom") }));
        list.subscribe(recorder(&log, "last"));

        let failures = notify(&list.snapshot(), &Session::signed_out());
        assert_eq!(failures, 2);
        assert_eq!(*log.lock().expect("log"), vec!["last"]);
    }

    #[test]
    fn unsubscribe_removes_only_that_entry() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut list = ObserverList::default();
        let nav = list.subscribe(recorder(&log, "nav"));
        list.subscribe(recorder(&log, "dashboard"));

        assert!(list.unsubscribe(nav));
        assert!(!list.unsubscribe(nav));
        notify(&list.snapshot(), &Session::signed_out());
        assert_eq!(*log.lock().expect("log"), vec!["dashboard"]);
    }
}
