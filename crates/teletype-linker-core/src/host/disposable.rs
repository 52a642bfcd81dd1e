//! Disposable subscriptions
//!
//! Host and capability subscriptions hand back a [`Disposable`]; disposing it
//! detaches the callback. Disposal is explicit and happens at most once.

use std::fmt;
use std::sync::{Mutex, PoisonError};

type DisposeFn = Box<dyn FnOnce() + Send>;

/// A single subscription that can be torn down once
pub struct Disposable {
    action: Mutex<Option<DisposeFn>>,
}

impl Disposable {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    /// A disposable with nothing to tear down
    pub fn empty() -> Self {
        Self {
            action: Mutex::new(None),
        }
    }

    pub fn dispose(&self) {
        let action = self
            .action
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(action) = action {
            action();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.action
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A bag of subscriptions disposed together
#[derive(Debug, Default)]
pub struct CompositeDisposable {
    inner: Mutex<CompositeState>,
}

#[derive(Debug, Default)]
struct CompositeState {
    items: Vec<Disposable>,
    disposed: bool,
}

impl CompositeDisposable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `disposable`; disposes it immediately if the bag is already gone
    pub fn add(&self, disposable: Disposable) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if state.disposed {
            drop(state);
            disposable.dispose();
            return;
        }
        state.items.push(disposable);
    }

    pub fn dispose(&self) {
        let items = {
            let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            state.disposed = true;
            std::mem::take(&mut state.items)
        };
        for item in items {
            item.dispose();
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_disposed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> Disposable {
        let counter = counter.clone();
        Disposable::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_dispose_runs_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let disposable = counting(&counter);

        assert!(!disposable.is_disposed());
        disposable.dispose();
        disposable.dispose();

        assert!(disposable.is_disposed());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_composite_disposes_everything() {
        let counter = Arc::new(AtomicUsize::new(0));
        let bag = CompositeDisposable::new();
        bag.add(counting(&counter));
        bag.add(counting(&counter));
        assert_eq!(bag.len(), 2);

        bag.dispose();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(bag.is_disposed());
        assert!(bag.is_empty());

        // Late additions are torn down on arrival
        bag.add(counting(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(bag.is_empty());
    }
}
