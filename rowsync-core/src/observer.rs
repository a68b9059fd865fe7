//! Independently subscribable callback lists.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned when registering a callback. Unique per process, so a
/// single id can be routed to whichever list holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    fn next() -> Self {
        Self(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Ordered list of boxed callbacks of one shape.
pub struct Observers<F: ?Sized> {
    entries: Vec<(ObserverId, Box<F>)>,
}

impl<F: ?Sized> Default for Observers<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ?Sized> Observers<F> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, callback: Box<F>) -> ObserverId {
        let id = ObserverId::next();
        self.entries.push((id, callback));
        id
    }

    /// Returns `true` if the id was registered here.
    pub fn remove(&mut self, id: ObserverId) -> bool {
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

    /// Callbacks in registration order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<F>> {
        self.entries.iter_mut().map(|(_, callback)| callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut observers: Observers<dyn FnMut(usize)> = Observers::new();

        let first = seen.clone();
        observers.insert(Box::new(move |n| first.borrow_mut().push(("first", n))));
        let second = seen.clone();
        observers.insert(Box::new(move |n| second.borrow_mut().push(("second", n))));

        for callback in observers.iter_mut() {
            callback(7);
        }
        assert_eq!(*seen.borrow(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn test_remove_observer() {
        let mut observers: Observers<dyn FnMut()> = Observers::new();
        let a = observers.insert(Box::new(|| {}));
        let b = observers.insert(Box::new(|| {}));
        assert_ne!(a, b);

        assert!(observers.remove(a));
        assert!(!observers.remove(a));
        assert_eq!(observers.len(), 1);
        assert!(observers.remove(b));
        assert!(observers.is_empty());
    }
}
