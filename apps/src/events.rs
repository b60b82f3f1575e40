//! State-change notifications.
//!
//! Outer layers (shell, cloud reporting, UI) subscribe here instead of
//! polling. Callbacks run after the platform lock is released, so an
//! observer may call back into the platform.

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use super::lifecycle::AppState;
use super::registry::AppId;

/// One lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub app_id: AppId,
    pub old: AppState,
    pub new: AppState,
}

/// Handle returned by [`Observers::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u32);

type Callback = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Registered state-change callbacks.
pub struct Observers {
    list: Mutex<Vec<(ObserverId, Callback)>>,
    next_id: Mutex<u32>,
}

impl Observers {
    pub const fn new() -> Self {
        Observers {
            list: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        let id = {
            let mut next = self.next_id.lock();
            let id = ObserverId(*next);
            *next = next.wrapping_add(1);
            id
        };
        self.list.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut list = self.list.lock();
        let before = list.len();
        list.retain(|(i, _)| *i != id);
        list.len() != before
    }

    pub fn len(&self) -> usize {
        self.list.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `changes` in order to every subscriber.
    pub fn notify(&self, changes: &[StateChange]) {
        if changes.is_empty() {
            return;
        }
        let callbacks: Vec<Callback> = self.list.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for change in changes {
            for cb in &callbacks {
                cb(change);
            }
        }
    }
}

impl Default for Observers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(id: u32, old: AppState, new: AppState) -> StateChange {
        StateChange {
            app_id: AppId(id),
            old,
            new,
        }
    }

    #[test]
    fn test_every_subscriber_sees_every_change() {
        let observers = Observers::new();
        let a = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::new(Mutex::new(0usize));
        let a2 = a.clone();
        let b2 = b.clone();
        observers.subscribe(move |c| a2.lock().push(*c));
        observers.subscribe(move |_| *b2.lock() += 1);

        observers.notify(&[
            change(1, AppState::Installed, AppState::Running),
            change(1, AppState::Running, AppState::Stopped),
        ]);
        assert_eq!(a.lock().len(), 2);
        assert_eq!(a.lock()[1].new, AppState::Stopped);
        assert_eq!(*b.lock(), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let observers = Observers::new();
        let hits = Arc::new(Mutex::new(0usize));
        let h = hits.clone();
        let id = observers.subscribe(move |_| *h.lock() += 1);
        assert!(observers.unsubscribe(id));
        assert!(!observers.unsubscribe(id));
        observers.notify(&[change(1, AppState::New, AppState::Installed)]);
        assert_eq!(*hits.lock(), 0);
        assert!(observers.is_empty());
    }
}
