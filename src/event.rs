//! Named-event pub/sub.
//!
//! Listeners are registered under a string name with [`EventEmitter::on`] or
//! [`EventEmitter::once`] and invoked in insertion order by
//! [`EventEmitter::emit`]. Listener identity is the `Arc` allocation, so the
//! same `Arc` handle passed to [`EventEmitter::off`] removes exactly the
//! entries it was registered with.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A registered listener: shared so the caller can keep a handle for `off`.
pub type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// A hook invoked when listeners are removed; receives the event name, or
/// `None` when every bucket is being cleared at once.
pub type RemoveHook = Arc<dyn Fn(Option<&str>) + Send + Sync>;

struct Entry<A> {
    listener: Listener<A>,
    once: bool,
}

impl<A> Clone for Entry<A> {
    fn clone(&self) -> Self {
        Entry {
            listener: Arc::clone(&self.listener),
            once: self.once,
        }
    }
}

/// Event emitter with persistent and one-shot subscriptions.
pub struct EventEmitter<A> {
    listeners: Mutex<HashMap<String, Vec<Entry<A>>>>,
    remove_hooks: Mutex<Vec<RemoveHook>>,
}

impl<A> Default for EventEmitter<A> {
    fn default() -> Self {
        EventEmitter::new()
    }
}

impl<A> EventEmitter<A> {
    pub fn new() -> EventEmitter<A> {
        EventEmitter {
            listeners: Mutex::new(HashMap::new()),
            remove_hooks: Mutex::new(Vec::new()),
        }
    }

    /// Appends a persistent listener for `name`.
    pub fn on(&self, name: &str, listener: Listener<A>) {
        self.push(name, listener, false);
    }

    /// Appends a listener for `name` that is removed after its first
    /// invocation.
    pub fn once(&self, name: &str, listener: Listener<A>) {
        self.push(name, listener, true);
    }

    fn push(&self, name: &str, listener: Listener<A>, once: bool) {
        let mut listeners = self.listeners.lock().expect("emitter lock");
        listeners
            .entry(name.to_string())
            .or_default()
            .push(Entry { listener, once });
    }

    /// Removes every entry under `name` registered with the same `Arc` as
    /// `listener`, notifying removal hooks once per removed entry. Returns
    /// how many entries were removed.
    pub fn off(&self, name: &str, listener: &Listener<A>) -> usize {
        let removed = {
            let mut listeners = self.listeners.lock().expect("emitter lock");
            let Some(bucket) = listeners.get_mut(name) else {
                return 0;
            };
            let before = bucket.len();
            bucket.retain(|entry| !Arc::ptr_eq(&entry.listener, listener));
            let removed = before - bucket.len();
            if bucket.is_empty() {
                listeners.remove(name);
            }
            removed
        };
        for _ in 0..removed {
            self.notify_removed(Some(name));
        }
        removed
    }

    /// Empties one bucket, or every bucket when `name` is `None`. Removal
    /// hooks fire before the listeners are dropped.
    pub fn off_all(&self, name: Option<&str>) {
        self.notify_removed(name);
        let mut listeners = self.listeners.lock().expect("emitter lock");
        match name {
            Some(name) => {
                listeners.remove(name);
            }
            None => listeners.clear(),
        }
    }

    /// Invokes the listeners registered under `name`, in insertion order,
    /// with `arg`. One-shot entries are deleted after they run. Returns true
    /// iff at least one listener existed when the emit started.
    ///
    /// Iteration happens over a snapshot, so a listener may call `on`/`off`
    /// for this same event without disturbing the current emit.
    pub fn emit(&self, name: &str, arg: &A) -> bool {
        let snapshot: Vec<Entry<A>> = {
            let listeners = self.listeners.lock().expect("emitter lock");
            match listeners.get(name) {
                Some(bucket) if !bucket.is_empty() => bucket.clone(),
                _ => return false,
            }
        };
        for entry in &snapshot {
            (entry.listener)(arg);
            if entry.once {
                self.remove_one_shot(name, &entry.listener);
            }
        }
        true
    }

    fn remove_one_shot(&self, name: &str, listener: &Listener<A>) {
        let mut listeners = self.listeners.lock().expect("emitter lock");
        if let Some(bucket) = listeners.get_mut(name) {
            if let Some(pos) = bucket
                .iter()
                .position(|e| e.once && Arc::ptr_eq(&e.listener, listener))
            {
                bucket.remove(pos);
            }
            if bucket.is_empty() {
                listeners.remove(name);
            }
        }
    }

    /// Registers a hook observing listener removal, the `removeListener`
    /// notification.
    pub fn on_remove_listener(&self, hook: RemoveHook) {
        self.remove_hooks.lock().expect("emitter lock").push(hook);
    }

    fn notify_removed(&self, name: Option<&str>) {
        let hooks: Vec<RemoveHook> = self.remove_hooks.lock().expect("emitter lock").clone();
        for hook in hooks {
            hook(name);
        }
    }

    /// Number of listeners currently registered under `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners
            .lock()
            .expect("emitter lock")
            .get(name)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl<A> fmt::Debug for EventEmitter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.lock().expect("emitter lock");
        let mut names: Vec<(&str, usize)> = listeners
            .iter()
            .map(|(name, bucket)| (name.as_str(), bucket.len()))
            .collect();
        names.sort_unstable();
        f.debug_struct("EventEmitter")
            .field("events", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Listener<u32>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let listener: Listener<u32> = Arc::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (hits, listener)
    }

    #[test]
    fn emit_in_insertion_order() {
        let emitter = EventEmitter::<u32>::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let order = order.clone();
            emitter.on(
                "ev",
                Arc::new(move |_| order.lock().expect("order").push(tag)),
            );
        }
        assert!(emitter.emit("ev", &0));
        assert_eq!(*order.lock().expect("order"), vec!["a", "b", "c"]);
    }

    #[test]
    fn emit_without_listeners_is_false() {
        let emitter = EventEmitter::<u32>::new();
        assert!(!emitter.emit("nothing", &0));
    }

    #[test]
    fn once_runs_exactly_once() {
        let emitter = EventEmitter::<u32>::new();
        let (hits, listener) = counter();
        emitter.once("ev", listener);
        assert!(emitter.emit("ev", &1));
        assert!(!emitter.emit("ev", &2));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_removes_by_identity() {
        let emitter = EventEmitter::<u32>::new();
        let (hits_a, a) = counter();
        let (hits_b, b) = counter();
        emitter.on("ev", a.clone());
        emitter.on("ev", b);
        assert_eq!(emitter.off("ev", &a), 1);
        emitter.emit("ev", &0);
        assert_eq!(hits_a.load(Ordering::SeqCst), 0);
        assert_eq!(hits_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_listener_notification() {
        let emitter = EventEmitter::<u32>::new();
        let removed = Arc::new(Mutex::new(Vec::new()));
        let log = removed.clone();
        emitter.on_remove_listener(Arc::new(move |name| {
            log.lock()
                .expect("log")
                .push(name.map(str::to_string));
        }));

        let (_, a) = counter();
        emitter.on("ev", a.clone());
        emitter.on("ev", a.clone());
        assert_eq!(emitter.off("ev", &a), 2);
        emitter.off_all(None);

        let removed = removed.lock().expect("log");
        assert_eq!(
            *removed,
            vec![Some("ev".to_string()), Some("ev".to_string()), None]
        );
    }

    #[test]
    fn listener_may_unsubscribe_mid_emit() {
        let emitter = Arc::new(EventEmitter::<u32>::new());
        let (hits, victim) = counter();
        let em = emitter.clone();
        let target = victim.clone();
        // The first listener removes the second; the snapshot still runs it
        // for this emit, and the next emit sees it gone.
        emitter.on(
            "ev",
            Arc::new(move |_| {
                em.off("ev", &target);
            }),
        );
        emitter.on("ev", victim);
        emitter.emit("ev", &0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        emitter.emit("ev", &0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
