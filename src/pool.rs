//! The per-origin connection pool.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_channel::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::conn::{Connection, State};
use crate::connect::TlsContext;
use crate::origin::Origin;

/// How often the background sweep looks for expired idle connections.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Pool configuration.
#[derive(Clone, Debug)]
pub struct PoolOptions {
    /// Cap on concurrently in-use connections per origin.
    pub max_conn_per_addr: usize,
    /// How long an idle connection may stay pooled.
    pub keepalive_timeout: Duration,
    /// Wall time allowed for establishing a connection.
    pub connect_timeout: Duration,
    /// Wall time allowed from request hand-off to response completion.
    pub timeout: Duration,
    /// Transport/TLS options used when dialing `https` origins.
    pub context: TlsContext,
}

impl Default for PoolOptions {
    fn default() -> PoolOptions {
        PoolOptions {
            max_conn_per_addr: 128,
            keepalive_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
            context: TlsContext::default(),
        }
    }
}

/// Owns connections keyed by origin.
///
/// A connection is always in exactly one place: the `idle` set, the `using`
/// set (the record itself then lives with its request task), or destroyed.
/// Every recycle emits the origin on the pool's event channel so the
/// dispatcher revisits that origin's queue.
pub(crate) struct Pool {
    inner: Arc<Mutex<PoolInner>>,
}

struct PoolInner {
    max_conn_per_addr: usize,
    keepalive_timeout: Duration,
    idle: HashMap<Origin, Vec<Connection>>,
    using: HashMap<Origin, HashSet<u64>>,
    events: mpsc::UnboundedSender<Origin>,
    sweeping: bool,
}

impl Pool {
    pub(crate) fn new(
        max_conn_per_addr: usize,
        keepalive_timeout: Duration,
        events: mpsc::UnboundedSender<Origin>,
    ) -> Pool {
        Pool {
            inner: Arc::new(Mutex::new(PoolInner {
                max_conn_per_addr,
                keepalive_timeout,
                idle: HashMap::new(),
                using: HashMap::new(),
                events,
                sweeping: false,
            })),
        }
    }

    /// Returns a connection for `origin`, or `None` when the per-origin cap
    /// is reached.
    ///
    /// An idle connection is reused when one is open; otherwise a new record
    /// in the connecting state is returned and the caller dials its
    /// transport. Either way the connection is accounted as in-use and its
    /// request time is refreshed.
    pub(crate) fn fetch(&self, origin: &Origin) -> Option<Connection> {
        let mut guard = self.inner.lock().expect("pool lock");
        let inner = &mut *guard;

        // LIFO: most recently idle first, dropping entries that went stale
        // while pooled.
        let mut reused = None;
        let mut now_empty = false;
        if let Some(list) = inner.idle.get_mut(origin) {
            while let Some(mut conn) = list.pop() {
                if conn.is_open() {
                    conn.touch_request_time();
                    reused = Some(conn);
                    break;
                }
                trace!("removing closed idle connection for {}", origin);
            }
            now_empty = list.is_empty();
        }
        if now_empty {
            inner.idle.remove(origin);
        }

        let conn = match reused {
            Some(conn) => {
                debug!("reuse idle connection for {}", origin);
                conn
            }
            None => {
                let in_use = inner.using.get(origin).map(HashSet::len).unwrap_or(0);
                if in_use >= inner.max_conn_per_addr {
                    trace!("origin {} at capacity ({})", origin, in_use);
                    return None;
                }
                let conn = Connection::new(origin.clone());
                debug!("new connection {} for {}", conn.id(), origin);
                conn
            }
        };

        inner
            .using
            .entry(origin.clone())
            .or_default()
            .insert(conn.id());
        self.spawn_sweep(inner);
        Some(conn)
    }

    /// Takes a connection back from a request. Established connections enter
    /// the idle set; anything else is dropped. The `idle` event for the
    /// origin fires unconditionally so queued work gets another look.
    pub(crate) fn recycle(&self, mut conn: Connection) {
        let origin = conn.origin().clone();
        {
            let mut inner = self.inner.lock().expect("pool lock");
            remove_using(&mut inner.using, &origin, conn.id());

            if conn.state() == State::Established {
                conn.set_idle_now();
                trace!("pooling idle connection {} for {}", conn.id(), origin);
                inner.idle.entry(origin.clone()).or_default().push(conn);
            } else {
                trace!("dropping connection {} for {}", conn.id(), origin);
                drop(conn);
            }
        }
        self.emit_idle(&origin);
    }

    /// Forgets a connection without touching its socket.
    pub(crate) fn delete(&self, conn: &Connection) {
        let mut inner = self.inner.lock().expect("pool lock");
        let origin = conn.origin().clone();
        remove_using(&mut inner.using, &origin, conn.id());
        if let Some(list) = inner.idle.get_mut(&origin) {
            list.retain(|c| c.id() != conn.id());
            if list.is_empty() {
                inner.idle.remove(&origin);
            }
        }
    }

    fn emit_idle(&self, origin: &Origin) {
        let inner = self.inner.lock().expect("pool lock");
        let _ = inner.events.unbounded_send(origin.clone());
    }

    /// Starts the sweep task if connections are tracked and it is not
    /// already running. The task reaps expired idle connections every second
    /// and exits once the pool is empty.
    fn spawn_sweep(&self, inner: &mut PoolInner) {
        if inner.sweeping || (inner.idle.is_empty() && inner.using.is_empty()) {
            return;
        }
        inner.sweeping = true;
        let weak: Weak<Mutex<PoolInner>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(arc) = weak.upgrade() else {
                    return;
                };
                let done = {
                    let mut inner = arc.lock().expect("pool lock");
                    inner.sweep();
                    if inner.idle.is_empty() && inner.using.is_empty() {
                        inner.sweeping = false;
                        true
                    } else {
                        false
                    }
                };
                if done {
                    return;
                }
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self, origin: &Origin) -> usize {
        self.inner
            .lock()
            .expect("pool lock")
            .idle
            .get(origin)
            .map(Vec::len)
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn in_use_count(&self, origin: &Origin) -> usize {
        self.inner
            .lock()
            .expect("pool lock")
            .using
            .get(origin)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn tracked_origins(&self) -> usize {
        let inner = self.inner.lock().expect("pool lock");
        let keys: HashSet<&Origin> = inner.idle.keys().chain(inner.using.keys()).collect();
        keys.len()
    }

    #[cfg(test)]
    pub(crate) fn is_sweeping(&self) -> bool {
        self.inner.lock().expect("pool lock").sweeping
    }
}

impl PoolInner {
    fn sweep(&mut self) {
        let now = Instant::now();
        let keepalive = self.keepalive_timeout;
        self.idle.retain(|origin, list| {
            list.retain(|conn| {
                if !conn.is_open() {
                    trace!("sweep evicting closed connection for {}", origin);
                    return false;
                }
                if now.duration_since(conn.idle_time()) >= keepalive {
                    trace!("sweep evicting expired connection for {}", origin);
                    return false;
                }
                true
            });
            !list.is_empty()
        });
    }
}

fn remove_using(using: &mut HashMap<Origin, HashSet<u64>>, origin: &Origin, id: u64) {
    if let Some(set) = using.get_mut(origin) {
        set.remove(&id);
        if set.is_empty() {
            using.remove(origin);
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().expect("pool lock");
        let idle: usize = inner.idle.values().map(Vec::len).sum();
        let using: usize = inner.using.values().map(HashSet::len).sum();
        f.debug_struct("Pool")
            .field("idle", &idle)
            .field("using", &using)
            .finish()
    }
}
