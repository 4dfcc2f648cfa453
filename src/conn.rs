//! Pooled connection records.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::Instant;

use crate::connect::BoxTransport;
use crate::origin::Origin;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Socket lifecycle, as observed by the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum State {
    /// Created but not yet dialed to completion.
    Connecting,
    /// Ready to carry a request, or idle in the pool.
    Established,
    /// Still open, but marked not reusable; the next recycle drops it.
    Closing,
    /// The transport is gone.
    Closed,
}

/// One TCP (possibly TLS-wrapped) connection to an origin.
///
/// The transport moves with the record: while a request is in flight the
/// request task owns the `Connection` exclusively, and handing it back via
/// `Pool::recycle` is what clears it of any per-request handling.
pub(crate) struct Connection {
    id: u64,
    origin: Origin,
    state: State,
    transport: Option<BoxTransport>,
    connect_time: Instant,
    idle_time: Instant,
    request_time: Instant,
    /// True when this record came out of the idle set rather than a dial.
    reused: bool,
}

impl Connection {
    pub(crate) fn new(origin: Origin) -> Connection {
        let now = Instant::now();
        Connection {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            origin,
            state: State::Connecting,
            transport: None,
            connect_time: now,
            idle_time: now,
            request_time: now,
            reused: false,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn origin(&self) -> &Origin {
        &self.origin
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state == State::Established && self.transport.is_some()
    }

    pub(crate) fn is_reused(&self) -> bool {
        self.reused
    }

    /// Attach a freshly dialed transport.
    pub(crate) fn established(&mut self, transport: BoxTransport) {
        self.transport = Some(transport);
        self.state = State::Established;
    }

    /// Replace the transport after a redial; the record keeps its identity
    /// and its place in the pool's in-use set.
    pub(crate) fn reconnected(&mut self, transport: BoxTransport) {
        self.transport = Some(transport);
        self.state = State::Established;
        self.reused = false;
        self.connect_time = Instant::now();
    }

    pub(crate) fn transport_mut(&mut self) -> Option<&mut BoxTransport> {
        self.transport.as_mut()
    }

    /// Keep the socket open but refuse further reuse.
    pub(crate) fn mark_closing(&mut self) {
        if self.state == State::Established {
            self.state = State::Closing;
        }
    }

    /// Drop the transport, closing the socket.
    pub(crate) fn close(&mut self) {
        self.transport = None;
        self.state = State::Closed;
    }

    pub(crate) fn touch_request_time(&mut self) {
        self.request_time = Instant::now();
        self.reused = true;
    }

    pub(crate) fn set_idle_now(&mut self) {
        self.idle_time = Instant::now();
        self.reused = false;
    }

    pub(crate) fn idle_time(&self) -> Instant {
        self.idle_time
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("state", &self.state)
            .field("age", &self.connect_time.elapsed())
            .field("busy_for", &self.request_time.elapsed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::BoxTransport;
    use crate::origin::Origin;
    use url::Url;

    fn conn() -> Connection {
        let url = Url::parse("http://example.com/").expect("url");
        Connection::new(Origin::from_url(&url).expect("origin"))
    }

    #[tokio::test]
    async fn lifecycle_states() {
        let mut c = conn();
        assert_eq!(c.state(), State::Connecting);
        assert!(!c.is_open());

        let (_, transport) = tokio::io::duplex(64);
        c.established(Box::new(transport) as BoxTransport);
        assert_eq!(c.state(), State::Established);
        assert!(c.is_open());

        c.mark_closing();
        assert_eq!(c.state(), State::Closing);
        assert!(!c.is_open());

        c.close();
        assert_eq!(c.state(), State::Closed);
        assert!(c.transport_mut().is_none());
    }

    #[tokio::test]
    async fn reconnect_clears_reused() {
        let mut c = conn();
        let (_, transport) = tokio::io::duplex(64);
        c.established(Box::new(transport) as BoxTransport);
        c.touch_request_time();
        assert!(c.is_reused());

        c.close();
        let (_, transport) = tokio::io::duplex(64);
        c.reconnected(Box::new(transport) as BoxTransport);
        assert!(!c.is_reused());
        assert!(c.is_open());
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(conn().id(), conn().id());
    }
}
