//! The client facade: queues, dispatch, redirects.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_channel::{mpsc, oneshot};
use futures_util::StreamExt;
use http::header::LOCATION;
use http::Method;
use tracing::debug;
use url::Url;

use crate::conn::{Connection, State};
use crate::connect::{Connect, HttpConnector, TlsContext};
use crate::error::{Error, Parse};
use crate::origin::Origin;
use crate::pool::{Pool, PoolOptions};
use crate::request::{
    Body, Request, RequestEvent, RequestOptions, ERROR, PROGRESS, SUCCESS,
};
use crate::response::Response;

/// An asynchronous HTTP/1.1 client with per-origin connection pooling.
///
/// Requests to the same origin share pooled keep-alive connections, with at
/// most `max_conn_per_addr` in flight per origin; excess requests queue in
/// FIFO order and start as connections free up. `Client` is cheap to clone;
/// clones share the pool and queues.
///
/// A `Client` must be created from within a Tokio runtime: it spawns its
/// queue-driving task on construction.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

/// Configures a [`Client`] before it is built.
pub struct Builder {
    options: PoolOptions,
    connector: Option<Arc<dyn Connect>>,
}

struct ClientInner {
    options: PoolOptions,
    pool: Pool,
    connector: Arc<dyn Connect>,
    queues: Mutex<HashMap<Origin, VecDeque<Task>>>,
}

/// One queued request: everything needed to start it once the pool admits
/// it, plus the completion promise when the caller is awaiting.
struct Task {
    url: Url,
    origin: Origin,
    options: RequestOptions,
    promise: Option<oneshot::Sender<crate::Result<Response>>>,
}

impl Default for Client {
    fn default() -> Client {
        Client::new()
    }
}

impl Client {
    /// A client with default pool options and the TCP/TLS connector.
    pub fn new() -> Client {
        Client::builder().build()
    }

    pub fn builder() -> Builder {
        Builder {
            options: PoolOptions::default(),
            connector: None,
        }
    }

    /// Issues a request described by `options` against `url`.
    ///
    /// Without an `on_success` callback the call suspends until the response
    /// completes and returns `Ok(Some(response))`. With one, the request
    /// runs in the background, outcomes are delivered through the callbacks,
    /// and `Ok(None)` returns immediately. Pre-queue failures (a bad URL)
    /// are delivered through `on_error` on the next tick when that callback
    /// exists, and returned directly otherwise.
    pub async fn request(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> crate::Result<Option<Response>> {
        let parsed = Url::parse(url)
            .map_err(Error::from)
            .and_then(|url| Origin::from_url(&url).map(|origin| (url, origin)));
        let (url, origin) = match parsed {
            Ok(ok) => ok,
            Err(err) => {
                if let Some(cb) = options.on_error.clone() {
                    tokio::spawn(async move { cb(&err) });
                    return Ok(None);
                }
                return Err(err);
            }
        };

        if options.on_success.is_some() {
            self.inner.enqueue(
                Task {
                    url,
                    origin,
                    options,
                    promise: None,
                },
                false,
            );
            return Ok(None);
        }

        let (tx, rx) = oneshot::channel();
        self.inner.enqueue(
            Task {
                url,
                origin,
                options,
                promise: Some(tx),
            },
            false,
        );
        match rx.await {
            Ok(result) => result.map(Some),
            Err(_canceled) => Err(Error::new_canceled()),
        }
    }

    /// `GET` a URL, suspending until the response completes.
    pub async fn get(&self, url: &str) -> crate::Result<Response> {
        match self.request(url, RequestOptions::new()).await? {
            Some(response) => Ok(response),
            None => Err(Error::new_canceled()),
        }
    }

    /// `POST` a body to a URL, suspending until the response completes.
    pub async fn post(&self, url: &str, data: impl Into<Body>) -> crate::Result<Response> {
        let options = RequestOptions::new().method(Method::POST).data(data);
        match self.request(url, options).await? {
            Some(response) => Ok(response),
            None => Err(Error::new_canceled()),
        }
    }

    /// Starts an empty [`Batch`](crate::Batch) bound to this client.
    pub fn batch(&self) -> crate::Batch {
        crate::Batch::new(self)
    }
}

impl Builder {
    /// Cap on concurrently in-use connections per origin (default 128).
    pub fn max_conn_per_addr(mut self, max: usize) -> Builder {
        self.options.max_conn_per_addr = max;
        self
    }

    /// How long an idle connection may stay pooled (default 15s).
    pub fn keepalive_timeout(mut self, timeout: Duration) -> Builder {
        self.options.keepalive_timeout = timeout;
        self
    }

    /// Wall time allowed for establishing a connection (default 30s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Builder {
        self.options.connect_timeout = timeout;
        self
    }

    /// Wall time allowed from hand-off to response completion (default 30s).
    pub fn timeout(mut self, timeout: Duration) -> Builder {
        self.options.timeout = timeout;
        self
    }

    /// TLS options used when dialing `https` origins.
    pub fn tls_context(mut self, context: TlsContext) -> Builder {
        self.options.context = context;
        self
    }

    /// Replaces the pool options wholesale.
    pub fn pool_options(mut self, options: PoolOptions) -> Builder {
        self.options = options;
        self
    }

    /// Substitutes the transport dialer.
    pub fn connector(mut self, connector: impl Connect + 'static) -> Builder {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn build(self) -> Client {
        let (events_tx, mut events_rx) = mpsc::unbounded();
        let pool = Pool::new(
            self.options.max_conn_per_addr,
            self.options.keepalive_timeout,
            events_tx,
        );
        let inner = Arc::new(ClientInner {
            pool,
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(HttpConnector::new())),
            options: self.options,
            queues: Mutex::new(HashMap::new()),
        });

        // Revisit an origin's queue every time the pool frees a connection
        // for it. Holding only a weak reference lets the task die with the
        // last client handle.
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(origin) = events_rx.next().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.process(&origin);
            }
        });

        Client { inner }
    }
}

impl ClientInner {
    fn enqueue(self: &Arc<Self>, task: Task, front: bool) {
        let origin = task.origin.clone();
        {
            let mut queues = self.queues.lock().expect("queue lock");
            let queue = queues.entry(origin.clone()).or_default();
            if front {
                queue.push_front(task);
            } else {
                queue.push_back(task);
            }
        }
        self.process(&origin);
    }

    /// Starts the head task of `origin`'s queue if the pool admits one.
    /// When admission is denied the task stays queued; the pool's next
    /// `idle` event for this origin drives another attempt.
    fn process(self: &Arc<Self>, origin: &Origin) {
        let work = {
            let mut queues = self.queues.lock().expect("queue lock");
            let Some(queue) = queues.get_mut(origin) else {
                return;
            };
            if queue.is_empty() {
                queues.remove(origin);
                return;
            }
            let Some(conn) = self.pool.fetch(origin) else {
                return;
            };
            let task = queue.pop_front();
            if queue.is_empty() {
                queues.remove(origin);
            }
            task.map(|task| (task, conn))
        };

        if let Some((task, conn)) = work {
            let inner = Arc::clone(self);
            tokio::spawn(run_request(inner, task, conn));
        }
    }
}

async fn run_request(inner: Arc<ClientInner>, mut task: Task, mut conn: Connection) {
    let mut request = match Request::build(&task.url, &task.origin, &task.options) {
        Ok(request) => request,
        Err(err) => {
            conn.close();
            inner.pool.recycle(conn);
            if let Some(cb) = task.options.on_error.clone() {
                cb(&err);
            } else if let Some(promise) = task.promise.take() {
                let _ = promise.send(Err(err));
            }
            return;
        }
    };
    wire_callbacks(&request, &task.options);

    if conn.state() == State::Connecting {
        if let Err(err) = dial(&inner, &mut conn).await {
            conn.close();
            inner.pool.recycle(conn);
            deliver_error(&request, task, err);
            return;
        }
    }

    match drive(&inner, &mut request, &mut conn).await {
        Ok((response, reusable)) => {
            if !reusable {
                conn.mark_closing();
            }
            inner.pool.recycle(conn);
            finish_success(&inner, task, &request, response);
        }
        Err(err) => {
            // A failed connection is never recycled back to idle.
            conn.close();
            inner.pool.recycle(conn);
            deliver_error(&request, task, err);
        }
    }
}

/// Installs the caller's callbacks on the request's event surface.
fn wire_callbacks(request: &Request, options: &RequestOptions) {
    let events = request.events();
    if let Some(cb) = options.on_success.clone() {
        events.once(
            SUCCESS,
            Arc::new(move |event| {
                if let RequestEvent::Success(response) = event {
                    cb(response);
                }
            }),
        );
    }
    if let Some(cb) = options.on_error.clone() {
        events.once(
            ERROR,
            Arc::new(move |event| {
                if let RequestEvent::Error(err) = event {
                    cb(err);
                }
            }),
        );
    }
    if let Some(cb) = options.on_progress.clone() {
        events.on(
            PROGRESS,
            Arc::new(move |event| {
                if let RequestEvent::Progress(data) = event {
                    cb(data);
                }
            }),
        );
    }
}

/// Dials a transport for `conn`, bounded by `connect_timeout`.
async fn dial(inner: &Arc<ClientInner>, conn: &mut Connection) -> crate::Result<()> {
    let origin = conn.origin().clone();
    let tls = origin.is_tls().then(|| inner.options.context.clone());
    let connect_timeout = inner.options.connect_timeout;
    let dialing = inner.connector.connect(&origin, tls.as_ref());
    match tokio::time::timeout(connect_timeout, dialing).await {
        Ok(Ok(transport)) => {
            if conn.state() == State::Connecting {
                conn.established(transport);
            } else {
                conn.reconnected(transport);
            }
            Ok(())
        }
        Ok(Err(err)) => Err(Error::new_connect(err)),
        Err(_elapsed) => Err(Error::new_connect_timeout(
            origin.to_string(),
            connect_timeout.as_secs(),
        )),
    }
}

/// Drives the request on its connection, retrying once on a fresh dial when
/// a pooled connection turns out to have gone stale before any response
/// byte arrived.
async fn drive(
    inner: &Arc<ClientInner>,
    request: &mut Request,
    conn: &mut Connection,
) -> crate::Result<(Response, bool)> {
    let was_reused = conn.is_reused();
    match drive_once(inner, request, conn).await {
        Err(err)
            if was_reused && !request.received_any() && (err.is_io() || err.is_closed()) =>
        {
            debug!("retrying on fresh connection after: {}", err);
            conn.close();
            request.rewind();
            dial(inner, conn).await?;
            drive_once(inner, request, conn).await
        }
        other => other,
    }
}

async fn drive_once(
    inner: &Arc<ClientInner>,
    request: &mut Request,
    conn: &mut Connection,
) -> crate::Result<(Response, bool)> {
    let timeout = inner.options.timeout;
    let result = {
        let Some(io) = conn.transport_mut() else {
            return Err(Error::new_closed());
        };
        tokio::time::timeout(timeout, request.dispatch(io)).await
    };
    match result {
        Ok(outcome) => outcome,
        Err(_elapsed) => Err(Error::new_read_timeout(
            conn.origin().to_string(),
            timeout.as_secs(),
        )),
    }
}

/// Redirect resolution and final delivery. The connection has already been
/// recycled by the time this runs, so a same-origin redirect can reuse it
/// immediately.
fn finish_success(inner: &Arc<ClientInner>, mut task: Task, request: &Request, response: Response) {
    if response.status().is_redirection() && response.headers().contains_key(LOCATION) {
        task.options.redirect_count += 1;
        if task.options.redirect_count > task.options.redirect_max() {
            deliver_error(request, task, Error::new_too_many_redirects());
            return;
        }
        let resolved = match response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
        {
            Some(location) => task.url.join(location).map_err(Error::from),
            None => Err(Error::new_parse(Parse::Header)),
        }
        .and_then(|next| Origin::from_url(&next).map(|origin| (next, origin)));

        match resolved {
            Ok((next, origin)) => {
                debug!("redirect {} -> {}", task.url.as_str(), next.as_str());
                task.url = next;
                task.origin = origin;
                // Head-insert: the redirected request does not requeue
                // behind newer submissions at the resolved origin.
                inner.enqueue(task, true);
            }
            Err(err) => deliver_error(request, task, err),
        }
        return;
    }

    let event = RequestEvent::Success(response);
    request.events().emit(SUCCESS, &event);
    if let Some(promise) = task.promise.take() {
        if let RequestEvent::Success(response) = event {
            let _ = promise.send(Ok(response));
        }
    }
}

/// Exactly-once error delivery: the `error` event fires for any wired
/// callback, and an awaiting caller is resumed with the error.
fn deliver_error(request: &Request, mut task: Task, err: Error) {
    let event = RequestEvent::Error(err);
    request.events().emit(ERROR, &event);
    if let Some(promise) = task.promise.take() {
        if let RequestEvent::Error(err) = event {
            let _ = promise.send(Err(err));
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("pool", &self.inner.pool)
            .finish()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("options", &self.options)
            .finish()
    }
}
