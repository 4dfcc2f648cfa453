#![deny(missing_debug_implementations)]

//! # polyfetch
//!
//! An asynchronous HTTP/1.1 client that issues many concurrent requests
//! from one process while amortising TCP/TLS handshakes across requests to
//! the same origin.
//!
//! - Connections are pooled per origin (`scheme`, `host`, `port`) and
//!   reused when both sides agree on `Connection: keep-alive` over
//!   HTTP/1.1.
//! - Per-origin concurrency is capped; excess requests queue in FIFO order
//!   and start as connections free up.
//! - Connect, read, and keep-alive timeouts apply independently.
//! - 3xx responses with a `Location` header are followed, up to a
//!   configurable limit.
//! - Outcomes surface either by awaiting, or through
//!   `success`/`error`/`progress` callbacks, or as an ordered batch.
//!
//! ```no_run
//! #[tokio::main]
//! async fn main() -> Result<(), polyfetch::Error> {
//!     let client = polyfetch::Client::new();
//!     let resp = client.get("http://example.com/").await?;
//!     println!("{} {}", resp.status(), resp.text());
//!     Ok(())
//! }
//! ```

mod batch;
mod client;
mod conn;
mod connect;
mod error;
mod event;
mod origin;
mod pool;
mod proto;
mod request;
mod response;

pub use crate::batch::Batch;
pub use crate::client::{Builder, Client};
pub use crate::connect::{BoxTransport, Connect, Connecting, HttpConnector, TlsContext, Transport};
pub use crate::error::{Error, Result};
pub use crate::event::{EventEmitter, Listener, RemoveHook};
pub use crate::origin::{Origin, Scheme};
pub use crate::pool::PoolOptions;
pub use crate::proto::encode::Part;
pub use crate::request::{Body, Query, RequestEvent, RequestOptions};
pub use crate::response::Response;
