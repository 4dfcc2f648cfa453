//! The `Connect` trait, and supporting types.
//!
//! This module contains:
//!
//! - A default [`HttpConnector`] that establishes connections over TCP and
//!   optionally wraps them in TLS.
//! - The [`Connect`] trait to build custom connectors, which is how tests
//!   substitute in-memory transports for real sockets.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::origin::Origin;

/// The connected IO stream: any bidirectional byte stream works.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

/// A boxed transport, as stored on pooled connections.
pub type BoxTransport = Box<dyn Transport>;

/// A future resolving to a ready transport.
pub type Connecting = Pin<Box<dyn Future<Output = io::Result<BoxTransport>> + Send>>;

/// Connect to an origin, returning an IO transport.
pub trait Connect: Send + Sync {
    /// Dial `origin`. When `tls` is given the returned transport must speak
    /// TLS negotiated with those options.
    fn connect(&self, origin: &Origin, tls: Option<&TlsContext>) -> Connecting;
}

/// Transport-level TLS options, carried in the pool configuration.
///
/// The defaults skip certificate and hostname verification, matching the
/// permissive behavior expected of an internal-service client. Override them
/// for anything that faces hosts you do not control.
#[derive(Clone, Debug)]
pub struct TlsContext {
    pub verify_peer: bool,
    pub verify_peer_name: bool,
    pub allow_self_signed: bool,
}

impl Default for TlsContext {
    fn default() -> TlsContext {
        TlsContext {
            verify_peer: false,
            verify_peer_name: false,
            allow_self_signed: true,
        }
    }
}

impl TlsContext {
    fn build(&self) -> Result<native_tls::TlsConnector, native_tls::Error> {
        native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(!self.verify_peer || self.allow_self_signed)
            .danger_accept_invalid_hostnames(!self.verify_peer_name)
            .build()
    }
}

/// The default connector: TCP with `TCP_NODELAY`, then a TLS handshake when
/// the origin calls for one.
#[derive(Clone, Debug, Default)]
pub struct HttpConnector {
    _private: (),
}

impl HttpConnector {
    pub fn new() -> HttpConnector {
        HttpConnector { _private: () }
    }
}

impl Connect for HttpConnector {
    fn connect(&self, origin: &Origin, tls: Option<&TlsContext>) -> Connecting {
        let host = origin.host().to_string();
        let port = origin.port();
        let tls = tls.cloned();
        Box::pin(async move {
            let stream = TcpStream::connect((host.as_str(), port)).await?;
            let _ = stream.set_nodelay(true);
            match tls {
                None => Ok(Box::new(stream) as BoxTransport),
                Some(context) => {
                    let connector = context
                        .build()
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                    let connector = tokio_native_tls::TlsConnector::from(connector);
                    let stream = connector
                        .connect(&host, stream)
                        .await
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                    Ok(Box::new(stream) as BoxTransport)
                }
            }
        })
    }
}

impl fmt::Debug for dyn Connect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Connect")
    }
}
