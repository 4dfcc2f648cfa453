//! Submit a batch of requests and collect results in submission order.

use std::fmt;

use futures_util::future;

use crate::client::Client;
use crate::error::Error;
use crate::request::RequestOptions;
use crate::response::Response;

/// A batch of requests issued concurrently through one [`Client`].
///
/// Results come back indexed by submission order no matter which requests
/// finish first. Per-request `on_success`/`on_error` callbacks still fire,
/// after the batch has recorded the outcome.
///
/// ```no_run
/// # async fn example() -> Result<(), polyfetch::Error> {
/// let client = polyfetch::Client::new();
/// let mut batch = client.batch();
/// batch.push("http://example.com/a", Default::default());
/// batch.push("http://example.com/b", Default::default());
/// for result in batch.join().await {
///     println!("{:?}", result.map(|resp| resp.status()));
/// }
/// # Ok(())
/// # }
/// ```
pub struct Batch {
    client: Client,
    requests: Vec<(String, RequestOptions)>,
}

impl Batch {
    pub(crate) fn new(client: &Client) -> Batch {
        Batch {
            client: client.clone(),
            requests: Vec::new(),
        }
    }

    /// Appends one request.
    pub fn push(&mut self, url: impl Into<String>, options: RequestOptions) -> &mut Batch {
        self.requests.push((url.into(), options));
        self
    }

    /// Appends many requests.
    pub fn batch<I>(&mut self, requests: I) -> &mut Batch
    where
        I: IntoIterator<Item = (String, RequestOptions)>,
    {
        self.requests.extend(requests);
        self
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Issues every request, suspends until all complete, and returns one
    /// outcome per submission, index-aligned.
    pub async fn join(self) -> Vec<crate::Result<Response>> {
        let client = self.client;
        let pending: Vec<_> = self
            .requests
            .into_iter()
            .map(|(url, mut options)| {
                // The batch takes over completion; the caller's callbacks
                // run after the outcome is recorded.
                let on_success = options.on_success.take();
                let on_error = options.on_error.take();
                let client = client.clone();
                async move {
                    let outcome = match client.request(&url, options).await {
                        Ok(Some(response)) => Ok(response),
                        Ok(None) => Err(Error::new_canceled()),
                        Err(err) => Err(err),
                    };
                    match &outcome {
                        Ok(response) => {
                            if let Some(cb) = &on_success {
                                cb(response);
                            }
                        }
                        Err(err) => {
                            if let Some(cb) = &on_error {
                                cb(err);
                            }
                        }
                    }
                    outcome
                }
            })
            .collect();
        future::join_all(pending).await
    }

    /// Like [`Batch::join`], but surfaces the first failure in submission
    /// order instead of returning per-request outcomes.
    pub async fn try_join(self) -> crate::Result<Vec<Response>> {
        self.join().await.into_iter().collect()
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("requests", &self.requests.len())
            .finish()
    }
}
