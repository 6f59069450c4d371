//! The abstract carrier the core consumes: issuing named requests, registering a name
//! prefix to receive incoming requests, and publishing responses. Concrete network
//! connectivity, signing, and freshness enforcement live entirely on the implementor's
//! side — the core only ever sees this trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::name::Name;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestToken(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NackReason {
    Congestion,
    NoRoute,
    Duplicate,
    Other,
}

#[derive(Clone, Debug)]
pub enum RequestOutcome {
    Response(Response),
    Nack(NackReason),
    Timeout,
}

#[derive(Clone, Debug)]
pub struct Response {
    pub name: Name,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct PutResponse {
    pub name: Name,
    pub freshness: Duration,
    pub payload: Vec<u8>,
    /// Set on the last segment of a fragmented reply (hello segmentation).
    pub final_block: bool,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("prefix registration failed: {0}")]
    RegisterFailed(String),
    #[error("put failed: {0}")]
    PutFailed(String),
}

/// Handed back by [`Transport::express_request`]: a token usable with
/// [`Transport::remove_pending_request`] and a one-shot future resolving to the eventual
/// response/nack/timeout.
pub struct PendingRequest {
    pub token: RequestToken,
    pub outcome: oneshot::Receiver<RequestOutcome>,
}

/// Invoked by a transport implementation when a request arrives under a registered prefix.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle_request(&self, name: Name);
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn express_request(
        &self,
        name: Name,
        lifetime: Duration,
        must_be_fresh: bool,
    ) -> PendingRequest;

    fn remove_pending_request(&self, token: RequestToken);

    async fn register_prefix(
        &self,
        prefix: Name,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), TransportError>;

    async fn put(&self, response: PutResponse) -> Result<(), TransportError>;
}
