//! A two-node in-memory transport linking exactly one pair of engines directly: express_request
//! on one side synchronously drives the matching registered handler on the other side, and
//! that handler's eventual `put` resolves the waiting oneshot. Good enough to exercise the
//! protocol's request/response logic without any real network or timer-driven asynchrony.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use namesync::transport::{
    NackReason, PendingRequest, RequestHandler, RequestOutcome, RequestToken, Response, Transport,
    TransportError,
};
use namesync::Name;
use tokio::sync::{oneshot, Mutex};

#[derive(Default)]
struct Link {
    handlers_a: Mutex<Vec<(Name, Arc<dyn RequestHandler>)>>,
    handlers_b: Mutex<Vec<(Name, Arc<dyn RequestHandler>)>>,
    inflight_a: Mutex<Option<oneshot::Sender<RequestOutcome>>>,
    inflight_b: Mutex<Option<oneshot::Sender<RequestOutcome>>>,
}

impl Link {
    async fn find(handlers: &Mutex<Vec<(Name, Arc<dyn RequestHandler>)>>, name: &Name) -> Option<Arc<dyn RequestHandler>> {
        handlers
            .lock()
            .await
            .iter()
            .find(|(prefix, _)| prefix.is_prefix_of(name))
            .map(|(_, h)| h.clone())
    }
}

pub struct SideA(Arc<Link>);
pub struct SideB(Arc<Link>);

pub fn new_pair() -> (Arc<SideA>, Arc<SideB>) {
    let link = Arc::new(Link::default());
    (Arc::new(SideA(link.clone())), Arc::new(SideB(link)))
}

#[allow(dead_code)]
pub fn nack() -> RequestOutcome {
    RequestOutcome::Nack(NackReason::Other)
}

#[async_trait]
impl Transport for SideA {
    async fn express_request(&self, name: Name, _lifetime: Duration, _must_be_fresh: bool) -> PendingRequest {
        let (tx, rx) = oneshot::channel();
        *self.0.inflight_a.lock().await = Some(tx);
        if let Some(h) = Link::find(&self.0.handlers_b, &name).await {
            h.handle_request(name).await;
        } else if let Some(tx) = self.0.inflight_a.lock().await.take() {
            let _ = tx.send(RequestOutcome::Timeout);
        }
        PendingRequest { token: RequestToken(0), outcome: rx }
    }

    fn remove_pending_request(&self, _token: RequestToken) {}

    async fn register_prefix(&self, prefix: Name, handler: Arc<dyn RequestHandler>) -> Result<(), TransportError> {
        self.0.handlers_a.lock().await.push((prefix, handler));
        Ok(())
    }

    async fn put(&self, response: namesync::transport::PutResponse) -> Result<(), TransportError> {
        if let Some(tx) = self.0.inflight_b.lock().await.take() {
            let _ = tx.send(RequestOutcome::Response(Response { name: response.name, payload: response.payload }));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for SideB {
    async fn express_request(&self, name: Name, _lifetime: Duration, _must_be_fresh: bool) -> PendingRequest {
        let (tx, rx) = oneshot::channel();
        *self.0.inflight_b.lock().await = Some(tx);
        if let Some(h) = Link::find(&self.0.handlers_a, &name).await {
            h.handle_request(name).await;
        } else if let Some(tx) = self.0.inflight_b.lock().await.take() {
            let _ = tx.send(RequestOutcome::Timeout);
        }
        PendingRequest { token: RequestToken(0), outcome: rx }
    }

    fn remove_pending_request(&self, _token: RequestToken) {}

    async fn register_prefix(&self, prefix: Name, handler: Arc<dyn RequestHandler>) -> Result<(), TransportError> {
        self.0.handlers_b.lock().await.push((prefix, handler));
        Ok(())
    }

    async fn put(&self, response: namesync::transport::PutResponse) -> Result<(), TransportError> {
        if let Some(tx) = self.0.inflight_a.lock().await.take() {
            let _ = tx.send(RequestOutcome::Response(Response { name: response.name, payload: response.payload }));
        }
        Ok(())
    }
}
