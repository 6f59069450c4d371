//! Partial-sync consumer: discovers a producer's known prefixes via hello, then repeatedly
//! announces a subscription Bloom filter and ingests matching updates.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::bloom::BloomFilter;
use crate::config::{
    PartialSyncConsumerConfig, FETCH_MAX_RETRIES, FETCH_NACK_DELAY, PARTIAL_CONSUMER_JITTER_MAX,
    PARTIAL_CONSUMER_JITTER_MIN,
};
use crate::iblt::Iblt;
use crate::jitter::JitterSource;
use crate::name::Name;
use crate::scheduler::{Scheduler, TimerHandle};
use crate::state::MissingData;
use crate::transport::{PendingRequest, RequestOutcome, RequestToken, Response, Transport};
use crate::wire;

struct Inner {
    peer_iblt: Option<Iblt>,
    prefixes: HashMap<String, u32>,
    subscriptions: std::collections::HashSet<String>,
    bloom: BloomFilter,
    hello_sent: bool,
    hello_timer: Option<TimerHandle>,
    sync_outstanding: Option<(RequestToken, TimerHandle)>,
}

pub struct PartialSyncConsumer {
    config: PartialSyncConsumerConfig,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    jitter: Arc<dyn JitterSource>,
    on_update: Box<dyn Fn(Vec<MissingData>) + Send + Sync>,
    on_hello: Box<dyn Fn(String) + Send + Sync>,
    suball: bool,
    inner: AsyncMutex<Inner>,
}

impl PartialSyncConsumer {
    pub fn new(
        config: PartialSyncConsumerConfig,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        jitter: Arc<dyn JitterSource>,
        on_update: impl Fn(Vec<MissingData>) + Send + Sync + 'static,
        on_hello: impl Fn(String) + Send + Sync + 'static,
    ) -> Result<Arc<Self>, crate::error::NamesyncError> {
        let bloom = BloomFilter::new(config.projected_count, config.false_positive_rate, config.bloom_salt_seed)?;
        let suball = crate::bloom::BloomParams {
            projected_count: config.projected_count,
            false_positive_rate: config.false_positive_rate,
        }
        .is_subscribe_all_sentinel();

        Ok(Arc::new(Self {
            config,
            transport,
            scheduler,
            jitter,
            on_update: Box::new(on_update),
            on_hello: Box::new(on_hello),
            suball,
            inner: AsyncMutex::new(Inner {
                peer_iblt: None,
                prefixes: HashMap::new(),
                subscriptions: std::collections::HashSet::new(),
                bloom,
                hello_sent: false,
                hello_timer: None,
                sync_outstanding: None,
            }),
        }))
    }

    pub async fn start(self: &Arc<Self>) {
        self.send_hello_interest().await;
    }

    pub async fn add_subscription(&self, prefix: &str) {
        let mut inner = self.inner.lock().await;
        inner.prefixes.entry(prefix.to_string()).or_insert(0);
        inner.subscriptions.insert(prefix.to_string());
        inner.bloom.insert(prefix.as_bytes());
    }

    fn is_subscribed(&self, prefix: &str, inner: &Inner) -> bool {
        self.suball || inner.subscriptions.contains(prefix)
    }

    pub async fn seq_of(&self, prefix: &str) -> u32 {
        self.inner.lock().await.prefixes.get(prefix).copied().unwrap_or(0)
    }

    async fn send_hello_interest(self: &Arc<Self>) {
        // Marked before the request is even issued: a concurrently-arriving response must
        // never observe `hello_sent = false` and skip straight to discarding the sync leg.
        self.inner.lock().await.hello_sent = true;

        let name = self.config.sync_prefix.clone().push_str("hello");
        let PendingRequest { token: _, outcome } = self
            .transport
            .express_request(name, self.config.hello_sync_lifetime, true)
            .await;

        let engine = self.clone();
        let waiter = self.scheduler.schedule(
            std::time::Duration::ZERO,
            Box::pin(async move {
                if let Ok(outcome) = outcome.await {
                    engine.on_hello_outcome(outcome).await;
                }
            }),
        );
        self.inner.lock().await.hello_timer = Some(waiter);
    }

    async fn on_hello_outcome(self: &Arc<Self>, outcome: RequestOutcome) {
        match outcome {
            RequestOutcome::Response(resp) => self.on_hello_data(resp).await,
            RequestOutcome::Nack(reason) => {
                debug!(target: "namesync::partial::consumer", ?reason, "hello nacked, rescheduling");
                self.reschedule_hello_after_jitter().await;
            }
            RequestOutcome::Timeout => {
                debug!(target: "namesync::partial::consumer", "hello timed out, reissuing immediately");
                self.send_hello_interest().await;
            }
        }
    }

    async fn reschedule_hello_after_jitter(self: &Arc<Self>) {
        let delay = self.jitter.uniform(PARTIAL_CONSUMER_JITTER_MIN, PARTIAL_CONSUMER_JITTER_MAX);
        let engine = self.clone();
        self.scheduler.schedule(
            delay,
            Box::pin(async move {
                engine.send_hello_interest().await;
            }),
        );
    }

    async fn on_hello_data(self: &Arc<Self>, response: Response) {
        if response.payload.len() > crate::bounded::MAX_HELLO_FRAGMENT_BYTES {
            warn!(target: "namesync::partial::consumer", len = response.payload.len(), "hello payload exceeds bound, dropping");
            return;
        }
        // The hello response name carries a trailing per-fragment segment number after the
        // IBLT's length/bytes pair, unlike the sync response; drop it before decoding.
        let Some(peer_iblt) = decode_tail_iblt(&response.name.drop_last_n(1)) else {
            warn!(target: "namesync::partial::consumer", "malformed hello response, dropping");
            return;
        };
        {
            let mut inner = self.inner.lock().await;
            inner.peer_iblt = Some(peer_iblt);
        }
        let payload = String::from_utf8_lossy(&response.payload).into_owned();
        (self.on_hello)(payload);
        self.send_sync_interest().await;
    }

    async fn send_sync_interest(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if !inner.hello_sent {
            return;
        }
        let Some(peer_iblt) = inner.peer_iblt.clone() else { return };

        if let Some((token, timer)) = inner.sync_outstanding.take() {
            timer.cancel();
            self.transport.remove_pending_request(token);
        }

        let (n, fpr_millis) = {
            let params = inner.bloom.params();
            (params.projected_count, (params.false_positive_rate * 1000.0).round() as u64)
        };
        let (bf_len, bf_bytes) = inner.bloom.to_length_prefixed();
        let (iblt_len, iblt_bytes) = peer_iblt.to_length_prefixed();
        drop(inner);

        let name = self
            .config
            .sync_prefix
            .clone()
            .push_str("sync")
            .push_varint(n)
            .push_varint(fpr_millis)
            .push_bytes(bf_len)
            .push_bytes(bf_bytes)
            .push_bytes(iblt_len)
            .push_bytes(iblt_bytes);

        let PendingRequest { token, outcome } = self
            .transport
            .express_request(name, self.config.hello_sync_lifetime, true)
            .await;

        let engine = self.clone();
        let waiter = self.scheduler.schedule(
            std::time::Duration::ZERO,
            Box::pin(async move {
                if let Ok(outcome) = outcome.await {
                    engine.on_sync_outcome(outcome).await;
                }
            }),
        );

        let mut inner = self.inner.lock().await;
        inner.sync_outstanding = Some((token, waiter));
    }

    async fn on_sync_outcome(self: &Arc<Self>, outcome: RequestOutcome) {
        match outcome {
            RequestOutcome::Response(resp) => self.on_sync_data(resp).await,
            RequestOutcome::Nack(reason) => {
                debug!(target: "namesync::partial::consumer", ?reason, "sync nacked, reverting to hello");
                self.reschedule_hello_after_jitter().await;
            }
            RequestOutcome::Timeout => {
                // Uniform rule (resolves the source's nack/timeout asymmetry, see
                // DESIGN.md): both outcomes revert to a fresh hello round rather than
                // retrying sync directly, since either can mean the producer's session
                // changed underneath us.
                debug!(target: "namesync::partial::consumer", "sync timed out, reverting to hello");
                self.reschedule_hello_after_jitter().await;
            }
        }
    }

    async fn on_sync_data(self: &Arc<Self>, response: Response) {
        let Some(peer_iblt) = decode_tail_iblt(&response.name) else {
            warn!(target: "namesync::partial::consumer", "malformed sync response, dropping");
            return;
        };

        let mut inner = self.inner.lock().await;
        inner.peer_iblt = Some(peer_iblt);

        let mut updates = Vec::new();
        for line in String::from_utf8_lossy(&response.payload).lines() {
            let Some((prefix, seq_str)) = line.rsplit_once(' ') else { continue };
            let Ok(seq) = seq_str.parse::<u32>() else { continue };
            if !self.is_subscribed(prefix, &inner) {
                continue;
            }
            let prior = inner.prefixes.get(prefix).copied().unwrap_or(0);
            if seq > prior {
                inner.prefixes.insert(prefix.to_string(), seq);
                updates.push(MissingData { prefix: prefix.to_string(), low_seq: prior + 1, high_seq: seq });
            }
        }
        drop(inner);

        if !updates.is_empty() {
            info!(target: "namesync::partial::consumer", count = updates.len(), "applying subscribed updates");
            (self.on_update)(updates);
        }

        // Unconditional reschedule, unlike full-sync: partial-sync's carrier responses
        // always carry a fresh IBLT worth re-querying against soon.
        let delay = self.jitter.uniform(PARTIAL_CONSUMER_JITTER_MIN, PARTIAL_CONSUMER_JITTER_MAX);
        let engine = self.clone();
        self.scheduler.schedule(
            delay,
            Box::pin(async move {
                engine.send_sync_interest().await;
            }),
        );
    }

    /// Fetches a specific (prefix, seq) item with bounded retries, refreshing the request
    /// nonce (modeled here as simply re-issuing the request) on each timeout.
    pub async fn fetch(
        self: &Arc<Self>,
        name: Name,
        on_fetched: impl Fn(Response) + Send + 'static,
    ) {
        let mut retries = 0u32;
        loop {
            let PendingRequest { token: _, outcome } = self
                .transport
                .express_request(name.clone(), self.config.hello_sync_lifetime, true)
                .await;
            match outcome.await {
                Ok(RequestOutcome::Response(resp)) => {
                    on_fetched(resp);
                    return;
                }
                Ok(RequestOutcome::Nack(_)) => {
                    tokio::time::sleep(FETCH_NACK_DELAY).await;
                }
                Ok(RequestOutcome::Timeout) | Err(_) => {}
            }
            retries += 1;
            if retries >= FETCH_MAX_RETRIES {
                warn!(target: "namesync::partial::consumer", %name, retries, "fetch exhausted retries");
                return;
            }
        }
    }
}

fn decode_tail_iblt(name: &Name) -> Option<Iblt> {
    let tail = name.last_n(2);
    let len = wire::decode_varint(tail.first()?).ok()? as usize;
    Iblt::from_wire(tail.get(1)?, len / 12).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jitter::ChaChaJitter;
    use crate::scheduler::TokioScheduler;
    use crate::transport::{PutResponse, RequestHandler, TransportError};
    use async_trait::async_trait;

    struct NoopTransport;

    #[async_trait]
    impl Transport for NoopTransport {
        async fn express_request(&self, _name: Name, _lifetime: std::time::Duration, _must_be_fresh: bool) -> PendingRequest {
            let (_tx, rx) = tokio::sync::oneshot::channel();
            PendingRequest { token: RequestToken(0), outcome: rx }
        }
        fn remove_pending_request(&self, _token: RequestToken) {}
        async fn register_prefix(&self, _prefix: Name, _handler: Arc<dyn RequestHandler>) -> Result<(), TransportError> {
            Ok(())
        }
        async fn put(&self, _response: PutResponse) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn subscribe_all_sentinel_accepts_everything() {
        let consumer = PartialSyncConsumer::new(
            PartialSyncConsumerConfig::subscribe_all(Name::from_uri("/sync")),
            Arc::new(NoopTransport),
            Arc::new(TokioScheduler),
            Arc::new(ChaChaJitter::new(3)),
            |_| {},
            |_| {},
        )
        .unwrap();
        assert!(consumer.suball);
        let inner = consumer.inner.lock().await;
        assert!(consumer.is_subscribed("/anything", &inner));
    }

    /// The hello response name carries a trailing segment component that the sync response
    /// doesn't; decoding must drop it before reusing the shared tail-decode helper.
    #[test]
    fn hello_response_iblt_decode_skips_trailing_segment() {
        let iblt = Iblt::new(10);
        let (len, bytes) = iblt.to_length_prefixed();
        let response_name = Name::from_uri("/sync/hello")
            .push_bytes(len)
            .push_bytes(bytes)
            .push_varint(0);

        assert_ne!(decode_tail_iblt(&response_name), Some(iblt.clone()));
        let decoded = decode_tail_iblt(&response_name.drop_last_n(1));
        assert_eq!(decoded, Some(iblt));
    }

    #[tokio::test]
    async fn explicit_subscription_filters_unmatched_prefixes() {
        let consumer = PartialSyncConsumer::new(
            PartialSyncConsumerConfig::new(Name::from_uri("/sync"), 10, 0.01),
            Arc::new(NoopTransport),
            Arc::new(TokioScheduler),
            Arc::new(ChaChaJitter::new(3)),
            |_| {},
            |_| {},
        )
        .unwrap();
        consumer.add_subscription("/x").await;
        let inner = consumer.inner.lock().await;
        assert!(consumer.is_subscribed("/x", &inner));
        assert!(!consumer.is_subscribed("/y", &inner));
    }
}
