//! Partial-sync producer: answers hello requests with the list of known prefixes and sync
//! requests with updates matching the requester's announced Bloom filter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, warn};

use super::MAX_SEGMENT_SIZE;
use crate::bloom::BloomFilter;
use crate::config::PartialSyncProducerConfig;
use crate::iblt::Iblt;
use crate::name::Name;
use crate::pending::{PendingEntry, PendingTable};
use crate::scheduler::Scheduler;
use crate::state::StateTable;
use crate::transport::{PutResponse, RequestHandler, Transport, TransportError};
use crate::wire;

struct PendingSnapshot {
    filter: BloomFilter,
    iblt: Iblt,
}

struct Inner {
    state: StateTable,
    iblt: Iblt,
    pending: PendingTable<PendingSnapshot>,
}

pub struct PartialSyncProducer {
    config: PartialSyncProducerConfig,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    // Arc'd so expiry closures can reach the pending table directly on fire, without a
    // back-reference to the producer itself.
    inner: Arc<AsyncMutex<Inner>>,
}

impl PartialSyncProducer {
    pub fn new(
        config: PartialSyncProducerConfig,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        let iblt = Iblt::new(config.expected_entries);
        Arc::new(Self {
            config,
            transport,
            scheduler,
            inner: Arc::new(AsyncMutex::new(Inner { state: StateTable::new(), iblt, pending: PendingTable::new() })),
        })
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), TransportError> {
        let hello_prefix = self.config.sync_prefix.clone().push_str("hello");
        let sync_prefix = self.config.sync_prefix.clone().push_str("sync");
        self.transport
            .register_prefix(hello_prefix, Arc::new(HelloHandler(self.clone())))
            .await
            .inspect_err(|e| error!(target: "namesync::partial::producer", error = %e, "hello prefix registration failed, engine is not usable"))?;
        self.transport
            .register_prefix(sync_prefix, Arc::new(SyncHandler(self.clone())))
            .await
            .inspect_err(|e| error!(target: "namesync::partial::producer", error = %e, "sync prefix registration failed, engine is not usable"))?;
        Ok(())
    }

    pub async fn add_node(&self, prefix: &str) {
        self.inner.lock().await.state.add_node(prefix);
    }

    /// Removes a known participant, erasing its current token (if any) from the local IBLT.
    pub async fn remove_node(&self, prefix: &str) {
        let mut inner = self.inner.lock().await;
        inner.state.remove_node(prefix, &mut inner.iblt);
    }

    pub async fn seq_of(&self, prefix: &str) -> u32 {
        self.inner.lock().await.state.seq_of(prefix)
    }

    fn threshold(&self) -> usize {
        self.config.expected_entries / 2
    }

    pub async fn publish_name(self: &Arc<Self>, prefix: &str) {
        {
            let mut inner = self.inner.lock().await;
            if !inner.state.contains(prefix) {
                return;
            }
            let next = inner.state.seq_of(prefix) + 1;
            inner.state.update_seq(prefix, next, &mut inner.iblt);
        }
        self.satisfy_pending_sync_interests(prefix).await;
    }

    /// Re-evaluates every parked sync interest against a single newly published prefix.
    /// Only removes an entry from the table when it is actually resolved — answered or
    /// undecodable — so an entry that's still worth waiting on keeps its real expiry.
    async fn satisfy_pending_sync_interests(self: &Arc<Self>, prefix: &str) {
        let names = self.inner.lock().await.pending.names();
        for name in names {
            let mut inner = self.inner.lock().await;
            let Some(entry) = inner.pending.get(&name) else { continue };
            let diff = match inner.iblt.difference(&entry.snapshot.iblt) {
                Ok(d) => d,
                Err(_) => {
                    inner.pending.remove(&name);
                    continue;
                }
            };
            let (positive, negative, ok) = diff.peel();
            if !ok {
                inner.pending.remove(&name);
                debug!(target: "namesync::partial::producer", %name, "undecodable difference on pending interest, dropping");
                continue;
            }
            let matches = entry.snapshot.filter.contains(prefix.as_bytes());
            let crossed_threshold = positive.len() + negative.len() >= self.threshold();

            if matches {
                inner.pending.remove(&name);
                let seq = inner.state.seq_of(prefix);
                let body = format!("{prefix} {seq}");
                let iblt_snapshot = inner.iblt.clone();
                drop(inner);
                self.put_sync_response(name, &iblt_snapshot, body).await;
            } else if crossed_threshold {
                inner.pending.remove(&name);
                let iblt_snapshot = inner.iblt.clone();
                drop(inner);
                self.put_sync_response(name, &iblt_snapshot, String::new()).await;
            }
        }
    }

    async fn put_sync_response(&self, request_name: Name, iblt: &Iblt, body: String) {
        let (len, bytes) = iblt.to_length_prefixed();
        let name = request_name.push_bytes(len).push_bytes(bytes);
        if let Err(e) = self
            .transport
            .put(PutResponse {
                name,
                freshness: self.config.sync_reply_freshness,
                payload: body.into_bytes(),
                final_block: true,
            })
            .await
        {
            warn!(target: "namesync::partial::producer", error = %e, "failed to put sync response");
        }
    }

    async fn on_hello_interest(self: &Arc<Self>, name: Name) {
        let inner = self.inner.lock().await;
        let content = inner
            .state
            .prefixes()
            .collect::<Vec<_>>()
            .join("\n");
        let (len, bytes) = inner.iblt.to_length_prefixed();
        drop(inner);

        let base = name.push_bytes(len).push_bytes(bytes);
        self.send_fragmented(base, content.into_bytes()).await;
    }

    async fn send_fragmented(&self, base: Name, content: Vec<u8>) {
        let mut offset = 0usize;
        let mut segment = 0u64;
        loop {
            let end = (offset + MAX_SEGMENT_SIZE).min(content.len());
            let chunk = content[offset..end].to_vec();
            let is_last = end == content.len();
            let name = base.clone().push_varint(segment);
            if let Err(e) = self
                .transport
                .put(PutResponse {
                    name,
                    freshness: self.config.hello_reply_freshness,
                    payload: chunk,
                    final_block: is_last,
                })
                .await
            {
                warn!(target: "namesync::partial::producer", error = %e, "failed to put hello fragment");
            }
            offset = end;
            segment += 1;
            if is_last {
                break;
            }
        }
    }

    async fn on_sync_interest(self: &Arc<Self>, name: Name) {
        let Some((bf, peer_iblt)) = self.decode_sync_request(&name) else {
            warn!(target: "namesync::partial::producer", %name, "malformed sync interest, dropping");
            return;
        };

        let mut inner = self.inner.lock().await;
        let diff = match inner.iblt.difference(&peer_iblt) {
            Ok(d) => d,
            Err(_) => return,
        };
        let (positive, negative, ok) = diff.peel();
        if !ok {
            debug!(target: "namesync::partial::producer", "peel failed on incoming sync interest, dropping");
            return;
        }

        let mut lines = Vec::new();
        for tok in &positive {
            if let Some(prefix) = inner.state.prefix_for_token(*tok) {
                if bf.contains(prefix.as_bytes()) {
                    lines.push(format!("{prefix} {}", inner.state.seq_of(prefix)));
                }
            }
        }
        let body = lines.join("\n");
        let respond = !body.is_empty() || positive.len() + negative.len() >= self.threshold();

        if respond {
            let iblt_snapshot = inner.iblt.clone();
            drop(inner);
            self.put_sync_response(name, &iblt_snapshot, body).await;
        } else {
            // Mirrors the consumer's default sync-request lifetime; the producer has no
            // direct view of the incoming request's actual carrier lifetime here.
            let inner_handle = self.inner.clone();
            let expiry_name = name.clone();
            let expiry = self.scheduler.schedule(
                Duration::from_secs(4),
                Box::pin(async move {
                    inner_handle.lock().await.pending.remove_on_expiry(&expiry_name);
                }),
            );
            inner.pending.insert(name, PendingEntry { snapshot: PendingSnapshot { filter: bf, iblt: peer_iblt }, expiry });
        }
    }

    fn decode_sync_request(&self, name: &Name) -> Option<(BloomFilter, Iblt)> {
        let tail = name.last_n(6);
        if tail.len() != 6 {
            return None;
        }
        let n = wire::decode_varint(&tail[0]).ok()?;
        let fpr_millis = wire::decode_varint(&tail[1]).ok()? as u32;
        let _bf_len = wire::decode_varint(&tail[2]).ok()?;
        let bf_bytes = tail[3].clone();
        let iblt_len = wire::decode_varint(&tail[4]).ok()? as usize;
        let iblt_bytes = &tail[5];

        let bf = BloomFilter::from_wire(n, fpr_millis, bf_bytes, self.config.bloom_salt_seed).ok()?;
        let iblt = Iblt::from_wire(iblt_bytes, iblt_len / 12).ok()?;
        Some((bf, iblt))
    }
}

struct HelloHandler(Arc<PartialSyncProducer>);

#[async_trait]
impl RequestHandler for HelloHandler {
    async fn handle_request(&self, name: Name) {
        self.0.on_hello_interest(name).await;
    }
}

struct SyncHandler(Arc<PartialSyncProducer>);

#[async_trait]
impl RequestHandler for SyncHandler {
    async fn handle_request(&self, name: Name) {
        self.0.on_sync_interest(name).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TokioScheduler;
    use crate::transport::{PendingRequest, RequestToken};

    struct NoopTransport;

    #[async_trait]
    impl Transport for NoopTransport {
        async fn express_request(&self, _name: Name, _lifetime: Duration, _must_be_fresh: bool) -> PendingRequest {
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
    async fn publish_advances_seq() {
        let producer = PartialSyncProducer::new(
            PartialSyncProducerConfig::new(Name::from_uri("/sync"), Name::from_uri("/p")),
            Arc::new(NoopTransport),
            Arc::new(TokioScheduler),
        );
        producer.add_node("/x").await;
        producer.publish_name("/x").await;
        assert_eq!(producer.seq_of("/x").await, 1);
    }

    #[tokio::test]
    async fn remove_node_forgets_prefix() {
        let producer = PartialSyncProducer::new(
            PartialSyncProducerConfig::new(Name::from_uri("/sync"), Name::from_uri("/p")),
            Arc::new(NoopTransport),
            Arc::new(TokioScheduler),
        );
        producer.add_node("/x").await;
        producer.publish_name("/x").await;
        assert_eq!(producer.seq_of("/x").await, 1);
        producer.remove_node("/x").await;
        assert_eq!(producer.seq_of("/x").await, 0);
    }

    #[tokio::test]
    async fn sync_interest_with_matching_filter_is_answered() {
        let producer = PartialSyncProducer::new(
            PartialSyncProducerConfig::new(Name::from_uri("/sync"), Name::from_uri("/p")),
            Arc::new(NoopTransport),
            Arc::new(TokioScheduler),
        );
        producer.add_node("/x").await;
        producer.publish_name("/x").await;

        let mut bf = BloomFilter::new(1, 0.001, 0).unwrap();
        bf.insert(b"/x");
        let (bf_len, bf_bytes) = bf.to_length_prefixed();
        let peer_iblt = Iblt::new(80);
        let (iblt_len, iblt_bytes) = peer_iblt.to_length_prefixed();

        let name = Name::from_uri("/sync/sync")
            .push_varint(1)
            .push_varint(1)
            .push_bytes(bf_len)
            .push_bytes(bf_bytes)
            .push_bytes(iblt_len)
            .push_bytes(iblt_bytes);

        producer.on_sync_interest(name).await;
    }
}
