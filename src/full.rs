//! Full-sync engine: every participant learns every other participant's latest sequence
//! number. Exactly one outstanding own-request at a time; incoming requests are answered
//! immediately or parked against a snapshot of the requester's IBLT.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::config::{FullSyncConfig, FULL_SYNC_RESEND_JITTER};
use crate::iblt::Iblt;
use crate::jitter::JitterSource;
use crate::name::Name;
use crate::pending::{PendingEntry, PendingTable};
use crate::scheduler::Scheduler;
use crate::state::{MissingData, StateTable};
use crate::transport::{
    PendingRequest, RequestHandler, RequestOutcome, RequestToken, Response, Transport,
};
use crate::wire;

struct Outstanding {
    name: Name,
    resend: crate::scheduler::TimerHandle,
    waiter: crate::scheduler::TimerHandle,
    token: RequestToken,
}

struct Inner {
    state: StateTable,
    iblt: Iblt,
    pending: PendingTable<Iblt>,
    outstanding: Option<Outstanding>,
}

pub struct FullSyncEngine {
    config: FullSyncConfig,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    jitter: Arc<dyn JitterSource>,
    on_update: Box<dyn Fn(Vec<MissingData>) + Send + Sync>,
    // Arc'd separately from the engine itself so an expiry closure can reach the pending
    // table to remove its own entry on fire without needing an `Arc<Self>` back-reference.
    inner: Arc<AsyncMutex<Inner>>,
}

impl FullSyncEngine {
    pub fn new(
        config: FullSyncConfig,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        jitter: Arc<dyn JitterSource>,
        on_update: impl Fn(Vec<MissingData>) + Send + Sync + 'static,
    ) -> Arc<Self> {
        let iblt = Iblt::new(config.expected_entries);
        Arc::new(Self {
            config,
            transport,
            scheduler,
            jitter,
            on_update: Box::new(on_update),
            inner: Arc::new(AsyncMutex::new(Inner {
                state: StateTable::new(),
                iblt,
                pending: PendingTable::new(),
                outstanding: None,
            })),
        })
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), crate::transport::TransportError> {
        self.transport
            .register_prefix(self.config.sync_prefix.clone(), self.clone())
            .await
            .inspect_err(|e| error!(target: "namesync::full", error = %e, "prefix registration failed, engine is not usable"))?;
        self.send_sync_request().await;
        Ok(())
    }

    pub async fn add_node(&self, prefix: &str) {
        let mut inner = self.inner.lock().await;
        inner.state.add_node(prefix);
    }

    /// Removes a known participant, erasing its current token (if any) from the local IBLT.
    pub async fn remove_node(&self, prefix: &str) {
        let mut inner = self.inner.lock().await;
        inner.state.remove_node(prefix, &mut inner.iblt);
    }

    pub async fn seq_of(&self, prefix: &str) -> u32 {
        self.inner.lock().await.state.seq_of(prefix)
    }

    /// Advances `prefix`'s sequence number and attempts to satisfy any pending requests.
    pub async fn publish_name(self: &Arc<Self>, prefix: &str) {
        let mut inner = self.inner.lock().await;
        if !inner.state.contains(prefix) {
            return;
        }
        let next = inner.state.seq_of(prefix) + 1;
        inner.state.update_seq(prefix, next, &mut inner.iblt);
        drop(inner);
        self.satisfy_pending_interests().await;
    }

    fn request_name(&self, iblt: &Iblt) -> Name {
        let (len, bytes) = iblt.to_length_prefixed();
        self.config.sync_prefix.clone().push_bytes(len).push_bytes(bytes)
    }

    fn threshold(&self) -> usize {
        self.config.expected_entries / 2
    }

    fn decode_request_iblt(&self, name: &Name) -> Option<Iblt> {
        let tail = name.last_n(2);
        let (len_bytes, data_bytes) = (tail.first()?, tail.get(1)?);
        let len = wire::decode_varint(len_bytes).ok()? as usize;
        let cell_count = len / 12;
        Iblt::from_wire(data_bytes, cell_count).ok()
    }

    async fn send_sync_request(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if let Some(prior) = inner.outstanding.take() {
            prior.resend.cancel();
            prior.waiter.cancel();
            self.transport.remove_pending_request(prior.token);
        }
        let name = self.request_name(&inner.iblt);
        drop(inner);

        let PendingRequest { token, outcome } = self
            .transport
            .express_request(name.clone(), self.config.sync_interest_lifetime, true)
            .await;

        let engine = self.clone();
        let waiter_name = name.clone();
        let waiter = self.scheduler.schedule(
            Duration::ZERO,
            Box::pin(async move {
                if let Ok(outcome) = outcome.await {
                    engine.on_outcome(waiter_name, outcome).await;
                }
            }),
        );

        let resend_delay = self
            .jitter
            .symmetric(self.config.sync_interest_lifetime / 2, FULL_SYNC_RESEND_JITTER);
        let engine = self.clone();
        let resend = self.scheduler.schedule(
            resend_delay,
            Box::pin(async move {
                engine.send_sync_request().await;
            }),
        );

        let mut inner = self.inner.lock().await;
        inner.outstanding = Some(Outstanding { name, resend, waiter, token });
    }

    async fn on_outcome(self: &Arc<Self>, name: Name, outcome: RequestOutcome) {
        match outcome {
            RequestOutcome::Response(resp) => self.on_sync_data(name, resp).await,
            RequestOutcome::Nack(reason) => {
                debug!(target: "namesync::full", ?reason, "sync interest nacked");
            }
            RequestOutcome::Timeout => {
                debug!(target: "namesync::full", "sync interest timed out, awaiting scheduled resend");
            }
        }
    }

    async fn on_sync_data(self: &Arc<Self>, name: Name, response: Response) {
        let mut inner = self.inner.lock().await;
        inner.pending.remove(&name);

        let mut updates = Vec::new();
        for line in std::str::from_utf8(&response.payload).unwrap_or("").lines() {
            let Some((prefix, seq_str)) = line.rsplit_once(' ') else {
                warn!(target: "namesync::full", %line, "malformed response line, skipping");
                continue;
            };
            let Ok(seq) = seq_str.parse::<u32>() else {
                warn!(target: "namesync::full", %line, "unparseable seq, skipping");
                continue;
            };
            if !inner.state.contains(prefix) {
                inner.state.add_node(prefix);
            }
            let prior = inner.state.seq_of(prefix);
            if inner.state.update_seq(prefix, seq, &mut inner.iblt) {
                updates.push(MissingData {
                    prefix: prefix.to_string(),
                    low_seq: prior + 1,
                    high_seq: seq,
                });
            }
        }
        drop(inner);

        if !updates.is_empty() {
            info!(target: "namesync::full", count = updates.len(), "applying remote updates");
            (self.on_update)(updates);
            self.send_sync_request().await;
        }
        // else: deliberately do not reschedule early — avoids hammering a carrier cache
        // that keeps answering with the same stale response.
    }

    async fn satisfy_pending_interests(self: &Arc<Self>) {
        let names = { self.inner.lock().await.pending.names() };
        for name in names {
            self.try_satisfy(name).await;
        }
    }

    /// Re-evaluates one parked request against the current local IBLT. Only touches the
    /// pending table when the entry is resolved (answered or undecodable) — an entry left
    /// unresolved keeps its original snapshot and, crucially, its original expiry timer.
    async fn try_satisfy(self: &Arc<Self>, name: Name) {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.pending.get(&name) else { return };
        let diff = match inner.iblt.difference(&entry.snapshot) {
            Ok(d) => d,
            Err(_) => {
                inner.pending.remove(&name);
                return;
            }
        };
        let (positive, negative, body, ok) = self.build_response_body(&inner.state, diff);
        if !ok {
            // Difference exceeded this sketch's decodable cardinality; drop rather than
            // keep waiting on a snapshot that can only grow further apart.
            inner.pending.remove(&name);
            debug!(target: "namesync::full", %name, "undecodable difference on pending interest, dropping");
            return;
        }
        let body_len = body.len();
        let respond = !body.is_empty() || positive + negative >= self.threshold();
        if respond {
            inner.pending.remove(&name);
            let iblt_snapshot = inner.iblt.clone();
            drop(inner);
            self.put_response(name, &iblt_snapshot, body).await;
        }
        debug!(target: "namesync::full", responded = respond, body_len, "pending interest re-evaluated");
    }

    fn build_response_body(&self, state: &StateTable, diff: Iblt) -> (usize, usize, String, bool) {
        let (positive, negative, ok) = diff.peel();
        let mut lines = Vec::new();
        for tok in &positive {
            if let Some(prefix) = state.prefix_for_token(*tok) {
                let seq = state.seq_of(prefix);
                if seq != 0 {
                    lines.push(format!("{prefix} {seq}"));
                }
            }
        }
        (positive.len(), negative.len(), lines.join("\n"), ok)
    }

    async fn put_response(&self, request_name: Name, iblt: &Iblt, body: String) {
        let (len, bytes) = iblt.to_length_prefixed();
        let name = request_name.push_bytes(len).push_bytes(bytes);
        let result = self
            .transport
            .put(crate::transport::PutResponse {
                name,
                freshness: self.config.sync_reply_freshness,
                payload: body.into_bytes(),
                final_block: true,
            })
            .await;
        if let Err(e) = result {
            warn!(target: "namesync::full", error = %e, "failed to put sync response");
        }
    }
}

#[async_trait]
impl RequestHandler for FullSyncEngine {
    async fn handle_request(&self, name: Name) {
        let Some(peer_iblt) = self.decode_request_iblt(&name) else {
            warn!(target: "namesync::full", %name, "malformed sync interest name, dropping");
            return;
        };

        let mut inner = self.inner.lock().await;
        let diff = match inner.iblt.difference(&peer_iblt) {
            Ok(d) => d,
            Err(_) => return,
        };
        let (positive, negative, ok) = diff.peel();
        if !ok {
            debug!(target: "namesync::full", "peel failed on incoming sync interest, dropping");
            return;
        }

        let mut lines = Vec::new();
        for tok in &positive {
            if let Some(prefix) = inner.state.prefix_for_token(*tok) {
                let seq = inner.state.seq_of(prefix);
                if seq != 0 {
                    lines.push(format!("{prefix} {seq}"));
                }
            }
        }
        let body = lines.join("\n");
        let respond = !body.is_empty() || positive.len() + negative.len() >= self.threshold();

        if respond {
            let iblt_snapshot = inner.iblt.clone();
            drop(inner);
            self.put_response(name, &iblt_snapshot, body).await;
        } else {
            let inner_handle = self.inner.clone();
            let expiry_name = name.clone();
            let expiry = self.scheduler.schedule(
                self.config.sync_interest_lifetime,
                Box::pin(async move {
                    inner_handle.lock().await.pending.remove_on_expiry(&expiry_name);
                }),
            );
            inner.pending.insert(name, PendingEntry { snapshot: peer_iblt, expiry });
        }
    }
}
