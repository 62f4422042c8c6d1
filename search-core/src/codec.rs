//! `CodecBroker` (spec §4.5): bounded concurrent RPC to the external decoder,
//! at-most-one pending request per fingerprint, per-request deadlines, and
//! an admission-controlled `maxPendingRequests` cap.

use crate::{config::SearchConfig, error::Result, metrics::Metrics, model::{DecodedMessage, RawMessage}};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::{broadcast, oneshot, Semaphore};

#[derive(Debug, Clone)]
pub struct CodecRequest {
    pub request_id: u64,
    pub stream_name: String,
    pub messages: Vec<RawMessage>,
}

#[derive(Debug, Clone)]
pub struct CodecResponse {
    pub request_id: u64,
    pub messages: Vec<DecodedMessage>,
}

/// The external decoder, reached via a duplex request/response contract
/// (spec §6 "Codec transport"). Out of scope: the wire encoding itself.
#[async_trait]
pub trait CodecTransport: Send + Sync {
    async fn send(&self, request: CodecRequest) -> Result<()>;
}

/// Lets a boxed trait object stand in for `T: CodecTransport` wherever a
/// `CodecBroker<T>` needs a concrete, `Sized` type.
#[async_trait]
impl CodecTransport for Box<dyn CodecTransport> {
    async fn send(&self, request: CodecRequest) -> Result<()> {
        (**self).send(request).await
    }
}

struct PendingRequest {
    reply: oneshot::Sender<Option<Vec<DecodedMessage>>>,
    started: Instant,
    stream_name: String,
}

type Fingerprint = u64;

fn fingerprint(stream_name: &str, messages: &[RawMessage]) -> Fingerprint {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    stream_name.hash(&mut hasher);
    for m in messages {
        m.id.sequence.hash(&mut hasher);
        m.id.timestamp.timestamp_nanos_opt().unwrap_or_default().hash(&mut hasher);
    }
    hasher.finish()
}

pub struct CodecBroker<T> {
    transport: Arc<T>,
    pending: Arc<Mutex<HashMap<u64, PendingRequest>>>,
    in_flight: Arc<Mutex<HashMap<Fingerprint, broadcast::Sender<Arc<Vec<DecodedMessage>>>>>>,
    next_id: AtomicU64,
    max_pending: usize,
    timeout: Duration,
    sender_semaphore: Arc<Semaphore>,
    callback_semaphore: Arc<Semaphore>,
    metrics: Arc<dyn Metrics>,
}

impl<T: CodecTransport + 'static> CodecBroker<T> {
    pub fn new(transport: Arc<T>, config: &SearchConfig, metrics: Arc<dyn Metrics>) -> Self {
        Self {
            transport,
            pending: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            max_pending: config.codec_pending_batch_limit,
            timeout: config.codec_response_timeout,
            sender_semaphore: Arc::new(Semaphore::new(config.codec_request_thread_pool)),
            callback_semaphore: Arc::new(Semaphore::new(config.codec_callback_thread_pool)),
            metrics,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Decode a raw batch, de-duplicating concurrent identical requests by
    /// fingerprint so at most one is actually in flight at a time.
    pub async fn submit(&self, stream_name: String, messages: Vec<RawMessage>) -> Vec<DecodedMessage> {
        if messages.is_empty() {
            return Vec::new();
        }
        let fp = fingerprint(&stream_name, &messages);

        let existing = self.in_flight.lock().get(&fp).cloned();
        if let Some(tx) = existing {
            let mut rx = tx.subscribe();
            return match rx.recv().await {
                Ok(v) => (*v).clone(),
                Err(_) => self.fail_all(&messages, "duplicate request's broker channel closed"),
            };
        }

        let (tx, _rx0) = broadcast::channel(1);
        self.in_flight.lock().insert(fp, tx.clone());

        let result = self.submit_uncached(stream_name, messages).await;

        self.in_flight.lock().remove(&fp);
        let _ = tx.send(Arc::new(result.clone()));
        result
    }

    async fn submit_uncached(&self, stream_name: String, messages: Vec<RawMessage>) -> Vec<DecodedMessage> {
        // Admission control: cooperative poll, ~100ms backoff, while the
        // pending map is at capacity.
        loop {
            if self.pending.lock().len() < self.max_pending {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply, rx) = oneshot::channel();
        self.pending.lock().insert(
            request_id,
            PendingRequest {
                reply,
                started: Instant::now(),
                stream_name: stream_name.clone(),
            },
        );
        self.metrics.codec_inflight_inc();

        self.arm_deadline(request_id);
        self.dispatch(request_id, stream_name, messages.clone());

        match rx.await {
            Ok(Some(decoded)) => decoded,
            Ok(None) | Err(_) => self.fail_all(&messages, "codec request timed out or failed to dispatch"),
        }
    }

    fn arm_deadline(&self, request_id: u64) {
        let pending = self.pending.clone();
        let metrics = self.metrics.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(slot) = pending.lock().remove(&request_id) {
                tracing::warn!(request_id, stream = %slot.stream_name, "codec response timed out");
                metrics.codec_timeout();
                metrics.codec_inflight_dec();
                let _ = slot.reply.send(None);
            }
        });
    }

    fn dispatch(&self, request_id: u64, stream_name: String, messages: Vec<RawMessage>) {
        let transport = self.transport.clone();
        let sem = self.sender_semaphore.clone();
        let pending = self.pending.clone();
        let metrics = self.metrics.clone();
        let request = CodecRequest {
            request_id,
            stream_name,
            messages,
        };
        tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.expect("sender semaphore never closed");
            if let Err(e) = transport.send(request).await {
                if let Some(slot) = pending.lock().remove(&request_id) {
                    tracing::warn!(request_id, error = %e, "codec dispatch failed");
                    metrics.codec_dispatch_failed();
                    metrics.codec_inflight_dec();
                    let _ = slot.reply.send(None);
                }
            }
        });
    }

    /// Invoked by the transport's response thread-pool with a decoded batch.
    /// Bounded by `codecCallbackThreadPool` via the callback semaphore.
    pub async fn complete(&self, response: CodecResponse) {
        let _permit = self
            .callback_semaphore
            .acquire()
            .await
            .expect("callback semaphore never closed");
        let slot = self.pending.lock().remove(&response.request_id);
        match slot {
            Some(slot) => {
                self.metrics.codec_latency(slot.started.elapsed());
                self.metrics.codec_inflight_dec();
                let _ = slot.reply.send(Some(response.messages));
            }
            None => {
                tracing::debug!(request_id = response.request_id, "late or unknown codec response ignored");
            }
        }
    }

    fn fail_all(&self, messages: &[RawMessage], diagnostic: &str) -> Vec<DecodedMessage> {
        messages
            .iter()
            .map(|m| DecodedMessage {
                id: m.id.clone(),
                message_type: None,
                body: None,
                diagnostic: Some(diagnostic.to_string()),
            })
            .collect()
    }
}
