//! Call-sites for metrics (spec §2.6, §4.5). The concrete backend
//! (Prometheus or otherwise) is out of scope — this is a named interface
//! only, in the same spirit as `StoreGateway` and the codec transport.

use std::time::Duration;

pub trait Metrics: Send + Sync {
    fn codec_inflight_inc(&self) {}
    fn codec_inflight_dec(&self) {}
    fn codec_latency(&self, _d: Duration) {}
    fn codec_timeout(&self) {}
    fn codec_dispatch_failed(&self) {}
    fn events_emitted(&self) {}
    fn messages_emitted(&self) {}
}

/// No-op implementation, used when a caller doesn't wire up a real backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}
