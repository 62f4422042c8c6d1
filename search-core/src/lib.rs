//! The streaming search engine: time-interval enumeration, concurrent
//! per-stream record extraction, decode round-trips, ordered merging,
//! filtering, result capping, resume semantics, and SSE emission.
//!
//! The HTTP/SSE transport, the configuration loader, the persistent store
//! itself, the codec wire encoding, and metrics backends are out of scope —
//! each is represented here as a named trait (`StoreGateway`, `CodecTransport`,
//! `SseSink`, `Metrics`) that a façade crate wires up to something real.

pub mod codec;
pub mod config;
pub mod convert;
pub mod error;
pub mod event_search;
pub mod filter;
pub mod interval;
pub mod merger;
pub mod message_extractor;
pub mod message_init;
pub mod message_search;
pub mod metrics;
pub mod model;
pub mod sse;
pub mod store;

pub use codec::{CodecBroker, CodecRequest, CodecResponse, CodecTransport};
pub use config::SearchConfig;
pub use error::{Result, SearchError};
pub use event_search::{EmittedEvent, EventSearchEngine, EventSearchItem};
pub use filter::{FilterKind, FilterPipeline, FilterSpec, Filterable};
pub use interval::{IntervalGenerator, SearchInterval};
pub use merger::{MergedMessage, MergerOutput, StreamMerger};
pub use message_extractor::HeadTrim;
pub use message_init::MessageStreamInitializer;
pub use message_search::{EmittedMessage, MessageSearchEngine, MessageSearchItem};
pub use metrics::{Metrics, NoopMetrics};
pub use model::*;
pub use sse::{SseFrame, SseSink, SseWriter};
pub use store::{MessageBatchQuery, RetryingStoreGateway, StoreGateway, TimeRelation};
