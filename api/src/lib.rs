//! HTTP/SSE façade: binds `search-core`'s engines to a small warp server.
//! Out of scope, same as the rest of this crate: authorization, the write
//! path, and node/swarm administration — this only ever answers read-only
//! search requests (spec §1, §6).

pub mod filters;
pub mod handlers;
pub mod memory_store;
pub mod request;
pub mod rejections;
pub mod sse_transport;

use search_core::{
    codec::{CodecBroker, CodecTransport},
    config::SearchConfig,
    event_search::EventSearchEngine,
    message_search::MessageSearchEngine,
    metrics::Metrics,
    store::{RetryingStoreGateway, StoreGateway},
};
use std::{net::SocketAddr, sync::Arc};
use warp::Filter;

pub struct AppState<G, T> {
    pub config: Arc<SearchConfig>,
    pub event_engine: Arc<EventSearchEngine<RetryingStoreGateway<G>>>,
    pub message_engine: Arc<MessageSearchEngine<RetryingStoreGateway<G>, T>>,
}

// Written by hand rather than `#[derive(Clone)]`: the derive would add
// `G: Clone, T: Clone` bounds even though every field is already an `Arc`.
impl<G, T> Clone for AppState<G, T> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            event_engine: self.event_engine.clone(),
            message_engine: self.message_engine.clone(),
        }
    }
}

impl<G: StoreGateway + 'static, T: CodecTransport + 'static> AppState<G, T> {
    pub fn new(store: G, broker: Arc<CodecBroker<T>>, config: SearchConfig, metrics: Arc<dyn Metrics>) -> Self {
        let config_arc = Arc::new(config.clone());
        let retrying = Arc::new(RetryingStoreGateway::new(Arc::new(store), config.db_retry_delay, config.db_retry_attempts));
        let event_engine = Arc::new(EventSearchEngine::new(retrying.clone(), metrics.clone()));
        let message_engine = Arc::new(MessageSearchEngine::new(retrying, broker, metrics, config));
        Self {
            config: config_arc,
            event_engine,
            message_engine,
        }
    }
}

pub fn routes<G, T>(state: AppState<G, T>) -> impl Filter<Extract = (impl warp::Reply,), Error = std::convert::Infallible> + Clone
where
    G: StoreGateway + 'static,
    T: CodecTransport + 'static,
{
    let log = warp::log::custom(|info| {
        tracing::info!(
            method = %info.method(),
            path = info.path(),
            status = info.status().as_u16(),
            elapsed = ?info.elapsed(),
            "request"
        );
    });

    filters::events_search(state.clone())
        .or(filters::messages_search(state))
        .with(log)
        .recover(rejections::handle_rejection)
}

pub async fn run<G, T>(state: AppState<G, T>, addr: SocketAddr)
where
    G: StoreGateway + 'static,
    T: CodecTransport + 'static,
{
    tracing::info!(%addr, "starting data provider search API");
    warp::serve(routes(state)).run(addr).await;
}
