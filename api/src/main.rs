//! Binary entry point: loads configuration from the environment, wires up
//! the in-memory demo store/codec (see `memory_store`), and serves the
//! search API. A real deployment swaps `MemoryStoreGateway`/`EchoCodecTransport`
//! for implementations backed by the actual record store and codec process —
//! everything downstream only depends on the `StoreGateway`/`CodecTransport`
//! traits.

use data_provider_api::{memory_store::{EchoCodecTransport, MemoryStoreGateway}, AppState};
use search_core::{codec::CodecBroker, config::SearchConfig, metrics::NoopMetrics};
use std::{net::SocketAddr, sync::Arc};

fn bind_addr() -> SocketAddr {
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080u16);
    format!("{host}:{port}")
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = SearchConfig::from_env();
    let metrics = Arc::new(NoopMetrics);

    let transport = Arc::new(EchoCodecTransport::new());
    let broker = Arc::new(CodecBroker::new(transport.clone(), &config, metrics.clone()));
    transport.bind(broker.clone());

    let store = MemoryStoreGateway::empty();
    let state = AppState::new(store, broker, config, metrics);

    let addr = bind_addr();
    data_provider_api::run(state, addr).await;
}
