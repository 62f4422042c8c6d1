//! Route composition, mirroring the teacher's `events::http::filters`
//! chain-of-`.and()` style: path, method, shared state, then the handler.

use crate::{handlers, AppState};
use search_core::{codec::CodecTransport, store::StoreGateway};
use warp::Filter;

fn with_state<G, T>(state: AppState<G, T>) -> impl Filter<Extract = (AppState<G, T>,), Error = std::convert::Infallible> + Clone
where
    G: StoreGateway + 'static,
    T: CodecTransport + 'static,
{
    warp::any().map(move || state.clone())
}

pub fn events_search<G, T>(state: AppState<G, T>) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone
where
    G: StoreGateway + 'static,
    T: CodecTransport + 'static,
{
    warp::path!("api" / "v1" / "events" / "search")
        .and(warp::get())
        .and(warp::filters::query::raw())
        .and(with_state(state))
        .and_then(handlers::search_events)
}

pub fn messages_search<G, T>(state: AppState<G, T>) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone
where
    G: StoreGateway + 'static,
    T: CodecTransport + 'static,
{
    warp::path!("api" / "v1" / "messages" / "search")
        .and(warp::get())
        .and(warp::filters::query::raw())
        .and(with_state(state))
        .and_then(handlers::search_messages)
}
