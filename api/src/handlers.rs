//! Wires a parsed `SearchRequest` to the matching engine and pumps its output
//! through an `SseWriter` onto the HTTP response body, the same
//! spawn-a-task-and-stream-the-channel shape the teacher uses in
//! `events::http::handlers::query` around `EventService::query`.

use crate::{
    request::{parse_search_request, Endpoint, ParseError},
    rejections::BadRequest,
    sse_transport::HyperSseSink,
    AppState,
};
use search_core::{
    codec::CodecTransport,
    event_search::EventSearchItem,
    message_search::MessageSearchItem,
    model::{MessageId, StreamProgress},
    sse::SseWriter,
    store::StoreGateway,
};
use warp::{http::StatusCode, Rejection, Reply};

fn parse_error_rejection(e: ParseError) -> Rejection {
    warp::reject::custom(BadRequest(e.to_string()))
}

fn sse_reply(body: hyper::Body) -> impl Reply {
    warp::http::Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .body(body)
        .expect("static header values are always valid")
}

pub async fn search_events<G, T>(raw_query: String, state: AppState<G, T>) -> Result<impl Reply, Rejection>
where
    G: StoreGateway + 'static,
    T: CodecTransport + 'static,
{
    let params = crate::request::parse_raw_query(&raw_query);
    let request = parse_search_request(&params, Endpoint::Events).map_err(parse_error_rejection)?;

    let (sink, body) = HyperSseSink::channel(state.config.event_search_pipeline_buffer);
    let mut writer = SseWriter::new(sink, state.config.keep_alive_timeout, request.direction.is_after());
    let streams = request.streams.clone();
    let mut rx = state
        .event_engine
        .clone()
        .spawn(request, state.config.event_search_gap, state.config.event_search_pipeline_buffer);

    tokio::spawn(async move {
        if writer.write_stream_info(streams).await.is_err() {
            return;
        }
        while let Some(item) = rx.recv().await {
            match item {
                EventSearchItem::Event(e) => {
                    if writer.write_event(e.event).await.is_err() {
                        break;
                    }
                }
                EventSearchItem::Error(e) => {
                    let _ = writer.write_error(&e).await;
                    break;
                }
            }
        }
        writer.close().await;
    });

    Ok(sse_reply(body))
}

/// Folds a merge round's per-stream snapshots into one `LastScannedObjectInfo`
/// update (spec §4.8): AFTER reports the slowest stream's watermark (the
/// point below which every stream has scanned), BEFORE the same in reverse.
fn aggregate_progress(progress: &[StreamProgress], after: bool) -> (Option<MessageId>, chrono::DateTime<chrono::Utc>, bool) {
    let stream_empty = progress.iter().all(|p| p.stream_empty);
    let picked = if after {
        progress.iter().min_by_key(|p| p.last_scanned_time)
    } else {
        progress.iter().max_by_key(|p| p.last_scanned_time)
    };
    match picked {
        Some(p) => (p.last_processed_id.clone(), p.last_scanned_time, stream_empty),
        None => (None, chrono::Utc::now(), stream_empty),
    }
}

pub async fn search_messages<G, T>(raw_query: String, state: AppState<G, T>) -> Result<impl Reply, Rejection>
where
    G: StoreGateway + 'static,
    T: CodecTransport + 'static,
{
    let params = crate::request::parse_raw_query(&raw_query);
    let request = parse_search_request(&params, Endpoint::Messages).map_err(parse_error_rejection)?;

    let (sink, body) = HyperSseSink::channel(state.config.message_search_pipeline_buffer);
    let mut writer = SseWriter::new(sink, state.config.keep_alive_timeout, request.direction.is_after());
    let streams = request.streams.clone();
    let after = request.direction.is_after();
    let mut rx = state.message_engine.clone().spawn(request);

    tokio::spawn(async move {
        if writer.write_stream_info(streams).await.is_err() {
            return;
        }
        while let Some(item) = rx.recv().await {
            match item {
                MessageSearchItem::Message(m) => {
                    if writer.write_message(m.stream, m.message).await.is_err() {
                        break;
                    }
                }
                MessageSearchItem::KeepAlive(progress) => {
                    let (last_processed_id, last_scanned_time, stream_empty) = aggregate_progress(&progress, after);
                    if writer
                        .write_last_scanned(last_processed_id, last_scanned_time, stream_empty)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                MessageSearchItem::Error(e) => {
                    let _ = writer.write_error(&e).await;
                    break;
                }
            }
        }
        writer.close().await;
    });

    Ok(sse_reply(body))
}
