//! Maps warp's built-in rejections to the same structured JSON error body
//! shape the teacher returns from `rejections::handle_rejection`, scaled down
//! to this crate's much smaller rejection surface (no auth/license variants,
//! since authorization is out of scope here).

use serde::Serialize;
use std::convert::Infallible;
use warp::{http::StatusCode, reject::Reject, Rejection, Reply};

#[derive(Debug)]
pub struct BadRequest(pub String);
impl Reject for BadRequest {}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(BadRequest(msg)) = err.find() {
        (StatusCode::BAD_REQUEST, msg.clone())
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        (StatusCode::BAD_REQUEST, "malformed request body".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        tracing::error!(?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody { code: status.as_u16(), message }),
        status,
    ))
}
