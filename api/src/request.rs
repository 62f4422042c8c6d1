//! Parses HTTP query parameters into a `SearchRequest` (spec §6). Warp's
//! built-in `query::query()` only extracts one value per key, so repeatable
//! `stream` parameters and the `{name}-values` filter parameters are parsed
//! from the raw query string by hand, same as the teacher handles
//! non-trivial query shapes (`files::route`'s manual path parsing).

use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use search_core::{
    filter::{FilterKind, FilterSpec},
    model::{MessageId, ProviderEventId, ResumeId, SearchDirection, SearchRequest, StreamDirection, StreamKey},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid value for `{0}`: {1}")]
    Invalid(&'static str, String),
    #[error("invalid stream descriptor `{0}`, expected `name:first|second`")]
    BadStream(String),
    #[error("invalid resumeFromId `{0}`")]
    BadResumeId(String),
}

/// Parses a raw, percent-encoded query string into an ordered multi-map so
/// repeated keys (`stream=a&stream=b`) survive.
pub fn parse_raw_query(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|kv| !kv.is_empty())
        .map(|kv| {
            let mut parts = kv.splitn(2, '=');
            let key = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default();
            (decode(key), decode(value))
        })
        .collect()
}

fn decode(s: &str) -> String {
    percent_decode_str(&s.replace('+', " ")).decode_utf8_lossy().into_owned()
}

fn find<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn find_all<'a>(params: &'a [(String, String)], key: &str) -> Vec<&'a str> {
    params.iter().filter(|(k, _)| k == key).map(|(_, v)| v.as_str()).collect()
}

fn parse_timestamp(raw: &str, field: &'static str) -> Result<DateTime<Utc>, ParseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ParseError::Invalid(field, raw.to_string()))
}

fn parse_bool(raw: &str, field: &'static str) -> Result<bool, ParseError> {
    match raw {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ParseError::Invalid(field, raw.to_string())),
    }
}

/// `name:first|second`, matching how streams are addressed throughout §3.
fn parse_stream(raw: &str) -> Result<StreamKey, ParseError> {
    let (name, direction) = raw.rsplit_once(':').ok_or_else(|| ParseError::BadStream(raw.to_string()))?;
    let direction = match direction.to_ascii_lowercase().as_str() {
        "first" => StreamDirection::First,
        "second" => StreamDirection::Second,
        _ => return Err(ParseError::BadStream(raw.to_string())),
    };
    Ok(StreamKey::new(name, direction))
}

/// Events endpoint resume tokens are bare event ids (opaque per §3); messages
/// endpoint resume tokens additionally pin down the originating stream,
/// sequence and timestamp so the per-stream scan can restart exactly where
/// it left off without a round-trip to the store.
fn parse_message_resume_id(raw: &str) -> Result<ResumeId, ParseError> {
    let mut parts = raw.splitn(4, '|');
    let (stream, direction, sequence, timestamp) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(s), Some(d), Some(seq), Some(ts)) => (s, d, seq, ts),
        _ => return Err(ParseError::BadResumeId(raw.to_string())),
    };
    let direction = match direction.to_ascii_lowercase().as_str() {
        "first" => StreamDirection::First,
        "second" => StreamDirection::Second,
        _ => return Err(ParseError::BadResumeId(raw.to_string())),
    };
    let sequence = sequence.parse::<i64>().map_err(|_| ParseError::BadResumeId(raw.to_string()))?;
    let timestamp = parse_timestamp(timestamp, "resumeFromId")?;
    Ok(ResumeId::Message(MessageId {
        stream: StreamKey::new(stream, direction),
        sequence,
        timestamp,
    }))
}

const FILTER_NAMES: &[(&str, FilterKind)] = &[
    ("eventText", FilterKind::EventText),
    ("attachedMessageId", FilterKind::AttachedMessageId),
    ("attachedEventId", FilterKind::AttachedEventId),
    ("attachedEventIds", FilterKind::AttachedEventIds),
    ("messageType", FilterKind::MessageType),
    ("messageBodyText", FilterKind::MessageBodyText),
    ("messageBodyBinary", FilterKind::MessageBodyBinary),
    ("parentEvent", FilterKind::ParentEvent),
];

fn parse_filters(params: &[(String, String)]) -> Result<Vec<FilterSpec>, ParseError> {
    let mut filters = Vec::new();
    for (name, kind) in FILTER_NAMES {
        let values_key = format!("{name}-values");
        let values: Vec<String> = find_all(params, &values_key)
            .into_iter()
            .flat_map(|v| v.split(',').map(str::to_string))
            .filter(|v| !v.is_empty())
            .collect();
        if values.is_empty() {
            continue;
        }
        let negative = match find(params, &format!("{name}-negative")) {
            Some(raw) => parse_bool(raw, "negative")?,
            None => false,
        };
        let conjunct = match find(params, &format!("{name}-conjunct")) {
            Some(raw) => parse_bool(raw, "conjunct")?,
            None => false,
        };
        filters.push(FilterSpec {
            kind: kind.clone(),
            negative,
            conjunct,
            values,
        });
    }
    Ok(filters)
}

/// The direction a resume id belongs to decides how its parsing works: the
/// events endpoint always resumes by opaque event id, the messages endpoint
/// by a structured per-stream token (see `parse_message_resume_id`).
pub enum Endpoint {
    Events,
    Messages,
}

pub fn parse_search_request(params: &[(String, String)], endpoint: Endpoint) -> Result<SearchRequest, ParseError> {
    let direction = match find(params, "searchDirection") {
        Some("next") | None => SearchDirection::After,
        Some("previous") => SearchDirection::Before,
        Some(other) => return Err(ParseError::Invalid("searchDirection", other.to_string())),
    };

    let start_timestamp = find(params, "startTimestamp")
        .map(|v| parse_timestamp(v, "startTimestamp"))
        .transpose()?;
    let end_timestamp = find(params, "endTimestamp").map(|v| parse_timestamp(v, "endTimestamp")).transpose()?;

    let resume_from_id = match find(params, "resumeFromId") {
        None => None,
        Some(raw) => Some(match endpoint {
            Endpoint::Events => ResumeId::Event(ProviderEventId::single(raw)),
            Endpoint::Messages => parse_message_resume_id(raw)?,
        }),
    };

    let streams = find_all(params, "stream")
        .into_iter()
        .map(parse_stream)
        .collect::<Result<Vec<_>, _>>()?;

    let result_count_limit = find(params, "resultCountLimit")
        .map(|v| v.parse::<usize>().map_err(|_| ParseError::Invalid("resultCountLimit", v.to_string())))
        .transpose()?;
    let limit_for_parent = find(params, "limitForParent")
        .map(|v| v.parse::<usize>().map_err(|_| ParseError::Invalid("limitForParent", v.to_string())))
        .transpose()?;
    let lookup_limit_days = find(params, "lookupLimitDays")
        .map(|v| v.parse::<u32>().map_err(|_| ParseError::Invalid("lookupLimitDays", v.to_string())))
        .transpose()?;

    let keep_open = find(params, "keepOpen").map(|v| parse_bool(v, "keepOpen")).transpose()?.unwrap_or(false);
    let metadata_only = find(params, "metadataOnly")
        .map(|v| parse_bool(v, "metadataOnly"))
        .transpose()?
        .unwrap_or(false);
    let attached_messages = find(params, "attachedMessages")
        .map(|v| parse_bool(v, "attachedMessages"))
        .transpose()?
        .unwrap_or(false);

    let parent_event = find(params, "parentEvent").map(str::to_string);
    let filters = parse_filters(params)?;

    let request = SearchRequest {
        direction,
        start_timestamp,
        end_timestamp,
        resume_from_id,
        streams,
        filters,
        limit: result_count_limit,
        limit_for_parent,
        keep_open,
        metadata_only,
        attached_messages,
        lookup_limit_days,
        result_count_limit,
        parent_event,
    };
    request.validate().map_err(|e| ParseError::Invalid("startTimestamp/endTimestamp", e.to_string()))?;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_stream_params() {
        let params = parse_raw_query("startTimestamp=2024-01-01T00%3A00%3A00Z&stream=a%3Afirst&stream=b%3Asecond");
        let request = parse_search_request(&params, Endpoint::Events).unwrap();
        assert_eq!(request.streams.len(), 2);
        assert_eq!(request.streams[0].name, "a");
        assert_eq!(request.streams[1].direction, StreamDirection::Second);
    }

    #[test]
    fn parses_filter_triplet() {
        let params = parse_raw_query(
            "startTimestamp=2024-01-01T00%3A00%3A00Z&messageType-values=a%2Cb&messageType-negative=true&messageType-conjunct=false",
        );
        let request = parse_search_request(&params, Endpoint::Events).unwrap();
        assert_eq!(request.filters.len(), 1);
        assert!(request.filters[0].negative);
        assert_eq!(request.filters[0].values, vec!["a", "b"]);
    }

    #[test]
    fn rejects_bad_after_range() {
        let params = parse_raw_query("startTimestamp=2024-01-02T00%3A00%3A00Z&endTimestamp=2024-01-01T00%3A00%3A00Z");
        assert!(parse_search_request(&params, Endpoint::Events).is_err());
    }
}
