//! Runtime configuration (spec §6 "Configuration (env vars)"). All values
//! are numeric, positive, and default-provided; a malformed env var is
//! logged and the default is used instead of failing startup, matching the
//! teacher's tolerant env-var loading style.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub codec_response_timeout: Duration,
    pub codec_pending_batch_limit: usize,
    pub codec_use_pin_attributes: bool,
    pub codec_request_thread_pool: usize,
    pub codec_callback_thread_pool: usize,
    pub send_empty_delay: Duration,
    pub sse_event_search_step: usize,
    pub event_search_chunk_size: usize,
    pub keep_alive_timeout: Duration,
    pub event_search_gap: Duration,
    pub db_retry_delay: Duration,
    pub db_retry_attempts: usize,
    pub sse_search_delay: Duration,
    pub message_search_pipeline_buffer: usize,
    pub event_search_pipeline_buffer: usize,
    pub max_messages_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            codec_response_timeout: Duration::from_secs(5),
            codec_pending_batch_limit: 256,
            codec_use_pin_attributes: false,
            codec_request_thread_pool: 4,
            codec_callback_thread_pool: 4,
            send_empty_delay: Duration::from_millis(500),
            sse_event_search_step: 200,
            event_search_chunk_size: 200,
            keep_alive_timeout: Duration::from_secs(15),
            event_search_gap: Duration::from_secs(30),
            db_retry_delay: Duration::from_millis(500),
            db_retry_attempts: 5,
            sse_search_delay: Duration::from_millis(100),
            message_search_pipeline_buffer: 16,
            event_search_pipeline_buffer: 16,
            max_messages_limit: 10_000,
        }
    }
}

impl SearchConfig {
    /// Load from environment, falling back to defaults for missing or
    /// unparsable values.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            codec_response_timeout: env_duration_ms("codecResponseTimeout", default.codec_response_timeout),
            codec_pending_batch_limit: env_usize("codecPendingBatchLimit", default.codec_pending_batch_limit),
            codec_use_pin_attributes: env_bool("codecUsePinAttributes", default.codec_use_pin_attributes),
            codec_request_thread_pool: env_usize("codecRequestThreadPool", default.codec_request_thread_pool),
            codec_callback_thread_pool: env_usize("codecCallbackThreadPool", default.codec_callback_thread_pool),
            send_empty_delay: env_duration_ms("sendEmptyDelay", default.send_empty_delay),
            sse_event_search_step: env_usize("sseEventSearchStep", default.sse_event_search_step),
            event_search_chunk_size: env_usize("eventSearchChunkSize", default.event_search_chunk_size),
            keep_alive_timeout: env_duration_ms("keepAliveTimeout", default.keep_alive_timeout),
            event_search_gap: env_duration_ms("eventSearchGap", default.event_search_gap),
            db_retry_delay: env_duration_ms("dbRetryDelay", default.db_retry_delay),
            db_retry_attempts: env_usize("dbRetryAttempts", default.db_retry_attempts),
            sse_search_delay: env_duration_ms("sseSearchDelay", default.sse_search_delay),
            message_search_pipeline_buffer: env_usize(
                "messageSearchPipelineBuffer",
                default.message_search_pipeline_buffer,
            ),
            event_search_pipeline_buffer: env_usize(
                "eventSearchPipelineBuffer",
                default.event_search_pipeline_buffer,
            ),
            max_messages_limit: env_usize("maxMessagesLimit", default.max_messages_limit),
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<usize>() {
            Ok(v) if v > 0 => v,
            _ => {
                tracing::warn!(%name, %raw, "invalid positive integer, falling back to default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_duration_ms(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(v) if v > 0 => Duration::from_millis(v),
            _ => {
                tracing::warn!(%name, %raw, "invalid positive integer (ms), falling back to default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<bool>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(%name, %raw, "invalid boolean, falling back to default");
                default
            }
        },
        Err(_) => default,
    }
}
