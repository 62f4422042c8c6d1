//! `FilterPipeline` (spec §4.7): a closed set of predicate kinds composed
//! into a request's filter list, evaluated lazily so message bodies are
//! only materialized when a filter actually needs one.

#[derive(Debug, Clone)]
pub enum FilterKind {
    /// Substring match against an event's name/type/body text.
    EventText,
    AttachedMessageId,
    AttachedEventId,
    MessageType,
    MessageBodyText,
    MessageBodyBinary,
    ParentEvent,
    AttachedEventIds,
}

impl FilterKind {
    /// Whether evaluating this filter requires materializing a message body.
    pub fn needs_body(&self) -> bool {
        matches!(self, FilterKind::MessageBodyText | FilterKind::MessageBodyBinary)
    }
}

#[derive(Debug, Clone)]
pub struct FilterSpec {
    pub kind: FilterKind,
    pub negative: bool,
    /// `true`: all values in `values` must match (AND). `false`: any value
    /// matching is sufficient (OR).
    pub conjunct: bool,
    pub values: Vec<String>,
}

impl FilterSpec {
    pub fn needs_body(&self) -> bool {
        self.kind.needs_body()
    }

    fn eval_values(&self, mut matches: impl FnMut(&str) -> bool) -> bool {
        if self.values.is_empty() {
            return true;
        }
        if self.conjunct {
            self.values.iter().all(|v| matches(v))
        } else {
            self.values.iter().any(|v| matches(v))
        }
    }

    pub fn apply<T: Filterable>(&self, target: &T) -> bool {
        let raw = match self.kind {
            FilterKind::EventText => self.eval_values(|v| {
                target
                    .event_text()
                    .map(|h| h.to_lowercase().contains(&v.to_lowercase()))
                    .unwrap_or(false)
            }),
            FilterKind::AttachedMessageId => {
                self.eval_values(|v| target.attached_message_ids().iter().any(|id| id == v))
            }
            FilterKind::AttachedEventId => self.eval_values(|v| target.attached_event_ids().iter().any(|id| id == v)),
            FilterKind::AttachedEventIds => {
                self.eval_values(|v| target.attached_event_ids().iter().any(|id| id == v))
            }
            FilterKind::MessageType => self.eval_values(|v| target.message_type() == Some(v)),
            FilterKind::ParentEvent => self.eval_values(|v| target.parent_event_id() == Some(v)),
            FilterKind::MessageBodyText => self.eval_values(|v| {
                target
                    .body_text()
                    .map(|b| b.to_lowercase().contains(&v.to_lowercase()))
                    .unwrap_or(false)
            }),
            FilterKind::MessageBodyBinary => self.eval_values(|v| {
                target
                    .body_binary()
                    .map(|b| contains_subslice(&b, v.as_bytes()))
                    .unwrap_or(false)
            }),
        };
        if self.negative {
            !raw
        } else {
            raw
        }
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// What a record must expose for the filter pipeline to evaluate against it.
/// Body accessors are only invoked for filters that declare `needs_body`,
/// letting callers skip decoding/loading the body otherwise (§4.7).
pub trait Filterable {
    fn event_text(&self) -> Option<&str> {
        None
    }
    fn message_type(&self) -> Option<&str> {
        None
    }
    fn attached_message_ids(&self) -> &[String] {
        &[]
    }
    fn attached_event_ids(&self) -> &[String] {
        &[]
    }
    fn parent_event_id(&self) -> Option<&str> {
        None
    }
    fn body_text(&self) -> Option<String> {
        None
    }
    fn body_binary(&self) -> Option<Vec<u8>> {
        None
    }
}

pub struct FilterPipeline;

impl FilterPipeline {
    pub fn needs_body(filters: &[FilterSpec]) -> bool {
        filters.iter().any(FilterSpec::needs_body)
    }

    /// All filters must pass (logical AND across the filter list); each
    /// filter internally resolves its own value list per its `conjunct` flag.
    pub fn apply<T: Filterable>(filters: &[FilterSpec], target: &T) -> bool {
        filters.iter().all(|f| f.apply(target))
    }
}
