//! Wire event schema and validation for the idempotent consumer pipeline.
//!
//! Defines the record the pub/sub bus carries (`Event`) and the checks that
//! must pass before it is handed to the dedup processor. Rejecting a
//! malformed message here, before it ever reaches a transaction, is what
//! keeps `ValidationFailure` out of the store's error taxonomy.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Maximum length, in bytes, of `topic`, `event_id` and `source`.
pub const MAX_FIELD_LEN: usize = 255;

/// Maximum number of events accepted in a single publish batch.
pub const MAX_BATCH_SIZE: usize = 1000;

/// A validated, in-flight event.
///
/// The dedup key is the ordered pair `(topic, event_id)`; `payload`,
/// `timestamp` and `source` are never consulted when deciding whether two
/// events are "the same".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub topic: String,
    pub event_id: String,
    /// ISO-8601 instant, as received. Parsing into a `DateTime<Utc>` is
    /// deferred to `Event::parsed_timestamp` so the raw string survives
    /// round-tripping verbatim.
    pub timestamp: String,
    pub source: String,
    pub payload: Value,
}

impl Event {
    /// The dedup key for this event.
    pub fn dedup_key(&self) -> (&str, &str) {
        (&self.topic, &self.event_id)
    }

    /// Parse `timestamp` into an instant, accepting both a trailing `Z` and
    /// an explicit numeric offset as UTC.
    ///
    /// The validator already proved this string is parseable; a failure
    /// here is an `error` outcome for the dedup processor, never a reason
    /// to reject the event a second time.
    pub fn parsed_timestamp(&self) -> Result<DateTime<Utc>, chrono::ParseError> {
        parse_instant(&self.timestamp)
    }
}

/// A batch of one or more events submitted to `/publish`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    pub events: Vec<Event>,
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    if let Some(stripped) = raw.strip_suffix('Z') {
        let with_offset = format!("{stripped}+00:00");
        DateTime::parse_from_rfc3339(&with_offset).map(|dt| dt.with_timezone(&Utc))
    } else {
        DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
    }
}

/// Why a message was rejected before ever reaching the dedup protocol.
///
/// Terminal for the message that produced it: the consumer logs and drops,
/// it never retries a `ValidationError`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` must be 1-{max} characters, got {len}")]
    FieldLength {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("topic `{0}` must match [A-Za-z0-9._-]+")]
    InvalidTopicChars(String),

    #[error("event_id must not be blank")]
    BlankEventId,

    #[error("timestamp `{0}` is not a valid ISO-8601 instant")]
    InvalidTimestamp(String),

    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    #[error("batch must contain 1-{max} events, got {len}")]
    BatchSize { len: usize, max: usize },
}

/// Parse a raw wire message into a validated `Event`.
///
/// Unknown payload fields are preserved verbatim (`payload` is stored as an
/// opaque `serde_json::Value`); only the envelope fields are checked.
pub fn parse(bytes: &[u8]) -> Result<Event, ValidationError> {
    let raw: RawEvent = serde_json::from_slice(bytes)
        .map_err(|e| ValidationError::MalformedJson(e.to_string()))?;
    validate(raw)
}

/// Validate an already-deserialized candidate event.
pub fn validate_event(event: Event) -> Result<Event, ValidationError> {
    validate(RawEvent {
        topic: Some(event.topic),
        event_id: Some(event.event_id),
        timestamp: Some(event.timestamp),
        source: Some(event.source),
        payload: Some(event.payload),
    })
}

/// Validate a batch of events, rejecting out-of-range batch sizes before
/// validating individual members.
pub fn validate_batch(events: Vec<Event>) -> Result<Vec<Event>, ValidationError> {
    if events.is_empty() || events.len() > MAX_BATCH_SIZE {
        return Err(ValidationError::BatchSize {
            len: events.len(),
            max: MAX_BATCH_SIZE,
        });
    }
    events.into_iter().map(validate_event).collect()
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    topic: Option<String>,
    event_id: Option<String>,
    timestamp: Option<String>,
    source: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

fn validate(raw: RawEvent) -> Result<Event, ValidationError> {
    let topic = raw.topic.ok_or(ValidationError::MissingField("topic"))?;
    let event_id = raw
        .event_id
        .ok_or(ValidationError::MissingField("event_id"))?;
    let timestamp = raw
        .timestamp
        .ok_or(ValidationError::MissingField("timestamp"))?;
    let source = raw.source.ok_or(ValidationError::MissingField("source"))?;
    let payload = raw.payload.ok_or(ValidationError::MissingField("payload"))?;

    validate_field_len("topic", &topic)?;
    validate_field_len("source", &source)?;

    if topic.is_empty() || !topic.chars().all(is_topic_char) {
        return Err(ValidationError::InvalidTopicChars(topic));
    }

    let event_id_len = event_id.chars().count();
    if event_id.is_empty() || event_id_len > MAX_FIELD_LEN {
        return Err(ValidationError::FieldLength {
            field: "event_id",
            len: event_id_len,
            max: MAX_FIELD_LEN,
        });
    }
    if event_id.trim().is_empty() {
        return Err(ValidationError::BlankEventId);
    }

    parse_instant(&timestamp).map_err(|_| ValidationError::InvalidTimestamp(timestamp.clone()))?;

    Ok(Event {
        topic,
        event_id,
        timestamp,
        source,
        payload,
    })
}

fn validate_field_len(field: &'static str, value: &str) -> Result<(), ValidationError> {
    // Counted in Unicode code points, matching the original pydantic model's
    // `max_length`/`min_length` (character count, not UTF-8 byte length).
    let len = value.chars().count();
    if value.is_empty() || len > MAX_FIELD_LEN {
        return Err(ValidationError::FieldLength {
            field,
            len,
            max: MAX_FIELD_LEN,
        });
    }
    Ok(())
}

fn is_topic_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.event_id)
    }
}

/// Payload fields as a map, for callers that want typed access without
/// losing unknown keys. Not used by the dedup path itself, which stores
/// `payload` verbatim.
pub fn payload_as_map(event: &Event) -> Option<HashMap<String, Value>> {
    event
        .payload
        .as_object()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn valid_json(topic: &str, event_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "topic": topic,
            "event_id": event_id,
            "timestamp": "2025-12-02T10:30:00Z",
            "source": "auth-service",
            "payload": {"user_id": "user_123"},
        }))
        .unwrap()
    }

    #[test]
    fn parses_valid_event() {
        let event = parse(&valid_json("user.login", "evt_A")).unwrap();
        assert_eq!(event.topic, "user.login");
        assert_eq!(event.event_id, "evt_A");
    }

    #[test]
    fn unknown_payload_fields_are_preserved() {
        let bytes = serde_json::to_vec(&json!({
            "topic": "user.login",
            "event_id": "evt_A",
            "timestamp": "2025-12-02T10:30:00Z",
            "source": "s",
            "payload": {"unexpected_field": 42, "nested": {"a": 1}},
        }))
        .unwrap();
        let event = parse(&bytes).unwrap();
        assert_eq!(event.payload["unexpected_field"], 42);
        assert_eq!(event.payload["nested"]["a"], 1);
    }

    #[rstest]
    #[case("topic")]
    #[case("event_id")]
    #[case("timestamp")]
    #[case("source")]
    #[case("payload")]
    fn rejects_missing_field(#[case] missing: &'static str) {
        let mut fields = json!({
            "topic": "user.login",
            "event_id": "evt_A",
            "timestamp": "2025-12-02T10:30:00Z",
            "source": "s",
            "payload": {"user_id": "user_123"},
        });
        fields.as_object_mut().unwrap().remove(missing);
        let bytes = serde_json::to_vec(&fields).unwrap();
        assert!(matches!(
            parse(&bytes),
            Err(ValidationError::MissingField(f)) if f == missing
        ));
    }

    #[test]
    fn rejects_bad_topic_chars() {
        let err = parse(&valid_json("user login!", "evt_A")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTopicChars(_)));
    }

    #[test]
    fn rejects_blank_event_id() {
        let err = parse(&valid_json("user.login", "   ")).unwrap_err();
        assert!(matches!(err, ValidationError::BlankEventId));
    }

    #[test]
    fn rejects_unparseable_timestamp() {
        let bytes = serde_json::to_vec(&json!({
            "topic": "user.login",
            "event_id": "evt_A",
            "timestamp": "not-a-date",
            "source": "s",
            "payload": {},
        }))
        .unwrap();
        assert!(matches!(
            parse(&bytes),
            Err(ValidationError::InvalidTimestamp(_))
        ));
    }

    #[rstest]
    #[case(255, true)]
    #[case(256, false)]
    fn topic_length_boundary(#[case] len: usize, #[case] should_accept: bool) {
        let topic = "a".repeat(len);
        let result = parse(&valid_json(&topic, "evt_A"));
        assert_eq!(result.is_ok(), should_accept);
        if !should_accept {
            assert!(matches!(
                result.unwrap_err(),
                ValidationError::FieldLength { .. }
            ));
        }
    }

    #[test]
    fn source_length_is_counted_in_code_points_not_bytes() {
        // 255 multi-byte (3-byte UTF-8) code points: 765 bytes, 255 chars.
        let source = "é".repeat(255);
        assert_eq!(source.chars().count(), 255);
        assert!(source.len() > 255);
        let event = parse(&valid_json("user.login", "evt_A")).unwrap();
        let bytes = serde_json::to_vec(&json!({
            "topic": event.topic,
            "event_id": event.event_id,
            "timestamp": event.timestamp,
            "source": source,
            "payload": {},
        }))
        .unwrap();
        assert!(parse(&bytes).is_ok());
    }

    #[test]
    fn z_suffix_and_explicit_offset_parse_to_same_instant() {
        let a = parse_instant("2025-12-02T10:30:00Z").unwrap();
        let b = parse_instant("2025-12-02T10:30:00+00:00").unwrap();
        assert_eq!(a, b);
    }

    #[rstest]
    #[case(1000, true)]
    #[case(1001, false)]
    fn batch_size_boundary(#[case] len: usize, #[case] should_accept: bool) {
        let events: Vec<Event> = (0..len)
            .map(|i| Event {
                topic: "t".into(),
                event_id: format!("evt_{i}"),
                timestamp: "2025-12-02T10:30:00Z".into(),
                source: "s".into(),
                payload: json!({}),
            })
            .collect();

        let result = validate_batch(events);
        assert_eq!(result.is_ok(), should_accept);
        if !should_accept {
            assert!(matches!(
                result.unwrap_err(),
                ValidationError::BatchSize { .. }
            ));
        }
    }

    #[test]
    fn empty_batch_rejected() {
        assert!(validate_batch(Vec::new()).is_err());
    }

    #[test]
    fn dedup_key_ignores_payload_timestamp_source() {
        let a = Event {
            topic: "t".into(),
            event_id: "e".into(),
            timestamp: "2025-12-02T10:30:00Z".into(),
            source: "s1".into(),
            payload: json!({"x": 1}),
        };
        let b = Event {
            timestamp: "2025-12-02T11:00:00Z".into(),
            source: "s2".into(),
            payload: json!({"x": 2}),
            ..a.clone()
        };
        assert_eq!(a.dedup_key(), b.dedup_key());
    }
}
