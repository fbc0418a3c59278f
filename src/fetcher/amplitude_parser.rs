//! Export API response parser
//!
//! Stateless decoding of one JSON response body into a [`RawPage`]. Individual
//! malformed events are skipped with a warning; a body that is not the expected
//! shape fails the whole page.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::fetcher::amplitude_config::AmplitudeConfig;
use crate::fetcher::{FetcherError, FetcherResult};
use crate::{Event, RawPage};

/// Naive timestamp layout used by the export API (`2024-01-05 12:00:00.123456`)
const EVENT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Payload fields that may identify the event's user
const USER_IDENTITY_FIELDS: [&str; 3] = ["user_id", "amplitude_id", "device_id"];

/// Response field names the parser looks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseShape {
    /// Field holding the events array
    pub events_field: String,
    /// Field holding the continuation token
    pub cursor_field: String,
    /// Optional boolean end-of-results field
    pub done_field: String,
}

impl Default for ResponseShape {
    fn default() -> Self {
        Self::from(&AmplitudeConfig::default())
    }
}

impl From<&AmplitudeConfig> for ResponseShape {
    fn from(config: &AmplitudeConfig) -> Self {
        Self {
            events_field: config.events_field.clone(),
            cursor_field: config.cursor_field.clone(),
            done_field: config.done_field.clone(),
        }
    }
}

/// Stateless parser for export API responses
pub struct AmplitudeParser;

impl AmplitudeParser {
    /// Decode a response body for `user_id`
    ///
    /// # Errors
    /// Returns [`FetcherError::InvalidResponse`] when the body is not a JSON
    /// object, the events field is missing or not an array, or the cursor has
    /// an unusable type.
    pub fn parse_page(body: &str, user_id: &str, shape: &ResponseShape) -> FetcherResult<RawPage> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| FetcherError::InvalidResponse(format!("body is not valid JSON: {e}")))?;
        Self::parse_value(value, user_id, shape)
    }

    /// Decode an already-parsed response
    pub fn parse_value(value: Value, user_id: &str, shape: &ResponseShape) -> FetcherResult<RawPage> {
        let Value::Object(mut body) = value else {
            return Err(FetcherError::InvalidResponse(
                "response body is not a JSON object".to_string(),
            ));
        };

        let raw_events = match body.remove(&shape.events_field) {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(FetcherError::InvalidResponse(format!(
                    "field '{}' is {}, expected an array",
                    shape.events_field,
                    type_name(&other)
                )))
            }
            None => {
                return Err(FetcherError::InvalidResponse(format!(
                    "missing events field '{}'",
                    shape.events_field
                )))
            }
        };

        let cursor = Self::parse_cursor(body.get(&shape.cursor_field), &shape.cursor_field)?;
        let done = body
            .get(&shape.done_field)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let total = raw_events.len();
        let mut events = Vec::with_capacity(total);
        let mut foreign = 0usize;

        for (index, raw) in raw_events.into_iter().enumerate() {
            let Value::Object(fields) = raw else {
                warn!(user_id, index, "skipping event that is not a JSON object");
                continue;
            };

            if !belongs_to(&fields, user_id) {
                foreign += 1;
                continue;
            }

            match Self::parse_event(fields, user_id) {
                Ok(event) => events.push(event),
                Err(reason) => warn!(user_id, index, reason = %reason, "skipping malformed event"),
            }
        }

        if foreign > 0 {
            debug!(user_id, foreign, "dropped events belonging to other users");
        }
        debug!(
            user_id,
            received = total,
            kept = events.len(),
            has_cursor = cursor.is_some(),
            done,
            "parsed page"
        );

        Ok(RawPage {
            events,
            cursor,
            done,
        })
    }

    /// Decode one event object
    ///
    /// The returned event is attributed to `user_id`, the user it was requested for.
    pub fn parse_event(mut fields: Map<String, Value>, user_id: &str) -> Result<Event, String> {
        let event_type = match fields.get("event_type") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(_) => return Err("event_type is empty or not a string".to_string()),
            None => return Err("missing event_type".to_string()),
        };

        let timestamp = ["event_time", "client_event_time", "time"]
            .iter()
            .find_map(|key| fields.get(*key))
            .ok_or_else(|| "missing event_time".to_string())
            .and_then(parse_timestamp)?;

        let event_id = ["uuid", "event_id", "$insert_id"]
            .iter()
            .find_map(|key| fields.get(*key).and_then(scalar_to_string));

        let properties = match fields.remove("event_properties") {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let user_properties = match fields.remove("user_properties") {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        let event = Event {
            event_id,
            event_type,
            timestamp,
            properties,
            user_properties,
            user_id: user_id.to_string(),
        };
        event.validate()?;
        Ok(event)
    }

    fn parse_cursor(value: Option<&Value>, field: &str) -> FetcherResult<Option<String>> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(FetcherError::InvalidResponse(format!(
                "cursor field '{field}' is {}, expected a string or number",
                type_name(other)
            ))),
        }
    }
}

/// Parse an event timestamp
///
/// Accepts the export API's naive UTC layout, RFC 3339 and epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, EVENT_TIME_FORMAT) {
                return Ok(Utc.from_utc_datetime(&naive));
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            if let Ok(millis) = s.parse::<i64>() {
                return from_millis(millis);
            }
            Err(format!("unparseable event time '{s}'"))
        }
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| format!("event time {n} is not an integer"))
            .and_then(from_millis),
        other => Err(format!("event time is {}", type_name(other))),
    }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, String> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| format!("event time {millis} out of range"))
}

/// An event belongs to the user unless it carries identity fields and none match
fn belongs_to(fields: &Map<String, Value>, user_id: &str) -> bool {
    let mut saw_identity = false;
    for key in USER_IDENTITY_FIELDS {
        if let Some(id) = fields.get(key).and_then(scalar_to_string) {
            saw_identity = true;
            if id == user_id {
                return true;
            }
        }
    }
    !saw_identity
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
