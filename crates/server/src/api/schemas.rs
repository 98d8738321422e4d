//! Request shapes and response mapping shared by the IFTTT handlers.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use eclosion_core::TriggerEvent;

/// Body of `POST /ifttt/v1/triggers/{slug}`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TriggerPollRequest {
    pub trigger_identity: Option<String>,
    #[serde(rename = "triggerFields")]
    pub trigger_fields: Option<HashMap<String, String>>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

/// Body of `POST /ifttt/v1/actions/{slug}`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ActionRequest {
    #[serde(rename = "actionFields")]
    pub action_fields: Option<HashMap<String, String>>,
}

/// Body of `POST /ifttt/v1/queries/{slug}`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QueryRequest {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

/// Body of `POST .../fields/{field}/validate`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ValidateRequest {
    pub value: Option<String>,
}

/// Render a unix-seconds timestamp as RFC 3339 for `created_at` fields.
#[must_use]
pub fn iso8601(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|datetime| datetime.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// Map a stored event to an IFTTT response item: flattened ingredients plus
/// `created_at` and the `meta {id, timestamp}` envelope.
#[must_use]
pub fn event_to_item(event: &TriggerEvent) -> Value {
    let mut object = serde_json::Map::new();
    for (key, value) in &event.data {
        object.insert(key.clone(), Value::String(value.clone()));
    }
    object.insert("created_at".to_owned(), Value::String(iso8601(event.timestamp)));
    object.insert(
        "meta".to_owned(),
        serde_json::json!({
            "id": event.id,
            "timestamp": event.timestamp,
        }),
    );
    Value::Object(object)
}

/// Apply cursor + limit to an already filtered, descending event list.
///
/// Resumes strictly after the event whose id equals the cursor; an unknown
/// cursor (e.g. the event aged out) restarts from the top. The returned
/// cursor is the last emitted event's id, present only when more events
/// remain and something was emitted.
#[must_use]
pub fn paginate(
    events: Vec<TriggerEvent>,
    cursor: Option<&str>,
    limit: usize,
) -> (Vec<TriggerEvent>, Option<String>) {
    let start = match cursor {
        Some(cursor) => events
            .iter()
            .position(|event| event.id.as_str() == cursor)
            .map_or(0, |position| position + 1),
        None => 0,
    };

    let remaining = events.len().saturating_sub(start);
    let page: Vec<TriggerEvent> = events.into_iter().skip(start).take(limit).collect();
    let next_cursor = if remaining > limit && !page.is_empty() {
        page.last().map(|event| event.id.to_string())
    } else {
        None
    };

    (page, next_cursor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(count: i64) -> Vec<TriggerEvent> {
        // Descending by timestamp, as handlers provide.
        (1..=count)
            .rev()
            .map(|ts| TriggerEvent::new("goal_achieved", ts, HashMap::new()))
            .collect()
    }

    #[test]
    fn limit_zero_yields_nothing_and_no_cursor() {
        let (page, cursor) = paginate(events(5), None, 0);
        assert!(page.is_empty());
        assert!(cursor.is_none());
    }

    #[test]
    fn exactly_limit_available_means_no_cursor() {
        let (page, cursor) = paginate(events(3), None, 3);
        assert_eq!(page.len(), 3);
        assert!(cursor.is_none());
    }

    #[test]
    fn one_more_than_limit_sets_cursor_to_last_emitted() {
        let (page, cursor) = paginate(events(4), None, 3);
        assert_eq!(page.len(), 3);
        assert_eq!(cursor.as_deref(), Some(page.last().unwrap().id.as_str()));
    }

    #[test]
    fn cursor_resumes_strictly_after_match() {
        let all = events(5);
        let (first_page, cursor) = paginate(all.clone(), None, 2);
        let (second_page, _) = paginate(all, cursor.as_deref(), 2);
        assert_eq!(first_page[1].timestamp, 4);
        assert_eq!(second_page[0].timestamp, 3);
    }

    #[test]
    fn unknown_cursor_restarts_from_top() {
        let (page, _) = paginate(events(3), Some("gone"), 2);
        assert_eq!(page[0].timestamp, 3);
    }

    #[test]
    fn item_carries_meta_and_created_at() {
        let mut data = HashMap::new();
        data.insert("goal_name".to_owned(), "Emergency Fund".to_owned());
        let event = TriggerEvent::new("goal_achieved", 1_700_000_000, data);

        let item = event_to_item(&event);
        assert_eq!(item["goal_name"], "Emergency Fund");
        assert_eq!(item["meta"]["timestamp"], 1_700_000_000);
        assert_eq!(item["meta"]["id"], event.id.as_str());
        assert_eq!(item["created_at"], "2023-11-14T22:13:20Z");
    }
}
