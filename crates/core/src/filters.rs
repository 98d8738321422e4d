//! Pure per-slug event filters applied by the trigger handlers.
//!
//! Each filter takes the stored events plus the applet's `triggerFields` and
//! returns the subset IFTTT should see. Filters never reorder events.

use std::collections::HashMap;

use crate::entities::TriggerEvent;

fn field_f64(fields: &HashMap<String, String>, name: &str) -> Option<f64> {
    fields.get(name).and_then(|v| v.trim().parse::<f64>().ok())
}

fn data_f64(event: &TriggerEvent, name: &str) -> Option<f64> {
    event.data.get(name).and_then(|v| v.trim().parse::<f64>().ok())
}

/// Keep events whose `balance` clears the configured threshold.
///
/// `direction=above` keeps `balance >= threshold`; `direction=below` keeps
/// `balance < threshold`. Without a parseable threshold all events pass.
/// Events without a parseable `balance` are dropped: the comparison cannot
/// be evaluated for them.
#[must_use]
pub fn balance_threshold(
    events: Vec<TriggerEvent>,
    fields: &HashMap<String, String>,
) -> Vec<TriggerEvent> {
    let Some(threshold) = field_f64(fields, "threshold_amount") else {
        return events;
    };
    let below = fields.get("direction").is_some_and(|d| d == "below");

    events
        .into_iter()
        .filter(|event| match data_f64(event, "balance") {
            Some(balance) if below => balance < threshold,
            Some(balance) => balance >= threshold,
            None => false,
        })
        .collect()
}

/// Partition charges strictly on `is_pending`.
///
/// `include_pending=true` shows *only* pending charges and the default shows
/// only settled ones, so a charge is never emitted twice as it settles. A
/// `minimum_amount` field additionally drops smaller charges.
#[must_use]
pub fn new_charge(
    events: Vec<TriggerEvent>,
    fields: &HashMap<String, String>,
) -> Vec<TriggerEvent> {
    let want_pending = fields.get("include_pending").is_some_and(|v| v == "true");
    let minimum = field_f64(fields, "minimum_amount");

    events
        .into_iter()
        .filter(|event| {
            let pending = event.data.get("is_pending").is_some_and(|v| v == "true");
            if pending != want_pending {
                return false;
            }
            match minimum {
                Some(min) => data_f64(event, "amount").is_some_and(|amount| amount >= min),
                None => true,
            }
        })
        .collect()
}

/// Keep events whose `percent_used` meets the configured `threshold_percent`.
#[must_use]
pub fn budget_exceeded(
    events: Vec<TriggerEvent>,
    fields: &HashMap<String, String>,
) -> Vec<TriggerEvent> {
    let Some(threshold) = field_f64(fields, "threshold_percent") else {
        return events;
    };

    events
        .into_iter()
        .filter(|event| data_f64(event, "percent_used").is_some_and(|pct| pct >= threshold))
        .collect()
}
