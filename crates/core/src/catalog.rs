//! Static registries describing every supported trigger, action, query,
//! field-option source and trigger-field validation rule.
//!
//! The dispatcher is driven entirely by these tables: adding a slug means
//! adding a row here, not a branch in a handler.

use std::collections::HashMap;

use crate::entities::{FieldOption, TriggerEvent};
use crate::filters;

/// Filter hook applied to stored events before pagination.
pub type EventFilter = fn(Vec<TriggerEvent>, &HashMap<String, String>) -> Vec<TriggerEvent>;

/// Extra (beyond field presence) validation hook for action fields.
pub type ActionValidator = fn(&HashMap<String, String>) -> Result<(), String>;

/// One supported trigger slug.
pub struct TriggerSpec {
    pub slug: &'static str,
    /// The one field IFTTT must always send in `triggerFields`.
    pub required_field: &'static str,
    /// All configurable fields, required one first.
    pub fields: &'static [&'static str],
    pub filter: Option<EventFilter>,
    /// Trigger-field values used in the `test/setup` samples payload.
    pub sample_fields: &'static [(&'static str, &'static str)],
    /// Event ingredients used when synthesizing test-mode items and seeding
    /// the demo tenant.
    pub sample_data: &'static [(&'static str, &'static str)],
}

/// One supported action slug.
pub struct ActionSpec {
    pub slug: &'static str,
    /// Origin route the action is proxied to.
    pub origin_path: &'static str,
    pub required_fields: &'static [&'static str],
    pub validate: Option<ActionValidator>,
    pub sample_fields: &'static [(&'static str, &'static str)],
}

/// Where a query gets its rows.
pub enum QueryBacking {
    /// Served from the broker's stored events for a trigger slug.
    Events { trigger_slug: &'static str },
    /// Proxied live to the origin; offline returns an empty result.
    Origin { path: &'static str },
}

/// One supported query slug.
pub struct QuerySpec {
    pub slug: &'static str,
    pub backing: QueryBacking,
}

/// Maps a dropdown field to the origin route and cache slot backing it.
pub struct FieldOptionSource {
    /// Cache key in the broker's field-option store.
    pub field_slug: &'static str,
    pub origin_path: &'static str,
}

fn amount_positive(fields: &HashMap<String, String>) -> Result<(), String> {
    match fields.get("amount").and_then(|v| v.trim().parse::<f64>().ok()) {
        Some(amount) if amount > 0.0 => Ok(()),
        _ => Err("amount must be a positive number".to_owned()),
    }
}

fn move_funds_valid(fields: &HashMap<String, String>) -> Result<(), String> {
    amount_positive(fields)?;
    if fields.get("source") == fields.get("destination") {
        return Err("source and destination must differ".to_owned());
    }
    Ok(())
}

static TRIGGERS: &[TriggerSpec] = &[
    TriggerSpec {
        slug: "goal_achieved",
        required_field: "goal_name",
        fields: &["goal_name"],
        filter: None,
        sample_fields: &[("goal_name", "Emergency Fund")],
        sample_data: &[
            ("goal_name", "Emergency Fund"),
            ("goal_id", "goal-1"),
            ("amount", "5000.00"),
        ],
    },
    TriggerSpec {
        slug: "category_balance_threshold",
        required_field: "category",
        fields: &["category", "threshold_amount", "direction"],
        filter: Some(filters::balance_threshold),
        sample_fields: &[
            ("category", "cat-groceries"),
            ("threshold_amount", "100"),
            ("direction", "above"),
        ],
        sample_data: &[
            ("category", "cat-groceries"),
            ("category_name", "Groceries"),
            ("balance", "250.00"),
        ],
    },
    TriggerSpec {
        slug: "new_charge",
        required_field: "minimum_amount",
        fields: &["minimum_amount", "include_pending"],
        filter: Some(filters::new_charge),
        sample_fields: &[("minimum_amount", "10"), ("include_pending", "false")],
        sample_data: &[
            ("merchant", "Coffee Shop"),
            ("amount", "18.40"),
            ("is_pending", "false"),
            ("category_name", "Dining"),
        ],
    },
    TriggerSpec {
        slug: "savings_streak",
        required_field: "streak_months",
        fields: &["streak_months"],
        filter: None,
        sample_fields: &[("streak_months", "3")],
        sample_data: &[("streak_months", "3"), ("total_saved", "1200.00")],
    },
    TriggerSpec {
        slug: "budget_exceeded",
        required_field: "category",
        fields: &["category", "threshold_percent"],
        filter: Some(filters::budget_exceeded),
        sample_fields: &[("category", "cat-dining"), ("threshold_percent", "90")],
        sample_data: &[
            ("category", "cat-dining"),
            ("category_name", "Dining"),
            ("percent_used", "104"),
        ],
    },
];

static ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        slug: "budget_to",
        origin_path: "/ifttt/actions/budget-to",
        required_fields: &["category", "amount"],
        validate: Some(amount_positive),
        sample_fields: &[("category", "cat-groceries"), ("amount", "25")],
    },
    ActionSpec {
        slug: "budget_to_goal",
        origin_path: "/ifttt/actions/budget-to-goal",
        required_fields: &["goal", "amount"],
        validate: Some(amount_positive),
        sample_fields: &[("goal", "goal-1"), ("amount", "50")],
    },
    ActionSpec {
        slug: "move_funds",
        origin_path: "/ifttt/actions/move-funds",
        required_fields: &["source", "destination", "amount"],
        validate: Some(move_funds_valid),
        sample_fields: &[
            ("source", "cat-dining"),
            ("destination", "cat-groceries"),
            ("amount", "15"),
        ],
    },
];

static QUERIES: &[QuerySpec] = &[
    QuerySpec {
        slug: "list_achieved_goals",
        backing: QueryBacking::Events {
            trigger_slug: "goal_achieved",
        },
    },
    QuerySpec {
        slug: "list_category_budgets",
        backing: QueryBacking::Origin {
            path: "/ifttt/queries/category-budgets",
        },
    },
    QuerySpec {
        slug: "list_under_budget_categories",
        backing: QueryBacking::Origin {
            path: "/ifttt/queries/under-budget-categories",
        },
    },
    QuerySpec {
        slug: "budget_summary",
        backing: QueryBacking::Origin {
            path: "/ifttt/queries/budget-summary",
        },
    },
];

/// `(owner slug, field name)` pairs that resolve dropdown options from the
/// origin. Owner slugs cover both triggers and actions; field names are
/// unique within an owner.
static FIELD_OPTION_SOURCES: &[(&str, &str, FieldOptionSource)] = &[
    (
        "budget_to",
        "category",
        FieldOptionSource {
            field_slug: "category",
            origin_path: "/ifttt/field-options/category",
        },
    ),
    (
        "budget_to_goal",
        "goal",
        FieldOptionSource {
            field_slug: "goal",
            origin_path: "/ifttt/field-options/goal",
        },
    ),
    (
        "move_funds",
        "source",
        FieldOptionSource {
            field_slug: "category_all",
            origin_path: "/ifttt/field-options/category-all",
        },
    ),
    (
        "move_funds",
        "destination",
        FieldOptionSource {
            field_slug: "category_all",
            origin_path: "/ifttt/field-options/category-all",
        },
    ),
    (
        "category_balance_threshold",
        "category",
        FieldOptionSource {
            field_slug: "category_all",
            origin_path: "/ifttt/field-options/category-all",
        },
    ),
    (
        "budget_exceeded",
        "category",
        FieldOptionSource {
            field_slug: "category",
            origin_path: "/ifttt/field-options/category",
        },
    ),
    (
        "goal_achieved",
        "goal_name",
        FieldOptionSource {
            field_slug: "goal",
            origin_path: "/ifttt/field-options/goal",
        },
    ),
];

/// Look up a trigger spec by slug.
#[must_use]
pub fn trigger(slug: &str) -> Option<&'static TriggerSpec> {
    TRIGGERS.iter().find(|t| t.slug == slug)
}

/// Look up an action spec by slug.
#[must_use]
pub fn action(slug: &str) -> Option<&'static ActionSpec> {
    ACTIONS.iter().find(|a| a.slug == slug)
}

/// Look up a query spec by slug.
#[must_use]
pub fn query(slug: &str) -> Option<&'static QuerySpec> {
    QUERIES.iter().find(|q| q.slug == slug)
}

/// All registered trigger specs.
#[must_use]
pub fn triggers() -> &'static [TriggerSpec] {
    TRIGGERS
}

/// All registered action specs.
#[must_use]
pub fn actions() -> &'static [ActionSpec] {
    ACTIONS
}

/// All registered query specs.
#[must_use]
pub fn queries() -> &'static [QuerySpec] {
    QUERIES
}

/// Options that never need the origin.
#[must_use]
pub fn static_field_options(field: &str) -> Option<Vec<FieldOption>> {
    match field {
        "direction" => Some(vec![
            FieldOption::new("Above", "above"),
            FieldOption::new("Below", "below"),
        ]),
        "include_pending" => Some(vec![
            FieldOption::new("Pending only", "true"),
            FieldOption::new("Settled only", "false"),
        ]),
        _ => None,
    }
}

/// Resolve the origin-backed option source for `(owner slug, field)`.
#[must_use]
pub fn field_option_source(owner: &str, field: &str) -> Option<&'static FieldOptionSource> {
    FIELD_OPTION_SOURCES
        .iter()
        .find(|(o, f, _)| *o == owner && *f == field)
        .map(|(_, _, source)| source)
}

/// Validation rule for one trigger field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Whole number strictly greater than zero.
    PositiveInt,
    /// Whole number within an inclusive range.
    IntRange(i64, i64),
    /// Whole number at or above a minimum.
    MinInt(i64),
    /// Any number at or above zero.
    NonNegativeNumber,
}

impl FieldRule {
    fn check(self, value: &str) -> Result<(), String> {
        match self {
            Self::PositiveInt => match value.trim().parse::<i64>() {
                Ok(n) if n > 0 => Ok(()),
                _ => Err("must be a positive whole number".to_owned()),
            },
            Self::IntRange(lo, hi) => match value.trim().parse::<i64>() {
                Ok(n) if (lo..=hi).contains(&n) => Ok(()),
                _ => Err(format!("must be a whole number between {lo} and {hi}")),
            },
            Self::MinInt(min) => match value.trim().parse::<i64>() {
                Ok(n) if n >= min => Ok(()),
                _ => Err(format!("must be a whole number of at least {min}")),
            },
            Self::NonNegativeNumber => match value.trim().parse::<f64>() {
                Ok(n) if n >= 0.0 => Ok(()),
                _ => Err("must be zero or a positive number".to_owned()),
            },
        }
    }

    /// `(valid, invalid)` example values for the `test/setup` payload.
    #[must_use]
    pub fn examples(self) -> (&'static str, &'static str) {
        match self {
            Self::PositiveInt => ("100", "0"),
            Self::IntRange(..) => ("90", "500"),
            Self::MinInt(..) => ("3", "1"),
            Self::NonNegativeNumber => ("10", "-5"),
        }
    }
}

/// Per-field validation rules; fields not listed here always validate.
pub static FIELD_RULES: &[(&str, FieldRule)] = &[
    ("threshold_amount", FieldRule::PositiveInt),
    ("threshold_percent", FieldRule::IntRange(1, 100)),
    ("streak_months", FieldRule::MinInt(2)),
    ("minimum_amount", FieldRule::NonNegativeNumber),
];

/// The validation rule for a field, if one exists.
#[must_use]
pub fn field_rule(field: &str) -> Option<FieldRule> {
    FIELD_RULES
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, rule)| *rule)
}

/// Validate a single trigger-field value.
///
/// Empty strings are valid: every ruled field is optional and IFTTT sends
/// blanks for untouched inputs.
pub fn validate_trigger_field(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Ok(());
    }
    match FIELD_RULES.iter().find(|(name, _)| *name == field) {
        Some((_, rule)) => rule.check(value),
        None => Ok(()),
    }
}

/// Validate `actionFields` for a slug: field presence plus the slug's extra
/// numeric checks.
pub fn validate_action_fields(
    spec: &ActionSpec,
    fields: &HashMap<String, String>,
) -> Result<(), String> {
    for required in spec.required_fields {
        match fields.get(*required) {
            Some(value) if !value.is_empty() => {}
            _ => return Err(format!("missing required field: {required}")),
        }
    }
    match spec.validate {
        Some(validate) => validate(fields),
        None => Ok(()),
    }
}
