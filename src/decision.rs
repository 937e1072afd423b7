//! Decision assembly: wraps a resolution into a trackable decision.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    bundle::ConfigBundle,
    engine::{resolve, Assignments, LayerResolution, ResolveOptions},
    Context,
};

/// A trackable decision. Created fresh per [`decide`] call and owned by the caller afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResult {
    /// Unique per call.
    pub decision_id: String,
    /// Value for every requested parameter key.
    pub assignments: Assignments,
    /// Attribution and context details.
    pub metadata: DecisionMetadata,
}

/// Attribution details of a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionMetadata {
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
    /// Unit the decision was made for. `None` when resolution fell back to defaults.
    pub unit_key_value: Option<String>,
    /// One entry per bundle layer.
    pub layers: Vec<LayerResolution>,
    /// Context fields explicitly allowed by matched policies. Omitted when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered_context: Option<Context>,
}

/// Resolve `defaults` for `context` and wrap the result into a [`DecisionResult`].
pub fn decide(
    bundle: Option<&ConfigBundle>,
    context: &Context,
    defaults: &Assignments,
    options: ResolveOptions<'_>,
) -> DecisionResult {
    decide_at(bundle, context, defaults, options, Utc::now())
}

/// Same as [`decide`] with an explicit timestamp.
pub fn decide_at(
    bundle: Option<&ConfigBundle>,
    context: &Context,
    defaults: &Assignments,
    options: ResolveOptions<'_>,
    now: DateTime<Utc>,
) -> DecisionResult {
    let resolution = resolve(bundle, context, defaults, options);

    let mut allowed_fields = Vec::<&str>::new();
    for field in resolution
        .logging_policies
        .iter()
        .filter_map(|policy| policy.context_logging.as_ref())
        .flat_map(|logging| logging.allowed_fields.iter())
    {
        if !allowed_fields.contains(&field.as_str()) {
            allowed_fields.push(field.as_str());
        }
    }

    let filtered_context = allowed_fields
        .iter()
        .filter_map(|&field| Some((field.to_owned(), context.get(field)?.clone())))
        .collect::<Context>();

    DecisionResult {
        decision_id: Uuid::new_v4().to_string(),
        assignments: resolution.assignments,
        metadata: DecisionMetadata {
            timestamp: now,
            unit_key_value: resolution.unit_key_value,
            layers: resolution.layers,
            filtered_context: (!filtered_context.is_empty()).then_some(filtered_context),
        },
    }
}
