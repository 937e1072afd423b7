//! Boolean predicates over the runtime context.
//!
//! Every failure mode (unknown operator, type mismatch, invalid regex) makes the condition not
//! match, so malformed bundle data can only narrow eligibility, never widen it.
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::context::{lookup_field, Context};

/// Return `true` if all `conditions` match `context`. An empty list always matches.
pub fn evaluate_conditions(conditions: &[Condition], context: &Context) -> bool {
    conditions
        .iter()
        .all(|condition| condition.eval(context))
}

/// A single predicate over one context field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Dotted path into the context.
    pub field: String,
    /// Comparison to apply.
    pub operator: Operator,
    /// Operand of single-value operators. `Some(Value::Null)` and `None` are distinct.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
    /// Operand of `in`/`nin`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub values: Option<Value>,
}

/// Keep explicit `null` as `Some(Value::Null)`; only a missing key becomes `None`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl Condition {
    /// Whether the condition holds for `context`.
    pub fn eval(&self, context: &Context) -> bool {
        self.operator.eval(
            lookup_field(context, &self.field),
            self.value.as_ref(),
            self.values.as_ref(),
        )
    }
}

/// Condition operators. See [`Operator::eval`] for the exact semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    /// Strict equality.
    Eq,
    /// Strict inequality.
    Neq,
    /// Membership in `values`.
    In,
    /// Non-membership in `values`.
    Nin,
    /// Numeric greater than.
    Gt,
    /// Numeric greater than or equal.
    Gte,
    /// Numeric less than.
    Lt,
    /// Numeric less than or equal.
    Lte,
    /// Substring match.
    Contains,
    /// String prefix match.
    StartsWith,
    /// String suffix match.
    EndsWith,
    /// Regular expression match.
    Regex,
    /// Field present and not null.
    Exists,
    /// Field absent or null.
    NotExists,
    /// Operator not known to this version. Never matches.
    #[serde(other)]
    Unknown,
}

impl Operator {
    /// Apply the operator to the looked-up `field` value. Returns `false` if the operator cannot
    /// be applied or there's a misconfiguration.
    pub fn eval(
        &self,
        field: Option<&Value>,
        value: Option<&Value>,
        values: Option<&Value>,
    ) -> bool {
        self.try_eval(field, value, values).unwrap_or(false)
    }

    /// Try applying the operator, returning `None` if it cannot be applied.
    fn try_eval(
        &self,
        field: Option<&Value>,
        value: Option<&Value>,
        values: Option<&Value>,
    ) -> Option<bool> {
        match self {
            Self::Eq => Some(strict_equals(field, value)),
            Self::Neq => Some(!strict_equals(field, value)),

            Self::In | Self::Nin => {
                let is_in = match values {
                    Some(Value::Array(candidates)) => candidates
                        .iter()
                        .any(|candidate| strict_equals(field, Some(candidate))),
                    // Not a list: `in` fails closed, `nin` holds.
                    _ => return Some(*self == Self::Nin),
                };
                Some(is_in == (*self == Self::In))
            }

            Self::Gt | Self::Gte | Self::Lt | Self::Lte => {
                let field = field?.as_f64()?;
                let value = value?.as_f64()?;
                Some(match self {
                    Self::Gt => field > value,
                    Self::Gte => field >= value,
                    Self::Lt => field < value,
                    Self::Lte => field <= value,
                    _ => {
                        // unreachable
                        return None;
                    }
                })
            }

            Self::Contains | Self::StartsWith | Self::EndsWith => {
                let field = field?.as_str()?;
                let value = value?.as_str()?;
                Some(match self {
                    Self::Contains => field.contains(value),
                    Self::StartsWith => field.starts_with(value),
                    Self::EndsWith => field.ends_with(value),
                    _ => {
                        // unreachable
                        return None;
                    }
                })
            }

            Self::Regex => {
                let field = field?.as_str()?;
                let regex = Regex::new(value?.as_str()?).ok()?;
                Some(regex.is_match(field))
            }

            Self::Exists => Some(is_present(field)),
            Self::NotExists => Some(!is_present(field)),

            Self::Unknown => None,
        }
    }
}

fn is_present(field: Option<&Value>) -> bool {
    !matches!(field, None | Some(Value::Null))
}

/// Strict equality: same type and same value. Absent equals only absent; numbers compare by
/// numeric value regardless of integer/float representation. Objects and arrays have identity
/// semantics, so a context value never equals one.
fn strict_equals(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(Value::Object(_) | Value::Array(_)), _)
        | (_, Some(Value::Object(_) | Value::Array(_))) => false,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a.as_f64() == b.as_f64(),
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
