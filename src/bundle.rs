//! Configuration bundle: the versioned, immutable snapshot that drives resolution.
use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conditions::Condition;

/// Versioned configuration snapshot produced by the platform.
///
/// Invariants expected from the producer: `hashing.bucket_count > 0`, every parameter references
/// exactly one layer, parameter keys are unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigBundle {
    /// Version token, echoed in logs and server responses.
    pub version: BundleVersion,
    /// Organization the bundle belongs to.
    pub org_id: String,
    /// Project the bundle belongs to.
    pub project_id: String,
    /// Environment the bundle was built for.
    pub env: String,
    /// How units are bucketed.
    pub hashing: HashingConfig,
    /// Parameters that can be resolved, each owned by one layer.
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    /// Layers in evaluation order.
    #[serde(default)]
    pub layers: Vec<Layer>,
    /// Learned per-entity weights, keyed by policy id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_state: Option<HashMap<String, PolicyEntityState>>,
}

/// Opaque version token. Producers use either a timestamp or a string tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum BundleVersion {
    /// Numeric version, usually a timestamp.
    Number(i64),
    /// Opaque version tag.
    Text(String),
}

impl std::fmt::Display for BundleVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BundleVersion::Number(n) => write!(f, "{n}"),
            BundleVersion::Text(s) => f.write_str(s),
        }
    }
}

/// Unit bucketing settings shared by all layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashingConfig {
    /// Context field identifying the unit being bucketed.
    pub unit_key: String,
    /// Number of buckets per layer. Defaults to 10000.
    #[serde(default = "default_bucket_count")]
    pub bucket_count: u32,
}

fn default_bucket_count() -> u32 {
    10_000
}

/// A resolvable parameter and the layer that owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    /// Parameter key, as requested by callers.
    pub key: String,
    /// Id of the owning layer.
    pub layer_id: String,
    /// Bundle-level default. Takes precedence over the caller-supplied default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A partition of the bucket space. At most one policy per layer applies to a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    /// Layer id, also the salt of the layer's bucket hash.
    pub id: String,
    /// Policies in priority order. The first matching one applies.
    #[serde(default)]
    pub policies: Vec<TryParse<Policy>>,
}

impl Layer {
    /// Iterate over policies that parsed successfully, in declaration order.
    pub fn parsed_policies(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter().filter_map(|policy| match policy {
            TryParse::Parsed(policy) => Some(policy),
            TryParse::ParseFailed(raw) => {
                log::warn!(target: "rollout",
                           layer_id:display = self.id,
                           policy:serde = raw;
                           "skipping policy that failed to parse");
                None
            }
        })
    }
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed value.
    Parsed(T),
    /// Raw JSON that failed to parse.
    ParseFailed(Value),
}

/// An experiment definition: eligibility rules plus allocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Policy id.
    pub id: String,
    /// Lifecycle state. Only running policies match.
    pub state: PolicyState,
    /// Cheap pre-filter checked before conditions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligible_bucket_range: Option<BucketRange>,
    /// All conditions must match.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Variants of the policy.
    #[serde(default)]
    pub allocations: Vec<Allocation>,
    /// Present for per-entity policies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_config: Option<EntityConfig>,
    /// Context fields that may be attached to decisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_logging: Option<ContextLogging>,
}

impl Policy {
    /// Whether the policy is live and may match.
    pub fn is_running(&self) -> bool {
        self.state == PolicyState::Running
    }
}

/// Lifecycle state of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyState {
    /// Not yet launched.
    Draft,
    /// Live.
    Running,
    /// Temporarily stopped.
    Paused,
    /// Finished.
    Completed,
    /// Retired.
    Archived,
    /// Any state this version does not know about. Treated as inactive.
    #[serde(other)]
    Unknown,
}

/// Inclusive bucket range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRange {
    /// First bucket in the range.
    pub start: u32,
    /// Last bucket in the range, inclusive.
    pub end: u32,
}

/// One variant of a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    /// Allocation id, reported in layer attribution.
    pub id: String,
    /// Human-readable variant name.
    pub name: String,
    /// Bucket range for fixed (bucketed) policies. Per-entity policies address allocations by
    /// their ordinal index instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_range: Option<BucketRange>,
    /// Parameter key to override value.
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
}

/// Per-entity allocation settings of a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityConfig {
    /// Context fields that, joined in order with `_`, form the entity id.
    pub entity_keys: Vec<String>,
    /// Where the allocation is selected.
    pub resolution_mode: ResolutionMode,
    /// Read the allocation count from the context instead of the allocation list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_allocations: Option<DynamicAllocations>,
}

/// Where a per-entity allocation is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionMode {
    /// Weighted selection in-process, using [`PolicyEntityState`] from the bundle.
    Bundle,
    /// Selection computed remotely and supplied back as an [`EdgeResult`](crate::EdgeResult).
    Edge,
}

/// Allocation count read from the context instead of a fixed allocation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicAllocations {
    /// Context field holding the allocation count.
    pub count_key: String,
}

/// Context-logging allow-list of a policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextLogging {
    /// Context keys that may be attached to decisions made under this policy.
    #[serde(default)]
    pub allowed_fields: Vec<String>,
}

/// Learned weights of one per-entity policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEntityState {
    /// Weights keyed by entity id.
    #[serde(default)]
    pub entities: HashMap<String, EntityWeights>,
    /// Prior used for entities without their own weights.
    #[serde(rename = "_global", default, skip_serializing_if = "Option::is_none")]
    pub global: Option<EntityWeights>,
}

/// Weight vector for one entity, index-aligned with the policy's allocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityWeights {
    /// One weight per allocation.
    pub weights: Vec<f64>,
}

impl ConfigBundle {
    /// Find a parameter by key.
    pub fn parameter(&self, key: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.key == key)
    }

    /// Find a layer by id.
    pub fn layer(&self, layer_id: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == layer_id)
    }

    /// Learned state for the given per-entity policy, if any.
    pub fn policy_entity_state(&self, policy_id: &str) -> Option<&PolicyEntityState> {
        self.entity_state.as_ref()?.get(policy_id)
    }
}
