//! Resolution engine: computes parameter assignments and per-layer attribution for one unit.
//!
//! Resolution is a pure function of (bundle, context, defaults, edge results). It never fails:
//! whenever data is missing it falls back to bundle defaults, then to caller defaults.
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    bucketing::{compute_bucket, find_matching_allocation},
    bundle::{ConfigBundle, EntityConfig, Policy, ResolutionMode},
    conditions::evaluate_conditions,
    context::{key_string, lookup_field, Context},
    selection::{allocation_count, select_for_entity},
};

/// Parameter key to value.
pub type Assignments = HashMap<String, Value>;

/// Pre-computed edge results, keyed by policy id.
pub type EdgeResults = HashMap<String, EdgeResult>;

/// Allocation chosen out-of-process for an edge-mode policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeResult {
    /// Ordinal of the selected allocation.
    pub allocation_index: usize,
    /// Entity the result was computed for.
    pub entity_id: String,
}

/// Optional inputs to [`resolve`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions<'a> {
    /// Results for edge-mode policies. Edge policies without an entry are skipped.
    pub edge_results: Option<&'a EdgeResults>,
}

/// Attribution record for one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerResolution {
    /// Layer id.
    pub layer_id: String,
    /// Bucket of the unit in this layer.
    pub bucket: u32,
    /// Matched policy, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    /// Matched allocation id, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_id: Option<String>,
    /// Matched allocation name, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_name: Option<String>,
    /// Entity the allocation was selected for (per-entity policies only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// The layer has no requested parameters and is recorded for attribution only.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub attribution_only: bool,
}

/// Output of [`resolve`].
#[derive(Debug, Clone)]
pub struct Resolution<'a> {
    /// Value for every requested key, never partial.
    pub assignments: Assignments,
    /// `None` if resolution fell back to caller defaults before bucketing.
    pub unit_key_value: Option<String>,
    /// One entry per bundle layer, in bundle order.
    pub layers: Vec<LayerResolution>,
    /// Matched policies that declare a context-logging allow-list.
    pub logging_policies: Vec<&'a Policy>,
}

/// Allocation picked for a matched policy.
struct MatchedAllocation<'a> {
    allocation_id: String,
    allocation_name: String,
    overrides: Option<&'a HashMap<String, Value>>,
    entity_id: Option<String>,
}

/// Resolve `defaults.keys()` for the unit described by `context`.
///
/// Priority per key, lowest to highest: caller default, bundle parameter default, overrides of
/// matched allocations in bundle layer order. Only layers with at least one requested parameter
/// apply overrides, and only to requested keys. Every bundle layer is bucketed and reported,
/// including layers none of whose parameters were requested.
pub fn resolve<'a>(
    bundle: Option<&'a ConfigBundle>,
    context: &Context,
    defaults: &Assignments,
    options: ResolveOptions<'_>,
) -> Resolution<'a> {
    let mut resolution = Resolution {
        assignments: defaults.clone(),
        unit_key_value: None,
        layers: Vec::new(),
        logging_policies: Vec::new(),
    };

    let Some(bundle) = bundle else {
        log::debug!(target: "rollout", "no configuration bundle available, using defaults");
        return resolution;
    };

    let unit_key = &bundle.hashing.unit_key;
    let Some(unit_key_value) = lookup_field(context, unit_key).and_then(key_string) else {
        log::debug!(target: "rollout",
                    unit_key:display = unit_key;
                    "unit key missing from context, using defaults");
        return resolution;
    };

    let mut requested_layers = HashSet::<&str>::new();
    for parameter in bundle
        .parameters
        .iter()
        .filter(|parameter| defaults.contains_key(&parameter.key))
    {
        if let Some(default) = &parameter.default {
            resolution
                .assignments
                .insert(parameter.key.clone(), default.clone());
        }
        requested_layers.insert(parameter.layer_id.as_str());
    }

    for layer in &bundle.layers {
        let bucket = compute_bucket(&unit_key_value, &layer.id, bundle.hashing.bucket_count);
        let has_requested = requested_layers.contains(layer.id.as_str());

        let matched = layer.parsed_policies().find_map(|policy| {
            match_policy(bundle, policy, bucket, context, &unit_key_value, options)
                .map(|allocation| (policy, allocation))
        });

        let mut entry = LayerResolution {
            layer_id: layer.id.clone(),
            bucket,
            policy_id: None,
            allocation_id: None,
            allocation_name: None,
            entity_id: None,
            attribution_only: !has_requested,
        };

        if let Some((policy, allocation)) = matched {
            log::trace!(target: "rollout",
                        layer_id:display = layer.id,
                        bucket,
                        policy_id:display = policy.id,
                        allocation_id:display = allocation.allocation_id;
                        "layer matched");

            // Any requested key may be overridden, including keys of another layer. Later
            // layers can overwrite it again.
            let overrides = allocation.overrides.filter(|_| has_requested);
            for (key, value) in overrides.into_iter().flatten() {
                if let Some(assigned) = resolution.assignments.get_mut(key) {
                    *assigned = value.clone();
                }
            }

            if policy.context_logging.is_some() {
                resolution.logging_policies.push(policy);
            }

            entry.policy_id = Some(policy.id.clone());
            entry.allocation_id = Some(allocation.allocation_id);
            entry.allocation_name = Some(allocation.allocation_name);
            entry.entity_id = allocation.entity_id;
        }

        resolution.layers.push(entry);
    }

    log::debug!(target: "rollout",
                version:display = bundle.version,
                unit_key_value:display = unit_key_value,
                layers = resolution.layers.len();
                "resolved assignments");

    resolution.unit_key_value = Some(unit_key_value);
    resolution
}

/// Return the allocation `policy` assigns, or `None` if the policy does not apply and the next
/// policy in the layer should be tried.
fn match_policy<'a>(
    bundle: &'a ConfigBundle,
    policy: &'a Policy,
    bucket: u32,
    context: &Context,
    unit_key_value: &str,
    options: ResolveOptions<'_>,
) -> Option<MatchedAllocation<'a>> {
    if !policy.is_running() {
        return None;
    }
    // Bucket range is checked before conditions as it's cheaper.
    if policy
        .eligible_bucket_range
        .is_some_and(|range| !range.contains(bucket))
    {
        return None;
    }
    if !evaluate_conditions(&policy.conditions, context) {
        return None;
    }

    match &policy.entity_config {
        Some(entity_config) if entity_config.resolution_mode == ResolutionMode::Edge => {
            let Some(edge) = options
                .edge_results
                .and_then(|results| results.get(&policy.id))
            else {
                log::trace!(target: "rollout",
                            policy_id:display = policy.id;
                            "no edge result for policy, skipping");
                return None;
            };
            per_entity_allocation(
                policy,
                entity_config,
                context,
                edge.allocation_index,
                edge.entity_id.clone(),
            )
        }
        Some(entity_config) => {
            let selection = select_for_entity(
                policy,
                entity_config,
                context,
                unit_key_value,
                bundle.policy_entity_state(&policy.id),
            )?;
            per_entity_allocation(
                policy,
                entity_config,
                context,
                selection.allocation_index,
                selection.entity_id,
            )
        }
        None => {
            let allocation = find_matching_allocation(bucket, &policy.allocations)?;
            Some(MatchedAllocation {
                allocation_id: allocation.id.clone(),
                allocation_name: allocation.name.clone(),
                overrides: Some(&allocation.parameters),
                entity_id: None,
            })
        }
    }
}

/// Map a selected ordinal `index` to an allocation. Dynamic allocations are synthetic: they are
/// named by their index and carry no overrides. An index outside the live allocation count skips
/// the policy.
fn per_entity_allocation<'a>(
    policy: &'a Policy,
    entity_config: &EntityConfig,
    context: &Context,
    index: usize,
    entity_id: String,
) -> Option<MatchedAllocation<'a>> {
    if entity_config.dynamic_allocations.is_some() {
        let count = allocation_count(policy, entity_config, context);
        if !count.is_some_and(|count| index < count) {
            log::warn!(target: "rollout",
                       policy_id:display = policy.id,
                       index;
                       "allocation index outside dynamic allocation count, skipping policy");
            return None;
        }
        return Some(MatchedAllocation {
            allocation_id: index.to_string(),
            allocation_name: index.to_string(),
            overrides: None,
            entity_id: Some(entity_id),
        });
    }

    let Some(allocation) = policy.allocations.get(index) else {
        log::warn!(target: "rollout",
                   policy_id:display = policy.id,
                   index;
                   "allocation index out of range, skipping policy");
        return None;
    };
    Some(MatchedAllocation {
        allocation_id: allocation.id.clone(),
        allocation_name: allocation.name.clone(),
        overrides: Some(&allocation.parameters),
        entity_id: Some(entity_id),
    })
}
