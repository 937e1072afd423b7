//! Deterministic weighted selection for per-entity policies.
use crate::{
    bundle::{EntityConfig, Policy, PolicyEntityState},
    context::{key_string, lookup_field, Context},
    hash::hash,
};

/// Granularity of the pseudo-random draw. Changing it would reassign live experiments.
const DRAW_RESOLUTION: u32 = 10_000;

/// Largest dynamic allocation count accepted from the context. Larger counts do not match.
pub const MAX_DYNAMIC_ALLOCATIONS: usize = 1_000_000;

/// Outcome of a per-entity selection.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySelection {
    /// Entity the allocation was selected for.
    pub entity_id: String,
    /// Ordinal of the selected allocation, always below `allocation_count`.
    pub allocation_index: usize,
    /// Number of allocations selected from.
    pub allocation_count: usize,
}

/// Weights a per-entity selection draws against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Weights<'a> {
    /// Learned weights from the bundle's entity state.
    Learned(&'a [f64]),
    /// Equal weight for each of the given number of allocations.
    Uniform(usize),
}

impl Weights<'_> {
    /// Select an index for the (entity, unit, policy) triple. See [`weighted_select`].
    pub fn select(&self, entity_id: &str, unit_key_value: &str, policy_id: &str) -> usize {
        match *self {
            Weights::Learned(weights) => {
                weighted_select(weights, entity_id, unit_key_value, policy_id)
            }
            Weights::Uniform(count) => uniform_select(count, entity_id, unit_key_value, policy_id),
        }
    }
}

/// Build the entity id by joining the context values of `entity_keys` with `_`, in order.
///
/// Returns `None` if any key is missing or null, or if no keys are declared. The same rule is
/// used for in-process selection and for edge requests so both agree on entity identity.
pub fn derive_entity_id(entity_keys: &[String], context: &Context) -> Option<String> {
    if entity_keys.is_empty() {
        return None;
    }
    let parts = entity_keys
        .iter()
        .map(|key| lookup_field(context, key).and_then(key_string))
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("_"))
}

/// Number of allocations a per-entity policy selects from.
///
/// Fixed policies use their allocation list. Dynamic policies read a positive number from the
/// context field named by `countKey` and floor it. Returns `None` when there is nothing to select
/// or the dynamic count exceeds [`MAX_DYNAMIC_ALLOCATIONS`].
pub fn allocation_count(
    policy: &Policy,
    entity_config: &EntityConfig,
    context: &Context,
) -> Option<usize> {
    let count = match &entity_config.dynamic_allocations {
        Some(dynamic) => {
            let n = lookup_field(context, &dynamic.count_key)?.as_f64()?;
            if !(n.is_finite() && n > 0.0 && n.floor() <= MAX_DYNAMIC_ALLOCATIONS as f64) {
                return None;
            }
            n.floor() as usize
        }
        None => policy.allocations.len(),
    };
    (count > 0).then_some(count)
}

/// Pick the weight vector for `entity_id`: its own learned weights, else the `_global` prior,
/// else uniform. Vectors whose length differs from `count` are ignored.
pub fn resolve_weights<'a>(
    state: Option<&'a PolicyEntityState>,
    entity_id: &str,
    count: usize,
) -> Weights<'a> {
    let matching = |weights: &'a [f64]| (weights.len() == count).then_some(weights);

    state
        .and_then(|state| {
            state
                .entities
                .get(entity_id)
                .and_then(|entity| matching(&entity.weights))
                .or_else(|| state.global.as_ref().and_then(|g| matching(&g.weights)))
        })
        .map_or(Weights::Uniform(count), Weights::Learned)
}

fn selection_draw(entity_id: &str, unit_key_value: &str, policy_id: &str) -> f64 {
    let preimage = format!("{entity_id}:{unit_key_value}:{policy_id}");
    f64::from(hash(&preimage) % DRAW_RESOLUTION) / f64::from(DRAW_RESOLUTION)
}

fn cumulative_select(mut weights: impl ExactSizeIterator<Item = f64>, draw: f64) -> usize {
    let last = weights.len().saturating_sub(1);
    let mut cumulative_weight = 0.0;
    weights
        .position(|weight| {
            cumulative_weight += weight;
            cumulative_weight > draw
        })
        .unwrap_or(last)
}

/// Deterministically select an index from `weights` for the (entity, unit, policy) triple.
///
/// The draw is `(hash("{entity}:{unit}:{policy}") mod 10000) / 10000`; the first index whose
/// running weight sum exceeds the draw wins, falling back to the last index.
pub fn weighted_select(
    weights: &[f64],
    entity_id: &str,
    unit_key_value: &str,
    policy_id: &str,
) -> usize {
    if weights.len() <= 1 {
        return 0;
    }

    let draw = selection_draw(entity_id, unit_key_value, policy_id);
    cumulative_select(weights.iter().copied(), draw)
}

/// [`weighted_select`] over `count` equal weights, generated lazily.
///
/// The running sum is accumulated in floating point exactly as for an explicit vector, so
/// boundary draws resolve identically.
fn uniform_select(count: usize, entity_id: &str, unit_key_value: &str, policy_id: &str) -> usize {
    if count <= 1 {
        return 0;
    }
    let weight = 1.0 / count as f64;
    let draw = selection_draw(entity_id, unit_key_value, policy_id);
    cumulative_select((0..count).map(|_| weight), draw)
}

/// Run in-process (bundle-mode) selection for `policy`.
///
/// Returns `None` if the entity cannot be identified or there are no allocations, in which case
/// the policy does not match.
pub fn select_for_entity(
    policy: &Policy,
    entity_config: &EntityConfig,
    context: &Context,
    unit_key_value: &str,
    state: Option<&PolicyEntityState>,
) -> Option<EntitySelection> {
    let entity_id = derive_entity_id(&entity_config.entity_keys, context)?;
    let allocation_count = allocation_count(policy, entity_config, context)?;

    let allocation_index = if allocation_count == 1 {
        0
    } else {
        resolve_weights(state, &entity_id, allocation_count).select(
            &entity_id,
            unit_key_value,
            &policy.id,
        )
    };

    log::trace!(target: "rollout",
                policy_id:display = policy.id,
                entity_id:display = entity_id,
                allocation_index,
                allocation_count;
                "selected per-entity allocation");

    Some(EntitySelection {
        entity_id,
        allocation_index,
        allocation_count,
    })
}
