//! Deterministic evaluation core for layered experiments and per-entity allocations.
//!
//! # Overview
//!
//! A [`ConfigBundle`] describes parameters, the layers they live in, and the policies (experiments)
//! running in each layer. Given a caller [`Context`] and caller defaults, [`resolve`] buckets the
//! unit into every layer, picks at most one matching policy per layer and produces parameter
//! [`Assignments`] plus per-layer attribution. [`decide`] wraps that into a trackable
//! [`DecisionResult`].
//!
//! Policies can also allocate per *entity* (e.g. a store) instead of per unit. Such policies are
//! either resolved in-process from learned weights shipped in the bundle, or remotely through the
//! [`DecisionClient`], whose results are fed back via [`ResolveOptions`].
//!
//! A [`Decider`] ties these together for long-running services: it reads the active bundle from a
//! [`BundleStore`], runs registered [`DecisionHook`]s and hands every decision to a
//! [`DecisionLogger`].
//!
//! # Error Handling
//!
//! Evaluation never fails: missing bundles, missing context fields and malformed conditions all
//! degrade to defaults. The decision client logs transport failures and returns `None`; the
//! [`Error`] enum describes what went wrong in those log records.
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate with target `rollout`. Install
//! any `log`-compatible logger to see these messages.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod bucketing;
mod bundle;
mod bundle_store;
mod cache;
mod conditions;
mod config;
mod context;
mod decider;
mod decision;
mod decision_client;
mod decision_logger;
mod engine;
mod error;
mod hash;
mod hooks;
mod selection;
mod transport;

pub use bucketing::{compute_bucket, find_matching_allocation};
pub use bundle::{
    Allocation, BucketRange, BundleVersion, ConfigBundle, ContextLogging, DynamicAllocations,
    EntityConfig, EntityWeights, HashingConfig, Layer, Parameter, Policy, PolicyEntityState,
    PolicyState, ResolutionMode, TryParse,
};
pub use bundle_store::BundleStore;
pub use cache::{Clock, DecisionCache, EdgeResultCache, ManualClock, SystemClock, TtlCache};
pub use conditions::{evaluate_conditions, Condition, Operator};
pub use config::DecisionClientConfig;
pub use context::{key_string, lookup_field, Context};
pub use decider::{Decider, DeciderConfig};
pub use decision::{decide, decide_at, DecisionMetadata, DecisionResult};
pub use decision_client::{
    create_edge_decide_request, DecisionClient, EdgeDecideRequest, EdgeDecideResponse,
    ResolveRequest, ServerResolveResponse,
};
pub use decision_logger::DecisionLogger;
pub use engine::{
    resolve, Assignments, EdgeResult, EdgeResults, LayerResolution, Resolution, ResolveOptions,
};
pub use error::{Error, Result};
pub use hash::hash;
pub use hooks::{DecisionHook, HookError, HookRegistry};
pub use selection::{
    allocation_count, derive_entity_id, resolve_weights, select_for_entity, weighted_select,
    EntitySelection, Weights, MAX_DYNAMIC_ALLOCATIONS,
};
pub use transport::{HttpRequest, ReqwestTransport, Transport};
