use std::sync::Arc;

use crate::{
    bundle_store::BundleStore,
    decision::{decide, DecisionResult},
    decision_logger::{DecisionLogger, NoopDecisionLogger},
    engine::{Assignments, ResolveOptions},
    hooks::HookRegistry,
    Context,
};

/// Everything a [`Decider`] needs.
pub struct DeciderConfig {
    /// Source of the active bundle.
    pub store: Arc<BundleStore>,
    /// Hooks run around every decision.
    pub hooks: HookRegistry,
    /// Receives every decision.
    pub logger: Box<dyn DecisionLogger + Send + Sync>,
}

impl DeciderConfig {
    /// A config with no hooks and a logger that drops every decision.
    pub fn new(store: Arc<BundleStore>) -> DeciderConfig {
        DeciderConfig {
            store,
            hooks: HookRegistry::new(),
            logger: Box::new(NoopDecisionLogger),
        }
    }

    /// Replace the hook registry.
    pub fn with_hooks(mut self, hooks: HookRegistry) -> DeciderConfig {
        self.hooks = hooks;
        self
    }

    /// Replace the decision logger.
    pub fn with_logger(
        mut self,
        logger: impl DecisionLogger + Send + Sync + 'static,
    ) -> DeciderConfig {
        self.logger = Box::new(logger);
        self
    }

    /// Build a [`Decider`] from this config.
    pub fn to_decider(self) -> Decider {
        Decider::new(self)
    }
}

/// Makes decisions against whatever bundle is currently in the store, running hooks and handing
/// every decision to the configured logger.
pub struct Decider {
    config: DeciderConfig,
}

impl Decider {
    /// Create a decider from `config`.
    pub fn new(config: DeciderConfig) -> Decider {
        Decider { config }
    }

    /// Decide `defaults` for `context`.
    ///
    /// The bundle is captured once at call start, so a concurrent `set_bundle` never affects a
    /// decision in progress. Without a bundle the decision carries the caller defaults.
    pub fn decide(
        &self,
        context: &Context,
        defaults: &Assignments,
        options: ResolveOptions<'_>,
    ) -> DecisionResult {
        let bundle = self.config.store.get_bundle();

        self.config.hooks.run_before_decide(context);

        let decision = decide(bundle.as_deref(), context, defaults, options);

        log::debug!(target: "rollout",
                    decision_id = decision.decision_id.as_str(),
                    layers = decision.metadata.layers.len();
                    "decided");

        self.config.hooks.run_after_decide(&decision);
        self.config.logger.log_decision(&decision);

        decision
    }

    /// The store decisions are made against.
    pub fn store(&self) -> &Arc<BundleStore> {
        &self.config.store
    }
}
