//! Lifecycle hooks around decisions.
//!
//! Hooks run in descending priority order (registration order for ties). A hook that returns an
//! error or panics is logged and skipped; the remaining hooks still run and the decision is
//! unaffected.
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::{decision::DecisionResult, Context};

/// Error returned by a hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// A decision lifecycle hook. All stages are optional.
pub trait DecisionHook: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Higher priority hooks run first.
    fn priority(&self) -> i32 {
        0
    }

    /// Called before resolution with the caller context.
    fn before_decide(&self, _context: &Context) -> Result<(), HookError> {
        Ok(())
    }

    /// Called with every assembled decision.
    fn after_decide(&self, _decision: &DecisionResult) -> Result<(), HookError> {
        Ok(())
    }
}

/// Ordered set of hooks. Hooks never affect the decision itself.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Box<dyn DecisionHook>>,
}

impl HookRegistry {
    /// Create an empty registry.
    pub fn new() -> HookRegistry {
        HookRegistry::default()
    }

    /// Add `hook`, keeping hooks sorted by descending priority.
    pub fn register(&mut self, hook: impl DecisionHook + 'static) -> &mut HookRegistry {
        self.hooks.push(Box::new(hook));
        // stable sort keeps registration order among equal priorities
        self.hooks.sort_by_key(|hook| std::cmp::Reverse(hook.priority()));
        self
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether no hooks are registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every `before_decide` stage.
    pub fn run_before_decide(&self, context: &Context) {
        self.run("before_decide", |hook| hook.before_decide(context));
    }

    /// Run every `after_decide` stage.
    pub fn run_after_decide(&self, decision: &DecisionResult) {
        self.run("after_decide", |hook| hook.after_decide(decision));
    }

    fn run(&self, stage: &str, f: impl Fn(&dyn DecisionHook) -> Result<(), HookError>) {
        for hook in &self.hooks {
            match catch_unwind(AssertUnwindSafe(|| f(hook.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::warn!(target: "rollout",
                               hook = hook.name(),
                               stage;
                               "hook failed: {}", err);
                }
                Err(_) => {
                    log::warn!(target: "rollout",
                               hook = hook.name(),
                               stage;
                               "hook panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use crate::{
        decision::decide,
        engine::{
            tests::{context, defaults},
            ResolveOptions,
        },
        Context,
    };

    use super::{DecisionHook, HookError, HookRegistry};

    enum Behavior {
        Succeed,
        Fail,
        Panic,
    }

    struct RecordingHook {
        name: &'static str,
        priority: i32,
        behavior: Behavior,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl DecisionHook for RecordingHook {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn before_decide(&self, _context: &Context) -> Result<(), HookError> {
            self.calls.lock().unwrap().push(format!("{}:before", self.name));
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err("boom".into()),
                Behavior::Panic => panic!("hook panic"),
            }
        }
    }

    fn hook(
        name: &'static str,
        priority: i32,
        behavior: Behavior,
        calls: &Arc<Mutex<Vec<String>>>,
    ) -> RecordingHook {
        RecordingHook {
            name,
            priority,
            behavior,
            calls: calls.clone(),
        }
    }

    #[test]
    fn hooks_run_in_priority_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        registry
            .register(hook("low", -1, Behavior::Succeed, &calls))
            .register(hook("first-default", 0, Behavior::Succeed, &calls))
            .register(hook("high", 10, Behavior::Succeed, &calls))
            .register(hook("second-default", 0, Behavior::Succeed, &calls));

        registry.run_before_decide(&context(json!({})));

        assert_eq!(
            *calls.lock().unwrap(),
            [
                "high:before",
                "first-default:before",
                "second-default:before",
                "low:before"
            ]
        );
    }

    #[test]
    fn failing_and_panicking_hooks_are_isolated() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        registry
            .register(hook("fails", 3, Behavior::Fail, &calls))
            .register(hook("panics", 2, Behavior::Panic, &calls))
            .register(hook("works", 1, Behavior::Succeed, &calls));

        registry.run_before_decide(&context(json!({})));

        assert_eq!(
            *calls.lock().unwrap(),
            ["fails:before", "panics:before", "works:before"]
        );
    }

    #[test]
    fn default_stages_are_noops() {
        struct Silent;
        impl DecisionHook for Silent {
            fn name(&self) -> &str {
                "silent"
            }
        }

        let mut registry = HookRegistry::new();
        registry.register(Silent);
        assert_eq!(registry.len(), 1);

        let decision = decide(None, &context(json!({})), &defaults(), ResolveOptions::default());
        registry.run_after_decide(&decision);
    }
}
