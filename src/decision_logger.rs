use crate::decision::DecisionResult;

/// Receives every decision made by a [`Decider`](crate::Decider), e.g. to hand it to an event
/// transport.
///
/// Closures taking `&DecisionResult` implement this trait.
pub trait DecisionLogger {
    /// Called with every decision.
    fn log_decision(&self, decision: &DecisionResult);
}

pub(crate) struct NoopDecisionLogger;

impl DecisionLogger for NoopDecisionLogger {
    fn log_decision(&self, _decision: &DecisionResult) {}
}

impl<T: Fn(&DecisionResult)> DecisionLogger for T {
    fn log_decision(&self, decision: &DecisionResult) {
        self(decision);
    }
}
