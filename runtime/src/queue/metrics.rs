//! Metrics for [super::Queue].

use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Metrics for [super::Queue].
#[derive(Default)]
pub struct Metrics {
    /// Tasks waiting to be stepped.
    pub pending: Gauge,
    /// Tasks that succeeded and have not been taken.
    pub succeeded: Gauge,
    /// Tasks that failed and have not been taken.
    pub failed: Gauge,
    /// Tasks that timed out and have not been taken.
    pub timed_out: Gauge,
    /// Drain cycles that stepped at least one task.
    pub cycles: Counter,
}

impl Metrics {
    /// Register metrics with the given registry.
    pub fn register(&self, registry: &mut Registry) {
        registry.register("pending", "Tasks waiting to be stepped", self.pending.clone());
        registry.register(
            "succeeded",
            "Tasks that succeeded and have not been taken",
            self.succeeded.clone(),
        );
        registry.register(
            "failed",
            "Tasks that failed and have not been taken",
            self.failed.clone(),
        );
        registry.register(
            "timed_out",
            "Tasks that timed out and have not been taken",
            self.timed_out.clone(),
        );
        registry.register(
            "cycles",
            "Drain cycles that stepped at least one task",
            self.cycles.clone(),
        );
    }
}
