//! Metrics definitions for the HTTP purger.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS_ISSUED: MetricDef = MetricDef {
    name: "purge.requests.issued",
    metric_type: MetricType::Counter,
    description: "Number of outbound invalidation requests. Tagged with purger.",
};

pub const INVALIDATIONS_SUCCEEDED: MetricDef = MetricDef {
    name: "purge.invalidations.succeeded",
    metric_type: MetricType::Counter,
    description: "Number of invalidations that succeeded. Tagged with purger.",
};

pub const INVALIDATIONS_FAILED: MetricDef = MetricDef {
    name: "purge.invalidations.failed",
    metric_type: MetricType::Counter,
    description: "Number of invalidations that failed. Tagged with purger, reason.",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "purge.request.duration",
    metric_type: MetricType::Histogram,
    description: "Outbound request duration in seconds. Tagged with purger.",
};

pub const BUDGET_REMAINING: MetricDef = MetricDef {
    name: "purge.budget.remaining",
    metric_type: MetricType::Gauge,
    description: "Requests left in the lifetime budget. Tagged with purger.",
};

pub const COOLDOWN_DURATION: MetricDef = MetricDef {
    name: "purge.cooldown.duration",
    metric_type: MetricType::Histogram,
    description: "Time spent in the post-batch cooldown in seconds. Tagged with purger.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUESTS_ISSUED,
    INVALIDATIONS_SUCCEEDED,
    INVALIDATIONS_FAILED,
    REQUEST_DURATION,
    BUDGET_REMAINING,
    COOLDOWN_DURATION,
];
