pub mod metrics;
pub mod pipeline_monitor;
pub mod reconcile;

pub use metrics::PipelineMetrics;
pub use pipeline_monitor::{
    classify, Health, MonitorThresholds, PipelineMonitor, PipelineSnapshot, StuckSignal,
};
pub use reconcile::{Alert, AlertChannel, AlertSeverity, LogAlertChannel, ReconcileReport, Reconciler};
