// Prometheus export
// Gauges mirroring the monitor snapshot, scraped by the dashboard which
// lives outside this core.

use anyhow::{Context, Result};
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::pipeline_monitor::{Health, PipelineSnapshot};

pub struct PipelineMetrics {
    registry: Registry,
    signals_by_state: IntGaugeVec,
    stuck_signals: IntGauge,
    throughput_per_hour: IntGauge,
    generated_last_hour: IntGauge,
    /// 0 = healthy, 1 = warning, 2 = critical
    health: IntGauge,
}

impl PipelineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let signals_by_state = IntGaugeVec::new(
            Opts::new("pipeline_signals_by_state", "Signals currently in each state"),
            &["state"],
        )
        .context("create signals_by_state gauge")?;
        let stuck_signals = IntGauge::new(
            "pipeline_stuck_signals",
            "Signals stuck in a non-settled state past the stuck threshold",
        )
        .context("create stuck_signals gauge")?;
        let throughput_per_hour = IntGauge::new(
            "pipeline_throughput_per_hour",
            "Signals settled within the last hour",
        )
        .context("create throughput gauge")?;
        let generated_last_hour = IntGauge::new(
            "pipeline_generated_last_hour",
            "Signals created within the last hour",
        )
        .context("create generated gauge")?;
        let health = IntGauge::new(
            "pipeline_health",
            "Pipeline health: 0 healthy, 1 warning, 2 critical",
        )
        .context("create health gauge")?;

        registry
            .register(Box::new(signals_by_state.clone()))
            .context("register signals_by_state")?;
        registry
            .register(Box::new(stuck_signals.clone()))
            .context("register stuck_signals")?;
        registry
            .register(Box::new(throughput_per_hour.clone()))
            .context("register throughput")?;
        registry
            .register(Box::new(generated_last_hour.clone()))
            .context("register generated")?;
        registry
            .register(Box::new(health.clone()))
            .context("register health")?;

        Ok(Self {
            registry,
            signals_by_state,
            stuck_signals,
            throughput_per_hour,
            generated_last_hour,
            health,
        })
    }

    /// Update every gauge from a snapshot
    pub fn record(&self, snapshot: &PipelineSnapshot, health: Health) {
        self.signals_by_state.reset();
        for (state, count) in &snapshot.counts_by_state {
            let label = state.to_string();
            self.signals_by_state
                .with_label_values(&[label.as_str()])
                .set(*count as i64);
        }
        self.stuck_signals.set(snapshot.stuck_signals.len() as i64);
        self.throughput_per_hour
            .set(snapshot.throughput_per_hour as i64);
        self.generated_last_hour
            .set(snapshot.generated_last_hour as i64);
        self.health.set(match health {
            Health::Healthy => 0,
            Health::Warning => 1,
            Health::Critical => 2,
        });
    }

    /// Render the registry in the text exposition format
    pub fn export(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .context("encode metrics")?;
        String::from_utf8(buf).context("metrics are not utf-8")
    }
}
