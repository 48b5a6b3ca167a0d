use crate::domain::model::RunReport;
use crate::domain::ports::Pipeline;
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;

pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub async fn run(&self) -> Result<RunReport> {
        let name = self.pipeline.name().to_string();
        tracing::info!("🚀 Starting pipeline: {}", name);

        // Extract
        tracing::info!("📥 Extracting data...");
        let extracted = self.pipeline.extract().await?;
        self.monitor.log_phase(&name, "extract");

        // Transform
        tracing::info!("🔄 Transforming data...");
        let transformed = self.pipeline.transform(extracted).await?;
        self.monitor.log_phase(&name, "transform");

        // Load
        tracing::info!("📤 Loading data...");
        let report = self.pipeline.load(transformed).await?;
        self.monitor.log_phase(&name, "load");
        self.monitor.log_final_stats();

        tracing::info!("✅ {}: {}", name, report.summary);
        for warning in &report.warnings {
            tracing::warn!("⚠️ {}", warning);
        }
        Ok(report)
    }
}
