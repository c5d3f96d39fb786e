use crate::core::Pipeline;
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;

/// Drives a [`Pipeline`] through extract, transform and load.
pub struct AnalyticsEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> AnalyticsEngine<P> {
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

    pub async fn run(&self) -> Result<String> {
        tracing::info!("Starting post-fire analysis");
        self.monitor.log_stats("Start");

        tracing::info!("Acquiring data...");
        let extracted = self.pipeline.extract().await?;
        tracing::info!(
            "Found {} products, downloaded {}, {} GEDI URLs",
            extracted.products.len(),
            extracted.downloaded.len(),
            extracted.gedi_urls.len()
        );
        self.monitor.log_stats("Extract");

        tracing::info!("Preprocessing scenes...");
        let transformed = self.pipeline.transform(extracted).await?;
        tracing::info!("Preprocessed {} scenes", transformed.scenes.len());
        self.monitor.log_stats("Transform");

        tracing::info!("Writing outputs...");
        let output_path = self.pipeline.load(transformed).await?;
        tracing::info!("Output saved to: {}", output_path);
        self.monitor.log_stats("Load");

        self.monitor.log_final_stats();
        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{ExtractResult, ProcessedScene, TransformResult};
    use crate::utils::error::AnalyticsError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingPipeline {
        calls: AtomicUsize,
        fail_transform: bool,
    }

    #[async_trait::async_trait]
    impl Pipeline for CountingPipeline {
        async fn extract(&self) -> Result<ExtractResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExtractResult {
                gedi_urls: vec!["u".to_string()],
                ..ExtractResult::default()
            })
        }

        async fn transform(&self, data: ExtractResult) -> Result<TransformResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_transform {
                return Err(AnalyticsError::processing("boom"));
            }
            Ok(TransformResult {
                scenes: vec![ProcessedScene {
                    name: "s".to_string(),
                    width: 1,
                    height: 1,
                    mean_db: None,
                    geotiff: Vec::new(),
                }],
                manifest_csv: String::new(),
                gedi_urls: data.gedi_urls,
            })
        }

        async fn load(&self, result: TransformResult) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("out/{}", result.scenes.len()))
        }
    }

    #[tokio::test]
    async fn test_engine_runs_all_phases() {
        let engine = AnalyticsEngine::new(CountingPipeline::default());
        let output = engine.run().await.unwrap();
        assert_eq!(output, "out/1");
        assert_eq!(engine.pipeline().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_engine_stops_on_error() {
        let engine = AnalyticsEngine::new_with_monitoring(
            CountingPipeline {
                fail_transform: true,
                ..CountingPipeline::default()
            },
            true,
        );
        assert!(engine.run().await.is_err());
        assert_eq!(engine.pipeline().calls.load(Ordering::SeqCst), 2);
    }
}
