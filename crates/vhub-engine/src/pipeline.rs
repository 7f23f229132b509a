//! Analysis pipeline.
//!
//! Turns an [`AnalysisRequest`] into an [`AnalysisResult`] for the latest
//! camera frame: cache lookup, classifier resolution, concurrent inference on
//! the blocking pool, depth and 3D enrichment, filtering and fusion.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{AcquireError, Semaphore};
use tokio::task::JoinError;
use tracing::{debug, info, warn};
use vhub_models::{AnalysisRequest, AnalysisResult, Detection};

use crate::cache::ResultCache;
use crate::classifier::Classifier;
use crate::error::{EngineError, EngineResult};
use crate::frame::{Frame, FrameSource};
use crate::geometry;
use crate::metrics;
use crate::registry::ClassifierRegistry;

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Upper bound on a single classifier's inference time.
    pub classifier_timeout: Duration,
    /// Classifiers allowed to run inference at the same time.
    pub max_parallel_inference: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classifier_timeout: Duration::from_secs(2),
            max_parallel_inference: 4,
        }
    }
}

/// Running pipeline statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub empty_results: u64,
    pub classifier_failures: u64,
    pub classifier_timeouts: u64,
    /// Exponential moving average over analyzed (non-cached) requests.
    pub avg_processing_time_ms: f64,
    pub last_processing_time_ms: f64,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl PipelineStats {
    fn record_processed(&mut self, elapsed_ms: f64) {
        self.avg_processing_time_ms = if self.last_run_at.is_none() {
            elapsed_ms
        } else {
            self.avg_processing_time_ms * 0.9 + elapsed_ms * 0.1
        };
        self.last_processing_time_ms = elapsed_ms;
        self.last_run_at = Some(Utc::now());
    }
}

enum ClassifierOutcome {
    Completed(Vec<Detection>),
    Failed,
    TimedOut,
}

/// Why a classifier run produced no result, other than its own error.
enum RunError {
    Closed(AcquireError),
    Join(JoinError),
}

impl From<AcquireError> for RunError {
    fn from(e: AcquireError) -> Self {
        Self::Closed(e)
    }
}

impl From<JoinError> for RunError {
    fn from(e: JoinError) -> Self {
        Self::Join(e)
    }
}

/// Marks a classifier busy until dropped.
struct InFlight(Arc<dyn Classifier>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.core().end_run();
    }
}

pub struct ProcessingPipeline {
    registry: Arc<ClassifierRegistry>,
    cache: Arc<ResultCache>,
    frames: Arc<dyn FrameSource>,
    config: PipelineConfig,
    inference_slots: Arc<Semaphore>,
    stats: Mutex<PipelineStats>,
    latest: RwLock<Option<AnalysisResult>>,
}

impl ProcessingPipeline {
    pub fn new(
        registry: Arc<ClassifierRegistry>,
        cache: Arc<ResultCache>,
        frames: Arc<dyn FrameSource>,
        config: PipelineConfig,
    ) -> Self {
        let slots = config.max_parallel_inference.max(1);
        Self {
            registry,
            cache,
            frames,
            config,
            inference_slots: Arc::new(Semaphore::new(slots)),
            stats: Mutex::new(PipelineStats::default()),
            latest: RwLock::new(None),
        }
    }

    /// Analyze the latest frame.
    pub async fn process_request(&self, request: &AnalysisRequest) -> EngineResult<AnalysisResult> {
        request.validate()?;
        let frame = self
            .frames
            .latest_frame()
            .ok_or(EngineError::NoFrameAvailable)?;
        self.process_frame(frame, request).await
    }

    /// Analyze a specific frame.
    pub async fn process_frame(
        &self,
        frame: Arc<Frame>,
        request: &AnalysisRequest,
    ) -> EngineResult<AnalysisResult> {
        request.validate()?;
        let started = Instant::now();
        self.update_stats(|s| s.total_requests += 1);

        if let Some(hit) = self.cache.get(&frame, request) {
            self.update_stats(|s| s.cache_hits += 1);
            metrics::record_analysis(true, started.elapsed().as_secs_f64(), hit.detection_count());
            debug!(frame_id = hit.frame_id, "Served analysis from cache");
            return Ok(hit);
        }

        preprocess(&frame);

        let classifiers = self.resolve_classifiers(request).await;
        if classifiers.is_empty() {
            warn!(
                requested = ?request.classifiers,
                "No enabled and initialized classifiers match the request"
            );
            self.update_stats(|s| s.empty_results += 1);
            let mut result = AnalysisResult::empty(frame.frame_id, frame.resolution());
            result.processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
            return Ok(result);
        }

        let threshold = request.options.confidence_threshold;
        let outcomes = join_all(classifiers.iter().map(|classifier| {
            self.run_classifier(Arc::clone(classifier), Arc::clone(&frame), threshold)
        }))
        .await;

        let mut result = AnalysisResult::empty(frame.frame_id, frame.resolution());
        let mut failures = 0u64;
        let mut timeouts = 0u64;

        for (classifier, outcome) in classifiers.iter().zip(outcomes) {
            let name = classifier.name().to_string();
            result.pipeline_info.classifiers_run.push(name.clone());

            let detections = match outcome {
                ClassifierOutcome::Completed(detections) => detections,
                ClassifierOutcome::Failed => {
                    failures += 1;
                    result.pipeline_info.classifiers_failed.push(name);
                    Vec::new()
                }
                ClassifierOutcome::TimedOut => {
                    timeouts += 1;
                    result.pipeline_info.classifiers_timed_out.push(name);
                    Vec::new()
                }
            };

            let (detections, depth_attached) = enrich_and_filter(detections, &frame, request);
            result.pipeline_info.depth_attached |= depth_attached;
            result
                .detections
                .entry(classifier.classifier_type())
                .or_default()
                .extend(detections);
        }

        result.pipeline_info.total_detections = result.detection_count();
        result.timestamp = Utc::now();
        let elapsed = started.elapsed();
        result.processing_time_ms = elapsed.as_secs_f64() * 1000.0;

        self.cache.put(&frame, request, &result);
        self.update_stats(|s| {
            s.classifier_failures += failures;
            s.classifier_timeouts += timeouts;
            s.record_processed(result.processing_time_ms);
        });
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
        metrics::record_analysis(false, elapsed.as_secs_f64(), result.detection_count());

        info!(
            frame_id = result.frame_id,
            classifiers = result.pipeline_info.classifiers_run.len(),
            detections = result.detection_count(),
            failed = failures,
            timed_out = timeouts,
            processing_time_ms = result.processing_time_ms,
            "Frame analyzed"
        );
        Ok(result)
    }

    /// Enabled, requested and initialized classifiers.
    async fn resolve_classifiers(&self, request: &AnalysisRequest) -> Vec<Arc<dyn Classifier>> {
        self.registry
            .get_enabled_classifiers()
            .await
            .into_iter()
            .filter(|c| request.requests(c.classifier_type()))
            .filter(|c| c.core().is_initialized())
            .collect()
    }

    /// Run one classifier on the blocking pool with a bounded slot and timeout.
    ///
    /// The timeout covers both the wait for an inference slot and the run. A
    /// classifier whose previous run is still in flight is not dispatched again.
    async fn run_classifier(
        &self,
        classifier: Arc<dyn Classifier>,
        frame: Arc<Frame>,
        threshold: Option<f32>,
    ) -> ClassifierOutcome {
        let name = classifier.name().to_string();
        let timeout = self.config.classifier_timeout;

        if !classifier.core().try_begin_run() {
            warn!(classifier = %name, "Previous run still in flight, skipping classifier");
            metrics::record_classifier_failure(&name, "busy");
            return ClassifierOutcome::TimedOut;
        }
        let in_flight = InFlight(Arc::clone(&classifier));
        let slots = Arc::clone(&self.inference_slots);

        let started = Instant::now();
        let run = async move {
            let permit = slots.acquire_owned().await?;
            let detections = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let _in_flight = in_flight;
                classifier.detect(&frame, threshold)
            })
            .await?;
            Ok::<_, RunError>(detections)
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(Ok(detections))) => {
                metrics::record_classifier_run(&name, started.elapsed().as_secs_f64());
                ClassifierOutcome::Completed(detections)
            }
            Ok(Ok(Err(e))) => {
                warn!(classifier = %name, error = %e, "Classifier failed");
                metrics::record_classifier_failure(&name, "error");
                ClassifierOutcome::Failed
            }
            Ok(Err(RunError::Join(join_error))) => {
                let reason = if join_error.is_panic() {
                    "panic"
                } else {
                    "cancelled"
                };
                warn!(classifier = %name, reason, "Classifier task aborted");
                metrics::record_classifier_failure(&name, reason);
                ClassifierOutcome::Failed
            }
            Ok(Err(RunError::Closed(e))) => {
                warn!(classifier = %name, error = %e, "Inference slots closed");
                metrics::record_classifier_failure(&name, "closed");
                ClassifierOutcome::Failed
            }
            Err(_) => {
                warn!(
                    classifier = %name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Classifier timed out"
                );
                metrics::record_classifier_failure(&name, "timeout");
                ClassifierOutcome::TimedOut
            }
        }
    }

    /// The most recent analyzed result.
    pub fn latest_result(&self) -> Option<AnalysisResult> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn update_stats(&self, f: impl FnOnce(&mut PipelineStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

/// Frame preprocessing hook. Frames are analyzed as captured.
fn preprocess(_frame: &Frame) {}

/// Depth, 3D projection, filters and truncation for one classifier's output.
///
/// Returns the detections and whether any received depth.
fn enrich_and_filter(
    mut detections: Vec<Detection>,
    frame: &Frame,
    request: &AnalysisRequest,
) -> (Vec<Detection>, bool) {
    let options = &request.options;
    let mut depth_attached = false;

    if options.include_depth {
        if let Some(depth) = &frame.depth {
            depth_attached = geometry::attach_depth(&mut detections, depth) > 0;
        }
    }

    if options.include_3d_position && depth_attached {
        geometry::attach_positions(&mut detections, frame.intrinsics.as_ref());
    }

    if let Some(filters) = &request.filters {
        detections = filters.apply(detections);
    }
    if let Some(max) = options.max_detections {
        detections.truncate(max);
    }

    (detections, depth_attached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Intrinsics;
    use image::{Luma, RgbImage};
    use vhub_models::{AnalysisOptions, ClassifierType, DetectionFilters};

    fn det(bbox: [i32; 4], confidence: f32) -> Detection {
        Detection::new(bbox, confidence, 0, "person", ClassifierType::Person).unwrap()
    }

    fn depth_frame() -> Frame {
        let mut depth = crate::frame::DepthImage::new(640, 480);
        depth.put_pixel(320, 240, Luma([2000]));
        depth.put_pixel(20, 20, Luma([4000]));
        Frame::new(1, RgbImage::new(640, 480))
            .with_depth(depth)
            .with_intrinsics(Intrinsics::new(500.0, 500.0, 320.0, 240.0))
    }

    #[test]
    fn test_enrich_attaches_depth_and_position() {
        let request = AnalysisRequest::new([ClassifierType::Person]).with_options(AnalysisOptions {
            include_3d_position: true,
            ..Default::default()
        });
        let (out, attached) =
            enrich_and_filter(vec![det([300, 220, 340, 260], 0.9)], &depth_frame(), &request);
        assert!(attached);
        assert_eq!(out[0].depth_mm, Some(2000.0));
        let p = out[0].position_3d.unwrap();
        assert_eq!((p.x, p.y, p.z), (0.0, 0.0, 2.0));
    }

    #[test]
    fn test_enrich_without_intrinsics_places_at_origin() {
        let mut depth = crate::frame::DepthImage::new(640, 480);
        depth.put_pixel(320, 240, Luma([2000]));
        let frame = Frame::new(1, RgbImage::new(640, 480)).with_depth(depth);
        let request = AnalysisRequest::new([ClassifierType::Person]).with_options(AnalysisOptions {
            include_3d_position: true,
            ..Default::default()
        });

        let (out, attached) = enrich_and_filter(vec![det([300, 220, 340, 260], 0.9)], &frame, &request);
        assert!(attached);
        assert_eq!(out[0].depth_mm, Some(2000.0));
        assert_eq!(out[0].position_3d, Some(vhub_models::Position3D::ORIGIN));
    }

    #[test]
    fn test_enrich_respects_include_depth() {
        let request = AnalysisRequest::new([ClassifierType::Person]).with_options(AnalysisOptions {
            include_depth: false,
            include_3d_position: true,
            ..Default::default()
        });
        let (out, attached) =
            enrich_and_filter(vec![det([300, 220, 340, 260], 0.9)], &depth_frame(), &request);
        assert!(!attached);
        assert_eq!(out[0].depth_mm, None);
        assert_eq!(out[0].position_3d, None);
    }

    #[test]
    fn test_filters_run_after_depth_then_truncate() {
        let request = AnalysisRequest::new([ClassifierType::Person])
            .with_options(AnalysisOptions {
                max_detections: Some(1),
                ..Default::default()
            })
            .with_filters(DetectionFilters {
                min_confidence: Some(0.5),
                max_distance_mm: Some(3000.0),
                allowed_classes: None,
            });
        let input = vec![
            det([10, 10, 30, 30], 0.9),   // 4000 mm, too far
            det([300, 220, 340, 260], 0.4), // too weak
            det([300, 220, 340, 260], 0.8),
            det([0, 0, 4, 4], 0.7),        // no depth, passes distance
        ];
        let (out, _) = enrich_and_filter(input, &depth_frame(), &request);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 0.8);
    }

    #[test]
    fn test_stats_moving_average() {
        let mut stats = PipelineStats::default();
        stats.record_processed(20.0);
        assert_eq!(stats.avg_processing_time_ms, 20.0);
        stats.record_processed(10.0);
        assert!((stats.avg_processing_time_ms - 19.0).abs() < 1e-9);
        assert_eq!(stats.last_processing_time_ms, 10.0);
    }
}
