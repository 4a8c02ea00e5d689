use std::sync::Arc;

use archflow_contracts::credentials::CredentialProvider;
use archflow_contracts::events::EventWriter;
use archflow_contracts::media::{
    AspectRatio, CreateImageRequest, CreateVideoRequest, MediaJob, MediaResult, ResolutionTier,
    UpscaleJob, UpscaleRequest, VideoResult,
};
use archflow_contracts::JobError;
use serde_json::json;

use crate::batch::{run_concurrently, BatchOutcome};
use crate::config::ClientConfig;
use crate::images::{normalize_to_data_uri, InputImage};
use crate::map_object;
use crate::poll::{poll_until_terminal, Pause, ThreadPause};
use crate::resolve::{resolve_images, resolve_upscale, resolve_video};
use crate::submit::{submit, to_payload};
use crate::transport::{Endpoint, FlowTransport, HttpTransport};
use crate::upscale::{upscale_target, UpscaleFailurePolicy};

/// Upper bound on concurrent cycles per request; each one holds a thread.
pub const MAX_BATCH_SIZE: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageGenerationRequest {
    pub prompt: String,
    pub images: Vec<InputImage>,
    pub aspect_ratio: AspectRatio,
    pub tier: ResolutionTier,
    /// Number of independent create/poll cycles, clamped to
    /// `1..=MAX_BATCH_SIZE`.
    pub count: u32,
    pub model_wire_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoGenerationRequest {
    pub prompt: String,
    pub start_image: Option<InputImage>,
    pub aspect_ratio: AspectRatio,
    pub model_wire_name: String,
}

/// Runs create, poll, resolve and optional upscale against the Flow
/// backend. Cheap to share across threads; each call owns its own state.
pub struct MediaJobClient {
    transport: Arc<dyn FlowTransport>,
    pause: Arc<dyn Pause>,
    events: EventWriter,
    config: ClientConfig,
}

impl MediaJobClient {
    pub fn new(transport: Arc<dyn FlowTransport>, config: ClientConfig) -> Self {
        Self {
            transport,
            pause: Arc::new(ThreadPause),
            events: EventWriter::disabled(),
            config,
        }
    }

    pub fn from_env(credentials: Arc<dyn CredentialProvider>) -> anyhow::Result<Self> {
        let config = ClientConfig::from_env();
        let transport = HttpTransport::new(&config.api_base, config.request_timeout, credentials)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn with_pause(mut self, pause: Arc<dyn Pause>) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    /// Normalizes every reference image once so N parallel cycles can share
    /// the encoded payload.
    pub fn prepare_images(
        &self,
        images: &[InputImage],
        ratio: AspectRatio,
        tier: ResolutionTier,
    ) -> Result<Vec<String>, JobError> {
        images
            .iter()
            .map(|image| normalize_to_data_uri(image, ratio, tier))
            .collect()
    }

    pub fn submit_image(
        &self,
        prompt: &str,
        images: &[String],
        ratio: AspectRatio,
        model_wire_name: &str,
    ) -> Result<MediaJob, JobError> {
        let request = CreateImageRequest::new(prompt, images.to_vec(), ratio, 1, model_wire_name);
        let job = submit(self.transport.as_ref(), Endpoint::Create, &to_payload(&request)?)?;
        self.events.record(
            "job_submitted",
            map_object(json!({
                "kind": "image",
                "task_id": job.task_id,
                "project_id": job.project_id,
                "model": model_wire_name,
                "reference_images": images.len(),
            })),
        );
        Ok(job)
    }

    pub fn poll_generation(&self, job: &mut MediaJob) -> Result<MediaResult, JobError> {
        let payload = poll_until_terminal(
            self.transport.as_ref(),
            self.pause.as_ref(),
            &self.events,
            job,
            self.config.generation,
            "generation",
        )?;
        let mut result = resolve_images(&payload)?;
        if result.project_id.is_none() {
            result.project_id = job.project_id.clone();
        }
        Ok(result)
    }

    /// One full per-image cycle: normalize, submit, poll, resolve, then the
    /// upscale pass when the tier asks for one.
    pub fn generate_image(&self, request: &ImageGenerationRequest) -> Result<MediaResult, JobError> {
        let images = self.prepare_images(&request.images, request.aspect_ratio, request.tier)?;
        self.generate_prepared(request, &images)
    }

    pub fn generate_batch<C>(
        &self,
        request: &ImageGenerationRequest,
        on_result: C,
    ) -> BatchOutcome<MediaResult>
    where
        C: FnMut(usize, &MediaResult),
    {
        let count = request.count.clamp(1, MAX_BATCH_SIZE) as usize;
        let images = match self.prepare_images(&request.images, request.aspect_ratio, request.tier)
        {
            Ok(images) => images,
            Err(err) => {
                return BatchOutcome {
                    succeeded: Vec::new(),
                    failures: vec![(0, err)],
                };
            }
        };

        let outcome = run_concurrently(
            count,
            |index| {
                self.generate_prepared(request, &images).inspect_err(|err| {
                    self.events.record(
                        "job_failed",
                        map_object(json!({
                            "index": index,
                            "code": err.code(),
                            "detail": err.detail(),
                        })),
                    );
                })
            },
            on_result,
        );
        self.events.record(
            "batch_settled",
            map_object(json!({
                "requested": count,
                "succeeded": outcome.succeeded.len(),
                "failed": outcome.failures.len(),
            })),
        );
        outcome
    }

    /// Secondary cycle on an already generated media id. Returns the single
    /// replacement URL.
    pub fn upscale(&self, job: &UpscaleJob) -> Result<String, JobError> {
        let request = UpscaleRequest::for_job(job).ok_or_else(|| JobError::InvalidInput {
            message: format!("tier {} has no upscale target", job.target.label()),
        })?;
        let mut task = submit(self.transport.as_ref(), Endpoint::Upscale, &to_payload(&request)?)?;
        self.events.record(
            "upscale_submitted",
            map_object(json!({
                "task_id": task.task_id,
                "media_id": job.media_id,
                "target": request.target_resolution,
            })),
        );
        let payload = poll_until_terminal(
            self.transport.as_ref(),
            self.pause.as_ref(),
            &self.events,
            &mut task,
            self.config.upscale,
            "upscale",
        )?;
        resolve_upscale(&payload)
    }

    /// Single video generation with exactly one whole-operation retry when
    /// the first attempt times out.
    pub fn generate_video(&self, request: &VideoGenerationRequest) -> Result<VideoResult, JobError> {
        let start_image = request
            .start_image
            .as_ref()
            .map(|image| normalize_to_data_uri(image, request.aspect_ratio, ResolutionTier::Standard))
            .transpose()?;

        match self.video_attempt(request, start_image.clone()) {
            Err(err) if err.is_timeout() => {
                self.events.record(
                    "video_retry",
                    map_object(json!({
                        "code": err.code(),
                        "detail": err.detail(),
                    })),
                );
                self.video_attempt(request, start_image)
            }
            other => other,
        }
    }

    fn video_attempt(
        &self,
        request: &VideoGenerationRequest,
        start_image: Option<String>,
    ) -> Result<VideoResult, JobError> {
        let body = CreateVideoRequest::new(
            &request.prompt,
            start_image,
            request.aspect_ratio,
            &request.model_wire_name,
        );
        let mut job = submit(self.transport.as_ref(), Endpoint::Create, &to_payload(&body)?)?;
        self.events.record(
            "job_submitted",
            map_object(json!({
                "kind": "video",
                "task_id": job.task_id,
                "project_id": job.project_id,
                "model": request.model_wire_name,
            })),
        );
        let payload = poll_until_terminal(
            self.transport.as_ref(),
            self.pause.as_ref(),
            &self.events,
            &mut job,
            self.config.video,
            "video",
        )?;
        let mut result = resolve_video(&payload)?;
        if result.project_id.is_none() {
            result.project_id = job.project_id;
        }
        Ok(result)
    }

    fn generate_prepared(
        &self,
        request: &ImageGenerationRequest,
        images: &[String],
    ) -> Result<MediaResult, JobError> {
        let mut job = self.submit_image(
            &request.prompt,
            images,
            request.aspect_ratio,
            &request.model_wire_name,
        )?;
        let mut result = self.poll_generation(&mut job)?;
        self.events.record(
            "job_completed",
            map_object(json!({
                "task_id": job.task_id,
                "images": result.image_urls.len(),
            })),
        );

        let Some((index, upscale_job)) = upscale_target(request.tier, &result) else {
            return Ok(result);
        };
        match self.upscale(&upscale_job) {
            Ok(url) => {
                if let Some(slot) = result.image_urls.get_mut(index) {
                    *slot = url;
                }
                Ok(result)
            }
            Err(err) => {
                self.events.record(
                    "upscale_failed",
                    map_object(json!({
                        "media_id": upscale_job.media_id,
                        "policy": self.config.upscale_failure.as_str(),
                        "code": err.code(),
                        "detail": err.detail(),
                    })),
                );
                match self.config.upscale_failure {
                    UpscaleFailurePolicy::Strict => Err(JobError::upscale(err)),
                    UpscaleFailurePolicy::KeepBase => Ok(result),
                }
            }
        }
    }
}
