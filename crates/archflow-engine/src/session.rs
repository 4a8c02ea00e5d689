//! Credit-charged generation sessions.
//!
//! A session prices the order, deducts credits, opens a job row, runs the
//! client, persists every result that came back, and refunds the whole
//! charge only when nothing was stored. Partial success keeps the charge.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use archflow_contracts::media::{AspectRatio, JobStatus, ResolutionTier};
use archflow_contracts::models::{credit_cost, ModelSelection, ModelSelector};
use archflow_contracts::runs::jobs::{JobTracker, NewJob};
use archflow_contracts::runs::ledger::CreditLedger;
use archflow_contracts::runs::receipts::{build_receipt, write_receipt};
use archflow_contracts::JobError;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::client::{
    ImageGenerationRequest, MediaJobClient, VideoGenerationRequest, MAX_BATCH_SIZE,
};
use crate::images::InputImage;
use crate::map_object;
use crate::storage::ObjectStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOrder {
    pub user: String,
    pub prompt: String,
    pub images: Vec<InputImage>,
    pub aspect_ratio: AspectRatio,
    pub tier: ResolutionTier,
    pub count: u32,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoOrder {
    pub user: String,
    pub prompt: String,
    pub start_image: Option<InputImage>,
    pub aspect_ratio: AspectRatio,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionOutcome {
    pub job_id: String,
    pub ledger_entry: String,
    pub model: String,
    pub fallback_reason: Option<String>,
    pub charged: u64,
    pub stored_urls: Vec<String>,
    pub failures: Vec<String>,
    pub refunded: bool,
    /// User-facing message when nothing was produced.
    pub error: Option<String>,
    pub receipt_path: Option<PathBuf>,
}

pub struct GenerationSession<'a> {
    client: &'a MediaJobClient,
    ledger: &'a dyn CreditLedger,
    jobs: &'a dyn JobTracker,
    store: &'a dyn ObjectStore,
    selector: ModelSelector,
    receipts_dir: Option<PathBuf>,
}

struct Opened {
    selection: ModelSelection,
    entry: String,
    job_id: String,
    charged: u64,
}

struct Settled {
    stored_urls: Vec<String>,
    failures: Vec<String>,
    last_error: Option<JobError>,
}

impl<'a> GenerationSession<'a> {
    pub fn new(
        client: &'a MediaJobClient,
        ledger: &'a dyn CreditLedger,
        jobs: &'a dyn JobTracker,
        store: &'a dyn ObjectStore,
    ) -> Self {
        Self {
            client,
            ledger,
            jobs,
            store,
            selector: ModelSelector::new(None),
            receipts_dir: None,
        }
    }

    pub fn with_selector(mut self, selector: ModelSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_receipts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.receipts_dir = Some(dir.into());
        self
    }

    /// `on_stored` sees each persisted URL as soon as its image settles.
    pub fn run_images<C>(&self, order: &ImageOrder, mut on_stored: C) -> Result<SessionOutcome>
    where
        C: FnMut(&str),
    {
        let count = order.count.clamp(1, MAX_BATCH_SIZE);
        let opened = self.open(
            &order.user,
            "image",
            &order.prompt,
            order.model.as_deref(),
            "image",
            order.tier,
            count,
        )?;

        let request = ImageGenerationRequest {
            prompt: order.prompt.clone(),
            images: order.images.clone(),
            aspect_ratio: order.aspect_ratio,
            tier: order.tier,
            count,
            model_wire_name: opened.selection.model.wire_name.clone(),
        };

        let mut stored_urls: Vec<String> = Vec::new();
        let mut failures: Vec<String> = Vec::new();
        let mut persisted = 0usize;
        let batch = self.client.generate_batch(&request, |_, result| {
            for url in &result.image_urls {
                let key = format!("{}/{persisted}", opened.job_id);
                persisted += 1;
                match self.store.persist(url, &key) {
                    Ok(location) => {
                        on_stored(&location);
                        stored_urls.push(location);
                    }
                    Err(err) => failures.push(format!("STORAGE_ERROR: {err:#}")),
                }
            }
        });
        for (index, err) in &batch.failures {
            failures.push(format!("image {index}: {}: {err}", err.code()));
        }

        let request_map = map_object(json!({
            "kind": "image",
            "user": order.user,
            "prompt": order.prompt,
            "aspect_ratio": order.aspect_ratio.image_tag(),
            "tier": order.tier.label(),
            "count": count,
            "reference_images": order.images.len(),
        }));
        self.settle(
            opened,
            request_map,
            Settled {
                stored_urls,
                failures,
                last_error: batch.last_failure().cloned(),
            },
        )
    }

    pub fn run_video(&self, order: &VideoOrder) -> Result<SessionOutcome> {
        let capability = if order.start_image.is_some() {
            "video_from_image"
        } else {
            "video"
        };
        let opened = self.open(
            &order.user,
            "video",
            &order.prompt,
            order.model.as_deref(),
            capability,
            ResolutionTier::Standard,
            1,
        )?;

        let request = VideoGenerationRequest {
            prompt: order.prompt.clone(),
            start_image: order.start_image.clone(),
            aspect_ratio: order.aspect_ratio,
            model_wire_name: opened.selection.model.wire_name.clone(),
        };

        let mut settled = Settled {
            stored_urls: Vec::new(),
            failures: Vec::new(),
            last_error: None,
        };
        match self.client.generate_video(&request) {
            Ok(result) => {
                for (index, url) in result.video_urls.iter().enumerate() {
                    let key = format!("{}/{index}", opened.job_id);
                    match self.store.persist(url, &key) {
                        Ok(location) => settled.stored_urls.push(location),
                        Err(err) => settled.failures.push(format!("STORAGE_ERROR: {err:#}")),
                    }
                }
            }
            Err(err) => {
                settled
                    .failures
                    .push(format!("video: {}: {err}", err.code()));
                settled.last_error = Some(err);
            }
        }

        let request_map = map_object(json!({
            "kind": "video",
            "user": order.user,
            "prompt": order.prompt,
            "aspect_ratio": order.aspect_ratio.video_tag(),
            "start_image": order.start_image.is_some(),
        }));
        self.settle(opened, request_map, settled)
    }

    #[allow(clippy::too_many_arguments)]
    fn open(
        &self,
        user: &str,
        kind: &str,
        prompt: &str,
        requested_model: Option<&str>,
        capability: &str,
        tier: ResolutionTier,
        count: u32,
    ) -> Result<Opened> {
        if prompt.trim().is_empty() {
            return Err(anyhow!("prompt is empty"));
        }
        let selection = self
            .selector
            .select(requested_model, capability, tier)
            .map_err(|message| anyhow!(message))?;
        let charged = credit_cost(&selection.model, tier, count);
        let reason = format!(
            "{kind} x{count} {} {}",
            selection.model.name,
            tier.label()
        );
        let entry = self
            .ledger
            .deduct(user, charged, &reason)
            .context("credit deduction failed")?;

        let job_id = match self.jobs.create_job(NewJob {
            user: user.to_string(),
            kind: kind.to_string(),
            prompt: prompt.to_string(),
            model: selection.model.name.clone(),
            tier: tier.label().to_string(),
            count,
            ledger_entry: Some(entry.clone()),
        }) {
            Ok(job_id) => job_id,
            Err(err) => {
                self.ledger
                    .refund(&entry)
                    .context("refund after failed job creation")?;
                return Err(err.context("failed to create job row"));
            }
        };

        self.client.events().record(
            "session_started",
            map_object(json!({
                "job_id": job_id,
                "kind": kind,
                "model": selection.model.name,
                "requested_model": selection.requested,
                "fallback_reason": selection.fallback_reason,
                "charged": charged,
                "ledger_entry": entry,
            })),
        );
        Ok(Opened {
            selection,
            entry,
            job_id,
            charged,
        })
    }

    fn settle(
        &self,
        opened: Opened,
        request: Map<String, Value>,
        settled: Settled,
    ) -> Result<SessionOutcome> {
        let Settled {
            stored_urls,
            failures,
            last_error,
        } = settled;

        let mut refunded = false;
        let mut error = None;
        if stored_urls.is_empty() {
            let message = last_error
                .as_ref()
                .map(ToString::to_string)
                .or_else(|| failures.last().cloned())
                .unwrap_or_else(|| JobError::NoImageData.to_string());
            self.ledger
                .refund(&opened.entry)
                .with_context(|| format!("refund of {} failed", opened.entry))?;
            refunded = true;
            self.jobs
                .update_job_status(&opened.job_id, JobStatus::Failed, &[], Some(&message))?;
            error = Some(message);
        } else {
            self.jobs
                .update_job_status(&opened.job_id, JobStatus::Completed, &stored_urls, None)?;
        }

        let receipt_path = match &self.receipts_dir {
            Some(dir) => {
                let path = dir.join(format!("receipt-{}.json", opened.job_id));
                let outcome = map_object(json!({
                    "job_id": opened.job_id,
                    "model": opened.selection.model.name,
                    "wire_name": opened.selection.model.wire_name,
                    "charged": opened.charged,
                    "refunded": refunded,
                    "error": error,
                    "error_code": last_error.as_ref().map(JobError::code),
                }));
                let receipt = build_receipt(&request, &outcome, &failures, &stored_urls, &path);
                write_receipt(&path, &receipt)?;
                Some(path)
            }
            None => None,
        };

        self.client.events().record(
            "session_finished",
            map_object(json!({
                "job_id": opened.job_id,
                "stored": stored_urls.len(),
                "failures": failures.len(),
                "refunded": refunded,
            })),
        );

        Ok(SessionOutcome {
            job_id: opened.job_id,
            ledger_entry: opened.entry,
            model: opened.selection.model.name,
            fallback_reason: opened.selection.fallback_reason,
            charged: opened.charged,
            stored_urls,
            failures,
            refunded,
            error,
            receipt_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use serde_json::{json, Value};

    use super::{GenerationSession, ImageOrder, VideoOrder};
    use crate::client::{MediaJobClient, MAX_BATCH_SIZE};
    use crate::config::ClientConfig;
    use crate::storage::LocalObjectStore;
    use crate::testing::{media_payload, RecordingPause, ScriptedTransport};
    use crate::transport::Endpoint;
    use archflow_contracts::media::{AspectRatio, JobStatus, ResolutionTier};
    use archflow_contracts::runs::jobs::{FileJobTable, JobTracker};
    use archflow_contracts::runs::ledger::{CreditLedger, FileCreditLedger};

    fn client(transport: &Arc<ScriptedTransport>) -> MediaJobClient {
        MediaJobClient::new(transport.clone(), ClientConfig::default())
            .with_pause(Arc::new(RecordingPause::default()))
    }

    fn order(count: u32) -> ImageOrder {
        ImageOrder {
            user: "u1".to_string(),
            prompt: "brick courtyard house".to_string(),
            images: Vec::new(),
            aspect_ratio: AspectRatio::Square,
            tier: ResolutionTier::Standard,
            count,
            model: Some("nano-banana-pro".to_string()),
        }
    }

    #[test]
    fn partial_success_keeps_charge_and_stores_results() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let ledger = FileCreditLedger::new(temp.path().join("ledger.json"));
        ledger.grant("u1", 10)?;
        let jobs = FileJobTable::new(temp.path().join("jobs.json"));
        let store = LocalObjectStore::new(temp.path().join("media"))?;

        let transport = Arc::new(ScriptedTransport::new());
        transport.push_create(Ok(json!({"taskId": "t-1"})));
        transport.push_create(Ok(json!({"taskId": "t-2"})));
        transport.push_check("t-1", Ok(json!({"result": {"media": [{"encodedImage": "QUJD"}]}})));
        transport.push_check("t-2", Ok(json!({"status": "failed", "error": "render crashed"})));
        let client = client(&transport);

        let session = GenerationSession::new(&client, &ledger, &jobs, &store)
            .with_receipts_dir(temp.path().join("receipts"));
        let mut streamed: Vec<String> = Vec::new();
        let outcome = session.run_images(&order(2), |url| streamed.push(url.to_string()))?;

        assert_eq!(outcome.charged, 4);
        assert!(!outcome.refunded);
        assert_eq!(outcome.error, None);
        assert_eq!(outcome.stored_urls.len(), 1);
        assert_eq!(streamed, outcome.stored_urls);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(ledger.balance("u1")?, 6);

        let row = jobs.get_job(&outcome.job_id)?;
        assert_eq!(row.as_ref().map(|row| row.status), Some(JobStatus::Completed));
        assert_eq!(
            row.map(|row| row.result_urls).unwrap_or_default(),
            outcome.stored_urls
        );

        let receipt_path = outcome
            .receipt_path
            .ok_or_else(|| anyhow::anyhow!("receipt missing"))?;
        let receipt: Value = serde_json::from_str(&fs::read_to_string(receipt_path)?)?;
        assert_eq!(receipt["outcome"]["charged"], json!(4));
        assert_eq!(receipt["request"]["count"], json!(2));
        Ok(())
    }

    #[test]
    fn oversized_order_is_charged_for_the_capped_count() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let ledger = FileCreditLedger::new(temp.path().join("ledger.json"));
        ledger.grant("u1", 1_000)?;
        let jobs = FileJobTable::new(temp.path().join("jobs.json"));
        let store = LocalObjectStore::new(temp.path().join("media"))?;
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(&transport);

        let session = GenerationSession::new(&client, &ledger, &jobs, &store);
        let outcome = session.run_images(&order(500), |_| {})?;

        assert_eq!(outcome.charged, 2 * u64::from(MAX_BATCH_SIZE));
        assert_eq!(transport.calls_to(Endpoint::Create), MAX_BATCH_SIZE as usize);
        assert!(outcome.refunded);
        assert_eq!(ledger.balance("u1")?, 1_000);
        Ok(())
    }

    #[test]
    fn total_failure_refunds_and_marks_job_failed() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let ledger = FileCreditLedger::new(temp.path().join("ledger.json"));
        ledger.grant("u1", 10)?;
        let jobs = FileJobTable::new(temp.path().join("jobs.json"));
        let store = LocalObjectStore::new(temp.path().join("media"))?;

        let transport = Arc::new(ScriptedTransport::new());
        transport.push_create(Ok(json!({"taskId": "t-1"})));
        transport.push_check("t-1", Ok(json!({"status": "failed", "error": "429 quota"})));
        let client = client(&transport);

        let session = GenerationSession::new(&client, &ledger, &jobs, &store);
        let outcome = session.run_images(&order(1), |_| {})?;

        assert!(outcome.refunded);
        assert!(outcome.stored_urls.is_empty());
        assert_eq!(ledger.balance("u1")?, 10);
        let row = jobs.get_job(&outcome.job_id)?;
        assert_eq!(row.as_ref().map(|row| row.status), Some(JobStatus::Failed));
        assert_eq!(row.and_then(|row| row.error), outcome.error);
        assert!(outcome.receipt_path.is_none());
        Ok(())
    }

    #[test]
    fn insufficient_credits_never_calls_backend() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let ledger = FileCreditLedger::new(temp.path().join("ledger.json"));
        ledger.grant("u1", 1)?;
        let jobs = FileJobTable::new(temp.path().join("jobs.json"));
        let store = LocalObjectStore::new(temp.path().join("media"))?;
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(&transport);

        let session = GenerationSession::new(&client, &ledger, &jobs, &store);
        assert!(session.run_images(&order(1), |_| {}).is_err());
        assert!(transport.calls().is_empty());
        assert!(jobs.list()?.is_empty());
        assert_eq!(ledger.balance("u1")?, 1);
        Ok(())
    }

    #[test]
    fn unknown_model_falls_back_with_reason() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let ledger = FileCreditLedger::new(temp.path().join("ledger.json"));
        ledger.grant("u1", 10)?;
        let jobs = FileJobTable::new(temp.path().join("jobs.json"));
        let store = LocalObjectStore::new(temp.path().join("media"))?;
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_create(Ok(json!({"taskId": "t-1"})));
        transport.push_check("t-1", Ok(media_payload(&["data:image/png;base64,QUJD"])));
        let client = client(&transport);

        let mut request = order(1);
        request.model = Some("dall-e".to_string());
        let session = GenerationSession::new(&client, &ledger, &jobs, &store);
        let outcome = session.run_images(&request, |_| {})?;

        assert_eq!(outcome.model, "nano-banana-pro");
        assert!(outcome.fallback_reason.is_some());
        let create = transport
            .calls()
            .into_iter()
            .find(|(endpoint, _)| *endpoint == Endpoint::Create)
            .map(|(_, body)| body["imageModelName"].clone());
        assert_eq!(create, Some(json!("GEM_PIX_2")));
        Ok(())
    }

    #[test]
    fn video_session_charges_video_model() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let ledger = FileCreditLedger::new(temp.path().join("ledger.json"));
        ledger.grant("u1", 25)?;
        let jobs = FileJobTable::new(temp.path().join("jobs.json"));
        let store = LocalObjectStore::new(temp.path().join("media"))?;
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_create(Ok(json!({"taskId": "v-1"})));
        transport.push_check(
            "v-1",
            Ok(json!({"result": {"media": [{"video": {"generatedVideo": {"encodedVideo": "AAAA"}}}]}})),
        );
        let client = client(&transport);

        let session = GenerationSession::new(&client, &ledger, &jobs, &store);
        let outcome = session.run_video(&VideoOrder {
            user: "u1".to_string(),
            prompt: "aerial orbit of the tower".to_string(),
            start_image: None,
            aspect_ratio: AspectRatio::Landscape,
            model: None,
        })?;

        assert_eq!(outcome.model, "veo-3-fast");
        assert_eq!(outcome.charged, 10);
        assert_eq!(ledger.balance("u1")?, 15);
        assert_eq!(outcome.stored_urls.len(), 1);
        assert!(outcome.stored_urls[0].ends_with(".mp4"));
        Ok(())
    }
}
