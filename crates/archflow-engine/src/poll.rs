use std::thread;
use std::time::Duration;

use archflow_contracts::events::EventWriter;
use archflow_contracts::media::{CheckStatusRequest, JobStatus, MediaJob};
use archflow_contracts::JobError;
use serde_json::{json, Value};

use crate::map_object;
use crate::resolve::IMAGE_URL_KEYS;
use crate::transport::{payload_error_text, Endpoint, FlowTransport};

/// Fixed-interval poll budget. Not a backoff: every attempt waits
/// `interval` and the loop gives up after `max_attempts` status checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn generation() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 60,
        }
    }

    pub fn upscale() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 20,
        }
    }

    pub fn video() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 60,
        }
    }
}

/// Suspension between poll attempts.
pub trait Pause: Send + Sync {
    fn pause(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Processing,
    Completed(Value),
    Failed(String),
}

/// Reads one status payload. An explicit failure marker wins over media
/// entries; media entries (or an upscale image under `result`) win over a status
/// word; anything unrecognized counts as still processing.
pub fn classify_status(payload: &Value) -> PollState {
    let marker = ["status", "code"]
        .iter()
        .filter_map(|key| payload.get(*key).and_then(Value::as_str))
        .map(|value| value.trim().to_ascii_lowercase())
        .find(|value| !value.is_empty())
        .unwrap_or_default();

    if matches!(marker.as_str(), "failed" | "error") {
        return PollState::Failed(payload_error_text(payload).unwrap_or_default());
    }
    if has_media(payload) {
        return PollState::Completed(payload.clone());
    }
    if matches!(
        marker.as_str(),
        "completed" | "success" | "succeeded" | "done"
    ) {
        return PollState::Completed(payload.clone());
    }
    PollState::Processing
}

fn has_media(payload: &Value) -> bool {
    let non_empty_array = |value: Option<&Value>| {
        value
            .and_then(Value::as_array)
            .map(|rows| !rows.is_empty())
            .unwrap_or(false)
    };
    let result = payload.get("result");
    if non_empty_array(payload.get("media")) || non_empty_array(result.and_then(|r| r.get("media")))
    {
        return true;
    }
    // Upscale tasks finish with a single image under `result`.
    let Some(result) = result.and_then(Value::as_object) else {
        return false;
    };
    std::iter::once(&"encodedImage")
        .chain(IMAGE_URL_KEYS)
        .filter_map(|key| result.get(*key).and_then(Value::as_str))
        .any(|value| !value.trim().is_empty())
}

/// Drives one job to a terminal state. Sleeps first, then checks once per
/// attempt. A check that errors is treated as "still processing" unless the
/// error is in the fatal set; `job.status` only changes from remote answers.
pub(crate) fn poll_until_terminal(
    transport: &dyn FlowTransport,
    pause: &dyn Pause,
    events: &EventWriter,
    job: &mut MediaJob,
    policy: PollPolicy,
    stage: &str,
) -> Result<Value, JobError> {
    let request = serde_json::to_value(CheckStatusRequest::new(&job.task_id)).map_err(|err| {
        JobError::InvalidPayload {
            message: err.to_string(),
        }
    })?;

    for attempt in 1..=policy.max_attempts {
        pause.pause(policy.interval);
        let payload = match transport.call(Endpoint::Check, &request) {
            Ok(payload) => payload,
            Err(err) if err.aborts_polling() => {
                job.status = JobStatus::Failed;
                return Err(err);
            }
            Err(err) => {
                events.record(
                    "poll_error_swallowed",
                    map_object(json!({
                        "stage": stage,
                        "task_id": job.task_id,
                        "attempt": attempt,
                        "code": err.code(),
                        "detail": err.detail(),
                    })),
                );
                continue;
            }
        };

        let state = classify_status(&payload);
        events.record(
            "poll_attempt",
            map_object(json!({
                "stage": stage,
                "task_id": job.task_id,
                "attempt": attempt,
                "state": poll_state_label(&state),
            })),
        );
        match state {
            PollState::Processing => {
                job.status = JobStatus::Processing;
            }
            PollState::Completed(payload) => {
                job.status = JobStatus::Completed;
                return Ok(payload);
            }
            PollState::Failed(message) => {
                job.status = JobStatus::Failed;
                return Err(JobError::from_remote_text(&message));
            }
        }
    }

    job.status = JobStatus::Failed;
    Err(JobError::Timeout {
        attempts: policy.max_attempts,
    })
}

fn poll_state_label(state: &PollState) -> &'static str {
    match state {
        PollState::Processing => "processing",
        PollState::Completed(_) => "completed",
        PollState::Failed(_) => "failed",
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{classify_status, poll_until_terminal, PollPolicy, PollState};
    use crate::testing::{RecordingPause, ScriptedTransport};
    use crate::transport::Endpoint;
    use archflow_contracts::events::EventWriter;
    use archflow_contracts::media::{JobStatus, MediaJob};
    use archflow_contracts::{ErrorCategory, JobError};

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(&json!({"code": "processing"})), PollState::Processing);
        assert_eq!(classify_status(&json!({"status": "PENDING"})), PollState::Processing);
        assert_eq!(classify_status(&json!({})), PollState::Processing);
        assert_eq!(
            classify_status(&json!({"result": {"media": []}})),
            PollState::Processing
        );
        assert_eq!(
            classify_status(&json!({"status": "failed", "error": "blocked"})),
            PollState::Failed("blocked".to_string())
        );
        let done = json!({"result": {"media": [{"fifeUrl": "https://x/1.png"}]}});
        assert_eq!(classify_status(&done), PollState::Completed(done.clone()));
        let upscaled = json!({"result": {"encodedImage": "QUJD"}});
        assert_eq!(classify_status(&upscaled), PollState::Completed(upscaled.clone()));
        let hosted = json!({"result": {"fifeUrl": "https://x/4k.png"}});
        assert_eq!(classify_status(&hosted), PollState::Completed(hosted.clone()));
        assert_eq!(
            classify_status(&json!({"result": {"fifeUrl": "  "}})),
            PollState::Processing
        );
    }

    #[test]
    fn processing_forever_exhausts_exact_budget() {
        let transport = ScriptedTransport::new();
        let pause = RecordingPause::default();
        let mut job = MediaJob::submitted("t-1", None);

        let err = poll_until_terminal(
            &transport,
            &pause,
            &EventWriter::disabled(),
            &mut job,
            PollPolicy::generation(),
            "generation",
        )
        .unwrap_err();

        assert_eq!(err, JobError::Timeout { attempts: 60 });
        assert!(err.is_timeout());
        assert_eq!(transport.calls_to(Endpoint::Check), 60);
        assert_eq!(pause.pauses(), vec![Duration::from_secs(5); 60]);
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn transient_errors_are_swallowed_until_completion() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new();
        transport.push_check(
            "t-1",
            Err(JobError::categorized(ErrorCategory::Network, "reset")),
        );
        transport.push_check(
            "t-1",
            Err(JobError::Transient {
                message: "parse".to_string(),
            }),
        );
        transport.push_check("t-1", Ok(json!({"code": "processing"})));
        transport.push_check(
            "t-1",
            Ok(json!({"result": {"media": [{"fifeUrl": "https://x/1.png"}]}})),
        );
        let pause = RecordingPause::default();
        let mut job = MediaJob::submitted("t-1", None);

        let payload = poll_until_terminal(
            &transport,
            &pause,
            &EventWriter::disabled(),
            &mut job,
            PollPolicy::generation(),
            "generation",
        )?;

        assert_eq!(payload["result"]["media"][0]["fifeUrl"], json!("https://x/1.png"));
        assert_eq!(transport.calls_to(Endpoint::Check), 4);
        assert_eq!(job.status, JobStatus::Completed);
        Ok(())
    }

    #[test]
    fn fatal_category_aborts_on_first_attempt() {
        let transport = ScriptedTransport::new();
        transport.push_check(
            "t-1",
            Err(JobError::categorized(ErrorCategory::System, "HTTP 500")),
        );
        let pause = RecordingPause::default();
        let mut job = MediaJob::submitted("t-1", None);

        let err = poll_until_terminal(
            &transport,
            &pause,
            &EventWriter::disabled(),
            &mut job,
            PollPolicy::generation(),
            "generation",
        )
        .unwrap_err();

        assert_eq!(err.category(), Some(ErrorCategory::System));
        assert_eq!(transport.calls_to(Endpoint::Check), 1);
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn explicit_failure_is_terminal_even_for_soft_categories() {
        let transport = ScriptedTransport::new();
        transport.push_check(
            "t-1",
            Ok(json!({"status": "failed", "error": "RESOURCE_EXHAUSTED"})),
        );
        let pause = RecordingPause::default();
        let mut job = MediaJob::submitted("t-1", None);

        let err = poll_until_terminal(
            &transport,
            &pause,
            &EventWriter::disabled(),
            &mut job,
            PollPolicy::upscale(),
            "upscale",
        )
        .unwrap_err();

        assert_eq!(err.category(), Some(ErrorCategory::Quota));
        assert_eq!(transport.calls_to(Endpoint::Check), 1);
        assert_eq!(pause.pauses(), vec![Duration::from_secs(10)]);
    }

    #[test]
    fn swallowed_errors_are_logged() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "s-1");
        let transport = ScriptedTransport::new();
        transport.push_check(
            "t-1",
            Err(JobError::categorized(ErrorCategory::Overloaded, "busy")),
        );
        transport.push_check("t-1", Ok(json!({"status": "completed"})));
        let mut job = MediaJob::submitted("t-1", None);

        poll_until_terminal(
            &transport,
            &RecordingPause::default(),
            &events,
            &mut job,
            PollPolicy::generation(),
            "generation",
        )?;

        let content = std::fs::read_to_string(temp.path().join("events.jsonl"))?;
        let types: Vec<String> = content
            .lines()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter_map(|row| row["type"].as_str().map(str::to_string))
            .collect();
        assert_eq!(types, vec!["poll_error_swallowed", "poll_attempt"]);
        Ok(())
    }
}
