//! In-memory Flow backend and pause recorder for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use archflow_contracts::JobError;
use serde_json::{json, Value};

use crate::poll::Pause;
use crate::transport::{Endpoint, FlowTransport};

type Reply = Result<Value, JobError>;

/// Create and upscale replies are served FIFO. Check replies are queued per
/// `taskId`; an empty queue answers `{"code": "processing"}`.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    creates: Mutex<VecDeque<Reply>>,
    upscales: Mutex<VecDeque<Reply>>,
    checks: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(Endpoint, Value)>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_create(&self, reply: Reply) {
        if let Ok(mut queue) = self.creates.lock() {
            queue.push_back(reply);
        }
    }

    pub(crate) fn push_upscale(&self, reply: Reply) {
        if let Ok(mut queue) = self.upscales.lock() {
            queue.push_back(reply);
        }
    }

    pub(crate) fn push_check(&self, task_id: &str, reply: Reply) {
        if let Ok(mut checks) = self.checks.lock() {
            checks.entry(task_id.to_string()).or_default().push_back(reply);
        }
    }

    pub(crate) fn calls(&self) -> Vec<(Endpoint, Value)> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub(crate) fn calls_to(&self, endpoint: Endpoint) -> usize {
        self.calls()
            .iter()
            .filter(|(called, _)| *called == endpoint)
            .count()
    }
}

impl FlowTransport for ScriptedTransport {
    fn call(&self, endpoint: Endpoint, payload: &Value) -> Result<Value, JobError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((endpoint, payload.clone()));
        }
        let next = match endpoint {
            Endpoint::Create => self.creates.lock().ok().and_then(|mut q| q.pop_front()),
            Endpoint::Upscale => self.upscales.lock().ok().and_then(|mut q| q.pop_front()),
            Endpoint::Check => {
                let task_id = payload
                    .get("taskId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.checks
                    .lock()
                    .ok()
                    .and_then(|mut checks| checks.get_mut(&task_id).and_then(VecDeque::pop_front))
            }
        };
        match (endpoint, next) {
            (_, Some(reply)) => reply,
            (Endpoint::Check, None) => Ok(json!({"code": "processing"})),
            (_, None) => Err(JobError::Transient {
                message: format!("no scripted reply for {}", endpoint.path()),
            }),
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingPause {
    pauses: Mutex<Vec<Duration>>,
}

impl RecordingPause {
    pub(crate) fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Pause for RecordingPause {
    fn pause(&self, duration: Duration) {
        if let Ok(mut pauses) = self.pauses.lock() {
            pauses.push(duration);
        }
    }
}

pub(crate) fn media_payload(urls: &[&str]) -> Value {
    let media: Vec<Value> = urls
        .iter()
        .enumerate()
        .map(|(idx, url)| {
            json!({
                "mediaGenerationId": format!("media-{idx}"),
                "image": {"generatedImage": {"fifeUrl": url}},
            })
        })
        .collect();
    json!({"result": {"media": media}, "projectId": "p-1"})
}
