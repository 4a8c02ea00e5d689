//! Remote Media Job Client for the Flow generation backend.
//!
//! Every tool screen runs the same cycle: normalize inputs, create a task,
//! poll it on a fixed interval, resolve media URLs, and optionally upscale.
//! [`MediaJobClient`] owns that cycle; [`GenerationSession`] wraps it in the
//! credit deduct/refund transaction and persists results.

use std::env;

use serde_json::{Map, Value};

mod batch;
mod client;
mod config;
mod images;
mod poll;
mod resolve;
mod session;
mod storage;
mod submit;
mod transport;
mod upscale;

#[cfg(test)]
mod testing;

pub use batch::{run_concurrently, BatchOutcome};
pub use client::{
    ImageGenerationRequest, MediaJobClient, VideoGenerationRequest, MAX_BATCH_SIZE,
};
pub use config::ClientConfig;
pub use images::{canonical_box, decode_data_uri, normalize_to_data_uri, InputImage};
pub use poll::{classify_status, Pause, PollPolicy, PollState, ThreadPause};
pub use resolve::{resolve_images, resolve_upscale, resolve_video};
pub use session::{GenerationSession, ImageOrder, SessionOutcome, VideoOrder};
pub use storage::{LocalObjectStore, ObjectStore};
pub use transport::{interpret_response, Endpoint, FlowTransport, HttpTransport};
pub use upscale::{upscale_target, UpscaleFailurePolicy};

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
