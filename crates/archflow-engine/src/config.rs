use std::time::Duration;

use crate::non_empty_env;
use crate::poll::PollPolicy;
use crate::upscale::UpscaleFailurePolicy;

pub const DEFAULT_API_BASE: &str = "https://flow.archflow.app/api";
const DEFAULT_REQUEST_TIMEOUT_S: f64 = 60.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_base: String,
    /// Hard abort per HTTP call, independent of the poll budget.
    pub request_timeout: Duration,
    pub generation: PollPolicy,
    pub upscale: PollPolicy,
    pub video: PollPolicy,
    pub upscale_failure: UpscaleFailurePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_S),
            generation: PollPolicy::generation(),
            upscale: PollPolicy::upscale(),
            video: PollPolicy::video(),
            upscale_failure: UpscaleFailurePolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let api_base = non_empty_env("ARCHFLOW_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.api_base);
        let request_timeout = env_f64("ARCHFLOW_REQUEST_TIMEOUT", 1.0, 300.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(defaults.request_timeout);
        let generation = PollPolicy {
            interval: env_f64("ARCHFLOW_POLL_INTERVAL", 0.1, 60.0)
                .map(Duration::from_secs_f64)
                .unwrap_or(defaults.generation.interval),
            max_attempts: env_u32("ARCHFLOW_POLL_MAX_ATTEMPTS", 1, 1000)
                .unwrap_or(defaults.generation.max_attempts),
        };
        let upscale = PollPolicy {
            interval: env_f64("ARCHFLOW_UPSCALE_POLL_INTERVAL", 0.1, 120.0)
                .map(Duration::from_secs_f64)
                .unwrap_or(defaults.upscale.interval),
            max_attempts: env_u32("ARCHFLOW_UPSCALE_POLL_MAX_ATTEMPTS", 1, 1000)
                .unwrap_or(defaults.upscale.max_attempts),
        };
        let upscale_failure = non_empty_env("ARCHFLOW_UPSCALE_FAILURE")
            .and_then(|raw| UpscaleFailurePolicy::parse(&raw))
            .unwrap_or(defaults.upscale_failure);

        Self {
            api_base,
            request_timeout,
            generation,
            upscale,
            video: defaults.video,
            upscale_failure,
        }
    }
}

fn env_f64(key: &str, min: f64, max: f64) -> Option<f64> {
    non_empty_env(key)
        .and_then(|raw| raw.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .map(|value| value.clamp(min, max))
}

fn env_u32(key: &str, min: u32, max: u32) -> Option<u32> {
    non_empty_env(key)
        .and_then(|raw| raw.parse::<u32>().ok())
        .map(|value| value.clamp(min, max))
}
