use archflow_contracts::media::MediaJob;
use archflow_contracts::JobError;
use serde::Serialize;
use serde_json::Value;

use crate::transport::{payload_error_text, Endpoint, FlowTransport};

pub(crate) fn to_payload<T: Serialize>(request: &T) -> Result<Value, JobError> {
    serde_json::to_value(request).map_err(|err| JobError::InvalidPayload {
        message: err.to_string(),
    })
}

/// One create call. A response without a task id is fatal and never polled.
pub(crate) fn submit(
    transport: &dyn FlowTransport,
    endpoint: Endpoint,
    payload: &Value,
) -> Result<MediaJob, JobError> {
    let response = transport.call(endpoint, payload)?;
    if response
        .get("status")
        .and_then(Value::as_str)
        .map(|status| status.trim().eq_ignore_ascii_case("failed"))
        .unwrap_or(false)
    {
        return Err(JobError::from_remote_text(
            &payload_error_text(&response).unwrap_or_default(),
        ));
    }

    let task_id = id_field(&response, "taskId").ok_or(JobError::NoTaskId)?;
    Ok(MediaJob::submitted(task_id, id_field(&response, "projectId")))
}

/// Ids arrive as strings or bare numbers.
fn id_field(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(text) => Some(text.trim().to_string()).filter(|text| !text.is_empty()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
