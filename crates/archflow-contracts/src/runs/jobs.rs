use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::store::JsonStore;
use crate::media::JobStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub user: String,
    pub kind: String,
    pub prompt: String,
    pub model: String,
    pub tier: String,
    pub count: u32,
    pub ledger_entry: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub user: String,
    pub kind: String,
    pub prompt: String,
    pub model: String,
    pub tier: String,
    pub count: u32,
    pub ledger_entry: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub result_urls: Vec<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Job-tracking table collaborator.
pub trait JobTracker: Send + Sync {
    fn create_job(&self, job: NewJob) -> Result<String>;
    fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        result_urls: &[String],
        error: Option<&str>,
    ) -> Result<()>;
    fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>>;
}

#[derive(Debug)]
pub struct FileJobTable {
    store: Mutex<JsonStore>,
}

impl FileJobTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: Mutex::new(JsonStore::new(path)),
        }
    }

    pub fn list(&self) -> Result<Vec<JobRecord>> {
        let mut store = self.lock()?;
        let mut rows = Vec::new();
        for key in store.keys_with_prefix("job:")? {
            if let Some(row) = store.get(&key)? {
                rows.push(serde_json::from_value::<JobRecord>(Value::Object(row))?);
            }
        }
        rows.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(rows)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, JsonStore>> {
        self.store.lock().map_err(|_| anyhow!("job table lock poisoned"))
    }
}

impl JobTracker for FileJobTable {
    fn create_job(&self, job: NewJob) -> Result<String> {
        let now = now_utc_iso();
        let record = JobRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user: job.user,
            kind: job.kind,
            prompt: job.prompt,
            model: job.model,
            tier: job.tier,
            count: job.count,
            ledger_entry: job.ledger_entry,
            status: JobStatus::Processing,
            result_urls: Vec::new(),
            error: None,
            created_at: now.clone(),
            updated_at: now,
        };
        let mut store = self.lock()?;
        store.set(&job_key(&record.id), to_row(&record)?)?;
        Ok(record.id)
    }

    fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        result_urls: &[String],
        error: Option<&str>,
    ) -> Result<()> {
        let mut store = self.lock()?;
        let key = job_key(job_id);
        let row = store
            .get(&key)?
            .ok_or_else(|| anyhow!("unknown job {job_id}"))?;
        let mut record: JobRecord = serde_json::from_value(Value::Object(row))
            .with_context(|| format!("job {job_id} row is malformed"))?;
        record.status = status;
        record.result_urls = result_urls.to_vec();
        record.error = error.map(str::to_string);
        record.updated_at = now_utc_iso();
        store.set(&key, to_row(&record)?)
    }

    fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let mut store = self.lock()?;
        store
            .get(&job_key(job_id))?
            .map(|row| serde_json::from_value(Value::Object(row)).map_err(Into::into))
            .transpose()
    }
}

fn job_key(job_id: &str) -> String {
    format!("job:{job_id}")
}

fn to_row(record: &JobRecord) -> Result<serde_json::Map<String, Value>> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        _ => Err(anyhow!("job record did not serialize to an object")),
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
