//! Injected API credentials with an explicit selection policy.
//!
//! Keys are held in memory only. Callers refresh the active set from their
//! secret store; keys the remote service rejects are parked until the next
//! refresh.

use std::env;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use rand::Rng;
use sha2::{Digest, Sha256};

use crate::errors::JobError;

#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }

    /// Short stable id for logs; never log the secret itself.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..6])
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey({})", self.fingerprint())
    }
}

pub trait CredentialProvider: Send + Sync {
    fn api_key(&self) -> Result<ApiKey, JobError>;

    fn report_rejected(&self, _key: &ApiKey) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    #[default]
    RoundRobin,
    Random,
}

impl SelectionPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "round-robin" | "round_robin" | "roundrobin" | "rr" => Some(Self::RoundRobin),
            "random" => Some(Self::Random),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct PoolEntry {
    key: ApiKey,
    active: bool,
}

#[derive(Debug)]
pub struct KeyPool {
    entries: RwLock<Vec<PoolEntry>>,
    policy: SelectionPolicy,
    cursor: AtomicUsize,
}

impl KeyPool {
    pub fn new<I, S>(keys: I, policy: SelectionPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: RwLock::new(build_entries(keys)),
            policy,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn from_env() -> Self {
        let keys = env::var("ARCHFLOW_API_KEYS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<String>>()
            })
            .unwrap_or_default();
        let policy = env::var("ARCHFLOW_KEY_POLICY")
            .ok()
            .and_then(|raw| SelectionPolicy::parse(&raw))
            .unwrap_or_default();
        Self::new(keys, policy)
    }

    /// Replaces the whole key set and reactivates everything.
    pub fn refresh<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut entries) = self.entries.write() {
            *entries = build_entries(keys);
        }
        self.cursor.store(0, Ordering::Relaxed);
    }

    pub fn active_count(&self) -> usize {
        self.entries
            .read()
            .map(|entries| entries.iter().filter(|entry| entry.active).count())
            .unwrap_or(0)
    }
}

fn build_entries<I, S>(keys: I) -> Vec<PoolEntry>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out: Vec<PoolEntry> = Vec::new();
    for raw in keys {
        let secret: String = raw.into();
        let trimmed = secret.trim();
        if trimmed.is_empty() || out.iter().any(|entry| entry.key.secret() == trimmed) {
            continue;
        }
        out.push(PoolEntry {
            key: ApiKey::new(trimmed),
            active: true,
        });
    }
    out
}

impl CredentialProvider for KeyPool {
    fn api_key(&self) -> Result<ApiKey, JobError> {
        let entries = self.entries.read().map_err(|_| JobError::Credentials {
            message: "key pool lock poisoned".to_string(),
        })?;
        let active: Vec<&ApiKey> = entries
            .iter()
            .filter(|entry| entry.active)
            .map(|entry| &entry.key)
            .collect();
        if active.is_empty() {
            return Err(JobError::Credentials {
                message: "ARCHFLOW_API_KEYS is empty or every key was rejected".to_string(),
            });
        }
        let idx = match self.policy {
            SelectionPolicy::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % active.len(),
            SelectionPolicy::Random => rand::thread_rng().gen_range(0..active.len()),
        };
        Ok(active[idx].clone())
    }

    fn report_rejected(&self, key: &ApiKey) {
        if let Ok(mut entries) = self.entries.write() {
            for entry in entries.iter_mut() {
                if entry.key == *key {
                    entry.active = false;
                }
            }
        }
    }
}
