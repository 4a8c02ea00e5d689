use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use super::store::JsonStore;

pub type LedgerEntryId = String;

/// Credit balance collaborator. `deduct` returns the entry id that `refund`
/// later reverses; refunding the same entry twice is a no-op.
pub trait CreditLedger: Send + Sync {
    fn deduct(&self, user: &str, amount: u64, reason: &str) -> Result<LedgerEntryId> {
        let mut store = self.lock()?;
        let balance = read_balance(&mut store, user)?;
        if balance < amount {
            bail!("insufficient credits for {user}: balance {balance}, required {amount}");
        }

        let entry_id = uuid::Uuid::new_v4().to_string();
        let entry = map_object(json!({
            "user": user,
            "amount": amount,
            "reason": reason,
            "refunded": false,
            "ts": now_utc_iso(),
        }));
        store
            .set_many(vec![
                (user_key(user), balance_row(balance - amount)),
                (entry_key(&entry_id), entry),
            ])
            .context("failed to record ledger entry")?;
        Ok(entry_id)
    }

    fn refund(&self, entry_id: &str) -> Result<()> {
        let mut store = self.lock()?;
        let key = entry_key(entry_id);
        let mut entry = store
            .get(&key)?
            .ok_or_else(|| anyhow!("unknown ledger entry {entry_id}"))?;
        if entry.get("refunded").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(());
        }
        let user = entry
            .get("user")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("ledger entry {entry_id} missing user"))?;
        let amount = entry.get("amount").and_then(Value::as_u64).unwrap_or(0);

        let balance = read_balance(&mut store, &user)?.saturating_add(amount);
        entry.insert("refunded".to_string(), Value::Bool(true));
        entry.insert("refunded_at".to_string(), Value::String(now_utc_iso()));
        store.set_many(vec![(user_key(&user), balance_row(balance)), (key, entry)])
    }

    fn balance(&self, user: &str) -> Result<u64> {
        let mut store = self.lock()?;
        read_balance(&mut store, user)
    }
}

fn user_key(user: &str) -> String {
    format!("user:{user}")
}

fn entry_key(entry_id: &str) -> String {
    format!("entry:{entry_id}")
}

fn read_balance(store: &mut JsonStore, user: &str) -> Result<u64> {
    let row = store
        .get(&user_key(user))
        .context("credit ledger is unreadable")?;
    Ok(row
        .and_then(|row| row.get("balance").and_then(Value::as_u64))
        .unwrap_or(0))
}

fn balance_row(balance: u64) -> Map<String, Value> {
    map_object(json!({ "balance": balance, "updated_at": now_utc_iso() }))
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
