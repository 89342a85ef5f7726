//! Business operations over the record tree.
//!
//! Every operation that moves coins or changes a status commits one atomic
//! batch. Balances and statuses read during validation are re-asserted as
//! batch expectations, so a concurrent writer makes the commit fail with
//! `conflict` instead of silently overwriting. Notifications and activity
//! entries are appended after the batch and never fail the operation.

mod assignments;
mod attendance;
mod auth;
mod coins;
mod groups;
mod notifications;
mod payments;
mod referrals;
mod stats;
mod withdrawals;

pub use assignments::{AssignmentDraft, AssignmentKind, TestDraft};
pub use auth::{public_user, Registration, SeedAdmin};

use crate::error::{LedgerError, LedgerResult};
use crate::model::{
    Collection, PaymentTransaction, Priority, Role, TransactionType, User, LOCKED_ATTENDANCE_DATES,
};
use crate::policy::{LedgerPolicy, POLICY_KEY};
use crate::records::{new_id, to_document, Records};
use crate::store::{Batch, DocumentStore, SqliteStore};
use anyhow::Context;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::path::Path;

pub struct Ledger {
    records: Records,
    policy: LedgerPolicy,
}

/// One balance change staged into a batch.
#[derive(Debug, Clone)]
pub struct CoinEntry {
    pub kind: TransactionType,
    pub amount: i64,
    pub description: String,
    pub related_id: Option<String>,
}

impl CoinEntry {
    pub fn new(kind: TransactionType, amount: i64, description: impl Into<String>) -> Self {
        Self {
            kind,
            amount,
            description: description.into(),
            related_id: None,
        }
    }

    pub fn related(mut self, id: &str) -> Self {
        self.related_id = Some(id.to_string());
        self
    }
}

/// Result of staging coin entries: the balance the batch will leave behind
/// and the ids of the appended transactions.
#[derive(Debug, Clone)]
pub struct StagedCoins {
    pub rating: i64,
    pub transaction_ids: Vec<String>,
}

impl Ledger {
    pub fn open(workspace: &Path, seed: &SeedAdmin) -> anyhow::Result<Self> {
        let store = SqliteStore::open(workspace)
            .with_context(|| format!("failed to open ledger store in {}", workspace.to_string_lossy()))?;
        let mut ledger = Self::new(Box::new(store)).context("failed to load ledger policy")?;
        ledger
            .seed_admin(seed)
            .context("failed to seed administrator account")?;
        Ok(ledger)
    }

    pub fn new(store: Box<dyn DocumentStore>) -> LedgerResult<Self> {
        let mut records = Records::new(store);
        let policy = records
            .find::<LedgerPolicy>(Collection::Settings, POLICY_KEY)?
            .unwrap_or_default();
        Ok(Self { records, policy })
    }

    pub fn is_online(&self) -> bool {
        self.records.is_online()
    }

    pub fn records(&mut self) -> &mut Records {
        &mut self.records
    }

    pub fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    /// Merges `partial` into the stored policy. Unknown keys are ignored.
    pub fn update_policy(&mut self, partial: &Map<String, Value>) -> LedgerResult<LedgerPolicy> {
        let mut doc = to_document(&self.policy)?;
        if let Value::Object(map) = &mut doc {
            for (k, v) in partial {
                if map.contains_key(k) {
                    map.insert(k.clone(), v.clone());
                }
            }
        }
        let next: LedgerPolicy = serde_json::from_value(doc)
            .map_err(|e| LedgerError::validation(format!("invalid policy: {}", e)))?;
        next.validate().map_err(LedgerError::Validation)?;
        self.records
            .save_data(&Collection::Settings.doc(POLICY_KEY), to_document(&next)?)?;
        tracing::info!("ledger policy updated");
        self.policy = next;
        Ok(self.policy.clone())
    }

    /// Every collection keyed by name, plus the locked attendance dates.
    pub fn snapshot(&mut self) -> LedgerResult<Value> {
        let mut out = Map::new();
        for collection in Collection::ALL {
            let value = self
                .records
                .get_data(&collection.path())?
                .unwrap_or_else(|| json!({}));
            out.insert(collection.as_str().to_string(), value);
        }
        out.insert(LOCKED_ATTENDANCE_DATES.to_string(), json!(self.locked_dates()?));
        Ok(Value::Object(out))
    }

    pub(crate) fn load_user(&mut self, id: &str) -> LedgerResult<User> {
        self.records.require(Collection::Users, id)
    }

    pub(crate) fn load_student(&mut self, id: &str) -> LedgerResult<User> {
        let user = self.load_user(id)?;
        if user.role != Role::Student {
            return Err(LedgerError::validation(format!("user {} is not a student", id)));
        }
        Ok(user)
    }

    /// Stages `rating += delta` with the currently stored rating as a batch
    /// expectation. Returns the rating the batch will leave behind.
    pub(crate) fn stage_rating_delta(
        &mut self,
        batch: &mut Batch,
        student_id: &str,
        delta: i64,
    ) -> LedgerResult<i64> {
        let rating_path = Collection::Users.doc(student_id).child("rating");
        let raw = self.records.get_data(&rating_path)?.unwrap_or(Value::Null);
        let current = raw
            .as_i64()
            .or_else(|| raw.as_f64().map(|f| f as i64))
            .unwrap_or(0);
        let next = current
            .checked_add(delta)
            .ok_or_else(|| LedgerError::validation("amount out of range"))?;
        batch.expect(rating_path.clone(), raw);
        batch.set(rating_path, json!(next));
        Ok(next)
    }

    /// Stages one appended transaction per entry without touching the rating.
    pub(crate) fn stage_transactions(
        &self,
        batch: &mut Batch,
        student_id: &str,
        entries: &[CoinEntry],
    ) -> LedgerResult<Vec<String>> {
        let now = Utc::now();
        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            let tx = PaymentTransaction {
                id: new_id(),
                student_id: student_id.to_string(),
                kind: entry.kind,
                amount: entry.amount,
                description: entry.description.clone(),
                timestamp: now,
                related_id: entry.related_id.clone(),
            };
            batch.set(Collection::PaymentTransactions.doc(&tx.id), to_document(&tx)?);
            ids.push(tx.id);
        }
        Ok(ids)
    }

    /// Stages the net rating change for `student_id` plus one transaction per
    /// entry.
    pub(crate) fn stage_coin_changes(
        &mut self,
        batch: &mut Batch,
        student_id: &str,
        entries: &[CoinEntry],
    ) -> LedgerResult<StagedCoins> {
        let delta = entries
            .iter()
            .try_fold(0i64, |acc, e| acc.checked_add(e.amount))
            .ok_or_else(|| LedgerError::validation("amount out of range"))?;
        let rating = self.stage_rating_delta(batch, student_id, delta)?;
        let transaction_ids = self.stage_transactions(batch, student_id, entries)?;
        Ok(StagedCoins {
            rating,
            transaction_ids,
        })
    }

    /// Result recorded for `operation_id` by an earlier execution.
    pub(crate) fn replay<T: DeserializeOwned>(
        &mut self,
        operation_id: Option<&str>,
        kind: &str,
        student_id: &str,
    ) -> LedgerResult<Option<T>> {
        let Some(op) = operation_id else {
            return Ok(None);
        };
        let Some(doc) = self.records.get_data(&Collection::Operations.doc(op))? else {
            return Ok(None);
        };
        let recorded_kind = doc.get("kind").and_then(Value::as_str);
        let recorded_student = doc.get("studentId").and_then(Value::as_str);
        if recorded_kind != Some(kind) || recorded_student != Some(student_id) {
            tracing::warn!(operation = op, kind, student = student_id, "operation id reused for another request");
            return Err(LedgerError::validation(format!(
                "operation id {} was already used for a different request",
                op
            )));
        }
        tracing::info!(operation = op, "replaying recorded operation");
        let result = doc.get("result").cloned().unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map(Some)
            .map_err(|source| LedgerError::Malformed {
                collection: Collection::Operations.as_str().to_string(),
                id: op.to_string(),
                source,
            })
    }

    /// Records `result` under `operation_id` inside `batch`; the batch fails
    /// with `conflict` if another execution recorded it first.
    pub(crate) fn stage_operation(
        &self,
        batch: &mut Batch,
        operation_id: Option<&str>,
        kind: &str,
        student_id: &str,
        result: &Value,
    ) {
        let Some(op) = operation_id else {
            return;
        };
        let path = Collection::Operations.doc(op);
        batch.expect(path.clone(), Value::Null);
        batch.set(
            path,
            json!({
                "id": op,
                "kind": kind,
                "studentId": student_id,
                "result": result,
                "recordedAt": Utc::now(),
            }),
        );
    }

    pub(crate) fn notify(
        &mut self,
        user_id: &str,
        kind: &str,
        title: &str,
        message: &str,
        priority: Priority,
    ) {
        notifications::append_notification(&mut self.records, user_id, kind, title, message, priority);
    }

    pub(crate) fn log_activity(&mut self, user_id: &str, action: &str, description: &str) {
        notifications::append_activity(&mut self.records, user_id, action, description);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::model::User;

    pub(crate) fn ledger() -> Ledger {
        let store = SqliteStore::open_in_memory().expect("store");
        let mut ledger = Ledger::new(Box::new(store)).expect("ledger");
        ledger.seed_admin(&SeedAdmin::default()).expect("seed");
        ledger
    }

    pub(crate) fn admin_id(ledger: &mut Ledger) -> String {
        ledger
            .records()
            .list::<User>(Collection::Users)
            .expect("users")
            .into_iter()
            .find(|u| u.role == Role::Admin)
            .expect("admin")
            .id
    }

    pub(crate) fn student(ledger: &mut Ledger, name: &str, rating: i64) -> String {
        let email = format!("{}@example.com", name.to_lowercase());
        let user = ledger
            .register_user(Registration {
                name: name.to_string(),
                email,
                password: "secret1".to_string(),
                telegram: None,
                referral_code: None,
            })
            .expect("register");
        if rating != 0 {
            ledger
                .records()
                .save_data(&Collection::Users.doc(&user.id).child("rating"), json!(rating))
                .expect("seed rating");
        }
        user.id
    }

    pub(crate) fn rating(ledger: &mut Ledger, id: &str) -> i64 {
        ledger.load_user(id).expect("user").rating
    }

    pub(crate) fn transactions(ledger: &mut Ledger, id: &str) -> Vec<PaymentTransaction> {
        ledger.transactions_for(Some(id)).expect("transactions")
    }
}
