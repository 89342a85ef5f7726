use super::{CoinEntry, Ledger};
use crate::error::{LedgerError, LedgerResult};
use crate::model::{Collection, PaymentTransaction, Priority, TransactionType, WithdrawalRequest, WithdrawalStatus};
use crate::records::to_document;
use crate::store::Batch;
use serde::{Deserialize, Serialize};

/// Outcome of a single-entry balance change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinMove {
    pub student_id: String,
    pub amount: i64,
    pub rating: i64,
    pub transaction_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub student_id: String,
    pub rating: i64,
    pub transaction_total: i64,
    pub pending_withdrawal_coins: i64,
    pub consistent: bool,
}

impl Ledger {
    /// Adds `amount` (possibly negative) to the student's balance and logs one
    /// transaction. No floor is applied.
    pub fn adjust_coins(
        &mut self,
        student_id: &str,
        amount: i64,
        reason: &str,
        kind: TransactionType,
        operation_id: Option<&str>,
    ) -> LedgerResult<CoinMove> {
        if amount == 0 {
            return Err(LedgerError::validation("amount must not be zero"));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LedgerError::validation("reason is required"));
        }
        if let Some(done) = self.replay::<CoinMove>(operation_id, "coins.adjust", student_id)? {
            return Ok(done);
        }
        self.load_student(student_id)?;

        let mut batch = Batch::new();
        let staged =
            self.stage_coin_changes(&mut batch, student_id, &[CoinEntry::new(kind, amount, reason)])?;
        let result = CoinMove {
            student_id: student_id.to_string(),
            amount,
            rating: staged.rating,
            transaction_id: staged.transaction_ids.into_iter().next().unwrap_or_default(),
        };
        self.stage_operation(&mut batch, operation_id, "coins.adjust", student_id, &to_document(&result)?);
        self.records.commit(&batch)?;
        tracing::info!(student = student_id, amount, rating = result.rating, "coins adjusted");

        let (title, verb) = if amount > 0 {
            ("Coins added", "added to")
        } else {
            ("Coins deducted", "deducted from")
        };
        self.notify(
            student_id,
            "coins",
            title,
            &format!("{} coins {} your balance: {}", amount.abs(), verb, reason),
            Priority::Normal,
        );
        Ok(result)
    }

    pub fn apply_fine(
        &mut self,
        student_id: &str,
        amount: i64,
        reason: &str,
        operation_id: Option<&str>,
    ) -> LedgerResult<CoinMove> {
        if amount <= 0 {
            return Err(LedgerError::validation("fine amount must be > 0"));
        }
        self.adjust_coins(student_id, -amount, reason, TransactionType::Fine, operation_id)
    }

    pub fn apply_task_penalty(&mut self, student_id: &str, reason: Option<&str>) -> LedgerResult<CoinMove> {
        let amount = self.policy.task_penalty;
        let description = match reason.map(str::trim).filter(|r| !r.is_empty()) {
            Some(r) => format!("Task penalty: {}", r),
            None => "Task penalty".to_string(),
        };
        self.apply_fine(student_id, amount, &description, None)
    }

    /// Newest first, optionally for one student.
    pub fn transactions_for(&mut self, student_id: Option<&str>) -> LedgerResult<Vec<PaymentTransaction>> {
        let mut txs: Vec<PaymentTransaction> = self
            .records
            .list::<PaymentTransaction>(Collection::PaymentTransactions)?
            .into_iter()
            .filter(|t| student_id.map_or(true, |s| t.student_id == s))
            .collect();
        txs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(txs)
    }

    /// Compares the stored balance with the transaction log. Coins held by
    /// pending withdrawals are deducted from the balance but not yet logged.
    pub fn reconcile(&mut self, student_id: &str) -> LedgerResult<Reconciliation> {
        let student = self.load_student(student_id)?;
        let transaction_total = self
            .transactions_for(Some(student_id))?
            .iter()
            .fold(0i64, |acc, t| acc.saturating_add(t.amount));
        let pending_withdrawal_coins: i64 = self
            .records
            .list::<WithdrawalRequest>(Collection::WithdrawalRequests)?
            .iter()
            .filter(|w| w.student_id == student_id && w.status == WithdrawalStatus::Pending)
            .fold(0i64, |acc, w| acc.saturating_add(w.coins));
        let consistent = transaction_total == student.rating.saturating_add(pending_withdrawal_coins);
        if !consistent {
            tracing::warn!(
                student = student_id,
                rating = student.rating,
                transaction_total,
                "balance does not match transaction log"
            );
        }
        Ok(Reconciliation {
            student_id: student_id.to_string(),
            rating: student.rating,
            transaction_total,
            pending_withdrawal_coins,
            consistent,
        })
    }
}
