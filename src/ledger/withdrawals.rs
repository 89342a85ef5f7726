use super::{CoinEntry, Ledger};
use crate::error::{LedgerError, LedgerResult};
use crate::model::{Collection, Priority, TransactionType, WithdrawalRequest, WithdrawalStatus};
use crate::records::{new_id, to_document};
use crate::store::Batch;
use chrono::Utc;
use serde_json::{json, Map};

const DEFAULT_METHOD: &str = "card";

impl Ledger {
    /// Checks the gates in order (settled dues, minimum, balance, password),
    /// then deducts the coins and files a pending request. The coins are
    /// logged as a `withdrawal` transaction only when the request is approved.
    pub fn request_withdrawal(
        &mut self,
        student_id: &str,
        coins: i64,
        card_number: &str,
        method: Option<&str>,
        password: &str,
        operation_id: Option<&str>,
    ) -> LedgerResult<WithdrawalRequest> {
        if let Some(done) = self.replay::<WithdrawalRequest>(operation_id, "withdrawals.request", student_id)? {
            return Ok(done);
        }
        if coins <= 0 {
            return Err(LedgerError::validation("coins must be > 0"));
        }
        let card_number = card_number.trim();
        if card_number.is_empty() {
            return Err(LedgerError::validation("card number is required"));
        }
        let student = self.load_student(student_id)?;
        if !student.can_withdraw {
            return Err(LedgerError::PaymentRequired);
        }
        if coins < self.policy.min_withdrawal_coins {
            return Err(LedgerError::BelowMinimum {
                minimum: self.policy.min_withdrawal_coins,
            });
        }
        if coins > student.rating {
            return Err(LedgerError::InsufficientCoins {
                required: coins,
                available: student.rating,
            });
        }
        self.check_password(&student, password)?;

        let request = WithdrawalRequest {
            id: new_id(),
            student_id: student_id.to_string(),
            student_name: student.name.clone(),
            coins,
            amount: self
                .policy
                .value_of(coins)
                .ok_or_else(|| LedgerError::validation("amount out of range"))?,
            card_number: card_number.to_string(),
            method: method
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or(DEFAULT_METHOD)
                .to_string(),
            status: WithdrawalStatus::Pending,
            requested_at: Utc::now(),
            processed_at: None,
            processed_by: None,
            rejection_reason: None,
        };

        let mut batch = Batch::new();
        batch.expect(Collection::Users.doc(student_id).child("canWithdraw"), json!(true));
        let rating = self.stage_rating_delta(&mut batch, student_id, -coins)?;
        if rating < 0 {
            return Err(LedgerError::InsufficientCoins {
                required: coins,
                available: rating + coins,
            });
        }
        let path = Collection::WithdrawalRequests.doc(&request.id);
        batch.expect(path.clone(), serde_json::Value::Null);
        batch.set(path, to_document(&request)?);
        self.stage_operation(
            &mut batch,
            operation_id,
            "withdrawals.request",
            student_id,
            &to_document(&request)?,
        );
        self.records.commit(&batch)?;
        tracing::info!(student = student_id, coins, request = %request.id, "withdrawal requested");

        self.log_activity(
            student_id,
            "withdrawal_request",
            &format!("requested {} coins ({} so'm)", coins, request.amount),
        );
        self.notify(
            student_id,
            "withdrawal",
            "Withdrawal requested",
            &format!("{} coins were reserved for your withdrawal of {} so'm", coins, request.amount),
            Priority::Normal,
        );
        Ok(request)
    }

    fn load_pending_withdrawal(&mut self, id: &str) -> LedgerResult<WithdrawalRequest> {
        let request: WithdrawalRequest = self.records.require(Collection::WithdrawalRequests, id)?;
        if request.status != WithdrawalStatus::Pending {
            return Err(LedgerError::invalid_state(format!("withdrawal {} was already processed", id)));
        }
        Ok(request)
    }

    fn stage_processed(
        batch: &mut Batch,
        request: &WithdrawalRequest,
        status: WithdrawalStatus,
        processed_by: &str,
        reason: Option<&str>,
    ) -> LedgerResult<()> {
        let path = Collection::WithdrawalRequests.doc(&request.id);
        batch.expect(path.child("status"), json!("pending"));
        let mut partial = Map::new();
        partial.insert("status".into(), to_document(&status)?);
        partial.insert("processedAt".into(), json!(Utc::now()));
        partial.insert("processedBy".into(), json!(processed_by));
        if let Some(r) = reason {
            partial.insert("rejectionReason".into(), json!(r));
        }
        batch.update(path, partial);
        Ok(())
    }

    pub fn approve_withdrawal(&mut self, id: &str, processed_by: &str) -> LedgerResult<WithdrawalRequest> {
        let mut request = self.load_pending_withdrawal(id)?;
        let mut batch = Batch::new();
        Self::stage_processed(&mut batch, &request, WithdrawalStatus::Approved, processed_by, None)?;
        let entry = CoinEntry::new(
            TransactionType::Withdrawal,
            -request.coins,
            format!("Withdrawal of {} so'm to {}", request.amount, request.method),
        )
        .related(id);
        self.stage_transactions(&mut batch, &request.student_id, &[entry])?;
        self.records.commit(&batch)?;
        tracing::info!(request = id, coins = request.coins, "withdrawal approved");

        self.notify(
            &request.student_id,
            "withdrawal",
            "Withdrawal approved",
            &format!("Your withdrawal of {} so'm was approved", request.amount),
            Priority::Normal,
        );
        request.status = WithdrawalStatus::Approved;
        request.processed_by = Some(processed_by.to_string());
        request.processed_at = Some(Utc::now());
        Ok(request)
    }

    /// Rejects a pending request and returns the reserved coins.
    pub fn reject_withdrawal(
        &mut self,
        id: &str,
        processed_by: &str,
        reason: Option<&str>,
    ) -> LedgerResult<WithdrawalRequest> {
        let mut request = self.load_pending_withdrawal(id)?;
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        let mut batch = Batch::new();
        Self::stage_processed(&mut batch, &request, WithdrawalStatus::Rejected, processed_by, reason)?;
        if self.records.find::<crate::model::User>(Collection::Users, &request.student_id)?.is_some() {
            self.stage_rating_delta(&mut batch, &request.student_id, request.coins)?;
        }
        self.records.commit(&batch)?;
        tracing::info!(request = id, coins = request.coins, "withdrawal rejected");

        let message = match reason {
            Some(r) => format!("Your withdrawal was rejected ({}); {} coins were returned", r, request.coins),
            None => format!("Your withdrawal was rejected; {} coins were returned", request.coins),
        };
        self.notify(&request.student_id, "withdrawal", "Withdrawal rejected", &message, Priority::High);
        request.status = WithdrawalStatus::Rejected;
        request.processed_by = Some(processed_by.to_string());
        request.processed_at = Some(Utc::now());
        request.rejection_reason = reason.map(str::to_string);
        Ok(request)
    }

    pub fn list_withdrawals(
        &mut self,
        student_id: Option<&str>,
        status: Option<WithdrawalStatus>,
    ) -> LedgerResult<Vec<WithdrawalRequest>> {
        let mut requests: Vec<WithdrawalRequest> = self
            .records
            .list::<WithdrawalRequest>(Collection::WithdrawalRequests)?
            .into_iter()
            .filter(|w| student_id.map_or(true, |s| w.student_id == s))
            .filter(|w| status.map_or(true, |st| w.status == st))
            .collect();
        requests.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(requests)
    }
}
