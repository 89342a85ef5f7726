use super::coins::CoinMove;
use super::{CoinEntry, Ledger};
use crate::error::{LedgerError, LedgerResult};
use crate::model::{
    Collection, MonthlyPayment, PaymentMethod, PaymentState, PaymentStatus, Priority, TransactionType, User,
};
use crate::records::{new_id, to_document};
use crate::store::Batch;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinPayment {
    pub payment: MonthlyPayment,
    pub amount_paid: i64,
    pub coins_used: i64,
    pub rating: i64,
    pub fully_paid: bool,
}

/// User fields describing an open due.
fn due_fields(payment: &MonthlyPayment, status: PaymentStatus, outstanding: i64) -> LedgerResult<Map<String, Value>> {
    let mut partial = Map::new();
    partial.insert("paymentStatus".into(), to_document(&status)?);
    partial.insert("canWithdraw".into(), json!(false));
    partial.insert("currentPaymentId".into(), json!(payment.id));
    partial.insert("paymentAmount".into(), json!(outstanding));
    partial.insert("paymentDescription".into(), json!(payment.description));
    partial.insert("paymentDueDate".into(), json!(payment.due_date));
    Ok(partial)
}

/// User fields once the current due is settled.
fn settled_fields(now: DateTime<Utc>) -> LedgerResult<Map<String, Value>> {
    let mut partial = Map::new();
    partial.insert("paymentStatus".into(), to_document(&PaymentStatus::Paid)?);
    partial.insert("canWithdraw".into(), json!(true));
    partial.insert("lastPaymentDate".into(), json!(now));
    for key in ["currentPaymentId", "paymentAmount", "paymentDescription", "paymentDueDate"] {
        partial.insert(key.into(), Value::Null);
    }
    Ok(partial)
}

/// Settling an older payment must not clear the fields of a newer open one.
fn tracks(user: &User, payment_id: &str) -> bool {
    user.current_payment_id.as_deref().map_or(true, |id| id == payment_id)
}

impl Ledger {
    /// Creates one pending payment per student and closes their withdrawal
    /// gate until it is settled.
    pub fn create_monthly_payment(
        &mut self,
        student_ids: &[String],
        amount: i64,
        description: &str,
        due_date: Option<DateTime<Utc>>,
        created_by: &str,
    ) -> LedgerResult<Vec<MonthlyPayment>> {
        if amount <= 0 {
            return Err(LedgerError::validation("amount must be > 0"));
        }
        if student_ids.is_empty() {
            return Err(LedgerError::validation("at least one student is required"));
        }
        let description = match description.trim() {
            "" => "Monthly payment".to_string(),
            d => d.to_string(),
        };
        for id in student_ids {
            self.load_student(id)?;
        }

        let now = Utc::now();
        let due = match due_date {
            Some(d) => d,
            None => Duration::try_days(self.policy.payment_due_days)
                .and_then(|d| now.checked_add_signed(d))
                .ok_or_else(|| LedgerError::validation("payment due date out of range"))?,
        };
        let mut batch = Batch::new();
        let mut created = Vec::with_capacity(student_ids.len());
        for id in student_ids {
            let payment = MonthlyPayment {
                id: new_id(),
                student_id: id.clone(),
                amount,
                description: description.clone(),
                due_date: due,
                status: PaymentState::Pending,
                paid_amount: 0,
                remaining_amount: Some(amount),
                coins_used: 0,
                payment_method: None,
                paid_at: None,
                created_at: now,
                created_by: created_by.to_string(),
            };
            batch.set(Collection::MonthlyPayments.doc(&payment.id), to_document(&payment)?);
            batch.update(
                Collection::Users.doc(id),
                due_fields(&payment, PaymentStatus::Unpaid, amount)?,
            );
            created.push(payment);
        }
        self.records.commit(&batch)?;
        tracing::info!(students = created.len(), amount, "monthly payments created");

        for p in &created {
            self.notify(
                &p.student_id,
                "payment",
                "Monthly payment due",
                &format!(
                    "{}: {} so'm due by {}",
                    p.description,
                    p.amount,
                    p.due_date.format("%Y-%m-%d")
                ),
                Priority::High,
            );
        }
        Ok(created)
    }

    /// Pays `custom_amount` so'm (default: everything still due) from the
    /// student's coins. Fails without writing anything when the balance is
    /// short.
    pub fn pay_with_coins(
        &mut self,
        student_id: &str,
        payment_id: &str,
        custom_amount: Option<i64>,
        operation_id: Option<&str>,
    ) -> LedgerResult<CoinPayment> {
        if let Some(done) = self.replay::<CoinPayment>(operation_id, "payments.payWithCoins", student_id)? {
            return Ok(done);
        }
        let student = self.load_student(student_id)?;
        let mut payment: MonthlyPayment = self.records.require(Collection::MonthlyPayments, payment_id)?;
        if payment.student_id != student_id {
            return Err(LedgerError::Forbidden(format!(
                "payment {} belongs to another student",
                payment_id
            )));
        }
        if payment.status == PaymentState::Paid {
            return Err(LedgerError::invalid_state(format!("payment {} is already paid", payment_id)));
        }
        let remaining = payment.remaining();
        let amount = custom_amount.unwrap_or(remaining);
        if amount <= 0 || amount > remaining {
            return Err(LedgerError::validation(format!(
                "amount must be between 1 and {} so'm",
                remaining
            )));
        }

        let required = self.policy.coins_for(amount);
        let mut batch = Batch::new();
        let entry = CoinEntry::new(
            TransactionType::Payment,
            -required,
            format!("{}: {} so'm paid with coins", payment.description, amount),
        )
        .related(payment_id);
        let staged = self.stage_coin_changes(&mut batch, student_id, &[entry])?;
        if staged.rating < 0 {
            return Err(LedgerError::InsufficientCoins {
                required,
                available: staged.rating + required,
            });
        }

        let now = Utc::now();
        let previous_status = payment.status;
        payment.paid_amount += amount;
        payment.coins_used += required;
        payment.remaining_amount = Some(payment.remaining());
        payment.payment_method = Some(PaymentMethod::Coins);
        payment.paid_at = Some(now);
        let fully_paid = payment.paid_amount >= payment.amount;
        payment.status = if fully_paid {
            PaymentState::Paid
        } else {
            PaymentState::Partial
        };

        let path = Collection::MonthlyPayments.doc(payment_id);
        batch.expect(path.child("status"), to_document(&previous_status)?);
        batch.set(path, to_document(&payment)?);
        if tracks(&student, payment_id) {
            let fields = if fully_paid {
                settled_fields(now)?
            } else {
                due_fields(&payment, PaymentStatus::Partial, payment.remaining())?
            };
            batch.update(Collection::Users.doc(student_id), fields);
        }
        let result = CoinPayment {
            payment,
            amount_paid: amount,
            coins_used: required,
            rating: staged.rating,
            fully_paid,
        };
        self.stage_operation(
            &mut batch,
            operation_id,
            "payments.payWithCoins",
            student_id,
            &to_document(&result)?,
        );
        self.records.commit(&batch)?;
        tracing::info!(
            student = student_id,
            payment = payment_id,
            amount,
            coins = required,
            fully_paid,
            "payment made with coins"
        );

        let message = if fully_paid {
            format!("{} is fully paid ({} coins used)", result.payment.description, required)
        } else {
            format!(
                "{} so'm paid with {} coins, {} so'm still due",
                amount,
                required,
                result.payment.remaining()
            )
        };
        self.notify(student_id, "payment", "Payment received", &message, Priority::Normal);
        Ok(result)
    }

    /// Cash path: marks the payment paid without moving coins.
    pub fn confirm_payment(&mut self, payment_id: &str, confirmed_by: &str) -> LedgerResult<MonthlyPayment> {
        let mut payment: MonthlyPayment = self.records.require(Collection::MonthlyPayments, payment_id)?;
        if payment.status == PaymentState::Paid {
            return Err(LedgerError::invalid_state(format!("payment {} is already paid", payment_id)));
        }
        let now = Utc::now();
        let previous_status = payment.status;
        payment.status = PaymentState::Paid;
        payment.paid_amount = payment.amount;
        payment.remaining_amount = Some(0);
        payment.payment_method = Some(PaymentMethod::Cash);
        payment.paid_at = Some(now);

        let path = Collection::MonthlyPayments.doc(payment_id);
        let mut batch = Batch::new();
        batch.expect(path.child("status"), to_document(&previous_status)?);
        batch.set(path, to_document(&payment)?);
        if let Some(student) = self.records.find::<User>(Collection::Users, &payment.student_id)? {
            if tracks(&student, payment_id) {
                batch.update(Collection::Users.doc(&student.id), settled_fields(now)?);
            }
        }
        self.records.commit(&batch)?;
        tracing::info!(payment = payment_id, by = confirmed_by, "cash payment confirmed");

        self.notify(
            &payment.student_id,
            "payment",
            "Payment confirmed",
            &format!("{} was confirmed as paid", payment.description),
            Priority::Normal,
        );
        Ok(payment)
    }

    /// Late-payment fine; also closes the withdrawal gate.
    pub fn apply_payment_penalty(&mut self, student_id: &str, reason: Option<&str>) -> LedgerResult<CoinMove> {
        self.load_student(student_id)?;
        let amount = self.policy.payment_penalty;
        let description = match reason.map(str::trim).filter(|r| !r.is_empty()) {
            Some(r) => format!("Payment penalty: {}", r),
            None => "Payment penalty".to_string(),
        };
        let mut batch = Batch::new();
        let staged = self.stage_coin_changes(
            &mut batch,
            student_id,
            &[CoinEntry::new(TransactionType::Fine, -amount, description.clone())],
        )?;
        batch.set(Collection::Users.doc(student_id).child("canWithdraw"), json!(false));
        self.records.commit(&batch)?;
        tracing::info!(student = student_id, amount, "payment penalty applied");

        self.notify(
            student_id,
            "fine",
            "Payment penalty",
            &format!("{}: -{} coins", description, amount),
            Priority::High,
        );
        Ok(CoinMove {
            student_id: student_id.to_string(),
            amount: -amount,
            rating: staged.rating,
            transaction_id: staged.transaction_ids.into_iter().next().unwrap_or_default(),
        })
    }

    /// Newest first, optionally for one student.
    pub fn list_payments(&mut self, student_id: Option<&str>) -> LedgerResult<Vec<MonthlyPayment>> {
        let mut payments: Vec<MonthlyPayment> = self
            .records
            .list::<MonthlyPayment>(Collection::MonthlyPayments)?
            .into_iter()
            .filter(|p| student_id.map_or(true, |s| p.student_id == s))
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }
}
