use super::{CoinEntry, Ledger};
use crate::error::{LedgerError, LedgerResult};
use crate::model::{Collection, Priority, Referral, ReferralStatus, TransactionType};
use crate::store::Batch;
use chrono::Utc;
use serde_json::{json, Map};

impl Ledger {
    fn load_pending_referral(&mut self, id: &str) -> LedgerResult<Referral> {
        let referral: Referral = self.records.require(Collection::Referrals, id)?;
        if referral.status != ReferralStatus::Pending {
            return Err(LedgerError::invalid_state(format!("referral {} was already processed", id)));
        }
        Ok(referral)
    }

    /// Credits the referral bonus exactly once. The pending status is part
    /// of the batch, so a racing second approval fails with `conflict`.
    pub fn approve_referral(&mut self, id: &str) -> LedgerResult<Referral> {
        let mut referral = self.load_pending_referral(id)?;
        self.load_student(&referral.referrer_id)?;
        let bonus = self.policy.referral_bonus;
        let now = Utc::now();

        let path = Collection::Referrals.doc(id);
        let mut batch = Batch::new();
        batch.expect(path.child("status"), json!("pending"));
        let mut partial = Map::new();
        partial.insert("status".into(), json!("approved"));
        partial.insert("approvedAt".into(), json!(now));
        batch.update(path, partial);
        let entry = CoinEntry::new(
            TransactionType::Earning,
            bonus,
            format!("Referral bonus for inviting {}", referral.new_user_name),
        )
        .related(id);
        self.stage_coin_changes(&mut batch, &referral.referrer_id, &[entry])?;
        self.records.commit(&batch)?;
        tracing::info!(referral = id, referrer = %referral.referrer_id, bonus, "referral approved");

        self.notify(
            &referral.referrer_id,
            "referral",
            "Referral bonus",
            &format!("{} joined with your code: +{} coins", referral.new_user_name, bonus),
            Priority::High,
        );
        referral.status = ReferralStatus::Approved;
        referral.approved_at = Some(now);
        Ok(referral)
    }

    pub fn reject_referral(&mut self, id: &str, reason: Option<&str>) -> LedgerResult<Referral> {
        let mut referral = self.load_pending_referral(id)?;
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        let now = Utc::now();

        let path = Collection::Referrals.doc(id);
        let mut batch = Batch::new();
        batch.expect(path.child("status"), json!("pending"));
        let mut partial = Map::new();
        partial.insert("status".into(), json!("rejected"));
        partial.insert("rejectedAt".into(), json!(now));
        if let Some(r) = reason {
            partial.insert("rejectionReason".into(), json!(r));
        }
        batch.update(path, partial);
        self.records.commit(&batch)?;
        tracing::info!(referral = id, "referral rejected");

        self.notify(
            &referral.referrer_id,
            "referral",
            "Referral rejected",
            &format!("The referral of {} was not approved", referral.new_user_name),
            Priority::Normal,
        );
        referral.status = ReferralStatus::Rejected;
        referral.rejected_at = Some(now);
        referral.rejection_reason = reason.map(str::to_string);
        Ok(referral)
    }

    pub fn list_referrals(
        &mut self,
        referrer_id: Option<&str>,
        status: Option<ReferralStatus>,
    ) -> LedgerResult<Vec<Referral>> {
        let mut referrals: Vec<Referral> = self
            .records
            .list::<Referral>(Collection::Referrals)?
            .into_iter()
            .filter(|r| referrer_id.map_or(true, |id| r.referrer_id == id))
            .filter(|r| status.map_or(true, |s| r.status == s))
            .collect();
        referrals.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(referrals)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::Registration;
    use super::*;

    fn referred_pair(l: &mut Ledger) -> (String, Referral) {
        let a = student(l, "Aziza", 0);
        let code = l.load_user(&a).expect("a").referral_code.expect("code");
        l.register_user(Registration {
            name: "Bek".to_string(),
            email: "bek@example.com".to_string(),
            password: "secret1".to_string(),
            telegram: None,
            referral_code: Some(code),
        })
        .expect("register b");
        let referral = l.list_referrals(Some(&a), None).expect("list").remove(0);
        (a, referral)
    }

    #[test]
    fn approval_pays_bonus_exactly_once() {
        let mut l = ledger();
        let (a, referral) = referred_pair(&mut l);
        assert_eq!(referral.status, ReferralStatus::Pending);

        let approved = l.approve_referral(&referral.id).expect("approve");
        assert_eq!(approved.status, ReferralStatus::Approved);
        assert_eq!(rating(&mut l, &a), 20_000);

        assert!(matches!(
            l.approve_referral(&referral.id),
            Err(LedgerError::InvalidState(_))
        ));
        assert_eq!(rating(&mut l, &a), 20_000);
        let earnings: Vec<i64> = transactions(&mut l, &a)
            .into_iter()
            .filter(|t| t.kind == TransactionType::Earning)
            .map(|t| t.amount)
            .collect();
        assert_eq!(earnings, vec![20_000]);
    }

    #[test]
    fn racing_approval_fails_on_status_precondition() {
        let mut l = ledger();
        let (a, referral) = referred_pair(&mut l);
        // A stale reader that already validated the pending status.
        let mut stale = Batch::new();
        stale.expect(Collection::Referrals.doc(&referral.id).child("status"), json!("pending"));
        stale.set(Collection::Referrals.doc(&referral.id).child("status"), json!("approved"));

        l.approve_referral(&referral.id).expect("approve");
        assert!(matches!(l.records().commit(&stale), Err(LedgerError::Conflict(_))));
        assert_eq!(rating(&mut l, &a), 20_000);
    }

    #[test]
    fn rejection_moves_no_coins() {
        let mut l = ledger();
        let (a, referral) = referred_pair(&mut l);
        let r = l.reject_referral(&referral.id, Some("duplicate account")).expect("reject");
        assert_eq!(r.rejection_reason.as_deref(), Some("duplicate account"));
        assert_eq!(rating(&mut l, &a), 0);
        assert!(l.approve_referral(&referral.id).is_err());
    }
}
