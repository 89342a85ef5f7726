use serde::{Deserialize, Serialize};

/// Settings document id under `settings/`.
pub const POLICY_KEY: &str = "ledgerPolicy";

/// Business constants. Every field falls back to its default when the stored
/// settings document omits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LedgerPolicy {
    /// So'm per coin.
    pub coin_value: i64,
    pub min_withdrawal_coins: i64,
    pub referral_bonus: i64,
    pub absent_fine: i64,
    pub late_fine: i64,
    pub task_penalty: i64,
    pub payment_penalty: i64,
    pub test_pass_score: i64,
    pub default_task_reward: i64,
    pub default_project_reward: i64,
    /// Minutes.
    pub default_test_time_limit: i64,
    pub payment_due_days: i64,
    pub min_password_length: usize,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            coin_value: 10,
            min_withdrawal_coins: 1000,
            referral_bonus: 20_000,
            absent_fine: 500,
            late_fine: 100,
            task_penalty: 200,
            payment_penalty: 2000,
            test_pass_score: 70,
            default_task_reward: 50,
            default_project_reward: 1000,
            default_test_time_limit: 30,
            payment_due_days: 30,
            min_password_length: 6,
        }
    }
}

impl LedgerPolicy {
    /// Coins needed to cover `amount` so'm, rounded up.
    pub fn coins_for(&self, amount: i64) -> i64 {
        let unit = self.coin_value.max(1);
        let whole = amount.div_euclid(unit);
        if amount.rem_euclid(unit) > 0 {
            whole + 1
        } else {
            whole
        }
    }

    /// So'm worth of `coins`; `None` when it does not fit in an i64.
    pub fn value_of(&self, coins: i64) -> Option<i64> {
        coins.checked_mul(self.coin_value)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.coin_value <= 0 {
            return Err("coinValue must be > 0".to_string());
        }
        let non_negative = [
            ("minWithdrawalCoins", self.min_withdrawal_coins),
            ("referralBonus", self.referral_bonus),
            ("absentFine", self.absent_fine),
            ("lateFine", self.late_fine),
            ("taskPenalty", self.task_penalty),
            ("paymentPenalty", self.payment_penalty),
            ("defaultTaskReward", self.default_task_reward),
            ("defaultProjectReward", self.default_project_reward),
            ("paymentDueDays", self.payment_due_days),
        ];
        for (name, v) in non_negative {
            if v < 0 {
                return Err(format!("{} must be >= 0", name));
            }
        }
        if !(0..=100).contains(&self.test_pass_score) {
            return Err("testPassScore must be between 0 and 100".to_string());
        }
        if self.payment_due_days > 3650 {
            return Err("paymentDueDays must be at most 3650".to_string());
        }
        if self.default_test_time_limit <= 0 {
            return Err("defaultTestTimeLimit must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_document_keeps_defaults() {
        let p: LedgerPolicy =
            serde_json::from_value(json!({ "minWithdrawalCoins": 10000 })).expect("policy");
        assert_eq!(p.min_withdrawal_coins, 10000);
        assert_eq!(p.coin_value, 10);
        assert_eq!(p.referral_bonus, 20_000);
    }

    #[test]
    fn coins_round_up() {
        let p = LedgerPolicy::default();
        assert_eq!(p.coins_for(6000), 600);
        assert_eq!(p.coins_for(6001), 601);
        assert_eq!(p.coins_for(5), 1);
        assert_eq!(p.value_of(1000), Some(10_000));
        assert_eq!(p.coins_for(i64::MAX), i64::MAX / 10 + 1);
        assert_eq!(p.value_of(i64::MAX / 5), None);
    }

    #[test]
    fn validate_rejects_nonsense() {
        let mut p = LedgerPolicy::default();
        assert!(p.validate().is_ok());
        p.coin_value = 0;
        assert!(p.validate().is_err());
        p.coin_value = 10;
        p.test_pass_score = 140;
        assert!(p.validate().is_err());
        p.test_pass_score = 60;
        p.payment_due_days = i64::MAX;
        assert!(p.validate().is_err());
    }
}
