use super::assignments::AssignmentKind;
use super::Ledger;
use crate::error::LedgerResult;
use crate::model::{
    MonthlyPayment, PaymentMethod, PaymentState, PaymentStatus, SubmissionStatus, WithdrawalStatus,
};
use chrono::{Datelike, Utc};
use serde::Serialize;
use std::collections::HashMap;

const TOP_PAYERS: usize = 10;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStats {
    pub total: usize,
    pub in_groups: usize,
    pub paid: usize,
    pub partial: usize,
    pub unpaid: usize,
    pub total_coins: i64,
    pub average_coins: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    /// Percentage of graded items that were approved.
    pub approval_rate: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStats {
    pub tests: usize,
    pub results: usize,
    pub average_score: i64,
    pub pass_rate: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub students: StudentStats,
    pub payments: PaymentOverview,
    pub withdrawals: QueueStats,
    pub withdrawn_amount: i64,
    pub tasks: usize,
    pub projects: usize,
    pub submissions: QueueStats,
    pub project_submissions: QueueStats,
    pub tests: TestStats,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOverview {
    pub total: usize,
    pub paid: usize,
    pub partial: usize,
    pub pending: usize,
    pub total_due: i64,
    pub total_collected: i64,
    pub outstanding: i64,
    pub collection_rate: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthSummary {
    pub year: i32,
    pub month: u32,
    pub created: usize,
    pub paid: usize,
    pub collected: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinPaymentSummary {
    pub payments: usize,
    pub coins_used: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopPayer {
    pub student_id: String,
    pub name: String,
    pub total_paid: i64,
    pub payments: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatistics {
    pub overview: PaymentOverview,
    pub current_month: MonthSummary,
    pub coin_payments: CoinPaymentSummary,
    pub top_payers: Vec<TopPayer>,
}

fn percent(part: usize, whole: usize) -> i64 {
    if whole == 0 {
        0
    } else {
        ((200 * part + whole) / (2 * whole)) as i64
    }
}

fn queue(statuses: impl Iterator<Item = SubmissionStatus>) -> QueueStats {
    let mut q = QueueStats::default();
    for s in statuses {
        q.total += 1;
        match s {
            SubmissionStatus::Pending => q.pending += 1,
            SubmissionStatus::Approved => q.approved += 1,
            SubmissionStatus::Rejected => q.rejected += 1,
        }
    }
    q.approval_rate = percent(q.approved, q.approved + q.rejected);
    q
}

fn overview(payments: &[MonthlyPayment]) -> PaymentOverview {
    let mut o = PaymentOverview {
        total: payments.len(),
        ..PaymentOverview::default()
    };
    for p in payments {
        match p.status {
            PaymentState::Paid => o.paid += 1,
            PaymentState::Partial => o.partial += 1,
            PaymentState::Pending => o.pending += 1,
        }
        o.total_due = o.total_due.saturating_add(p.amount);
        o.total_collected = o.total_collected.saturating_add(p.paid_amount.min(p.amount));
    }
    o.outstanding = o.total_due.saturating_sub(o.total_collected);
    o.collection_rate = if o.total_due > 0 {
        let (collected, due) = (i128::from(o.total_collected), i128::from(o.total_due));
        ((200 * collected + due) / (2 * due)) as i64
    } else {
        0
    };
    o
}

impl Ledger {
    pub fn get_statistics(&mut self) -> LedgerResult<Statistics> {
        let students = self.list_students()?;
        let mut student_stats = StudentStats {
            total: students.len(),
            ..StudentStats::default()
        };
        for s in &students {
            if s.group_id.is_some() {
                student_stats.in_groups += 1;
            }
            match s.payment_status {
                PaymentStatus::Paid => student_stats.paid += 1,
                PaymentStatus::Partial => student_stats.partial += 1,
                PaymentStatus::Unpaid => student_stats.unpaid += 1,
            }
            student_stats.total_coins = student_stats.total_coins.saturating_add(s.rating);
        }
        if !students.is_empty() {
            student_stats.average_coins = student_stats.total_coins / students.len() as i64;
        }

        let withdrawals = self.list_withdrawals(None, None)?;
        let withdrawal_queue = queue(withdrawals.iter().map(|w| match w.status {
            WithdrawalStatus::Pending => SubmissionStatus::Pending,
            WithdrawalStatus::Approved => SubmissionStatus::Approved,
            WithdrawalStatus::Rejected => SubmissionStatus::Rejected,
        }));
        let withdrawn_amount = withdrawals
            .iter()
            .filter(|w| w.status == WithdrawalStatus::Approved)
            .fold(0i64, |acc, w| acc.saturating_add(w.amount));

        let results = self.list_test_results(None)?;
        let pass_score = self.policy.test_pass_score;
        let tests = TestStats {
            tests: self.list_tests()?.len(),
            results: results.len(),
            average_score: if results.is_empty() {
                0
            } else {
                results.iter().fold(0i64, |acc, r| acc.saturating_add(r.score)) / results.len() as i64
            },
            pass_rate: percent(
                results.iter().filter(|r| r.score >= pass_score).count(),
                results.len(),
            ),
        };

        Ok(Statistics {
            students: student_stats,
            payments: overview(&self.list_payments(None)?),
            withdrawals: withdrawal_queue,
            withdrawn_amount,
            tasks: self.list_tasks()?.len(),
            projects: self.list_projects()?.len(),
            submissions: queue(
                self.list_submissions(AssignmentKind::Task, None)?
                    .into_iter()
                    .map(|s| s.status),
            ),
            project_submissions: queue(
                self.list_submissions(AssignmentKind::Project, None)?
                    .into_iter()
                    .map(|s| s.status),
            ),
            tests,
        })
    }

    pub fn get_payment_statistics(&mut self) -> LedgerResult<PaymentStatistics> {
        let payments = self.list_payments(None)?;
        let now = Utc::now();

        let mut current_month = MonthSummary {
            year: now.year(),
            month: now.month(),
            ..MonthSummary::default()
        };
        let mut coin_payments = CoinPaymentSummary::default();
        let mut per_student: HashMap<&str, (i64, usize)> = HashMap::new();
        for p in &payments {
            if p.created_at.year() == now.year() && p.created_at.month() == now.month() {
                current_month.created += 1;
                current_month.collected = current_month.collected.saturating_add(p.paid_amount);
                if p.status == PaymentState::Paid {
                    current_month.paid += 1;
                }
            }
            if p.payment_method == Some(PaymentMethod::Coins) {
                coin_payments.payments += 1;
                coin_payments.coins_used = coin_payments.coins_used.saturating_add(p.coins_used);
                coin_payments.amount = coin_payments.amount.saturating_add(p.paid_amount);
            }
            if p.paid_amount > 0 {
                let e = per_student.entry(p.student_id.as_str()).or_default();
                e.0 = e.0.saturating_add(p.paid_amount);
                e.1 += 1;
            }
        }

        let names: HashMap<String, String> = self
            .list_students()?
            .into_iter()
            .map(|s| (s.id, s.name))
            .collect();
        let mut top_payers: Vec<TopPayer> = per_student
            .into_iter()
            .map(|(id, (total_paid, count))| TopPayer {
                student_id: id.to_string(),
                name: names.get(id).cloned().unwrap_or_default(),
                total_paid,
                payments: count,
            })
            .collect();
        top_payers.sort_by(|a, b| {
            b.total_paid
                .cmp(&a.total_paid)
                .then_with(|| a.student_id.cmp(&b.student_id))
        });
        top_payers.truncate(TOP_PAYERS);

        Ok(PaymentStatistics {
            overview: overview(&payments),
            current_month,
            coin_payments,
            top_payers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;

    #[test]
    fn payment_statistics_rank_payers() {
        let mut l = ledger();
        let admin = admin_id(&mut l);
        let a = student(&mut l, "Aziza", 5000);
        let b = student(&mut l, "Bek", 5000);
        let created = l
            .create_monthly_payment(&[a.clone(), b.clone()], 10_000, "Fee", None, &admin)
            .expect("create");
        let pa = created.iter().find(|p| p.student_id == a).expect("pa").id.clone();
        let pb = created.iter().find(|p| p.student_id == b).expect("pb").id.clone();
        l.pay_with_coins(&a, &pa, Some(2000), None).expect("a pays");
        l.confirm_payment(&pb, &admin).expect("b cash");

        let stats = l.get_payment_statistics().expect("stats");
        assert_eq!(stats.overview.total, 2);
        assert_eq!(stats.overview.paid, 1);
        assert_eq!(stats.overview.partial, 1);
        assert_eq!(stats.overview.total_collected, 12_000);
        assert_eq!(stats.overview.outstanding, 8000);
        assert_eq!(stats.coin_payments.coins_used, 200);
        assert_eq!(stats.current_month.created, 2);
        assert_eq!(stats.top_payers[0].student_id, b);
        assert_eq!(stats.top_payers[0].name, "Bek");
        assert_eq!(stats.top_payers.len(), 2);
    }

    #[test]
    fn overview_counts_students_and_queues() {
        let mut l = ledger();
        let admin = admin_id(&mut l);
        let a = student(&mut l, "Aziza", 100);
        student(&mut l, "Bek", 300);
        let task = l
            .create_task(
                super::super::AssignmentDraft {
                    title: "Essay".to_string(),
                    reward: Some(10),
                    ..Default::default()
                },
                &admin,
            )
            .expect("task");
        let sub = l.submit_task(&a, &task.id, "done").expect("submit");
        l.grade_submission(&sub.id, None, None, &admin).expect("grade");

        let stats = l.get_statistics().expect("stats");
        assert_eq!(stats.students.total, 2);
        assert_eq!(stats.students.total_coins, 410);
        assert_eq!(stats.students.unpaid, 2);
        assert_eq!(stats.tasks, 1);
        assert_eq!(stats.submissions.approved, 1);
        assert_eq!(stats.submissions.approval_rate, 100);
    }
}
