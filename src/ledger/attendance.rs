use super::{CoinEntry, Ledger};
use crate::error::{LedgerError, LedgerResult};
use crate::model::{
    AttendanceConfirmation, AttendanceRecord, AttendanceStatus, Collection, Priority, TransactionType, User,
    LOCKED_ATTENDANCE_DATES,
};
use crate::records::{new_id, to_document};
use crate::store::{Batch, StorePath};
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};

impl Ledger {
    fn fine_for(&self, status: AttendanceStatus) -> i64 {
        match status {
            AttendanceStatus::Present => 0,
            AttendanceStatus::Absent => self.policy.absent_fine,
            AttendanceStatus::Late => self.policy.late_fine,
        }
    }

    fn locked_dates_raw(&mut self) -> LedgerResult<Value> {
        Ok(self
            .records
            .get_data(&StorePath::root(LOCKED_ATTENDANCE_DATES))?
            .unwrap_or(Value::Null))
    }

    pub fn locked_dates(&mut self) -> LedgerResult<Vec<String>> {
        Ok(match self.locked_dates_raw()? {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        })
    }

    /// Records a student's status for `date`. Fines follow the status: a
    /// previously charged fine is refunded before a new one is applied, and
    /// re-marking the same status changes nothing.
    pub fn mark_attendance(
        &mut self,
        student_id: &str,
        date: NaiveDate,
        status: AttendanceStatus,
        recorded_by: &str,
    ) -> LedgerResult<AttendanceRecord> {
        self.load_student(student_id)?;
        let day = date.format("%Y-%m-%d").to_string();
        if self.locked_dates()?.contains(&day) {
            return Err(LedgerError::invalid_state(format!("attendance for {} is confirmed", day)));
        }

        let existing = self
            .records
            .list::<AttendanceRecord>(Collection::AttendanceRecords)?
            .into_iter()
            .find(|r| r.student_id == student_id && r.date == date);
        if let Some(prev) = &existing {
            if prev.status == status {
                return Ok(prev.clone());
            }
        }

        let now = Utc::now();
        let fine = self.fine_for(status);
        let record = match &existing {
            Some(prev) => AttendanceRecord {
                status,
                fine_amount: fine,
                last_modified: Some(now),
                modified_by: Some(recorded_by.to_string()),
                ..prev.clone()
            },
            None => AttendanceRecord {
                id: format!("{}_{}", student_id, day),
                student_id: student_id.to_string(),
                date,
                status,
                fine_amount: fine,
                recorded_by: recorded_by.to_string(),
                recorded_at: now,
                last_modified: None,
                modified_by: None,
            },
        };

        let mut entries = Vec::new();
        if let Some(prev) = existing.as_ref().filter(|p| p.fine_amount > 0) {
            entries.push(
                CoinEntry::new(
                    TransactionType::Adjustment,
                    prev.fine_amount,
                    format!("Attendance correction for {}: {} fine refunded", day, prev.status.label()),
                )
                .related(&record.id),
            );
        }
        if fine > 0 {
            entries.push(
                CoinEntry::new(
                    TransactionType::Fine,
                    -fine,
                    format!("Attendance fine for {}: {}", day, status.label()),
                )
                .related(&record.id),
            );
        }

        let path = Collection::AttendanceRecords.doc(&record.id);
        let mut batch = Batch::new();
        batch.expect(
            path.child("status"),
            existing
                .as_ref()
                .map(|p| to_document(&p.status))
                .transpose()?
                .unwrap_or(Value::Null),
        );
        batch.set(path, to_document(&record)?);
        if !entries.is_empty() {
            self.stage_coin_changes(&mut batch, student_id, &entries)?;
        }
        self.records.commit(&batch)?;
        tracing::info!(student = student_id, date = %day, status = status.label(), fine, "attendance marked");

        if fine > 0 {
            self.notify(
                student_id,
                "attendance",
                "Attendance fine",
                &format!("You were marked {} on {}: -{} coins", status.label(), day, fine),
                Priority::High,
            );
        }
        Ok(record)
    }

    /// Applies one status to several students; every student is checked
    /// before anything is written.
    pub fn mark_attendance_many(
        &mut self,
        student_ids: &[String],
        date: NaiveDate,
        status: AttendanceStatus,
        recorded_by: &str,
    ) -> LedgerResult<Vec<AttendanceRecord>> {
        for id in student_ids {
            self.load_student(id)?;
        }
        student_ids
            .iter()
            .map(|id| self.mark_attendance(id, date, status, recorded_by))
            .collect()
    }

    /// Locks `date` against further changes after re-checking the admin's
    /// password.
    pub fn confirm_attendance(
        &mut self,
        admin: &User,
        date: NaiveDate,
        password: &str,
    ) -> LedgerResult<AttendanceConfirmation> {
        self.check_password(admin, password)?;
        let day = date.format("%Y-%m-%d").to_string();
        let raw = self.locked_dates_raw()?;
        let mut locked = self.locked_dates()?;
        if locked.contains(&day) {
            return Err(LedgerError::invalid_state(format!("attendance for {} is already confirmed", day)));
        }
        let records_count = self
            .list_attendance(Some(date), None)?
            .len();
        if records_count == 0 {
            return Err(LedgerError::invalid_state(format!("no attendance was marked for {}", day)));
        }
        locked.push(day.clone());

        let confirmation = AttendanceConfirmation {
            id: new_id(),
            date,
            confirmed_by: admin.id.clone(),
            confirmed_at: Utc::now(),
            records_count,
        };
        let root = StorePath::root(LOCKED_ATTENDANCE_DATES);
        let mut batch = Batch::new();
        batch.expect(root.clone(), raw);
        batch.set(root, json!(locked));
        batch.set(
            Collection::AttendanceConfirmations.doc(&confirmation.id),
            to_document(&confirmation)?,
        );
        self.records.commit(&batch)?;
        tracing::info!(date = %day, records = records_count, "attendance confirmed");
        Ok(confirmation)
    }

    pub fn list_attendance(
        &mut self,
        date: Option<NaiveDate>,
        student_id: Option<&str>,
    ) -> LedgerResult<Vec<AttendanceRecord>> {
        let mut records: Vec<AttendanceRecord> = self
            .records
            .list::<AttendanceRecord>(Collection::AttendanceRecords)?
            .into_iter()
            .filter(|r| date.map_or(true, |d| r.date == d))
            .filter(|r| student_id.map_or(true, |s| r.student_id == s))
            .collect();
        records.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.student_id.cmp(&b.student_id)));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn fines_follow_status_changes() {
        let mut l = ledger();
        let admin = admin_id(&mut l);
        let s = student(&mut l, "Aziza", 1000);
        let d = day("2024-09-02");

        l.mark_attendance(&s, d, AttendanceStatus::Absent, &admin).expect("absent");
        assert_eq!(rating(&mut l, &s), 500);
        l.mark_attendance(&s, d, AttendanceStatus::Absent, &admin).expect("same");
        assert_eq!(rating(&mut l, &s), 500);

        let late = l.mark_attendance(&s, d, AttendanceStatus::Late, &admin).expect("late");
        assert_eq!(late.fine_amount, 100);
        assert_eq!(rating(&mut l, &s), 900);

        l.mark_attendance(&s, d, AttendanceStatus::Present, &admin).expect("present");
        assert_eq!(rating(&mut l, &s), 1000);
        assert_eq!(l.list_attendance(Some(d), None).expect("list").len(), 1);

        let txs = transactions(&mut l, &s);
        let fines: i64 = txs.iter().filter(|t| t.kind == TransactionType::Fine).map(|t| t.amount).sum();
        let refunds: i64 = txs
            .iter()
            .filter(|t| t.kind == TransactionType::Adjustment)
            .map(|t| t.amount)
            .sum();
        assert_eq!((fines, refunds), (-600, 600));
    }

    #[test]
    fn confirmed_dates_are_locked() {
        let mut l = ledger();
        let admin_id = admin_id(&mut l);
        let admin = l.load_user(&admin_id).expect("admin");
        let a = student(&mut l, "Aziza", 0);
        let b = student(&mut l, "Bek", 0);
        let d = day("2024-09-03");
        l.mark_attendance_many(&[a.clone(), b.clone()], d, AttendanceStatus::Present, &admin_id)
            .expect("many");

        assert!(matches!(
            l.confirm_attendance(&admin, d, "wrong"),
            Err(LedgerError::WrongPassword)
        ));
        let c = l.confirm_attendance(&admin, d, "admin123").expect("confirm");
        assert_eq!(c.records_count, 2);
        assert_eq!(l.locked_dates().expect("locked"), vec!["2024-09-03".to_string()]);

        assert!(matches!(
            l.mark_attendance(&a, d, AttendanceStatus::Absent, &admin_id),
            Err(LedgerError::InvalidState(_))
        ));
        assert!(matches!(
            l.confirm_attendance(&admin, d, "admin123"),
            Err(LedgerError::InvalidState(_))
        ));
        assert_eq!(rating(&mut l, &a), 0);
    }

    #[test]
    fn empty_date_cannot_be_confirmed() {
        let mut l = ledger();
        let admin_id = admin_id(&mut l);
        let admin = l.load_user(&admin_id).expect("admin");
        let a = student(&mut l, "Aziza", 0);
        l.mark_attendance(&a, day("2024-09-03"), AttendanceStatus::Present, &admin_id)
            .expect("mark");

        assert!(matches!(
            l.confirm_attendance(&admin, day("2024-09-04"), "admin123"),
            Err(LedgerError::InvalidState(_))
        ));
        assert!(l.locked_dates().expect("locked").is_empty());
        l.mark_attendance(&a, day("2024-09-04"), AttendanceStatus::Late, &admin_id)
            .expect("date stays open");
    }

    #[test]
    fn unknown_student_in_batch_writes_nothing() {
        let mut l = ledger();
        let admin = admin_id(&mut l);
        let a = student(&mut l, "Aziza", 0);
        let res = l.mark_attendance_many(
            &[a.clone(), "ghost".to_string()],
            day("2024-09-04"),
            AttendanceStatus::Absent,
            &admin,
        );
        assert!(matches!(res, Err(LedgerError::NotFound(_))));
        assert_eq!(rating(&mut l, &a), 0);
        assert!(l.list_attendance(None, Some(&a)).expect("list").is_empty());
    }
}
