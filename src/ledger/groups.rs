use super::Ledger;
use crate::error::{LedgerError, LedgerResult};
use crate::model::{Collection, Group, User};
use crate::records::{new_id, to_document};
use crate::store::Batch;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;

impl Ledger {
    /// Stages a new member list for `group`. The stored list is re-asserted
    /// so concurrent membership edits conflict.
    pub(crate) fn stage_membership(
        &mut self,
        batch: &mut Batch,
        group: &Group,
        add: &[String],
        remove: &[String],
    ) -> LedgerResult<Vec<String>> {
        let ids_path = Collection::Groups.doc(&group.id).child("studentIds");
        let raw = self.records.get_data(&ids_path)?.unwrap_or(Value::Null);
        batch.expect(ids_path.clone(), raw);

        let mut ids: Vec<String> = group
            .student_ids
            .iter()
            .filter(|id| !remove.contains(id))
            .cloned()
            .collect();
        for id in add {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        batch.set(ids_path, json!(ids));
        batch.set(
            Collection::Groups.doc(&group.id).child("studentCount"),
            json!(ids.len()),
        );
        Ok(ids)
    }

    /// Detaches each student from whatever group they currently belong to,
    /// except `keep`.
    fn stage_departures(
        &mut self,
        batch: &mut Batch,
        students: &[User],
        keep: Option<&str>,
    ) -> LedgerResult<()> {
        let mut leaving: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for s in students {
            if let Some(old) = s.group_id.as_deref().filter(|g| Some(*g) != keep) {
                leaving.entry(old.to_string()).or_default().push(s.id.clone());
            }
        }
        for (group_id, ids) in leaving {
            if let Some(old) = self.records.find::<Group>(Collection::Groups, &group_id)? {
                self.stage_membership(batch, &old, &[], &ids)?;
            }
        }
        Ok(())
    }

    pub fn create_group(
        &mut self,
        name: &str,
        description: &str,
        student_ids: &[String],
        created_by: &str,
    ) -> LedgerResult<Group> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::validation("group name is required"));
        }
        let mut students = Vec::with_capacity(student_ids.len());
        for id in student_ids {
            students.push(self.load_student(id)?);
        }
        let mut ids: Vec<String> = Vec::new();
        for s in &students {
            if !ids.contains(&s.id) {
                ids.push(s.id.clone());
            }
        }

        let group = Group {
            id: new_id(),
            name: name.to_string(),
            description: description.trim().to_string(),
            student_count: ids.len(),
            student_ids: ids,
            created_at: Utc::now(),
            created_by: created_by.to_string(),
        };
        let mut batch = Batch::new();
        self.stage_departures(&mut batch, &students, None)?;
        batch.set(Collection::Groups.doc(&group.id), to_document(&group)?);
        for id in &group.student_ids {
            batch.set(Collection::Users.doc(id).child("groupId"), json!(group.id));
        }
        self.records.commit(&batch)?;
        tracing::info!(group = %group.id, members = group.student_count, "group created");
        Ok(group)
    }

    /// Moves the student into `group_id`, leaving any previous group.
    pub fn assign_student_to_group(&mut self, group_id: &str, student_id: &str) -> LedgerResult<Group> {
        let group: Group = self.records.require(Collection::Groups, group_id)?;
        let student = self.load_student(student_id)?;
        if student.group_id.as_deref() == Some(group_id) && group.student_ids.iter().any(|s| s == student_id) {
            return Ok(group);
        }
        let mut batch = Batch::new();
        self.stage_departures(&mut batch, std::slice::from_ref(&student), Some(group_id))?;
        let ids = self.stage_membership(&mut batch, &group, &[student_id.to_string()], &[])?;
        batch.set(Collection::Users.doc(student_id).child("groupId"), json!(group_id));
        self.records.commit(&batch)?;
        tracing::info!(group = group_id, student = student_id, "student assigned to group");
        Ok(Group {
            student_count: ids.len(),
            student_ids: ids,
            ..group
        })
    }

    pub fn remove_student_from_group(&mut self, group_id: &str, student_id: &str) -> LedgerResult<Group> {
        let group: Group = self.records.require(Collection::Groups, group_id)?;
        let student = self.load_student(student_id)?;
        let listed = group.student_ids.iter().any(|s| s == student_id);
        if !listed && student.group_id.as_deref() != Some(group_id) {
            return Err(LedgerError::invalid_state(format!(
                "student {} is not in group {}",
                student_id, group_id
            )));
        }
        let mut batch = Batch::new();
        let ids = self.stage_membership(&mut batch, &group, &[], &[student_id.to_string()])?;
        if student.group_id.as_deref() == Some(group_id) {
            batch.remove(Collection::Users.doc(student_id).child("groupId"));
        }
        self.records.commit(&batch)?;
        Ok(Group {
            student_count: ids.len(),
            student_ids: ids,
            ..group
        })
    }

    /// Deletes the group and clears `groupId` on its members.
    pub fn delete_group(&mut self, group_id: &str) -> LedgerResult<()> {
        let _: Group = self.records.require(Collection::Groups, group_id)?;
        let mut batch = Batch::new();
        batch.remove(Collection::Groups.doc(group_id));
        for s in self.list_students()? {
            if s.group_id.as_deref() == Some(group_id) {
                batch.remove(Collection::Users.doc(&s.id).child("groupId"));
            }
        }
        self.records.commit(&batch)?;
        tracing::info!(group = group_id, "group deleted");
        Ok(())
    }

    pub fn list_groups(&mut self) -> LedgerResult<Vec<Group>> {
        self.records.list(Collection::Groups)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    #[test]
    fn student_belongs_to_at_most_one_group() {
        let mut l = ledger();
        let admin = admin_id(&mut l);
        let a = student(&mut l, "Aziza", 0);
        let b = student(&mut l, "Bek", 0);
        let g1 = l
            .create_group("Morning", "", &[a.clone(), b.clone()], &admin)
            .expect("g1");
        assert_eq!(g1.student_count, 2);
        assert_eq!(l.load_user(&a).expect("a").group_id.as_deref(), Some(g1.id.as_str()));

        let g2 = l.create_group("Evening", "", &[a.clone()], &admin).expect("g2");
        let g1_now: Group = l.records().require(Collection::Groups, &g1.id).expect("g1");
        assert_eq!(g1_now.student_ids, vec![b.clone()]);
        assert_eq!(g1_now.student_count, 1);

        let moved = l.assign_student_to_group(&g1.id, &a).expect("move back");
        assert_eq!(moved.student_count, 2);
        let g2_now: Group = l.records().require(Collection::Groups, &g2.id).expect("g2");
        assert!(g2_now.student_ids.is_empty());
        assert_eq!(l.load_user(&a).expect("a").group_id.as_deref(), Some(g1.id.as_str()));
    }

    #[test]
    fn remove_and_delete_clear_membership() {
        let mut l = ledger();
        let admin = admin_id(&mut l);
        let a = student(&mut l, "Aziza", 0);
        let b = student(&mut l, "Bek", 0);
        let g = l.create_group("Morning", "", &[a.clone(), b.clone()], &admin).expect("g");

        let after = l.remove_student_from_group(&g.id, &a).expect("remove");
        assert_eq!(after.student_ids, vec![b.clone()]);
        assert!(l.load_user(&a).expect("a").group_id.is_none());
        assert!(matches!(
            l.remove_student_from_group(&g.id, &a),
            Err(LedgerError::InvalidState(_))
        ));

        l.delete_group(&g.id).expect("delete");
        assert!(l.load_user(&b).expect("b").group_id.is_none());
        assert!(l.list_groups().expect("groups").is_empty());
        assert!(matches!(l.delete_group(&g.id), Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn removing_a_student_detaches_them() {
        let mut l = ledger();
        let admin = admin_id(&mut l);
        let a = student(&mut l, "Aziza", 0);
        let g = l.create_group("Morning", "", &[a.clone()], &admin).expect("g");
        l.remove_student(&a).expect("remove");
        let g_now: Group = l.records().require(Collection::Groups, &g.id).expect("g");
        assert!(g_now.student_ids.is_empty());
        assert!(matches!(l.load_user(&a), Err(LedgerError::NotFound(_))));
    }
}
