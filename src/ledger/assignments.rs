use super::{CoinEntry, Ledger};
use crate::error::{LedgerError, LedgerResult};
use crate::model::{
    AssignmentStatus, Audience, Collection, Group, Priority, Project, Question, QuestionResult,
    Submission, SubmissionStatus, Task, Test, TestResult, TransactionType, User,
};
use crate::records::{new_id, to_document};
use crate::store::Batch;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

const OPTIONS_PER_QUESTION: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentKind {
    Task,
    Test,
    Project,
}

impl AssignmentKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "task" | "tasks" => Some(Self::Task),
            "test" | "tests" => Some(Self::Test),
            "project" | "projects" => Some(Self::Project),
            _ => None,
        }
    }

    pub fn collection(self) -> Collection {
        match self {
            Self::Task => Collection::Tasks,
            Self::Test => Collection::Tests,
            Self::Project => Collection::Projects,
        }
    }

    pub fn submissions(self) -> Collection {
        match self {
            Self::Task => Collection::Submissions,
            Self::Test => Collection::TestResults,
            Self::Project => Collection::ProjectSubmissions,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Test => "test",
            Self::Project => "project",
        }
    }
}

/// Content and targeting for a new task or project.
#[derive(Debug, Clone, Default)]
pub struct AssignmentDraft {
    pub title: String,
    pub description: String,
    pub deadline: Option<DateTime<Utc>>,
    pub reward: Option<i64>,
    pub group_id: Option<String>,
    pub assigned_students: Option<Vec<String>>,
    pub website_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TestDraft {
    pub title: String,
    pub description: String,
    pub questions: Vec<Question>,
    pub time_limit: Option<i64>,
    pub group_id: Option<String>,
    pub assigned_students: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentAssignments {
    pub tasks: Vec<Task>,
    pub tests: Vec<Test>,
    pub projects: Vec<Project>,
}

/// `round(correct / total * 100)` with halves rounded up, in integers.
pub(crate) fn score_percent(correct: usize, total: usize) -> i64 {
    if total == 0 {
        return 0;
    }
    ((200 * correct + total) / (2 * total)) as i64
}

pub(crate) fn test_reward(score: i64, pass_score: i64) -> i64 {
    if score >= pass_score {
        score / 10 * 10
    } else {
        0
    }
}

impl Ledger {
    /// Validates targeting and returns the audience with its current
    /// student ids.
    fn resolve_audience(
        &mut self,
        group_id: Option<&str>,
        assigned: Option<&[String]>,
    ) -> LedgerResult<(Audience, Vec<String>)> {
        let audience = Audience::from_fields(group_id, assigned);
        match &audience {
            Audience::Group(g) => {
                let _: Group = self.records.require(Collection::Groups, g)?;
            }
            Audience::Students(ids) => {
                for id in ids {
                    self.load_student(id)?;
                }
            }
            Audience::All => {}
        }
        let recipients = self
            .list_students()?
            .into_iter()
            .filter(|s| audience.includes(s))
            .map(|s| s.id)
            .collect();
        Ok((audience, recipients))
    }

    fn announce(&mut self, recipients: &[String], kind: AssignmentKind, title: &str) {
        let (heading, message) = match kind {
            AssignmentKind::Task => ("New task", format!("A new task was assigned: {}", title)),
            AssignmentKind::Test => ("New test", format!("A new test is available: {}", title)),
            AssignmentKind::Project => ("New project", format!("A new project was assigned: {}", title)),
        };
        for id in recipients {
            self.notify(id, kind.label(), heading, &message, Priority::Normal);
        }
    }

    fn validate_draft(draft: &AssignmentDraft) -> LedgerResult<()> {
        if draft.title.trim().is_empty() {
            return Err(LedgerError::validation("title is required"));
        }
        if draft.reward.is_some_and(|r| r < 0) {
            return Err(LedgerError::validation("reward must be >= 0"));
        }
        Ok(())
    }

    /// Notifies the students targeted right now; later membership changes
    /// do not re-notify.
    pub fn create_task(&mut self, draft: AssignmentDraft, created_by: &str) -> LedgerResult<Task> {
        Self::validate_draft(&draft)?;
        let (audience, recipients) =
            self.resolve_audience(draft.group_id.as_deref(), draft.assigned_students.as_deref())?;
        let task = Task {
            id: new_id(),
            title: draft.title.trim().to_string(),
            description: draft.description,
            deadline: draft.deadline,
            reward: draft.reward.unwrap_or(self.policy.default_task_reward),
            group_id: audience.group_id(),
            assigned_students: audience.assigned_students(),
            website_url: draft.website_url.filter(|u| !u.trim().is_empty()),
            status: AssignmentStatus::Active,
            created_at: Utc::now(),
            created_by: created_by.to_string(),
        };
        self.records
            .save_data(&Collection::Tasks.doc(&task.id), to_document(&task)?)?;
        tracing::info!(task = %task.id, recipients = recipients.len(), "task created");
        self.announce(&recipients, AssignmentKind::Task, &task.title);
        Ok(task)
    }

    pub fn create_project(&mut self, draft: AssignmentDraft, created_by: &str) -> LedgerResult<Project> {
        Self::validate_draft(&draft)?;
        let (audience, recipients) =
            self.resolve_audience(draft.group_id.as_deref(), draft.assigned_students.as_deref())?;
        let project = Project {
            id: new_id(),
            title: draft.title.trim().to_string(),
            description: draft.description,
            deadline: draft.deadline,
            reward: draft.reward.unwrap_or(self.policy.default_project_reward),
            group_id: audience.group_id(),
            assigned_students: audience.assigned_students(),
            website_url: draft.website_url.filter(|u| !u.trim().is_empty()),
            status: AssignmentStatus::Active,
            created_at: Utc::now(),
            created_by: created_by.to_string(),
        };
        self.records
            .save_data(&Collection::Projects.doc(&project.id), to_document(&project)?)?;
        tracing::info!(project = %project.id, recipients = recipients.len(), "project created");
        self.announce(&recipients, AssignmentKind::Project, &project.title);
        Ok(project)
    }

    pub fn create_test(&mut self, draft: TestDraft, created_by: &str) -> LedgerResult<Test> {
        if draft.title.trim().is_empty() {
            return Err(LedgerError::validation("title is required"));
        }
        if draft.questions.is_empty() {
            return Err(LedgerError::validation("a test needs at least one question"));
        }
        for (i, q) in draft.questions.iter().enumerate() {
            if q.text.trim().is_empty() || q.options.len() != OPTIONS_PER_QUESTION {
                return Err(LedgerError::validation(format!(
                    "question {} needs text and {} options",
                    i + 1,
                    OPTIONS_PER_QUESTION
                )));
            }
            if q.correct_answer >= q.options.len() {
                return Err(LedgerError::validation(format!(
                    "question {} has no option {}",
                    i + 1,
                    q.correct_answer
                )));
            }
        }
        let time_limit = draft.time_limit.unwrap_or(self.policy.default_test_time_limit);
        if time_limit <= 0 {
            return Err(LedgerError::validation("timeLimit must be > 0"));
        }
        let (audience, recipients) =
            self.resolve_audience(draft.group_id.as_deref(), draft.assigned_students.as_deref())?;
        let test = Test {
            id: new_id(),
            title: draft.title.trim().to_string(),
            description: draft.description,
            questions: draft.questions,
            time_limit,
            group_id: audience.group_id(),
            assigned_students: audience.assigned_students(),
            status: AssignmentStatus::Active,
            created_at: Utc::now(),
            created_by: created_by.to_string(),
        };
        self.records
            .save_data(&Collection::Tests.doc(&test.id), to_document(&test)?)?;
        tracing::info!(test = %test.id, questions = test.questions.len(), "test created");
        self.announce(&recipients, AssignmentKind::Test, &test.title);
        Ok(test)
    }

    pub fn list_tasks(&mut self) -> LedgerResult<Vec<Task>> {
        self.records.list(Collection::Tasks)
    }

    pub fn list_tests(&mut self) -> LedgerResult<Vec<Test>> {
        self.records.list(Collection::Tests)
    }

    pub fn list_projects(&mut self) -> LedgerResult<Vec<Project>> {
        self.records.list(Collection::Projects)
    }

    pub fn set_assignment_status(
        &mut self,
        kind: AssignmentKind,
        id: &str,
        status: AssignmentStatus,
    ) -> LedgerResult<()> {
        self.require_assignment(kind, id)?;
        let mut partial = Map::new();
        partial.insert("status".into(), to_document(&status)?);
        self.records.update_in_array(kind.collection(), id, partial)
    }

    /// Removes one assignment; its submissions stay as history.
    pub fn delete_assignment(&mut self, kind: AssignmentKind, id: &str) -> LedgerResult<()> {
        self.require_assignment(kind, id)?;
        self.records.remove_from_array(kind.collection(), id)?;
        tracing::info!(kind = kind.label(), id, "assignment deleted");
        Ok(())
    }

    /// Clears every assignment of `kind` together with its submissions.
    pub fn clear_assignments(&mut self, kind: AssignmentKind) -> LedgerResult<()> {
        let mut batch = Batch::new();
        batch.remove(kind.collection().path());
        batch.remove(kind.submissions().path());
        self.records.commit(&batch)?;
        tracing::info!(kind = kind.label(), "assignments cleared");
        Ok(())
    }

    fn require_assignment(&mut self, kind: AssignmentKind, id: &str) -> LedgerResult<Value> {
        self.records
            .get_data(&kind.collection().doc(id))?
            .ok_or_else(|| LedgerError::not_found(format!("{} {}", kind.label(), id)))
    }

    /// Active assignments visible to the student under current group
    /// membership.
    pub fn assignments_for_student(&mut self, student_id: &str) -> LedgerResult<StudentAssignments> {
        let student = self.load_student(student_id)?;
        let visible = |status: AssignmentStatus, group: Option<&str>, assigned: Option<&[String]>| {
            status == AssignmentStatus::Active && Audience::from_fields(group, assigned).includes(&student)
        };
        let tasks = self
            .list_tasks()?
            .into_iter()
            .filter(|t| visible(t.status, t.group_id.as_deref(), t.assigned_students.as_deref()))
            .collect();
        let tests = self
            .list_tests()?
            .into_iter()
            .filter(|t| visible(t.status, t.group_id.as_deref(), t.assigned_students.as_deref()))
            .collect();
        let projects = self
            .list_projects()?
            .into_iter()
            .filter(|p| visible(p.status, p.group_id.as_deref(), p.assigned_students.as_deref()))
            .collect();
        Ok(StudentAssignments {
            tasks,
            tests,
            projects,
        })
    }

    fn check_open_for(
        &self,
        kind: AssignmentKind,
        id: &str,
        status: AssignmentStatus,
        audience: Audience,
        student: &User,
    ) -> LedgerResult<()> {
        if status != AssignmentStatus::Active {
            return Err(LedgerError::invalid_state(format!("{} {} is not active", kind.label(), id)));
        }
        if !audience.includes(student) {
            return Err(LedgerError::Forbidden(format!(
                "{} {} is not assigned to this student",
                kind.label(),
                id
            )));
        }
        Ok(())
    }

    fn submit_work(
        &mut self,
        kind: AssignmentKind,
        assignment_id: &str,
        student: &User,
        description: &str,
    ) -> LedgerResult<Submission> {
        let description = description.trim();
        if description.is_empty() {
            return Err(LedgerError::validation("submission content is required"));
        }
        let existing: Vec<Submission> = self.records.list(kind.submissions())?;
        let open = existing.iter().any(|s| {
            s.student_id == student.id
                && s.status != SubmissionStatus::Rejected
                && match kind {
                    AssignmentKind::Project => s.project_id.as_deref() == Some(assignment_id),
                    _ => s.task_id.as_deref() == Some(assignment_id),
                }
        });
        if open {
            return Err(LedgerError::invalid_state(format!(
                "{} {} already has a submission from this student",
                kind.label(),
                assignment_id
            )));
        }
        let (task_id, project_id) = match kind {
            AssignmentKind::Project => (None, Some(assignment_id.to_string())),
            _ => (Some(assignment_id.to_string()), None),
        };
        let submission = Submission {
            id: new_id(),
            task_id,
            project_id,
            student_id: student.id.clone(),
            description: description.to_string(),
            status: SubmissionStatus::Pending,
            reward: None,
            feedback: None,
            submitted_at: Utc::now(),
            graded_at: None,
            graded_by: None,
        };
        self.records
            .save_data(&kind.submissions().doc(&submission.id), to_document(&submission)?)?;
        tracing::info!(kind = kind.label(), submission = %submission.id, "work submitted");
        Ok(submission)
    }

    pub fn submit_task(&mut self, student_id: &str, task_id: &str, description: &str) -> LedgerResult<Submission> {
        let student = self.load_student(student_id)?;
        let task: Task = self.records.require(Collection::Tasks, task_id)?;
        let audience = Audience::from_fields(task.group_id.as_deref(), task.assigned_students.as_deref());
        self.check_open_for(AssignmentKind::Task, task_id, task.status, audience, &student)?;
        self.submit_work(AssignmentKind::Task, task_id, &student, description)
    }

    pub fn submit_project(
        &mut self,
        student_id: &str,
        project_id: &str,
        description: &str,
    ) -> LedgerResult<Submission> {
        let student = self.load_student(student_id)?;
        let project: Project = self.records.require(Collection::Projects, project_id)?;
        let audience =
            Audience::from_fields(project.group_id.as_deref(), project.assigned_students.as_deref());
        self.check_open_for(AssignmentKind::Project, project_id, project.status, audience, &student)?;
        self.submit_work(AssignmentKind::Project, project_id, &student, description)
    }

    /// Grades a pending submission. A reward of zero rejects it; a positive
    /// reward is credited in the same batch as the status change.
    fn grade_work(
        &mut self,
        kind: AssignmentKind,
        submission_id: &str,
        reward: Option<i64>,
        feedback: Option<&str>,
        graded_by: &str,
    ) -> LedgerResult<Submission> {
        let mut submission: Submission = self.records.require(kind.submissions(), submission_id)?;
        if submission.status != SubmissionStatus::Pending {
            return Err(LedgerError::invalid_state(format!(
                "submission {} is already graded",
                submission_id
            )));
        }
        let (assignment_title, default_reward) = match kind {
            AssignmentKind::Project => {
                let id = submission.project_id.clone().unwrap_or_default();
                self.records
                    .find::<Project>(Collection::Projects, &id)?
                    .map(|p| (p.title, p.reward))
                    .unzip()
            }
            _ => {
                let id = submission.task_id.clone().unwrap_or_default();
                self.records
                    .find::<Task>(Collection::Tasks, &id)?
                    .map(|t| (t.title, t.reward))
                    .unzip()
            }
        };
        let Some(final_reward) = reward.or(default_reward) else {
            return Err(LedgerError::validation(
                "reward is required when the assignment no longer exists",
            ));
        };
        if final_reward < 0 {
            return Err(LedgerError::validation("reward must be >= 0"));
        }

        let status = if final_reward > 0 {
            SubmissionStatus::Approved
        } else {
            SubmissionStatus::Rejected
        };
        let now = Utc::now();
        let feedback = feedback.map(str::trim).filter(|f| !f.is_empty()).map(str::to_string);

        let path = kind.submissions().doc(submission_id);
        let mut batch = Batch::new();
        batch.expect(path.child("status"), json!("pending"));
        let mut partial = Map::new();
        partial.insert("status".into(), to_document(&status)?);
        partial.insert("reward".into(), json!(final_reward));
        partial.insert("feedback".into(), json!(feedback));
        partial.insert("gradedAt".into(), json!(now));
        partial.insert("gradedBy".into(), json!(graded_by));
        batch.update(path, partial);

        let title = assignment_title.unwrap_or_else(|| kind.label().to_string());
        if final_reward > 0 {
            let entry = CoinEntry::new(
                TransactionType::Earning,
                final_reward,
                format!("Reward for {}: {}", kind.label(), title),
            )
            .related(submission_id);
            self.stage_coin_changes(&mut batch, &submission.student_id, &[entry])?;
        }
        self.records.commit(&batch)?;
        tracing::info!(
            kind = kind.label(),
            submission = submission_id,
            reward = final_reward,
            "submission graded"
        );

        let message = match (&status, &feedback) {
            (SubmissionStatus::Approved, _) => {
                format!("Your {} \"{}\" was approved: +{} coins", kind.label(), title, final_reward)
            }
            (_, Some(f)) => format!("Your {} \"{}\" was rejected: {}", kind.label(), title, f),
            (_, None) => format!("Your {} \"{}\" was rejected", kind.label(), title),
        };
        let heading = if status == SubmissionStatus::Approved {
            "Submission approved"
        } else {
            "Submission rejected"
        };
        self.notify(&submission.student_id, "grade", heading, &message, Priority::Normal);

        submission.status = status;
        submission.reward = Some(final_reward);
        submission.feedback = feedback;
        submission.graded_at = Some(now);
        submission.graded_by = Some(graded_by.to_string());
        Ok(submission)
    }

    pub fn grade_submission(
        &mut self,
        submission_id: &str,
        reward: Option<i64>,
        feedback: Option<&str>,
        graded_by: &str,
    ) -> LedgerResult<Submission> {
        self.grade_work(AssignmentKind::Task, submission_id, reward, feedback, graded_by)
    }

    pub fn grade_project_submission(
        &mut self,
        submission_id: &str,
        reward: Option<i64>,
        feedback: Option<&str>,
        graded_by: &str,
    ) -> LedgerResult<Submission> {
        self.grade_work(AssignmentKind::Project, submission_id, reward, feedback, graded_by)
    }

    /// Scores the answers immediately; the result and any reward are
    /// committed together. One result per (test, student).
    pub fn submit_test(
        &mut self,
        student_id: &str,
        test_id: &str,
        answers: &[Option<usize>],
    ) -> LedgerResult<TestResult> {
        let student = self.load_student(student_id)?;
        let test: Test = self.records.require(Collection::Tests, test_id)?;
        let audience = Audience::from_fields(test.group_id.as_deref(), test.assigned_students.as_deref());
        self.check_open_for(AssignmentKind::Test, test_id, test.status, audience, &student)?;
        if answers.len() > test.questions.len() {
            return Err(LedgerError::validation(format!(
                "test has {} questions, got {} answers",
                test.questions.len(),
                answers.len()
            )));
        }

        let results: Vec<QuestionResult> = test
            .questions
            .iter()
            .enumerate()
            .map(|(i, q)| {
                let user_answer = answers.get(i).copied().flatten();
                QuestionResult {
                    question_index: i,
                    user_answer,
                    correct_answer: q.correct_answer,
                    is_correct: user_answer == Some(q.correct_answer),
                }
            })
            .collect();
        let correct = results.iter().filter(|r| r.is_correct).count();
        let score = score_percent(correct, test.questions.len());
        let reward = test_reward(score, self.policy.test_pass_score);

        let result = TestResult {
            id: format!("{}_{}", test_id, student_id),
            test_id: test_id.to_string(),
            student_id: student_id.to_string(),
            answers: results.iter().map(|r| r.user_answer).collect(),
            results,
            score,
            reward,
            submitted_at: Utc::now(),
        };
        let path = Collection::TestResults.doc(&result.id);
        if self.records.get_data(&path)?.is_some() {
            return Err(LedgerError::invalid_state(format!("test {} was already taken", test_id)));
        }
        let mut batch = Batch::new();
        batch.expect(path.clone(), Value::Null);
        batch.set(path, to_document(&result)?);
        if reward > 0 {
            let entry = CoinEntry::new(
                TransactionType::Earning,
                reward,
                format!("Test reward: {} ({}%)", test.title, score),
            )
            .related(&result.id);
            self.stage_coin_changes(&mut batch, student_id, &[entry])?;
        }
        self.records.commit(&batch)?;
        tracing::info!(test = test_id, student = student_id, score, reward, "test scored");

        let message = if reward > 0 {
            format!("You scored {}% on \"{}\" and earned {} coins", score, test.title, reward)
        } else {
            format!("You scored {}% on \"{}\"", score, test.title)
        };
        self.notify(student_id, "test", "Test result", &message, Priority::Normal);
        Ok(result)
    }

    pub fn list_submissions(
        &mut self,
        kind: AssignmentKind,
        student_id: Option<&str>,
    ) -> LedgerResult<Vec<Submission>> {
        let mut subs: Vec<Submission> = self
            .records
            .list::<Submission>(kind.submissions())?
            .into_iter()
            .filter(|s| student_id.map_or(true, |id| s.student_id == id))
            .collect();
        subs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(subs)
    }

    pub fn list_test_results(&mut self, student_id: Option<&str>) -> LedgerResult<Vec<TestResult>> {
        let mut results: Vec<TestResult> = self
            .records
            .list::<TestResult>(Collection::TestResults)?
            .into_iter()
            .filter(|r| student_id.map_or(true, |id| r.student_id == id))
            .collect();
        results.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(results)
    }
}
