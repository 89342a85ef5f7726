//! Document schemas for every collection in the ledger tree.
//!
//! Documents are camelCase JSON. Optional fields are explicit `Option`s and
//! every status is a closed enum, so a document that does not match its
//! schema is rejected at the service boundary instead of flowing through as a
//! loosely shaped object.

use crate::store::StorePath;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Tasks,
    Tests,
    Projects,
    Submissions,
    TestResults,
    ProjectSubmissions,
    WithdrawalRequests,
    PaymentTransactions,
    MonthlyPayments,
    AttendanceRecords,
    AttendanceConfirmations,
    ChatMessages,
    Notifications,
    UserActivity,
    Referrals,
    Groups,
    Operations,
    Settings,
}

impl Collection {
    pub const ALL: [Collection; 19] = [
        Collection::Users,
        Collection::Tasks,
        Collection::Tests,
        Collection::Projects,
        Collection::Submissions,
        Collection::TestResults,
        Collection::ProjectSubmissions,
        Collection::WithdrawalRequests,
        Collection::PaymentTransactions,
        Collection::MonthlyPayments,
        Collection::AttendanceRecords,
        Collection::AttendanceConfirmations,
        Collection::ChatMessages,
        Collection::Notifications,
        Collection::UserActivity,
        Collection::Referrals,
        Collection::Groups,
        Collection::Operations,
        Collection::Settings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Tasks => "tasks",
            Collection::Tests => "tests",
            Collection::Projects => "projects",
            Collection::Submissions => "submissions",
            Collection::TestResults => "testResults",
            Collection::ProjectSubmissions => "projectSubmissions",
            Collection::WithdrawalRequests => "withdrawalRequests",
            Collection::PaymentTransactions => "paymentTransactions",
            Collection::MonthlyPayments => "monthlyPayments",
            Collection::AttendanceRecords => "attendanceRecords",
            Collection::AttendanceConfirmations => "attendanceConfirmations",
            Collection::ChatMessages => "chatMessages",
            Collection::Notifications => "notifications",
            Collection::UserActivity => "userActivity",
            Collection::Referrals => "referrals",
            Collection::Groups => "groups",
            Collection::Operations => "operations",
            Collection::Settings => "settings",
        }
    }

    pub fn path(self) -> StorePath {
        StorePath::root(self.as_str())
    }

    pub fn doc(self, id: &str) -> StorePath {
        self.path().child(id)
    }
}

/// Root value listing attendance dates that can no longer be changed.
pub const LOCKED_ATTENDANCE_DATES: &str = "lockedAttendanceDates";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Student,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Partial,
    #[default]
    Unpaid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<String>,
    #[serde(default)]
    pub rating: i64,
    #[serde(default)]
    pub referral_code: Option<String>,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub can_withdraw: bool,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub current_payment_id: Option<String>,
    #[serde(default)]
    pub payment_amount: Option<i64>,
    #[serde(default)]
    pub payment_description: Option<String>,
    #[serde(default)]
    pub payment_due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_payment_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub join_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    /// Plaintext credential found in documents written by older clients.
    /// Replaced by `password_hash` on the first successful login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl User {
    pub fn is_student(&self) -> bool {
        self.role == Role::Student
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    #[default]
    Active,
    Inactive,
}

/// Who an assignment targets. An explicit, non-empty student list wins over
/// a group; neither means every student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    All,
    Group(String),
    Students(Vec<String>),
}

impl Audience {
    pub fn from_fields(group_id: Option<&str>, assigned: Option<&[String]>) -> Self {
        match (assigned, group_id) {
            (Some(list), _) if !list.is_empty() => Audience::Students(list.to_vec()),
            (_, Some(g)) if !g.is_empty() => Audience::Group(g.to_string()),
            _ => Audience::All,
        }
    }

    pub fn includes(&self, user: &User) -> bool {
        if !user.is_student() {
            return false;
        }
        match self {
            Audience::All => true,
            Audience::Group(g) => user.group_id.as_deref() == Some(g.as_str()),
            Audience::Students(ids) => ids.iter().any(|id| id == &user.id),
        }
    }

    pub fn group_id(&self) -> Option<String> {
        match self {
            Audience::Group(g) => Some(g.clone()),
            _ => None,
        }
    }

    pub fn assigned_students(&self) -> Option<Vec<String>> {
        match self {
            Audience::Students(ids) => Some(ids.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reward: i64,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub assigned_students: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default)]
    pub status: AssignmentStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub text: String,
    pub options: Vec<String>,
    pub correct_answer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub time_limit: i64,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub assigned_students: Option<Vec<String>>,
    #[serde(default)]
    pub status: AssignmentStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, alias = "payment")]
    pub reward: i64,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub assigned_students: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default)]
    pub status: AssignmentStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

/// A task or project submission; exactly one of `task_id` / `project_id`
/// is set depending on the collection it lives in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub student_id: String,
    #[serde(default)]
    pub description: String,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub reward: Option<i64>,
    #[serde(default)]
    pub feedback: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub graded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graded_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
    pub question_index: usize,
    pub user_answer: Option<usize>,
    pub correct_answer: usize,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub id: String,
    pub test_id: String,
    pub student_id: String,
    pub answers: Vec<Option<usize>>,
    pub results: Vec<QuestionResult>,
    pub score: i64,
    pub reward: i64,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Earning,
    Fine,
    Payment,
    Withdrawal,
    Adjustment,
}

impl TransactionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "earning" => Some(Self::Earning),
            "fine" => Some(Self::Fine),
            "payment" => Some(Self::Payment),
            "withdrawal" => Some(Self::Withdrawal),
            "adjustment" => Some(Self::Adjustment),
            _ => None,
        }
    }
}

/// Append-only record of one coin balance change. `amount` is signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTransaction {
    pub id: String,
    pub student_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount: i64,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    Pending,
    Partial,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Coins,
    Cash,
}

/// Monthly dues for one student. Amounts are in so'm.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPayment {
    pub id: String,
    pub student_id: String,
    pub amount: i64,
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub status: PaymentState,
    #[serde(default)]
    pub paid_amount: i64,
    #[serde(default)]
    pub remaining_amount: Option<i64>,
    #[serde(default)]
    pub coins_used: i64,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
}

impl MonthlyPayment {
    pub fn remaining(&self) -> i64 {
        (self.amount - self.paid_amount).max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub coins: i64,
    pub amount: i64,
    pub card_number: String,
    pub method: String,
    pub status: WithdrawalStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Referral {
    pub id: String,
    pub referrer_id: String,
    pub referrer_name: String,
    pub new_user_id: String,
    pub new_user_name: String,
    pub new_user_email: String,
    pub referral_code: String,
    pub status: ReferralStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub student_ids: Vec<String>,
    #[serde(default)]
    pub student_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub read: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: String,
    pub user_id: String,
    pub action: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            "late" => Some(Self::Late),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub fine_amount: i64,
    pub recorded_by: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceConfirmation {
    pub id: String,
    pub date: NaiveDate,
    pub confirmed_by: String,
    pub confirmed_at: DateTime<Utc>,
    pub records_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}
