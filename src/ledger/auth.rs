use super::Ledger;
use crate::error::{LedgerError, LedgerResult};
use crate::model::{Collection, Group, PaymentStatus, Referral, ReferralStatus, Role, User};
use crate::policy::LedgerPolicy;
use crate::records::{new_id, to_document};
use crate::store::Batch;
use chrono::Utc;
use rand::Rng;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

const HASH_SCHEME: &str = "sha256";
const HASH_ROUNDS: usize = 4096;
const SALT_LEN: usize = 16;
const REFERRAL_SUFFIX_LEN: usize = 6;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Administrator account created in an empty workspace.
#[derive(Debug, Clone)]
pub struct SeedAdmin {
    pub email: String,
    pub password: String,
    pub name: String,
}

impl Default for SeedAdmin {
    fn default() -> Self {
        Self {
            email: "admin@ledger.local".to_string(),
            password: "admin123".to_string(),
            name: "Administrator".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub telegram: Option<String>,
    pub referral_code: Option<String>,
}

/// User document as shown to clients: credentials stripped, balance in so'm
/// added.
pub fn public_user(user: &User, policy: &LedgerPolicy) -> Value {
    let mut doc = serde_json::to_value(user).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut doc {
        map.remove("passwordHash");
        map.remove("password");
        map.insert("balance".to_string(), json!(policy.value_of(user.rating)));
    }
    doc
}

pub(crate) fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill(&mut salt);
    format!(
        "{}${}${}",
        HASH_SCHEME,
        hex::encode(salt),
        hex::encode(stretch(&salt, password))
    )
}

pub(crate) fn verify_password(stored: &str, password: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(scheme), Some(salt), Some(digest)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if scheme != HASH_SCHEME {
        return false;
    }
    let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(digest)) else {
        return false;
    };
    constant_time_eq(&stretch(&salt, password), &expected)
}

fn stretch(salt: &[u8], password: &str) -> Vec<u8> {
    let mut acc = Sha256::new()
        .chain_update(salt)
        .chain_update(password.as_bytes())
        .finalize()
        .to_vec();
    for _ in 1..HASH_ROUNDS {
        acc = Sha256::new()
            .chain_update(&acc)
            .chain_update(salt)
            .finalize()
            .to_vec();
    }
    acc
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

/// First three characters of the name followed by six base-36 characters,
/// all uppercased.
pub(crate) fn generate_referral_code(name: &str) -> String {
    let mut rng = rand::rng();
    let prefix: String = name.trim().chars().take(3).collect();
    let suffix: String = (0..REFERRAL_SUFFIX_LEN)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();
    format!("{}{}", prefix, suffix).to_uppercase()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl Ledger {
    pub(crate) fn seed_admin(&mut self, seed: &SeedAdmin) -> LedgerResult<()> {
        if !self.records.get_array_data(&Collection::Users.path())?.is_empty() {
            return Ok(());
        }
        if seed.password.is_empty() {
            return Err(LedgerError::validation("seed admin password must not be empty"));
        }
        let id = new_id();
        let admin = User {
            id: id.clone(),
            name: seed.name.clone(),
            email: normalize_email(&seed.email),
            role: Role::Admin,
            telegram: None,
            rating: 0,
            referral_code: None,
            payment_status: PaymentStatus::Paid,
            can_withdraw: false,
            group_id: None,
            current_payment_id: None,
            payment_amount: None,
            payment_description: None,
            payment_due_date: None,
            last_payment_date: None,
            join_date: Some(Utc::now()),
            updated_at: None,
            password_hash: Some(hash_password(&seed.password)),
            password: None,
        };
        self.records
            .save_data(&Collection::Users.doc(&id), to_document(&admin)?)?;
        tracing::info!(email = %admin.email, "seeded administrator account");
        Ok(())
    }

    /// Returns the signed-in user, or `None` for unknown email or wrong
    /// password.
    pub fn authenticate_user(&mut self, email: &str, password: &str) -> LedgerResult<Option<User>> {
        let email = normalize_email(email);
        let users: Vec<User> = self.records.list(Collection::Users)?;
        let Some(mut user) = users.into_iter().find(|u| normalize_email(&u.email) == email) else {
            return Ok(None);
        };

        let verified = if let Some(hash) = user.password_hash.as_deref() {
            verify_password(hash, password)
        } else if user
            .password
            .as_deref()
            .is_some_and(|plain| constant_time_eq(plain.as_bytes(), password.as_bytes()))
        {
            let hash = hash_password(password);
            let mut partial = Map::new();
            partial.insert("passwordHash".into(), json!(hash));
            partial.insert("password".into(), Value::Null);
            self.records
                .update_in_array(Collection::Users, &user.id, partial)?;
            tracing::info!(user = %user.id, "upgraded plaintext credential");
            user.password_hash = Some(hash);
            user.password = None;
            true
        } else {
            false
        };
        if !verified {
            tracing::debug!(email = %email, "login rejected");
            return Ok(None);
        }

        self.log_activity(&user.id, "login", &format!("{} signed in", user.name));
        Ok(Some(user))
    }

    pub(crate) fn check_password(&self, user: &User, password: &str) -> LedgerResult<()> {
        let ok = match (&user.password_hash, &user.password) {
            (Some(hash), _) => verify_password(hash, password),
            (None, Some(plain)) => constant_time_eq(plain.as_bytes(), password.as_bytes()),
            (None, None) => false,
        };
        if ok {
            Ok(())
        } else {
            Err(LedgerError::WrongPassword)
        }
    }

    pub fn register_user(&mut self, reg: Registration) -> LedgerResult<User> {
        let name = reg.name.trim().to_string();
        let email = normalize_email(&reg.email);
        if name.is_empty() {
            return Err(LedgerError::validation("name is required"));
        }
        if email.is_empty() || !email.contains('@') {
            return Err(LedgerError::validation("a valid email is required"));
        }
        if reg.password.chars().count() < self.policy.min_password_length {
            return Err(LedgerError::validation(format!(
                "password must be at least {} characters",
                self.policy.min_password_length
            )));
        }

        let users: Vec<User> = self.records.list(Collection::Users)?;
        if users.iter().any(|u| normalize_email(&u.email) == email) {
            return Err(LedgerError::DuplicateEmail);
        }

        let mut code = generate_referral_code(&name);
        while users
            .iter()
            .any(|u| u.referral_code.as_deref() == Some(code.as_str()))
        {
            code = generate_referral_code(&name);
        }

        let supplied = reg
            .referral_code
            .as_deref()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty());
        let referrer = supplied.as_deref().and_then(|c| {
            users
                .iter()
                .find(|u| u.is_student() && u.referral_code.as_deref() == Some(c))
        });

        let now = Utc::now();
        let user = User {
            id: new_id(),
            name,
            email,
            role: Role::Student,
            telegram: reg.telegram.filter(|t| !t.trim().is_empty()),
            rating: 0,
            referral_code: Some(code),
            payment_status: PaymentStatus::Unpaid,
            can_withdraw: false,
            group_id: None,
            current_payment_id: None,
            payment_amount: None,
            payment_description: None,
            payment_due_date: None,
            last_payment_date: None,
            join_date: Some(now),
            updated_at: None,
            password_hash: Some(hash_password(&reg.password)),
            password: None,
        };

        let mut batch = Batch::new();
        let user_path = Collection::Users.doc(&user.id);
        batch.expect(user_path.clone(), Value::Null);
        batch.set(user_path, to_document(&user)?);
        let referral = referrer.map(|r| Referral {
            id: new_id(),
            referrer_id: r.id.clone(),
            referrer_name: r.name.clone(),
            new_user_id: user.id.clone(),
            new_user_name: user.name.clone(),
            new_user_email: user.email.clone(),
            referral_code: r.referral_code.clone().unwrap_or_default(),
            status: ReferralStatus::Pending,
            requested_at: now,
            approved_at: None,
            rejected_at: None,
            rejection_reason: None,
        });
        if let Some(r) = &referral {
            batch.set(Collection::Referrals.doc(&r.id), to_document(r)?);
        }
        self.records.commit(&batch)?;

        tracing::info!(user = %user.id, referred = referral.is_some(), "registered student");
        self.log_activity(&user.id, "register", &format!("{} registered", user.name));
        Ok(user)
    }

    pub fn list_students(&mut self) -> LedgerResult<Vec<User>> {
        let users: Vec<User> = self.records.list(Collection::Users)?;
        Ok(users.into_iter().filter(User::is_student).collect())
    }

    pub fn update_student_name(&mut self, student_id: &str, name: &str) -> LedgerResult<User> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::validation("name is required"));
        }
        let mut student = self.load_student(student_id)?;
        let now = Utc::now();
        let mut partial = Map::new();
        partial.insert("name".into(), json!(name));
        partial.insert("updatedAt".into(), json!(now));
        self.records
            .update_in_array(Collection::Users, student_id, partial)?;
        student.name = name.to_string();
        student.updated_at = Some(now);
        Ok(student)
    }

    /// Deletes the student and detaches them from their group.
    pub fn remove_student(&mut self, student_id: &str) -> LedgerResult<()> {
        let student = self.load_student(student_id)?;
        let mut batch = Batch::new();
        batch.remove(Collection::Users.doc(student_id));
        if let Some(group_id) = &student.group_id {
            if let Some(group) = self.records.find::<Group>(Collection::Groups, group_id)? {
                self.stage_membership(&mut batch, &group, &[], &[student_id.to_string()])?;
            }
        }
        self.records.commit(&batch)?;
        tracing::info!(student = student_id, "removed student");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    fn reg(name: &str, email: &str, code: Option<&str>) -> Registration {
        Registration {
            name: name.to_string(),
            email: email.to_string(),
            password: "hunter22".to_string(),
            telegram: None,
            referral_code: code.map(str::to_string),
        }
    }

    #[test]
    fn hashes_are_salted_and_verifiable() {
        let a = hash_password("hunter22");
        let b = hash_password("hunter22");
        assert_ne!(a, b);
        assert!(a.starts_with("sha256$"));
        assert!(verify_password(&a, "hunter22"));
        assert!(!verify_password(&a, "hunter23"));
        assert!(!verify_password("garbage", "hunter22"));
    }

    #[test]
    fn referral_code_shape() {
        let code = generate_referral_code("aziza");
        assert_eq!(code.len(), 9);
        assert!(code.starts_with("AZI"));
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert!(generate_referral_code("Al").starts_with("AL"));
    }

    #[test]
    fn registration_defaults_and_duplicate_email() {
        let mut l = ledger();
        let u = l.register_user(reg("Aziza", " Aziza@Example.com ", None)).expect("register");
        assert_eq!(u.email, "aziza@example.com");
        assert_eq!(u.rating, 0);
        assert_eq!(u.payment_status, PaymentStatus::Unpaid);
        assert!(!u.can_withdraw);
        assert!(u.password.is_none());

        let dup = l.register_user(reg("Other", "AZIZA@example.com", None));
        assert!(matches!(dup, Err(LedgerError::DuplicateEmail)));

        let mut short = reg("Bo", "bo@example.com", None);
        short.password = "123".to_string();
        assert!(matches!(l.register_user(short), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn referral_created_only_for_student_codes() {
        let mut l = ledger();
        let a = l.register_user(reg("Aziza", "a@example.com", None)).expect("a");
        let code = a.referral_code.clone().expect("code").to_lowercase();
        let b = l.register_user(reg("Bek", "b@example.com", Some(&code))).expect("b");
        l.register_user(reg("Cim", "c@example.com", Some("NOPE123"))).expect("c");

        let referrals: Vec<Referral> = l.records().list(Collection::Referrals).expect("list");
        assert_eq!(referrals.len(), 1);
        assert_eq!(referrals[0].referrer_id, a.id);
        assert_eq!(referrals[0].new_user_id, b.id);
        assert_eq!(referrals[0].status, ReferralStatus::Pending);
        assert_eq!(rating(&mut l, &a.id), 0);
    }

    #[test]
    fn login_checks_hash_and_upgrades_plaintext() {
        let mut l = ledger();
        let u = l.register_user(reg("Aziza", "a@example.com", None)).expect("a");
        assert!(l.authenticate_user("A@EXAMPLE.COM", "hunter22").expect("login").is_some());
        assert!(l.authenticate_user("a@example.com", "wrong").expect("login").is_none());
        assert!(l.authenticate_user("x@example.com", "hunter22").expect("login").is_none());

        l.records()
            .save_data(
                &Collection::Users.doc("legacy"),
                json!({ "id": "legacy", "name": "Old", "email": "old@example.com",
                        "role": "student", "password": "plain1" }),
            )
            .expect("legacy");
        let old = l.authenticate_user("old@example.com", "plain1").expect("login").expect("user");
        assert!(old.password_hash.is_some());
        let stored = l.load_user("legacy").expect("stored");
        assert!(stored.password.is_none());
        assert!(verify_password(stored.password_hash.as_deref().expect("hash"), "plain1"));

        let activity = l.records().get_array_data(&Collection::UserActivity.path()).expect("activity");
        assert!(activity.iter().any(|a| a["userId"] == u.id.as_str() && a["action"] == "login"));
    }

    #[test]
    fn public_view_hides_credentials() {
        let mut l = ledger();
        let id = student(&mut l, "Dilshod", 42);
        let user = l.load_user(&id).expect("user");
        let view = public_user(&user, l.policy());
        assert!(view.get("passwordHash").is_none());
        assert_eq!(view["balance"], 420);
    }

    #[test]
    fn public_view_leaves_unrepresentable_balance_empty() {
        let mut l = ledger();
        let id = student(&mut l, "Dilshod", i64::MAX);
        let user = l.load_user(&id).expect("user");
        let view = public_user(&user, l.policy());
        assert!(view["balance"].is_null());
        assert_eq!(view["rating"], i64::MAX);
    }

    #[test]
    fn seeding_happens_once() {
        let mut l = ledger();
        l.seed_admin(&SeedAdmin::default()).expect("reseed");
        let admins = l
            .records()
            .list::<User>(Collection::Users)
            .expect("users")
            .into_iter()
            .filter(|u| u.role == Role::Admin)
            .count();
        assert_eq!(admins, 1);
        assert!(l.authenticate_user("admin@ledger.local", "admin123").expect("login").is_some());
    }
}
