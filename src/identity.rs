//! Identity & trial gate: resolves who is active, validates credentials
//! and computes trial validity from the registration/trial timestamps.
//!
//! Passwords are stored as salted argon2id hashes; nothing reversible
//! ever reaches the registry.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

use crate::logging;
use crate::store::{AuthState, LocalStore, StoreError, UserProfile, UserRecord, UserScope};

pub const TRIAL_DAYS: i64 = 7;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

// Sentinel the UI shows for accounts without a trial window.
const NO_TRIAL_DAYS_LEFT: i64 = 999;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("unknown user")]
    NotFound,
    #[error("wrong password")]
    InvalidCredential,
    #[error("this email is already registered")]
    AlreadyExists,
    #[error("the 7-day trial has expired")]
    TrialExpired,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialStatus {
    pub is_valid: bool,
    pub is_expired: bool,
    pub days_left: i64,
}

impl TrialStatus {
    fn not_applicable() -> Self {
        Self {
            is_valid: true,
            is_expired: false,
            days_left: NO_TRIAL_DAYS_LEFT,
        }
    }
}

/// Trial validity is a pure function of (now, trial start). Expired when
/// at least seven full days have elapsed; days_left never goes negative.
pub fn trial_status_at(now_ms: i64, profile: &UserProfile) -> TrialStatus {
    if !profile.is_trial {
        return TrialStatus::not_applicable();
    }

    let start = profile.trial_start_date.unwrap_or(profile.registration_date);
    let elapsed = now_ms - start;
    let days_passed = elapsed.div_euclid(DAY_MS);
    let is_expired = elapsed >= TRIAL_DAYS * DAY_MS;

    TrialStatus {
        is_valid: !is_expired,
        is_expired,
        days_left: (TRIAL_DAYS - days_passed).max(0),
    }
}

/// The resolved authenticated state callers carry around: the storage
/// scope, the profile and the trial window at resolution time.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub scope: UserScope,
    pub profile: UserProfile,
    pub trial: TrialStatus,
}

pub struct IdentityGate {
    store: Arc<LocalStore>,
}

impl IdentityGate {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Reads the active-user pointer and rebuilds the session. None means
    /// the caller must route to the unauthenticated flow.
    pub fn resolve_active_user(&self) -> Option<ActiveSession> {
        let email = self.store.get_active_user_email()?;
        let record = self.store.get_user_record(&email)?;
        let trial = trial_status_at(Utc::now().timestamp_millis(), &record.profile);
        Some(ActiveSession {
            scope: UserScope::for_email(&email),
            profile: record.profile,
            trial,
        })
    }

    pub fn login(&self, email: &str, password: &str) -> Result<ActiveSession, IdentityError> {
        let record = self
            .store
            .get_user_record(email)
            .ok_or(IdentityError::NotFound)?;

        let hash = record
            .auth
            .password_hash
            .as_deref()
            .ok_or(IdentityError::InvalidCredential)?;
        if !verify_password(password, hash) {
            logging::log_identity(None, "Login rejected: wrong password");
            return Err(IdentityError::InvalidCredential);
        }

        // An expired trial blocks login entirely; the caller routes to the
        // expired screen. The active pointer is left untouched.
        let trial = trial_status_at(Utc::now().timestamp_millis(), &record.profile);
        if trial.is_expired {
            logging::log_identity(None, "Login rejected: trial expired");
            return Err(IdentityError::TrialExpired);
        }

        self.store.set_active_user(email)?;
        let scope = UserScope::for_email(email);
        logging::log_identity(Some(scope.tag()), "Login succeeded");

        Ok(ActiveSession {
            scope,
            profile: record.profile,
            trial,
        })
    }

    pub fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
        company_name: Option<&str>,
    ) -> Result<ActiveSession, IdentityError> {
        validate_registration(email, password, name)?;

        if self.store.get_user_record(email).is_some() {
            return Err(IdentityError::AlreadyExists);
        }

        let now = Utc::now().timestamp_millis();
        let profile = UserProfile {
            name: name.to_string(),
            company_name: company_name
                .filter(|c| !c.trim().is_empty())
                .unwrap_or("Independent Professional")
                .to_string(),
            email: Some(email.to_string()),
            registration_date: now,
            is_trial: false,
            trial_start_date: None,
        };
        let auth = AuthState {
            is_configured: true,
            email: Some(email.to_string()),
            password_hash: Some(hash_password(password)?),
        };

        self.store.save_user_record(
            email,
            UserRecord {
                profile: profile.clone(),
                auth,
            },
        )?;
        self.store.set_active_user(email)?;

        let scope = UserScope::for_email(email);
        logging::log_identity(Some(scope.tag()), "Registered new account");

        Ok(ActiveSession {
            scope,
            profile,
            trial: TrialStatus::not_applicable(),
        })
    }

    /// Creates and activates a throwaway 7-day trial identity. Trial
    /// identities carry no password and cannot be logged back into.
    pub fn start_trial(&self) -> Result<ActiveSession, IdentityError> {
        let now = Utc::now().timestamp_millis();
        let email = format!("trial_{}_{:06}@braik.temp", now, rand::random::<u32>() % 1_000_000);

        let profile = UserProfile {
            name: "Trial User".to_string(),
            company_name: "Demo Company".to_string(),
            email: Some(email.clone()),
            registration_date: now,
            is_trial: true,
            trial_start_date: Some(now),
        };
        let auth = AuthState {
            is_configured: true,
            email: Some(email.clone()),
            password_hash: None,
        };

        self.store.save_user_record(
            &email,
            UserRecord {
                profile: profile.clone(),
                auth,
            },
        )?;
        self.store.set_active_user(&email)?;

        let scope = UserScope::for_email(&email);
        logging::log_identity(Some(scope.tag()), "Trial identity created");
        let trial = trial_status_at(now, &profile);

        Ok(ActiveSession {
            scope,
            profile,
            trial,
        })
    }

    /// Trial window for the active user. Without an active user there is
    /// nothing to validate.
    pub fn check_trial_status(&self) -> TrialStatus {
        match self.store.get_active_user_email() {
            Some(email) => match self.store.get_user_record(&email) {
                Some(record) => trial_status_at(Utc::now().timestamp_millis(), &record.profile),
                None => TrialStatus {
                    is_valid: false,
                    is_expired: false,
                    days_left: 0,
                },
            },
            None => TrialStatus {
                is_valid: false,
                is_expired: false,
                days_left: 0,
            },
        }
    }

    /// Clears the active pointer only; every collection stays on disk.
    pub fn logout(&self) -> Result<(), IdentityError> {
        self.store.clear_active_user()?;
        logging::log_identity(None, "Logged out");
        Ok(())
    }

    pub fn update_profile(
        &self,
        session: &ActiveSession,
        name: &str,
        company_name: &str,
    ) -> Result<UserProfile, IdentityError> {
        let email = session
            .scope
            .email()
            .ok_or_else(|| IdentityError::Validation("guest profile is not persisted".into()))?;
        let mut record = self
            .store
            .get_user_record(email)
            .ok_or(IdentityError::NotFound)?;
        record.profile.name = name.to_string();
        record.profile.company_name = company_name.to_string();
        let profile = record.profile.clone();
        self.store.save_user_record(email, record)?;
        Ok(profile)
    }
}

fn validate_registration(email: &str, password: &str, name: &str) -> Result<(), IdentityError> {
    if email.trim().is_empty() || password.is_empty() || name.trim().is_empty() {
        return Err(IdentityError::Validation("fill in all fields".into()));
    }
    let (local, domain) = email.split_once('@').unwrap_or(("", ""));
    if local.is_empty() || !domain.contains('.') {
        return Err(IdentityError::Validation("enter a valid email".into()));
    }
    Ok(())
}

fn hash_password(password: &str) -> Result<String, IdentityError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| IdentityError::Validation(format!("credential hashing failed: {}", e)))
}

fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn gate() -> (IdentityGate, Arc<LocalStore>) {
        let store = Arc::new(LocalStore::new(Arc::new(MemoryStore::new())));
        (IdentityGate::new(store.clone()), store)
    }

    fn trial_profile(start_ms: i64) -> UserProfile {
        UserProfile {
            name: "t".to_string(),
            company_name: "c".to_string(),
            email: Some("t@braik.temp".to_string()),
            registration_date: start_ms,
            is_trial: true,
            trial_start_date: Some(start_ms),
        }
    }

    #[test]
    fn trial_three_days_in_is_valid_with_four_days_left() {
        let now = 1_700_000_000_000;
        let status = trial_status_at(now, &trial_profile(now - 3 * DAY_MS));
        assert!(status.is_valid);
        assert!(!status.is_expired);
        assert_eq!(status.days_left, 4);
    }

    #[test]
    fn trial_eight_days_in_is_expired_with_zero_days_left() {
        let now = 1_700_000_000_000;
        let status = trial_status_at(now, &trial_profile(now - 8 * DAY_MS));
        assert!(!status.is_valid);
        assert!(status.is_expired);
        assert_eq!(status.days_left, 0);
    }

    #[test]
    fn trial_expires_exactly_at_seven_days() {
        let now = 1_700_000_000_000;
        assert!(trial_status_at(now, &trial_profile(now - 7 * DAY_MS + 1)).is_valid);
        assert!(trial_status_at(now, &trial_profile(now - 7 * DAY_MS)).is_expired);
    }

    #[test]
    fn non_trial_profiles_are_always_valid() {
        let now = 1_700_000_000_000;
        let mut profile = trial_profile(now - 100 * DAY_MS);
        profile.is_trial = false;
        let status = trial_status_at(now, &profile);
        assert!(status.is_valid);
        assert_eq!(status.days_left, NO_TRIAL_DAYS_LEFT);
    }

    #[test]
    fn register_then_login_roundtrip() {
        let (gate, store) = gate();
        gate.register("alice@x.com", "pw123456", "Alice", Some("Acme"))
            .unwrap();
        assert_eq!(store.get_active_user_email().as_deref(), Some("alice@x.com"));

        gate.logout().unwrap();
        assert!(store.get_active_user_email().is_none());

        let session = gate.login("alice@x.com", "pw123456").unwrap();
        assert_eq!(session.profile.name, "Alice");
        assert_eq!(store.get_active_user_email().as_deref(), Some("alice@x.com"));
    }

    #[test]
    fn wrong_password_fails_without_changing_active_user() {
        let (gate, store) = gate();
        gate.register("alice@x.com", "pw123456", "Alice", None).unwrap();
        gate.logout().unwrap();

        let err = gate.login("alice@x.com", "nope").unwrap_err();
        assert!(matches!(err, IdentityError::InvalidCredential));
        assert!(store.get_active_user_email().is_none());
    }

    #[test]
    fn unknown_user_fails_with_not_found() {
        let (gate, _) = gate();
        assert!(matches!(
            gate.login("ghost@x.com", "pw"),
            Err(IdentityError::NotFound)
        ));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let (gate, _) = gate();
        gate.register("alice@x.com", "pw123456", "Alice", None).unwrap();
        assert!(matches!(
            gate.register("alice@x.com", "other", "Alice 2", None),
            Err(IdentityError::AlreadyExists)
        ));
    }

    #[test]
    fn registration_validates_fields_locally() {
        let (gate, _) = gate();
        assert!(matches!(
            gate.register("", "pw", "A", None),
            Err(IdentityError::Validation(_))
        ));
        assert!(matches!(
            gate.register("not-an-email", "pw", "A", None),
            Err(IdentityError::Validation(_))
        ));
    }

    #[test]
    fn password_hash_is_salted_and_one_way() {
        let h1 = hash_password("pw123456").unwrap();
        let h2 = hash_password("pw123456").unwrap();
        assert_ne!(h1, h2);
        assert!(h1.starts_with("$argon2"));
        assert!(verify_password("pw123456", &h1));
        assert!(!verify_password("pw1234567", &h1));
    }

    #[test]
    fn trial_identity_is_created_and_activated() {
        let (gate, store) = gate();
        let session = gate.start_trial().unwrap();
        assert!(session.profile.is_trial);
        assert!(session.trial.is_valid);
        assert_eq!(session.trial.days_left, TRIAL_DAYS);

        let email = store.get_active_user_email().unwrap();
        assert!(email.starts_with("trial_"));
        assert!(email.ends_with("@braik.temp"));
        // No password is ever attached to a trial identity.
        let record = store.get_user_record(&email).unwrap();
        assert!(record.auth.password_hash.is_none());
    }

    #[test]
    fn expired_trial_blocks_login() {
        let (gate, store) = gate();
        // Register a normal account, then age it into an expired trial.
        gate.register("old@x.com", "pw123456", "Old", None).unwrap();
        let mut record = store.get_user_record("old@x.com").unwrap();
        record.profile.is_trial = true;
        record.profile.trial_start_date =
            Some(Utc::now().timestamp_millis() - 8 * DAY_MS);
        store.save_user_record("old@x.com", record).unwrap();
        gate.logout().unwrap();

        assert!(matches!(
            gate.login("old@x.com", "pw123456"),
            Err(IdentityError::TrialExpired)
        ));
        assert!(store.get_active_user_email().is_none());
    }
}
