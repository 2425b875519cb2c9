//! Access Policy Set (C9) — subject/database/operation authorization
//! evaluated by the Secure Dispatch Engine before every op (spec §4.6).
//!
//! A [`PolicySet`] is a flat union of [`Policy`] documents: access is
//! permitted if *any* policy in the set matches the subject, database, and
//! required [`Permission`] and the request falls within the policy's
//! optional IP allow-list and time window. There is no explicit-deny
//! override in this model — composing independently-authored allow rules
//! was judged a better fit than Vault-style glob capability paths for a
//! database-scoped policy (see DESIGN.md Open Question resolution).

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AccessPolicyError;

/// The canonical, closed set of permissions an operation can require (spec
/// §4.6 Open Question, resolved): every [`crate::connector::OpKind`] maps
/// onto exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    Read,
    Write,
    Delete,
    Schema,
    Admin,
}

impl Permission {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Schema => "schema",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subject identity presented at policy-evaluation time (spec §3
/// `Subject`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub groups: Vec<String>,
    pub source_ip: Option<IpAddr>,
}

/// A single allow rule (spec §3 `Policy`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    /// Glob pattern matched against [`Subject::id`] or any of its `groups`.
    pub subject_pattern: String,
    /// Glob pattern matched against the target database/connection id.
    pub database_pattern: String,
    pub permissions: Vec<Permission>,
    /// CIDR-less allow-list of exact source IPs; empty means "any".
    pub allowed_ips: Vec<IpAddr>,
    /// Optional activation window; `None` means "always active".
    pub active_from: Option<DateTime<Utc>>,
    pub active_until: Option<DateTime<Utc>>,
}

impl Policy {
    fn subject_matches(&self, subject: &Subject) -> bool {
        glob_match::glob_match(&self.subject_pattern, &subject.id)
            || subject
                .groups
                .iter()
                .any(|g| glob_match::glob_match(&self.subject_pattern, g))
    }

    fn database_matches(&self, database: &str) -> bool {
        glob_match::glob_match(&self.database_pattern, database)
    }

    fn ip_allowed(&self, subject: &Subject) -> bool {
        if self.allowed_ips.is_empty() {
            return true;
        }
        match subject.source_ip {
            Some(ip) => self.allowed_ips.contains(&ip),
            None => false,
        }
    }

    fn active_at(&self, now: DateTime<Utc>) -> bool {
        if let Some(from) = self.active_from {
            if now < from {
                return false;
            }
        }
        if let Some(until) = self.active_until {
            if now >= until {
                return false;
            }
        }
        true
    }

    fn grants(&self, subject: &Subject, database: &str, permission: Permission, now: DateTime<Utc>) -> bool {
        self.permissions.contains(&permission)
            && self.subject_matches(subject)
            && self.database_matches(database)
            && self.ip_allowed(subject)
            && self.active_at(now)
    }
}

/// A flat union of [`Policy`] documents, evaluated as "permit if any policy
/// grants it" (spec §4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySet {
    policies: Vec<Policy>,
}

impl PolicySet {
    #[must_use]
    pub fn new(policies: Vec<Policy>) -> Self {
        Self { policies }
    }

    pub fn add(&mut self, policy: Policy) {
        self.policies.push(policy);
    }

    pub fn remove(&mut self, name: &str) {
        self.policies.retain(|p| p.name != name);
    }

    #[must_use]
    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// Evaluate whether `subject` may perform `permission` against
    /// `database` at the current instant.
    ///
    /// # Errors
    ///
    /// Returns [`AccessPolicyError::Denied`] if no policy in the set grants
    /// the request.
    pub fn check(
        &self,
        subject: &Subject,
        database: &str,
        permission: Permission,
    ) -> Result<(), AccessPolicyError> {
        self.check_at(subject, database, permission, Utc::now())
    }

    /// Same as [`Self::check`] but evaluated at an explicit instant, used by
    /// tests to exercise time-window expiry deterministically.
    ///
    /// # Errors
    ///
    /// Returns [`AccessPolicyError::Denied`] if no policy in the set grants
    /// the request.
    pub fn check_at(
        &self,
        subject: &Subject,
        database: &str,
        permission: Permission,
        now: DateTime<Utc>,
    ) -> Result<(), AccessPolicyError> {
        let granted = self
            .policies
            .iter()
            .any(|p| p.grants(subject, database, permission, now));
        if granted {
            Ok(())
        } else {
            Err(AccessPolicyError::Denied {
                subject: subject.id.clone(),
                database: database.to_owned(),
                op: permission.to_string(),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn subject(id: &str) -> Subject {
        Subject {
            id: id.to_owned(),
            groups: vec!["analysts".to_owned()],
            source_ip: Some("10.0.0.5".parse().unwrap()),
        }
    }

    fn policy() -> Policy {
        Policy {
            name: "analysts-read".to_owned(),
            subject_pattern: "analysts".to_owned(),
            database_pattern: "reporting-*".to_owned(),
            permissions: vec![Permission::Read],
            allowed_ips: vec![],
            active_from: None,
            active_until: None,
        }
    }

    #[test]
    fn grants_matching_permission_and_database_glob() {
        let set = PolicySet::new(vec![policy()]);
        assert!(set.check(&subject("alice"), "reporting-prod", Permission::Read).is_ok());
    }

    #[test]
    fn denies_unlisted_permission() {
        let set = PolicySet::new(vec![policy()]);
        let err = set
            .check(&subject("alice"), "reporting-prod", Permission::Write)
            .unwrap_err();
        assert!(matches!(err, AccessPolicyError::Denied { .. }));
    }

    #[test]
    fn denies_non_matching_database() {
        let set = PolicySet::new(vec![policy()]);
        assert!(set.check(&subject("alice"), "billing-prod", Permission::Read).is_err());
    }

    #[test]
    fn ip_allow_list_restricts_access() {
        let mut p = policy();
        p.allowed_ips = vec!["192.168.1.1".parse().unwrap()];
        let set = PolicySet::new(vec![p]);
        assert!(set.check(&subject("alice"), "reporting-prod", Permission::Read).is_err());
    }

    #[test]
    fn time_window_gates_activation() {
        let mut p = policy();
        let now = Utc::now();
        p.active_from = Some(now + chrono::Duration::hours(1));
        let set = PolicySet::new(vec![p]);
        assert!(
            set.check_at(&subject("alice"), "reporting-prod", Permission::Read, now)
                .is_err()
        );
    }

    #[test]
    fn union_of_policies_grants_if_any_matches() {
        let mut other = policy();
        other.name = "admins".to_owned();
        other.subject_pattern = "bob".to_owned();
        other.database_pattern = "*".to_owned();
        other.permissions = vec![Permission::Admin];

        let set = PolicySet::new(vec![policy(), other]);
        assert!(set.check(&subject("bob"), "anything", Permission::Admin).is_ok());
    }
}
