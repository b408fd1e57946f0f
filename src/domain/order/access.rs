use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use super::errors::OrderError;

// ============================================================================
// Access Policy - authorization predicate over verified principals
// ============================================================================
//
// Authentication happens upstream (identity provider). The engine only
// receives a verified principal and asks the policy whether its role may
// perform the requested action.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("USER"),
            Role::Admin => f.write_str("ADMIN"),
        }
    }
}

impl FromStr for Role {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USER" => Ok(Role::User),
            "ADMIN" => Ok(Role::Admin),
            other => Err(OrderError::validation("role", format!("unknown role '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Read,
    Create,
    UpdateStatus,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::UpdateStatus => "update-status",
            Action::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Verified identity handed over by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    pub role: Role,
}

impl Principal {
    pub fn new(subject: impl Into<String>, role: Role) -> Self {
        Self { subject: subject.into(), role }
    }

    pub fn user(subject: impl Into<String>) -> Self {
        Self::new(subject, Role::User)
    }

    pub fn admin(subject: impl Into<String>) -> Self {
        Self::new(subject, Role::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    grants: HashMap<Action, HashSet<Role>>,
}

impl AccessPolicy {
    /// Every role may do everything
    pub fn permissive() -> Self {
        let all: HashSet<Role> = [Role::User, Role::Admin].into_iter().collect();
        let grants = [Action::Read, Action::Create, Action::UpdateStatus, Action::Delete]
            .into_iter()
            .map(|action| (action, all.clone()))
            .collect();
        Self { grants }
    }

    pub fn grant(mut self, action: Action, roles: impl IntoIterator<Item = Role>) -> Self {
        self.grants.insert(action, roles.into_iter().collect());
        self
    }

    pub fn roles_for(&self, action: Action) -> Vec<Role> {
        let mut roles: Vec<Role> = self
            .grants
            .get(&action)
            .map(|roles| roles.iter().copied().collect())
            .unwrap_or_default();
        roles.sort_by_key(|role| role.to_string());
        roles
    }

    pub fn is_allowed(&self, principal: &Principal, action: Action) -> bool {
        self.grants
            .get(&action)
            .is_some_and(|roles| roles.contains(&principal.role))
    }

    pub fn authorize(&self, principal: &Principal, action: Action) -> Result<(), OrderError> {
        if self.is_allowed(principal, action) {
            return Ok(());
        }

        tracing::warn!(
            subject = %principal.subject,
            role = %principal.role,
            action = %action,
            "Access denied"
        );
        Err(OrderError::Forbidden { action, role: principal.role })
    }
}

impl Default for AccessPolicy {
    /// Any authenticated principal may read, create and move orders along;
    /// only admins may delete.
    fn default() -> Self {
        Self::permissive().grant(Action::Delete, [Role::Admin])
    }
}

/// Parse a comma-separated role list such as `"USER,ADMIN"`
pub fn parse_roles(raw: &str) -> Result<Vec<Role>, OrderError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(Role::from_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_reserves_delete_for_admins() {
        let policy = AccessPolicy::default();
        let user = Principal::user("alice");
        let admin = Principal::admin("root");

        assert!(policy.is_allowed(&user, Action::Read));
        assert!(policy.is_allowed(&user, Action::Create));
        assert!(policy.is_allowed(&user, Action::UpdateStatus));
        assert!(!policy.is_allowed(&user, Action::Delete));
        assert!(policy.is_allowed(&admin, Action::Delete));
    }

    #[test]
    fn test_authorize_reports_action_and_role() {
        let policy = AccessPolicy::default();
        let err = policy.authorize(&Principal::user("alice"), Action::Delete).unwrap_err();
        assert_eq!(err, OrderError::Forbidden { action: Action::Delete, role: Role::User });
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[test]
    fn test_empty_grant_denies_everyone() {
        let policy = AccessPolicy::permissive().grant(Action::UpdateStatus, []);
        assert!(!policy.is_allowed(&Principal::admin("root"), Action::UpdateStatus));
        assert!(policy.roles_for(Action::UpdateStatus).is_empty());
    }

    #[test]
    fn test_parse_roles() {
        assert_eq!(parse_roles("admin, USER").unwrap(), vec![Role::Admin, Role::User]);
        assert_eq!(parse_roles("").unwrap(), Vec::<Role>::new());
        assert!(parse_roles("ADMIN,ROOT").is_err());
    }
}
