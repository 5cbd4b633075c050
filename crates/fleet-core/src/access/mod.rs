//! Access gate: who may read or write, and which scope they address.
//!
//! The session is passed explicitly to the gate and the sync engine; there is
//! no ambient role state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::models::SyncScope;

/// Session role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Not signed in
    #[default]
    None,
    Worker,
    Admin,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Worker => "worker",
            Self::Admin => "admin",
        }
    }

    pub const fn is_authenticated(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "worker" => Ok(Self::Worker),
            "admin" => Ok(Self::Admin),
            other => Err(Error::InvalidInput(format!("unknown role '{other}'"))),
        }
    }
}

/// Active session context.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub role: Role,
    /// Display name or user id of the signed-in principal
    #[serde(default)]
    pub identity: Option<String>,
    /// Bearer credential forwarded to authenticated backends
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub scope: Option<SyncScope>,
}

impl fmt::Debug for Session {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Session")
            .field("role", &self.role)
            .field("identity", &self.identity)
            .field(
                "credential",
                &self.credential.as_ref().map(|_| "[REDACTED]"),
            )
            .field("scope", &self.scope)
            .finish()
    }
}

impl Session {
    /// Signed-out session.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn new(role: Role, identity: impl Into<String>) -> Self {
        Self {
            role,
            identity: Some(identity.into()),
            credential: None,
            scope: None,
        }
    }

    #[must_use]
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: SyncScope) -> Self {
        self.scope = Some(scope);
        self
    }
}

/// Deployment policy for non-admin writers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WritePolicy {
    /// Only administrators may push
    AdminOnly,
    /// Any signed-in role may push
    #[default]
    AnyAuthenticated,
}

impl WritePolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AdminOnly => "admin-only",
            Self::AnyAuthenticated => "any-authenticated",
        }
    }
}

impl fmt::Display for WritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WritePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "admin-only" | "admin" => Ok(Self::AdminOnly),
            "any-authenticated" | "any" => Ok(Self::AnyAuthenticated),
            other => Err(Error::InvalidInput(format!(
                "unknown write policy '{other}' (expected admin-only or any-authenticated)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAuthorization {
    pub can_read: bool,
    pub can_write: bool,
}

impl WriteAuthorization {
    pub const DENIED: Self = Self {
        can_read: false,
        can_write: false,
    };
}

/// Authorization plus the scope it applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Access {
    pub authorization: WriteAuthorization,
    pub scope: Option<SyncScope>,
}

impl Access {
    pub const fn can_push(&self) -> bool {
        self.authorization.can_write && self.scope.is_some()
    }

    pub const fn can_pull(&self) -> bool {
        self.authorization.can_read && self.scope.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessGate {
    policy: WritePolicy,
}

impl AccessGate {
    pub const fn new(policy: WritePolicy) -> Self {
        Self { policy }
    }

    pub const fn policy(&self) -> WritePolicy {
        self.policy
    }

    pub const fn authorize(&self, session: &Session) -> WriteAuthorization {
        let can_write = match (session.role, self.policy) {
            (Role::None, _) | (Role::Worker, WritePolicy::AdminOnly) => false,
            (Role::Admin, _) | (Role::Worker, WritePolicy::AnyAuthenticated) => true,
        };
        WriteAuthorization {
            can_read: session.role.is_authenticated(),
            can_write,
        }
    }

    /// Resolve the session's access, falling back to `stored_scope` when the
    /// session does not name one.
    pub fn evaluate(&self, session: &Session, stored_scope: Option<&SyncScope>) -> Access {
        Access {
            authorization: self.authorize(session),
            scope: session.scope.clone().or_else(|| stored_scope.cloned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(role: Role) -> Session {
        Session {
            role,
            ..Session::default()
        }
    }

    #[test]
    fn admin_always_writes() {
        for policy in [WritePolicy::AdminOnly, WritePolicy::AnyAuthenticated] {
            let auth = AccessGate::new(policy).authorize(&session(Role::Admin));
            assert!(auth.can_read);
            assert!(auth.can_write);
        }
    }

    #[test]
    fn worker_write_follows_policy() {
        let worker = session(Role::Worker);
        assert_eq!(
            AccessGate::new(WritePolicy::AdminOnly).authorize(&worker),
            WriteAuthorization {
                can_read: true,
                can_write: false,
            }
        );
        assert!(AccessGate::new(WritePolicy::AnyAuthenticated)
            .authorize(&worker)
            .can_write);
    }

    #[test]
    fn signed_out_session_has_no_access() {
        let auth = AccessGate::default().authorize(&Session::anonymous());
        assert_eq!(auth, WriteAuthorization::DENIED);
    }

    #[test]
    fn session_scope_overrides_stored_scope() {
        let stored = SyncScope::parse("stored").unwrap();
        let gate = AccessGate::default();

        let access = gate.evaluate(&session(Role::Worker), Some(&stored));
        assert_eq!(access.scope.as_ref(), Some(&stored));
        assert!(access.can_pull());

        let explicit = session(Role::Worker).with_scope(SyncScope::parse("explicit").unwrap());
        let access = gate.evaluate(&explicit, Some(&stored));
        assert_eq!(access.scope.unwrap().as_str(), "explicit");
    }

    #[test]
    fn pull_and_push_need_a_scope() {
        let access = AccessGate::default().evaluate(&session(Role::Admin), None);
        assert!(!access.can_pull());
        assert!(!access.can_push());
    }

    #[test]
    fn debug_redacts_credential() {
        let session = Session::new(Role::Admin, "ana").with_credential("jwt-secret");
        let debug = format!("{session:?}");
        assert!(!debug.contains("jwt-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn policy_parses_aliases() {
        assert_eq!(
            "ADMIN_ONLY".parse::<WritePolicy>().unwrap(),
            WritePolicy::AdminOnly
        );
        assert_eq!(
            "any".parse::<WritePolicy>().unwrap(),
            WritePolicy::AnyAuthenticated
        );
        assert!("everyone".parse::<WritePolicy>().is_err());
    }
}
