//! Roles, principals and credential records

use crate::AuthError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Role-specific attributes carried in tokens and principals
pub type RoleAttributes = BTreeMap<String, serde_json::Value>;

/// The account families that can sign in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    Director,
    Master,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Operator, Role::Director, Role::Master];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::Director => "director",
            Role::Master => "master",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "operator" => Ok(Role::Operator),
            "director" => Ok(Role::Director),
            "master" => Ok(Role::Master),
            other => Err(AuthError::config_error(format!("unknown role '{}'", other))),
        }
    }
}

/// Authenticated identity with a role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub login_name: String,
    pub role: Role,
    pub display_name: String,
    #[serde(default)]
    pub attributes: RoleAttributes,
}

impl Principal {
    pub fn new(
        id: impl Into<String>,
        login_name: impl Into<String>,
        role: Role,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            login_name: login_name.into(),
            role,
            display_name: display_name.into(),
            attributes: RoleAttributes::new(),
        }
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Eligibility flags stored beside a credential
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EligibilityFlags {
    /// Account status, e.g. `active` or `inactive`
    pub status: Option<String>,

    /// Whether the account is currently in service
    pub working: Option<bool>,
}

/// Durable credential as returned by a credential source. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub principal_id: String,
    pub login_name: String,
    pub role: Role,
    pub display_name: String,

    /// `None` when no password has been set yet
    pub password_hash: Option<String>,

    #[serde(default)]
    pub flags: EligibilityFlags,

    #[serde(default)]
    pub attributes: RoleAttributes,
}

impl CredentialRecord {
    /// Role-specific sign-in eligibility, evaluated after the hash comparison
    pub fn is_eligible(&self) -> bool {
        match self.role {
            Role::Admin | Role::Director => self.password_hash.is_some(),
            Role::Operator => {
                let active = self.flags.status.as_deref();
                self.password_hash.is_some()
                    && active.map_or(false, |s| s.eq_ignore_ascii_case("active"))
            }
            Role::Master => {
                self.password_hash.as_deref().map_or(false, |h| !h.is_empty())
                    && self.flags.working.unwrap_or(false)
            }
        }
    }

    pub fn to_principal(&self) -> Principal {
        Principal {
            id: self.principal_id.clone(),
            login_name: self.login_name.clone(),
            role: self.role,
            display_name: self.display_name.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(role: Role) -> CredentialRecord {
        CredentialRecord {
            principal_id: "42".to_string(),
            login_name: "someone".to_string(),
            role,
            display_name: "Someone".to_string(),
            password_hash: Some("$2b$04$hash".to_string()),
            flags: EligibilityFlags::default(),
            attributes: RoleAttributes::new(),
        }
    }

    #[test]
    fn test_role_parsing_and_display() {
        for role in Role::ALL {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
        assert_eq!("OPERATOR".parse::<Role>().unwrap(), Role::Operator);
        assert!("guest".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Director).unwrap(), "\"director\"");
        let role: Role = serde_json::from_str("\"master\"").unwrap();
        assert_eq!(role, Role::Master);
    }

    #[test]
    fn test_operator_requires_active_status() {
        let mut operator = record(Role::Operator);
        assert!(!operator.is_eligible());

        operator.flags.status = Some("active".to_string());
        assert!(operator.is_eligible());

        operator.flags.status = Some("inactive".to_string());
        assert!(!operator.is_eligible());
    }

    #[test]
    fn test_master_requires_password_and_working_flag() {
        let mut master = record(Role::Master);
        master.flags.working = Some(true);
        assert!(master.is_eligible());

        master.flags.working = Some(false);
        assert!(!master.is_eligible());

        master.flags.working = Some(true);
        master.password_hash = None;
        assert!(!master.is_eligible());
    }

    #[test]
    fn test_to_principal_copies_attributes() {
        let mut director = record(Role::Director);
        director.attributes.insert("branch_id".to_string(), serde_json::json!(7));

        let principal = director.to_principal();
        assert_eq!(principal.id, "42");
        assert_eq!(principal.role, Role::Director);
        assert_eq!(principal.attributes["branch_id"], serde_json::json!(7));
    }
}
