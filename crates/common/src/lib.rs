use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Header carrying the authenticated user id, set by the fronting proxy.
pub const USER_HEADER: &str = "x-user-id";
/// Header carrying the authenticated user's role (`admin` or `user`).
pub const ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    pub fn user(user_id: impl Into<String>) -> Self {
        Identity { user_id: user_id.into(), role: Role::User }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Identity { user_id: user_id.into(), role: Role::Admin }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plug {
    pub id: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub plug_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub user_id: String,
    pub plug_id: String,
    pub created_at: DateTime<Utc>,
}

/// Aggregate view of one plug: power state plus its current holders.
///
/// `device_on` is `None` when the device could not be reached, which callers
/// must treat differently from a confirmed "off".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlugStatus {
    pub plug_id: String,
    pub device_on: Option<bool>,
    pub active_users: usize,
    pub holders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlugInfo {
    pub plug_id: String,
    pub address: String,
    pub device_on: Option<bool>,
    pub active_users: usize,
    pub holders: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRequest {
    pub user_id: String,
    pub plug_id: String,
}

/// Body returned alongside a 503 when the logical operation succeeded but the
/// device command did not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFailure {
    pub error: String,
    pub code: String,
    pub status: Option<PlugStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!(Role::parse("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse(" user "), Some(Role::User));
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn unknown_power_state_serializes_as_null() {
        let status = PlugStatus {
            plug_id: "p1".to_string(),
            device_on: None,
            active_users: 0,
            holders: vec![],
        };
        let json = serde_json::to_value(&status).unwrap();
        assert!(json["device_on"].is_null());
    }
}
