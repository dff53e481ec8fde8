use super::geo::Location;
use crate::error::{LogisticsError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub type AccountId = u64;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Hospital,
    Vendor,
    Admin,
}

impl FromStr for Role {
    type Err = LogisticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hospital" => Ok(Self::Hospital),
            "vendor" => Ok(Self::Vendor),
            "admin" => Ok(Self::Admin),
            other => Err(LogisticsError::ValidationError(format!(
                "unknown role '{other}'"
            ))),
        }
    }
}

/// The authenticated caller of a core operation.
///
/// Identity is established by the auth collaborator; the core trusts it and only
/// enforces domain rules such as cylinder ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: AccountId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: AccountId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn hospital(id: AccountId) -> Self {
        Self::new(id, Role::Hospital)
    }

    pub fn vendor(id: AccountId) -> Self {
        Self::new(id, Role::Vendor)
    }
}

/// A hospital, vendor or admin known to the marketplace.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub role: Role,
    /// Vendors need a location to be considered for vendor discovery.
    pub location: Option<Location>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn actor(&self) -> Actor {
        Actor::new(self.id, self.role)
    }
}
