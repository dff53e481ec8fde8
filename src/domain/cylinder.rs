use super::account::AccountId;
use super::geo::Location;
use super::order::OrderId;
use crate::error::{LogisticsError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type CylinderId = u64;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum CylinderStatus {
    #[default]
    Filled,
    InTransit,
    Empty,
    Returned,
}

impl CylinderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filled => "filled",
            Self::InTransit => "in_transit",
            Self::Empty => "empty",
            Self::Returned => "returned",
        }
    }
}

impl fmt::Display for CylinderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CylinderStatus {
    type Err = LogisticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filled" => Ok(Self::Filled),
            "in_transit" => Ok(Self::InTransit),
            "empty" => Ok(Self::Empty),
            "returned" => Ok(Self::Returned),
            other => Err(LogisticsError::ValidationError(format!(
                "unknown cylinder status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum CylinderEventType {
    Created,
    StatusChanged,
    Assigned,
    Unassigned,
    LocationUpdated,
    Deleted,
}

/// A physical gas cylinder owned by a vendor.
///
/// The link to an order lives only here (`current_order_id`); an order's
/// cylinder set is always computed from it, so the two views cannot disagree.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Cylinder {
    pub id: CylinderId,
    pub serial_number: String,
    pub status: CylinderStatus,
    pub vendor_id: AccountId,
    pub location: Option<Location>,
    pub current_order_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Cylinder {
    pub fn is_assigned(&self) -> bool {
        self.current_order_id.is_some()
    }

    /// Whether this cylinder can be reserved by `vendor_id` right now.
    pub fn is_available_to(&self, vendor_id: AccountId) -> bool {
        self.vendor_id == vendor_id && self.status == CylinderStatus::Filled && !self.is_assigned()
    }
}

/// Input for registering a new cylinder.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct CylinderDraft {
    pub serial_number: String,
    #[serde(default)]
    pub status: CylinderStatus,
    #[serde(default)]
    pub location: Option<Location>,
}

impl CylinderDraft {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            ..Self::default()
        }
    }
}

/// Immutable audit entry for a cylinder. Outlives the cylinder it refers to.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct CylinderLog {
    pub id: u64,
    pub cylinder_id: CylinderId,
    pub event_type: CylinderEventType,
    pub old_status: Option<CylinderStatus>,
    pub new_status: Option<CylinderStatus>,
    pub order_id: Option<OrderId>,
    pub location: Option<Location>,
    pub notes: Option<String>,
    pub created_by: AccountId,
    pub created_at: DateTime<Utc>,
}

/// A log entry before the store assigns its sequence number and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCylinderLog {
    pub cylinder_id: CylinderId,
    pub event_type: CylinderEventType,
    pub old_status: Option<CylinderStatus>,
    pub new_status: Option<CylinderStatus>,
    pub order_id: Option<OrderId>,
    pub location: Option<Location>,
    pub notes: Option<String>,
    pub created_by: AccountId,
}

impl NewCylinderLog {
    pub fn new(
        cylinder_id: CylinderId,
        event_type: CylinderEventType,
        created_by: AccountId,
    ) -> Self {
        Self {
            cylinder_id,
            event_type,
            old_status: None,
            new_status: None,
            order_id: None,
            location: None,
            notes: None,
            created_by,
        }
    }

    pub fn transition(mut self, old: Option<CylinderStatus>, new: Option<CylinderStatus>) -> Self {
        self.old_status = old;
        self.new_status = new;
        self
    }

    pub fn order(mut self, order_id: Option<OrderId>) -> Self {
        self.order_id = order_id;
        self
    }

    pub fn location(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }

    pub fn notes(mut self, notes: impl Into<Option<String>>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn into_log(self, id: u64, created_at: DateTime<Utc>) -> CylinderLog {
        CylinderLog {
            id,
            cylinder_id: self.cylinder_id,
            event_type: self.event_type,
            old_status: self.old_status,
            new_status: self.new_status,
            order_id: self.order_id,
            location: self.location,
            notes: self.notes,
            created_by: self.created_by,
            created_at,
        }
    }
}

/// Conjunctive filter for cylinder listings. `None` fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CylinderFilter {
    pub vendor_id: Option<AccountId>,
    pub status: Option<CylinderStatus>,
    pub is_assigned: Option<bool>,
    pub order_id: Option<OrderId>,
}

impl CylinderFilter {
    pub fn matches(&self, cylinder: &Cylinder) -> bool {
        self.vendor_id.is_none_or(|v| cylinder.vendor_id == v)
            && self.status.is_none_or(|s| cylinder.status == s)
            && self.is_assigned.is_none_or(|a| cylinder.is_assigned() == a)
            && self
                .order_id
                .is_none_or(|o| cylinder.current_order_id == Some(o))
    }

    pub fn cache_key(&self) -> String {
        fn part<T: ToString>(value: Option<T>) -> String {
            value.map(|v| v.to_string()).unwrap_or_else(|| "*".to_string())
        }
        format!(
            "{}:{}:{}:{}",
            part(self.vendor_id),
            part(self.status),
            part(self.is_assigned),
            part(self.order_id)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cylinder(vendor_id: AccountId) -> Cylinder {
        Cylinder {
            id: 1,
            serial_number: "OX-001".into(),
            status: CylinderStatus::Filled,
            vendor_id,
            location: None,
            current_order_id: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn test_assignment_is_derived_from_order_link() {
        let mut c = cylinder(1);
        assert!(!c.is_assigned());
        c.current_order_id = Some(5);
        assert!(c.is_assigned());
    }

    #[test]
    fn test_availability_requires_owner_filled_and_unassigned() {
        let mut c = cylinder(1);
        assert!(c.is_available_to(1));
        assert!(!c.is_available_to(2));

        c.status = CylinderStatus::Empty;
        assert!(!c.is_available_to(1));

        c.status = CylinderStatus::Filled;
        c.current_order_id = Some(3);
        assert!(!c.is_available_to(1));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("in_transit".parse::<CylinderStatus>().unwrap(), CylinderStatus::InTransit);
        assert_eq!(" FILLED ".parse::<CylinderStatus>().unwrap(), CylinderStatus::Filled);
        assert!(matches!(
            "broken".parse::<CylinderStatus>(),
            Err(LogisticsError::ValidationError(_))
        ));
    }

    #[test]
    fn test_filter_is_conjunctive() {
        let mut c = cylinder(1);
        c.current_order_id = Some(4);

        let by_vendor = CylinderFilter {
            vendor_id: Some(1),
            ..Default::default()
        };
        assert!(by_vendor.matches(&c));

        let mismatch = CylinderFilter {
            vendor_id: Some(1),
            is_assigned: Some(false),
            ..Default::default()
        };
        assert!(!mismatch.matches(&c));

        let by_order = CylinderFilter {
            order_id: Some(4),
            status: Some(CylinderStatus::Filled),
            ..Default::default()
        };
        assert!(by_order.matches(&c));
    }
}
