//! Ownership records and the assignment audit trail

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Entities that can be assigned an owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Lead,
    Company,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Company => "company",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lead" | "leads" => Ok(Self::Lead),
            "company" | "companies" => Ok(Self::Company),
            other => Err(EngineError::validation(format!("unknown entity type: {other}"))),
        }
    }
}

/// Caller identity, already authenticated upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub is_admin: bool,
}

impl Actor {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            is_admin: false,
        }
    }

    pub fn admin(id: Uuid) -> Self {
        Self { id, is_admin: true }
    }
}

/// A lead or company with its current owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EntityRecord {
    pub entity_type: EntityType,
    pub id: Uuid,
    /// Human user or workflow id
    pub owner_id: Option<Uuid>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl EntityRecord {
    pub fn lead(id: Uuid, email: impl Into<String>) -> Self {
        Self {
            entity_type: EntityType::Lead,
            id,
            owner_id: None,
            email: Some(email.into()),
            first_name: None,
            last_name: None,
            company: None,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn company(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            entity_type: EntityType::Company,
            id,
            owner_id: None,
            email: None,
            first_name: None,
            last_name: None,
            company: Some(name.into()),
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Values available to email template interpolation
    pub fn template_vars(&self) -> HashMap<String, String> {
        [
            ("email", &self.email),
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
            ("company", &self.company),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| (k.to_string(), v.clone())))
        .collect()
    }
}

/// One ownership change; never mutated once written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AssignmentHistoryEntry {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub previous_owner_id: Option<Uuid>,
    pub new_owner_id: Option<Uuid>,
    pub actor_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl AssignmentHistoryEntry {
    pub fn new(
        entity_type: EntityType,
        entity_id: Uuid,
        previous_owner_id: Option<Uuid>,
        new_owner_id: Option<Uuid>,
        actor_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            entity_type,
            entity_id,
            previous_owner_id,
            new_owner_id,
            actor_id,
            created_at,
        }
    }
}
