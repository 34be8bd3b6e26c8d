//! Shared data model for tripsync.
//!
//! Everything here is a plain serializable value: projects, their
//! itineraries and budgets, collaborative documents, and the denormalized
//! user projections that ride inside them. The store traits that persist
//! these values live in [`store`].

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod store;

pub use store::{
    DocumentStore, ProjectStore, ProjectUpdate, StoreError, UserStore, UserUpdate,
};

/// Well-known budget id that always exists on a project.
///
/// Expenses belonging to a deleted budget are reassigned here; the
/// sentinel itself can never be deleted.
pub const UNCATEGORIZED_BUDGET_ID: &str = "uncategorized";

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Denormalized user projection embedded wherever full identity isn't needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleUser {
    pub id: String,
    pub username: String,
    pub email: String,
}

/// A user's denormalized view of one project, stored on the user record
/// so the project list renders without a cross-entity join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub project_id: String,
    pub name: String,
    pub owner: SimpleUser,
    pub is_shared: bool,
}

/// Persisted user record. Only the project list is mutated by this core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub email: String,
    pub project_list: Vec<ProjectSummary>,
}

impl UserRecord {
    pub fn new(user: SimpleUser) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            project_list: Vec::new(),
        }
    }
}

/// One collaboratively edited content blob.
///
/// Ids follow the `<project>/<page>/<slot>` convention. The content is
/// opaque to the core: it is whatever the client editor serializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub content: serde_json::Value,
}

impl Document {
    /// New document with the empty default content (`""`).
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: serde_json::Value::String(String::new()),
        }
    }
}

/// One activity inside an itinerary day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub start_time: String,
    pub end_time: String,
    pub location: String,
    /// Id of the document holding this activity's notes.
    pub document_id: String,
}

/// An ordered day of activities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItineraryRow {
    pub day: String,
    pub activities: Vec<Activity>,
}

/// A single expense record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub description: String,
    pub amount: f64,
}

/// A named budget with an optional cap and its expenses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub id: String,
    pub name: String,
    pub max: Option<f64>,
    pub expenses: Vec<Expense>,
}

impl Budget {
    /// The sentinel budget every project carries.
    pub fn uncategorized() -> Self {
        Self {
            id: UNCATEGORIZED_BUDGET_ID.to_string(),
            name: "Uncategorized".to_string(),
            max: None,
            expenses: Vec::new(),
        }
    }
}

/// Persisted project entity: membership, itinerary, and budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub owner: SimpleUser,
    pub admins: Vec<String>,
    pub members: Vec<SimpleUser>,
    pub created_at: u64,
    pub updated_at: u64,
    pub itinerary: Vec<ItineraryRow>,
    pub budgets: Vec<Budget>,
}

impl Project {
    /// New project with the owner as admin and the sentinel budget seeded.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        owner: SimpleUser,
        members: Vec<SimpleUser>,
    ) -> Self {
        let now = epoch_secs();
        Self {
            id: id.into(),
            name: name.into(),
            admins: vec![owner.id.clone()],
            owner,
            members,
            created_at: now,
            updated_at: now,
            itinerary: Vec::new(),
            budgets: vec![Budget::uncategorized()],
        }
    }

    /// A project is shared when more than one member can see it.
    pub fn is_shared(&self) -> bool {
        self.members.len() > 1
    }

    /// The denormalized entry members carry in their own project list.
    pub fn summary(&self) -> ProjectSummary {
        ProjectSummary {
            project_id: self.id.clone(),
            name: self.name.clone(),
            owner: self.owner.clone(),
            is_shared: self.is_shared(),
        }
    }
}
