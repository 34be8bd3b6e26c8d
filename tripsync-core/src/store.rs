//! Store traits the real-time core persists through.
//!
//! The document, project, and user stores are external collaborators: the
//! core only needs find-by-id, create, and targeted single-document
//! updates. Implementations live with the server crate (in-memory and
//! RocksDB); everything here is engine-agnostic.
//!
//! Updates are explicit mutation values rather than closures so that each
//! one maps to a single atomic read-modify-write on one key — the
//! equivalent of an array push/pull on a stored record. Cross-entity
//! consistency (project membership vs. each member's denormalized project
//! list) is the caller's job and is not transactional.

use async_trait::async_trait;

use crate::{
    Budget, Document, Expense, ItineraryRow, Project, SimpleUser,
    ProjectSummary, UserRecord, epoch_secs, UNCATEGORIZED_BUDGET_ID,
};

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// Referenced entity absent where one was required.
    NotFound(String),
    /// Create hit an existing key (first-open races resolve via re-fetch).
    Duplicate(String),
    /// Engine-level failure.
    Database(String),
    /// Encoding a record failed.
    Serialization(String),
    /// Decoding a record failed.
    Deserialization(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "Not found: {id}"),
            StoreError::Duplicate(id) => write!(f, "Already exists: {id}"),
            StoreError::Database(e) => write!(f, "Database error: {e}"),
            StoreError::Serialization(e) => write!(f, "Serialization error: {e}"),
            StoreError::Deserialization(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Targeted mutation applied atomically to one stored project.
#[derive(Debug, Clone)]
pub enum ProjectUpdate {
    Rename(String),
    PushMember(SimpleUser),
    PullMember(String),
    SetItinerary(Vec<ItineraryRow>),
    PushBudget(Budget),
    /// Reassigns the budget's expenses to the sentinel, then removes it.
    /// Removing the sentinel itself is a no-op.
    RemoveBudget(String),
    PushExpense { budget_id: String, expense: Expense },
    PullExpense { budget_id: String, expense_id: String },
}

impl ProjectUpdate {
    /// Apply this mutation in place.
    ///
    /// Absent sub-resources (an unknown budget or expense id) are silent
    /// no-ops, matching a store update that matches zero documents.
    pub fn apply(self, project: &mut Project) {
        match self {
            ProjectUpdate::Rename(name) => {
                project.name = name;
            }
            ProjectUpdate::PushMember(user) => {
                if !project.members.iter().any(|m| m.id == user.id) {
                    project.members.push(user);
                }
            }
            ProjectUpdate::PullMember(user_id) => {
                project.members.retain(|m| m.id != user_id);
            }
            ProjectUpdate::SetItinerary(rows) => {
                project.itinerary = rows;
            }
            ProjectUpdate::PushBudget(budget) => {
                if !project.budgets.iter().any(|b| b.id == budget.id) {
                    project.budgets.push(budget);
                }
            }
            ProjectUpdate::RemoveBudget(budget_id) => {
                if budget_id == UNCATEGORIZED_BUDGET_ID {
                    log::warn!("Refusing to remove the sentinel budget");
                    return;
                }
                let Some(pos) = project.budgets.iter().position(|b| b.id == budget_id)
                else {
                    return;
                };
                let removed = project.budgets.remove(pos);
                // Restore the sentinel if a legacy record lost it.
                if !project
                    .budgets
                    .iter()
                    .any(|b| b.id == UNCATEGORIZED_BUDGET_ID)
                {
                    project.budgets.push(Budget::uncategorized());
                }
                if let Some(sentinel) = project
                    .budgets
                    .iter_mut()
                    .find(|b| b.id == UNCATEGORIZED_BUDGET_ID)
                {
                    sentinel.expenses.extend(removed.expenses);
                }
            }
            ProjectUpdate::PushExpense { budget_id, expense } => {
                if let Some(budget) =
                    project.budgets.iter_mut().find(|b| b.id == budget_id)
                {
                    budget.expenses.push(expense);
                }
            }
            ProjectUpdate::PullExpense { budget_id, expense_id } => {
                if let Some(budget) =
                    project.budgets.iter_mut().find(|b| b.id == budget_id)
                {
                    budget.expenses.retain(|e| e.id != expense_id);
                }
            }
        }
        project.updated_at = epoch_secs();
    }
}

/// Targeted mutation applied to one user's denormalized project list.
#[derive(Debug, Clone)]
pub enum UserUpdate {
    /// Add a summary if no entry for the project exists yet.
    PushSummary(ProjectSummary),
    /// Remove the entry for a project id.
    PullSummary(String),
    /// Replace the entry for the project, or add it if missing.
    UpsertSummary(ProjectSummary),
}

impl UserUpdate {
    pub fn apply(self, user: &mut UserRecord) {
        match self {
            UserUpdate::PushSummary(summary) => {
                if !user
                    .project_list
                    .iter()
                    .any(|s| s.project_id == summary.project_id)
                {
                    user.project_list.push(summary);
                }
            }
            UserUpdate::PullSummary(project_id) => {
                user.project_list.retain(|s| s.project_id != project_id);
            }
            UserUpdate::UpsertSummary(summary) => {
                match user
                    .project_list
                    .iter_mut()
                    .find(|s| s.project_id == summary.project_id)
                {
                    Some(entry) => *entry = summary,
                    None => user.project_list.push(summary),
                }
            }
        }
    }
}

/// Durable key-value store for collaborative documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] if the id already exists.
    async fn create(&self, doc: Document) -> Result<(), StoreError>;

    /// Unconditional last-write-wins overwrite of the content; writes the
    /// document even if it was never created through this store.
    async fn update_content(
        &self,
        id: &str,
        content: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Returns whether a document was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Removes every document whose id starts with `prefix`; returns the
    /// number removed. Used when an itinerary activity is deleted.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError>;
}

/// Durable store for project entities.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<Project>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] if the id already exists.
    async fn create(&self, project: Project) -> Result<(), StoreError>;

    /// Applies one targeted mutation atomically. Returns `false` when no
    /// project matched the id (the update is then a no-op).
    async fn update(&self, id: &str, update: ProjectUpdate) -> Result<bool, StoreError>;

    /// Returns whether a project was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// Store for the per-user denormalized project lists.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Applies one targeted mutation to the user's project list. The
    /// record is created on first touch if the store has never seen the
    /// user (find-or-create semantics).
    async fn update(&self, user: &SimpleUser, update: UserUpdate) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> SimpleUser {
        SimpleUser {
            id: id.to_string(),
            username: id.to_string(),
            email: format!("{id}@example.com"),
        }
    }

    fn expense(id: &str, amount: f64) -> Expense {
        Expense {
            id: id.to_string(),
            description: format!("expense {id}"),
            amount,
        }
    }

    fn project_with_budget() -> Project {
        let owner = user("u1");
        let mut project = Project::new("p1", "Trip", owner.clone(), vec![owner]);
        project.budgets.push(Budget {
            id: "food".to_string(),
            name: "Food".to_string(),
            max: Some(300.0),
            expenses: vec![expense("e1", 12.5), expense("e2", 40.0)],
        });
        project
    }

    #[test]
    fn test_remove_budget_reassigns_expenses() {
        let mut project = project_with_budget();
        ProjectUpdate::RemoveBudget("food".to_string()).apply(&mut project);

        assert!(!project.budgets.iter().any(|b| b.id == "food"));
        let sentinel = project
            .budgets
            .iter()
            .find(|b| b.id == UNCATEGORIZED_BUDGET_ID)
            .unwrap();
        let ids: Vec<&str> = sentinel.expenses.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2"]);
    }

    #[test]
    fn test_remove_sentinel_budget_is_noop() {
        let mut project = project_with_budget();
        ProjectUpdate::RemoveBudget(UNCATEGORIZED_BUDGET_ID.to_string())
            .apply(&mut project);
        assert!(project
            .budgets
            .iter()
            .any(|b| b.id == UNCATEGORIZED_BUDGET_ID));
        // The named budget is untouched too.
        assert!(project.budgets.iter().any(|b| b.id == "food"));
    }

    #[test]
    fn test_push_expense_unknown_budget_is_noop() {
        let mut project = project_with_budget();
        ProjectUpdate::PushExpense {
            budget_id: "missing".to_string(),
            expense: expense("e9", 1.0),
        }
        .apply(&mut project);
        let total: usize = project.budgets.iter().map(|b| b.expenses.len()).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_pull_expense() {
        let mut project = project_with_budget();
        ProjectUpdate::PullExpense {
            budget_id: "food".to_string(),
            expense_id: "e1".to_string(),
        }
        .apply(&mut project);
        let food = project.budgets.iter().find(|b| b.id == "food").unwrap();
        assert_eq!(food.expenses.len(), 1);
        assert_eq!(food.expenses[0].id, "e2");
    }

    #[test]
    fn test_push_member_idempotent() {
        let mut project = project_with_budget();
        ProjectUpdate::PushMember(user("u2")).apply(&mut project);
        ProjectUpdate::PushMember(user("u2")).apply(&mut project);
        assert_eq!(project.members.len(), 2);
    }

    #[test]
    fn test_pull_member() {
        let mut project = project_with_budget();
        ProjectUpdate::PushMember(user("u2")).apply(&mut project);
        ProjectUpdate::PullMember("u2".to_string()).apply(&mut project);
        assert_eq!(project.members.len(), 1);
        assert_eq!(project.members[0].id, "u1");
    }

    #[test]
    fn test_upsert_summary_replaces_by_project_id() {
        let mut record = UserRecord::new(user("u1"));
        let project = project_with_budget();
        UserUpdate::PushSummary(project.summary()).apply(&mut record);

        let mut renamed = project.summary();
        renamed.name = "Trip 2".to_string();
        UserUpdate::UpsertSummary(renamed).apply(&mut record);

        assert_eq!(record.project_list.len(), 1);
        assert_eq!(record.project_list[0].name, "Trip 2");
    }

    #[test]
    fn test_push_summary_idempotent() {
        let mut record = UserRecord::new(user("u1"));
        let project = project_with_budget();
        UserUpdate::PushSummary(project.summary()).apply(&mut record);
        UserUpdate::PushSummary(project.summary()).apply(&mut record);
        assert_eq!(record.project_list.len(), 1);
    }

    #[test]
    fn test_pull_summary() {
        let mut record = UserRecord::new(user("u1"));
        let project = project_with_budget();
        UserUpdate::PushSummary(project.summary()).apply(&mut record);
        UserUpdate::PullSummary("p1".to_string()).apply(&mut record);
        assert!(record.project_list.is_empty());
    }
}
