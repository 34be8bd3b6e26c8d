//! Per-project room coordinator: structural mutations persisted
//! immediately, re-broadcast to the room, and mirrored into every
//! member's denormalized project list.
//!
//! The dual write (project entity + each member's summary) is the
//! correctness heart of this module. Per-member summary writes run
//! concurrently but are all awaited before any acknowledgment goes out,
//! so an ack never precedes the denormalized updates. The writes are
//! still not transactional: a crash mid-event can leave summaries stale.

use futures_util::future::join_all;
use std::sync::Arc;

use tripsync_core::{
    Budget, DocumentStore, Expense, ItineraryRow, Project, ProjectStore,
    ProjectUpdate, SimpleUser, StoreError, UserStore, UserUpdate,
};

use crate::protocol::ServerEvent;
use crate::registry::{ConnectionId, SessionRegistry};

/// Room key for a project id. Prefixed so project rooms and document
/// rooms can never collide in the shared namespace.
pub fn project_room(project_id: &str) -> String {
    format!("project:{project_id}")
}

pub struct ProjectRoom {
    registry: Arc<SessionRegistry>,
    projects: Arc<dyn ProjectStore>,
    users: Arc<dyn UserStore>,
    documents: Arc<dyn DocumentStore>,
}

impl ProjectRoom {
    pub fn new(
        registry: Arc<SessionRegistry>,
        projects: Arc<dyn ProjectStore>,
        users: Arc<dyn UserStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self { registry, projects, users, documents }
    }

    /// Upsert the project's summary into every member's project list,
    /// waiting for all writes to settle.
    async fn refresh_summaries(&self, project: &Project) {
        let summary = project.summary();
        let writes = project.members.iter().map(|member| {
            let users = self.users.clone();
            let summary = summary.clone();
            async move {
                users
                    .update(member, UserUpdate::UpsertSummary(summary))
                    .await
            }
        });
        for result in join_all(writes).await {
            if let Err(e) = result {
                log::error!("Summary refresh failed for project {}: {e}", project.id);
            }
        }
    }

    /// Create a project, seed every member's summary, join the room, and
    /// acknowledge to the creator only.
    ///
    /// A duplicate id falls back to the existing project, mirroring the
    /// document find-or-create semantics.
    pub async fn create_project(
        &self,
        conn: ConnectionId,
        project_id: String,
        project_name: String,
        user_id: String,
        user_list: Vec<SimpleUser>,
    ) -> Result<String, StoreError> {
        let owner = user_list
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .unwrap_or_else(|| SimpleUser {
                id: user_id.clone(),
                username: String::new(),
                email: String::new(),
            });

        let project = Project::new(project_id.clone(), project_name, owner, user_list);
        let project = match self.projects.create(project).await {
            Ok(()) => self
                .projects
                .find(&project_id)
                .await?
                .ok_or_else(|| StoreError::NotFound(project_id.clone()))?,
            Err(StoreError::Duplicate(_)) => {
                log::warn!("create-project for existing id {project_id}; reusing");
                self.projects
                    .find(&project_id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(project_id.clone()))?
            }
            Err(e) => return Err(e),
        };

        self.refresh_summaries(&project).await;

        let room = project_room(&project_id);
        self.registry.join(conn, &room).await;
        self.registry
            .send_to(&conn, &ServerEvent::NewProjectCreated(project))
            .await;
        log::info!("Connection {conn} created project {project_id}");
        Ok(project_id)
    }

    /// Join the project room and send the full project to the requester.
    /// A missing project on a pure open is a logged no-op.
    pub async fn open_project(
        &self,
        conn: ConnectionId,
        project_id: String,
    ) -> Result<Option<String>, StoreError> {
        let Some(project) = self.projects.find(&project_id).await? else {
            log::warn!("get-project for unknown id {project_id}; ignoring");
            return Ok(None);
        };
        self.registry.join(conn, &project_room(&project_id)).await;
        self.registry
            .send_to(&conn, &ServerEvent::LoadProject(project))
            .await;
        Ok(Some(project_id))
    }

    /// Rename: persist, refresh every member's summary, confirm to the
    /// initiator, and update everyone else's view.
    pub async fn rename_project(
        &self,
        conn: ConnectionId,
        project_id: &str,
        new_name: String,
    ) -> Result<(), StoreError> {
        if !self
            .projects
            .update(project_id, ProjectUpdate::Rename(new_name))
            .await?
        {
            return Ok(());
        }
        let Some(project) = self.projects.find(project_id).await? else {
            return Ok(());
        };
        self.refresh_summaries(&project).await;

        let room = project_room(project_id);
        self.registry
            .broadcast(&room, &ServerEvent::UpdateProject(project.clone()), Some(&conn))
            .await;
        self.registry
            .send_to(&conn, &ServerEvent::ProjectNameUpdated(project))
            .await;
        Ok(())
    }

    /// Add a member: persist membership, seed the new member's summary,
    /// recompute everyone's `isShared`, broadcast the updated project.
    pub async fn add_member(
        &self,
        project_id: &str,
        user: SimpleUser,
    ) -> Result<(), StoreError> {
        if !self
            .projects
            .update(project_id, ProjectUpdate::PushMember(user))
            .await?
        {
            return Ok(());
        }
        let Some(project) = self.projects.find(project_id).await? else {
            return Ok(());
        };
        self.refresh_summaries(&project).await;
        self.registry
            .broadcast(
                &project_room(project_id),
                &ServerEvent::UpdateProject(project),
                None,
            )
            .await;
        Ok(())
    }

    /// Remove a member: persist membership, strip the removed member's
    /// summary, recompute the survivors' `isShared`, broadcast.
    pub async fn remove_member(
        &self,
        project_id: &str,
        user: SimpleUser,
    ) -> Result<(), StoreError> {
        if !self
            .projects
            .update(project_id, ProjectUpdate::PullMember(user.id.clone()))
            .await?
        {
            return Ok(());
        }
        if let Err(e) = self
            .users
            .update(&user, UserUpdate::PullSummary(project_id.to_string()))
            .await
        {
            log::error!("Failed to strip summary for removed member {}: {e}", user.id);
        }
        let Some(project) = self.projects.find(project_id).await? else {
            return Ok(());
        };
        self.refresh_summaries(&project).await;
        self.registry
            .broadcast(
                &project_room(project_id),
                &ServerEvent::UpdateProject(project),
                None,
            )
            .await;
        Ok(())
    }

    /// Delete the project and strip its summary from every member — one
    /// update per member, the deleter included — then notify the room.
    pub async fn delete_project(&self, project_id: &str) -> Result<(), StoreError> {
        let Some(project) = self.projects.find(project_id).await? else {
            return Ok(());
        };
        self.projects.delete(project_id).await?;

        let removals = project.members.iter().map(|member| {
            let users = self.users.clone();
            let project_id = project_id.to_string();
            async move { users.update(member, UserUpdate::PullSummary(project_id)).await }
        });
        for result in join_all(removals).await {
            if let Err(e) = result {
                log::error!("Summary cleanup failed for deleted project {project_id}: {e}");
            }
        }

        self.registry
            .broadcast(
                &project_room(project_id),
                &ServerEvent::ProjectDeleted(project_id.to_string()),
                None,
            )
            .await;
        log::info!("Project {project_id} deleted");
        Ok(())
    }

    /// Live itinerary edits: relayed to the other members, never persisted.
    pub async fn submit_itinerary_changes(
        &self,
        conn: ConnectionId,
        project_id: &str,
        rows: serde_json::Value,
    ) {
        self.registry
            .broadcast(
                &project_room(project_id),
                &ServerEvent::ReceiveItineraryChanges(rows),
                Some(&conn),
            )
            .await;
    }

    /// Persist the itinerary and refresh every member's view.
    pub async fn save_itinerary(
        &self,
        project_id: &str,
        rows: Vec<ItineraryRow>,
    ) -> Result<(), StoreError> {
        if !self
            .projects
            .update(project_id, ProjectUpdate::SetItinerary(rows.clone()))
            .await?
        {
            return Ok(());
        }
        let Some(project) = self.projects.find(project_id).await? else {
            return Ok(());
        };
        let room = project_room(project_id);
        self.registry
            .broadcast(&room, &ServerEvent::LoadItinerary(rows), None)
            .await;
        self.registry
            .broadcast(&room, &ServerEvent::UpdateProject(project), None)
            .await;
        Ok(())
    }

    /// Deleting an activity drops its associated document(s) by id
    /// prefix, then confirms to the initiator.
    pub async fn delete_itinerary_activity(
        &self,
        conn: ConnectionId,
        id_part: String,
    ) -> Result<(), StoreError> {
        let removed = self.documents.delete_prefix(&id_part).await?;
        log::debug!("Deleted {removed} document(s) under {id_part}");
        self.registry
            .send_to(&conn, &ServerEvent::ItineraryActivityDeleted(id_part))
            .await;
        Ok(())
    }

    /// Time edits are relayed to the whole room, the sender included, so
    /// every client applies the same change handler.
    pub async fn submit_time_change(&self, project_id: &str, payload: serde_json::Value) {
        self.registry
            .broadcast(
                &project_room(project_id),
                &ServerEvent::ReceiveTimeChanges(payload),
                None,
            )
            .await;
    }

    /// Location edits: same contract as time edits.
    pub async fn submit_location_change(&self, project_id: &str, payload: serde_json::Value) {
        self.registry
            .broadcast(
                &project_room(project_id),
                &ServerEvent::ReceiveLocationChanges(payload),
                None,
            )
            .await;
    }

    /// Join the project room and return the current budget list to the
    /// requester only.
    pub async fn open_budgets(
        &self,
        conn: ConnectionId,
        project_id: String,
    ) -> Result<Option<String>, StoreError> {
        let Some(project) = self.projects.find(&project_id).await? else {
            log::warn!("get-budgets for unknown project {project_id}; ignoring");
            return Ok(None);
        };
        self.registry.join(conn, &project_room(&project_id)).await;
        self.registry
            .send_to(&conn, &ServerEvent::UpdateBudget(project.budgets))
            .await;
        Ok(Some(project_id))
    }

    pub async fn add_budget(&self, project_id: &str, budget: Budget) -> Result<(), StoreError> {
        self.apply_budget_update(project_id, ProjectUpdate::PushBudget(budget))
            .await
    }

    pub async fn add_expense(
        &self,
        project_id: &str,
        budget_id: String,
        expense: Expense,
    ) -> Result<(), StoreError> {
        self.apply_budget_update(project_id, ProjectUpdate::PushExpense { budget_id, expense })
            .await
    }

    /// Delete a budget. Its expenses land in the sentinel budget before
    /// removal; the sentinel itself cannot be deleted.
    pub async fn delete_budget(
        &self,
        project_id: &str,
        budget_id: String,
    ) -> Result<(), StoreError> {
        self.apply_budget_update(project_id, ProjectUpdate::RemoveBudget(budget_id))
            .await
    }

    pub async fn delete_expense(
        &self,
        project_id: &str,
        budget_id: String,
        expense_id: String,
    ) -> Result<(), StoreError> {
        self.apply_budget_update(project_id, ProjectUpdate::PullExpense { budget_id, expense_id })
            .await
    }

    /// Shared budget-mutation path: one targeted update, then broadcast
    /// the full budget list to the whole room.
    async fn apply_budget_update(
        &self,
        project_id: &str,
        update: ProjectUpdate,
    ) -> Result<(), StoreError> {
        if !self.projects.update(project_id, update).await? {
            return Ok(());
        }
        let Some(project) = self.projects.find(project_id).await? else {
            return Ok(());
        };
        self.registry
            .broadcast(
                &project_room(project_id),
                &ServerEvent::UpdateBudget(project.budgets),
                None,
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;
    use tripsync_core::{Document, UNCATEGORIZED_BUDGET_ID};
    use uuid::Uuid;

    struct Fixture {
        registry: Arc<SessionRegistry>,
        store: Arc<MemoryStore>,
        room: ProjectRoom,
    }

    fn setup() -> Fixture {
        let registry = Arc::new(SessionRegistry::new());
        let store = Arc::new(MemoryStore::new());
        let room = ProjectRoom::new(
            registry.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
        );
        Fixture { registry, store, room }
    }

    async fn connect(
        registry: &SessionRegistry,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(conn, tx).await;
        (conn, rx)
    }

    fn next_event(rx: &mut mpsc::UnboundedReceiver<Message>) -> ServerEvent {
        match rx.try_recv().unwrap() {
            Message::Text(text) => ServerEvent::decode(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn user(id: &str) -> SimpleUser {
        SimpleUser {
            id: id.to_string(),
            username: format!("user-{id}"),
            email: format!("{id}@example.com"),
        }
    }

    async fn create_shared_project(fixture: &Fixture) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let (conn, mut rx) = connect(&fixture.registry).await;
        fixture
            .room
            .create_project(
                conn,
                "p1".to_string(),
                "Trip".to_string(),
                "u1".to_string(),
                vec![user("u1"), user("u2")],
            )
            .await
            .unwrap();
        let _ = next_event(&mut rx); // new-project-created
        (conn, rx)
    }

    #[tokio::test]
    async fn test_create_project_acks_and_seeds_summaries() {
        let fixture = setup();
        let (conn, mut rx) = connect(&fixture.registry).await;

        fixture
            .room
            .create_project(
                conn,
                "p1".to_string(),
                "Trip".to_string(),
                "u1".to_string(),
                vec![user("u1"), user("u2")],
            )
            .await
            .unwrap();

        match next_event(&mut rx) {
            ServerEvent::NewProjectCreated(project) => {
                assert_eq!(project.id, "p1");
                assert_eq!(project.owner.id, "u1");
                assert_eq!(project.budgets[0].id, UNCATEGORIZED_BUDGET_ID);
            }
            other => panic!("expected new-project-created, got {other:?}"),
        }

        for uid in ["u1", "u2"] {
            let record = UserStore::find(fixture.store.as_ref(), uid)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(record.project_list.len(), 1, "summary missing for {uid}");
            assert!(record.project_list[0].is_shared);
        }
    }

    #[tokio::test]
    async fn test_open_unknown_project_is_noop() {
        let fixture = setup();
        let (conn, mut rx) = connect(&fixture.registry).await;
        let room = fixture.room.open_project(conn, "nope".to_string()).await.unwrap();
        assert!(room.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rename_updates_store_and_summaries() {
        let fixture = setup();
        let (conn, mut rx) = create_shared_project(&fixture).await;
        let (other, mut rx_other) = connect(&fixture.registry).await;
        fixture.room.open_project(other, "p1".to_string()).await.unwrap();
        let _ = next_event(&mut rx_other); // load-project

        fixture
            .room
            .rename_project(conn, "p1", "Trip 2".to_string())
            .await
            .unwrap();

        // Initiator gets the confirmation, the other member the broadcast.
        match next_event(&mut rx) {
            ServerEvent::ProjectNameUpdated(project) => assert_eq!(project.name, "Trip 2"),
            other => panic!("expected project-name-updated, got {other:?}"),
        }
        match next_event(&mut rx_other) {
            ServerEvent::UpdateProject(project) => assert_eq!(project.name, "Trip 2"),
            other => panic!("expected update-project, got {other:?}"),
        }

        let project = ProjectStore::find(fixture.store.as_ref(), "p1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(project.name, "Trip 2");
        for uid in ["u1", "u2"] {
            let record = UserStore::find(fixture.store.as_ref(), uid)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(record.project_list[0].name, "Trip 2");
        }
    }

    #[tokio::test]
    async fn test_remove_last_guest_unshares_project() {
        let fixture = setup();
        let (_conn, _rx) = create_shared_project(&fixture).await;

        fixture.room.remove_member("p1", user("u2")).await.unwrap();

        let removed = UserStore::find(fixture.store.as_ref(), "u2")
            .await
            .unwrap()
            .unwrap();
        assert!(removed.project_list.is_empty());

        let owner = UserStore::find(fixture.store.as_ref(), "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owner.project_list.len(), 1);
        assert!(!owner.project_list[0].is_shared);
    }

    #[tokio::test]
    async fn test_delete_project_strips_all_summaries() {
        let fixture = setup();
        let (_conn, mut rx) = create_shared_project(&fixture).await;

        fixture.room.delete_project("p1").await.unwrap();

        assert_eq!(
            next_event(&mut rx),
            ServerEvent::ProjectDeleted("p1".to_string())
        );
        for uid in ["u1", "u2"] {
            let record = UserStore::find(fixture.store.as_ref(), uid)
                .await
                .unwrap()
                .unwrap();
            assert!(record.project_list.is_empty(), "summary left for {uid}");
        }
        assert!(ProjectStore::find(fixture.store.as_ref(), "p1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_budget_reassigns_expenses() {
        let fixture = setup();
        let (_conn, mut rx) = create_shared_project(&fixture).await;

        fixture
            .room
            .add_budget(
                "p1",
                Budget {
                    id: "food".to_string(),
                    name: "Food".to_string(),
                    max: Some(200.0),
                    expenses: Vec::new(),
                },
            )
            .await
            .unwrap();
        let _ = next_event(&mut rx); // update-budget

        for (id, amount) in [("e1", 10.0), ("e2", 25.0)] {
            fixture
                .room
                .add_expense(
                    "p1",
                    "food".to_string(),
                    Expense {
                        id: id.to_string(),
                        description: id.to_string(),
                        amount,
                    },
                )
                .await
                .unwrap();
            let _ = next_event(&mut rx);
        }

        fixture.room.delete_budget("p1", "food".to_string()).await.unwrap();

        match next_event(&mut rx) {
            ServerEvent::UpdateBudget(budgets) => {
                assert!(!budgets.iter().any(|b| b.id == "food"));
                let sentinel = budgets
                    .iter()
                    .find(|b| b.id == UNCATEGORIZED_BUDGET_ID)
                    .unwrap();
                let ids: Vec<&str> =
                    sentinel.expenses.iter().map(|e| e.id.as_str()).collect();
                assert_eq!(ids, vec!["e1", "e2"]);
            }
            other => panic!("expected update-budget, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_save_itinerary_broadcasts_to_everyone() {
        let fixture = setup();
        let (_conn, mut rx) = create_shared_project(&fixture).await;

        let rows = vec![ItineraryRow {
            day: "2026-09-01".to_string(),
            activities: Vec::new(),
        }];
        fixture.room.save_itinerary("p1", rows.clone()).await.unwrap();

        assert_eq!(next_event(&mut rx), ServerEvent::LoadItinerary(rows.clone()));
        match next_event(&mut rx) {
            ServerEvent::UpdateProject(project) => assert_eq!(project.itinerary, rows),
            other => panic!("expected update-project, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_activity_removes_documents() {
        let fixture = setup();
        let (conn, mut rx) = create_shared_project(&fixture).await;

        for id in ["p1/day1/0", "p1/day1/1"] {
            DocumentStore::create(fixture.store.as_ref(), Document::new(id))
                .await
                .unwrap();
        }

        fixture
            .room
            .delete_itinerary_activity(conn, "p1/day1".to_string())
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut rx),
            ServerEvent::ItineraryActivityDeleted("p1/day1".to_string())
        );
        assert!(DocumentStore::find(fixture.store.as_ref(), "p1/day1/0")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_time_change_includes_sender() {
        let fixture = setup();
        let (_conn, mut rx) = create_shared_project(&fixture).await;

        fixture
            .room
            .submit_time_change("p1", json!({"activityId": "a1", "start": "10:00"}))
            .await;

        match next_event(&mut rx) {
            ServerEvent::ReceiveTimeChanges(payload) => {
                assert_eq!(payload["activityId"], "a1");
            }
            other => panic!("expected receive-time-changes, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_budgets_returns_list_to_sender() {
        let fixture = setup();
        let (_conn, _rx) = create_shared_project(&fixture).await;
        let (other, mut rx_other) = connect(&fixture.registry).await;

        let room = fixture
            .room
            .open_budgets(other, "p1".to_string())
            .await
            .unwrap();
        assert_eq!(room.as_deref(), Some("p1"));

        match next_event(&mut rx_other) {
            ServerEvent::UpdateBudget(budgets) => {
                assert_eq!(budgets.len(), 1);
                assert_eq!(budgets[0].id, UNCATEGORIZED_BUDGET_ID);
            }
            other => panic!("expected update-budget, got {other:?}"),
        }
    }
}
