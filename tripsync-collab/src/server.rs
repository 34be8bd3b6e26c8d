//! WebSocket collaboration server.
//!
//! ```text
//! Client A ──┐
//!             ├── SessionRegistry ──┬── DocumentSession ── DocumentStore
//! Client B ──┤    (rooms, fan-out)  ├── PresenceChannel   (never hit by
//! Client C ──┘                      └── ProjectRoom ──┬── ProjectStore
//!                                                     └── UserStore
//! ```
//!
//! One task per connection reads events; a writer task drains the
//! connection's outbound queue. Dispatch is an explicit match over the
//! typed event enum with the connection's room membership carried in an
//! explicit context, so nothing leaks across reconnects. A failing
//! handler is logged and the loop continues — one connection's error
//! never reaches another room.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use tripsync_core::{DocumentStore, ProjectStore, StoreError, UserStore};

use crate::document::DocumentSession;
use crate::presence::PresenceChannel;
use crate::project::ProjectRoom;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::registry::{ConnectionId, SessionRegistry};
use crate::storage::{MemoryStore, RocksStore, StoreConfig};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            storage_path: None,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_events: u64,
}

/// Per-connection dispatch context: which rooms this connection is
/// currently working in. Passed explicitly, never captured in closures.
#[derive(Debug, Default)]
struct ConnectionCtx {
    document_room: Option<String>,
    project_id: Option<String>,
}

/// The collaboration server.
#[derive(Clone)]
pub struct CollabServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    documents: Arc<DocumentSession>,
    presence: Arc<PresenceChannel>,
    projects: Arc<ProjectRoom>,
    document_store: Arc<dyn DocumentStore>,
    project_store: Arc<dyn ProjectStore>,
    user_store: Arc<dyn UserStore>,
    stats: Arc<RwLock<ServerStats>>,
}

impl CollabServer {
    /// Create a server. A configured storage path selects RocksDB,
    /// otherwise everything lives in memory.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let (document_store, project_store, user_store): (
            Arc<dyn DocumentStore>,
            Arc<dyn ProjectStore>,
            Arc<dyn UserStore>,
        ) = match &config.storage_path {
            Some(path) => {
                let store = Arc::new(RocksStore::open(StoreConfig {
                    path: path.clone(),
                    ..StoreConfig::default()
                })?);
                (store.clone(), store.clone(), store)
            }
            None => {
                let store = Arc::new(MemoryStore::new());
                (store.clone(), store.clone(), store)
            }
        };

        let registry = Arc::new(SessionRegistry::new());
        let documents = Arc::new(DocumentSession::new(
            registry.clone(),
            document_store.clone(),
        ));
        let presence = Arc::new(PresenceChannel::new(registry.clone()));
        let projects = Arc::new(ProjectRoom::new(
            registry.clone(),
            project_store.clone(),
            user_store.clone(),
            document_store.clone(),
        ));

        Ok(Self {
            config,
            registry,
            documents,
            presence,
            projects,
            document_store,
            project_store,
            user_store,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        })
    }

    /// Create with default configuration (in-memory, no persistence).
    pub fn with_defaults() -> Result<Self, StoreError> {
        Self::new(ServerConfig::default())
    }

    /// Create with persistence enabled at the given path.
    pub fn with_storage(
        bind_addr: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        Self::new(ServerConfig {
            bind_addr: bind_addr.into(),
            storage_path: Some(path.into()),
        })
    }

    /// Start listening for WebSocket connections. Runs the accept loop.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("tripsync server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, addr).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection end to end.
    async fn handle_connection(
        self,
        stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let conn: ConnectionId = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.registry.register(conn, tx.clone()).await;
        log::info!("Connection {conn} established from {addr}");

        {
            let mut stats = self.stats.write().await;
            stats.total_connections += 1;
            stats.active_connections += 1;
        }

        // Writer task: drain the outbound queue into the socket.
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if ws_sender.send(message).await.is_err() {
                    break;
                }
            }
        });

        self.registry
            .send_to(&conn, &ServerEvent::Connected { connection_id: conn.to_string() })
            .await;

        let mut ctx = ConnectionCtx::default();

        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Text(text)) => match ClientEvent::decode(text.as_str()) {
                    Ok(event) => {
                        self.stats.write().await.total_events += 1;
                        self.dispatch(conn, &mut ctx, event).await;
                    }
                    Err(e) => {
                        log::warn!("Undecodable event from {conn}: {e}");
                    }
                },
                Ok(Message::Ping(data)) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    log::info!("Connection {conn} closed");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    log::error!("WebSocket error from {conn}: {e}");
                    break;
                }
            }
        }

        // Cleanup: evict this connection's cursor, then drop memberships.
        if let Some(room) = &ctx.document_room {
            self.presence
                .remove_cursor(conn, room, conn.to_string())
                .await;
        }
        self.registry.unregister(&conn).await;
        writer.abort();

        let mut stats = self.stats.write().await;
        stats.active_connections -= 1;
        log::info!("Connection {conn} cleaned up");
        Ok(())
    }

    /// Route one decoded event to its component.
    ///
    /// Store failures are logged and swallowed here: the contract is
    /// silent no-response on handler failure, and one handler must never
    /// take the dispatch loop down.
    async fn dispatch(&self, conn: ConnectionId, ctx: &mut ConnectionCtx, event: ClientEvent) {
        match event {
            ClientEvent::GetDocument { document_id, project_id: _ } => {
                match self.documents.open_document(conn, document_id).await {
                    Ok(Some(room)) => ctx.document_room = Some(room),
                    Ok(None) => {}
                    Err(e) => log::error!("get-document failed for {conn}: {e}"),
                }
            }
            ClientEvent::SendDocumentChanges(delta) => {
                if let Some(room) = &ctx.document_room {
                    self.documents.submit_change(conn, room, delta).await;
                } else {
                    log::debug!("send-document-changes from {conn} outside a document room");
                }
            }
            ClientEvent::SaveDocument(content) => {
                if let Some(room) = &ctx.document_room {
                    if let Err(e) = self.documents.save_snapshot(conn, room, content).await {
                        log::error!("save-document failed for {conn}: {e}");
                    }
                }
            }
            ClientEvent::SendCursorChanges(payload) => {
                if let Some(room) = &ctx.document_room {
                    self.presence.submit_cursor(conn, room, payload).await;
                }
            }
            ClientEvent::GetCursors { sender_id, toggle_flag } => {
                if let Some(room) = &ctx.document_room {
                    self.presence
                        .request_cursors(conn, room, sender_id, toggle_flag)
                        .await;
                }
            }
            ClientEvent::SendCursorData { cursor, sender_id, toggle_flag } => {
                self.presence
                    .deliver_cursor_data(cursor, &sender_id, toggle_flag)
                    .await;
            }
            ClientEvent::SendDeleteCursor(id) => {
                if let Some(room) = &ctx.document_room {
                    self.presence.remove_cursor(conn, room, id).await;
                }
            }
            ClientEvent::CreateProject { project_id, project_name, user_id, user_list } => {
                match self
                    .projects
                    .create_project(conn, project_id, project_name, user_id, user_list)
                    .await
                {
                    Ok(project_id) => ctx.project_id = Some(project_id),
                    Err(e) => log::error!("create-project failed for {conn}: {e}"),
                }
            }
            ClientEvent::GetProject(project_id) => {
                match self.projects.open_project(conn, project_id).await {
                    Ok(Some(project_id)) => ctx.project_id = Some(project_id),
                    Ok(None) => {}
                    Err(e) => log::error!("get-project failed for {conn}: {e}"),
                }
            }
            ClientEvent::ChangeProjectName(new_name) => {
                if let Some(project_id) = &ctx.project_id {
                    if let Err(e) = self
                        .projects
                        .rename_project(conn, project_id, new_name)
                        .await
                    {
                        log::error!("change-project-name failed for {conn}: {e}");
                    }
                }
            }
            ClientEvent::AddUser(user) => {
                if let Some(project_id) = &ctx.project_id {
                    if let Err(e) = self.projects.add_member(project_id, user).await {
                        log::error!("add-user failed for {conn}: {e}");
                    }
                }
            }
            ClientEvent::RemoveUser(user) => {
                if let Some(project_id) = &ctx.project_id {
                    if let Err(e) = self.projects.remove_member(project_id, user).await {
                        log::error!("remove-user failed for {conn}: {e}");
                    }
                }
            }
            ClientEvent::DeleteProject => {
                if let Some(project_id) = &ctx.project_id {
                    if let Err(e) = self.projects.delete_project(project_id).await {
                        log::error!("delete-project failed for {conn}: {e}");
                    }
                }
            }
            ClientEvent::SendItineraryChanges(rows) => {
                if let Some(project_id) = &ctx.project_id {
                    self.projects
                        .submit_itinerary_changes(conn, project_id, rows)
                        .await;
                }
            }
            ClientEvent::SaveItinerary(rows) => {
                if let Some(project_id) = &ctx.project_id {
                    if let Err(e) = self.projects.save_itinerary(project_id, rows).await {
                        log::error!("save-itinerary failed for {conn}: {e}");
                    }
                }
            }
            ClientEvent::DeleteItineraryActivity(id_part) => {
                if let Err(e) = self
                    .projects
                    .delete_itinerary_activity(conn, id_part)
                    .await
                {
                    log::error!("delete-itinerary-activity failed for {conn}: {e}");
                }
            }
            ClientEvent::SendTimeChanges(payload) => {
                if let Some(project_id) = &ctx.project_id {
                    self.projects.submit_time_change(project_id, payload).await;
                }
            }
            ClientEvent::SendLocationChanges(payload) => {
                if let Some(project_id) = &ctx.project_id {
                    self.projects
                        .submit_location_change(project_id, payload)
                        .await;
                }
            }
            ClientEvent::GetBudgets(project_id) => {
                match self.projects.open_budgets(conn, project_id).await {
                    Ok(Some(project_id)) => ctx.project_id = Some(project_id),
                    Ok(None) => {}
                    Err(e) => log::error!("get-budgets failed for {conn}: {e}"),
                }
            }
            ClientEvent::AddNewBudget(budget) => {
                if let Some(project_id) = &ctx.project_id {
                    if let Err(e) = self.projects.add_budget(project_id, budget).await {
                        log::error!("add-new-budget failed for {conn}: {e}");
                    }
                }
            }
            ClientEvent::AddNewExpense { budget_id, expense } => {
                if let Some(project_id) = &ctx.project_id {
                    if let Err(e) = self
                        .projects
                        .add_expense(project_id, budget_id, expense)
                        .await
                    {
                        log::error!("add-new-expense failed for {conn}: {e}");
                    }
                }
            }
            ClientEvent::DeleteBudget(budget_id) => {
                if let Some(project_id) = &ctx.project_id {
                    if let Err(e) = self.projects.delete_budget(project_id, budget_id).await {
                        log::error!("delete-budget failed for {conn}: {e}");
                    }
                }
            }
            ClientEvent::DeleteExpense { budget_id, expense_id } => {
                if let Some(project_id) = &ctx.project_id {
                    if let Err(e) = self
                        .projects
                        .delete_expense(project_id, budget_id, expense_id)
                        .await
                    {
                        log::error!("delete-expense failed for {conn}: {e}");
                    }
                }
            }
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn document_store(&self) -> Arc<dyn DocumentStore> {
        self.document_store.clone()
    }

    pub fn project_store(&self) -> Arc<dyn ProjectStore> {
        self.project_store.clone()
    }

    pub fn user_store(&self) -> Arc<dyn UserStore> {
        self.user_store.clone()
    }
}
