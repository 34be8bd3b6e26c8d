//! Wire protocol: named JSON events over WebSocket text frames.
//!
//! Every frame is `{"event": <name>, "data": <payload>}`. Event names are
//! the kebab-case contract the clients already speak; payload fields are
//! camelCase. There is no envelope versioning — both sides agree on the
//! schema out of band.
//!
//! Deltas, cursor ranges, and saved content are opaque
//! [`serde_json::Value`]s relayed verbatim: the server never interprets
//! what the editor serializes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tripsync_core::{Budget, Expense, ItineraryRow, Project, SimpleUser};

/// Cursor/presence payload: who, and where their selection sits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPayload {
    pub id: String,
    pub user: SimpleUser,
    pub range: Value,
}

/// Events a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    GetDocument {
        #[serde(default)]
        document_id: Option<String>,
        #[serde(default)]
        project_id: Option<String>,
    },
    SendDocumentChanges(Value),
    SaveDocument(Value),
    SendCursorChanges(CursorPayload),
    #[serde(rename_all = "camelCase")]
    GetCursors {
        sender_id: String,
        toggle_flag: bool,
    },
    #[serde(rename_all = "camelCase")]
    SendCursorData {
        cursor: Value,
        sender_id: String,
        toggle_flag: bool,
    },
    SendDeleteCursor(String),
    #[serde(rename_all = "camelCase")]
    CreateProject {
        project_id: String,
        project_name: String,
        user_id: String,
        user_list: Vec<SimpleUser>,
    },
    GetProject(String),
    ChangeProjectName(String),
    AddUser(SimpleUser),
    RemoveUser(SimpleUser),
    DeleteProject,
    SendItineraryChanges(Value),
    SaveItinerary(Vec<ItineraryRow>),
    DeleteItineraryActivity(String),
    SendTimeChanges(Value),
    SendLocationChanges(Value),
    GetBudgets(String),
    AddNewBudget(Budget),
    #[serde(rename_all = "camelCase")]
    AddNewExpense {
        budget_id: String,
        expense: Expense,
    },
    DeleteBudget(String),
    #[serde(rename_all = "camelCase")]
    DeleteExpense {
        budget_id: String,
        expense_id: String,
    },
}

/// Events the server sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// First event on every connection: the id peers address this
    /// connection by (stands in for the transport handshake id).
    #[serde(rename_all = "camelCase")]
    Connected { connection_id: String },
    LoadDocument(Value),
    ReceiveDocumentChanges(Value),
    SaveDocumentComplete,
    ReceiveCursorChanges(CursorPayload),
    #[serde(rename_all = "camelCase")]
    SendCursor {
        sender_id: String,
        toggle_flag: bool,
    },
    #[serde(rename_all = "camelCase")]
    ReceiveCursor {
        cursor: Value,
        toggle_flag: bool,
    },
    DeleteCursor(String),
    NewProjectCreated(Project),
    LoadProject(Project),
    ProjectNameUpdated(Project),
    UpdateProject(Project),
    ProjectDeleted(String),
    ReceiveItineraryChanges(Value),
    LoadItinerary(Vec<ItineraryRow>),
    ItineraryActivityDeleted(String),
    ReceiveTimeChanges(Value),
    ReceiveLocationChanges(Value),
    UpdateBudget(Vec<Budget>),
}

impl ClientEvent {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

impl ServerEvent {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    Serialization(String),
    Deserialization(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
            Self::Deserialization(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
