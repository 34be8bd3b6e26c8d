//! # tripsync-collab — Real-time collaboration core for tripsync
//!
//! Multiplayer trip planning over WebSockets: collaborative documents,
//! ephemeral cursor presence, and project rooms whose structural changes
//! are persisted immediately and fanned out to every member.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐     WebSocket       ┌──────────────┐
//! │  Client    │ ◄─────────────────► │ CollabServer │
//! │ (per user) │   JSON events       └──────┬───────┘
//! └────────────┘                            │
//!                              ┌────────────┼──────────────┐
//!                              ▼            ▼              ▼
//!                      ┌────────────┐ ┌───────────┐ ┌─────────────┐
//!                      │ Document   │ │ Presence  │ │ ProjectRoom │
//!                      │ Session    │ │ Channel   │ │ Coordinator │
//!                      └─────┬──────┘ └───────────┘ └──────┬──────┘
//!                            │      SessionRegistry        │
//!                            │      (rooms, fan-out)       │
//!                            ▼                             ▼
//!                      DocumentStore              ProjectStore + UserStore
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Named JSON events (the wire contract)
//! - [`registry`] — Session registry: connections, rooms, fan-out
//! - [`document`] — Per-document session: bootstrap, deltas, snapshots
//! - [`presence`] — Ephemeral cursor broadcast, never persisted
//! - [`project`] — Project room coordinator with denormalized summaries
//! - [`server`] — WebSocket server and event dispatch
//! - [`storage`] — In-memory and RocksDB store implementations

pub mod protocol;
pub mod registry;
pub mod document;
pub mod presence;
pub mod project;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use protocol::{ClientEvent, CursorPayload, ProtocolError, ServerEvent};
pub use registry::{ConnectionId, RegistryStats, SessionRegistry};
pub use document::DocumentSession;
pub use presence::PresenceChannel;
pub use project::{ProjectRoom, project_room};
pub use server::{CollabServer, ServerConfig, ServerStats};
pub use storage::{MemoryStore, RocksStore, StoreConfig};
