//! Client synchronization core for collaborative boards.
//!
//! ARCHITECTURE
//! ============
//! - `state`: local projections. Object cache with LWW reconciliation,
//!   dirty tracking, undo history, peer presence and cursors.
//! - `net`: everything that talks to the server. HTTP objects API, offline
//!   queue, websocket connection, cursor throttle.
//! - `session`: `BoardSession` owns one board's state and is the single
//!   serialized surface every local edit and server event goes through.
//!
//! Nothing here locks. A session is owned by one task and mutated through
//! `&mut self`, so cache, queue, tracker and history never interleave.

pub mod config;
pub mod net;
pub mod session;
pub mod state;

pub use config::SessionConfig;
pub use session::{BoardSession, ConnectionStatus};
