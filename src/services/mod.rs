//! Domain services behind the websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! `gateway` owns every object write and is the only caller of the store
//! for mutations. `rooms` and `presence` hold per-process connection
//! state; `relay` stretches rooms across processes. Route handlers stay
//! focused on protocol translation and credential plumbing.

pub mod gateway;
pub mod pg_store;
pub mod presence;
pub mod relay;
pub mod rooms;
pub mod session;
pub mod store;
