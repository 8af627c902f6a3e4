pub mod api;
pub mod cursor;
pub mod offline_queue;
pub mod socket;
