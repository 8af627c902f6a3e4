pub mod dirty;
pub mod history;
pub mod objects;
pub mod presence;
pub mod reconcile;
