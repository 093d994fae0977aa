// Re-export crates that the server binary also uses directly. This keeps the
// two crates on the same versions of shared dependencies without declaring
// them twice.
pub use anyhow;
pub use strum;

pub mod engine;
pub mod messages;
pub mod player;
pub mod room;
pub mod rules;
pub mod store;
pub mod tile;
