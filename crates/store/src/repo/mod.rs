//! Typed repositories over the persisted tables. Methods take a
//! `&mut PgConnection` so they run inside whichever session the caller
//! scoped.

pub mod bots;
pub mod plugin_state;
pub mod stats;
pub mod users;
