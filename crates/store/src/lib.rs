//! Relational store: connection pool, scoped sessions, typed
//! repositories, and the token ledger.

pub mod gateway;
pub mod ledger;
pub mod repo;
pub mod rows;

pub use gateway::{Session, StoreGateway};
pub use ledger::{BillingSettings, TokenLedger, TokenPackage, TokenStats};
pub use repo::stats::{hour_bucket, AggregatedStats, StatsDelta};
pub use repo::users::UserProfile;
