//! stride — visual routine sequencing with local-first persistence.
//!
//! The library is the data engine behind the CLI: an embedded key-value
//! [`store`], the one-time tab [`migration`], an optional [`remote`] sync
//! adapter over a hosted real-time database, and the [`controller`] that
//! owns the in-memory dataset and orchestrates the three.

pub mod config;
pub mod controller;
pub mod migration;
pub mod models;
pub mod remote;
pub mod store;

pub use config::Config;
pub use controller::{AppController, ChallengeDraft, ChallengeEdit, SyncStatus, TabEdit};
pub use models::{AppData, Challenge, Icon, Session, Tab, TabColor, TimerType};
pub use remote::RemoteSync;
pub use store::LocalStore;
