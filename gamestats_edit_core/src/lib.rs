//! Core engine for per-title achievement and statistic editing: a binary
//! schema decoder, a definition catalog, and a validated optimistic mutation
//! layer that commits against a native stats backend. The graphical shell,
//! image caching, and the countdown scheduler live elsewhere and talk to this
//! crate through [`backend::StatsBackend`] and [`events::EngineEvent`].

pub mod backend;
pub mod binary_kv;
pub mod cascade;
pub mod config;
pub mod events;
pub mod schema;
pub mod schema_source;
pub mod session;

pub use backend::{StatValue, StatsBackend};
pub use binary_kv::{decode, DecodeError, KvKind, KvNode, KvValue};
pub use cascade::{CascadeRule, CascadeRuleBook, CascadeRuleSet};
pub use config::EngineConfig;
pub use events::EngineEvent;
pub use schema::{
    build_catalog, AchievementDefinition, FloatStatDefinition, IntStatDefinition, SchemaCatalog,
    StatDefinition,
};
pub use schema_source::{load_catalog, load_schema_bytes};
pub use session::{
    AchievementState, CommitError, StatState, StatsSession, ValidationError,
};
