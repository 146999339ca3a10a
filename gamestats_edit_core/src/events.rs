use serde::{Deserialize, Serialize};

/// Events queued by the session for UI and scheduler collaborators. Drained
/// via [`crate::session::StatsSession::drain_events`]; serializable so a shell
/// can forward them over whatever transport it uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    LiveStateLoaded {
        achievements: usize,
        stats: usize,
    },
    CommitResult {
        achievements: usize,
        stats: usize,
        ok: bool,
    },
    ValidationRejected {
        id: String,
        reason: String,
    },
}
