use crate::ActivityLedger;
use std::collections::{HashMap, HashSet};

mod workspace;

pub use workspace::{PAGE_RESTART_CURSOR, WorkspaceThreads};

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(pub(crate) String);

impl WorkspaceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub(crate) String);

impl ThreadId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TurnId(pub(crate) String);

impl TurnId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ThreadSortKey {
    UpdatedAt,
    CreatedAt,
}

impl ThreadSortKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpdatedAt => "updated_at",
            Self::CreatedAt => "created_at",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "updated_at" => Some(Self::UpdatedAt),
            "created_at" => Some(Self::CreatedAt),
            _ => None,
        }
    }
}

impl Default for ThreadSortKey {
    fn default() -> Self {
        Self::UpdatedAt
    }
}

pub const PLACEHOLDER_THREAD_NAME: &str = "New Agent";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThreadSummary {
    pub id: ThreadId,
    pub name: String,
    pub updated_at_ms: u64,
    pub created_at_ms: u64,
    pub model_id: Option<String>,
    pub reasoning_effort: Option<String>,
}

impl ThreadSummary {
    pub fn placeholder(id: ThreadId) -> Self {
        Self {
            id,
            name: PLACEHOLDER_THREAD_NAME.to_owned(),
            updated_at_ms: 0,
            created_at_ms: 0,
            model_id: None,
            reasoning_effort: None,
        }
    }
}

/// Live status of a thread as observed from the event stream and resume
/// payloads. `processing_started_at_ms` is `Some` exactly while a processing
/// interval is open; `last_duration_ms` is set when an interval closes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ThreadActivity {
    pub is_processing: bool,
    pub is_reviewing: bool,
    pub has_unread: bool,
    pub processing_started_at_ms: Option<u64>,
    pub last_duration_ms: Option<u64>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThreadItem {
    pub id: String,
    pub payload: serde_json::Value,
}

#[derive(Clone, Debug, Default)]
pub struct SyncState {
    pub workspaces: HashMap<WorkspaceId, WorkspaceThreads>,
    pub activity: HashMap<ThreadId, ThreadActivity>,
    pub parents: HashMap<ThreadId, ThreadId>,
    pub active_turns: HashMap<ThreadId, TurnId>,
    pub items: HashMap<ThreadId, Vec<ThreadItem>>,
    pub(crate) unsynced_items: HashSet<ThreadId>,
    pub last_agent_message: HashMap<ThreadId, String>,
    pub resume_loading: HashSet<ThreadId>,
    pub diffs: HashMap<ThreadId, String>,
    pub plans: HashMap<ThreadId, serde_json::Value>,
    pub ledger: ActivityLedger,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workspace(&self, workspace_id: &WorkspaceId) -> Option<&WorkspaceThreads> {
        self.workspaces.get(workspace_id)
    }

    pub fn activity_for(&self, thread_id: &ThreadId) -> ThreadActivity {
        self.activity.get(thread_id).copied().unwrap_or_default()
    }

    pub fn is_processing(&self, thread_id: &ThreadId) -> bool {
        self.activity_for(thread_id).is_processing
    }

    pub fn active_turn(&self, thread_id: &ThreadId) -> Option<&TurnId> {
        self.active_turns.get(thread_id)
    }

    pub fn has_unsynced_items(&self, thread_id: &ThreadId) -> bool {
        self.unsynced_items.contains(thread_id)
    }

    pub fn is_resume_loading(&self, thread_id: &ThreadId) -> bool {
        self.resume_loading.contains(thread_id)
    }

    /// Ancestor chain of `thread_id`, nearest parent first. Visited-set
    /// guarded so a malformed parent map cannot loop.
    pub fn ancestor_chain(&self, thread_id: &ThreadId) -> Vec<ThreadId> {
        ancestor_chain(&self.parents, thread_id)
    }
}

pub(crate) fn ancestor_chain(
    parents: &HashMap<ThreadId, ThreadId>,
    thread_id: &ThreadId,
) -> Vec<ThreadId> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    visited.insert(thread_id.clone());
    let mut cursor = thread_id;
    while let Some(parent) = parents.get(cursor) {
        if !visited.insert(parent.clone()) {
            break;
        }
        chain.push(parent.clone());
        cursor = parent;
    }
    chain
}
