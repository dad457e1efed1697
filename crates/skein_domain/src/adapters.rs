use crate::{ActivityLedger, ThreadId, ThreadSortKey, WorkspaceId};
use serde_json::Value;

/// One workspace as seen by the sync engine: an opaque id, the normalized-or-
/// raw root path threads are matched against, and whether the workspace has a
/// live backend connection (connected workspaces are preferred as the list
/// requester).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkspaceTarget {
    pub id: WorkspaceId,
    pub root: String,
    pub connected: bool,
}

impl WorkspaceTarget {
    pub fn new(id: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            id: WorkspaceId::new(id),
            root: root.into(),
            connected: true,
        }
    }
}

/// The remote thread index. Implementations wrap whatever transport carries
/// `thread/*` requests; the engine only ever calls these off its own loop via
/// `spawn_blocking`, so blocking implementations are fine.
pub trait ThreadRpcService: Send + Sync {
    fn start_thread(&self, workspace_id: &WorkspaceId) -> Result<Value, String>;

    fn resume_thread(
        &self,
        workspace_id: &WorkspaceId,
        thread_id: &ThreadId,
    ) -> Result<Value, String>;

    fn fork_thread(
        &self,
        workspace_id: &WorkspaceId,
        thread_id: &ThreadId,
    ) -> Result<Value, String>;

    fn list_threads(
        &self,
        workspace_id: &WorkspaceId,
        cursor: Option<&str>,
        page_size: u32,
        sort_key: ThreadSortKey,
    ) -> Result<Value, String>;

    fn archive_thread(
        &self,
        workspace_id: &WorkspaceId,
        thread_id: &ThreadId,
    ) -> Result<(), String>;
}

/// Durable storage for the activity ledger.
pub trait ActivityLedgerStore: Send + Sync {
    fn load(&self) -> Result<ActivityLedger, String>;

    fn save(&self, ledger: &ActivityLedger) -> Result<(), String>;
}
