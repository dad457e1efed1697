use crate::{
    ActivityLedger, ThreadId, ThreadItem, ThreadSortKey, ThreadSummary, TurnId, WorkspaceId,
};

#[derive(Clone, Debug)]
pub enum Action {
    EnsureThread {
        workspace_id: WorkspaceId,
        thread_id: ThreadId,
    },
    HideThread {
        workspace_id: WorkspaceId,
        thread_id: ThreadId,
    },
    RemoveThread {
        workspace_id: WorkspaceId,
        thread_id: ThreadId,
    },
    SetActiveThread {
        workspace_id: WorkspaceId,
        thread_id: Option<ThreadId>,
    },
    SetThreadParent {
        thread_id: ThreadId,
        parent_id: Option<ThreadId>,
    },
    MarkProcessing {
        thread_id: ThreadId,
        is_processing: bool,
        at_ms: u64,
    },
    SetActiveTurn {
        thread_id: ThreadId,
        turn_id: Option<TurnId>,
    },
    MarkReviewing {
        thread_id: ThreadId,
        is_reviewing: bool,
    },
    MarkUnread {
        thread_id: ThreadId,
        has_unread: bool,
    },
    SetThreadName {
        thread_id: ThreadId,
        name: String,
    },
    SetThreadTimestamp {
        thread_id: ThreadId,
        updated_at_ms: u64,
    },
    SetThreadModel {
        thread_id: ThreadId,
        model_id: Option<String>,
        reasoning_effort: Option<String>,
    },
    SetThreads {
        workspace_id: WorkspaceId,
        threads: Vec<ThreadSummary>,
        preserve_anchors: bool,
    },
    SetSortKey {
        workspace_id: WorkspaceId,
        sort_key: ThreadSortKey,
    },
    SetThreadListLoading {
        workspace_id: WorkspaceId,
        is_loading: bool,
    },
    SetThreadResumeLoading {
        thread_id: ThreadId,
        is_loading: bool,
    },
    SetThreadListPaging {
        workspace_id: WorkspaceId,
        is_paging: bool,
    },
    SetThreadListCursor {
        workspace_id: WorkspaceId,
        cursor: Option<String>,
    },
    SetThreadItems {
        thread_id: ThreadId,
        items: Vec<ThreadItem>,
    },
    AppendThreadItem {
        thread_id: ThreadId,
        item: ThreadItem,
    },
    SetLastAgentMessage {
        thread_id: ThreadId,
        text: String,
    },
    SetThreadDiff {
        thread_id: ThreadId,
        diff: Option<String>,
    },
    SetThreadPlan {
        thread_id: ThreadId,
        plan: Option<serde_json::Value>,
    },
    SeedActivityLedger {
        ledger: ActivityLedger,
    },
    NoteThreadActivity {
        workspace_id: WorkspaceId,
        thread_id: ThreadId,
        at_ms: u64,
    },
}
