use crate::{SyncTuning, pagination};
use anyhow::Context as _;
use serde_json::Value;
use skein_domain::{
    Action, ActivityLedgerStore, PAGE_RESTART_CURSOR, ResumePayload, SyncState, ThreadId,
    ThreadRecord, ThreadRpcService, ThreadSortKey, ThreadSummary, TurnSignal, WorkspaceId,
    WorkspaceTarget, classify_latest_turn, extract_thread_id,
    listing::{self, AnchorContext},
    now_unix_ms,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Published for every state transition and every degraded operation. UI
/// layers mirror the store from `Action` events; `OperationFailed` is the
/// debug/telemetry sink: nothing in this subsystem surfaces a blocking error.
#[derive(Clone, Debug)]
pub enum SyncEvent {
    Action { rev: u64, action: Action },
    OperationFailed {
        op: &'static str,
        workspace_id: Option<WorkspaceId>,
        thread_id: Option<ThreadId>,
        message: String,
    },
}

#[derive(Clone, Debug)]
pub struct ListOptions {
    /// When set, the refresh is silent: no list-loading flag flips.
    pub preserve_state: bool,
    pub sort_key: ThreadSortKey,
    /// Page budget override for this fetch.
    pub max_pages: Option<usize>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            preserve_state: true,
            sort_key: ThreadSortKey::UpdatedAt,
            max_pages: None,
        }
    }
}

#[derive(Clone)]
pub struct ThreadSyncHandle {
    tx: mpsc::Sender<SyncCommand>,
}

impl ThreadSyncHandle {
    /// Starts a new thread in the workspace. Returns the new id, or None on
    /// any failure (failures are reported on the event stream only).
    pub async fn start_thread(
        &self,
        workspace_id: WorkspaceId,
        activate: bool,
    ) -> Option<ThreadId> {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(SyncCommand::StartThread {
                workspace_id,
                activate,
                reply: tx,
            })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    /// Re-synchronizes a thread from the server. Safe to call concurrently
    /// for the same thread; overlapping calls are deduplicated. Returns true
    /// when the thread is in sync afterwards (including the skip paths).
    pub async fn resume_thread(
        &self,
        workspace_id: WorkspaceId,
        thread_id: ThreadId,
        force: bool,
        replace_local: bool,
    ) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(SyncCommand::ResumeThread {
                workspace_id,
                thread_id,
                force,
                replace_local,
                reply: tx,
            })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Forks a thread and hydrates the fork from the server's fresh copy.
    pub async fn fork_thread(
        &self,
        workspace_id: WorkspaceId,
        thread_id: ThreadId,
        activate: bool,
    ) -> Option<ThreadId> {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(SyncCommand::ForkThread {
                workspace_id,
                thread_id,
                activate,
                reply: tx,
            })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    /// Forced replace-local resume for a thread known to be stale.
    pub async fn refresh_thread(&self, workspace_id: WorkspaceId, thread_id: ThreadId) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(SyncCommand::RefreshThread {
                workspace_id,
                thread_id,
                reply: tx,
            })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// One paged fetch serving every target workspace; resolves when all
    /// per-workspace lists have been dispatched.
    pub async fn list_threads(&self, targets: Vec<WorkspaceTarget>, options: ListOptions) {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(SyncCommand::ListThreads {
                targets,
                options,
                reply: tx,
            })
            .await
            .is_err()
        {
            return;
        }
        let _ = rx.await;
    }

    /// Extends one workspace's visible list past its current window.
    pub async fn load_older_threads(&self, target: WorkspaceTarget) {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(SyncCommand::LoadOlderThreads { target, reply: tx })
            .await
            .is_err()
        {
            return;
        }
        let _ = rx.await;
    }

    /// Fire-and-forget. A failure is logged and reported on the event
    /// stream; local removal is the caller's responsibility either way.
    pub async fn archive_thread(&self, workspace_id: WorkspaceId, thread_id: ThreadId) {
        let _ = self
            .tx
            .send(SyncCommand::ArchiveThread {
                workspace_id,
                thread_id,
            })
            .await;
    }

    /// Direct passthrough into the store, for the streaming-event consumer
    /// and UI intents. Returns the revision after the action applied.
    pub async fn dispatch(&self, action: Action) -> anyhow::Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(SyncCommand::Dispatch {
                action: Box::new(action),
                reply: tx,
            })
            .await
            .ok()
            .context("engine unavailable")?;
        rx.await.context("engine stopped")
    }

    pub async fn state(&self) -> anyhow::Result<SyncState> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(SyncCommand::GetState { reply: tx })
            .await
            .ok()
            .context("engine unavailable")?;
        rx.await.context("engine stopped")
    }

    pub async fn current_rev(&self) -> anyhow::Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(SyncCommand::GetRev { reply: tx })
            .await
            .ok()
            .context("engine unavailable")?;
        rx.await.context("engine stopped")
    }
}

enum SyncCommand {
    StartThread {
        workspace_id: WorkspaceId,
        activate: bool,
        reply: oneshot::Sender<Option<ThreadId>>,
    },
    ResumeThread {
        workspace_id: WorkspaceId,
        thread_id: ThreadId,
        force: bool,
        replace_local: bool,
        reply: oneshot::Sender<bool>,
    },
    ForkThread {
        workspace_id: WorkspaceId,
        thread_id: ThreadId,
        activate: bool,
        reply: oneshot::Sender<Option<ThreadId>>,
    },
    RefreshThread {
        workspace_id: WorkspaceId,
        thread_id: ThreadId,
        reply: oneshot::Sender<bool>,
    },
    ListThreads {
        targets: Vec<WorkspaceTarget>,
        options: ListOptions,
        reply: oneshot::Sender<()>,
    },
    LoadOlderThreads {
        target: WorkspaceTarget,
        reply: oneshot::Sender<()>,
    },
    ArchiveThread {
        workspace_id: WorkspaceId,
        thread_id: ThreadId,
    },
    Dispatch {
        action: Box<Action>,
        reply: oneshot::Sender<u64>,
    },
    GetState {
        reply: oneshot::Sender<SyncState>,
    },
    GetRev {
        reply: oneshot::Sender<u64>,
    },

    StartSettled {
        workspace_id: WorkspaceId,
        activate: bool,
        outcome: Result<Value, String>,
        reply: oneshot::Sender<Option<ThreadId>>,
    },
    ResumeSettled {
        workspace_id: WorkspaceId,
        thread_id: ThreadId,
        replace_local: bool,
        outcome: Result<Value, String>,
        reply: oneshot::Sender<bool>,
    },
    ForkSettled {
        workspace_id: WorkspaceId,
        activate: bool,
        outcome: Result<Value, String>,
        reply: oneshot::Sender<Option<ThreadId>>,
    },
    ListSettled {
        targets: Vec<WorkspaceTarget>,
        options: ListOptions,
        outcome: Result<pagination::ForwardFill, String>,
        reply: oneshot::Sender<()>,
    },
    OlderSettled {
        target: WorkspaceTarget,
        outcome: Result<pagination::OlderFill, String>,
        reply: oneshot::Sender<()>,
    },
}

pub struct ThreadSyncEngine {
    state: SyncState,
    rev: u64,
    rpc: Arc<dyn ThreadRpcService>,
    ledger_store: Arc<dyn ActivityLedgerStore>,
    tuning: SyncTuning,
    events: broadcast::Sender<SyncEvent>,
    tx: mpsc::Sender<SyncCommand>,

    // Process-scoped concurrency cells, never visible to UI code.
    resume_inflight: HashMap<ThreadId, u32>,
    loaded: HashSet<ThreadId>,
    replace_next_resume: HashSet<ThreadId>,
    ledger_dirty: bool,
}

impl ThreadSyncEngine {
    pub fn start(
        rpc: Arc<dyn ThreadRpcService>,
        ledger_store: Arc<dyn ActivityLedgerStore>,
    ) -> (ThreadSyncHandle, broadcast::Sender<SyncEvent>) {
        Self::start_with_tuning(rpc, ledger_store, SyncTuning::default())
    }

    pub fn start_with_tuning(
        rpc: Arc<dyn ThreadRpcService>,
        ledger_store: Arc<dyn ActivityLedgerStore>,
        tuning: SyncTuning,
    ) -> (ThreadSyncHandle, broadcast::Sender<SyncEvent>) {
        let (tx, mut rx) = mpsc::channel::<SyncCommand>(256);
        let (events, _) = broadcast::channel::<SyncEvent>(256);

        let mut engine = Self {
            state: SyncState::new(),
            rev: 0,
            rpc,
            ledger_store,
            tuning,
            events: events.clone(),
            tx: tx.clone(),
            resume_inflight: HashMap::new(),
            loaded: HashSet::new(),
            replace_next_resume: HashSet::new(),
            ledger_dirty: false,
        };

        tokio::spawn(async move {
            engine.bootstrap().await;
            while let Some(cmd) = rx.recv().await {
                engine.handle(cmd);
            }
        });

        (ThreadSyncHandle { tx }, events)
    }

    async fn bootstrap(&mut self) {
        let store = self.ledger_store.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load())
            .await
            .ok()
            .unwrap_or_else(|| Err("failed to join ledger load task".to_owned()));
        match loaded {
            Ok(ledger) => {
                self.dispatch(Action::SeedActivityLedger { ledger });
            }
            Err(message) => {
                tracing::warn!(error = %message, "failed to load activity ledger");
            }
        }
    }

    fn handle(&mut self, cmd: SyncCommand) {
        match cmd {
            SyncCommand::StartThread {
                workspace_id,
                activate,
                reply,
            } => self.begin_start(workspace_id, activate, reply),
            SyncCommand::ResumeThread {
                workspace_id,
                thread_id,
                force,
                replace_local,
                reply,
            } => self.begin_resume(workspace_id, thread_id, force, replace_local, reply),
            SyncCommand::ForkThread {
                workspace_id,
                thread_id,
                activate,
                reply,
            } => self.begin_fork(workspace_id, thread_id, activate, reply),
            SyncCommand::RefreshThread {
                workspace_id,
                thread_id,
                reply,
            } => self.begin_resume(workspace_id, thread_id, true, true, reply),
            SyncCommand::ListThreads {
                targets,
                options,
                reply,
            } => self.begin_list(targets, options, reply),
            SyncCommand::LoadOlderThreads { target, reply } => {
                self.begin_load_older(target, reply)
            }
            SyncCommand::ArchiveThread {
                workspace_id,
                thread_id,
            } => self.begin_archive(workspace_id, thread_id),
            SyncCommand::Dispatch { action, reply } => {
                let action = *action;
                if let Action::SetThreadTimestamp {
                    thread_id,
                    updated_at_ms,
                } = &action
                {
                    let (thread_id, at_ms) = (thread_id.clone(), *updated_at_ms);
                    self.note_activity_for_thread(&thread_id, at_ms);
                }
                self.dispatch(action);
                let _ = reply.send(self.rev);
            }
            SyncCommand::GetState { reply } => {
                let _ = reply.send(self.state.clone());
            }
            SyncCommand::GetRev { reply } => {
                let _ = reply.send(self.rev);
            }
            SyncCommand::StartSettled {
                workspace_id,
                activate,
                outcome,
                reply,
            } => self.finish_start(workspace_id, activate, outcome, reply),
            SyncCommand::ResumeSettled {
                workspace_id,
                thread_id,
                replace_local,
                outcome,
                reply,
            } => self.finish_resume(workspace_id, thread_id, replace_local, outcome, reply),
            SyncCommand::ForkSettled {
                workspace_id,
                activate,
                outcome,
                reply,
            } => self.finish_fork(workspace_id, activate, outcome, reply),
            SyncCommand::ListSettled {
                targets,
                options,
                outcome,
                reply,
            } => self.finish_list(targets, options, outcome, reply),
            SyncCommand::OlderSettled {
                target,
                outcome,
                reply,
            } => self.finish_load_older(target, outcome, reply),
        }
    }

    /// Applies an action; bumps the revision and publishes only when the
    /// reducer reports an actual change.
    fn dispatch(&mut self, action: Action) -> bool {
        let changed = self.state.apply(action.clone());
        if changed {
            self.rev = self.rev.saturating_add(1);
            let _ = self.events.send(SyncEvent::Action {
                rev: self.rev,
                action,
            });
        }
        changed
    }

    fn publish_failure(
        &self,
        op: &'static str,
        workspace_id: Option<&WorkspaceId>,
        thread_id: Option<&ThreadId>,
        message: String,
    ) {
        let _ = self.events.send(SyncEvent::OperationFailed {
            op,
            workspace_id: workspace_id.cloned(),
            thread_id: thread_id.cloned(),
            message,
        });
    }

    fn note_activity_for_thread(&mut self, thread_id: &ThreadId, at_ms: u64) {
        let owners: Vec<WorkspaceId> = self
            .state
            .workspaces
            .iter()
            .filter(|(_, workspace)| workspace.contains(thread_id))
            .map(|(id, _)| id.clone())
            .collect();
        for workspace_id in owners {
            if self.dispatch(Action::NoteThreadActivity {
                workspace_id,
                thread_id: thread_id.clone(),
                at_ms,
            }) {
                self.ledger_dirty = true;
            }
        }
    }

    fn persist_ledger_if_dirty(&mut self) {
        if !self.ledger_dirty {
            return;
        }
        self.ledger_dirty = false;
        let store = self.ledger_store.clone();
        let ledger = self.state.ledger.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let saved = tokio::task::spawn_blocking(move || store.save(&ledger))
                .await
                .ok()
                .unwrap_or_else(|| Err("failed to join ledger save task".to_owned()));
            if let Err(message) = saved {
                tracing::warn!(error = %message, "failed to persist activity ledger");
                let _ = events.send(SyncEvent::OperationFailed {
                    op: "save_ledger",
                    workspace_id: None,
                    thread_id: None,
                    message,
                });
            }
        });
    }

    fn begin_start(
        &mut self,
        workspace_id: WorkspaceId,
        activate: bool,
        reply: oneshot::Sender<Option<ThreadId>>,
    ) {
        let rpc = self.rpc.clone();
        let tx = self.tx.clone();
        let rpc_workspace = workspace_id.clone();
        tokio::spawn(async move {
            let outcome =
                tokio::task::spawn_blocking(move || rpc.start_thread(&rpc_workspace))
                    .await
                    .ok()
                    .unwrap_or_else(|| Err("start task panicked".to_owned()));
            let _ = tx
                .send(SyncCommand::StartSettled {
                    workspace_id,
                    activate,
                    outcome,
                    reply,
                })
                .await;
        });
    }

    fn finish_start(
        &mut self,
        workspace_id: WorkspaceId,
        activate: bool,
        outcome: Result<Value, String>,
        reply: oneshot::Sender<Option<ThreadId>>,
    ) {
        let thread_id = match outcome {
            Ok(payload) => extract_thread_id(&payload),
            Err(message) => {
                tracing::error!(workspace = %workspace_id, error = %message, "start_thread failed");
                self.publish_failure("start_thread", Some(&workspace_id), None, message);
                let _ = reply.send(None);
                return;
            }
        };
        let Some(thread_id) = thread_id else {
            self.publish_failure(
                "start_thread",
                Some(&workspace_id),
                None,
                "response carried no thread id".to_owned(),
            );
            let _ = reply.send(None);
            return;
        };

        self.dispatch(Action::EnsureThread {
            workspace_id: workspace_id.clone(),
            thread_id: thread_id.clone(),
        });
        if activate {
            self.dispatch(Action::SetActiveThread {
                workspace_id,
                thread_id: Some(thread_id.clone()),
            });
        }
        let _ = reply.send(Some(thread_id));
    }

    fn begin_resume(
        &mut self,
        workspace_id: WorkspaceId,
        thread_id: ThreadId,
        force: bool,
        replace_local: bool,
        reply: oneshot::Sender<bool>,
    ) {
        let replace_local = replace_local || self.replace_next_resume.remove(&thread_id);

        if !force {
            // A hydrated thread that is mid-turn keeps streaming; a fetch now
            // would be stale by the time it lands.
            if self.tuning.skip_resume_while_processing
                && self.state.is_processing(&thread_id)
                && self.loaded.contains(&thread_id)
            {
                let _ = reply.send(true);
                return;
            }
            if self.loaded.contains(&thread_id) {
                let _ = reply.send(true);
                return;
            }
        }

        let count = self.resume_inflight.entry(thread_id.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.dispatch(Action::SetThreadResumeLoading {
                thread_id: thread_id.clone(),
                is_loading: true,
            });
        }

        let rpc = self.rpc.clone();
        let tx = self.tx.clone();
        let rpc_workspace = workspace_id.clone();
        let rpc_thread = thread_id.clone();
        tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || {
                rpc.resume_thread(&rpc_workspace, &rpc_thread)
            })
            .await
            .ok()
            .unwrap_or_else(|| Err("resume task panicked".to_owned()));
            let _ = tx
                .send(SyncCommand::ResumeSettled {
                    workspace_id,
                    thread_id,
                    replace_local,
                    outcome,
                    reply,
                })
                .await;
        });
    }

    fn finish_resume(
        &mut self,
        workspace_id: WorkspaceId,
        thread_id: ThreadId,
        replace_local: bool,
        outcome: Result<Value, String>,
        reply: oneshot::Sender<bool>,
    ) {
        let ok = match outcome {
            Ok(payload) => {
                self.merge_resume_payload(&workspace_id, &thread_id, &payload, replace_local);
                true
            }
            Err(message) => {
                tracing::error!(
                    workspace = %workspace_id,
                    thread = %thread_id,
                    error = %message,
                    "resume_thread failed"
                );
                self.publish_failure(
                    "resume_thread",
                    Some(&workspace_id),
                    Some(&thread_id),
                    message,
                );
                false
            }
        };

        // The reference-counted guard: only the last overlapping resume to
        // settle flips the loading flag back.
        if let Some(count) = self.resume_inflight.get_mut(&thread_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.resume_inflight.remove(&thread_id);
                self.dispatch(Action::SetThreadResumeLoading {
                    thread_id,
                    is_loading: false,
                });
            }
        }

        let _ = reply.send(ok);
    }

    fn merge_resume_payload(
        &mut self,
        workspace_id: &WorkspaceId,
        thread_id: &ThreadId,
        payload: &Value,
        replace_local: bool,
    ) {
        let resume = ResumePayload::from_value(payload);
        self.loaded.insert(thread_id.clone());

        self.dispatch(Action::EnsureThread {
            workspace_id: workspace_id.clone(),
            thread_id: thread_id.clone(),
        });
        if let Some(name) = resume.name.clone() {
            self.dispatch(Action::SetThreadName {
                thread_id: thread_id.clone(),
                name,
            });
        }
        if let Some(updated_at_ms) = resume.updated_at_ms {
            self.dispatch(Action::SetThreadTimestamp {
                thread_id: thread_id.clone(),
                updated_at_ms,
            });
            self.note_activity_for_thread(thread_id, updated_at_ms);
        }
        if let Some(parent_id) = resume.parent_id.clone() {
            self.dispatch(Action::SetThreadParent {
                thread_id: thread_id.clone(),
                parent_id: Some(parent_id),
            });
        }
        if resume.model_id.is_some() || resume.reasoning_effort.is_some() {
            self.dispatch(Action::SetThreadModel {
                thread_id: thread_id.clone(),
                model_id: resume.model_id.clone(),
                reasoning_effort: resume.reasoning_effort.clone(),
            });
        }

        // Server items only land when they cannot clobber local optimistic
        // state: either the caller asked for a replace or nothing unsynced
        // exists locally.
        if replace_local || !self.state.has_unsynced_items(thread_id) {
            self.dispatch(Action::SetThreadItems {
                thread_id: thread_id.clone(),
                items: resume.items(),
            });
            if let Some(text) = resume.last_agent_message() {
                self.dispatch(Action::SetLastAgentMessage {
                    thread_id: thread_id.clone(),
                    text,
                });
            }
        }

        // Status is decided against state as of now, not as of the request:
        // a stream event may have arrived while the resume was in flight.
        match classify_latest_turn(&resume.turns) {
            Some(TurnSignal::ConfidentIdle) => {
                self.dispatch(Action::MarkProcessing {
                    thread_id: thread_id.clone(),
                    is_processing: false,
                    at_ms: now_unix_ms(),
                });
                self.dispatch(Action::SetActiveTurn {
                    thread_id: thread_id.clone(),
                    turn_id: None,
                });
            }
            Some(TurnSignal::ConfidentActive {
                turn_id,
                started_at_ms,
            }) => {
                self.dispatch(Action::MarkProcessing {
                    thread_id: thread_id.clone(),
                    is_processing: true,
                    at_ms: started_at_ms.unwrap_or_else(now_unix_ms),
                });
                self.dispatch(Action::SetActiveTurn {
                    thread_id: thread_id.clone(),
                    turn_id: Some(turn_id),
                });
            }
            Some(TurnSignal::Ambiguous) | None => {
                // No confident remote signal: local processing state and the
                // locally-tracked active turn stand.
            }
        }
    }

    fn begin_fork(
        &mut self,
        workspace_id: WorkspaceId,
        thread_id: ThreadId,
        activate: bool,
        reply: oneshot::Sender<Option<ThreadId>>,
    ) {
        let rpc = self.rpc.clone();
        let tx = self.tx.clone();
        let rpc_workspace = workspace_id.clone();
        tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || {
                rpc.fork_thread(&rpc_workspace, &thread_id)
            })
            .await
            .ok()
            .unwrap_or_else(|| Err("fork task panicked".to_owned()));
            let _ = tx
                .send(SyncCommand::ForkSettled {
                    workspace_id,
                    activate,
                    outcome,
                    reply,
                })
                .await;
        });
    }

    fn finish_fork(
        &mut self,
        workspace_id: WorkspaceId,
        activate: bool,
        outcome: Result<Value, String>,
        reply: oneshot::Sender<Option<ThreadId>>,
    ) {
        let fork_id = match outcome {
            Ok(payload) => extract_thread_id(&payload),
            Err(message) => {
                tracing::error!(workspace = %workspace_id, error = %message, "fork_thread failed");
                self.publish_failure("fork_thread", Some(&workspace_id), None, message);
                let _ = reply.send(None);
                return;
            }
        };
        let Some(fork_id) = fork_id else {
            self.publish_failure(
                "fork_thread",
                Some(&workspace_id),
                None,
                "response carried no thread id".to_owned(),
            );
            let _ = reply.send(None);
            return;
        };

        self.dispatch(Action::EnsureThread {
            workspace_id: workspace_id.clone(),
            thread_id: fork_id.clone(),
        });
        if activate {
            self.dispatch(Action::SetActiveThread {
                workspace_id: workspace_id.clone(),
                thread_id: Some(fork_id.clone()),
            });
        }

        // A fork never shares local optimistic state with its source; it is
        // hydrated from the server's fresh copy.
        self.loaded.remove(&fork_id);
        self.replace_next_resume.insert(fork_id.clone());

        let (done_tx, done_rx) = oneshot::channel();
        self.begin_resume(workspace_id, fork_id.clone(), true, true, done_tx);
        tokio::spawn(async move {
            let _ = done_rx.await;
            let _ = reply.send(Some(fork_id));
        });
    }

    fn begin_list(
        &mut self,
        targets: Vec<WorkspaceTarget>,
        options: ListOptions,
        reply: oneshot::Sender<()>,
    ) {
        if targets.is_empty() {
            let _ = reply.send(());
            return;
        }
        let requester = targets
            .iter()
            .find(|t| t.connected)
            .unwrap_or(&targets[0])
            .id
            .clone();

        if !options.preserve_state {
            for target in &targets {
                self.dispatch(Action::SetThreadListLoading {
                    workspace_id: target.id.clone(),
                    is_loading: true,
                });
            }
        }

        let rpc = self.rpc.clone();
        let tx = self.tx.clone();
        let sort_key = options.sort_key;
        let page_size = self.tuning.list_page_size;
        let max_pages = options.max_pages.unwrap_or(self.tuning.max_list_pages);
        let window_target = self.tuning.window_target;
        let fill_targets = targets.clone();
        tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || {
                pagination::fill_forward(
                    rpc.as_ref(),
                    &requester,
                    &fill_targets,
                    sort_key,
                    page_size,
                    max_pages,
                    window_target,
                )
            })
            .await
            .ok()
            .unwrap_or_else(|| Err("list task panicked".to_owned()));
            let _ = tx
                .send(SyncCommand::ListSettled {
                    targets,
                    options,
                    outcome,
                    reply,
                })
                .await;
        });
    }

    fn finish_list(
        &mut self,
        targets: Vec<WorkspaceTarget>,
        options: ListOptions,
        outcome: Result<pagination::ForwardFill, String>,
        reply: oneshot::Sender<()>,
    ) {
        let fill = match outcome {
            Ok(fill) => fill,
            Err(message) => {
                tracing::error!(error = %message, "list_threads failed");
                self.publish_failure("list_threads", None, None, message);
                if !options.preserve_state {
                    for target in &targets {
                        self.dispatch(Action::SetThreadListLoading {
                            workspace_id: target.id.clone(),
                            is_loading: false,
                        });
                    }
                }
                let _ = reply.send(());
                return;
            }
        };

        let records = listing::dedupe_by_id(fill.records.clone());
        let partitions = listing::partition_records(&records, &targets);

        for target in &targets {
            let workspace_records = partitions.get(&target.id).cloned().unwrap_or_default();
            self.apply_workspace_listing(target, workspace_records, &options, &fill);
        }

        self.persist_ledger_if_dirty();
        let _ = reply.send(());
    }

    fn apply_workspace_listing(
        &mut self,
        target: &WorkspaceTarget,
        records: Vec<ThreadRecord>,
        options: &ListOptions,
        fill: &pagination::ForwardFill,
    ) {
        for record in &records {
            let observed = record.updated_at_ms.max(record.created_at_ms);
            if observed > 0
                && self.dispatch(Action::NoteThreadActivity {
                    workspace_id: target.id.clone(),
                    thread_id: record.id.clone(),
                    at_ms: observed,
                })
            {
                self.ledger_dirty = true;
            }
            if let Some(parent_id) = &record.parent_id {
                self.dispatch(Action::SetThreadParent {
                    thread_id: record.id.clone(),
                    parent_id: Some(parent_id.clone()),
                });
            }
        }

        let mut summaries: Vec<ThreadSummary> =
            records.iter().map(ThreadRecord::to_summary).collect();
        let ledger_slice = self.state.ledger.workspace(&target.id).cloned();
        listing::sort_summaries(&mut summaries, options.sort_key, ledger_slice.as_ref());

        let total = summaries.len();
        let window = {
            let processing: HashMap<ThreadId, Option<u64>> = self
                .state
                .activity
                .iter()
                .filter(|(_, activity)| activity.is_processing)
                .map(|(id, activity)| (id.clone(), activity.processing_started_at_ms))
                .collect();
            let active = self
                .state
                .workspace(&target.id)
                .and_then(|w| w.active_thread_id.clone());
            let ctx = AnchorContext {
                active_thread_id: active.as_ref(),
                processing_started: &processing,
                parents: &self.state.parents,
                ledger: ledger_slice.as_ref(),
            };
            listing::visible_window(summaries, self.tuning.window_target, &ctx)
        };

        // Truncation drops real records; the restart sentinel makes the next
        // older-page pass rediscover them from page one. An untruncated
        // workspace keeps the server cursor it can continue from.
        let cursor = if total > self.tuning.window_target {
            Some(PAGE_RESTART_CURSOR.to_owned())
        } else if let Some(boundary) = fill.boundary_cursors.get(&target.id) {
            boundary.clone()
        } else {
            fill.next_cursor.clone()
        };

        self.dispatch(Action::SetSortKey {
            workspace_id: target.id.clone(),
            sort_key: options.sort_key,
        });
        self.dispatch(Action::SetThreads {
            workspace_id: target.id.clone(),
            threads: window,
            preserve_anchors: true,
        });
        self.dispatch(Action::SetThreadListCursor {
            workspace_id: target.id.clone(),
            cursor,
        });
        if !options.preserve_state {
            self.dispatch(Action::SetThreadListLoading {
                workspace_id: target.id.clone(),
                is_loading: false,
            });
        }
    }

    fn begin_load_older(&mut self, target: WorkspaceTarget, reply: oneshot::Sender<()>) {
        let Some(workspace) = self.state.workspace(&target.id) else {
            let _ = reply.send(());
            return;
        };
        if workspace.paging_older {
            let _ = reply.send(());
            return;
        }
        let Some(cursor) = workspace.cursor.clone() else {
            let _ = reply.send(());
            return;
        };
        let seen: HashSet<ThreadId> = workspace.threads.iter().map(|t| t.id.clone()).collect();
        let sort_key = workspace.sort_key;
        let start_cursor = if cursor == PAGE_RESTART_CURSOR {
            None
        } else {
            Some(cursor)
        };

        self.dispatch(Action::SetThreadListPaging {
            workspace_id: target.id.clone(),
            is_paging: true,
        });

        let rpc = self.rpc.clone();
        let tx = self.tx.clone();
        let page_size = self.tuning.list_page_size;
        let batch_target = self.tuning.window_target;
        let page_cap = self.tuning.older_page_cap;
        let max_without_match = self.tuning.older_pages_without_match;
        let fill_target = target.clone();
        tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || {
                pagination::fill_older(
                    rpc.as_ref(),
                    &fill_target.id,
                    &fill_target,
                    &seen,
                    start_cursor.as_deref(),
                    sort_key,
                    page_size,
                    batch_target,
                    page_cap,
                    max_without_match,
                )
            })
            .await
            .ok()
            .unwrap_or_else(|| Err("older threads task panicked".to_owned()));
            let _ = tx
                .send(SyncCommand::OlderSettled {
                    target,
                    outcome,
                    reply,
                })
                .await;
        });
    }

    fn finish_load_older(
        &mut self,
        target: WorkspaceTarget,
        outcome: Result<pagination::OlderFill, String>,
        reply: oneshot::Sender<()>,
    ) {
        match outcome {
            Ok(fill) => {
                for record in &fill.new_records {
                    let observed = record.updated_at_ms.max(record.created_at_ms);
                    if observed > 0
                        && self.dispatch(Action::NoteThreadActivity {
                            workspace_id: target.id.clone(),
                            thread_id: record.id.clone(),
                            at_ms: observed,
                        })
                    {
                        self.ledger_dirty = true;
                    }
                    if let Some(parent_id) = &record.parent_id {
                        self.dispatch(Action::SetThreadParent {
                            thread_id: record.id.clone(),
                            parent_id: Some(parent_id.clone()),
                        });
                    }
                }

                // Existing entries keep their order; only truly new ids land
                // at the tail.
                let mut merged = self
                    .state
                    .workspace(&target.id)
                    .map(|w| w.threads.clone())
                    .unwrap_or_default();
                let mut present: HashSet<ThreadId> =
                    merged.iter().map(|t| t.id.clone()).collect();
                for record in listing::dedupe_by_id(fill.new_records) {
                    if present.insert(record.id.clone()) {
                        merged.push(record.to_summary());
                    }
                }

                self.dispatch(Action::SetThreads {
                    workspace_id: target.id.clone(),
                    threads: merged,
                    preserve_anchors: true,
                });
                self.dispatch(Action::SetThreadListCursor {
                    workspace_id: target.id.clone(),
                    cursor: fill.next_cursor,
                });
                self.persist_ledger_if_dirty();
            }
            Err(message) => {
                tracing::error!(workspace = %target.id, error = %message, "load_older_threads failed");
                self.publish_failure("load_older_threads", Some(&target.id), None, message);
            }
        }

        self.dispatch(Action::SetThreadListPaging {
            workspace_id: target.id,
            is_paging: false,
        });
        let _ = reply.send(());
    }

    fn begin_archive(&mut self, workspace_id: WorkspaceId, thread_id: ThreadId) {
        let rpc = self.rpc.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let rpc_workspace = workspace_id.clone();
            let rpc_thread = thread_id.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                rpc.archive_thread(&rpc_workspace, &rpc_thread)
            })
            .await
            .ok()
            .unwrap_or_else(|| Err("archive task panicked".to_owned()));
            if let Err(message) = outcome {
                tracing::warn!(
                    workspace = %workspace_id,
                    thread = %thread_id,
                    error = %message,
                    "archive_thread failed"
                );
                let _ = events.send(SyncEvent::OperationFailed {
                    op: "archive_thread",
                    workspace_id: Some(workspace_id),
                    thread_id: Some(thread_id),
                    message,
                });
            }
        });
    }
}
