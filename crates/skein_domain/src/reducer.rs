use crate::listing::{self, AnchorContext};
use crate::{
    Action, SyncState, ThreadActivity, ThreadId, ThreadItem, ThreadSortKey, ThreadSummary, TurnId,
    WorkspaceId,
};
use std::collections::{HashMap, HashSet};

impl SyncState {
    /// Applies one action. Returns false when the action was a structural
    /// no-op: the state is field-for-field what it was before, and callers
    /// must not re-publish or re-render. Redundant status events off a live
    /// stream rely on this.
    pub fn apply(&mut self, action: Action) -> bool {
        match action {
            Action::EnsureThread {
                workspace_id,
                thread_id,
            } => self.ensure_thread(workspace_id, thread_id),
            Action::HideThread {
                workspace_id,
                thread_id,
            } => self.hide_thread(&workspace_id, &thread_id),
            Action::RemoveThread {
                workspace_id,
                thread_id,
            } => self.remove_thread(&workspace_id, &thread_id),
            Action::SetActiveThread {
                workspace_id,
                thread_id,
            } => self.set_active_thread(workspace_id, thread_id),
            Action::SetThreadParent {
                thread_id,
                parent_id,
            } => self.set_thread_parent(thread_id, parent_id),
            Action::MarkProcessing {
                thread_id,
                is_processing,
                at_ms,
            } => self.update_activity(thread_id, |activity| {
                if is_processing {
                    activity.is_processing = true;
                    if activity.processing_started_at_ms.is_none() {
                        activity.processing_started_at_ms = Some(at_ms);
                    }
                } else {
                    if let Some(started) = activity.processing_started_at_ms.take() {
                        activity.last_duration_ms = Some(at_ms.saturating_sub(started));
                    }
                    activity.is_processing = false;
                }
            }),
            Action::SetActiveTurn { thread_id, turn_id } => {
                self.set_active_turn(thread_id, turn_id)
            }
            Action::MarkReviewing {
                thread_id,
                is_reviewing,
            } => self.update_activity(thread_id, |activity| activity.is_reviewing = is_reviewing),
            Action::MarkUnread {
                thread_id,
                has_unread,
            } => self.update_activity(thread_id, |activity| activity.has_unread = has_unread),
            Action::SetThreadName { thread_id, name } => self.set_thread_name(&thread_id, name),
            Action::SetThreadTimestamp {
                thread_id,
                updated_at_ms,
            } => self.set_thread_timestamp(&thread_id, updated_at_ms),
            Action::SetThreadModel {
                thread_id,
                model_id,
                reasoning_effort,
            } => self.set_thread_model(&thread_id, model_id, reasoning_effort),
            Action::SetThreads {
                workspace_id,
                threads,
                preserve_anchors,
            } => self.set_threads(workspace_id, threads, preserve_anchors),
            Action::SetSortKey {
                workspace_id,
                sort_key,
            } => {
                let workspace = self.workspaces.entry(workspace_id).or_default();
                if workspace.sort_key == sort_key {
                    return false;
                }
                workspace.sort_key = sort_key;
                true
            }
            Action::SetThreadListLoading {
                workspace_id,
                is_loading,
            } => {
                let workspace = self.workspaces.entry(workspace_id).or_default();
                if workspace.list_loading == is_loading {
                    return false;
                }
                workspace.list_loading = is_loading;
                true
            }
            Action::SetThreadResumeLoading {
                thread_id,
                is_loading,
            } => {
                if is_loading {
                    self.resume_loading.insert(thread_id)
                } else {
                    self.resume_loading.remove(&thread_id)
                }
            }
            Action::SetThreadListPaging {
                workspace_id,
                is_paging,
            } => {
                let workspace = self.workspaces.entry(workspace_id).or_default();
                if workspace.paging_older == is_paging {
                    return false;
                }
                workspace.paging_older = is_paging;
                true
            }
            Action::SetThreadListCursor {
                workspace_id,
                cursor,
            } => {
                let workspace = self.workspaces.entry(workspace_id).or_default();
                if workspace.cursor == cursor {
                    return false;
                }
                workspace.cursor = cursor;
                true
            }
            Action::SetThreadItems { thread_id, items } => self.set_thread_items(thread_id, items),
            Action::AppendThreadItem { thread_id, item } => {
                self.append_thread_item(thread_id, item)
            }
            Action::SetLastAgentMessage { thread_id, text } => {
                if self.last_agent_message.get(&thread_id).map(String::as_str)
                    == Some(text.as_str())
                {
                    return false;
                }
                self.last_agent_message.insert(thread_id, text);
                true
            }
            Action::SetThreadDiff { thread_id, diff } => match diff {
                Some(diff) => {
                    if self.diffs.get(&thread_id) == Some(&diff) {
                        return false;
                    }
                    self.diffs.insert(thread_id, diff);
                    true
                }
                None => self.diffs.remove(&thread_id).is_some(),
            },
            Action::SetThreadPlan { thread_id, plan } => match plan {
                Some(plan) => {
                    if self.plans.get(&thread_id) == Some(&plan) {
                        return false;
                    }
                    self.plans.insert(thread_id, plan);
                    true
                }
                None => self.plans.remove(&thread_id).is_some(),
            },
            Action::SeedActivityLedger { ledger } => {
                if self.ledger == ledger {
                    return false;
                }
                self.ledger = ledger;
                true
            }
            Action::NoteThreadActivity {
                workspace_id,
                thread_id,
                at_ms,
            } => self.ledger.note(&workspace_id, &thread_id, at_ms),
        }
    }

    fn ensure_thread(&mut self, workspace_id: WorkspaceId, thread_id: ThreadId) -> bool {
        let workspace = self.workspaces.entry(workspace_id).or_default();
        if workspace.is_hidden(&thread_id) || workspace.contains(&thread_id) {
            return false;
        }
        workspace
            .threads
            .insert(0, ThreadSummary::placeholder(thread_id.clone()));
        self.activity.entry(thread_id.clone()).or_default();
        if workspace.active_thread_id.is_none() {
            workspace.active_thread_id = Some(thread_id);
        }
        true
    }

    fn hide_thread(&mut self, workspace_id: &WorkspaceId, thread_id: &ThreadId) -> bool {
        let Some(workspace) = self.workspaces.get_mut(workspace_id) else {
            return false;
        };
        let mut changed = workspace.hidden.insert(thread_id.clone());
        if let Some(index) = workspace.position(thread_id) {
            workspace.threads.remove(index);
            changed = true;
        }
        if workspace.active_thread_id.as_ref() == Some(thread_id) {
            workspace.active_thread_id = workspace.threads.first().map(|t| t.id.clone());
            changed = true;
        }
        changed
    }

    /// Hard purge. Every per-thread map forgets the id; the hidden set is a
    /// separate mechanism and is deliberately left alone.
    fn remove_thread(&mut self, workspace_id: &WorkspaceId, thread_id: &ThreadId) -> bool {
        let mut changed = false;
        if let Some(workspace) = self.workspaces.get_mut(workspace_id) {
            if let Some(index) = workspace.position(thread_id) {
                workspace.threads.remove(index);
                changed = true;
            }
            if workspace.active_thread_id.as_ref() == Some(thread_id) {
                workspace.active_thread_id = workspace.threads.first().map(|t| t.id.clone());
                changed = true;
            }
        }
        changed |= self.activity.remove(thread_id).is_some();
        changed |= self.parents.remove(thread_id).is_some();
        changed |= self.active_turns.remove(thread_id).is_some();
        changed |= self.items.remove(thread_id).is_some();
        changed |= self.unsynced_items.remove(thread_id);
        changed |= self.last_agent_message.remove(thread_id).is_some();
        changed |= self.resume_loading.remove(thread_id);
        changed |= self.diffs.remove(thread_id).is_some();
        changed |= self.plans.remove(thread_id).is_some();
        changed
    }

    fn set_active_thread(
        &mut self,
        workspace_id: WorkspaceId,
        thread_id: Option<ThreadId>,
    ) -> bool {
        let workspace = self.workspaces.entry(workspace_id).or_default();
        if workspace.active_thread_id == thread_id {
            return false;
        }
        workspace.active_thread_id = thread_id;
        true
    }

    fn set_thread_parent(&mut self, thread_id: ThreadId, parent_id: Option<ThreadId>) -> bool {
        let Some(parent_id) = parent_id else {
            return self.parents.remove(&thread_id).is_some();
        };
        if parent_id == thread_id {
            return false;
        }
        // Refuse a link that would close a cycle through the existing chain.
        let mut visited = HashSet::new();
        let mut cursor = Some(parent_id.clone());
        while let Some(current) = cursor {
            if current == thread_id {
                return false;
            }
            if !visited.insert(current.clone()) {
                break;
            }
            cursor = self.parents.get(&current).cloned();
        }
        if self.parents.get(&thread_id) == Some(&parent_id) {
            return false;
        }
        self.parents.insert(thread_id, parent_id);
        true
    }

    fn update_activity(
        &mut self,
        thread_id: ThreadId,
        update: impl FnOnce(&mut ThreadActivity),
    ) -> bool {
        let current = self.activity.get(&thread_id).copied().unwrap_or_default();
        let mut next = current;
        update(&mut next);
        if next == current {
            return false;
        }
        self.activity.insert(thread_id, next);
        true
    }

    fn set_active_turn(&mut self, thread_id: ThreadId, turn_id: Option<TurnId>) -> bool {
        match turn_id {
            Some(turn_id) => {
                if self.active_turns.get(&thread_id) == Some(&turn_id) {
                    return false;
                }
                self.active_turns.insert(thread_id, turn_id);
                true
            }
            None => self.active_turns.remove(&thread_id).is_some(),
        }
    }

    fn set_thread_name(&mut self, thread_id: &ThreadId, name: String) -> bool {
        let mut changed = false;
        for workspace in self.workspaces.values_mut() {
            if let Some(index) = workspace.position(thread_id)
                && workspace.threads[index].name != name
            {
                workspace.threads[index].name = name.clone();
                changed = true;
            }
        }
        changed
    }

    /// Strictly-greater updates only. Under most-recently-updated ordering
    /// the touched thread moves to the front instead of a full re-sort.
    fn set_thread_timestamp(&mut self, thread_id: &ThreadId, updated_at_ms: u64) -> bool {
        let mut changed = false;
        for workspace in self.workspaces.values_mut() {
            let Some(index) = workspace.position(thread_id) else {
                continue;
            };
            if workspace.threads[index].updated_at_ms >= updated_at_ms {
                continue;
            }
            workspace.threads[index].updated_at_ms = updated_at_ms;
            if workspace.sort_key == ThreadSortKey::UpdatedAt && index > 0 {
                let summary = workspace.threads.remove(index);
                workspace.threads.insert(0, summary);
            }
            changed = true;
        }
        changed
    }

    fn set_thread_model(
        &mut self,
        thread_id: &ThreadId,
        model_id: Option<String>,
        reasoning_effort: Option<String>,
    ) -> bool {
        let mut changed = false;
        for workspace in self.workspaces.values_mut() {
            let Some(index) = workspace.position(thread_id) else {
                continue;
            };
            let summary = &mut workspace.threads[index];
            if let Some(model_id) = &model_id
                && summary.model_id.as_ref() != Some(model_id)
            {
                summary.model_id = Some(model_id.clone());
                changed = true;
            }
            if let Some(effort) = &reasoning_effort
                && summary.reasoning_effort.as_ref() != Some(effort)
            {
                summary.reasoning_effort = Some(effort.clone());
                changed = true;
            }
        }
        changed
    }

    fn set_threads(
        &mut self,
        workspace_id: WorkspaceId,
        threads: Vec<ThreadSummary>,
        preserve_anchors: bool,
    ) -> bool {
        let ledger_slice = self.ledger.workspace(&workspace_id).cloned();
        let workspace = self.workspaces.entry(workspace_id).or_default();
        let incoming: Vec<ThreadSummary> = threads
            .into_iter()
            .filter(|t| !workspace.hidden.contains(&t.id))
            .collect();

        let next = if preserve_anchors {
            let processing: HashMap<ThreadId, Option<u64>> = self
                .activity
                .iter()
                .filter(|(_, activity)| activity.is_processing)
                .map(|(id, activity)| (id.clone(), activity.processing_started_at_ms))
                .collect();
            let ctx = AnchorContext {
                active_thread_id: workspace.active_thread_id.as_ref(),
                processing_started: &processing,
                parents: &self.parents,
                ledger: ledger_slice.as_ref(),
            };
            listing::merge_with_anchors(&workspace.threads, incoming, &ctx)
        } else {
            incoming
        };

        let mut changed = false;
        if !preserve_anchors {
            let active_present = workspace
                .active_thread_id
                .as_ref()
                .is_some_and(|id| next.iter().any(|t| &t.id == id));
            if !active_present {
                let fallback = next.first().map(|t| t.id.clone());
                if workspace.active_thread_id != fallback {
                    workspace.active_thread_id = fallback;
                    changed = true;
                }
            }
        }
        if workspace.threads != next {
            workspace.threads = next;
            changed = true;
        }
        changed
    }

    fn set_thread_items(&mut self, thread_id: ThreadId, items: Vec<ThreadItem>) -> bool {
        let mut changed = match self.items.get(&thread_id) {
            Some(existing) => existing != &items,
            None => !items.is_empty(),
        };
        if changed {
            self.items.insert(thread_id.clone(), items);
        }
        changed |= self.unsynced_items.remove(&thread_id);
        changed
    }

    /// Local optimistic append off the event stream. Upserts by item id so a
    /// delta for an item we already hold replaces its payload, and flags the
    /// thread as holding unsynced content.
    fn append_thread_item(&mut self, thread_id: ThreadId, item: ThreadItem) -> bool {
        let entries = self.items.entry(thread_id.clone()).or_default();
        let changed = match entries.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => {
                if existing.payload == item.payload {
                    false
                } else {
                    existing.payload = item.payload;
                    true
                }
            }
            None => {
                entries.push(item);
                true
            }
        };
        if changed {
            self.unsynced_items.insert(thread_id);
        }
        changed
    }
}
