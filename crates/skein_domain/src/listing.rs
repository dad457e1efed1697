use crate::records::ThreadRecord;
use crate::{ThreadId, ThreadSortKey, ThreadSummary, WorkspaceId, WorkspaceTarget, paths};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Splits index records across the workspaces that own them. A record under a
/// nested workspace root lands in every owning workspace; records matching no
/// known root are dropped.
pub fn partition_records(
    records: &[ThreadRecord],
    workspaces: &[WorkspaceTarget],
) -> HashMap<WorkspaceId, Vec<ThreadRecord>> {
    let mut out: HashMap<WorkspaceId, Vec<ThreadRecord>> = HashMap::new();
    for record in records {
        for workspace_id in paths::resolve_workspace_ids(&record.cwd, workspaces) {
            out.entry(workspace_id).or_default().push(record.clone());
        }
    }
    out
}

/// Keeps the first occurrence of each id, preserving order.
pub fn dedupe_by_id(records: Vec<ThreadRecord>) -> Vec<ThreadRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.id.clone()))
        .collect()
}

/// Sorts a workspace's summaries. `UpdatedAt` ranks by the best activity
/// signal we have (`max(ledger, created)`) so a thread the user touched
/// recently outranks one the server merely re-stamped; ties fall back to the
/// raw `updated_at` field. `CreatedAt` is plain creation order with the id as
/// a stable tie-break.
pub fn sort_summaries(
    list: &mut [ThreadSummary],
    sort_key: ThreadSortKey,
    ledger: Option<&BTreeMap<ThreadId, u64>>,
) {
    match sort_key {
        ThreadSortKey::UpdatedAt => {
            list.sort_by(|a, b| {
                let key_a = activity_rank(a, ledger);
                let key_b = activity_rank(b, ledger);
                key_b
                    .cmp(&key_a)
                    .then_with(|| b.updated_at_ms.cmp(&a.updated_at_ms))
            });
        }
        ThreadSortKey::CreatedAt => {
            list.sort_by(|a, b| {
                b.created_at_ms
                    .cmp(&a.created_at_ms)
                    .then_with(|| a.id.cmp(&b.id))
            });
        }
    }
}

fn activity_rank(summary: &ThreadSummary, ledger: Option<&BTreeMap<ThreadId, u64>>) -> u64 {
    let seen = ledger.and_then(|l| l.get(&summary.id)).copied().unwrap_or(0);
    seen.max(summary.created_at_ms)
}

/// Everything anchor selection needs to know about the surrounding state.
pub struct AnchorContext<'a> {
    pub active_thread_id: Option<&'a ThreadId>,
    /// Threads currently processing, with their open-interval start.
    pub processing_started: &'a HashMap<ThreadId, Option<u64>>,
    pub parents: &'a HashMap<ThreadId, ThreadId>,
    pub ledger: Option<&'a BTreeMap<ThreadId, u64>>,
}

/// The timestamp an anchor is surfaced with: never lower than its own, raised
/// to the last activity the ledger saw and to an open processing interval.
pub fn freshened_timestamp(summary: &ThreadSummary, ctx: &AnchorContext<'_>) -> u64 {
    let mut at = summary.updated_at_ms;
    if let Some(ledger) = ctx.ledger
        && let Some(seen) = ledger.get(&summary.id)
    {
        at = at.max(*seen);
    }
    if let Some(started) = ctx.processing_started.get(&summary.id).copied().flatten() {
        at = at.max(started);
    }
    at
}

/// Appends to `window` every anchor `pool` has a record for: the active
/// thread, every processing thread, and the full ancestor chain of each
/// included thread. Ancestor walks are visited-set guarded.
pub fn append_anchors(
    window: &mut Vec<ThreadSummary>,
    pool: &[ThreadSummary],
    ctx: &AnchorContext<'_>,
) {
    let pool_by_id: HashMap<&ThreadId, &ThreadSummary> =
        pool.iter().map(|s| (&s.id, s)).collect();
    let mut included: HashSet<ThreadId> = window.iter().map(|s| s.id.clone()).collect();

    let mut queue: VecDeque<ThreadId> = window.iter().map(|s| s.id.clone()).collect();
    if let Some(active) = ctx.active_thread_id {
        queue.push_back(active.clone());
    }
    queue.extend(ctx.processing_started.keys().cloned());

    let mut visited = HashSet::new();
    while let Some(id) = queue.pop_front() {
        if !visited.insert(id.clone()) {
            continue;
        }
        if !included.contains(&id)
            && let Some(summary) = pool_by_id.get(&id)
        {
            let mut anchor = (*summary).clone();
            anchor.updated_at_ms = freshened_timestamp(summary, ctx);
            window.push(anchor);
            included.insert(id.clone());
        }
        if let Some(parent) = ctx.parents.get(&id) {
            queue.push_back(parent.clone());
        }
    }
}

/// Anchor-preserving reconciliation of a fresh list against the previous
/// one: the incoming window wins, but anchors only the previous list knows
/// about are carried over with freshened timestamps.
pub fn merge_with_anchors(
    previous: &[ThreadSummary],
    incoming: Vec<ThreadSummary>,
    ctx: &AnchorContext<'_>,
) -> Vec<ThreadSummary> {
    let mut merged = incoming;
    append_anchors(&mut merged, previous, ctx);
    merged
}

/// Truncates a sorted candidate list to the window target, then re-appends
/// anchors that fell outside the numeric window.
pub fn visible_window(
    sorted: Vec<ThreadSummary>,
    target: usize,
    ctx: &AnchorContext<'_>,
) -> Vec<ThreadSummary> {
    let pool = sorted.clone();
    let mut window: Vec<ThreadSummary> = sorted.into_iter().take(target).collect();
    append_anchors(&mut window, &pool, ctx);
    window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, updated: u64, created: u64) -> ThreadSummary {
        ThreadSummary {
            id: ThreadId::new(id),
            name: format!("thread {id}"),
            updated_at_ms: updated,
            created_at_ms: created,
            model_id: None,
            reasoning_effort: None,
        }
    }

    fn record(id: &str, cwd: &str) -> ThreadRecord {
        ThreadRecord {
            id: ThreadId::new(id),
            cwd: cwd.to_owned(),
            name: String::new(),
            updated_at_ms: 0,
            created_at_ms: 0,
            model_id: None,
            reasoning_effort: None,
            parent_id: None,
        }
    }

    fn empty_ctx<'a>(
        processing: &'a HashMap<ThreadId, Option<u64>>,
        parents: &'a HashMap<ThreadId, ThreadId>,
    ) -> AnchorContext<'a> {
        AnchorContext {
            active_thread_id: None,
            processing_started: processing,
            parents,
            ledger: None,
        }
    }

    #[test]
    fn partition_respects_nested_roots() {
        let workspaces = vec![
            WorkspaceTarget::new("parent", "/repo"),
            WorkspaceTarget::new("nested", "/repo/sub"),
        ];
        let records = vec![record("a", "/repo/x"), record("b", "/repo/sub/y"), record("c", "/elsewhere")];
        let parts = partition_records(&records, &workspaces);
        let parent = &parts[&WorkspaceId::new("parent")];
        assert_eq!(parent.len(), 2);
        let nested = &parts[&WorkspaceId::new("nested")];
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].id.as_str(), "b");
        assert!(!parts.contains_key(&WorkspaceId::new("c")));
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let records = vec![record("a", "/r1"), record("b", "/r"), record("a", "/r2")];
        let deduped = dedupe_by_id(records);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].cwd, "/r1");
    }

    #[test]
    fn updated_sort_prefers_ledger_activity_over_created() {
        let mut ledger = BTreeMap::new();
        ledger.insert(ThreadId::new("old"), 5000u64);
        let mut list = vec![summary("new", 900, 900), summary("old", 100, 100)];
        sort_summaries(&mut list, ThreadSortKey::UpdatedAt, Some(&ledger));
        assert_eq!(list[0].id.as_str(), "old");
    }

    #[test]
    fn created_sort_tie_breaks_by_id() {
        let mut list = vec![summary("b", 0, 100), summary("a", 0, 100), summary("c", 0, 200)];
        sort_summaries(&mut list, ThreadSortKey::CreatedAt, None);
        let ids: Vec<&str> = list.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn window_keeps_active_thread_ranked_past_the_target() {
        let mut sorted: Vec<ThreadSummary> =
            (0u64..21).map(|i| summary(&format!("t{i}"), 1000 - i, 1000 - i)).collect();
        sorted.sort_by(|a, b| b.updated_at_ms.cmp(&a.updated_at_ms));
        let active = ThreadId::new("t20");
        let processing = HashMap::new();
        let parents = HashMap::new();
        let ctx = AnchorContext {
            active_thread_id: Some(&active),
            processing_started: &processing,
            parents: &parents,
            ledger: None,
        };
        let window = visible_window(sorted, 20, &ctx);
        assert_eq!(window.len(), 21);
        assert!(window.iter().any(|s| s.id == active));
    }

    #[test]
    fn anchors_pull_in_ancestor_chains() {
        let processing = HashMap::new();
        let mut parents = HashMap::new();
        parents.insert(ThreadId::new("child"), ThreadId::new("parent"));
        parents.insert(ThreadId::new("parent"), ThreadId::new("grandparent"));
        let ctx = empty_ctx(&processing, &parents);

        let pool = vec![summary("parent", 10, 10), summary("grandparent", 5, 5)];
        let mut window = vec![summary("child", 100, 100)];
        append_anchors(&mut window, &pool, &ctx);
        let ids: Vec<&str> = window.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["child", "parent", "grandparent"]);
    }

    #[test]
    fn anchor_walk_survives_a_parent_cycle() {
        let processing = HashMap::new();
        let mut parents = HashMap::new();
        parents.insert(ThreadId::new("a"), ThreadId::new("b"));
        parents.insert(ThreadId::new("b"), ThreadId::new("a"));
        let ctx = empty_ctx(&processing, &parents);

        let pool = vec![summary("b", 10, 10)];
        let mut window = vec![summary("a", 100, 100)];
        append_anchors(&mut window, &pool, &ctx);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn appended_anchors_are_freshened_but_never_lowered() {
        let mut processing = HashMap::new();
        processing.insert(ThreadId::new("busy"), Some(9000u64));
        let parents = HashMap::new();
        let mut ledger = BTreeMap::new();
        ledger.insert(ThreadId::new("busy"), 4000u64);
        let ctx = AnchorContext {
            active_thread_id: None,
            processing_started: &processing,
            parents: &parents,
            ledger: Some(&ledger),
        };

        let pool = vec![summary("busy", 100, 100)];
        let mut window = vec![summary("top", 10_000, 10_000)];
        append_anchors(&mut window, &pool, &ctx);
        assert_eq!(window[1].updated_at_ms, 9000);
    }

    #[test]
    fn merge_with_anchors_keeps_incoming_order() {
        let processing = HashMap::new();
        let parents = HashMap::new();
        let active = ThreadId::new("pinned");
        let ctx = AnchorContext {
            active_thread_id: Some(&active),
            processing_started: &processing,
            parents: &parents,
            ledger: None,
        };
        let previous = vec![summary("pinned", 50, 50), summary("gone", 40, 40)];
        let incoming = vec![summary("x", 100, 100), summary("y", 90, 90)];
        let merged = merge_with_anchors(&previous, incoming, &ctx);
        let ids: Vec<&str> = merged.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y", "pinned"]);
    }
}
