use skein_domain::{
    ThreadId, ThreadRecord, ThreadRpcService, ThreadSortKey, WorkspaceId, WorkspaceTarget, paths,
    decode_thread_page,
};
use std::collections::{HashMap, HashSet};

/// Result of one forward fill of the shared thread index.
#[derive(Clone, Debug, Default)]
pub struct ForwardFill {
    /// Deduplicated records in arrival order, across all pages.
    pub records: Vec<ThreadRecord>,
    /// For each workspace that crossed the window target: the cursor of the
    /// page after the one where it crossed (None when the index ended there).
    pub boundary_cursors: HashMap<WorkspaceId, Option<String>>,
    /// Cursor after the last fetched page; None when the index is exhausted.
    pub next_cursor: Option<String>,
    pub pages_fetched: usize,
}

/// Pages forward through the index until every target workspace has enough
/// unique threads, the cursor runs out, or the page budget is spent. One
/// requester serves all targets: multiple workspaces share one underlying
/// index.
pub fn fill_forward(
    rpc: &dyn ThreadRpcService,
    requester: &WorkspaceId,
    targets: &[WorkspaceTarget],
    sort_key: ThreadSortKey,
    page_size: u32,
    max_pages: usize,
    window_target: usize,
) -> Result<ForwardFill, String> {
    let mut fill = ForwardFill::default();
    let mut seen = HashSet::new();
    let mut per_workspace: HashMap<WorkspaceId, HashSet<ThreadId>> = HashMap::new();
    let mut cursor: Option<String> = None;

    while fill.pages_fetched < max_pages {
        let page = rpc.list_threads(requester, cursor.as_deref(), page_size, sort_key)?;
        let (records, next_cursor) = decode_thread_page(&page);
        fill.pages_fetched += 1;

        for record in records {
            if !seen.insert(record.id.clone()) {
                continue;
            }
            for workspace_id in paths::resolve_workspace_ids(&record.cwd, targets) {
                per_workspace
                    .entry(workspace_id)
                    .or_default()
                    .insert(record.id.clone());
            }
            fill.records.push(record);
        }

        for target in targets {
            if fill.boundary_cursors.contains_key(&target.id) {
                continue;
            }
            let count = per_workspace.get(&target.id).map(HashSet::len).unwrap_or(0);
            if count > window_target {
                fill.boundary_cursors
                    .insert(target.id.clone(), next_cursor.clone());
            }
        }

        cursor = next_cursor;
        fill.next_cursor = cursor.clone();
        if cursor.is_none() {
            break;
        }
        if targets
            .iter()
            .all(|t| fill.boundary_cursors.contains_key(&t.id))
        {
            break;
        }
    }

    Ok(fill)
}

/// Result of one older-threads scan for a single workspace.
#[derive(Clone, Debug, Default)]
pub struct OlderFill {
    /// Records owned by the workspace that were not in `seen`, in order.
    pub new_records: Vec<ThreadRecord>,
    pub next_cursor: Option<String>,
    pub pages_scanned: usize,
}

/// Pages forward from `start_cursor` (None restarts from page one) keeping
/// only this workspace's unseen records. Stops once `batch_target` new
/// threads are found, after `max_pages_without_match` consecutive empty
/// pages, or at the hard `page_cap`.
pub fn fill_older(
    rpc: &dyn ThreadRpcService,
    requester: &WorkspaceId,
    target: &WorkspaceTarget,
    seen: &HashSet<ThreadId>,
    start_cursor: Option<&str>,
    sort_key: ThreadSortKey,
    page_size: u32,
    batch_target: usize,
    page_cap: usize,
    max_pages_without_match: usize,
) -> Result<OlderFill, String> {
    let mut fill = OlderFill::default();
    let mut collected = HashSet::new();
    let mut cursor: Option<String> = start_cursor.map(str::to_owned);
    let mut pages_without_match = 0usize;

    while fill.pages_scanned < page_cap {
        let page = rpc.list_threads(requester, cursor.as_deref(), page_size, sort_key)?;
        let (records, next_cursor) = decode_thread_page(&page);
        fill.pages_scanned += 1;

        let mut matched = false;
        for record in records {
            if seen.contains(&record.id) || !collected.insert(record.id.clone()) {
                continue;
            }
            if !owns_record(target, &record) {
                continue;
            }
            fill.new_records.push(record);
            matched = true;
        }
        if matched {
            pages_without_match = 0;
        } else {
            pages_without_match += 1;
        }

        cursor = next_cursor;
        fill.next_cursor = cursor.clone();
        if cursor.is_none() {
            break;
        }
        if fill.new_records.len() >= batch_target {
            break;
        }
        if pages_without_match >= max_pages_without_match {
            break;
        }
    }

    Ok(fill)
}

fn owns_record(target: &WorkspaceTarget, record: &ThreadRecord) -> bool {
    !paths::resolve_workspace_ids(&record.cwd, std::slice::from_ref(target)).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    struct PagedIndex {
        pages: Mutex<HashMap<Option<String>, Value>>,
        calls: Mutex<Vec<Option<String>>>,
    }

    impl PagedIndex {
        fn new(pages: Vec<(Option<&str>, Value)>) -> Self {
            Self {
                pages: Mutex::new(
                    pages
                        .into_iter()
                        .map(|(cursor, page)| (cursor.map(str::to_owned), page))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn cursors_requested(&self) -> Vec<Option<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ThreadRpcService for PagedIndex {
        fn start_thread(&self, _workspace_id: &WorkspaceId) -> Result<Value, String> {
            Err("unused".to_owned())
        }

        fn resume_thread(
            &self,
            _workspace_id: &WorkspaceId,
            _thread_id: &ThreadId,
        ) -> Result<Value, String> {
            Err("unused".to_owned())
        }

        fn fork_thread(
            &self,
            _workspace_id: &WorkspaceId,
            _thread_id: &ThreadId,
        ) -> Result<Value, String> {
            Err("unused".to_owned())
        }

        fn list_threads(
            &self,
            _workspace_id: &WorkspaceId,
            cursor: Option<&str>,
            _page_size: u32,
            _sort_key: ThreadSortKey,
        ) -> Result<Value, String> {
            let key = cursor.map(str::to_owned);
            self.calls.lock().unwrap().push(key.clone());
            self.pages
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .ok_or_else(|| format!("no page for cursor {key:?}"))
        }

        fn archive_thread(
            &self,
            _workspace_id: &WorkspaceId,
            _thread_id: &ThreadId,
        ) -> Result<(), String> {
            Err("unused".to_owned())
        }
    }

    fn row(id: &str, cwd: &str) -> Value {
        json!({"id": id, "cwd": cwd, "updated_at": 100, "created_at": 100})
    }

    fn target(id: &str, root: &str) -> WorkspaceTarget {
        WorkspaceTarget::new(id, root)
    }

    #[test]
    fn forward_fill_walks_until_exhausted() {
        let rpc = PagedIndex::new(vec![
            (None, json!({"data": [row("a", "/w1")], "nextCursor": "c1"})),
            (Some("c1"), json!({"data": [row("b", "/w1")]})),
        ]);
        let fill = fill_forward(
            &rpc,
            &WorkspaceId::new("w1"),
            &[target("w1", "/w1")],
            ThreadSortKey::UpdatedAt,
            50,
            10,
            20,
        )
        .unwrap();
        assert_eq!(fill.records.len(), 2);
        assert_eq!(fill.pages_fetched, 2);
        assert_eq!(fill.next_cursor, None);
        assert_eq!(rpc.cursors_requested(), vec![None, Some("c1".to_owned())]);
    }

    #[test]
    fn forward_fill_captures_a_boundary_when_a_workspace_crosses_the_target() {
        let first: Vec<Value> = (0..3).map(|i| row(&format!("t{i}"), "/w1")).collect();
        let rpc = PagedIndex::new(vec![
            (None, json!({"data": first, "nextCursor": "c1"})),
            (Some("c1"), json!({"data": [row("t3", "/w1")], "nextCursor": "c2"})),
        ]);
        let fill = fill_forward(
            &rpc,
            &WorkspaceId::new("w1"),
            &[target("w1", "/w1")],
            ThreadSortKey::UpdatedAt,
            50,
            10,
            2,
        )
        .unwrap();
        // crossed on page one (3 > 2): boundary is that page's next cursor,
        // and the walk stops because every target crossed
        assert_eq!(
            fill.boundary_cursors.get(&WorkspaceId::new("w1")),
            Some(&Some("c1".to_owned()))
        );
        assert_eq!(fill.pages_fetched, 1);
    }

    #[test]
    fn forward_fill_respects_the_page_budget() {
        let rpc = PagedIndex::new(vec![
            (None, json!({"data": [row("a", "/w1")], "next_cursor": "c1"})),
            (Some("c1"), json!({"data": [row("b", "/w1")], "next_cursor": "c2"})),
            (Some("c2"), json!({"data": [row("c", "/w1")], "next_cursor": "c3"})),
        ]);
        let fill = fill_forward(
            &rpc,
            &WorkspaceId::new("w1"),
            &[target("w1", "/w1")],
            ThreadSortKey::UpdatedAt,
            50,
            2,
            20,
        )
        .unwrap();
        assert_eq!(fill.pages_fetched, 2);
        assert_eq!(fill.next_cursor, Some("c2".to_owned()));
    }

    #[test]
    fn forward_fill_deduplicates_across_pages() {
        let rpc = PagedIndex::new(vec![
            (None, json!({"data": [row("a", "/w1")], "nextCursor": "c1"})),
            (Some("c1"), json!({"data": [row("a", "/w1"), row("b", "/w1")]})),
        ]);
        let fill = fill_forward(
            &rpc,
            &WorkspaceId::new("w1"),
            &[target("w1", "/w1")],
            ThreadSortKey::UpdatedAt,
            50,
            10,
            20,
        )
        .unwrap();
        let ids: Vec<&str> = fill.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn older_fill_keeps_only_unseen_matching_records() {
        let rpc = PagedIndex::new(vec![(
            None,
            json!({"data": [row("seen", "/w1"), row("fresh", "/w1"), row("foreign", "/other")]}),
        )]);
        let seen: HashSet<ThreadId> = [ThreadId::new("seen")].into_iter().collect();
        let fill = fill_older(
            &rpc,
            &WorkspaceId::new("w1"),
            &target("w1", "/w1"),
            &seen,
            None,
            ThreadSortKey::UpdatedAt,
            50,
            20,
            20,
            5,
        )
        .unwrap();
        let ids: Vec<&str> = fill.new_records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["fresh"]);
        assert_eq!(fill.next_cursor, None);
    }

    #[test]
    fn older_fill_gives_up_after_sparse_pages() {
        let rpc = PagedIndex::new(vec![
            (None, json!({"data": [row("x1", "/other")], "nextCursor": "c1"})),
            (Some("c1"), json!({"data": [row("x2", "/other")], "nextCursor": "c2"})),
            (Some("c2"), json!({"data": [row("x3", "/other")], "nextCursor": "c3"})),
            (Some("c3"), json!({"data": [row("late", "/w1")], "nextCursor": "c4"})),
        ]);
        let fill = fill_older(
            &rpc,
            &WorkspaceId::new("w1"),
            &target("w1", "/w1"),
            &HashSet::new(),
            None,
            ThreadSortKey::UpdatedAt,
            50,
            20,
            20,
            2,
        )
        .unwrap();
        // two consecutive no-match pages end the scan before "late" is found
        assert!(fill.new_records.is_empty());
        assert_eq!(fill.pages_scanned, 2);
        assert_eq!(fill.next_cursor, Some("c2".to_owned()));
    }

    #[test]
    fn older_fill_stops_at_the_batch_target() {
        let rpc = PagedIndex::new(vec![
            (None, json!({"data": [row("a", "/w1"), row("b", "/w1")], "nextCursor": "c1"})),
            (Some("c1"), json!({"data": [row("c", "/w1")]})),
        ]);
        let fill = fill_older(
            &rpc,
            &WorkspaceId::new("w1"),
            &target("w1", "/w1"),
            &HashSet::new(),
            None,
            ThreadSortKey::UpdatedAt,
            50,
            2,
            20,
            5,
        )
        .unwrap();
        assert_eq!(fill.new_records.len(), 2);
        assert_eq!(fill.next_cursor, Some("c1".to_owned()));
    }
}
