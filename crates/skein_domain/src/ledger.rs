use crate::{ThreadId, WorkspaceId};
use std::collections::BTreeMap;

/// Last-known-activity timestamps, workspace id -> thread id -> epoch millis.
/// Writes are monotonic per thread; the whole mapping round-trips verbatim
/// through the persistence layer.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ActivityLedger {
    entries: BTreeMap<WorkspaceId, BTreeMap<ThreadId, u64>>,
}

impl ActivityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_activity(&self, workspace_id: &WorkspaceId, thread_id: &ThreadId) -> Option<u64> {
        self.entries.get(workspace_id).and_then(|m| m.get(thread_id)).copied()
    }

    pub fn workspace(&self, workspace_id: &WorkspaceId) -> Option<&BTreeMap<ThreadId, u64>> {
        self.entries.get(workspace_id)
    }

    /// Records an observation. Returns true only when the stored value
    /// actually increased.
    pub fn note(&mut self, workspace_id: &WorkspaceId, thread_id: &ThreadId, at_ms: u64) -> bool {
        let per_thread = self.entries.entry(workspace_id.clone()).or_default();
        match per_thread.get(thread_id) {
            Some(existing) if *existing >= at_ms => false,
            _ => {
                per_thread.insert(thread_id.clone(), at_ms);
                true
            }
        }
    }

    pub fn workspaces(&self) -> impl Iterator<Item = (&WorkspaceId, &BTreeMap<ThreadId, u64>)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws(id: &str) -> WorkspaceId {
        WorkspaceId::new(id)
    }

    fn th(id: &str) -> ThreadId {
        ThreadId::new(id)
    }

    #[test]
    fn note_is_monotonic_per_thread() {
        let mut ledger = ActivityLedger::new();
        assert!(ledger.note(&ws("w1"), &th("t1"), 100));
        assert!(!ledger.note(&ws("w1"), &th("t1"), 100));
        assert!(!ledger.note(&ws("w1"), &th("t1"), 50));
        assert_eq!(ledger.last_activity(&ws("w1"), &th("t1")), Some(100));
        assert!(ledger.note(&ws("w1"), &th("t1"), 101));
        assert_eq!(ledger.last_activity(&ws("w1"), &th("t1")), Some(101));
    }

    #[test]
    fn workspaces_are_independent() {
        let mut ledger = ActivityLedger::new();
        ledger.note(&ws("w1"), &th("t1"), 100);
        ledger.note(&ws("w2"), &th("t1"), 5);
        assert_eq!(ledger.last_activity(&ws("w1"), &th("t1")), Some(100));
        assert_eq!(ledger.last_activity(&ws("w2"), &th("t1")), Some(5));
        assert_eq!(ledger.last_activity(&ws("w3"), &th("t1")), None);
    }

    #[test]
    fn serde_round_trips_verbatim() {
        let mut ledger = ActivityLedger::new();
        ledger.note(&ws("w1"), &th("t1"), 100);
        ledger.note(&ws("w1"), &th("t2"), 42);
        ledger.note(&ws("w2"), &th("t3"), 7);

        let encoded = serde_json::to_string(&ledger).expect("encode ledger");
        let decoded: ActivityLedger = serde_json::from_str(&encoded).expect("decode ledger");
        assert_eq!(decoded, ledger);

        let raw: serde_json::Value = serde_json::from_str(&encoded).expect("raw value");
        assert_eq!(raw["w1"]["t1"], serde_json::json!(100));
        assert_eq!(raw["w2"]["t3"], serde_json::json!(7));
    }
}
