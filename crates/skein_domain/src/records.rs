use crate::{ThreadId, ThreadItem, ThreadSummary, TurnId};
use serde_json::Value;

/// One row of the server's thread index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThreadRecord {
    pub id: ThreadId,
    pub cwd: String,
    pub name: String,
    pub updated_at_ms: u64,
    pub created_at_ms: u64,
    pub model_id: Option<String>,
    pub reasoning_effort: Option<String>,
    pub parent_id: Option<ThreadId>,
}

impl ThreadRecord {
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = nonempty_string(value.get("id"))?;
        Some(Self {
            id: ThreadId::new(id),
            cwd: nonempty_string(value.get("cwd")).unwrap_or_default(),
            name: nonempty_string(value.get("preview")).unwrap_or_default(),
            updated_at_ms: millis(value.get("updated_at")).unwrap_or(0),
            created_at_ms: millis(value.get("created_at")).unwrap_or(0),
            model_id: nonempty_string(value.get("model")),
            reasoning_effort: nonempty_string(value.get("reasoning_effort")),
            parent_id: parent_from_source(value.get("source")),
        })
    }

    pub fn to_summary(&self) -> ThreadSummary {
        ThreadSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            updated_at_ms: self.updated_at_ms,
            created_at_ms: self.created_at_ms,
            model_id: self.model_id.clone(),
            reasoning_effort: self.reasoning_effort.clone(),
        }
    }
}

/// One page of `list_threads`. Accepts both cursor spellings the server has
/// shipped (`nextCursor` and `next_cursor`).
pub fn decode_thread_page(value: &Value) -> (Vec<ThreadRecord>, Option<String>) {
    let records = value
        .get("data")
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(ThreadRecord::from_value).collect())
        .unwrap_or_default();
    let next_cursor = nonempty_string(value.get("nextCursor"))
        .or_else(|| nonempty_string(value.get("next_cursor")));
    (records, next_cursor)
}

/// Extracts the new thread id from a `start_thread` / `fork_thread` response.
pub fn extract_thread_id(value: &Value) -> Option<ThreadId> {
    nonempty_string(value.get("thread").and_then(|t| t.get("id"))).map(ThreadId::new)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TurnRecord {
    pub id: TurnId,
    pub status: String,
    pub started_at_ms: Option<u64>,
    pub items: Vec<ThreadItem>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResumePayload {
    pub thread_id: Option<ThreadId>,
    pub name: Option<String>,
    pub updated_at_ms: Option<u64>,
    pub model_id: Option<String>,
    pub reasoning_effort: Option<String>,
    pub parent_id: Option<ThreadId>,
    pub turns: Vec<TurnRecord>,
}

impl ResumePayload {
    pub fn from_value(value: &Value) -> Self {
        let Some(thread) = value.get("thread") else {
            return Self::default();
        };
        Self {
            thread_id: nonempty_string(thread.get("id")).map(ThreadId::new),
            name: nonempty_string(thread.get("preview")),
            updated_at_ms: millis(thread.get("updated_at")),
            model_id: nonempty_string(thread.get("model")),
            reasoning_effort: nonempty_string(thread.get("reasoning_effort")),
            parent_id: parent_from_source(thread.get("source")),
            turns: thread
                .get("turns")
                .and_then(Value::as_array)
                .map(|turns| turns.iter().filter_map(decode_turn).collect())
                .unwrap_or_default(),
        }
    }

    /// All turn items flattened in order, the server-side transcript.
    pub fn items(&self) -> Vec<ThreadItem> {
        self.turns.iter().flat_map(|turn| turn.items.iter().cloned()).collect()
    }

    /// Text of the newest agent message across all turns, if any.
    pub fn last_agent_message(&self) -> Option<String> {
        self.turns
            .iter()
            .rev()
            .flat_map(|turn| turn.items.iter().rev())
            .find_map(agent_message_text)
    }
}

fn decode_turn(value: &Value) -> Option<TurnRecord> {
    let id = nonempty_string(value.get("id"))?;
    let items = value
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .enumerate()
                .map(|(index, item)| decode_item(&id, index, item))
                .collect()
        })
        .unwrap_or_default();
    Some(TurnRecord {
        id: TurnId::new(id),
        status: nonempty_string(value.get("status")).unwrap_or_default(),
        started_at_ms: millis(value.get("started_at")),
        items,
    })
}

/// Items without ids get a turn-scoped synthetic one so replace/merge stays
/// stable across refetches of the same transcript.
fn decode_item(turn_id: &str, index: usize, value: &Value) -> ThreadItem {
    let id = nonempty_string(value.get("id")).unwrap_or_else(|| format!("{turn_id}/{index}"));
    ThreadItem {
        id,
        payload: value.clone(),
    }
}

pub fn agent_message_text(item: &ThreadItem) -> Option<String> {
    let kind = item.payload.get("type").and_then(Value::as_str)?;
    if kind != "agentMessage" && kind != "agent_message" {
        return None;
    }
    nonempty_string(item.payload.get("text"))
}

/// What the newest turn of a resume payload says about the thread being live.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TurnSignal {
    ConfidentActive {
        turn_id: TurnId,
        started_at_ms: Option<u64>,
    },
    ConfidentIdle,
    Ambiguous,
}

const TERMINAL_TURN_STATUSES: &[&str] = &[
    "completed",
    "failed",
    "interrupted",
    "canceled",
    "cancelled",
    "errored",
];

/// None when the payload carried no turns at all; callers must then leave
/// local status untouched.
pub fn classify_latest_turn(turns: &[TurnRecord]) -> Option<TurnSignal> {
    let latest = turns.last()?;
    let status = latest.status.trim();
    if TERMINAL_TURN_STATUSES.iter().any(|s| status.eq_ignore_ascii_case(s)) {
        return Some(TurnSignal::ConfidentIdle);
    }
    if status.eq_ignore_ascii_case("inProgress") || status.eq_ignore_ascii_case("in_progress") {
        return Some(TurnSignal::ConfidentActive {
            turn_id: latest.id.clone(),
            started_at_ms: latest.started_at_ms,
        });
    }
    Some(TurnSignal::Ambiguous)
}

fn parent_from_source(source: Option<&Value>) -> Option<ThreadId> {
    let source = source?;
    let parent = nonempty_string(source.get("parentThreadId"))
        .or_else(|| nonempty_string(source.get("parent_thread_id")))?;
    Some(ThreadId::new(parent))
}

fn nonempty_string(value: Option<&Value>) -> Option<String> {
    let text = value?.as_str()?.trim();
    if text.is_empty() {
        return None;
    }
    Some(text.to_owned())
}

fn millis(value: Option<&Value>) -> Option<u64> {
    let value = value?;
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_decodes_index_row() {
        let record = ThreadRecord::from_value(&json!({
            "id": "t1",
            "cwd": "/tmp/repo",
            "preview": "fix the tests",
            "updated_at": 1000,
            "created_at": 900,
            "model": "gpt-5.2-codex",
            "reasoning_effort": "high",
            "source": {"type": "subAgentThreadSpawn", "parentThreadId": "t0"}
        }))
        .expect("record");
        assert_eq!(record.id.as_str(), "t1");
        assert_eq!(record.name, "fix the tests");
        assert_eq!(record.updated_at_ms, 1000);
        assert_eq!(record.parent_id.as_ref().map(ThreadId::as_str), Some("t0"));
    }

    #[test]
    fn record_requires_an_id() {
        assert!(ThreadRecord::from_value(&json!({"cwd": "/tmp"})).is_none());
        assert!(ThreadRecord::from_value(&json!({"id": "  "})).is_none());
    }

    #[test]
    fn page_accepts_both_cursor_spellings() {
        let (records, cursor) = decode_thread_page(&json!({
            "data": [{"id": "a"}],
            "nextCursor": "c1"
        }));
        assert_eq!(records.len(), 1);
        assert_eq!(cursor.as_deref(), Some("c1"));

        let (_, cursor) = decode_thread_page(&json!({"data": [], "next_cursor": "c2"}));
        assert_eq!(cursor.as_deref(), Some("c2"));

        let (_, cursor) = decode_thread_page(&json!({"data": []}));
        assert_eq!(cursor, None);
    }

    #[test]
    fn resume_payload_flattens_turn_items_with_scoped_ids() {
        let payload = ResumePayload::from_value(&json!({
            "thread": {
                "id": "t1",
                "turns": [{
                    "id": "turn-1",
                    "status": "completed",
                    "items": [
                        {"type": "agentMessage", "text": "done"},
                        {"id": "item-7", "type": "reasoning", "text": "…"}
                    ]
                }]
            }
        }));
        let items = payload.items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "turn-1/0");
        assert_eq!(items[1].id, "item-7");
        assert_eq!(payload.last_agent_message().as_deref(), Some("done"));
    }

    fn turn(status: &str) -> TurnRecord {
        TurnRecord {
            id: TurnId::new("turn-9"),
            status: status.to_owned(),
            started_at_ms: Some(500),
            items: Vec::new(),
        }
    }

    #[test]
    fn latest_turn_classification() {
        assert_eq!(classify_latest_turn(&[]), None);
        assert_eq!(classify_latest_turn(&[turn("completed")]), Some(TurnSignal::ConfidentIdle));
        assert_eq!(classify_latest_turn(&[turn("failed")]), Some(TurnSignal::ConfidentIdle));
        assert_eq!(
            classify_latest_turn(&[turn("completed"), turn("inProgress")]),
            Some(TurnSignal::ConfidentActive {
                turn_id: TurnId::new("turn-9"),
                started_at_ms: Some(500),
            })
        );
        assert_eq!(classify_latest_turn(&[turn("syncing")]), Some(TurnSignal::Ambiguous));
        assert_eq!(classify_latest_turn(&[turn("")]), Some(TurnSignal::Ambiguous));
    }
}
