mod actions;
pub use actions::Action;

mod adapters;
pub use adapters::{ActivityLedgerStore, ThreadRpcService, WorkspaceTarget};

mod ledger;
pub use ledger::ActivityLedger;

pub mod listing;
pub mod paths;

mod records;
pub use records::{
    ResumePayload, ThreadRecord, TurnRecord, TurnSignal, agent_message_text, classify_latest_turn,
    decode_thread_page, extract_thread_id,
};

mod state;
pub use state::*;

mod reducer;

mod time;
pub use time::now_unix_ms;
