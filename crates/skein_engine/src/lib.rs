pub mod engine;
pub mod pagination;

pub use engine::{ListOptions, SyncEvent, ThreadSyncEngine, ThreadSyncHandle};

/// Cost/latency tuning for the sync engine. The defaults match the shipped
/// behavior; none of the bounds are correctness-critical.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SyncTuning {
    /// How many threads a workspace's visible window aims to hold.
    pub window_target: usize,
    /// Page size for `list_threads` fetches.
    pub list_page_size: u32,
    /// Default page budget for one forward fill.
    pub max_list_pages: usize,
    /// Hard page cap for one older-threads scan.
    pub older_page_cap: usize,
    /// Older-threads scans give up after this many consecutive pages with no
    /// record matching the workspace; bounds cost against a shared index in
    /// which a workspace is sparsely represented.
    pub older_pages_without_match: usize,
    /// Skip non-forced resumes of a thread that is already hydrated and
    /// mid-turn, so a stale fetch cannot clobber a live stream.
    pub skip_resume_while_processing: bool,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            window_target: 20,
            list_page_size: 50,
            max_list_pages: 4,
            older_page_cap: 20,
            older_pages_without_match: 5,
            skip_resume_while_processing: true,
        }
    }
}

impl SyncTuning {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Some(value) = env_usize("SKEIN_WINDOW_TARGET") {
            out.window_target = value.max(1);
        }
        if let Some(value) = env_usize("SKEIN_LIST_PAGE_SIZE") {
            out.list_page_size = u32::try_from(value.clamp(1, 500)).unwrap_or(50);
        }
        if let Some(value) = env_usize("SKEIN_MAX_LIST_PAGES") {
            out.max_list_pages = value.max(1);
        }
        if let Some(value) = env_usize("SKEIN_OLDER_PAGE_CAP") {
            out.older_page_cap = value.max(1);
        }
        if let Some(value) = env_usize("SKEIN_OLDER_PAGES_WITHOUT_MATCH") {
            out.older_pages_without_match = value.max(1);
        }
        if let Ok(raw) = std::env::var("SKEIN_SKIP_RESUME_WHILE_PROCESSING") {
            out.skip_resume_while_processing =
                !matches!(raw.trim(), "0" | "false" | "off" | "no");
        }

        out
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuning_defaults_are_sane() {
        let tuning = SyncTuning::default();
        assert_eq!(tuning.window_target, 20);
        assert!(tuning.list_page_size >= 1);
        assert!(tuning.older_page_cap >= tuning.max_list_pages);
        assert!(tuning.skip_resume_while_processing);
    }
}
