//! Run id → session key lookup.
//!
//! Non-owning: the session owns its run handle, this only correlates ids for
//! callers that know a run id but not the session. Entries are removed in the
//! same critical section that detaches the run from its session.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct RunIndex {
    by_run: HashMap<String, String>,
}

impl RunIndex {
    pub fn register(&mut self, run_id: &str, session_key: &str) {
        self.by_run.insert(run_id.to_string(), session_key.to_string());
    }

    #[must_use]
    pub fn lookup(&self, run_id: &str) -> Option<&str> {
        self.by_run.get(run_id).map(String::as_str)
    }

    pub fn unregister(&mut self, run_id: &str) -> Option<String> {
        self.by_run.remove(run_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_run.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_run.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_run.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_lookup_unregister() {
        let mut index = RunIndex::default();
        index.register("run-1", "s1");
        assert_eq!(index.lookup("run-1"), Some("s1"));
        assert_eq!(index.unregister("run-1").as_deref(), Some("s1"));
        assert_eq!(index.lookup("run-1"), None);
        assert!(index.is_empty());
    }
}
