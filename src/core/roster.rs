//! Book-keeping of running instances for progress reports and the grace check.

use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Default)]
pub(crate) struct Roster {
    inner: Mutex<RosterInner>,
}

#[derive(Default)]
struct RosterInner {
    working: Vec<(Arc<str>, bool)>,
    completions: u32,
}

/// What a completion leaves behind.
pub(crate) struct Progress {
    pub completions: u32,
    pub working: Vec<Arc<str>>,
}

impl Roster {
    pub(crate) fn started(&self, name: Arc<str>, daemon: bool) {
        self.inner.lock().working.push((name, daemon));
    }

    pub(crate) fn finished(&self, name: &str) -> Progress {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.working.iter().position(|(n, _)| &**n == name) {
            inner.working.remove(pos);
        }
        inner.completions += 1;
        Progress {
            completions: inner.completions,
            working: inner.working.iter().map(|(n, _)| Arc::clone(n)).collect(),
        }
    }

    /// Daemon instances that are still running.
    pub(crate) fn working_daemons(&self) -> Vec<String> {
        self.inner
            .lock()
            .working
            .iter()
            .filter(|(_, daemon)| *daemon)
            .map(|(n, _)| n.to_string())
            .collect()
    }
}
