//! Flat per-thread accumulator and its process-wide registry.
//!
//! The overview recorder forgets nesting: it keeps one cumulative duration
//! per block identity plus the open stack, trading the tree for cheap
//! bookkeeping when only a top-N hot list is wanted.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::{Duration, Instant};

use ahash::AHashMap;

use super::format;
use super::{BlockIdentity, BlockKey, CloseEvent, OpenEvent};

const POISONED: &str = "overview recorder mutex poisoned";

struct OverviewState {
    cul_time: AHashMap<BlockKey, Duration>,
    stack: Vec<OpenEvent>,
}

/// Flat accumulator for one thread.
pub struct ThreadOverviewReport {
    state: Mutex<OverviewState>,
}

impl ThreadOverviewReport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OverviewState {
                cul_time: AHashMap::new(),
                stack: Vec::new(),
            }),
        }
    }

    pub fn begin_event(&self, e: OpenEvent) {
        self.state.lock().expect(POISONED).stack.push(e);
    }

    /// # Panics
    ///
    /// Same contract as the call-stack recorder: the close must match the
    /// innermost open block and must not precede it.
    pub fn end_event(&self, e: CloseEvent) {
        let mut st = self.state.lock().expect(POISONED);
        let open = st.stack.pop().expect("end_event with no open block");
        assert!(
            std::ptr::eq(open.source, e.source),
            "closed block {:?} does not match open block {:?}",
            e.source.name(),
            open.source.name(),
        );
        let spent = e
            .end
            .checked_duration_since(open.start)
            .expect("block closed before it was opened");
        *st.cul_time.entry(BlockKey(e.source)).or_default() += spent;
    }

    /// Copies the accumulator, folding in every open block whose start is
    /// not after `t`.
    pub fn as_of(&self, t: Instant) -> OverviewSnapshot {
        let (mut entries, stack) = {
            let st = self.state.lock().expect(POISONED);
            (st.cul_time.clone(), st.stack.clone())
        };
        for open in &stack {
            if let Some(extra) = t.checked_duration_since(open.start) {
                *entries.entry(BlockKey(open.source)).or_default() += extra;
            }
        }
        OverviewSnapshot { entries }
    }
}

impl Default for ThreadOverviewReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Stand-alone copy of per-identity totals for one thread.
pub struct OverviewSnapshot {
    pub(crate) entries: AHashMap<BlockKey, Duration>,
}

impl OverviewSnapshot {
    /// Accumulated time for one identity, zero if never seen.
    pub fn time_spent(&self, source: &'static BlockIdentity) -> Duration {
        self.entries
            .get(&BlockKey(source))
            .copied()
            .unwrap_or_default()
    }

    /// Sum over every identity.
    pub fn total(&self) -> Duration {
        self.entries.values().sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in unspecified order; the report sorts.
    pub fn iter(&self) -> impl Iterator<Item = (&'static BlockIdentity, Duration)> + '_ {
        self.entries.iter().map(|(key, &time)| (key.0, time))
    }
}

// ============================================================================
// Registry
// ============================================================================

const REGISTRY_POISONED: &str = "overview registry lock poisoned";

/// Process-wide registry of per-thread overview recorders.
///
/// Same lock discipline as the call-stack registry: write lock to register,
/// read lock only to clone handles, snapshots and formatting lock-free.
pub struct OverviewReport {
    threads: RwLock<AHashMap<u64, Arc<ThreadOverviewReport>>>,
    start: Instant,
}

impl OverviewReport {
    pub fn new() -> Self {
        Self {
            threads: RwLock::new(AHashMap::new()),
            start: Instant::now(),
        }
    }

    /// The registry [`TimedBlock`](super::TimedBlock) records into.
    pub fn global() -> &'static OverviewReport {
        static GLOBAL: OnceLock<OverviewReport> = OnceLock::new();
        GLOBAL.get_or_init(OverviewReport::new)
    }

    /// Instant this registry started measuring; the percentage window.
    pub fn start(&self) -> Instant {
        self.start
    }

    pub(crate) fn register(&self, label: u64, report: Arc<ThreadOverviewReport>) {
        self.threads
            .write()
            .expect(REGISTRY_POISONED)
            .insert(label, report);
    }

    pub(crate) fn deregister(&self, label: u64) {
        self.threads.write().expect(REGISTRY_POISONED).remove(&label);
    }

    /// Per-thread top-N lists, sorted by accumulated time descending with
    /// ties broken by descending identity address. Percentages are of the
    /// window since this registry started.
    pub fn overview_str(&self, top_n: usize) -> String {
        let now = Instant::now();
        let window = now.checked_duration_since(self.start).unwrap_or_default();

        let mut handles: Vec<(u64, Arc<ThreadOverviewReport>)> = {
            let threads = self.threads.read().expect(REGISTRY_POISONED);
            threads
                .iter()
                .map(|(&label, report)| (label, Arc::clone(report)))
                .collect()
        };
        handles.sort_by_key(|&(label, _)| label);

        let mut out = String::from("=== Start Performance Report (Overview) ===\n");
        for (label, report) in handles {
            let _ = writeln!(out, "== Thread: {label} ==");
            let entries = format::sorted_entries(&report.as_of(now).entries);
            format::write_overview(&mut out, entries, top_n, window);
        }
        out.push_str("=== End Performance Report ===\n");
        out
    }
}

impl Default for OverviewReport {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
