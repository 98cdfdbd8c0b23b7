//! Per-thread call-stack recorder and its process-wide registry.
//!
//! The recorder keeps a tree of nested blocks in an index arena: node 0 is
//! the root ("Measured"), each other node is one distinct block position in
//! the nesting hierarchy, keyed by block address under its parent. Using
//! arena indices instead of parent/child pointers keeps the whole tree
//! `Clone`, which is what makes the snapshot a single `Vec` clone under the
//! per-thread lock.
//!
//! # Invariants
//!
//! - The open-event stack always mirrors the path from the root to the
//!   current node; its length equals the current node's depth.
//! - `time_spent(node) >= Σ time_spent(children)` in every snapshot.
//! - A snapshot never aliases live recorder state.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::{Duration, Instant};

use ahash::AHashMap;

use super::format;
use super::{BlockIdentity, BlockKey, CloseEvent, OpenEvent};

const ROOT: usize = 0;

const POISONED: &str = "callstack recorder mutex poisoned";

#[derive(Clone, Debug)]
pub(crate) struct Node {
    parent: usize,
    depth: usize,
    time_spent: Duration,
    children: AHashMap<BlockKey, usize>,
}

struct CallstackState {
    /// Index arena; `nodes[ROOT]` is the synthetic root.
    nodes: Vec<Node>,
    /// Node for the innermost open block, `ROOT` when idle.
    current: usize,
    /// Open blocks, outermost first.
    stack: Vec<OpenEvent>,
    /// Measurement origin; the root's displayed window is `t - origin`.
    origin: Instant,
}

/// Call-stack recorder for one thread.
///
/// The owning thread feeds `begin_event`/`end_event`; any thread may take an
/// [`as_of`](Self::as_of) snapshot concurrently. The interior mutex is held
/// only for the individual operation.
pub struct ThreadCallstackReport {
    state: Mutex<CallstackState>,
}

impl ThreadCallstackReport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CallstackState {
                nodes: vec![Node {
                    parent: ROOT,
                    depth: 0,
                    time_spent: Duration::ZERO,
                    children: AHashMap::new(),
                }],
                current: ROOT,
                stack: Vec::new(),
                origin: Instant::now(),
            }),
        }
    }

    /// Resets the measurement origin used for the root's window.
    pub fn begin_report(&self, now: Instant) {
        self.state.lock().expect(POISONED).origin = now;
    }

    /// Enters a block: descend to (or create) the child keyed by `source`.
    pub fn begin_event(&self, e: OpenEvent) {
        let mut st = self.state.lock().expect(POISONED);
        let key = BlockKey(e.source);
        let current = st.current;
        let next = match st.nodes[current].children.get(&key).copied() {
            Some(id) => id,
            None => {
                let id = st.nodes.len();
                let depth = st.nodes[current].depth + 1;
                st.nodes.push(Node {
                    parent: current,
                    depth,
                    time_spent: Duration::ZERO,
                    children: AHashMap::new(),
                });
                st.nodes[current].children.insert(key, id);
                id
            }
        };
        st.current = next;
        st.stack.push(e);
    }

    /// Exits the innermost open block, accumulating its elapsed time.
    ///
    /// # Panics
    ///
    /// Panics when `e.source` does not match the innermost open block, when
    /// no block is open, or when `e.end` precedes the open event. All three
    /// are caller contract violations.
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
        let current = st.current;
        st.nodes[current].time_spent += spent;
        st.current = st.nodes[current].parent;
    }

    /// Takes a consistent snapshot extrapolated to `t`.
    ///
    /// The tree and open stack are cloned under the lock; the lock is then
    /// released and, in the clone only, every open block whose start is not
    /// after `t` receives `t - start`, and the root receives the measurement
    /// window `t - origin`. The live tree is unchanged.
    pub fn as_of(&self, t: Instant) -> CallstackSnapshot {
        let (mut nodes, stack, current, origin) = {
            let st = self.state.lock().expect(POISONED);
            (st.nodes.clone(), st.stack.clone(), st.current, st.origin)
        };

        nodes[ROOT].time_spent = t.checked_duration_since(origin).unwrap_or_default();

        // The path root -> current is the open stack, outermost first.
        let mut path = Vec::with_capacity(stack.len());
        let mut walk = current;
        while walk != ROOT {
            path.push(walk);
            walk = nodes[walk].parent;
        }
        path.reverse();
        debug_assert_eq!(path.len(), stack.len());

        for (open, &id) in stack.iter().zip(&path) {
            if let Some(extra) = t.checked_duration_since(open.start) {
                nodes[id].time_spent += extra;
            }
        }

        CallstackSnapshot { nodes }
    }
}

impl Default for ThreadCallstackReport {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Stand-alone deep copy of one thread's call-stack tree.
pub struct CallstackSnapshot {
    nodes: Vec<Node>,
}

impl CallstackSnapshot {
    /// The synthetic root; its time is the measurement window.
    pub fn root(&self) -> NodeView<'_> {
        NodeView {
            snap: self,
            id: ROOT,
        }
    }

    /// Renders the indented tree view of this snapshot.
    pub fn tree_str(&self, max_depth: usize, relative: bool) -> String {
        let mut out = String::new();
        format::write_tree(&mut out, self, max_depth, relative);
        out
    }

    /// Renders the folded view: one `path;to;block <ns>` line per node, each
    /// line carrying the node's self time. The lines sum to the root time.
    pub fn collapsed_str(&self, max_depth: usize) -> String {
        let mut out = String::new();
        format::write_collapsed(&mut out, self, max_depth);
        out
    }

    /// Folds the tree into per-identity totals.
    ///
    /// With `relative` set, each node contributes its self time
    /// (`time - Σ children`), so the fold sums to the root time and one
    /// identity used at several call sites aggregates across them. Otherwise
    /// each node contributes its full time.
    pub fn overview(&self, relative: bool) -> super::OverviewSnapshot {
        super::OverviewSnapshot {
            entries: format::fold_tree(self, relative),
        }
    }
}

/// Read-only handle on one snapshot node.
#[derive(Clone, Copy)]
pub struct NodeView<'a> {
    snap: &'a CallstackSnapshot,
    id: usize,
}

impl<'a> NodeView<'a> {
    pub fn time_spent(&self) -> Duration {
        self.snap.nodes[self.id].time_spent
    }

    pub fn depth(&self) -> usize {
        self.snap.nodes[self.id].depth
    }

    pub fn child_count(&self) -> usize {
        self.snap.nodes[self.id].children.len()
    }

    /// Child blocks in unspecified order; formatters sort.
    pub fn children(&self) -> impl Iterator<Item = (&'static BlockIdentity, NodeView<'a>)> + '_ {
        let snap = self.snap;
        self.snap.nodes[self.id]
            .children
            .iter()
            .map(move |(key, &id)| (key.0, NodeView { snap, id }))
    }
}

// ============================================================================
// Registry
// ============================================================================

const REGISTRY_POISONED: &str = "callstack registry lock poisoned";

/// Process-wide registry of per-thread call-stack recorders.
///
/// Registration takes the write lock; reports take the read lock only long
/// enough to clone the per-thread handles, then snapshot and format with no
/// lock held. The registry owns each recorder via `Arc`, so a thread
/// retiring mid-report never invalidates a reporter's snapshot source.
pub struct CallstackReport {
    threads: RwLock<AHashMap<u64, Arc<ThreadCallstackReport>>>,
    start: Instant,
}

impl CallstackReport {
    pub fn new() -> Self {
        Self {
            threads: RwLock::new(AHashMap::new()),
            start: Instant::now(),
        }
    }

    /// The registry [`TimedBlock`](super::TimedBlock) records into.
    pub fn global() -> &'static CallstackReport {
        static GLOBAL: OnceLock<CallstackReport> = OnceLock::new();
        GLOBAL.get_or_init(CallstackReport::new)
    }

    /// Instant this registry started measuring.
    pub fn start(&self) -> Instant {
        self.start
    }

    pub(crate) fn register(&self, label: u64, report: Arc<ThreadCallstackReport>) {
        self.threads
            .write()
            .expect(REGISTRY_POISONED)
            .insert(label, report);
    }

    pub(crate) fn deregister(&self, label: u64) {
        self.threads.write().expect(REGISTRY_POISONED).remove(&label);
    }

    /// Snapshots every registered thread at `now`, in thread-label order.
    fn snapshots(&self, now: Instant) -> Vec<(u64, CallstackSnapshot)> {
        let mut handles: Vec<(u64, Arc<ThreadCallstackReport>)> = {
            let threads = self.threads.read().expect(REGISTRY_POISONED);
            threads
                .iter()
                .map(|(&label, report)| (label, Arc::clone(report)))
                .collect()
        };
        handles.sort_by_key(|&(label, _)| label);
        handles
            .into_iter()
            .map(|(label, report)| (label, report.as_of(now)))
            .collect()
    }

    /// Per-thread call-stack trees down to `max_depth`.
    ///
    /// Percentages are of the root window when `relative` is false, of the
    /// parent's time when true; a zero denominator omits the percentage.
    pub fn callstack_str(&self, max_depth: usize, relative: bool) -> String {
        let now = Instant::now();
        let mut out = String::from("=== Start Performance Report (Callstack) ===\n");
        for (label, snap) in self.snapshots(now) {
            let _ = writeln!(out, "== Thread: {label} ==");
            format::write_tree(&mut out, &snap, max_depth, relative);
        }
        out.push_str("=== End Performance Report ===\n");
        out
    }

    /// Per-thread folded (flame-graph input) views down to `max_depth`.
    pub fn collapsed_str(&self, max_depth: usize) -> String {
        let now = Instant::now();
        let mut out = String::from("=== Start Performance Report (Collapsed Callstack) ===\n");
        for (label, snap) in self.snapshots(now) {
            let _ = writeln!(out, "== Thread: {label} ==");
            format::write_collapsed(&mut out, &snap, max_depth);
        }
        out.push_str("=== End Performance Report ===\n");
        out
    }

    /// Per-thread flat top-N views folded from the call-stack trees.
    pub fn overview_str(&self, top_n: usize, relative: bool) -> String {
        let now = Instant::now();
        let window = now.checked_duration_since(self.start).unwrap_or_default();
        let mut out = String::from("=== Start Performance Report (Overview) ===\n");
        for (label, snap) in self.snapshots(now) {
            let _ = writeln!(out, "== Thread: {label} ==");
            let entries = format::sorted_entries(&format::fold_tree(&snap, relative));
            format::write_overview(&mut out, entries, top_n, window);
        }
        out.push_str("=== End Performance Report ===\n");
        out
    }
}

impl Default for CallstackReport {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
