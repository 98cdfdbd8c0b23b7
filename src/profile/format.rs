//! Text rendering for profiler snapshots.
//!
//! Everything here is a pure function over a snapshot; no locks, no clocks.
//! Line shapes:
//!
//! ```text
//! Measured: --- 00:00:01.250-000 (100.00%)
//!  stage_read: 00:00:00.833-191 ( 66.65%)
//! Measured;stage_read 833191000
//! ```

use std::fmt::{self, Write as _};
use std::time::Duration;

use ahash::AHashMap;

use super::callstack::{CallstackSnapshot, NodeView};
use super::{BlockIdentity, BlockKey};

/// Root label shared by every report flavor.
const ROOT_LABEL: &str = "Measured";

/// Identity the tree fold attributes root self-time to.
static MEASURED: BlockIdentity = BlockIdentity::new(ROOT_LABEL);

// ============================================================================
// SplitDuration
// ============================================================================

/// A duration split into display units.
///
/// `Display` renders `HH:MM:SS.mmm-uuu`; nanoseconds are kept by the split
/// but discarded by the display.
#[derive(Clone, Copy, Debug)]
pub struct SplitDuration {
    hours: u64,
    minutes: u64,
    seconds: u64,
    millis: u64,
    micros: u64,
    nanos: u64,
}

impl From<Duration> for SplitDuration {
    fn from(d: Duration) -> Self {
        let total = d.as_nanos();
        Self {
            hours: (total / 3_600_000_000_000) as u64,
            minutes: (total / 60_000_000_000 % 60) as u64,
            seconds: (total / 1_000_000_000 % 60) as u64,
            millis: (total / 1_000_000 % 1_000) as u64,
            micros: (total / 1_000 % 1_000) as u64,
            nanos: (total % 1_000) as u64,
        }
    }
}

impl SplitDuration {
    pub fn hours(&self) -> u64 {
        self.hours
    }

    pub fn nanos(&self) -> u64 {
        self.nanos
    }
}

impl fmt::Display for SplitDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}.{:03}-{:03}",
            self.hours, self.minutes, self.seconds, self.millis, self.micros
        )
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

fn percent(num: Duration, denom: Duration) -> f64 {
    num.as_nanos() as f64 * 100.0 / denom.as_nanos() as f64
}

/// Children ordered by time descending, ties by descending identity address.
fn sorted_children<'a>(node: NodeView<'a>) -> Vec<(&'static BlockIdentity, NodeView<'a>)> {
    let mut children: Vec<_> = node.children().collect();
    children.sort_by(|(id_a, a), (id_b, b)| {
        b.time_spent()
            .cmp(&a.time_spent())
            .then_with(|| BlockKey(id_b).addr().cmp(&BlockKey(id_a).addr()))
    });
    children
}

// ============================================================================
// Tree view
// ============================================================================

/// Longest block name and deepest depth among nodes with `depth <= max_depth`.
fn max_metrics(node: NodeView<'_>, max_depth: usize) -> (usize, usize) {
    let mut name_len = 0;
    let mut depth = node.depth();
    if node.depth() < max_depth {
        for (id, child) in node.children() {
            let (child_len, child_depth) = max_metrics(child, max_depth);
            name_len = name_len.max(id.name().len()).max(child_len);
            depth = depth.max(child_depth);
        }
    }
    (name_len, depth)
}

pub(crate) fn write_tree(
    out: &mut String,
    snap: &CallstackSnapshot,
    max_depth: usize,
    relative: bool,
) {
    let root = snap.root();
    let (longest, deepest) = max_metrics(root, max_depth);
    let longest = longest.max(ROOT_LABEL.len());
    let depth_limit = max_depth.min(deepest);
    write_node(
        out,
        ROOT_LABEL,
        root,
        root.time_spent(),
        relative,
        longest,
        depth_limit,
    );
}

fn write_node(
    out: &mut String,
    name: &str,
    node: NodeView<'_>,
    denom: Duration,
    relative: bool,
    longest_name: usize,
    max_depth: usize,
) {
    let depth = node.depth();
    // Dash fill aligns every duration to one column across the tree.
    let offset = (longest_name - name.len()) + (max_depth - depth);
    let _ = write!(out, "{:depth$}{}: ", "", name);
    if offset > 0 {
        let _ = write!(out, "{:->offset$}", " ");
    }
    let _ = write!(out, "{}", SplitDuration::from(node.time_spent()));
    if !denom.is_zero() {
        let _ = write!(out, " ({:>6.2}%)", percent(node.time_spent(), denom));
    }
    out.push('\n');

    if depth < max_depth {
        let denom = if relative { node.time_spent() } else { denom };
        for (id, child) in sorted_children(node) {
            write_node(out, id.name(), child, denom, relative, longest_name, max_depth);
        }
    }
}

// ============================================================================
// Folded view
// ============================================================================

pub(crate) fn write_collapsed(out: &mut String, snap: &CallstackSnapshot, max_depth: usize) {
    collapse_node(out, ROOT_LABEL.to_string(), snap.root(), max_depth);
}

/// Emits descendants first, then this node's self time, so summing every
/// line reproduces the root total.
fn collapse_node(
    out: &mut String,
    path: String,
    node: NodeView<'_>,
    max_depth: usize,
) -> Duration {
    let mut child_time = Duration::ZERO;
    if node.depth() < max_depth {
        for (id, child) in sorted_children(node) {
            let mut sub = path.clone();
            sub.push(';');
            sub.push_str(id.name());
            child_time += collapse_node(out, sub, child, max_depth);
        }
        assert!(child_time <= node.time_spent());
    }
    let _ = writeln!(
        out,
        "{} {}",
        path,
        (node.time_spent() - child_time).as_nanos()
    );
    node.time_spent()
}

// ============================================================================
// Overview
// ============================================================================

/// Folds a call-stack tree into per-identity totals.
///
/// `relative` attributes each node's self time (`time - Σ children`) so the
/// totals telescope to the root time; otherwise each node contributes its
/// full time. The root bucket is the shared `Measured` identity.
pub(crate) fn fold_tree(
    snap: &CallstackSnapshot,
    relative: bool,
) -> AHashMap<BlockKey, Duration> {
    let mut buckets = AHashMap::new();
    fold_node(&mut buckets, BlockKey(&MEASURED), snap.root(), relative);
    buckets
}

fn fold_node(
    buckets: &mut AHashMap<BlockKey, Duration>,
    key: BlockKey,
    node: NodeView<'_>,
    relative: bool,
) -> Duration {
    let mut child_time = Duration::ZERO;
    for (id, child) in node.children() {
        child_time += fold_node(buckets, BlockKey(id), child, relative);
    }
    let attributed = if relative {
        node.time_spent() - child_time
    } else {
        node.time_spent()
    };
    *buckets.entry(key).or_default() += attributed;
    node.time_spent()
}

/// Entries ordered by time descending, ties by descending identity address.
pub(crate) fn sorted_entries(map: &AHashMap<BlockKey, Duration>) -> Vec<(BlockKey, Duration)> {
    let mut entries: Vec<_> = map.iter().map(|(&key, &time)| (key, time)).collect();
    entries.sort_by(|(key_a, a), (key_b, b)| {
        b.cmp(a).then_with(|| key_b.addr().cmp(&key_a.addr()))
    });
    entries
}

pub(crate) fn write_overview(
    out: &mut String,
    mut entries: Vec<(BlockKey, Duration)>,
    top_n: usize,
    window: Duration,
) {
    if top_n < entries.len() {
        entries.truncate(top_n);
    }
    let width = entries
        .iter()
        .map(|(key, _)| key.name().len())
        .max()
        .unwrap_or(0);
    for (key, time) in entries {
        let _ = write!(out, "{:>width$}: {}", key.name(), SplitDuration::from(time));
        if !window.is_zero() {
            let _ = write!(out, " ({:>6.2}%)", percent(time, window));
        }
        out.push('\n');
    }
}

// ============================================================================
// Tests
// ============================================================================
