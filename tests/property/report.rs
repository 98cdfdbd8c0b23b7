//! Property tests for profiler snapshots and report folding.

use std::time::{Duration, Instant};

use proptest::prelude::*;

use pipekit::profile::{
    BlockIdentity, CloseEvent, NodeView, OpenEvent, ThreadCallstackReport, FULL_DEPTH,
};

static BLOCKS: [BlockIdentity; 4] = [
    BlockIdentity::new("alpha"),
    BlockIdentity::new("beta"),
    BlockIdentity::new("gamma"),
    BlockIdentity::new("delta"),
];

/// Replays a random script of opens (choice 0..4) and closes (choice 4)
/// with a strictly advancing synthetic clock, closing any blocks left open
/// at the end. Returns the recorder plus the measurement window.
fn run_script(script: &[(u8, u16)]) -> (ThreadCallstackReport, Instant, Instant) {
    let rep = ThreadCallstackReport::new();
    let base = Instant::now();
    rep.begin_report(base);

    let mut cursor = base;
    let mut open: Vec<&'static BlockIdentity> = Vec::new();
    for &(choice, dt) in script {
        cursor += Duration::from_millis(dt as u64 + 1);
        if choice == 4 || open.len() >= 8 {
            if let Some(source) = open.pop() {
                rep.end_event(CloseEvent {
                    source,
                    end: cursor,
                });
            }
        } else {
            let source = &BLOCKS[choice as usize];
            rep.begin_event(OpenEvent {
                source,
                start: cursor,
            });
            open.push(source);
        }
    }
    while let Some(source) = open.pop() {
        cursor += Duration::from_millis(1);
        rep.end_event(CloseEvent {
            source,
            end: cursor,
        });
    }
    (rep, base, cursor)
}

fn script_strategy() -> impl Strategy<Value = Vec<(u8, u16)>> {
    proptest::collection::vec((0u8..=4, 0u16..50), 0..60)
}

fn check_conservation(node: NodeView<'_>) {
    let child_sum: Duration = node.children().map(|(_, child)| child.time_spent()).sum();
    assert!(
        node.time_spent() >= child_sum,
        "node at depth {} holds {:?} but its children sum to {:?}",
        node.depth(),
        node.time_spent(),
        child_sum,
    );
    for (_, child) in node.children() {
        check_conservation(child);
    }
}

proptest! {
    /// Every node's time covers its children; the root covers the window.
    #[test]
    fn tree_time_is_conserved(script in script_strategy()) {
        let (rep, base, end) = run_script(&script);
        let snap = rep.as_of(end);
        check_conservation(snap.root());
        prop_assert_eq!(snap.root().time_spent(), end - base);
    }

    /// The numeric fields of the folded lines sum to the root time, at any
    /// truncation depth.
    #[test]
    fn collapsed_lines_sum_to_root(script in script_strategy(), max_depth in 1usize..5) {
        let (rep, _, end) = run_script(&script);
        let snap = rep.as_of(end);

        for depth in [max_depth, FULL_DEPTH] {
            let text = snap.collapsed_str(depth);
            let sum: u128 = text
                .lines()
                .map(|line| {
                    line.rsplit(' ')
                        .next()
                        .and_then(|field| field.parse::<u128>().ok())
                        .expect("folded line must end in a nanosecond count")
                })
                .sum();
            prop_assert_eq!(sum, snap.root().time_spent().as_nanos());
        }
    }

    /// Relative attribution telescopes: summing every bucket reproduces the
    /// root time exactly.
    #[test]
    fn relative_overview_attributes_exactly_the_root_time(script in script_strategy()) {
        let (rep, _, end) = run_script(&script);
        let snap = rep.as_of(end);
        prop_assert_eq!(snap.overview(true).total(), snap.root().time_spent());
    }

    /// A snapshot is frozen: whatever the thread records afterwards, the
    /// rendered report does not change.
    #[test]
    fn snapshots_are_independent_of_later_events(script in script_strategy()) {
        let (rep, _, end) = run_script(&script);
        let snap = rep.as_of(end);
        let before = snap.tree_str(FULL_DEPTH, false);

        let source = &BLOCKS[0];
        rep.begin_event(OpenEvent { source, start: end });
        rep.end_event(CloseEvent { source, end: end + Duration::from_millis(3) });

        prop_assert_eq!(snap.tree_str(FULL_DEPTH, false), before);
    }
}

/// Two blocks with identical accumulated time order by descending address.
#[test]
fn equal_times_sort_by_descending_address() {
    static X: BlockIdentity = BlockIdentity::new("tie_x");
    static Y: BlockIdentity = BlockIdentity::new("tie_y");

    let rep = ThreadCallstackReport::new();
    let base = Instant::now();
    rep.begin_report(base);

    let mut cursor = base;
    for source in [&X, &Y] {
        rep.begin_event(OpenEvent {
            source,
            start: cursor,
        });
        cursor += Duration::from_millis(5);
        rep.end_event(CloseEvent {
            source,
            end: cursor,
        });
    }

    let tree = rep.as_of(cursor).tree_str(FULL_DEPTH, false);
    let (first, second) = if (&X as *const BlockIdentity) > (&Y as *const BlockIdentity) {
        ("tie_x", "tie_y")
    } else {
        ("tie_y", "tie_x")
    };
    let first_at = tree.find(first).expect("first tie entry missing");
    let second_at = tree.find(second).expect("second tie entry missing");
    assert!(first_at < second_at, "tie-break order violated:\n{tree}");
}
