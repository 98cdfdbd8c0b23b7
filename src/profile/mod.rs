//! Per-thread hierarchical block profiling.
//!
//! # Scope
//!
//! Worker threads time named code blocks by holding a [`TimedBlock`] guard;
//! nesting of guards mirrors the call stack. Every thread that records at
//! least one block registers itself with two process-wide registries, and a
//! reporting thread can at any time render:
//!
//! - a call-stack tree per thread ([`CallstackReport::callstack_str`]),
//! - a folded flame-graph style view ([`CallstackReport::collapsed_str`]),
//! - a flat top-N overview ([`OverviewReport::overview_str`] and
//!   [`CallstackReport::overview_str`]).
//!
//! Reports never stop the workers: each per-thread recorder is cloned into a
//! consistent snapshot under a short exclusive lock, open blocks are
//! extrapolated to the report instant, and all formatting happens on the
//! reporter's own time.
//!
//! # Block identity
//!
//! A [`BlockIdentity`] is compared by address, never by its text, so two
//! blocks may share a display name without sharing accounting. The API takes
//! `&'static BlockIdentity` to pin addresses for the process lifetime; the
//! usual shape is a function-local `static`, which [`profile_block!`] writes
//! for you.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub mod callstack;
pub mod format;
pub mod overview;

pub use callstack::{CallstackReport, CallstackSnapshot, NodeView, ThreadCallstackReport};
pub use format::SplitDuration;
pub use overview::{OverviewReport, OverviewSnapshot, ThreadOverviewReport};

/// `top_n` value that keeps every entry.
pub const SHOW_ALL: usize = usize::MAX;

/// `max_depth` value that never truncates the tree.
pub const FULL_DEPTH: usize = usize::MAX;

/// Address-stable label for a timed block.
///
/// Identity is the address: two instances with equal text are two distinct
/// blocks. Keep instances in static storage.
#[derive(Debug)]
pub struct BlockIdentity {
    name: &'static str,
}

impl BlockIdentity {
    /// Creates an identity with the given display name.
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    /// Display name; carries no identity.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Map/sort key wrapping a block by its address.
#[derive(Clone, Copy)]
pub(crate) struct BlockKey(pub(crate) &'static BlockIdentity);

impl BlockKey {
    pub(crate) fn addr(self) -> usize {
        self.0 as *const BlockIdentity as usize
    }

    pub(crate) fn name(self) -> &'static str {
        self.0.name()
    }
}

impl PartialEq for BlockKey {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for BlockKey {}

impl Hash for BlockKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockKey({:#x} {:?})", self.addr(), self.name())
    }
}

/// A block was entered.
#[derive(Clone, Copy, Debug)]
pub struct OpenEvent {
    pub source: &'static BlockIdentity,
    pub start: Instant,
}

/// A block was exited. Must pair with the most recent unmatched
/// [`OpenEvent`] for the same identity.
#[derive(Clone, Copy, Debug)]
pub struct CloseEvent {
    pub source: &'static BlockIdentity,
    pub end: Instant,
}

// ============================================================================
// Process-wide switches and thread registration
// ============================================================================

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Turns event recording on or off process-wide.
///
/// Guards created while disabled record nothing; guards already open keep
/// their close event so recorder stacks stay balanced.
pub fn set_enabled(on: bool) {
    ENABLED.store(on, Ordering::Release);
}

/// Returns whether recording is currently enabled.
pub fn enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

static NEXT_THREAD_LABEL: AtomicU64 = AtomicU64::new(1);

/// Per-thread recorder handles, registered with the global registries on the
/// thread's first recorded event and deregistered when the thread exits.
///
/// The registries keep their own `Arc`s, so a reporter formatting this
/// thread's snapshot is unaffected by the thread retiring mid-report.
struct LocalProfile {
    label: u64,
    callstack: Arc<ThreadCallstackReport>,
    overview: Arc<ThreadOverviewReport>,
}

impl LocalProfile {
    fn register() -> Self {
        let label = NEXT_THREAD_LABEL.fetch_add(1, Ordering::Relaxed);
        let callstack = Arc::new(ThreadCallstackReport::new());
        let overview = Arc::new(ThreadOverviewReport::new());
        CallstackReport::global().register(label, Arc::clone(&callstack));
        OverviewReport::global().register(label, Arc::clone(&overview));
        Self {
            label,
            callstack,
            overview,
        }
    }
}

impl Drop for LocalProfile {
    fn drop(&mut self) {
        CallstackReport::global().deregister(self.label);
        OverviewReport::global().deregister(self.label);
    }
}

thread_local! {
    static LOCAL_PROFILE: RefCell<Option<LocalProfile>> = const { RefCell::new(None) };
}

// ============================================================================
// TimedBlock
// ============================================================================

/// Scope guard timing one entry into a block.
///
/// Construction records the open event, drop records the close event, on
/// every exit path including unwinding. Guards on one thread must be dropped
/// in reverse creation order; anything else is a caller bug and panics in the
/// recorder.
pub struct TimedBlock {
    source: &'static BlockIdentity,
    recorded: bool,
}

impl TimedBlock {
    /// Opens `source` on the current thread, registering the thread with the
    /// global registries on first use.
    pub fn new(source: &'static BlockIdentity) -> Self {
        if !enabled() {
            return Self {
                source,
                recorded: false,
            };
        }
        let start = Instant::now();
        // try_with: a guard created while the thread's TLS is already being
        // torn down silently records nothing.
        let recorded = LOCAL_PROFILE
            .try_with(|slot| {
                let mut slot = slot.borrow_mut();
                let local = slot.get_or_insert_with(LocalProfile::register);
                let open = OpenEvent { source, start };
                local.callstack.begin_event(open);
                local.overview.begin_event(open);
            })
            .is_ok();
        Self { source, recorded }
    }
}

impl Drop for TimedBlock {
    fn drop(&mut self) {
        if !self.recorded {
            return;
        }
        let end = Instant::now();
        let _ = LOCAL_PROFILE.try_with(|slot| {
            if let Some(local) = slot.borrow().as_ref() {
                let close = CloseEvent {
                    source: self.source,
                    end,
                };
                local.callstack.end_event(close);
                local.overview.end_event(close);
            }
        });
    }
}

/// Times the rest of the enclosing scope under a per-call-site static
/// [`BlockIdentity`].
///
/// ```
/// fn compress_chunk() {
///     pipekit::profile_block!("compress_chunk");
///     // ...
/// }
/// ```
#[macro_export]
macro_rules! profile_block {
    ($name:expr) => {
        let _timed_block = {
            static BLOCK: $crate::profile::BlockIdentity =
                $crate::profile::BlockIdentity::new($name);
            $crate::profile::TimedBlock::new(&BLOCK)
        };
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    static A: BlockIdentity = BlockIdentity::new("same");
    static B: BlockIdentity = BlockIdentity::new("same");

    #[test]
    fn identity_is_by_address_not_text() {
        assert_eq!(A.name(), B.name());
        assert_ne!(BlockKey(&A), BlockKey(&B));
        assert_eq!(BlockKey(&A), BlockKey(&A));
    }

    #[test]
    fn block_key_hash_follows_address() {
        use std::collections::hash_map::DefaultHasher;

        let hash = |key: BlockKey| {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            hasher.finish()
        };
        assert_eq!(hash(BlockKey(&A)), hash(BlockKey(&A)));
        assert_ne!(hash(BlockKey(&A)), hash(BlockKey(&B)));
    }
}
