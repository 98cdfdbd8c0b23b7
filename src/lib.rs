//! Infrastructure primitives for staged worker pipelines.
//!
//! Two independent pieces, no dependency between them:
//!
//! - [`channel`]: a bounded single-producer single-consumer channel with
//!   half-close from either side. Built for stage handoff (reader -> codec ->
//!   writer): the producer blocks on backpressure, the consumer drains in
//!   batches, and closing either end shuts the stream down cleanly: a
//!   producer close still delivers everything queued, a consumer close stops
//!   the producer on its next send.
//! - [`profile`]: per-thread block profiling. Worker threads time named
//!   blocks with scope guards; a reporting thread renders call-stack trees,
//!   folded flame-graph input, or a flat top-N overview for every live
//!   thread without stopping any of them.
//!
//! Typical stage loop:
//!
//! ```
//! use pipekit::channel::bounded;
//! use pipekit::profile_block;
//!
//! let (mut tx, mut rx) = bounded::<Vec<u8>>(4);
//!
//! let producer = std::thread::spawn(move || {
//!     for chunk in [vec![1u8, 2], vec![3u8]] {
//!         profile_block!("stage_read");
//!         if tx.send(chunk).is_err() {
//!             break; // downstream hung up
//!         }
//!     }
//! });
//!
//! let mut total = 0;
//! while let Some(chunk) = rx.recv() {
//!     profile_block!("stage_write");
//!     total += chunk.len();
//! }
//! producer.join().unwrap();
//! assert_eq!(total, 3);
//! ```

pub mod channel;
pub mod profile;

pub use channel::{bounded, Receiver, SendError, Sender, TrySendError};
pub use profile::{BlockIdentity, TimedBlock};
