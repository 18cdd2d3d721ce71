//! Iteration scheduling for teams of worker threads.
//!
//! A parallel loop over the range `[lb, ub)` with stride `incr` is described by a
//! single [`WorkShare`] that every member of the team reads. Each worker repeatedly
//! asks the work share for its next sub-range and runs the loop body over it, until
//! the iteration space is exhausted. The work share guarantees that the handed-out
//! ranges cover the iteration space exactly once, no matter how the workers' calls
//! interleave.
//!
//! Four policies are supported, with very different contention and locality
//! trade-offs:
//!
//! * [`Policy::Static`] precomputes each worker's ranges from its team id alone and
//!   needs no synchronization at all.
//! * [`Policy::Dynamic`] hands out fixed-size chunks from a shared atomic cursor,
//!   so faster workers take more chunks.
//! * [`Policy::Guided`] also uses a shared cursor, but each grab takes roughly a
//!   1/N share of whatever is left, so chunks start large and decay to a floor.
//! * [`Policy::Adaptive`] gives each worker a private slice up front; workers that
//!   drain their slice steal half of a victim's leftover, so imbalanced loops
//!   rebalance without any shared cursor on the fast path.
//!
//! The caller is responsible for the team itself: creating the threads, publishing
//! the work share to them (for example behind an [`Arc`](std::sync::Arc) or a
//! scoped-thread borrow), and barriering before the share is dropped. Each worker
//! brings its own [`ThreadContext`], which carries its team id and the small
//! amount of per-worker scheduling state.
//!
//! ```
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use workshare::{Policy, ThreadContext, WorkShare};
//!
//! // a loop over 0..1000, dealt out in chunks of 16 to a team of 4
//! let ws = WorkShare::new(Policy::Dynamic, 0, 1000, 1, 16, 4);
//!
//! let sum = AtomicI64::new(0);
//! std::thread::scope(|s| {
//!     for id in 0..4 {
//!         let (ws, sum) = (&ws, &sum);
//!         s.spawn(move || {
//!             let mut ctx = ThreadContext::new(id);
//!             while let Some((start, end)) = ws.next(&mut ctx).bounds() {
//!                 let mut x = start;
//!                 while x < end {
//!                     sum.fetch_add(x, Ordering::Relaxed);
//!                     x += 1;
//!                 }
//!             }
//!         });
//!     }
//! });
//!
//! assert_eq!(sum.load(Ordering::Relaxed), (0..1000).sum::<i64>());
//! ```
//!
//! A work share is immutable in structure once built; the dispatchers only mutate
//! a small set of atomic cursors inside it. Reusing a [`ThreadContext`] across
//! consecutive loops requires [`ThreadContext::reset`] in between, since the
//! static policy keeps its trip counter there.

#![forbid(unsafe_code)]

mod context;
mod sched;
mod workshare;

pub mod topology;

pub use context::ThreadContext;
pub use workshare::{Config, Next, Policy, VictimPolicy, WorkShare};
