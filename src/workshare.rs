use std::sync::atomic::AtomicI64;
use std::sync::{Arc, Mutex};

use crossbeam::utils::CachePadded;

use crate::context::ThreadContext;
use crate::sched;
use crate::sched::adaptive::AdaptiveChunk;
use crate::topology::{SingleNode, Topology};

/// Scheduling policy for a parallel loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Each worker's ranges are a pure function of its team id; no
    /// synchronization after construction.
    Static,
    /// Fixed-size chunks handed out from a shared atomic cursor.
    Dynamic,
    /// Shared cursor with chunk sizes that decay toward a floor as the loop
    /// drains.
    Guided,
    /// Per-worker slices rebalanced by stealing half of a victim's leftover.
    Adaptive,
}

/// One answer from [`WorkShare::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Run the half-open sub-range `[start, end)`, stepping by the loop's
    /// stride.
    Chunk(i64, i64),
    /// As [`Chunk`](Next::Chunk), and this call handed out the final piece of
    /// the whole iteration space. Raised only by the static policy's one-slice
    /// mode; callers that don't care can treat it exactly like `Chunk`.
    Last(i64, i64),
    /// Nothing left for this worker. Once a worker sees `Done`, every further
    /// call returns `Done` as well.
    Done,
}

impl Next {
    /// The returned range, or `None` for [`Done`](Next::Done).
    pub fn bounds(self) -> Option<(i64, i64)> {
        match self {
            Next::Chunk(start, end) | Next::Last(start, end) => Some((start, end)),
            Next::Done => None,
        }
    }

    pub fn is_done(self) -> bool {
        matches!(self, Next::Done)
    }
}

/// How the adaptive dispatcher picks steal victims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VictimPolicy {
    /// Uniformly random over the whole team.
    Random,
    /// Prefer victims on the thief's own NUMA node, per the configured
    /// [`Topology`]. With `strict` set, never steal across nodes; otherwise
    /// fall back to a random victim once the local node looks empty.
    NumaAware { strict: bool },
}

/// Runtime knobs for a work share. The defaults match the common case: a
/// lock-free cursor and random victim selection on a single node.
#[derive(Clone)]
pub struct Config {
    /// Use the atomic fast paths for the dynamic and guided policies. When
    /// false, both fall back to a short critical section under the work-share
    /// mutex.
    pub lock_free: bool,
    /// Victim selection for the adaptive policy.
    pub victim: VictimPolicy,
    /// Team placement, for NUMA-aware victim selection. `None` means a single
    /// node holding the whole team.
    pub topology: Option<Arc<dyn Topology>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_free: true,
            victim: VictimPolicy::Random,
            topology: None,
        }
    }
}

/// The distribution state of one parallel loop, shared by the whole team.
///
/// Structurally immutable once built: the dispatchers only mutate the atomic
/// cursors (and, for the adaptive policy, the per-worker chunks). The caller
/// must publish the work share to the team before the first
/// [`next`](Self::next) call and keep it alive until every worker has seen
/// [`Next::Done`].
pub struct WorkShare {
    pub(crate) policy: Policy,
    pub(crate) lb: i64,
    pub(crate) ub: i64,
    pub(crate) incr: i64,
    pub(crate) chunk_size: i64,
    pub(crate) nthreads: usize,
    /// Total iterations in the loop.
    pub(crate) trips: i64,
    /// Dynamic policy: the cursor may be advanced with a single `fetch_add`
    /// that overshoots `ub`; only enabled when the bounds leave headroom.
    pub(crate) flat: bool,
    lock_free: bool,
    pub(crate) victim: VictimPolicy,
    pub(crate) topology: Arc<dyn Topology>,
    /// Slow-path critical section for the lock-based dynamic/guided modes.
    pub(crate) lock: Mutex<()>,
    /// Next unallocated loop value, used by the dynamic and guided policies.
    pub(crate) next_cursor: CachePadded<AtomicI64>,
    /// Adaptive policy: iterations not yet executed-and-settled.
    pub(crate) remaining: CachePadded<AtomicI64>,
    /// Adaptive policy: one slice per worker, indexed by team id.
    pub(crate) chunks: Vec<CachePadded<AdaptiveChunk>>,
}

impl WorkShare {
    /// Describe a loop over `lb, lb + incr, ..` strictly bounded by `ub`, to
    /// be distributed over `nthreads` workers.
    ///
    /// A stride of zero or bounds that are empty in the stride's direction
    /// yield an empty loop: every `next` call returns [`Next::Done`]. For the
    /// static policy a `chunk_size` of zero means one contiguous slice per
    /// worker; the other policies treat zero as a granularity of one.
    ///
    /// # Panics
    ///
    /// Panics if `nthreads` is zero or `chunk_size` is negative.
    pub fn new(
        policy: Policy,
        lb: i64,
        ub: i64,
        incr: i64,
        chunk_size: i64,
        nthreads: usize,
    ) -> Self {
        Self::with_config(policy, lb, ub, incr, chunk_size, nthreads, Config::default())
    }

    /// As [`new`](Self::new), with explicit [`Config`] knobs.
    pub fn with_config(
        policy: Policy,
        lb: i64,
        ub: i64,
        incr: i64,
        chunk_size: i64,
        nthreads: usize,
        config: Config,
    ) -> Self {
        assert!(nthreads > 0, "a work share needs at least one worker");
        assert!(chunk_size >= 0, "chunk size must be non-negative");

        let (lb, ub, incr) = if incr == 0 || (incr > 0) != (ub > lb) {
            log::debug!(
                "empty or invalid loop [{lb}, {ub}) step {incr}; treating as empty"
            );
            (lb, lb, if incr == 0 { 1 } else { incr })
        } else {
            (lb, ub, incr)
        };

        let chunk_size = match policy {
            // granularity must be at least one iteration
            Policy::Dynamic | Policy::Guided | Policy::Adaptive => chunk_size.max(1),
            Policy::Static => chunk_size,
        };

        let trips = trip_count(lb, ub, incr);
        let flat = policy == Policy::Dynamic && flat_mode_ok(ub, incr, chunk_size, nthreads);

        let chunks = if policy == Policy::Adaptive {
            (0..nthreads)
                .map(|_| CachePadded::new(AdaptiveChunk::new()))
                .collect()
        } else {
            Vec::new()
        };

        let topology = config
            .topology
            .unwrap_or_else(|| Arc::new(SingleNode::new(nthreads)));

        log::debug!(
            "new {policy:?} work share: [{lb}, {ub}) step {incr}, chunk {chunk_size}, \
             {trips} iterations over {nthreads} workers"
        );

        Self {
            policy,
            lb,
            ub,
            incr,
            chunk_size,
            nthreads,
            trips,
            flat,
            lock_free: config.lock_free,
            victim: config.victim,
            topology,
            lock: Mutex::new(()),
            next_cursor: CachePadded::new(AtomicI64::new(lb)),
            remaining: CachePadded::new(AtomicI64::new(trips)),
            chunks,
        }
    }

    /// The next sub-range for the calling worker, or [`Next::Done`] once the
    /// worker is finished with this loop.
    ///
    /// # Panics
    ///
    /// Panics if the context's team id is out of range for this team.
    pub fn next(&self, ctx: &mut ThreadContext) -> Next {
        assert!(
            ctx.team_id() < self.nthreads,
            "team id {} out of range for a team of {}",
            ctx.team_id(),
            self.nthreads
        );

        match self.policy {
            Policy::Static => sched::static_::next(self, ctx),
            Policy::Dynamic if self.lock_free => sched::dynamic::next(self),
            Policy::Dynamic => sched::dynamic::next_locked(self),
            Policy::Guided if self.lock_free => sched::guided::next(self),
            Policy::Guided => sched::guided::next_locked(self),
            Policy::Adaptive => sched::adaptive::next(self, ctx),
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn nthreads(&self) -> usize {
        self.nthreads
    }

    /// Total number of iterations in the loop.
    pub fn trip_count(&self) -> i64 {
        self.trips
    }
}

/// Number of iterations in `[lb, ub)` with stride `incr`, rounding partial
/// strides up.
fn trip_count(lb: i64, ub: i64, incr: i64) -> i64 {
    let round = incr + if incr > 0 { -1 } else { 1 };
    (ub - lb + round) / incr
}

/// Whether every worker can overshoot the cursor past `ub` by one `fetch_add`
/// without wrapping an `i64`.
fn flat_mode_ok(ub: i64, incr: i64, chunk_size: i64, nthreads: usize) -> bool {
    let Some(step) = chunk_size.checked_mul(incr) else {
        return false;
    };
    let Some(slack) = step.checked_mul(nthreads as i64 + 1) else {
        return false;
    };
    ub.checked_add(slack).is_some()
}
