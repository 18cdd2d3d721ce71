//! The adaptive scheduling method.
//!
//! Each worker owns a private half-open slice of the zero-based iteration
//! space, carved out lazily on its first call. The owner consumes from `begin`
//! upward; thieves take half of a victim's leftover from `end` downward. A
//! worker whose slice drains settles its executed-iteration count into the
//! shared `remaining` counter and turns thief until either a steal lands or
//! `remaining` reaches zero, at which point the whole team converges to
//! `Done`.
//!
//! The local fast path takes no lock: the owner advances `begin`, issues a
//! full fence, and re-checks against `end`. A thief retreats `end` only under
//! the chunk lock, with the mirrored store-fence-load sequence, so on any
//! interleaving at least one side observes the other and backs off to the
//! locked slow path. Release/acquire alone is not enough here; both sides
//! need the `SeqCst` fence between their own store and the opposing load.

use std::sync::atomic::{fence, AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use crossbeam::utils::Backoff;

use crate::context::ThreadContext;
use crate::workshare::{Next, VictimPolicy, WorkShare};

/// One worker's slice of the iteration space, in zero-based iteration counts.
pub(crate) struct AdaptiveChunk {
    /// First unconsumed iteration. Advanced lock-free by the owner's fast
    /// path, under `lock` by everyone else.
    begin: AtomicI64,
    /// One past the last unconsumed iteration. Retreats only under `lock`.
    end: AtomicI64,
    lock: Mutex<()>,
    /// Iterations handed to the owner and not yet settled into the work
    /// share's `remaining` counter. Written only by the owning worker.
    nb_executed: AtomicI64,
    initialized: AtomicBool,
}

impl AdaptiveChunk {
    pub(crate) fn new() -> Self {
        Self {
            begin: AtomicI64::new(0),
            end: AtomicI64::new(0),
            lock: Mutex::new(()),
            nb_executed: AtomicI64::new(0),
            initialized: AtomicBool::new(false),
        }
    }
}

pub(crate) fn next(ws: &WorkShare, ctx: &mut ThreadContext) -> Next {
    let me = ctx.team_id();
    let local = &ws.chunks[me];

    if !local.initialized.load(Ordering::Acquire) {
        init_worker(ws, me);
    }

    if let Some((s0, e0)) = pop_local(local, ws.chunk_size) {
        return transform(ws, s0, e0);
    }

    // local slice drained; settle our executed count before turning thief
    let executed = local.nb_executed.swap(0, Ordering::Relaxed);
    let left = ws.remaining.fetch_sub(executed, Ordering::AcqRel) - executed;
    debug_assert!(left >= 0, "more iterations executed than exist");
    if left == 0 {
        return Next::Done;
    }

    let backoff = Backoff::new();
    while ws.remaining.load(Ordering::Acquire) > 0 {
        if let Some((s0, e0)) = steal(ws, ctx) {
            return transform(ws, s0, e0);
        }
        backoff.snooze();
    }
    Next::Done
}

/// Carve this worker's initial slab out of `[0, n)`: equal slabs in team-id
/// order, the last worker absorbing the remainder.
fn init_worker(ws: &WorkShare, me: usize) {
    let local = &ws.chunks[me];
    let slab = ws.trips / ws.nthreads as i64;

    let begin = slab * me as i64;
    let end = if me == ws.nthreads - 1 {
        ws.trips
    } else {
        begin + slab
    };

    // thieves probe begin/end without caring about `initialized`, so the slab
    // must appear atomically: publish it under the chunk lock
    {
        let _guard = local.lock.lock().unwrap();
        local.begin.store(begin, Ordering::Relaxed);
        local.end.store(end, Ordering::Relaxed);
    }
    local.nb_executed.store(0, Ordering::Relaxed);
    local.initialized.store(true, Ordering::Release);

    log::trace!("worker {me} starts with slab [{begin}, {end})");
}

/// Claim up to `chunk_size` iterations from the front of the local slice.
fn pop_local(local: &AdaptiveChunk, chunk_size: i64) -> Option<(i64, i64)> {
    // optimistic: advance `begin`, fence, then validate against `end`
    let begin = local.begin.load(Ordering::Relaxed) + chunk_size;
    local.begin.store(begin, Ordering::Release);
    fence(Ordering::SeqCst);

    if begin < local.end.load(Ordering::Acquire) {
        local.nb_executed.fetch_add(chunk_size, Ordering::Relaxed);
        return Some((begin - chunk_size, begin));
    }

    // a thief may have pulled `end` in under us: roll back and settle under
    // the lock
    let begin = begin - chunk_size;
    local.begin.store(begin, Ordering::Relaxed);

    let size;
    {
        let _guard = local.lock.lock().unwrap();
        size = (local.end.load(Ordering::Relaxed) - begin).min(chunk_size);
        if size > 0 {
            local.begin.store(begin + size, Ordering::Release);
        }
    }

    if size > 0 {
        local.nb_executed.fetch_add(size, Ordering::Relaxed);
        Some((begin, begin + size))
    } else {
        None
    }
}

/// Pick a victim per the configured policy and try to take half of its
/// leftover. Returns the sub-range the thief should run now; the rest of the
/// haul is parked in the thief's own slice.
fn steal(ws: &WorkShare, ctx: &mut ThreadContext) -> Option<(i64, i64)> {
    let victim = match ws.victim {
        VictimPolicy::Random => pick_random(ws, ctx)?,
        VictimPolicy::NumaAware { strict } => pick_numa(ws, ctx, strict)?,
    };
    steal_from(ws, victim, ctx.team_id())
}

fn pick_random(ws: &WorkShare, ctx: &mut ThreadContext) -> Option<usize> {
    if ws.nthreads == 1 {
        return None;
    }
    loop {
        let victim = ctx.rand_below(ws.nthreads);
        if victim != ctx.team_id() {
            return Some(victim);
        }
    }
}

/// Probe a handful of same-node workers for one that still looks non-empty;
/// past that, fall back to a random victim unless `strict` confines steals to
/// the node.
fn pick_numa(ws: &WorkShare, ctx: &mut ThreadContext, strict: bool) -> Option<usize> {
    let me = ctx.team_id();
    let peers = ws.topology.workers_on(ws.topology.node_of(me));

    if peers.len() > 1 {
        for _ in 0..(1 + peers.len() / 2) {
            let victim = loop {
                let candidate = peers[ctx.rand_below(peers.len())];
                if candidate != me {
                    break candidate;
                }
            };
            let chunk = &ws.chunks[victim];
            if chunk.end.load(Ordering::Relaxed) > chunk.begin.load(Ordering::Relaxed) {
                return Some(victim);
            }
        }
    }

    if strict {
        return None;
    }
    pick_random(ws, ctx)
}

fn steal_from(ws: &WorkShare, victim: usize, thief: usize) -> Option<(i64, i64)> {
    debug_assert_ne!(victim, thief, "a worker must not steal from itself");
    let vchunk = &ws.chunks[victim];

    // unlocked snapshot; only worth locking when there is something to halve
    let size = (vchunk.end.load(Ordering::Relaxed) - vchunk.begin.load(Ordering::Relaxed)) / 2;
    if size <= 0 {
        return None;
    }

    {
        let _guard = vchunk.lock.lock().unwrap();

        let end = vchunk.end.load(Ordering::Relaxed) - size;
        vchunk.end.store(end, Ordering::Release);
        fence(Ordering::SeqCst);

        if end < vchunk.begin.load(Ordering::Acquire) {
            // the victim drained while we were deciding; put the range back
            vchunk.end.store(end + size, Ordering::Relaxed);
            log::trace!("worker {thief} lost the race stealing from {victim}");
            return None;
        }

        let run_now = size.min(ws.chunk_size);
        let (start, stop) = (end, end + run_now);
        drop(_guard);

        // park the rest of the haul in our own (drained) slice
        let local = &ws.chunks[thief];
        {
            let _guard = local.lock.lock().unwrap();
            local.begin.store(stop, Ordering::Relaxed);
            local.end.store(end + size, Ordering::Release);
        }
        local.nb_executed.fetch_add(run_now, Ordering::Relaxed);

        log::trace!("worker {thief} stole {size} iterations from {victim}");
        Some((start, stop))
    }
}

fn transform(ws: &WorkShare, s0: i64, e0: i64) -> Next {
    Next::Chunk(ws.lb + s0 * ws.incr, ws.lb + e0 * ws.incr)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::testing;
    use crate::topology::{NodeMap, Topology};
    use crate::workshare::{Config, Policy};

    #[test]
    fn test_initial_slabs() {
        let ws = WorkShare::new(Policy::Adaptive, 0, 1024, 1, 8, 4);

        for me in 0..4 {
            init_worker(&ws, me);
            let chunk = &ws.chunks[me];
            assert_eq!(chunk.begin.load(Ordering::Relaxed), 256 * me as i64);
            assert_eq!(chunk.end.load(Ordering::Relaxed), 256 * (me as i64 + 1));
        }
        assert_eq!(ws.remaining.load(Ordering::Relaxed), 1024);
    }

    #[test]
    fn test_last_slab_absorbs_remainder() {
        let ws = WorkShare::new(Policy::Adaptive, 0, 10, 1, 1, 4);

        for me in 0..4 {
            init_worker(&ws, me);
        }
        // slabs of 2 plus a final slab of 4
        assert_eq!(ws.chunks[3].begin.load(Ordering::Relaxed), 6);
        assert_eq!(ws.chunks[3].end.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_pop_local_claims_front() {
        let ws = WorkShare::new(Policy::Adaptive, 0, 1024, 1, 8, 4);
        init_worker(&ws, 0);

        assert_eq!(pop_local(&ws.chunks[0], 8), Some((0, 8)));
        assert_eq!(pop_local(&ws.chunks[0], 8), Some((8, 16)));
        assert_eq!(ws.chunks[0].nb_executed.load(Ordering::Relaxed), 16);
    }

    #[test]
    fn test_pop_local_clamps_tail() {
        let ws = WorkShare::new(Policy::Adaptive, 0, 10, 1, 8, 1);
        init_worker(&ws, 0);

        assert_eq!(pop_local(&ws.chunks[0], 8), Some((0, 8)));
        // only 2 left: the optimistic step fails and the locked path clamps
        assert_eq!(pop_local(&ws.chunks[0], 8), Some((8, 10)));
        assert_eq!(pop_local(&ws.chunks[0], 8), None);
    }

    #[test]
    fn test_steal_halves_victim() {
        let ws = WorkShare::new(Policy::Adaptive, 0, 1024, 1, 8, 4);
        init_worker(&ws, 0);
        init_worker(&ws, 1);

        // worker 0 consumes 32 of its [0, 256) slab
        for _ in 0..4 {
            pop_local(&ws.chunks[0], 8).unwrap();
        }

        // a thief takes half of the 224 leftover from the high end
        let got = steal_from(&ws, 0, 1).unwrap();
        assert_eq!(got, (144, 152));
        assert_eq!(ws.chunks[0].end.load(Ordering::Relaxed), 144);

        // the rest of the haul is parked in the thief's slice
        assert_eq!(ws.chunks[1].begin.load(Ordering::Relaxed), 152);
        assert_eq!(ws.chunks[1].end.load(Ordering::Relaxed), 256);
    }

    #[test]
    fn test_steal_fails_on_empty_victim() {
        let ws = WorkShare::new(Policy::Adaptive, 0, 16, 1, 8, 2);
        init_worker(&ws, 0);
        init_worker(&ws, 1);

        assert_eq!(pop_local(&ws.chunks[0], 8), Some((0, 8)));
        assert_eq!(pop_local(&ws.chunks[0], 8), None);

        assert_eq!(steal_from(&ws, 0, 1), None);
    }

    #[test]
    fn test_concurrent_coverage() {
        let ws = WorkShare::new(Policy::Adaptive, 0, 4096, 1, 8, 4);
        let results = testing::run_team(&ws, 4);

        testing::assert_exact_coverage(&results, 0, 4096, 1);
        assert_eq!(ws.remaining.load(Ordering::Relaxed), 0);
        for chunk in &ws.chunks {
            assert_eq!(chunk.nb_executed.load(Ordering::Relaxed), 0);
        }
    }

    #[test]
    fn test_chunks_never_exceed_granularity() {
        let ws = WorkShare::new(Policy::Adaptive, 0, 2048, 1, 16, 4);
        let results = testing::run_team(&ws, 4);

        testing::assert_exact_coverage(&results, 0, 2048, 1);
        for &(start, end) in results.iter().flatten() {
            assert!(end - start <= 16);
        }
    }

    #[test]
    fn test_wide_and_negative_strides() {
        for (lb, ub, incr) in [(0, 3000, 3), (3000, 0, -3), (50, -50, -1)] {
            let ws = WorkShare::new(Policy::Adaptive, lb, ub, incr, 4, 4);
            let results = testing::run_team(&ws, 4);

            testing::assert_exact_coverage(&results, lb, ub, incr);
        }
    }

    #[test]
    fn test_fewer_iterations_than_workers() {
        let ws = WorkShare::new(Policy::Adaptive, 0, 3, 1, 1, 8);
        let results = testing::run_team(&ws, 8);

        testing::assert_exact_coverage(&results, 0, 3, 1);
    }

    // A fast worker must end up running iterations from the slow workers'
    // slabs, pulled over by stealing.
    #[test]
    fn test_stalled_slabs_get_stolen() {
        let nthreads = 4;
        let ws = WorkShare::new(Policy::Adaptive, 0, 4096, 1, 8, nthreads);
        let slab = 1024i64;

        let outside: Vec<Vec<(i64, i64)>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..nthreads)
                .map(|id| {
                    let ws = &ws;
                    s.spawn(move || {
                        let mut ctx = ThreadContext::new(id);
                        let mut got = Vec::new();
                        while let Some(range) = ws.next(&mut ctx).bounds() {
                            got.push(range);
                            if id != 0 {
                                // everyone but worker 0 is slow
                                std::thread::sleep(Duration::from_millis(1));
                            }
                        }
                        got
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            testing::assert_exact_coverage(&results, 0, 4096, 1);

            results
                .into_iter()
                .enumerate()
                .map(|(id, ranges)| {
                    let (my_lo, my_hi) = (slab * id as i64, slab * (id as i64 + 1));
                    ranges
                        .into_iter()
                        .filter(|&(start, _)| start < my_lo || start >= my_hi)
                        .collect()
                })
                .collect()
        });

        assert!(
            !outside[0].is_empty(),
            "the fast worker never stole from the stalled slabs"
        );
        assert_eq!(ws.remaining.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_numa_aware_coverage() {
        let topology: Arc<dyn Topology> = Arc::new(NodeMap::new(&[0, 0, 1, 1]));
        let config = Config {
            victim: VictimPolicy::NumaAware { strict: false },
            topology: Some(topology),
            ..Config::default()
        };
        let ws = WorkShare::with_config(Policy::Adaptive, 0, 2048, 1, 8, 4, config);
        let results = testing::run_team(&ws, 4);

        testing::assert_exact_coverage(&results, 0, 2048, 1);
    }

    // With strict node confinement and every worker alone on its node, no
    // steal can ever land; each worker runs exactly its own slab.
    #[test]
    fn test_strict_numa_confines_steals() {
        let topology: Arc<dyn Topology> = Arc::new(NodeMap::new(&[0, 1]));
        let config = Config {
            victim: VictimPolicy::NumaAware { strict: true },
            topology: Some(topology),
            ..Config::default()
        };
        let ws = WorkShare::with_config(Policy::Adaptive, 0, 512, 1, 8, 2, config);

        let results = testing::run_team(&ws, 2);
        testing::assert_exact_coverage(&results, 0, 512, 1);

        for (id, ranges) in results.iter().enumerate() {
            let (my_lo, my_hi) = (256 * id as i64, 256 * (id as i64 + 1));
            for &(start, end) in ranges {
                assert!(start >= my_lo && end <= my_hi, "worker {id} crossed nodes");
            }
        }
    }

    // Steals and local pops race on the same chunks; hammer them and make
    // sure no iteration is lost or duplicated.
    #[test]
    fn test_steal_pop_race_stress() {
        for round in 0..20i64 {
            let nthreads = 8;
            let total = 2000 + round * 97;
            let ws = WorkShare::new(Policy::Adaptive, 0, total, 1, 3, nthreads);

            let results = testing::run_team(&ws, nthreads);

            testing::assert_exact_coverage(&results, 0, total, 1);
            assert_eq!(ws.remaining.load(Ordering::Relaxed), 0);
        }
    }
}
