//! The guided scheduling method.
//!
//! Like dynamic, a shared cursor walks the value space, but each grab takes
//! `max(ceil(remaining / nthreads), chunk_size)` iterations. Chunks start at
//! roughly a 1/N share of the loop and decay exponentially toward the
//! `chunk_size` floor, trading early synchronization overhead against late
//! load imbalance.

use std::sync::atomic::Ordering;

use crossbeam::utils::Backoff;

use crate::workshare::{Next, WorkShare};

pub(crate) fn next(ws: &WorkShare) -> Next {
    let end = ws.ub;
    let incr = ws.incr;
    let nthreads = ws.nthreads as i64;

    let backoff = Backoff::new();
    let mut start = ws.next_cursor.load(Ordering::Acquire);
    loop {
        if start == end {
            return Next::Done;
        }

        let n = (end - start) / incr;
        let q = ((n + nthreads - 1) / nthreads).max(ws.chunk_size);
        let nend = if q <= n { start + q * incr } else { end };

        match ws
            .next_cursor
            .compare_exchange(start, nend, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => return Next::Chunk(start, nend),
            Err(current) => {
                start = current;
                backoff.spin();
            }
        }
    }
}

/// Same arithmetic under the work-share mutex, for configurations that opt out
/// of the atomic fast path.
pub(crate) fn next_locked(ws: &WorkShare) -> Next {
    let _guard = ws.lock.lock().unwrap();

    let start = ws.next_cursor.load(Ordering::Relaxed);
    if start == ws.ub {
        return Next::Done;
    }

    let n = (ws.ub - start) / ws.incr;
    let q = ((n + ws.nthreads as i64 - 1) / ws.nthreads as i64).max(ws.chunk_size);
    let nend = if q <= n { start + q * ws.incr } else { ws.ub };

    ws.next_cursor.store(nend, Ordering::Relaxed);
    Next::Chunk(start, nend)
}
