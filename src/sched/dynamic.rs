//! The dynamic scheduling method.
//!
//! A single shared cursor walks the loop's value space; each call claims the
//! next `chunk_size` iterations. The common case is one `fetch_add` on the
//! cursor (the flat mode, enabled when the bounds leave overshoot headroom) or
//! one load plus one compare-and-swap. Contention is bounded by the chunk
//! size: larger chunks mean fewer trips to the cursor.

use std::sync::atomic::Ordering;

use crossbeam::utils::Backoff;

use crate::workshare::{Next, WorkShare};

pub(crate) fn next(ws: &WorkShare) -> Next {
    let end = ws.ub;
    let incr = ws.incr;
    // step through the value space; saturation is safe because the clamps
    // below never move the cursor past `end`
    let step = ws.chunk_size.saturating_mul(incr);

    if ws.flat {
        // the cursor may overshoot `end`; construction guaranteed the
        // overshoot stays inside i64 range
        let start = ws.next_cursor.fetch_add(step, Ordering::AcqRel);
        if incr > 0 {
            if start >= end {
                return Next::Done;
            }
            return Next::Chunk(start, (start + step).min(end));
        } else {
            if start <= end {
                return Next::Done;
            }
            return Next::Chunk(start, (start + step).max(end));
        }
    }

    let backoff = Backoff::new();
    let mut start = ws.next_cursor.load(Ordering::Acquire);
    loop {
        if start == end {
            return Next::Done;
        }

        let left = end - start;
        let mut chunk = step;
        if incr < 0 {
            if chunk < left {
                chunk = left;
            }
        } else if chunk > left {
            chunk = left;
        }
        let nend = start + chunk;

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

    let left = ws.ub - start;
    let mut chunk = ws.chunk_size.saturating_mul(ws.incr);
    if ws.incr < 0 {
        if chunk < left {
            chunk = left;
        }
    } else if chunk > left {
        chunk = left;
    }
    let nend = start + chunk;

    ws.next_cursor.store(nend, Ordering::Relaxed);
    Next::Chunk(start, nend)
}
