//! The static scheduling method.
//!
//! Every range a worker receives is a pure function of the loop bounds, the
//! team size, and the worker's own team id, so the dispatcher reads only
//! immutable descriptor fields plus the worker's private trip counter and
//! needs no synchronization at all.
//!
//! A `chunk_size` of zero selects the one-slice mode: the iteration space is
//! split into one contiguous slice per worker, handed out in a single call.
//! A positive `chunk_size` stripes fixed chunks across the team round-robin:
//! on its `t`-th call, worker `i` takes the `(t*N + i)`-th chunk.

use crate::context::ThreadContext;
use crate::workshare::{Next, WorkShare};

pub(crate) fn next(ws: &WorkShare, ctx: &mut ThreadContext) -> Next {
    if ctx.static_trip == -1 {
        return Next::Done;
    }

    let n = ws.trips;
    let nthreads = ws.nthreads as i64;
    let i = ctx.team_id() as i64;

    if ws.chunk_size == 0 {
        if ctx.static_trip > 0 {
            return Next::Done;
        }

        // zero-based slice [q*i, q*(i+1)) of q = ceil(n / nthreads) iterations
        let q = n / nthreads + (n % nthreads != 0) as i64;
        let s0 = q * i;
        let e0 = (s0 + q).min(n);

        if s0 >= e0 {
            ctx.static_trip = 1;
            return Next::Done;
        }

        let start = ws.lb + s0 * ws.incr;
        let end = ws.lb + e0 * ws.incr;

        if e0 == n {
            // the tail of the whole space; late callers must still see Done
            ctx.static_trip = -1;
            Next::Last(start, end)
        } else {
            ctx.static_trip = 1;
            Next::Chunk(start, end)
        }
    } else {
        let chunk = ws.chunk_size;
        let s0 = (ctx.static_trip * nthreads + i) * chunk;
        if s0 >= n {
            return Next::Done;
        }
        let e0 = (s0 + chunk).min(n);

        let start = ws.lb + s0 * ws.incr;
        let end = ws.lb + e0 * ws.incr;

        if e0 == n {
            ctx.static_trip = -1;
        } else {
            ctx.static_trip += 1;
        }
        Next::Chunk(start, end)
    }
}
