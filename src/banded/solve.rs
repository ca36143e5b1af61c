/*
 * @file solve.rs
 * @author Mike Hamburg
 * @copyright 2020-2022 Rambus Inc.
 *
 * Striped wavefront solver for uniform maps.
 *
 * Forward elimination is the usual leading-bit reduction: each row is
 * XORed against the pivot owning its current leading column until it
 * either claims an empty column or cancels to zero (rank-deficient:
 * the build fails).  With several threads the block range is cut into
 * contiguous stripes, one worker each.  A worker eliminates the rows
 * whose windows start in its stripe, then merges the fringe handed
 * over by its predecessor, then hands its own fringe to its successor:
 * a pipeline in increasing block order, with exactly one message per
 * stripe boundary.
 *
 * The solved array does not depend on the stripe count.  The set of
 * pivot columns is a property of the row space alone, free columns are
 * seeded deterministically, and fixing the free columns determines the
 * pivot columns uniquely.
 */

use super::row::{RowVec, BLOCK_BITS};
use crate::error::Error;
use crate::uniform::{LfrBlock, Response, Row};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

type PivotIdx = u32;
const NO_PIVOT: PivotIdx = PivotIdx::MAX;

/**
 * Forward-elimination state for one contiguous column range.
 * Pivot rows live in an arena and are referenced by index; `pivots`
 * maps each owned column to its arena slot.
 */
struct Eliminator {
    col_lo: usize,
    col_hi: usize,
    pivots: Vec<PivotIdx>,
    arena: Vec<RowVec>,
}

impl Eliminator {
    fn new(col_lo: usize, col_hi: usize) -> Result<Eliminator, Error> {
        let mut pivots = Vec::new();
        pivots.try_reserve_exact(col_hi - col_lo)?;
        pivots.resize(col_hi - col_lo, NO_PIVOT);
        Ok(Eliminator {
            col_lo,
            col_hi,
            pivots,
            arena: Vec::new(),
        })
    }

    /**
     * Reduce one row against the pivots of this column range.
     *
     * Returns `Ok(None)` if the row settled as a pivot here,
     * `Ok(Some(row))` if its leading bit moved past `col_hi` and it
     * must travel to the next stripe, and `ConstructionUnsolvable` if
     * it cancelled to zero.
     */
    fn insert(&mut self, mut row: RowVec) -> Result<Option<RowVec>, Error> {
        loop {
            row.normalize();
            let col = match row.leading_bit() {
                None => return Err(Error::ConstructionUnsolvable),
                Some(col) => col,
            };
            debug_assert!(col >= self.col_lo);
            if col >= self.col_hi {
                return Ok(Some(row));
            }
            match self.pivots[col - self.col_lo] {
                NO_PIVOT => {
                    if self.arena.len() >= NO_PIVOT as usize {
                        return Err(Error::AllocationFailure);
                    }
                    self.pivots[col - self.col_lo] = self.arena.len() as PivotIdx;
                    self.arena.push(row);
                    return Ok(None);
                }
                p => row.xor_in(&self.arena[p as usize]),
            }
        }
    }
}

/**
 * Eliminate one stripe's worth of rows.
 *
 * Own rows first (this part runs concurrently with the predecessor
 * stripes), then the carried-over fringe; the combined fringe goes to
 * the successor in one message.  A predecessor that fails drops its
 * sender without sending, which aborts the rest of the pipeline.
 */
fn eliminate(
    own: &[Row],
    col_lo: usize,
    col_hi: usize,
    carry_in: Option<Receiver<Vec<RowVec>>>,
    carry_out: Option<Sender<Vec<RowVec>>>,
) -> Result<Eliminator, Error> {
    let mut elim = Eliminator::new(col_lo, col_hi)?;
    let mut fringe = Vec::new();
    for row in own {
        if let Some(deferred) = elim.insert(RowVec::from_row(row))? {
            fringe.push(deferred);
        }
    }
    if let Some(rx) = carry_in {
        let carried = rx.recv().map_err(|_| Error::ConstructionUnsolvable)?;
        for row in carried {
            if let Some(deferred) = elim.insert(row)? {
                fringe.push(deferred);
            }
        }
    }
    match carry_out {
        Some(tx) => {
            let _ = tx.send(fringe);
        }
        /* the last stripe owns every column up to the end */
        None => debug_assert!(fringe.is_empty()),
    }
    Ok(elim)
}

fn effective_threads(threads: usize, nblocks: usize) -> usize {
    let threads = if threads == 0 { 1 } else { threads };
    threads.min(nblocks / 2).max(1)
}

/** Run the striped pipeline and collect the per-stripe eliminators. */
fn solve_striped(rows: &[Row], nblocks: usize, nthreads: usize) -> Result<Vec<Eliminator>, Error> {
    let base = nblocks / nthreads;
    let extra = nblocks % nthreads;
    let mut bounds = Vec::with_capacity(nthreads + 1);
    bounds.push(0);
    for i in 0..nthreads {
        bounds.push(bounds[i] + base + usize::from(i < extra));
    }

    let mut buckets: Vec<Vec<Row>> = vec![Vec::new(); nthreads];
    for row in rows {
        let blk = row.blocks[0] as usize;
        let stripe = bounds.partition_point(|&b| b <= blk) - 1;
        buckets[stripe].push(*row);
    }

    let mut results: Vec<Result<Eliminator, Error>> = Vec::with_capacity(nthreads);
    thread::scope(|s| {
        let mut handles = Vec::with_capacity(nthreads);
        let mut carry_in: Option<Receiver<Vec<RowVec>>> = None;
        for (i, bucket) in buckets.into_iter().enumerate() {
            let (carry_out, next_in) = if i + 1 < nthreads {
                let (tx, rx) = mpsc::channel();
                (Some(tx), Some(rx))
            } else {
                (None, None)
            };
            let rx = carry_in.take();
            carry_in = next_in;
            let col_lo = bounds[i] * BLOCK_BITS;
            let col_hi = bounds[i + 1] * BLOCK_BITS;
            handles.push(s.spawn(move || eliminate(&bucket, col_lo, col_hi, rx, carry_out)));
        }
        for h in handles {
            results.push(h.join().expect("solver worker panicked"));
        }
    });
    results.into_iter().collect()
}

/**
 * Back-substitution: walk columns from high to low, solving all value
 * planes of each column at once.  Pivotless columns take the seeded
 * planes; pivot columns are then forced by their row's equation.
 */
fn back_substitute<F>(elims: &[Eliminator], ncols: usize, seed_free: F) -> Result<Vec<Response>, Error>
where
    F: Fn(usize) -> Response,
{
    let mut sol = Vec::new();
    sol.try_reserve_exact(ncols)?;
    sol.resize(ncols, 0 as Response);

    for elim in elims.iter().rev() {
        for slot in (0..elim.pivots.len()).rev() {
            let col = elim.col_lo + slot;
            sol[col] = match elim.pivots[slot] {
                NO_PIVOT => seed_free(col),
                p => {
                    let row = &elim.arena[p as usize];
                    debug_assert_eq!(row.leading_bit(), Some(col));
                    let mut acc = row.aug;
                    for (i, &word) in row.words.iter().enumerate() {
                        let mut w = word;
                        if i == 0 {
                            w &= !(1 << (col % BLOCK_BITS));
                        }
                        let bit0 = (row.start + i) * BLOCK_BITS;
                        while w != 0 {
                            acc ^= sol[bit0 + w.trailing_zeros() as usize];
                            w &= w - 1;
                        }
                    }
                    acc
                }
            };
        }
    }
    Ok(sol)
}

/** Transpose the per-column solution into bit-plane-major block words. */
fn assemble_blocks(sol: &[Response], naug: usize) -> Result<Vec<LfrBlock>, Error> {
    let nblocks = sol.len() / BLOCK_BITS;
    let mut blocks = Vec::new();
    blocks.try_reserve_exact(nblocks * naug)?;
    blocks.resize(nblocks * naug, 0);
    for blk in 0..nblocks {
        for aug in 0..naug {
            let mut word: LfrBlock = 0;
            for bit in 0..BLOCK_BITS {
                word |= (((sol[blk * BLOCK_BITS + bit] >> aug) & 1) as LfrBlock) << bit;
            }
            blocks[blk * naug + aug] = word;
        }
    }
    Ok(blocks)
}

/**
 * Solve the whole system and return the block array, bit-plane major:
 * `blocks[blk*naug + plane]`.
 *
 * `seed_free` must be a pure function of the column index (and must
 * mask its result to the value width); it is what makes the output
 * independent of the thread count.
 */
pub(crate) fn solve<F>(
    rows: &[Row],
    nblocks: usize,
    naug: usize,
    threads: usize,
    seed_free: F,
) -> Result<Vec<LfrBlock>, Error>
where
    F: Fn(usize) -> Response,
{
    let ncols = nblocks * BLOCK_BITS;
    let nthreads = effective_threads(threads, nblocks);
    let elims = if nthreads <= 1 {
        vec![eliminate(rows, 0, ncols, None, None)?]
    } else {
        solve_striped(rows, nblocks, nthreads)?
    };
    let sol = back_substitute(&elims, ncols, seed_free)?;
    assemble_blocks(&sol, naug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn seed(naug: usize) -> impl Fn(usize) -> Response {
        let mask: Response = if naug == 64 { !0 } else { (1 << naug) - 1 };
        move |col| (col as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15) & mask
    }

    fn random_rows(rng: &mut StdRng, n: usize, nblocks: u32, naug: usize) -> Vec<Row> {
        let mask: Response = if naug == 64 { !0 } else { (1 << naug) - 1 };
        (0..n)
            .map(|_| {
                let a = rng.gen_range(0..nblocks - 1);
                let b = rng.gen_range(a + 1..nblocks);
                Row {
                    blocks: [a, b],
                    keys: [rng.gen::<LfrBlock>() | 1, rng.gen::<LfrBlock>() | 1],
                    augmented: rng.gen::<u64>() & mask,
                }
            })
            .collect()
    }

    /* XOR-recombine a row against the solved block array, per plane */
    fn recombine(blocks: &[LfrBlock], naug: usize, row: &Row) -> Response {
        let [a, b] = row.blocks;
        let [ka, kb] = row.keys;
        let mut ret = 0;
        for plane in 0..naug {
            let get = (blocks[a as usize * naug + plane] & ka)
                ^ (blocks[b as usize * naug + plane] & kb);
            ret |= ((get.count_ones() & 1) as Response) << plane;
        }
        ret
    }

    #[test]
    fn test_solve_satisfies_equations() {
        let mut rng: StdRng = SeedableRng::seed_from_u64(10);
        for naug in [1, 8, 64] {
            let rows = random_rows(&mut rng, 200, 8, naug);
            let blocks = solve(&rows, 8, naug, 1, seed(naug)).expect("full-rank instance");
            for row in &rows {
                assert_eq!(recombine(&blocks, naug, row), row.augmented);
            }
        }
    }

    #[test]
    fn test_rank_deficient_fails() {
        let dup = Row {
            blocks: [0, 1],
            keys: [0x1234, 0x8001],
            augmented: 3,
        };
        let mut other = dup;
        other.augmented = 5;
        /* same placement twice can never settle, whatever the targets */
        for second in [dup, other] {
            let rows = vec![dup, second];
            assert_eq!(
                solve(&rows, 2, 8, 1, seed(8)).unwrap_err(),
                Error::ConstructionUnsolvable
            );
        }
    }

    #[test]
    fn test_striping_does_not_change_solution() {
        let mut rng: StdRng = SeedableRng::seed_from_u64(11);
        let rows = random_rows(&mut rng, 700, 24, 8);
        let serial = solve(&rows, 24, 8, 1, seed(8)).expect("full-rank instance");
        for threads in [0, 2, 3, 5, 24, 1000] {
            let striped = solve(&rows, 24, 8, threads, seed(8)).expect("full-rank instance");
            assert_eq!(serial, striped);
        }
    }

    #[test]
    fn test_empty_system_is_all_seed() {
        let blocks = solve(&[], 2, 4, 1, seed(4)).unwrap();
        assert_eq!(blocks.len(), 2 * 4);
        let expect = back_substitute(
            &[Eliminator::new(0, 2 * BLOCK_BITS).unwrap()],
            2 * BLOCK_BITS,
            seed(4),
        )
        .unwrap();
        for (col, &v) in expect.iter().enumerate() {
            assert_eq!(v, seed(4)(col));
        }
    }
}
