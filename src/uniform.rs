/*
 * @file uniform.rs
 * @author Mike Hamburg
 * @copyright 2020-2022 Rambus Inc.
 *
 * Uniform static functions: capacity provisioning, the key-to-placement
 * hash, the row-arena builder, and the solved map with its query path.
 */

use crate::banded::solve::solve;
use crate::error::Error;
use core::hash::Hash;
use std::cmp::max;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use bincode::config::{self, Configuration, Fixint, LittleEndian, NoLimit, SkipFixedArrayLength};
use bincode::de::Decoder;
use bincode::enc::Encoder;
use bincode::error::{DecodeError, EncodeError};
use bincode::{Decode, Encode};
use rand::rngs::OsRng;
use rand::RngCore;
use siphasher::sip128::{Hash128, Hasher128, SipHasher13};

/** Space of query responses. */
pub type Response = u64;

/**
 * Caller-held placement salt.
 *
 * The salt keys the placement hash, so the same keys inserted under a
 * different salt get a structurally independent placement.  Resampling
 * the salt is the caller's remedy when a build reports
 * [`ConstructionUnsolvable`](Error::ConstructionUnsolvable).
 */
pub type Salt = u64;

type LfrHasher = SipHasher13;

pub(crate) type BlockIdx = u32;
pub(crate) type LfrBlock = u32;

/** The internal block size of the map, in bytes. */
pub const BLOCKSIZE: usize = (LfrBlock::BITS as usize) / 8;

const OVERPROVISION: u64 = /* 1/ */ 1024;
const EXTRA_ROWS: usize = 8;

/* Second SipHash key word; the first one is the caller's salt. */
const SALT_TWEAK: u64 = 0x6c66_725f_756e_6966;

/**
 * Bincode configuration used for serializing maps.
 *
 * Fixed-int so that the block words are stored verbatim rather than
 * recoded in varint format.
 */
pub const STD_BINCODE_CONFIG: Configuration<LittleEndian, Fixint, SkipFixedArrayLength, NoLimit> =
    config::standard()
        .with_fixed_int_encoding()
        .skip_fixed_array_length();

/** Domain separator for the hash */
#[derive(Hash)]
enum WhyHashing {
    HashingInput,
    DerivingNewSalt,
    RandomizingSolution,
}

fn salted_hasher(salt: Salt) -> LfrHasher {
    LfrHasher::new_with_keys(salt, SALT_TWEAK)
}

/**
 * Either draw a fresh random salt, or derive one deterministically from
 * an existing salt and a try counter.
 *
 * Construction is probabilistic, so callers retry failed builds with a
 * new salt.  Passing `Some(base)` makes the whole retry sequence a pure
 * function of `base`, which keeps experiments reproducible.
 */
pub fn choose_salt(base: Option<Salt>, n: usize) -> Salt {
    match base {
        None => OsRng.next_u64(),
        Some(salt) => {
            let mut h = salted_hasher(salt);
            WhyHashing::DerivingNewSalt.hash(&mut h);
            n.hash(&mut h);
            h.finish128().h1
        }
    }
}

pub(crate) fn response_mask(augmented: usize) -> Response {
    if augmented >= Response::BITS as usize {
        !0
    } else {
        (1 << augmented) - 1
    }
}

/**
 * Result of hashing a key: the window endpoints, the coefficient word
 * for each endpoint block, and the target bits the solver must hit.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Row {
    pub(crate) blocks: [BlockIdx; 2],
    pub(crate) keys: [LfrBlock; 2],
    pub(crate) augmented: Response,
}

/**
 * The main sampling function: given the hash words, sample the two
 * window endpoints.  The stride distribution keeps the window narrow
 * on average, which is what keeps the elimination banded and the
 * queries local.
 */
fn sample_block_positions(
    mut stride_seed: u64, // only 32 bits used
    a_seed: u64,          // only 32 bits used
    nblocks: u64,
) -> [BlockIdx; 2] {
    debug_assert!(nblocks >= 2);
    let nblocks_huge = nblocks as u128;

    /* calculate log(nblocks)<<48 in a smooth way */
    let k = 63 - nblocks.leading_zeros() as u64;
    let smoothlog = (k << 48) + (nblocks << (48 - k)) - (1 << 48);
    let leading_coefficient = (12u64 << 8) / BLOCKSIZE as u64; // experimentally determined
    let num = smoothlog * leading_coefficient; // With BLOCKSIZE=4, can't overflow until k=85 which is impossible

    stride_seed |= (1u64 << 33) / OVERPROVISION; // | instead of + because it can't overflow
    let den = (((stride_seed * stride_seed) as u128 * nblocks_huge) >> 32) as u64; // can't overflow because stride_seed is only 32 bits
    let b_seed = (num / den + a_seed) & 0xFFFFFFFF; // den can't be 0 because stride_seed is adjusted

    let a = ((a_seed as u128 * nblocks_huge) >> 32) as BlockIdx;
    let mut b = ((b_seed as u128 * nblocks_huge) >> 32) as BlockIdx;
    if a == b {
        b += 1;
        if b >= nblocks as BlockIdx {
            b = 0;
        }
    }
    [a, b]
}

/** Interpret a hash as a row, with the window endpoints in order. */
fn interpret_hash_as_row(hash: Hash128, nblocks: usize) -> Row {
    let stride_seed = hash.h1 & 0xFFFFFFFF;
    let a_seed = hash.h1 >> 32;
    let mut keys = [
        (hash.h2 & 0xFFFFFFFF) as LfrBlock,
        (hash.h2 >> 32) as LfrBlock,
    ];
    let mut blocks = sample_block_positions(stride_seed, a_seed, nblocks as u64);
    if blocks[0] > blocks[1] {
        blocks.swap(0, 1);
        keys.swap(0, 1);
    }
    Row {
        blocks,
        keys,
        augmented: 0,
    }
}

/**
 * The outer-main hash function: hash a key to a row.  Insertion and
 * query both come through here; the two paths must agree bit for bit.
 */
fn hash_key_to_row(salt: Salt, nblocks: usize, key: &[u8]) -> Row {
    let mut h = salted_hasher(salt);
    WhyHashing::HashingInput.hash(&mut h);
    key.hash(&mut h);
    interpret_hash_as_row(h.finish128(), nblocks)
}

/** Deterministically choose the planes of a free column of the solution. */
pub(crate) fn seed_column(salt: Salt, augmented: usize, col: usize) -> Response {
    let mut h = salted_hasher(salt);
    WhyHashing::RandomizingSolution.hash(&mut h);
    col.hash(&mut h);
    h.finish128().h1 & response_mask(augmented)
}

/** Return the number of blocks needed for a certain number of (key,value) pairs. */
pub(crate) fn blocks_required(rows: usize) -> usize {
    let mut cols = rows + EXTRA_ROWS;
    if OVERPROVISION > 0 {
        cols += cols / OVERPROVISION as usize;
    }
    cols += 8 * BLOCKSIZE - 1;
    cols = max(cols, 16 * BLOCKSIZE);
    cols / (8 * BLOCKSIZE)
}

/**
 * Minimum storage width, in bits, for a map holding `rows` keys.
 *
 * Always a multiple of the block width, and always strictly larger
 * than `rows`: the margin is what lets the solve succeed with high
 * probability.
 */
pub fn provision_columns(rows: usize) -> usize {
    blocks_required(rows) * 8 * BLOCKSIZE
}

/**
 * Largest key capacity supported by a storage width of `columns` bits,
 * rounded down to block granularity.
 *
 * Returns 0 (not an error) when the width cannot hold even one key.
 * For all `r`, `provision_max_rows(provision_columns(r)) >= r`.
 */
pub fn provision_max_rows(columns: usize) -> usize {
    let blocks = columns / (8 * BLOCKSIZE);
    if blocks < 2 {
        return 0;
    }
    let cols = blocks * 8 * BLOCKSIZE;

    /* first-order inverse, then nudge onto the exact boundary */
    let mut rows = (cols - cols / (OVERPROVISION as usize + 1)).saturating_sub(EXTRA_ROWS);
    while provision_columns(rows + 1) <= cols {
        rows += 1;
    }
    while rows > 0 && provision_columns(rows) > cols {
        rows -= 1;
    }
    rows
}

/**
 * Builder arena for a uniform map.
 *
 * A builder is created with a fixed row capacity, a value width and a
 * salt.  Keys are inserted one at a time, then [`build`](Self::build)
 * solves the accumulated system.  After a solve -- successful or not --
 * the arena must be [`reset`](Self::reset) before inserting again;
 * reset keeps the allocation and the block count, so one builder can be
 * reused across many trials.
 */
#[derive(Clone, Debug)]
pub struct UniformBuilder {
    salt: Salt,
    augmented: usize,
    nblocks: usize,
    capacity: usize,
    rows: Vec<Row>,
    consumed: bool,
}

impl UniformBuilder {
    /**
     * Create a builder for up to `capacity_rows` keys of
     * `augmented_bits`-bit values.
     *
     * Fails with [`Error::InvalidParameter`] if the value width is 0 or
     * more than 64 bits or if the capacity is 0, and with
     * [`Error::AllocationFailure`] if the arena cannot be allocated.
     */
    pub fn new(capacity_rows: usize, augmented_bits: usize, salt: Salt) -> Result<Self, Error> {
        if augmented_bits == 0 || augmented_bits > Response::BITS as usize || capacity_rows == 0 {
            return Err(Error::InvalidParameter);
        }
        let nblocks = blocks_required(capacity_rows);
        if nblocks > BlockIdx::MAX as usize {
            return Err(Error::InvalidParameter);
        }
        let mut rows = Vec::new();
        rows.try_reserve_exact(capacity_rows)?;
        Ok(UniformBuilder {
            salt,
            augmented: augmented_bits,
            nblocks,
            capacity: capacity_rows,
            rows,
            consumed: false,
        })
    }

    /**
     * Clear the arena for another round of insertions.  Capacity,
     * block count, value width and salt are unchanged, and nothing is
     * reallocated.
     */
    pub fn reset(&mut self) {
        self.rows.clear();
        self.consumed = false;
    }

    /**
     * Insert one key/value pair.  Only the low `augmented` bits of
     * `value` are stored.
     *
     * Fails with [`Error::CapacityExceeded`] when the arena is full, or
     * when the builder has been consumed by a solve and not yet reset.
     */
    pub fn insert(&mut self, key: &[u8], value: u64) -> Result<(), Error> {
        if self.consumed || self.rows.len() == self.capacity {
            return Err(Error::CapacityExceeded);
        }
        let mut row = hash_key_to_row(self.salt, self.nblocks, key);
        row.augmented = value & response_mask(self.augmented);
        self.rows.push(row);
        Ok(())
    }

    /**
     * Solve the accumulated system and return the map.
     *
     * `threads` worker threads are used for the forward elimination;
     * 0 selects the default (serial).  The result is bit-identical for
     * every thread count.
     *
     * Fails with [`Error::ConstructionUnsolvable`] when the placement
     * for this salt is rank-deficient; retry with a new salt or a
     * larger capacity.  Either way the builder is consumed and must be
     * reset before further insertions.
     */
    pub fn build(&mut self, threads: usize) -> Result<UniformMap, Error> {
        self.consumed = true;
        let salt = self.salt;
        let augmented = self.augmented;
        let blocks = solve(&self.rows, self.nblocks, augmented, threads, move |col| {
            seed_column(salt, augmented, col)
        })?;
        Ok(UniformMap {
            salt,
            augmented,
            nblocks: self.nblocks,
            blocks,
        })
    }

    /** Number of rows inserted since creation or the last reset. */
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /** Is the arena empty? */
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /** The fixed row capacity. */
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /** The realized storage width, in blocks. */
    pub fn block_count(&self) -> usize {
        self.nblocks
    }

    /** Width of the stored values, in bits. */
    pub fn augmented(&self) -> usize {
        self.augmented
    }

    /** The placement salt this builder hashes with. */
    pub fn salt(&self) -> Salt {
        self.salt
    }

    /**
     * Mean window span (in blocks) of the inserted rows.
     *
     * This is the health metric for the placement distribution: both
     * query locality and elimination cost grow with it, and it should
     * stay small (a few blocks) at any map size.
     */
    pub fn mean_window(&self) -> f64 {
        if self.rows.is_empty() {
            return 0.0;
        }
        let total: u64 = self
            .rows
            .iter()
            .map(|r| (r.blocks[1] - r.blocks[0]) as u64)
            .sum();
        total as f64 / self.rows.len() as f64
    }
}

/**
 * A solved uniform map.
 *
 * Immutable after construction, and safe to query from any number of
 * threads.  Querying a key that was inserted before the build returns
 * the value that was inserted (masked to the value width).  Querying
 * any other key returns an arbitrary-looking value: there is no
 * membership signal, by design.
 */
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct UniformMap {
    salt: Salt,
    augmented: usize,
    nblocks: usize,
    blocks: Vec<LfrBlock>,
}

impl UniformMap {
    /**
     * Look up a key.
     *
     * Never fails; runtime is proportional to the key's window span,
     * not to the size of the map.
     */
    pub fn query(&self, key: &[u8]) -> Response {
        let row = hash_key_to_row(self.salt, self.nblocks, key);
        let p0 = row.blocks[0] as usize;
        let p1 = row.blocks[1] as usize;
        let [k0, k1] = row.keys;
        let naug = self.augmented;
        let mut ret = 0;
        for bit in 0..naug {
            let get = (self.blocks[p0 * naug + bit] & k0) ^ (self.blocks[p1 * naug + bit] & k1);
            ret |= ((get.count_ones() & 1) as Response) << bit;
        }
        ret
    }

    /** Width of the stored values, in bits. */
    pub fn augmented(&self) -> usize {
        self.augmented
    }

    /** The storage width, in blocks. */
    pub fn block_count(&self) -> usize {
        self.nblocks
    }

    /** The placement salt queries hash with. */
    pub fn salt(&self) -> Salt {
        self.salt
    }

    /** Size of the solved block array, in bytes. */
    pub fn storage_bytes(&self) -> usize {
        self.blocks.len() * BLOCKSIZE
    }

    /** Serialize to a file. */
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), io::Error> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        bincode::encode_into_std_write(self, &mut writer, STD_BINCODE_CONFIG).map_err(
            |e| match e {
                EncodeError::Io { error, index: _ } => error,
                other => io::Error::new(ErrorKind::Other, other.to_string()),
            },
        )?;
        writer.flush()
    }

    /** Deserialize from a file. */
    pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self, io::Error> {
        let mut buf = Vec::new();
        File::open(path)?.read_to_end(&mut buf)?;
        let (map, _len): (Self, usize) = bincode::decode_from_slice(&buf, STD_BINCODE_CONFIG)
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, e.to_string()))?;
        Ok(map)
    }
}

const MAGIC: &[u8; 4] = b"frb1";

impl Encode for UniformMap {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        Encode::encode(MAGIC, encoder)?;
        Encode::encode(&(self.augmented as u8), encoder)?;
        Encode::encode(&self.salt, encoder)?;
        Encode::encode(&self.blocks, encoder)?;
        Ok(())
    }
}

impl Decode for UniformMap {
    fn decode<D: Decoder>(decoder: &mut D) -> Result<Self, DecodeError> {
        fn err<Nope>(descr: &'static str) -> Result<Nope, DecodeError> {
            Err(DecodeError::OtherString(descr.to_string()))
        }
        let magic: [u8; 4] = Decode::decode(decoder)?;
        if &magic != MAGIC {
            return err("magic value mismatch");
        }
        let augmented: u8 = Decode::decode(decoder)?;
        if augmented == 0 || augmented as u32 > Response::BITS {
            return err("unsupported value width");
        }
        let salt: Salt = Decode::decode(decoder)?;
        let blocks: Vec<LfrBlock> = Decode::decode(decoder)?;
        let augmented = augmented as usize;
        if blocks.len() % augmented != 0 {
            return err("block array length mismatch");
        }
        let nblocks = blocks.len() / augmented;
        if nblocks < 2 {
            return err("must have at least 2 blocks");
        }
        Ok(UniformMap {
            salt,
            augmented,
            nblocks,
            blocks,
        })
    }
}
