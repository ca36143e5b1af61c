/*!
 * Frayed ribbon static functions.
 *
 * This crate builds compact **static functions**: structures that, for
 * a fixed set of keys chosen in advance, map each key to a small
 * integer value of 1 to 64 bits using storage close to the
 * information-theoretic minimum.  Unlike a
 * [`HashMap`](std::collections::hash_map::HashMap), the keys themselves
 * are not stored, and there is no membership signal: querying a key
 * that was never inserted returns an arbitrary-looking value, never an
 * error.  This is intentional -- it is what makes the storage so small
 * -- and it is why the usual hash-table semantics do not apply.
 *
 * # Building and querying
 *
 * Construction runs through a [`UniformBuilder`]: ask
 * [`provision_columns`]/[`provision_max_rows`] how capacity and storage
 * width relate, create a builder with a capacity, a value width and a
 * [`Salt`], insert each key, then [`build`](UniformBuilder::build) to
 * obtain an immutable [`UniformMap`].
 *
 * Construction is probabilistic: a build can fail with
 * [`Error::ConstructionUnsolvable`] when the salted placement happens
 * to be rank-deficient.  This is expected, not a bug; each try succeeds
 * roughly 90% of the time or more at the default provisioning, so the
 * caller retries with a fresh salt ([`choose_salt`] derives
 * reproducible retry sequences).  The engine itself keeps no state
 * across calls.
 *
 * ```
 * use frayed_ribbon::{choose_salt, UniformBuilder};
 *
 * let keys: Vec<[u8; 8]> = (0u64..1000).map(|i| i.to_le_bytes()).collect();
 * let mut map = None;
 * for attempt in 0..32 {
 *     let salt = choose_salt(Some(99), attempt);
 *     let mut builder = UniformBuilder::new(keys.len(), 8, salt).unwrap();
 *     for (i, key) in keys.iter().enumerate() {
 *         builder.insert(key, i as u64).unwrap();
 *     }
 *     if let Ok(m) = builder.build(0) {
 *         map = Some(m);
 *         break;
 *     }
 * }
 * let map = map.expect("repeated construction failure");
 * assert_eq!(map.query(&keys[17]), 17);
 * ```
 *
 * # Performance
 *
 * Queries touch two nearby blocks of the solved array and are very
 * fast, typically on the order of a hundred cycles when the map is in
 * cache.  Query time is proportional to the key's window span, not the
 * map size.
 *
 * Building solves a sparse banded linear system over GF(2).  The
 * elimination order is fixed by the placement structure alone, so the
 * system is solved once for all value bit-planes.  Passing a thread
 * count to [`build`](UniformBuilder::build) splits the block range into
 * contiguous stripes solved as a pipelined wavefront; the result is
 * bit-identical to the serial solve, threading only changes the
 * wall-clock cost.  Builders are arenas: [`reset`](UniformBuilder::reset)
 * reuses the allocation across repeated trials.
 *
 * # Storage
 *
 * A map holding `n` keys of `b`-bit values uses about `n*b` bits plus a
 * fixed redundancy margin (see [`provision_columns`]); the margin is
 * what makes construction succeed with high probability.
 *
 * # Serialization
 *
 * [`UniformMap`] implements [`Encode`](bincode::Encode) and
 * [`Decode`](bincode::Decode) from the [`bincode`] crate, plus
 * file-backed helpers.  For compatibility and speed, use
 * [`STD_BINCODE_CONFIG`] when calling `bincode`'s functions, so the
 * block words are not recoded in varint format.
 *
 * # Internals
 *
 * Internally this is a "frayed ribbon" filter: each key hashes to a
 * narrow window of consecutive 32-bit blocks -- two pseudorandomly
 * chosen endpoint blocks whose distance is usually small -- and to a
 * coefficient word per endpoint.  The map is a matrix `M` such that
 * for every inserted pair, the XOR of the selected solution bits
 * equals the stored value.  Construction is banded Gaussian
 * elimination over the windows; the narrow-window distribution is what
 * keeps both the elimination and the queries local.
 */

mod banded;
mod error;
mod size;
mod uniform;

#[cfg(feature = "cffi")]
mod cffi;

pub use error::Error;
pub use size::serialized_size;
pub use uniform::{
    choose_salt, provision_columns, provision_max_rows, Response, Salt, UniformBuilder,
    UniformMap, BLOCKSIZE, STD_BINCODE_CONFIG,
};
