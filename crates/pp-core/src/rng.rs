//! Explicit, splittable PRNG keys.
//!
//! Every sampling call receives a [`PrngKey`]; there is no global RNG.
//! A key is a pair of 32-bit words. `split` and `fold_in` derive new keys
//! deterministically, and [`PrngKey::to_rng`] expands a key into a
//! `StdRng` stream for `rand_distr` samplers.
//!
//! Two concurrent traces must not sample from the same key: they would
//! draw identical streams. Split once per trace instead.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::tensor::{from_vec, Tensor};
use crate::{Error, Result};

const SPLIT_TAG: u64 = 0x5350_4c49_545f_4b45;
const FOLD_TAG: u64 = 0x464f_4c44_5f49_4e5f;
const STREAM_TAG: u64 = 0x5354_5245_414d_5f5f;
/// Odd constant, so `base + i * GOLDEN` is injective in `i`.
const GOLDEN: u64 = 0x9e37_79b9_7f4a_7c15;

/// SplitMix64 finalizer. Bijective on `u64`.
#[inline]
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Splittable random key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrngKey([u32; 2]);

impl PrngKey {
    /// Key from an integer seed.
    pub fn new(seed: u64) -> Self {
        Self::from_u64(seed)
    }

    /// Key from its raw words.
    pub fn from_words(words: [u32; 2]) -> Self {
        Self(words)
    }

    /// Raw words.
    pub fn words(&self) -> [u32; 2] {
        self.0
    }

    #[inline]
    fn from_u64(v: u64) -> Self {
        Self([(v >> 32) as u32, v as u32])
    }

    #[inline]
    fn as_u64(&self) -> u64 {
        ((self.0[0] as u64) << 32) | self.0[1] as u64
    }

    /// Derive `n` child keys. Children of one parent are pairwise distinct.
    pub fn split(&self, n: usize) -> Vec<PrngKey> {
        let base = mix64(self.as_u64() ^ SPLIT_TAG);
        (0..n as u64).map(|i| Self::from_u64(mix64(base.wrapping_add(i.wrapping_mul(GOLDEN))))).collect()
    }

    /// Convenience for the common two-way split.
    pub fn split2(&self) -> (PrngKey, PrngKey) {
        let base = mix64(self.as_u64() ^ SPLIT_TAG);
        (Self::from_u64(mix64(base)), Self::from_u64(mix64(base.wrapping_add(GOLDEN))))
    }

    /// Derive a key from this key and an integer (e.g. a site or step index).
    pub fn fold_in(&self, data: u32) -> PrngKey {
        Self::from_u64(mix64(mix64(self.as_u64() ^ FOLD_TAG) ^ (data as u64).wrapping_mul(GOLDEN)))
    }

    /// Expand the key into a sampling stream.
    pub fn to_rng(&self) -> StdRng {
        StdRng::seed_from_u64(mix64(self.as_u64() ^ STREAM_TAG))
    }

    /// Encode as a `[2]` tensor (words stored exactly as `f64`).
    pub fn to_tensor(&self) -> Tensor {
        crate::tensor::vector(&[self.0[0] as f64, self.0[1] as f64])
    }

    /// Decode a key produced by [`Self::to_tensor`].
    pub fn from_tensor(t: &Tensor) -> Result<Self> {
        if t.shape() != [2] {
            return Err(Error::ShapeMismatch(format!("a key tensor has shape [2], got {:?}", t.shape())));
        }
        let mut words = [0u32; 2];
        for (w, &v) in words.iter_mut().zip(t.iter()) {
            if v < 0.0 || v > u32::MAX as f64 || v.fract() != 0.0 {
                return Err(Error::ConstraintViolation(format!("{} is not a key word", v)));
            }
            *w = v as u32;
        }
        Ok(Self(words))
    }

    /// Stack `n` split children into an `[n, 2]` tensor.
    pub fn split_tensor(&self, n: usize) -> Result<Tensor> {
        let data = self.split(n).into_iter().flat_map(|k| [k.0[0] as f64, k.0[1] as f64]).collect();
        from_vec(&[n, 2], data)
    }
}
