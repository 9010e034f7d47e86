use crate::error::{try_alloc, try_with_capacity, BuildError, BuildResult};
use bytemuck::{Pod, Zeroable};

/// One slot of the alias table, laid out for verbatim upload into a storage buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct AliasEntry {
    /// Chance of keeping this slot once it has been drawn.
    pub probability: f32,
    /// Slot to take otherwise. Equals the slot's own index when no donor was needed.
    pub alias: u32,
}

const _: () = assert!(std::mem::size_of::<AliasEntry>() == 8);

/// Walker/Vose alias table for O(1) sampling of a discrete distribution.
#[derive(Clone, Debug)]
pub struct AliasTable {
    entries: Vec<AliasEntry>,
    total_weight: f64,
}

impl AliasTable {
    /// Builds a table for arbitrary weights. Non-finite and negative weights count as zero.
    pub fn from_weights(weights: &[f32], epsilon: f64) -> BuildResult<Self> {
        let sum = weights.iter().map(|&w| clean_weight(w) as f64).sum();
        Self::build(weights, sum, epsilon)
    }

    /// Builds from weights whose sum the caller already accumulated.
    pub(crate) fn build(weights: &[f32], sum: f64, epsilon: f64) -> BuildResult<Self> {
        let n = weights.len();
        if n == 0 {
            return Err(BuildError::NoWeights);
        }
        if n > u32::MAX as usize {
            return Err(BuildError::TableTooLarge { texels: n });
        }

        let mut entries = try_alloc("alias entries", n, n, AliasEntry { probability: 1.0, alias: 0 })?;
        for (index, entry) in entries.iter_mut().enumerate() {
            entry.alias = index as u32;
        }

        if !(sum > 0.0) || !sum.is_finite() {
            // All-black map: every slot keeps itself, which degenerates to uniform sampling.
            return Ok(Self { entries, total_weight: 0.0 });
        }

        let scale = n as f64 / sum;
        let boundary = 1.0 - epsilon;
        let mut remaining = try_alloc("alias residuals", n, n, 0.0f64)?;
        let mut under: Vec<u32> = try_with_capacity("under-average work-list", n, n)?;
        let mut over: Vec<u32> = try_with_capacity("over-average work-list", n, n)?;

        for (index, &weight) in weights.iter().enumerate() {
            let share = clean_weight(weight) as f64 * scale;
            remaining[index] = share;
            if share < boundary {
                under.push(index as u32);
            } else {
                over.push(index as u32);
            }
        }

        // Every iteration finalises exactly one under-average slot, so this runs at most n times.
        while let Some(&small) = under.last() {
            let Some(large) = over.pop() else {
                break;
            };
            under.pop();

            let small_share = remaining[small as usize];
            entries[small as usize] =
                AliasEntry { probability: small_share.clamp(0.0, 1.0) as f32, alias: large };

            let large_share = (remaining[large as usize] + small_share) - 1.0;
            remaining[large as usize] = large_share;
            if large_share < boundary {
                under.push(large);
            } else {
                over.push(large);
            }
        }

        // Whatever is left sits at the boundary up to rounding drift and keeps itself.
        if !under.is_empty() {
            log::trace!("[ibl] {} slot(s) finalised from rounding residue", under.len());
        }
        for &index in under.iter().chain(over.iter()) {
            entries[index as usize] = AliasEntry { probability: 1.0, alias: index };
        }

        Ok(Self { entries, total_weight: sum })
    }

    /// Picks a slot. `u1` selects the candidate, `u2` decides between it and its alias.
    ///
    /// Both are `f64`: an `f32` draw only resolves 2^24 candidates.
    #[inline]
    pub fn sample(&self, u1: f64, u2: f64) -> usize {
        self.sample_with_remainder(u1, u2).0
    }

    /// Like [`AliasTable::sample`], also returning the unused precision of `u1` and `u2` rescaled
    /// to `[0, 1)`, so a caller can place the sample inside the chosen slot.
    pub(crate) fn sample_with_remainder(&self, u1: f64, u2: f64) -> (usize, f64, f64) {
        let (candidate, rest_u1) = candidate_slot(u1, self.entries.len());
        let entry = self.entries[candidate];
        let keep = entry.probability as f64;
        let u2 = unit_interval(u2);
        if u2 < keep {
            (candidate, rest_u1, unit_interval(u2 / keep))
        } else {
            let rest_u2 = (u2 - keep) / (1.0 - keep);
            (entry.alias as usize, rest_u1, unit_interval(rest_u2))
        }
    }

    pub fn entries(&self) -> &[AliasEntry] {
        &self.entries
    }

    /// Entry slice as raw bytes, ready for a buffer upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.entries)
    }

    /// Sum of all weights before normalisation; `0.0` when every weight was zero.
    ///
    /// Kept in `f64` so maps whose finite weights add past `f32::MAX` still report a finite sum.
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Content hash of the entries and total weight.
    pub fn fingerprint(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.as_bytes());
        hasher.update(&self.total_weight.to_le_bytes());
        hasher.finalize()
    }
}

#[inline]
pub(crate) fn clean_weight(weight: f32) -> f32 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

/// Maps `u` onto one of `n` slots, returning the slot and the fraction of `u` left inside it.
#[inline]
pub(crate) fn candidate_slot(u: f64, n: usize) -> (usize, f64) {
    let scaled = unit_interval(u) * n as f64;
    let slot = (scaled as usize).min(n - 1);
    (slot, unit_interval(scaled - slot as f64))
}

/// Clamps a random number into `[0, 1)`; NaN maps to 0.
#[inline]
pub(crate) fn unit_interval(u: f64) -> f64 {
    if u >= 1.0 {
        1.0 - f64::EPSILON / 2.0
    } else if u > 0.0 {
        u
    } else {
        0.0
    }
}
