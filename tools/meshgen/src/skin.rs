//! Skin weight normalization
//!
//! Raw vertices carry up to [`MAX_TOTAL_INFLUENCES`] (bone, weight) pairs.
//! The output keeps a fixed number of them:
//! - four-influence mode selects the heaviest valid influences and rescales
//!   them so they sum exactly to the format's maximum weight
//! - eight/twelve-influence modes only clear the slots past the section's
//!   authored maximum; when the weight precision changes, slot 0 takes the
//!   rounding remainder
//!
//! Bone remapping is applied first so weights of removed bones move onto
//! their surviving ancestor.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Largest raw influence count a vertex can carry
pub const MAX_TOTAL_INFLUENCES: usize = 12;

/// Output influence budget per vertex
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoneInfluenceMode {
    #[default]
    Four,
    Eight,
    Twelve,
}

impl BoneInfluenceMode {
    pub fn count(self) -> usize {
        match self {
            BoneInfluenceMode::Four => 4,
            BoneInfluenceMode::Eight => 8,
            BoneInfluenceMode::Twelve => 12,
        }
    }

    /// Influences stored per vertex for a section authored with `section_max`
    pub fn vertex_influences(self, section_max: usize) -> usize {
        if self != BoneInfluenceMode::Four && section_max > 4 {
            self.count()
        } else {
            4
        }
    }
}

/// Fixed-size raw influence slots of one vertex
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Influences {
    pub bones: [u16; MAX_TOTAL_INFLUENCES],
    pub weights: [u16; MAX_TOTAL_INFLUENCES],
}

impl Influences {
    pub fn from_slices(bones: &[u16], weights: &[u16]) -> Self {
        let mut influences = Self::default();
        for (slot, (&bone, &weight)) in bones.iter().zip(weights).take(MAX_TOTAL_INFLUENCES).enumerate() {
            influences.bones[slot] = bone;
            influences.weights[slot] = weight;
        }
        influences
    }

    pub fn total_weight(&self, count: usize) -> u32 {
        self.weights[..count.min(MAX_TOTAL_INFLUENCES)]
            .iter()
            .map(|&w| w as u32)
            .sum()
    }
}

/// Move influences of removed bones onto their resolved bone
///
/// `remap` maps a local bone index to its surviving local index. When an
/// earlier slot already points at the surviving bone the weight merges into
/// it; indices outside the remap are cleared.
pub fn transfer_removed_bones_influences(
    influences: &mut Influences,
    influence_count: usize,
    remap: &[u16],
) {
    let count = influence_count.min(MAX_TOTAL_INFLUENCES);
    for i in 0..count {
        let bone = influences.bones[i] as usize;
        if bone >= remap.len() {
            influences.bones[i] = 0;
            influences.weights[i] = 0;
            continue;
        }

        let parent = remap[bone];
        match (0..i).find(|&j| influences.bones[j] == parent) {
            Some(j) => {
                influences.weights[j] = influences.weights[j].saturating_add(influences.weights[i]);
                influences.bones[i] = 0;
                influences.weights[i] = 0;
            }
            None => influences.bones[i] = parent,
        }
    }
}

/// Keep the `target_count` heaviest influences and rescale to `max_weight`
///
/// Only influences whose bone is below `max_bone_map_index` are eligible.
/// Ties go to the earliest slot. Slot 0 absorbs the rounding remainder so
/// the result sums exactly to `max_weight`. A vertex with no weight gets the
/// full weight on bone 0.
pub fn normalize_weights(
    influences: &mut Influences,
    influence_count: usize,
    target_count: usize,
    max_bone_map_index: usize,
    max_weight: u16,
) {
    let count = influence_count.min(MAX_TOTAL_INFLUENCES);
    let target = target_count.min(MAX_TOTAL_INFLUENCES);

    let mut selected: SmallVec<[usize; MAX_TOTAL_INFLUENCES]> = SmallVec::new();
    for _ in 0..target {
        let mut best: Option<usize> = None;
        let mut best_weight = -1i32;
        for j in 0..count {
            if selected.contains(&j) || influences.bones[j] as usize >= max_bone_map_index {
                continue;
            }
            if influences.weights[j] as i32 > best_weight {
                best = Some(j);
                best_weight = influences.weights[j] as i32;
            }
        }
        match best {
            Some(j) => selected.push(j),
            None => break,
        }
    }

    let mut result = Influences::default();
    for (slot, &j) in selected.iter().enumerate() {
        result.bones[slot] = influences.bones[j];
        result.weights[slot] = influences.weights[j];
    }

    let total = result.total_weight(target);
    if total > 0 {
        let mut assigned = 0u32;
        for slot in 1..target {
            let scaled = (result.weights[slot] as f64 / total as f64 * max_weight as f64).round() as u32;
            result.weights[slot] = scaled as u16;
            assigned += scaled;
        }
        result.weights[0] = (max_weight as u32).saturating_sub(assigned) as u16;
    } else {
        result = Influences::default();
        result.weights[0] = max_weight;
    }

    *influences = result;
}

/// Clear weights past the section's authored influence count
pub fn truncate_influences(influences: &mut Influences, section_max: usize, target_count: usize) {
    let target = target_count.min(MAX_TOTAL_INFLUENCES);
    for slot in section_max.min(target)..target {
        influences.weights[slot] = 0;
    }
}

/// Let slot 0 absorb the difference between `max_weight` and the other slots
///
/// Vertices without any weight are left untouched.
pub fn restore_weight_sum(influences: &mut Influences, count: usize, max_weight: u16) {
    let count = count.min(MAX_TOTAL_INFLUENCES);
    if influences.total_weight(count) == 0 {
        return;
    }
    let rest: u32 = influences.weights[1..count].iter().map(|&w| w as u32).sum();
    influences.weights[0] = (max_weight as u32).saturating_sub(rest) as u16;
}

/// Rescale 8-bit weights to the 16-bit range
pub fn upgrade_weights_to_u16(influences: &mut Influences) {
    for weight in &mut influences.weights {
        *weight = weight.saturating_mul(u16::MAX / u8::MAX as u16);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(influences: &Influences, count: usize) -> u32 {
        influences.total_weight(count)
    }

    #[test]
    fn test_already_normalized_is_unchanged() {
        let mut influences = Influences::from_slices(&[3, 1, 0, 2], &[128, 64, 32, 31]);
        normalize_weights(&mut influences, 4, 4, 8, 255);
        assert_eq!(&influences.bones[..4], &[3, 1, 0, 2]);
        assert_eq!(&influences.weights[..4], &[128, 64, 32, 31]);
    }

    #[test]
    fn test_keeps_heaviest_and_sums_exactly() {
        let mut influences =
            Influences::from_slices(&[0, 1, 2, 3, 4, 5], &[10, 90, 40, 60, 30, 25]);
        normalize_weights(&mut influences, 6, 4, 8, 255);
        assert_eq!(&influences.bones[..4], &[1, 3, 2, 4]);
        assert_eq!(sum(&influences, MAX_TOTAL_INFLUENCES), 255);
        assert!(influences.weights[0] >= influences.weights[1]);
        assert_eq!(&influences.weights[4..6], &[0, 0]);
    }

    #[test]
    fn test_ties_keep_first_seen() {
        let mut influences = Influences::from_slices(&[5, 6, 7, 1, 2], &[50, 50, 50, 50, 50]);
        normalize_weights(&mut influences, 5, 4, 8, 255);
        assert_eq!(&influences.bones[..4], &[5, 6, 7, 1]);
        assert_eq!(sum(&influences, 4), 255);
    }

    #[test]
    fn test_out_of_range_bones_excluded() {
        let mut influences = Influences::from_slices(&[9, 1], &[200, 55]);
        normalize_weights(&mut influences, 2, 4, 4, 255);
        assert_eq!(influences.bones[0], 1);
        assert_eq!(influences.weights[0], 255);
        assert!(influences.bones[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_total_goes_to_bone_zero() {
        let mut influences = Influences::from_slices(&[4, 5], &[0, 0]);
        normalize_weights(&mut influences, 2, 4, 8, 65535);
        assert_eq!(influences.bones[0], 0);
        assert_eq!(influences.weights[0], 65535);
        assert_eq!(sum(&influences, MAX_TOTAL_INFLUENCES), 65535);
    }

    #[test]
    fn test_weight_sum_invariant_over_many_vertices() {
        // Deterministic pseudo-random distributions
        let mut seed = 12345u32;
        let mut next = || {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            (seed >> 16) & 0x7FFF
        };
        for max_weight in [255u16, 65535] {
            for _ in 0..500 {
                let count = 1 + (next() as usize % MAX_TOTAL_INFLUENCES);
                let bones: Vec<u16> = (0..count).map(|_| (next() % 10) as u16).collect();
                let weights: Vec<u16> = (0..count)
                    .map(|_| (next() % (max_weight as u32 + 1)) as u16)
                    .collect();
                let mut influences = Influences::from_slices(&bones, &weights);
                normalize_weights(&mut influences, count, 4, 10, max_weight);
                assert_eq!(sum(&influences, MAX_TOTAL_INFLUENCES), max_weight as u32);
            }
        }
    }

    #[test]
    fn test_transfer_merges_into_existing_parent() {
        // Local bones: 0 = spine, 1 = arm (removed -> spine), 2 = head
        let remap = [0u16, 0, 2];
        let mut influences = Influences::from_slices(&[0, 1, 2], &[100, 80, 75]);
        transfer_removed_bones_influences(&mut influences, 3, &remap);
        assert_eq!(&influences.bones[..3], &[0, 0, 2]);
        assert_eq!(&influences.weights[..3], &[180, 0, 75]);
    }

    #[test]
    fn test_transfer_redirects_without_existing_parent() {
        let remap = [0u16, 0, 2];
        let mut influences = Influences::from_slices(&[1, 2], &[200, 55]);
        transfer_removed_bones_influences(&mut influences, 2, &remap);
        assert_eq!(&influences.bones[..2], &[0, 2]);
        assert_eq!(&influences.weights[..2], &[200, 55]);
    }

    #[test]
    fn test_transfer_clears_unknown_bones() {
        let remap = [0u16];
        let mut influences = Influences::from_slices(&[0, 7], &[200, 55]);
        transfer_removed_bones_influences(&mut influences, 2, &remap);
        assert_eq!(&influences.bones[..2], &[0, 0]);
        assert_eq!(&influences.weights[..2], &[200, 0]);
    }

    #[test]
    fn test_truncate_clears_past_section_max() {
        let mut influences = Influences::from_slices(&[0; 8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        truncate_influences(&mut influences, 6, 8);
        assert_eq!(&influences.weights[..8], &[1, 2, 3, 4, 5, 6, 0, 0]);
    }

    #[test]
    fn test_restore_weight_sum() {
        let mut influences = Influences::from_slices(&[0, 1, 2, 3], &[64, 64, 64, 64]);
        restore_weight_sum(&mut influences, 8, 255);
        assert_eq!(&influences.weights[..4], &[63, 64, 64, 64]);

        let mut empty = Influences::default();
        restore_weight_sum(&mut empty, 8, 255);
        assert_eq!(sum(&empty, MAX_TOTAL_INFLUENCES), 0);
    }

    #[test]
    fn test_vertex_influences() {
        assert_eq!(BoneInfluenceMode::Four.vertex_influences(8), 4);
        assert_eq!(BoneInfluenceMode::Eight.vertex_influences(4), 4);
        assert_eq!(BoneInfluenceMode::Twelve.vertex_influences(6), 12);
    }
}
