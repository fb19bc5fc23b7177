//! Bone remapping and skeleton compatibility
//!
//! Bones removed at a LOD collapse onto their nearest surviving ancestor.
//! The root is never removed. Skeletons are compared through bone path
//! hashes: a bone's hash combines the hashes of every ancestor name, so two
//! skeletons agree on a bone only if its whole parent chain matches.

use crate::assets::{BoneToRemove, LodInfo, RefBone, SkeletalMeshAsset, SkeletonAsset};
use crate::convert::ConvertError;
use hashbrown::HashMap;

/// Bone name -> "remove only the children"
pub type BonesToRemove = HashMap<String, bool>;

/// Merge per-LOD removal lists so a bone removed at LOD n stays removed after
///
/// A bone listed at several LODs keeps its own bone only if every listing
/// says so.
pub fn accumulate_bones_to_remove(per_lod: &[Vec<BoneToRemove>], num_lods: usize) -> Vec<BonesToRemove> {
    let mut accumulated = BonesToRemove::new();
    let mut result = Vec::with_capacity(num_lods);
    for lod in 0..num_lods {
        for bone in per_lod.get(lod).into_iter().flatten() {
            accumulated
                .entry(bone.name.clone())
                .and_modify(|only_children| *only_children &= bone.only_children)
                .or_insert(bone.only_children);
        }
        result.push(accumulated.clone());
    }
    result
}

/// Mapping from every reference-skeleton bone to its surviving bone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoneRemap {
    remapped: Vec<u16>,
}

impl BoneRemap {
    pub fn identity(bone_count: usize) -> Self {
        Self {
            remapped: (0..bone_count as u16).collect(),
        }
    }

    pub fn resolve(&self, bone: u16) -> u16 {
        self.remapped.get(bone as usize).copied().unwrap_or(bone)
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.remapped
    }

    /// Bones that resolve to another bone
    pub fn removed_bones(&self) -> impl Iterator<Item = u16> + '_ {
        self.remapped
            .iter()
            .enumerate()
            .filter(|(bone, target)| *bone != **target as usize)
            .map(|(bone, _)| bone as u16)
    }
}

/// Build the remap for the required bones of one LOD
///
/// Required bones must be ordered parents first. `component_removals` is the
/// component's accumulated list for this LOD; the mesh's own LOD infos are
/// checked from LOD 0 up to `lod`.
pub fn build_remapped_bones(
    ref_skeleton: &[RefBone],
    required_bones: &[u16],
    component_removals: Option<&BonesToRemove>,
    lod_infos: &[LodInfo],
    lod: usize,
) -> BoneRemap {
    let mut remap = BoneRemap::identity(ref_skeleton.len());
    // Set for bones whose descendants must go, including "only children" bones
    let mut removed = vec![false; ref_skeleton.len()];

    for &bone in required_bones {
        let b = bone as usize;
        let Some(ref_bone) = ref_skeleton.get(b) else {
            continue;
        };
        // Root is never removable
        let Some(p) = ref_bone
            .parent
            .map(usize::from)
            .filter(|&p| p < ref_skeleton.len())
        else {
            continue;
        };

        if removed[p] {
            removed[b] = true;
            remap.remapped[b] = remap.remapped[p];
            continue;
        }

        let mut bone_removed = false;
        if let Some(&only_children) = component_removals.and_then(|m| m.get(&ref_bone.name)) {
            removed[b] = true;
            bone_removed = !only_children;
        }

        for info in lod_infos.iter().take(lod + 1) {
            if bone_removed {
                break;
            }
            if info.bones_to_remove.iter().any(|name| *name == ref_bone.name) {
                removed[b] = true;
                bone_removed = true;
            }
        }

        if bone_removed {
            remap.remapped[b] = remap.remapped[p];
        }
    }

    remap
}

/// Simple 32-bit hash combine
#[inline]
pub fn hash_combine(seed: u32, value: u32) -> u32 {
    seed ^ (value
        .wrapping_add(0x9e37_79b9)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2))
}

#[inline]
pub fn name_hash(name: &str) -> u32 {
    xxhash_rust::xxh3::xxh3_64(name.as_bytes()) as u32
}

/// Path hash of every bone, keyed by bone name
pub fn bone_path_hashes(skeleton: &SkeletonAsset) -> HashMap<String, u32> {
    let mut hashes: HashMap<String, u32> = HashMap::with_capacity(skeleton.bones.len());
    for (index, bone) in skeleton.bones.iter().enumerate() {
        let parent_name = skeleton.parent_name(index);
        let parent_hash = parent_name.map_or(0, name_hash);
        let parent_path = parent_name
            .and_then(|name| hashes.get(name).copied())
            .unwrap_or(0);
        hashes.insert(bone.name.clone(), hash_combine(parent_path, parent_hash));
    }
    hashes
}

/// Bones of the mesh's reference skeleton that `skeleton` lacks
pub fn missing_skeleton_bones(mesh: &SkeletalMeshAsset, skeleton: &SkeletonAsset) -> Vec<String> {
    mesh.ref_skeleton
        .iter()
        .filter(|bone| skeleton.find_bone(&bone.name).is_none())
        .map(|bone| bone.name.clone())
        .collect()
}

/// Per-component compilation state
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub name: String,
    pub reference_mesh: String,
    pub reference_skeleton: Option<String>,
    reference_path_hashes: HashMap<String, u32>,
    pub bones_to_remove_per_lod: Vec<BonesToRemove>,
    /// Skeleton name -> incompatible bone, if any
    compatibility: HashMap<String, Option<String>>,
}

impl ComponentInfo {
    pub fn new(
        name: impl Into<String>,
        reference_mesh: impl Into<String>,
        reference_skeleton: Option<&SkeletonAsset>,
        bones_to_remove_per_lod: Vec<BonesToRemove>,
    ) -> Self {
        Self {
            name: name.into(),
            reference_mesh: reference_mesh.into(),
            reference_skeleton: reference_skeleton.map(|s| s.name.clone()),
            reference_path_hashes: reference_skeleton.map(bone_path_hashes).unwrap_or_default(),
            bones_to_remove_per_lod,
            compatibility: HashMap::new(),
        }
    }

    pub fn bones_to_remove(&self, lod: usize) -> Option<&BonesToRemove> {
        self.bones_to_remove_per_lod.get(lod)
    }

    /// Check every bone shared with the reference has the same parent chain
    ///
    /// The result is cached per skeleton name.
    pub fn check_compatibility(&mut self, skeleton: &SkeletonAsset) -> Result<(), ConvertError> {
        if self.reference_skeleton.as_deref() == Some(skeleton.name.as_str()) {
            return Ok(());
        }

        let conflict = match self.compatibility.get(&skeleton.name).cloned() {
            Some(cached) => cached,
            None => {
                let hashes = bone_path_hashes(skeleton);
                let conflict = skeleton
                    .bones
                    .iter()
                    .find(|bone| {
                        matches!(
                            (self.reference_path_hashes.get(&bone.name), hashes.get(&bone.name)),
                            (Some(reference), Some(own)) if reference != own
                        )
                    })
                    .map(|bone| bone.name.clone());
                self.compatibility
                    .insert(skeleton.name.clone(), conflict.clone());
                conflict
            }
        };

        match conflict {
            Some(bone) => Err(ConvertError::IncompatibleSkeleton {
                bone,
                skeleton: skeleton.name.clone(),
            }),
            None => Ok(()),
        }
    }
}
