//! Runtime skeleton and bone poses

use bitflags::bitflags;
use glam::Mat4;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Why a bone must be kept by downstream stripping
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct BoneUsageFlags: u32 {
        const SKINNING = 1 << 0;
        const SKINNING_PARENT = 1 << 1;
        const PHYSICS = 1 << 2;
        const PHYSICS_PARENT = 1 << 3;
        const DEFORM = 1 << 4;
        const DEFORM_PARENT = 1 << 5;
        const ROOT = 1 << 6;
        const RESHAPED = 1 << 7;
    }
}

impl BoneUsageFlags {
    /// Flags a parent inherits from a child carrying `self`
    pub fn parent_flags(self) -> BoneUsageFlags {
        let mut parent = BoneUsageFlags::empty();
        if self.contains(BoneUsageFlags::SKINNING) {
            parent |= BoneUsageFlags::SKINNING_PARENT;
        }
        if self.contains(BoneUsageFlags::PHYSICS) {
            parent |= BoneUsageFlags::PHYSICS_PARENT;
        }
        if self.contains(BoneUsageFlags::DEFORM) {
            parent |= BoneUsageFlags::DEFORM_PARENT;
        }
        parent
    }
}

/// Bone names with parent indices, parents always listed before children
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    bone_names: Vec<String>,
    parents: Vec<Option<u16>>,
}

impl Skeleton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bone and return its index
    pub fn add_bone(&mut self, name: impl Into<String>, parent: Option<u16>) -> u16 {
        debug_assert!(parent.is_none_or(|p| (p as usize) < self.bone_names.len()));
        self.bone_names.push(name.into());
        self.parents.push(parent);
        (self.bone_names.len() - 1) as u16
    }

    pub fn bone_count(&self) -> usize {
        self.bone_names.len()
    }

    pub fn bone_name(&self, index: usize) -> &str {
        &self.bone_names[index]
    }

    pub fn bone_names(&self) -> &[String] {
        &self.bone_names
    }

    pub fn parent(&self, index: usize) -> Option<u16> {
        self.parents[index]
    }

    pub fn find_bone(&self, name: &str) -> Option<u16> {
        self.bone_names
            .iter()
            .position(|n| n == name)
            .map(|i| i as u16)
    }
}

/// Bind pose of one bone plus its usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonePose {
    pub bone: String,
    pub transform: Mat4,
    pub usage: BoneUsageFlags,
}

/// Add the parent variant of every usage flag to all ancestors
///
/// Poses are visited in reverse so children are processed before the
/// flags they push up are read again.
pub fn propagate_usage_flags(skeleton: &Skeleton, poses: &mut [BonePose]) {
    for pose_index in (0..poses.len()).rev() {
        let inherited = poses[pose_index].usage.parent_flags();
        if inherited.is_empty() {
            continue;
        }
        let Some(bone) = skeleton.find_bone(&poses[pose_index].bone) else {
            continue;
        };

        let mut parent = skeleton.parent(bone as usize);
        while let Some(p) = parent {
            let name = skeleton.bone_name(p as usize);
            if let Some(parent_pose) = poses.iter_mut().find(|pose| pose.bone == name) {
                parent_pose.usage |= inherited;
            }
            parent = skeleton.parent(p as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (Skeleton, Vec<BonePose>) {
        let mut skeleton = Skeleton::new();
        let root = skeleton.add_bone("root", None);
        let spine = skeleton.add_bone("spine", Some(root));
        skeleton.add_bone("head", Some(spine));
        let poses = skeleton
            .bone_names()
            .iter()
            .map(|name| BonePose {
                bone: name.clone(),
                transform: Mat4::IDENTITY,
                usage: BoneUsageFlags::empty(),
            })
            .collect();
        (skeleton, poses)
    }

    #[test]
    fn test_find_bone() {
        let (skeleton, _) = chain();
        assert_eq!(skeleton.find_bone("spine"), Some(1));
        assert_eq!(skeleton.find_bone("tail"), None);
        assert_eq!(skeleton.parent(2), Some(1));
    }

    #[test]
    fn test_usage_propagates_to_all_ancestors() {
        let (skeleton, mut poses) = chain();
        poses[2].usage = BoneUsageFlags::PHYSICS;
        propagate_usage_flags(&skeleton, &mut poses);
        assert!(poses[1].usage.contains(BoneUsageFlags::PHYSICS_PARENT));
        assert!(poses[0].usage.contains(BoneUsageFlags::PHYSICS_PARENT));
        assert!(!poses[0].usage.contains(BoneUsageFlags::SKINNING_PARENT));
        assert_eq!(poses[2].usage, BoneUsageFlags::PHYSICS);
    }

    #[test]
    fn test_root_flag_does_not_propagate() {
        let (skeleton, mut poses) = chain();
        poses[1].usage = BoneUsageFlags::ROOT;
        propagate_usage_flags(&skeleton, &mut poses);
        assert!(poses[0].usage.is_empty());
    }
}
