//! Skeleton, bone map and bone poses of a converted section

use super::{CompilationContext, ConvertError, MeshSource};
use crate::assets::{AssetLibrary, RefBone, SkeletalMeshAsset};
use crate::bones::{build_remapped_bones, missing_skeleton_bones};
use crate::dedup::add_unique;
use glam::Mat4;
use meshgen_common::{BonePose, BoneUsageFlags, RuntimeMesh, Skeleton};
use tracing::warn;

pub(super) struct Skinning {
    /// Section-local bone index -> new bone map index, when the map changed
    pub remap: Option<Vec<u16>>,
    pub bone_map_len: usize,
}

fn ref_bone(asset: &SkeletalMeshAsset, bone: u16) -> Result<&RefBone, ConvertError> {
    asset
        .ref_skeleton
        .get(bone as usize)
        .ok_or_else(|| ConvertError::BoneOutOfRange {
            mesh: asset.name.clone(),
            bone,
            bones: asset.ref_skeleton.len(),
        })
}

/// Build skeleton, poses and bone map of one section into `mesh`
pub(super) fn build_skinning(
    ctx: &mut CompilationContext,
    assets: &AssetLibrary,
    asset: &SkeletalMeshAsset,
    source: &MeshSource,
    mesh: &mut RuntimeMesh,
) -> Result<Skinning, ConvertError> {
    let lod_index = source.lod as usize;
    let lod = &asset.lods[lod_index];
    let section = &lod.sections[source.section as usize];

    let skeleton = asset
        .skeleton
        .as_deref()
        .and_then(|name| assets.skeleton(name))
        .ok_or_else(|| ConvertError::MissingSkeleton(asset.name.clone()))?;

    let mut removals = None;
    let mut reference_skeleton = None;
    if let Some(name) = &source.component {
        let component = ctx
            .component_mut(name)
            .ok_or_else(|| ConvertError::UnknownComponent(name.clone()))?;
        component.check_compatibility(skeleton)?;
        removals = component.bones_to_remove(lod_index).cloned();
        reference_skeleton = component.reference_skeleton.clone();
    }

    let missing = missing_skeleton_bones(asset, skeleton);
    if !missing.is_empty() {
        for bone in &missing {
            warn!(
                "SkeletalMesh [{}] uses bone [{}] not present in skeleton [{}].",
                asset.name, bone, skeleton.name
            );
        }
        return Err(ConvertError::MissingBones {
            mesh: asset.name.clone(),
            skeleton: skeleton.name.clone(),
            bones: missing,
        });
    }

    if let Some(reference) = &reference_skeleton {
        let index = ctx.skeleton_index(reference);
        mesh.add_skeleton_id(index);
    }
    let index = ctx.skeleton_index(&skeleton.name);
    mesh.add_skeleton_id(index);

    let source_required: Vec<u16> = if lod.required_bones.is_empty() {
        (0..asset.ref_skeleton.len() as u16).collect()
    } else {
        lod.required_bones.clone()
    };
    let remap = build_remapped_bones(
        &asset.ref_skeleton,
        &source_required,
        removals.as_ref(),
        &asset.lod_infos,
        lod_index,
    );

    let mut required: Vec<u16> = Vec::with_capacity(source_required.len());
    for &bone in &source_required {
        add_unique(&mut required, remap.resolve(bone));
    }

    let mut bone_map: Vec<u16> = Vec::with_capacity(section.bone_map.len());
    let mut remap_indices: Vec<u16> = Vec::with_capacity(section.bone_map.len());
    let mut modified = false;
    for (local, &bone) in section.bone_map.iter().enumerate() {
        let target = remap.as_slice().get(bone as usize).copied().unwrap_or(0);
        let index = add_unique(&mut bone_map, target);
        modified |= target != bone || index != local;
        remap_indices.push(index as u16);
    }

    let mut runtime_skeleton = Skeleton::new();
    let mut composed: Vec<Mat4> = Vec::with_capacity(required.len());
    for &bone in &required {
        let ref_bone = ref_bone(asset, bone)?;
        let parent = ref_bone
            .parent
            .and_then(|p| required.iter().position(|&r| r == p))
            .filter(|&p| p < composed.len())
            .map(|p| p as u16);

        let local = ref_bone.transform.to_mat4();
        let transform = match parent {
            Some(p) => composed[p as usize] * local,
            None => local,
        };
        composed.push(transform);
        runtime_skeleton.add_bone(&ref_bone.name, parent);

        let mut usage = BoneUsageFlags::empty();
        if bone_map.contains(&bone) {
            usage |= BoneUsageFlags::SKINNING;
        }
        if parent.is_none() {
            usage |= BoneUsageFlags::ROOT;
        }
        mesh.bone_poses.push(BonePose {
            bone: ref_bone.name.clone(),
            transform,
            usage,
        });
    }

    mesh.bone_map = bone_map
        .iter()
        .map(|&bone| ref_bone(asset, bone).map(|b| b.name.clone()))
        .collect::<Result<_, _>>()?;
    mesh.skeleton = Some(runtime_skeleton);

    Ok(Skinning {
        remap: modified.then_some(remap_indices),
        bone_map_len: bone_map.len(),
    })
}
