//! Mesh converter
//!
//! Turns one section of a source mesh into a [`RuntimeMesh`]. A skeletal
//! section goes through, in order:
//!
//! 1. LOD/section resolution
//! 2. skeleton, bone map and bone poses (bone removal applied)
//! 3. vertex copy with per-vertex skin normalization, optional morph bake
//! 4. index copy rebased to the section's first vertex
//! 5. real-time morph, clothing and skin-weight profile buffers
//! 6. physics bodies, usage propagation, animation physics overrides
//! 7. mesh metadata and surface
//! 8. reformat into the canonical layout
//!
//! Every payload shared between meshes (morph deltas, cloth binds, metadata)
//! goes through the [`CompilationContext`] dedup stores so equal data is
//! stored once.

mod clothing;
mod morphs;
mod physics;
mod profiles;
mod skeleton;
mod static_mesh;
mod surface;
mod vertices;

pub use clothing::{CLOTH_INFLUENCES_PER_VERTEX, ClothBlock};
pub use morphs::{
    MorphBlock, MorphVertexData, decode_offset_and_count, encode_offset_and_count,
    used_morph_names,
};
pub use physics::convert_body_setup;
pub use static_mesh::convert_static_mesh;
pub use surface::{MeshGenerationData, MeshMetadata, SurfaceMetadata, surface_layout};

use crate::assets::{AssetLibrary, ClothingAsset, ComponentSettings, SoftVertex};
use crate::bones::{ComponentInfo, accumulate_bones_to_remove, name_hash};
use crate::config::CompilerOptions;
use crate::dedup::{DedupStore, add_unique, hash_bytes};
use crate::diagnostics::Severity;
use crate::skin::{BoneInfluenceMode, Influences, MAX_TOTAL_INFLUENCES};
use bitflags::bitflags;
use hashbrown::HashMap;
use meshgen_common::{FormatError, FormatOptions, RuntimeMesh, mesh_format, optimize_buffers};
use meshgen_common::propagate_usage_flags;
use std::borrow::Cow;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConvertError {
    /// No mesh asset with this name
    #[error("Mesh [{0}] not found in the asset library.")]
    UnknownMesh(String),

    /// Requested LOD is past the asset's LODs
    #[error(
        "The SkeletalMesh [{mesh}] doesn't have the expected number of LODs [need {needed}, has {has}]. Changed after reimporting?"
    )]
    MissingLod {
        mesh: String,
        needed: usize,
        has: usize,
    },

    /// Requested section is past the LOD's sections
    #[error(
        "The SkeletalMesh [{mesh}] doesn't have the expected structure. Maybe the number of LODs [need {needed_lods}, has {has_lods}] or Materials [need {needed_sections}, has {has_sections}] has changed after reimporting?"
    )]
    MissingSection {
        mesh: String,
        needed_lods: usize,
        has_lods: usize,
        needed_sections: usize,
        has_sections: usize,
    },

    /// Skinning requested but the mesh has no usable skeleton
    #[error("No skeleton provided when converting SkeletalMesh [{0}].")]
    MissingSkeleton(String),

    /// A bone's parent chain differs from the component's reference skeleton
    #[error("Bone [{bone}] has a different parent on the Skeleton [{skeleton}] from the reference mesh.")]
    IncompatibleSkeleton { bone: String, skeleton: String },

    /// The mesh uses bones its skeleton lacks
    #[error(
        "The Skeleton [{skeleton}] is missing bones that SkeletalMesh [{mesh}] needs: {}. The mesh will be discarded!",
        .bones.join(", ")
    )]
    MissingBones {
        mesh: String,
        skeleton: String,
        bones: Vec<String>,
    },

    /// A bone index points past the mesh's reference skeleton
    #[error("SkeletalMesh [{mesh}] references bone {bone} but has {bones} bones.")]
    BoneOutOfRange { mesh: String, bone: u16, bones: usize },

    /// Conversion names a component that was never registered
    #[error("Component [{0}] is not registered.")]
    UnknownComponent(String),

    /// Static mesh LOD or section without render data
    #[error("Degenerated static mesh found for LOD {lod} Material {section}. It will be ignored.")]
    DegenerateStaticMesh {
        mesh: String,
        lod: usize,
        section: usize,
    },

    /// Final reformat into the canonical layout failed
    #[error("Failed to format converted mesh: {0}")]
    Format(#[from] FormatError),
}

impl ConvertError {
    /// Severity used when the error is reported as a node diagnostic
    pub fn severity(&self) -> Severity {
        match self {
            ConvertError::IncompatibleSkeleton { .. } | ConvertError::DegenerateStaticMesh { .. } => {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }
}

bitflags! {
    /// Parts of a section a conversion leaves out
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
    pub struct MeshConversionFlags: u32 {
        const IGNORE_SKINNING = 1 << 0;
        const IGNORE_PHYSICS = 1 << 1;
        const IGNORE_MORPHS = 1 << 2;
        const DO_NOT_CREATE_MESH_METADATA = 1 << 3;
    }
}

/// Morph targets emitted for runtime blending
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum MorphSelection {
    #[default]
    All,
    Named(Vec<String>),
}

/// One section of one mesh, plus how to convert it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshSource {
    pub mesh: String,
    pub lod: u32,
    pub section: u32,
    pub flags: MeshConversionFlags,
    /// Component whose reference skeleton and bone removal apply
    pub component: Option<String>,
    pub anim_instance: Option<String>,
    pub real_time_morphs: MorphSelection,
    /// A missing LOD/section is an error instead of an empty mesh
    pub mesh_must_exist: bool,
    pub metadata: SurfaceMetadata,
}

impl MeshSource {
    pub fn new(mesh: impl Into<String>, lod: u32, section: u32) -> Self {
        Self {
            mesh: mesh.into(),
            lod,
            section,
            mesh_must_exist: true,
            ..Default::default()
        }
    }
}

/// Physics asset an animation instance swaps in at runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimPhysicsOverride {
    pub anim_instance: String,
    pub property_index: u32,
    pub physics_asset: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkinWeightProfileInfo {
    pub name: String,
    pub id: u32,
}

/// State shared by every conversion of one compilation pass
///
/// Not reentrant: one pass owns one context.
#[derive(Debug)]
pub struct CompilationContext {
    pub options: CompilerOptions,
    pub morph_data: DedupStore<MorphBlock>,
    pub cloth_data: DedupStore<ClothBlock>,
    pub mesh_metadata: DedupStore<MeshMetadata>,
    pub surface_metadata: DedupStore<SurfaceMetadata>,
    pub clothing_assets: Vec<ClothingAsset>,
    pub physics_assets: Vec<String>,
    pub anim_physics_overrides: Vec<AnimPhysicsOverride>,
    pub referenced_skeletons: Vec<String>,
    pub skin_weight_profiles: Vec<SkinWeightProfileInfo>,
    components: HashMap<String, ComponentInfo>,
}

impl CompilationContext {
    pub fn new(options: CompilerOptions) -> Self {
        let limit = options.dedup_probe_limit;
        Self {
            morph_data: DedupStore::with_probe_limit("meshes with real time morphs", limit),
            cloth_data: DedupStore::with_probe_limit("meshes with clothing", limit),
            mesh_metadata: DedupStore::with_probe_limit("mesh metadata entries", limit),
            surface_metadata: DedupStore::with_probe_limit("surface metadata entries", limit),
            options,
            clothing_assets: Vec::new(),
            physics_assets: Vec::new(),
            anim_physics_overrides: Vec::new(),
            referenced_skeletons: Vec::new(),
            skin_weight_profiles: Vec::new(),
            components: HashMap::new(),
        }
    }

    /// Register a component so conversions can apply its bone removal
    pub fn register_component(
        &mut self,
        settings: &ComponentSettings,
        assets: &AssetLibrary,
    ) -> Result<(), ConvertError> {
        let reference = assets
            .skeletal_mesh(&settings.reference_mesh)
            .ok_or_else(|| ConvertError::UnknownMesh(settings.reference_mesh.clone()))?;
        let skeleton = reference.skeleton.as_deref().and_then(|name| assets.skeleton(name));
        let num_lods = reference.lods.len().max(settings.bones_to_remove.len());
        let removals = accumulate_bones_to_remove(&settings.bones_to_remove, num_lods);

        debug!(
            "Registered component [{}] with reference mesh [{}]",
            settings.name, settings.reference_mesh
        );
        self.components.insert(
            settings.name.clone(),
            ComponentInfo::new(&settings.name, &settings.reference_mesh, skeleton, removals),
        );
        Ok(())
    }

    pub fn component(&self, name: &str) -> Option<&ComponentInfo> {
        self.components.get(name)
    }

    pub(crate) fn component_mut(&mut self, name: &str) -> Option<&mut ComponentInfo> {
        self.components.get_mut(name)
    }

    /// Index of a skeleton in the referenced skeleton list
    pub fn skeleton_index(&mut self, name: &str) -> u32 {
        add_unique(&mut self.referenced_skeletons, name.to_string()) as u32
    }

    /// Stable id of a skin-weight profile, unique per name and never 0
    pub fn skin_weight_profile_id(&mut self, name: &str) -> u32 {
        if let Some(profile) = self.skin_weight_profiles.iter().find(|p| p.name == name) {
            return profile.id;
        }
        let mut id = name_hash(name).max(1);
        while self.skin_weight_profiles.iter().any(|p| p.id == id) {
            id = id.wrapping_add(1).max(1);
        }
        self.skin_weight_profiles.push(SkinWeightProfileInfo {
            name: name.to_string(),
            id,
        });
        id
    }
}

/// Id of a mesh asset used as the dedup source id
pub fn mesh_source_id(mesh: &str) -> u32 {
    hash_bytes(mesh.to_lowercase().as_bytes())
}

/// Per-section skinning parameters
#[derive(Debug, Clone)]
pub(crate) struct SkinSettings {
    pub mode: BoneInfluenceMode,
    /// Influences authored in the section
    pub section_influences: usize,
    /// Influences stored per vertex
    pub components: usize,
    pub bone_map_len: usize,
    pub source_max_weight: u16,
    pub max_weight: u16,
    /// Section-local bone index -> new bone map index, when the map changed
    pub remap: Option<Vec<u16>>,
}

impl SkinSettings {
    pub fn weight_bytes(&self) -> u32 {
        if self.max_weight == u16::MAX { 2 } else { 1 }
    }

    /// Raw influences of one vertex in the output weight scale
    pub fn influences(&self, bones: &[u16], weights: &[u16]) -> Influences {
        let mut influences = Influences::from_slices(bones, weights);

        if self.source_max_weight < self.max_weight {
            crate::skin::upgrade_weights_to_u16(&mut influences);
        } else if self.source_max_weight > self.max_weight && self.mode != BoneInfluenceMode::Four {
            for weight in &mut influences.weights {
                *weight = ((*weight as u32 + 128) / 257) as u16;
            }
        }

        if let Some(remap) = &self.remap {
            crate::skin::transfer_removed_bones_influences(
                &mut influences,
                self.section_influences,
                remap,
            );
        }

        match self.mode {
            BoneInfluenceMode::Four => crate::skin::normalize_weights(
                &mut influences,
                self.section_influences,
                4,
                self.bone_map_len,
                self.max_weight,
            ),
            _ => {
                crate::skin::truncate_influences(
                    &mut influences,
                    self.section_influences,
                    self.components,
                );
                if self.source_max_weight != self.max_weight {
                    crate::skin::restore_weight_sum(&mut influences, self.components, self.max_weight);
                }
            }
        }
        influences
    }
}

/// Influences stored per vertex
///
/// With unlimited influences the 8/12 modes shrink to the section's own
/// maximum.
pub(crate) fn skin_components(
    mode: BoneInfluenceMode,
    section_influences: usize,
    unlimited: bool,
) -> usize {
    let components = mode.vertex_influences(section_influences);
    if unlimited && components > 4 && section_influences < components {
        section_influences
    } else {
        components
    }
}

/// Convert one section of a skeletal mesh
///
/// `morph` names a morph target baked into the vertex positions. A missing
/// LOD or section yields an empty mesh unless `source.mesh_must_exist`.
pub fn convert_skeletal_mesh(
    ctx: &mut CompilationContext,
    assets: &AssetLibrary,
    source: &MeshSource,
    morph: Option<&str>,
) -> Result<RuntimeMesh, ConvertError> {
    let asset = assets
        .skeletal_mesh(&source.mesh)
        .ok_or_else(|| ConvertError::UnknownMesh(source.mesh.clone()))?;
    let lod_index = source.lod as usize;
    let section_index = source.section as usize;

    let Some(lod) = asset.lods.get(lod_index) else {
        if source.mesh_must_exist {
            return Err(ConvertError::MissingLod {
                mesh: asset.name.clone(),
                needed: lod_index + 1,
                has: asset.lods.len(),
            });
        }
        debug!("[{}] has no LOD {}, using an empty mesh", asset.name, lod_index);
        return Ok(RuntimeMesh::new());
    };
    let Some(section) = lod.sections.get(section_index) else {
        if source.mesh_must_exist {
            return Err(ConvertError::MissingSection {
                mesh: asset.name.clone(),
                needed_lods: lod_index + 1,
                has_lods: asset.lods.len(),
                needed_sections: section_index + 1,
                has_sections: lod.sections.len(),
            });
        }
        debug!(
            "[{}] has no section {} at LOD {}, using an empty mesh",
            asset.name, section_index, lod_index
        );
        return Ok(RuntimeMesh::new());
    };

    let flags = source.flags;
    let mesh_id = mesh_source_id(&asset.name);
    let mut mesh = RuntimeMesh::new();

    let skin = if flags.contains(MeshConversionFlags::IGNORE_SKINNING) {
        None
    } else {
        let skinning = skeleton::build_skinning(ctx, assets, asset, source, &mut mesh)?;
        let section_influences =
            (section.max_bone_influences as usize).clamp(1, MAX_TOTAL_INFLUENCES);
        let mode = ctx.options.num_bone_influences;
        Some(SkinSettings {
            mode,
            section_influences,
            components: skin_components(
                mode,
                section_influences,
                ctx.options.unlimited_bone_influences,
            ),
            bone_map_len: skinning.bone_map_len,
            source_max_weight: asset.max_weight(),
            max_weight: if ctx.options.sixteen_bit_bone_weights {
                u16::MAX
            } else {
                u8::MAX as u16
            },
            remap: skinning.remap,
        })
    };

    let vertices: Cow<'_, [SoftVertex]> = match morph {
        Some(name) if !flags.contains(MeshConversionFlags::IGNORE_MORPHS) => {
            Cow::Owned(morphs::bake_morph(asset, lod_index, section_index, name))
        }
        _ => Cow::Borrowed(&section.vertices),
    };

    let influences: Vec<Influences> = match &skin {
        Some(skin) => vertices
            .iter()
            .map(|v| skin.influences(&v.bones, &v.weights))
            .collect(),
        None => Vec::new(),
    };
    vertices::write_vertices(&mut mesh, &vertices, skin.as_ref().map(|s| (s, influences.as_slice())));
    vertices::write_indices(&mut mesh, &asset.name, lod, section);

    let morph_id = if !flags.contains(MeshConversionFlags::IGNORE_MORPHS)
        && ctx.options.real_time_morphs_enabled
    {
        morphs::add_real_time_morphs(ctx, asset, source, &mut mesh, mesh_id)
    } else {
        0
    };

    let mut cloth_id = 0;
    if let Some(skin) = &skin {
        if ctx.options.clothing_enabled {
            cloth_id = clothing::add_clothing(ctx, assets, asset, lod_index, section, &mut mesh, mesh_id);
        }
        if ctx.options.skin_weight_profiles_enabled {
            profiles::add_skin_weight_profiles(ctx, section, skin, &influences, &mut mesh);
        }
    }

    let with_physics = !flags.contains(MeshConversionFlags::IGNORE_PHYSICS) && mesh.skeleton.is_some();
    if with_physics && ctx.options.physics_asset_merge_enabled {
        if let Some(physics) = asset
            .physics_asset
            .as_deref()
            .and_then(|name| assets.physics_asset(name))
        {
            physics::merge_physics_asset(ctx, physics, &mut mesh);
        }
    }

    if let Some(skeleton) = &mesh.skeleton {
        propagate_usage_flags(skeleton, &mut mesh.bone_poses);
    }

    if with_physics && ctx.options.anim_physics_manipulation_enabled {
        if let Some(anim) = source
            .anim_instance
            .as_deref()
            .and_then(|name| assets.anim_instance(name))
        {
            physics::add_anim_physics_overrides(ctx, assets, anim, &mut mesh);
        }
    }

    if !flags.contains(MeshConversionFlags::DO_NOT_CREATE_MESH_METADATA) {
        surface::add_mesh_metadata(ctx, &source.metadata, morph_id, cloth_id, mesh_id, &mut mesh);
    }

    let mut data = MeshGenerationData::for_skeletal_lod(ctx, asset, lod_index);
    if skin.is_none() {
        data.max_bones_per_vertex = 0;
        data.has_clothing = false;
        data.skin_weight_profile_ids.clear();
    }
    if flags.contains(MeshConversionFlags::IGNORE_MORPHS) {
        data.has_real_time_morphs = false;
    }
    let layout = surface_layout(&ctx.options, &data);
    let options = FormatOptions {
        ignore_missing_channels: true,
        ..Default::default()
    };
    let mut formatted = mesh_format(&mesh, &layout, options)?;
    optimize_buffers(&mut formatted);
    Ok(formatted)
}


#[cfg(test)]
mod tests {
    use super::test_assets::*;
    use super::*;
    use crate::assets::{BoneToRemove, PhysicsAsset, BodySetup, SphereElem, ShapeCommon};
    use meshgen_common::{BoneUsageFlags, BufferSemantic, StreamedResourceId, StreamedResourceKind};

    fn context() -> CompilationContext {
        CompilationContext::new(CompilerOptions::default())
    }

    fn skin_weights(mesh: &RuntimeMesh) -> Vec<u32> {
        mesh.vertices
            .read_channel(BufferSemantic::BoneWeights, 0)
            .unwrap()
            .iter()
            .map(|w| (w * 255.0).round() as u32)
            .collect()
    }

    fn skin_indices(mesh: &RuntimeMesh) -> Vec<u32> {
        mesh.vertices
            .read_channel(BufferSemantic::BoneIndices, 0)
            .unwrap()
            .iter()
            .map(|&i| i as u32)
            .collect()
    }

    #[test]
    fn test_two_section_skinned_mesh() {
        let assets = library();
        let mut ctx = context();
        let mesh = convert_skeletal_mesh(&mut ctx, &assets, &MeshSource::new("SK_Body", 0, 0), None).unwrap();

        let skeleton = mesh.skeleton.as_ref().unwrap();
        assert_eq!(skeleton.bone_names(), &["root", "spine", "arm", "head"]);
        assert_eq!(skeleton.parent(2), Some(1));
        assert_eq!(mesh.bone_map, vec!["root", "spine", "arm"]);

        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.index_values(), vec![0, 1, 2]);

        let weights = skin_weights(&mesh);
        assert_eq!(weights.len(), 3 * 4);
        for vertex in weights.chunks(4) {
            assert_eq!(vertex.iter().sum::<u32>(), 255);
        }
        assert_eq!(&skin_indices(&mesh)[..2], &[0, 1]);

        assert_eq!(mesh.surfaces.len(), 1);
        assert_eq!(mesh.surfaces[0].bone_map_count, 3);
        assert_eq!(mesh.surfaces[0].submeshes[0].index_end, 3);
    }

    #[test]
    fn test_second_section_rebases_indices() {
        let assets = library();
        let mut ctx = context();
        let mesh = convert_skeletal_mesh(&mut ctx, &assets, &MeshSource::new("SK_Body", 0, 1), None).unwrap();
        assert_eq!(mesh.index_values(), vec![0, 1, 2]);
        assert_eq!(mesh.bone_map, vec!["spine", "head"]);
    }

    #[test]
    fn test_bone_removal_moves_weights_to_parent() {
        let mut assets = library();
        assets.components[0].bones_to_remove = vec![vec![BoneToRemove {
            name: "arm".to_string(),
            only_children: false,
        }]];
        let mut ctx = context();
        ctx.register_component(&assets.components[0], &assets).unwrap();

        let mut source = MeshSource::new("SK_Body", 0, 0);
        source.component = Some("Body".to_string());
        let mesh = convert_skeletal_mesh(&mut ctx, &assets, &source, None).unwrap();

        let skeleton = mesh.skeleton.as_ref().unwrap();
        assert_eq!(skeleton.find_bone("arm"), None);
        assert_eq!(mesh.bone_map, vec!["root", "spine"]);

        // Vertex 1 was spine 100 + arm 155, now all on spine
        let indices = skin_indices(&mesh);
        let weights = skin_weights(&mesh);
        assert_eq!(indices[4], 1);
        assert_eq!(weights[4], 255);
        // Vertex 2 was arm 128 + spine 64 + root 63
        assert_eq!(indices[8], 1);
        assert_eq!(weights[8], 192);
        assert_eq!(&weights[8..12].iter().sum::<u32>(), &255);
    }

    #[test]
    fn test_missing_section_is_empty_unless_required() {
        let assets = library();
        let mut ctx = context();
        let mut source = MeshSource::new("SK_Body", 0, 5);
        assert!(matches!(
            convert_skeletal_mesh(&mut ctx, &assets, &source, None),
            Err(ConvertError::MissingSection { needed_sections: 6, has_sections: 2, .. })
        ));

        source.mesh_must_exist = false;
        assert!(convert_skeletal_mesh(&mut ctx, &assets, &source, None).unwrap().is_empty());

        source.lod = 3;
        assert!(convert_skeletal_mesh(&mut ctx, &assets, &source, None).unwrap().is_empty());
    }

    #[test]
    fn test_missing_bones_discards_mesh() {
        let mut assets = library();
        assets.skeletons[0].bones.pop();
        let mut ctx = context();
        match convert_skeletal_mesh(&mut ctx, &assets, &MeshSource::new("SK_Body", 0, 0), None) {
            Err(ConvertError::MissingBones { bones, .. }) => assert_eq!(bones, vec!["head"]),
            other => panic!("expected missing bones, got {:?}", other),
        }
    }

    #[test]
    fn test_incompatible_skeleton_is_rejected() {
        let mut assets = library();
        let mut other = human_skeleton();
        other.name = "SKEL_Other".to_string();
        other.bones[3].parent = Some(0);
        assets.skeletons.push(other);
        let mut variant = body_mesh();
        variant.name = "SK_Variant".to_string();
        variant.skeleton = Some("SKEL_Other".to_string());
        assets.skeletal_meshes.push(variant);

        let mut ctx = context();
        ctx.register_component(&assets.components[0], &assets).unwrap();
        let mut source = MeshSource::new("SK_Variant", 0, 0);
        source.component = Some("Body".to_string());
        let error = convert_skeletal_mesh(&mut ctx, &assets, &source, None).unwrap_err();
        assert_eq!(
            error,
            ConvertError::IncompatibleSkeleton {
                bone: "head".to_string(),
                skeleton: "SKEL_Other".to_string()
            }
        );
        assert_eq!(error.severity(), Severity::Warning);
    }

    #[test]
    fn test_ignore_skinning_drops_skeleton() {
        let assets = library();
        let mut ctx = context();
        let mut source = MeshSource::new("SK_Body", 0, 0);
        source.flags = MeshConversionFlags::IGNORE_SKINNING;
        let mesh = convert_skeletal_mesh(&mut ctx, &assets, &source, None).unwrap();
        assert!(mesh.skeleton.is_none());
        assert!(!mesh.vertices.has_channel(BufferSemantic::BoneWeights, 0));
        assert!(mesh.vertices.has_channel(BufferSemantic::Position, 0));
    }

    #[test]
    fn test_shared_morph_is_stored_once() {
        let mut assets = library();
        assets.skeletal_meshes[0].morph_targets.push(smile());
        let mut ctx = context();

        let first = convert_skeletal_mesh(&mut ctx, &assets, &MeshSource::new("SK_Body", 0, 0), None).unwrap();
        let second = convert_skeletal_mesh(&mut ctx, &assets, &MeshSource::new("SK_Body", 0, 1), None).unwrap();

        assert_eq!(ctx.morph_data.len(), 1);
        let morph_resource = |mesh: &RuntimeMesh| {
            mesh.streamed_resources
                .iter()
                .filter_map(|&r| StreamedResourceId::from_u64(r))
                .find(|r| r.kind == StreamedResourceKind::RealTimeMorphTarget)
                .unwrap()
        };
        assert_eq!(morph_resource(&first), morph_resource(&second));

        let ids = first.vertices.read_channel(BufferSemantic::Other, 1).unwrap();
        assert_eq!(ids[0] as u32, morph_resource(&first).id);
        assert_eq!(ids[1], 0.0);
    }

    #[test]
    fn test_baked_morph_moves_positions() {
        let mut assets = library();
        assets.skeletal_meshes[0].morph_targets.push(smile());
        let mut ctx = context();
        let mesh =
            convert_skeletal_mesh(&mut ctx, &assets, &MeshSource::new("SK_Body", 0, 0), Some("Smile")).unwrap();
        let positions = mesh.vertices.read_channel(BufferSemantic::Position, 0).unwrap();
        assert_eq!(positions[1], 0.25);
        assert_eq!(positions[4], 0.0);
        // The asset itself is untouched
        assert_eq!(assets.skeletal_meshes[0].lods[0].sections[0].vertices[0].position.y, 0.0);
    }

    #[test]
    fn test_physics_bodies_follow_surviving_bones() {
        let mut assets = library();
        assets.skeletal_meshes[0].physics_asset = Some("PA_Body".to_string());
        let sphere = |bone: &str| BodySetup {
            bone: bone.to_string(),
            spheres: vec![SphereElem {
                common: ShapeCommon {
                    name: format!("{bone}_sphere"),
                    collision: crate::assets::CollisionEnabled::QueryAndPhysics,
                    contribute_to_mass: true,
                },
                center: glam::Vec3::ZERO,
                radius: 1.0,
            }],
            boxes: Vec::new(),
            convexes: Vec::new(),
            sphyls: Vec::new(),
            tapered_capsules: Vec::new(),
        };
        assets.physics_assets.push(PhysicsAsset {
            name: "PA_Body".to_string(),
            bodies: vec![sphere("arm"), sphere("tail")],
        });

        let mut ctx = context();
        let mesh = convert_skeletal_mesh(&mut ctx, &assets, &MeshSource::new("SK_Body", 0, 0), None).unwrap();
        let physics = mesh.physics.as_ref().unwrap();
        assert_eq!(physics.bodies.len(), 1);
        assert_eq!(physics.bodies[0].spheres[0].flags, 3 | 1 << 8);
        assert!(mesh.tags.contains(&"__PA:0".to_string()));

        let arm = &mesh.bone_poses[mesh.find_bone_pose("arm").unwrap()];
        assert!(arm.usage.contains(BoneUsageFlags::PHYSICS));
        let spine = &mesh.bone_poses[mesh.find_bone_pose("spine").unwrap()];
        assert!(spine.usage.contains(BoneUsageFlags::PHYSICS_PARENT));
    }

    #[test]
    fn test_metadata_is_deduplicated() {
        let assets = library();
        let mut ctx = context();
        let a = convert_skeletal_mesh(&mut ctx, &assets, &MeshSource::new("SK_Body", 0, 0), None).unwrap();
        let b = convert_skeletal_mesh(&mut ctx, &assets, &MeshSource::new("SK_Body", 0, 1), None).unwrap();
        assert_eq!(ctx.mesh_metadata.len(), 1);
        assert_eq!(
            a.surfaces[0].submeshes[0].metadata_id,
            b.surfaces[0].submeshes[0].metadata_id
        );

        let mut source = MeshSource::new("SK_Body", 0, 0);
        source.flags = MeshConversionFlags::DO_NOT_CREATE_MESH_METADATA;
        let c = convert_skeletal_mesh(&mut ctx, &assets, &source, None).unwrap();
        assert!(c.surfaces.is_empty());
    }

    #[test]
    fn test_skin_weight_profile_ids_are_unique() {
        let mut ctx = context();
        let a = ctx.skin_weight_profile_id("Muscular");
        let b = ctx.skin_weight_profile_id("Thin");
        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert_eq!(ctx.skin_weight_profile_id("Muscular"), a);
    }

    #[test]
    fn test_skin_components() {
        assert_eq!(skin_components(BoneInfluenceMode::Eight, 6, false), 8);
        assert_eq!(skin_components(BoneInfluenceMode::Eight, 6, true), 6);
        assert_eq!(skin_components(BoneInfluenceMode::Four, 8, true), 4);
    }

    #[test]
    fn test_sixteen_bit_weights_sum_to_u16_max() {
        let assets = library();
        let mut options = CompilerOptions::default();
        options.sixteen_bit_bone_weights = true;
        let mut ctx = CompilationContext::new(options);
        let mesh = convert_skeletal_mesh(&mut ctx, &assets, &MeshSource::new("SK_Body", 0, 0), None).unwrap();
        let weights = mesh.vertices.read_channel(BufferSemantic::BoneWeights, 0).unwrap();
        for vertex in weights.chunks(4) {
            let total: u32 = vertex.iter().map(|w| (w * 65535.0).round() as u32).sum();
            assert_eq!(total, 65535);
        }
    }

    fn skin_settings(mode: BoneInfluenceMode, section_influences: usize, source: u16, max: u16) -> SkinSettings {
        SkinSettings {
            mode,
            section_influences,
            components: mode.vertex_influences(8),
            bone_map_len: 16,
            source_max_weight: source,
            max_weight: max,
            remap: None,
        }
    }

    #[test]
    fn test_eight_influences_downscaled_sum_to_u8_max() {
        let settings = skin_settings(BoneInfluenceMode::Eight, 4, u16::MAX, 255);
        let influences = settings.influences(&[0, 1, 2, 3], &[16383, 16384, 16384, 16384]);
        assert_eq!(influences.total_weight(8), 255);
        assert_eq!(&influences.weights[..4], &[63, 64, 64, 64]);
    }

    #[test]
    fn test_wide_influences_keep_exact_sum_across_precisions() {
        let bones: Vec<u16> = (0..12).collect();
        for (mode, wide, narrow) in [
            (
                BoneInfluenceMode::Eight,
                vec![8191u16, 8191, 8191, 8191, 8191, 8191, 8191, 8198],
                vec![31u16, 31, 31, 31, 31, 31, 31, 38],
            ),
            (
                BoneInfluenceMode::Twelve,
                vec![5461u16, 5461, 5461, 5461, 5461, 5461, 5461, 5461, 5461, 5461, 5461, 5464],
                vec![21u16, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 24],
            ),
        ] {
            let count = mode.count();

            let down = skin_settings(mode, count, u16::MAX, 255);
            let influences = down.influences(&bones[..count], &wide);
            assert_eq!(influences.total_weight(count), 255, "{mode:?} 16 to 8 bit");

            let up = skin_settings(mode, count, 255, u16::MAX);
            let influences = up.influences(&bones[..count], &narrow);
            assert_eq!(influences.total_weight(count), 65535, "{mode:?} 8 to 16 bit");
        }
    }
}
