//! Mesh metadata, surfaces and the canonical vertex layout

use super::CompilationContext;
use crate::assets::SkeletalMeshAsset;
use crate::config::CompilerOptions;
use crate::dedup::{DedupPayload, hash_bytes};
use bytemuck::{Pod, Zeroable};
use meshgen_common::format::{
    color_buffer, index_buffer, positions_buffer, skin_buffer, skin_weight_profile_buffer,
    tangent_buffer, texcoords_buffer,
};
use meshgen_common::{
    BufferDesc, BufferFormat, BufferSemantic, MeshLayout, MeshSurface, RuntimeMesh, SubMesh,
};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Per-surface data the runtime needs when the surface is drawn
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceMetadata {
    pub material_slot: String,
    pub cast_shadow: bool,
}

impl DedupPayload for SurfaceMetadata {
    fn content_hash(&self) -> u32 {
        let mut bytes = self.material_slot.as_bytes().to_vec();
        bytes.push(self.cast_shadow as u8);
        hash_bytes(&bytes)
    }
}

/// Ids of the out-of-line data attached to one mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct MeshMetadata {
    pub morph_id: u32,
    pub cloth_id: u32,
    pub surface_metadata_id: u32,
}

impl DedupPayload for MeshMetadata {
    fn content_hash(&self) -> u32 {
        hash_bytes(bytemuck::bytes_of(self))
    }
}

/// Store the mesh metadata and add one surface spanning the whole mesh
pub(super) fn add_mesh_metadata(
    ctx: &mut CompilationContext,
    surface: &SurfaceMetadata,
    morph_id: u32,
    cloth_id: u32,
    mesh_id: u32,
    mesh: &mut RuntimeMesh,
) {
    let surface_metadata_id = ctx
        .surface_metadata
        .add(surface.clone(), mesh_id)
        .map_or(0, |id| id.get());
    let metadata = MeshMetadata {
        morph_id,
        cloth_id,
        surface_metadata_id,
    };
    let metadata_id = match ctx.mesh_metadata.add(metadata, mesh_id) {
        Some(id) => id.get(),
        None => {
            error!("Maximum number of meshes reached.");
            0
        }
    };

    mesh.surfaces.push(MeshSurface {
        submeshes: vec![SubMesh {
            vertex_begin: 0,
            vertex_end: mesh.vertex_count(),
            index_begin: 0,
            index_end: mesh.index_count(),
            metadata_id,
        }],
        bone_map_index: 0,
        bone_map_count: mesh.bone_map.len() as u32,
    });
}

/// What the canonical layout of a mesh LOD must hold
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshGenerationData {
    pub has_vertex_colors: bool,
    pub num_texcoords: u32,
    /// 1 or 2
    pub max_bone_index_bytes: u32,
    /// Largest authored influence count of the LOD, 0 when unskinned
    pub max_bones_per_vertex: u32,
    pub has_real_time_morphs: bool,
    pub has_clothing: bool,
    pub skin_weight_profile_ids: Vec<u32>,
}

impl MeshGenerationData {
    pub fn for_skeletal_lod(ctx: &mut CompilationContext, asset: &SkeletalMeshAsset, lod: usize) -> Self {
        let Some(mesh_lod) = asset.lods.get(lod) else {
            return Self::default();
        };

        let required_bones = if mesh_lod.required_bones.is_empty() {
            asset.ref_skeleton.len()
        } else {
            mesh_lod.required_bones.len()
        };

        let mut skin_weight_profile_ids = Vec::new();
        if ctx.options.skin_weight_profiles_enabled {
            for section in &mesh_lod.sections {
                for profile in &section.skin_weight_profiles {
                    let id = ctx.skin_weight_profile_id(&profile.name);
                    if !skin_weight_profile_ids.contains(&id) {
                        skin_weight_profile_ids.push(id);
                    }
                }
            }
        }

        Self {
            has_vertex_colors: asset.has_vertex_colors,
            num_texcoords: mesh_lod.num_texcoords.clamp(1, super::vertices::MAX_TEXCOORDS),
            max_bone_index_bytes: if required_bones > 256 { 2 } else { 1 },
            max_bones_per_vertex: mesh_lod
                .sections
                .iter()
                .map(|s| s.max_bone_influences)
                .max()
                .unwrap_or(0),
            has_real_time_morphs: ctx.options.real_time_morphs_enabled
                && !asset.morph_targets.is_empty(),
            has_clothing: ctx.options.clothing_enabled
                && mesh_lod.sections.iter().any(|s| s.clothing.is_some()),
            skin_weight_profile_ids,
        }
    }
}

/// Canonical buffers, in order: positions, tangents, texcoords, skin, color,
/// morph, cloth, then one buffer per skin-weight profile
pub fn surface_layout(options: &CompilerOptions, data: &MeshGenerationData) -> MeshLayout {
    let mut buffers = vec![
        positions_buffer(),
        tangent_buffer(),
        texcoords_buffer(data.num_texcoords, options.high_precision_texcoords),
    ];

    let weight_bytes = if options.sixteen_bit_bone_weights { 2 } else { 1 };
    let mode = options.num_bone_influences.count() as u32;
    let influences: u16 = if options.unlimited_bone_influences && data.max_bones_per_vertex < mode {
        data.max_bones_per_vertex as u16
    } else {
        mode as u16
    };

    if data.max_bones_per_vertex > 0 {
        buffers.push(skin_buffer(data.max_bone_index_bytes, weight_bytes, influences));
    }
    if data.has_vertex_colors {
        buffers.push(color_buffer());
    }
    if data.has_real_time_morphs {
        buffers.push(BufferDesc::single(BufferSemantic::Other, 0, BufferFormat::UInt32, 1));
        buffers.push(BufferDesc::single(BufferSemantic::Other, 1, BufferFormat::UInt32, 1));
    }
    if data.has_clothing {
        buffers.push(BufferDesc::single(BufferSemantic::Other, 2, BufferFormat::Int32, 1));
        buffers.push(BufferDesc::single(BufferSemantic::Other, 3, BufferFormat::UInt32, 1));
    }
    for &id in &data.skin_weight_profile_ids {
        buffers.push(skin_weight_profile_buffer(
            id,
            data.max_bone_index_bytes,
            weight_bytes,
            influences,
        ));
    }

    MeshLayout::new(buffers, index_buffer())
}

#[cfg(test)]
mod tests {
    use super::super::test_assets::*;
    use super::*;
    use crate::skin::BoneInfluenceMode;

    #[test]
    fn test_generation_data_from_lod() {
        let mut asset = body_mesh();
        asset.lods[0].sections[1].max_bone_influences = 6;
        let mut ctx = CompilationContext::new(CompilerOptions::default());
        let data = MeshGenerationData::for_skeletal_lod(&mut ctx, &asset, 0);
        assert_eq!(data.max_bones_per_vertex, 6);
        assert_eq!(data.max_bone_index_bytes, 1);
        assert_eq!(data.num_texcoords, 1);
        assert!(!data.has_real_time_morphs);
        assert!(!data.has_clothing);
        assert_eq!(MeshGenerationData::for_skeletal_lod(&mut ctx, &asset, 4), MeshGenerationData::default());
    }

    #[test]
    fn test_layout_buffer_order() {
        let data = MeshGenerationData {
            has_vertex_colors: true,
            num_texcoords: 2,
            max_bone_index_bytes: 1,
            max_bones_per_vertex: 4,
            has_real_time_morphs: true,
            has_clothing: false,
            skin_weight_profile_ids: vec![42],
        };
        let layout = surface_layout(&CompilerOptions::default(), &data);
        let first_semantics: Vec<BufferSemantic> = layout
            .vertices
            .buffers()
            .iter()
            .map(|b| b.channels[0].semantic)
            .collect();
        assert_eq!(
            first_semantics,
            vec![
                BufferSemantic::Position,
                BufferSemantic::Tangent,
                BufferSemantic::TexCoords,
                BufferSemantic::BoneIndices,
                BufferSemantic::Color,
                BufferSemantic::Other,
                BufferSemantic::Other,
                BufferSemantic::AltSkinWeight,
            ]
        );
        assert_eq!(layout.vertices.buffer(3).element_size, 8);
    }

    #[test]
    fn test_unlimited_influences_shrink_skin_buffer() {
        let data = MeshGenerationData {
            num_texcoords: 1,
            max_bone_index_bytes: 1,
            max_bones_per_vertex: 6,
            ..Default::default()
        };
        let mut options = CompilerOptions {
            num_bone_influences: BoneInfluenceMode::Eight,
            ..Default::default()
        };
        assert_eq!(surface_layout(&options, &data).vertices.buffer(3).element_size, 16);
        options.unlimited_bone_influences = true;
        assert_eq!(surface_layout(&options, &data).vertices.buffer(3).element_size, 12);
    }
}
