//! Morph baking and real-time morph blocks
//!
//! Real-time morphs are stored out of line: every vertex of the section gets
//! an `offset | count << 23` word pointing into one shared block of
//! [`MorphVertexData`] records, plus the block's resource id.

use super::vertices::put_u32;
use super::{CompilationContext, MeshSource, MorphSelection};
use crate::assets::{SkeletalMeshAsset, SoftVertex};
use crate::config::MorphOverride;
use crate::dedup::{DedupPayload, hash_bytes};
use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use meshgen_common::{
    BufferDesc, BufferFormat, BufferSemantic, MeshBuffer, RuntimeMesh, StreamedResourceId,
    StreamedResourceKind,
};
use smallvec::SmallVec;
use tracing::{debug, warn};

const LOG2_MAX_VERTICES: u32 = 23;
const LOG2_MAX_MORPHS: u32 = 32 - LOG2_MAX_VERTICES;
const OFFSET_MASK: u32 = (1 << LOG2_MAX_VERTICES) - 1;

/// Delta of one morph on one vertex
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct MorphVertexData {
    pub position_delta: [f32; 3],
    pub tangent_z_delta: [f32; 3],
    /// Index into the block's name list
    pub name_index: u32,
}

/// All real-time morph deltas of one section
#[derive(Debug, Clone)]
pub struct MorphBlock {
    pub names: Vec<String>,
    pub data: Vec<MorphVertexData>,
}

impl PartialEq for MorphBlock {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names
            && bytemuck::cast_slice::<_, u8>(&self.data) == bytemuck::cast_slice::<_, u8>(&other.data)
    }
}

impl DedupPayload for MorphBlock {
    fn content_hash(&self) -> u32 {
        hash_bytes(bytemuck::cast_slice(&self.data))
    }
}

/// Pack a block offset and morph count into one word
///
/// # Panics
///
/// Panics when the offset needs more than 23 bits or the count more than 9.
pub fn encode_offset_and_count(offset: usize, count: usize) -> u32 {
    assert!(
        offset < OFFSET_MASK as usize,
        "Maximum number of vertices with morphs per mesh reached."
    );
    assert!(
        count < (1usize << LOG2_MAX_MORPHS) - 1,
        "Maximum number of morphs per vertex reached."
    );
    offset as u32 | (count as u32) << LOG2_MAX_VERTICES
}

pub fn decode_offset_and_count(value: u32) -> (u32, u32) {
    (value & OFFSET_MASK, value >> LOG2_MAX_VERTICES)
}

/// Morph names emitted for runtime blending, in asset order
///
/// Overrides apply after the selection; an override restricted to this mesh
/// wins over a global one for the same morph.
pub fn used_morph_names(
    asset: &SkeletalMeshAsset,
    selection: &MorphSelection,
    overrides: &[MorphOverride],
) -> Vec<String> {
    let mut used: Vec<String> = match selection {
        MorphSelection::All => asset.morph_targets.iter().map(|m| m.name.clone()).collect(),
        MorphSelection::Named(names) => names.clone(),
    };

    let mut seen: SmallVec<[&str; 8]> = SmallVec::new();
    for entry in overrides {
        if seen.contains(&entry.morph.as_str()) {
            continue;
        }
        seen.push(&entry.morph);

        let for_morph = || overrides.iter().filter(|o| o.morph == entry.morph);
        let chosen = for_morph()
            .find(|o| o.mesh.as_deref() == Some(asset.name.as_str()))
            .or_else(|| for_morph().find(|o| o.mesh.is_none()));
        let Some(chosen) = chosen else {
            continue;
        };

        let present = used.iter().any(|name| *name == chosen.morph);
        if chosen.enabled && !present {
            used.push(chosen.morph.clone());
        } else if !chosen.enabled {
            used.retain(|name| *name != chosen.morph);
        }
    }

    used.retain(|name| asset.find_morph(name).is_some());
    used.sort_by_key(|name| asset.morph_targets.iter().position(|m| m.name == *name));
    used
}

/// Section vertices with one morph applied
///
/// Works on a copy; an unknown morph logs and returns the vertices unchanged.
pub(super) fn bake_morph(
    asset: &SkeletalMeshAsset,
    lod: usize,
    section: usize,
    morph: &str,
) -> Vec<SoftVertex> {
    let section = &asset.lods[lod].sections[section];
    let mut vertices = section.vertices.clone();

    let Some(target) = asset.find_morph(morph) else {
        warn!("SkeletalMesh [{}] has no morph target [{}]", asset.name, morph);
        return vertices;
    };
    let Some(morph_lod) = target.lod(lod) else {
        return vertices;
    };

    for delta in &morph_lod.deltas {
        let Some(local) = delta.source_idx.checked_sub(section.base_vertex) else {
            continue;
        };
        if let Some(vertex) = vertices.get_mut(local as usize) {
            vertex.position += delta.position_delta;
            vertex.tangent_z += Vec4::from((delta.tangent_z_delta, 0.0));
        }
    }
    vertices
}

/// Add the morph offset and id buffers; returns the block id or 0
pub(super) fn add_real_time_morphs(
    ctx: &mut CompilationContext,
    asset: &SkeletalMeshAsset,
    source: &MeshSource,
    mesh: &mut RuntimeMesh,
    mesh_id: u32,
) -> u32 {
    let names = used_morph_names(
        asset,
        &source.real_time_morphs,
        &ctx.options.real_time_morph_overrides,
    );
    if names.is_empty() {
        return 0;
    }

    let lod_index = source.lod as usize;
    let section = &asset.lods[lod_index].sections[source.section as usize];
    let targets: Vec<_> = names
        .iter()
        .enumerate()
        .filter_map(|(name_index, name)| {
            let morph_lod = asset.find_morph(name)?.lod(lod_index)?;
            morph_lod
                .section_indices
                .contains(&source.section)
                .then_some((name_index as u32, morph_lod))
        })
        .collect();

    let vertex_count = mesh.vertex_count();
    let offsets_desc = BufferDesc::single(BufferSemantic::Other, 0, BufferFormat::UInt32, 1);
    let ids_desc = BufferDesc::single(BufferSemantic::Other, 1, BufferFormat::UInt32, 1);
    let mut offsets = MeshBuffer::with_layout(offsets_desc.element_size, &offsets_desc.channels, vertex_count);
    let mut ids = MeshBuffer::with_layout(ids_desc.element_size, &ids_desc.channels, vertex_count);

    let mut data: Vec<MorphVertexData> = Vec::new();
    for vertex in 0..vertex_count {
        let lod_vertex = section.base_vertex + vertex;
        let offset = data.len();
        for &(name_index, morph_lod) in &targets {
            if let Ok(found) = morph_lod
                .deltas
                .binary_search_by_key(&lod_vertex, |d| d.source_idx)
            {
                let delta = &morph_lod.deltas[found];
                data.push(MorphVertexData {
                    position_delta: delta.position_delta.to_array(),
                    tangent_z_delta: delta.tangent_z_delta.to_array(),
                    name_index,
                });
            }
        }
        let count = data.len() - offset;
        if count > 0 {
            put_u32(&mut offsets, 0, vertex as usize, encode_offset_and_count(offset, count));
        }
    }

    let mut id = 0;
    if !data.is_empty() {
        let block = MorphBlock { names, data };
        if let Some(resource) = ctx.morph_data.add(block, mesh_id) {
            id = resource.get();
            for vertex in 0..vertex_count as usize {
                if offsets.channel_bytes(0, vertex).iter().any(|&b| b != 0) {
                    put_u32(&mut ids, 0, vertex, id);
                }
            }
            mesh.add_streamed_resource(StreamedResourceId::new(
                StreamedResourceKind::RealTimeMorphTarget,
                id,
            ));
        }
    } else {
        debug!(
            "No real-time morph deltas for [{}] LOD {} section {}",
            asset.name, source.lod, source.section
        );
    }

    mesh.vertices.push_buffer(offsets);
    mesh.vertices.push_buffer(ids);
    id
}

#[cfg(test)]
mod tests {
    use super::super::test_assets::*;
    use super::*;
    use crate::assets::{MorphDelta, MorphLod, MorphTarget};
    use glam::Vec3;

    fn asset_with_morphs() -> SkeletalMeshAsset {
        let mut asset = body_mesh();
        asset.morph_targets.push(smile());
        asset.morph_targets.push(MorphTarget {
            name: "Frown".to_string(),
            lods: vec![MorphLod {
                section_indices: vec![0],
                deltas: vec![MorphDelta {
                    source_idx: 0,
                    position_delta: Vec3::new(0.0, -0.5, 0.0),
                    tangent_z_delta: Vec3::ZERO,
                }],
            }],
        });
        asset
    }

    fn morph_override(morph: &str, enabled: bool, mesh: Option<&str>) -> MorphOverride {
        MorphOverride {
            morph: morph.to_string(),
            enabled,
            mesh: mesh.map(str::to_string),
        }
    }

    #[test]
    fn test_offset_and_count_encoding() {
        let word = encode_offset_and_count(12345, 3);
        assert_eq!(decode_offset_and_count(word), (12345, 3));
        assert_eq!(encode_offset_and_count(0, 1), 1 << 23);
    }

    #[test]
    #[should_panic(expected = "Maximum number of vertices with morphs")]
    fn test_offset_budget_is_asserted() {
        encode_offset_and_count((1 << 23) - 1, 1);
    }

    #[test]
    #[should_panic(expected = "Maximum number of morphs per vertex")]
    fn test_count_budget_is_asserted() {
        encode_offset_and_count(0, 511);
    }

    #[test]
    fn test_used_morph_names_with_overrides() {
        let asset = asset_with_morphs();
        assert_eq!(used_morph_names(&asset, &MorphSelection::All, &[]), vec!["Smile", "Frown"]);

        let named = MorphSelection::Named(vec!["Frown".to_string()]);
        assert_eq!(used_morph_names(&asset, &named, &[]), vec!["Frown"]);

        let overrides = vec![
            morph_override("Smile", true, None),
            morph_override("Frown", false, None),
        ];
        assert_eq!(used_morph_names(&asset, &named, &overrides), vec!["Smile"]);

        // Mesh-specific override beats the global one
        let overrides = vec![
            morph_override("Frown", false, None),
            morph_override("Frown", true, Some("SK_Body")),
        ];
        assert_eq!(
            used_morph_names(&asset, &MorphSelection::All, &overrides),
            vec!["Smile", "Frown"]
        );

        // Unknown morphs are dropped
        let named = MorphSelection::Named(vec!["Wink".to_string()]);
        assert!(used_morph_names(&asset, &named, &[]).is_empty());
    }

    #[test]
    fn test_bake_skips_other_sections() {
        let asset = asset_with_morphs();
        let baked = bake_morph(&asset, 0, 1, "Smile");
        assert_eq!(baked[0].position, Vec3::new(3.0, 0.25, 0.0));
        assert_eq!(baked[1].position, Vec3::new(4.0, 0.0, 0.0));

        let unknown = bake_morph(&asset, 0, 0, "Wink");
        assert_eq!(unknown, asset.lods[0].sections[0].vertices);
    }

    #[test]
    fn test_block_lists_every_morph_of_a_vertex() {
        let asset = asset_with_morphs();
        let mut ctx = CompilationContext::new(Default::default());
        let mut mesh = RuntimeMesh::new();
        mesh.vertices.set_element_count(3);
        let source = MeshSource::new("SK_Body", 0, 0);

        let id = add_real_time_morphs(&mut ctx, &asset, &source, &mut mesh, 7);
        assert_ne!(id, 0);
        let offsets = mesh.vertices.read_channel(BufferSemantic::Other, 0).unwrap();
        assert_eq!(decode_offset_and_count(offsets[0] as u32), (0, 2));
        assert_eq!(offsets[1], 0.0);

        let block = &ctx
            .morph_data
            .find(std::num::NonZeroU32::new(id).unwrap())
            .unwrap()
            .payload;
        assert_eq!(block.names, vec!["Smile", "Frown"]);
        assert_eq!(block.data[1].name_index, 1);
        assert_eq!(block.data[1].position_delta, [0.0, -0.5, 0.0]);
    }
}
