//! Clothing bind data

use super::CompilationContext;
use super::vertices::{put_i32, put_u32};
use crate::assets::{AssetLibrary, ClothMapping, SkeletalMeshAsset, SkeletalMeshSection};
use crate::dedup::{DedupPayload, add_unique, hash_bytes};
use meshgen_common::{
    BufferDesc, BufferFormat, BufferSemantic, MeshBuffer, RuntimeMesh, StreamedResourceId,
    StreamedResourceKind,
};
use tracing::{info, warn};

/// Mapping records per render vertex in multi-influence cloth data
pub const CLOTH_INFLUENCES_PER_VERTEX: usize = 5;

/// Cloth-to-render mapping of one section
#[derive(Debug, Clone)]
pub struct ClothBlock {
    pub clothing_asset_index: u32,
    pub clothing_asset_lod: i32,
    pub physics_asset_index: Option<u32>,
    pub data: Vec<ClothMapping>,
}

impl PartialEq for ClothBlock {
    fn eq(&self, other: &Self) -> bool {
        self.clothing_asset_index == other.clothing_asset_index
            && self.clothing_asset_lod == other.clothing_asset_lod
            && self.physics_asset_index == other.physics_asset_index
            && bytemuck::cast_slice::<_, u8>(&self.data) == bytemuck::cast_slice::<_, u8>(&other.data)
    }
}

impl DedupPayload for ClothBlock {
    fn content_hash(&self) -> u32 {
        hash_bytes(bytemuck::cast_slice(&self.data))
    }
}

/// Keep the heaviest record of each vertex, with its weight forced to 1
pub fn single_influence_mapping(mapping: &[ClothMapping], vertex_count: usize) -> Vec<ClothMapping> {
    let stride = if mapping.len() > vertex_count {
        CLOTH_INFLUENCES_PER_VERTEX
    } else {
        1
    };
    mapping
        .chunks_exact(stride)
        .map(|records| {
            let mut best = records[0];
            for record in &records[1..] {
                if record.weight > best.weight {
                    best = *record;
                }
            }
            best.weight = 1.0;
            best
        })
        .collect()
}

/// Add the cloth bind buffers of a bound section; returns the block id or 0
pub(super) fn add_clothing(
    ctx: &mut CompilationContext,
    assets: &AssetLibrary,
    asset: &SkeletalMeshAsset,
    lod: usize,
    section: &SkeletalMeshSection,
    mesh: &mut RuntimeMesh,
    mesh_id: u32,
) -> u32 {
    let Some(binding) = &section.clothing else {
        return 0;
    };
    let Some(clothing) = assets.clothing_asset(&binding.asset) else {
        warn!(
            "Clothing asset [{}] bound to SkeletalMesh [{}] not found",
            binding.asset, asset.name
        );
        return 0;
    };

    let physics_asset_index = clothing
        .physics_asset
        .as_ref()
        .map(|name| add_unique(&mut ctx.physics_assets, name.clone()) as u32);
    let clothing_asset_index = add_unique(&mut ctx.clothing_assets, clothing.clone()) as u32;

    if binding.mapping.is_empty() {
        info!("SkeletalMesh [{}] is missing cloth mapping data.", asset.name);
        return 0;
    }

    let vertex_count = mesh.vertex_count();
    let index_desc = BufferDesc::single(BufferSemantic::Other, 2, BufferFormat::Int32, 1);
    let id_desc = BufferDesc::single(BufferSemantic::Other, 3, BufferFormat::UInt32, 1);
    let mut indices = MeshBuffer::with_layout(index_desc.element_size, &index_desc.channels, vertex_count);
    let mut ids = MeshBuffer::with_layout(id_desc.element_size, &id_desc.channels, vertex_count);

    let block = ClothBlock {
        clothing_asset_index,
        clothing_asset_lod: clothing.lod_map.get(lod).copied().unwrap_or(-1),
        physics_asset_index,
        data: single_influence_mapping(&binding.mapping, vertex_count as usize),
    };
    let id = ctx.cloth_data.add(block, mesh_id).map_or(0, |id| id.get());

    for vertex in 0..vertex_count as usize {
        put_i32(&mut indices, 0, vertex, vertex as i32);
        put_u32(&mut ids, 0, vertex, id);
    }
    mesh.vertices.push_buffer(indices);
    mesh.vertices.push_buffer(ids);

    if id != 0 {
        mesh.add_streamed_resource(StreamedResourceId::new(StreamedResourceKind::Clothing, id));
    }
    id
}
