//! Static mesh sections
//!
//! Static sections keep the asset's own compact layout: f32 positions,
//! packed tangent frames, f32 or f16 texcoords and 16-bit indices. They
//! carry no skeleton and are not reformatted.

use super::ConvertError;
use super::vertices::put_f32s;
use crate::assets::StaticMeshAsset;
use meshgen_common::format::{positions_buffer, tangent_buffer, texcoords_buffer};
use meshgen_common::packing::{pack_dir_s8, pack_uv_f16};
use meshgen_common::{BufferDesc, BufferFormat, BufferSemantic, RuntimeMesh};
use tracing::warn;

pub fn convert_static_mesh(
    asset: &StaticMeshAsset,
    lod: usize,
    section: usize,
) -> Result<RuntimeMesh, ConvertError> {
    let degenerate = || ConvertError::DegenerateStaticMesh {
        mesh: asset.name.clone(),
        lod,
        section,
    };
    let mesh_lod = asset.lods.get(lod).ok_or_else(degenerate)?;
    let mesh_section = mesh_lod.sections.get(section).ok_or_else(degenerate)?;

    let vertex_start = mesh_section.min_vertex_index as usize;
    let vertex_end = (mesh_section.max_vertex_index as usize + 1).min(mesh_lod.vertices.len());
    let vertices = mesh_lod.vertices.get(vertex_start..vertex_end).ok_or_else(degenerate)?;
    let vertex_count = vertices.len();

    let buffers = [
        positions_buffer(),
        tangent_buffer(),
        texcoords_buffer(mesh_lod.num_texcoords, mesh_lod.high_precision_uvs),
    ];
    let mut mesh = RuntimeMesh::new();
    mesh.vertices.set_element_count(vertex_count as u32);
    mesh.vertices.set_buffer_count(buffers.len());
    for (index, desc) in buffers.iter().enumerate() {
        mesh.vertices.set_buffer(index, desc.element_size, &desc.channels);
    }

    for (i, vertex) in vertices.iter().enumerate() {
        put_f32s(mesh.vertices.buffer_mut(0), 0, i, &vertex.position.to_array());

        let tangents = mesh.vertices.buffer_mut(1);
        tangents
            .channel_bytes_mut(0, i)
            .copy_from_slice(&pack_dir_s8(vertex.tangent_x));
        tangents
            .channel_bytes_mut(1, i)
            .copy_from_slice(&pack_dir_s8(vertex.tangent_z));

        let texcoords = mesh.vertices.buffer_mut(2);
        for (set, uv) in vertex
            .uvs
            .iter()
            .take(mesh_lod.num_texcoords as usize)
            .enumerate()
        {
            if mesh_lod.high_precision_uvs {
                put_f32s(texcoords, set, i, &uv.to_array());
            } else {
                let [u, v] = pack_uv_f16(uv.x, uv.y);
                let out = texcoords.channel_bytes_mut(set, i);
                out[..2].copy_from_slice(&u.to_le_bytes());
                out[2..].copy_from_slice(&v.to_le_bytes());
            }
        }
    }

    let index_desc = BufferDesc::single(BufferSemantic::VertexIndex, 0, BufferFormat::UInt16, 1);
    let index_start = mesh_section.first_index as usize;
    let index_count = mesh_section.num_triangles as usize * 3;
    mesh.indices.set_element_count(index_count as u32);
    mesh.indices.set_buffer_count(1);
    mesh.indices.set_buffer(0, index_desc.element_size, &index_desc.channels);

    let mut out_of_range = 0usize;
    let indices = mesh.indices.buffer_mut(0);
    for i in 0..index_count {
        let value = mesh_lod
            .indices
            .get(index_start + i)
            .and_then(|&index| (index as usize).checked_sub(vertex_start))
            .filter(|&index| index < vertex_count && index <= u16::MAX as usize)
            .unwrap_or_else(|| {
                out_of_range += 1;
                0
            }) as u16;
        indices
            .channel_bytes_mut(0, i)
            .copy_from_slice(&value.to_le_bytes());
    }
    if out_of_range > 0 {
        warn!(
            "{} indices of StaticMesh [{}] fall outside their section and were replaced by 0",
            out_of_range, asset.name
        );
    }

    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{StaticMeshLod, StaticMeshSection, StaticVertex};
    use glam::{Vec2, Vec3, Vec4};

    fn quad(high_precision_uvs: bool) -> StaticMeshAsset {
        let vertex = |x: f32, y: f32| StaticVertex {
            position: Vec3::new(x, y, 0.0),
            tangent_x: Vec4::new(1.0, 0.0, 0.0, 0.0),
            tangent_z: Vec4::new(0.0, 0.0, 1.0, 1.0),
            uvs: vec![Vec2::new(x, y)],
        };
        StaticMeshAsset {
            name: "SM_Quad".to_string(),
            lods: vec![StaticMeshLod {
                sections: vec![
                    StaticMeshSection {
                        material_index: 0,
                        first_index: 0,
                        num_triangles: 1,
                        min_vertex_index: 0,
                        max_vertex_index: 2,
                    },
                    StaticMeshSection {
                        material_index: 1,
                        first_index: 3,
                        num_triangles: 1,
                        min_vertex_index: 1,
                        max_vertex_index: 3,
                    },
                ],
                vertices: vec![vertex(0.0, 0.0), vertex(1.0, 0.0), vertex(1.0, 1.0), vertex(0.0, 1.0)],
                indices: vec![0, 1, 2, 1, 3, 2],
                num_texcoords: 1,
                high_precision_uvs,
            }],
        }
    }

    #[test]
    fn test_section_is_rebased() {
        let mesh = convert_static_mesh(&quad(true), 0, 1).unwrap();
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.index_values(), vec![0, 2, 1]);
        let positions = mesh.vertices.read_channel(BufferSemantic::Position, 0).unwrap();
        assert_eq!(&positions[..3], &[1.0, 0.0, 0.0]);
        assert!(mesh.skeleton.is_none());
    }

    #[test]
    fn test_half_precision_texcoords() {
        let mesh = convert_static_mesh(&quad(false), 0, 0).unwrap();
        let (buffer, _) = mesh.vertices.find_channel(BufferSemantic::TexCoords, 0).unwrap();
        assert_eq!(mesh.vertices.buffer(buffer).element_size, 4);
        let uvs = mesh.vertices.read_channel(BufferSemantic::TexCoords, 0).unwrap();
        assert_eq!(uvs, vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_degenerate_section() {
        let error = convert_static_mesh(&quad(true), 0, 7).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Degenerated static mesh found for LOD 0 Material 7. It will be ignored."
        );
        assert!(convert_static_mesh(&quad(true), 2, 0).is_err());
    }
}
