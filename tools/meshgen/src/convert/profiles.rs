//! Skin-weight profile buffers
//!
//! Each profile becomes one vertex buffer whose channels use the profile id
//! as semantic index. Vertices whose profile skinning equals the base
//! skinning store zeros; the others store a hash of their influences so
//! identical overrides can be shared at runtime.

use super::vertices::{put_i32, put_influences};
use super::{CompilationContext, SkinSettings};
use crate::assets::SkeletalMeshSection;
use crate::bones::hash_combine;
use crate::skin::Influences;
use meshgen_common::format::skin_weight_profile_buffer;
use meshgen_common::{MeshBuffer, RuntimeMesh};
use tracing::warn;

/// Hash of the first `count` influences: bones and weights, then bones, then weights
pub fn influences_hash(influences: &Influences, count: usize) -> i32 {
    let mut hash = 0u32;
    for slot in 0..count {
        hash = hash_combine(hash, influences.bones[slot] as u32);
        hash = hash_combine(hash, influences.weights[slot] as u32);
    }
    for slot in 0..count {
        hash = hash_combine(hash, influences.bones[slot] as u32);
    }
    for slot in 0..count {
        hash = hash_combine(hash, influences.weights[slot] as u32);
    }
    hash as i32
}

fn same_skinning(a: &Influences, b: &Influences, count: usize) -> bool {
    a.bones[..count] == b.bones[..count] && a.weights[..count] == b.weights[..count]
}

pub(super) fn add_skin_weight_profiles(
    ctx: &mut CompilationContext,
    section: &SkeletalMeshSection,
    skin: &SkinSettings,
    base: &[Influences],
    mesh: &mut RuntimeMesh,
) {
    let vertex_count = mesh.vertex_count() as usize;
    let count = skin.components;

    for profile in &section.skin_weight_profiles {
        if profile.vertices.len() != vertex_count {
            warn!(
                "Skin weight profile [{}] has {} vertices, expected {}; skipped",
                profile.name,
                profile.vertices.len(),
                vertex_count
            );
            continue;
        }

        let id = ctx.skin_weight_profile_id(&profile.name);
        let desc = skin_weight_profile_buffer(id, 2, skin.weight_bytes(), count as u16);
        let mut buffer = MeshBuffer::with_layout(desc.element_size, &desc.channels, vertex_count as u32);

        for (vertex, influences) in profile.vertices.iter().enumerate() {
            let influences = skin.influences(&influences.bones, &influences.weights);
            if same_skinning(&influences, &base[vertex], count) {
                continue;
            }
            put_i32(&mut buffer, 0, vertex, influences_hash(&influences, count));
            put_influences(&mut buffer, 1, 2, vertex, &influences);
        }
        mesh.vertices.push_buffer(buffer);
    }
}
