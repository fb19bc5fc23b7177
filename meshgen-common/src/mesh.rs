//! Runtime mesh
//!
//! The flattened artifact produced by mesh conversion: vertex and index
//! buffer sets plus skeleton, bone map, surfaces, physics and references to
//! streamed payloads. Meshes are plain values; shared copies live behind an
//! `Rc` and are cloned before mutation.

use crate::layout::{BufferSemantic, BufferSet};
use crate::physics::PhysicsBody;
use crate::resource::StreamedResourceId;
use crate::skeleton::{BonePose, Skeleton};
use serde::{Deserialize, Serialize};

/// Vertex and index sub-range of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubMesh {
    pub vertex_begin: u32,
    pub vertex_end: u32,
    pub index_begin: u32,
    pub index_end: u32,
    /// Mesh metadata id, 0 when none
    pub metadata_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshSurface {
    pub submeshes: Vec<SubMesh>,
    pub bone_map_index: u32,
    pub bone_map_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeMesh {
    pub vertices: BufferSet,
    pub indices: BufferSet,
    pub skeleton: Option<Skeleton>,
    pub bone_poses: Vec<BonePose>,
    /// Local skinning index -> skeleton bone name
    pub bone_map: Vec<String>,
    pub surfaces: Vec<MeshSurface>,
    pub streamed_resources: Vec<u64>,
    pub physics: Option<PhysicsBody>,
    pub additional_physics: Vec<PhysicsBody>,
    pub tags: Vec<String>,
    pub skeleton_ids: Vec<u32>,
    pub referenced_morph: Option<String>,
}

impl RuntimeMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.element_count()
    }

    pub fn index_count(&self) -> u32 {
        self.indices.element_count()
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_count() == 0 && self.index_count() == 0
    }

    /// Triangle indices decoded from the `VertexIndex` channel
    pub fn index_values(&self) -> Vec<u32> {
        self.indices
            .read_channel(BufferSemantic::VertexIndex, 0)
            .map(|values| values.into_iter().map(|v| v as u32).collect())
            .unwrap_or_default()
    }

    pub fn find_bone_pose(&self, bone: &str) -> Option<usize> {
        self.bone_poses.iter().position(|p| p.bone == bone)
    }

    /// Add a tag if missing and return its index
    ///
    /// Searches from the back since recently added tags are the most likely
    /// to repeat.
    pub fn add_tag_unique(&mut self, tag: impl Into<String>) -> usize {
        let tag = tag.into();
        if let Some(index) = self.tags.iter().rposition(|t| *t == tag) {
            return index;
        }
        self.tags.push(tag);
        self.tags.len() - 1
    }

    pub fn add_streamed_resource(&mut self, id: StreamedResourceId) {
        self.streamed_resources.push(id.to_u64());
    }

    pub fn add_skeleton_id(&mut self, id: u32) {
        if !self.skeleton_ids.contains(&id) {
            self.skeleton_ids.push(id);
        }
    }

    pub fn set_referenced_morph(&mut self, morph: impl Into<String>) {
        self.referenced_morph = Some(morph.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::StreamedResourceKind;

    #[test]
    fn test_add_tag_unique() {
        let mut mesh = RuntimeMesh::new();
        assert_eq!(mesh.add_tag_unique("__PA:0"), 0);
        assert_eq!(mesh.add_tag_unique("__Socket:0"), 1);
        assert_eq!(mesh.add_tag_unique("__PA:0"), 0);
        assert_eq!(mesh.tags.len(), 2);
    }

    #[test]
    fn test_streamed_resources_are_encoded() {
        let mut mesh = RuntimeMesh::new();
        mesh.add_streamed_resource(StreamedResourceId::new(
            StreamedResourceKind::RealTimeMorphTarget,
            42,
        ));
        assert_eq!(mesh.streamed_resources, vec![(2u64 << 56) | 42]);
    }

    #[test]
    fn test_skeleton_ids_unique() {
        let mut mesh = RuntimeMesh::new();
        mesh.add_skeleton_id(3);
        mesh.add_skeleton_id(3);
        mesh.add_skeleton_id(1);
        assert_eq!(mesh.skeleton_ids, vec![3, 1]);
    }
}
