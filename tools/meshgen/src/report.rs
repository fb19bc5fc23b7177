//! JSON compile report

use crate::compile::CompiledGraph;
use crate::compile::ParameterInfo;
use crate::compile::nodes::{NodeMesh, NodeObject, NodeSurface};
use crate::diagnostics::Diagnostic;
use meshgen_common::RuntimeMesh;
use serde::Serialize;

/// Summary of one converted mesh
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshSummary {
    pub vertices: u32,
    pub indices: u32,
    pub bones: usize,
    pub surfaces: usize,
    pub streamed_resources: usize,
    pub has_physics: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_morph: Option<String>,
}

impl MeshSummary {
    pub fn of(mesh: &RuntimeMesh) -> Self {
        Self {
            vertices: mesh.vertex_count(),
            indices: mesh.index_count(),
            bones: mesh.bone_map.len(),
            surfaces: mesh.surfaces.len(),
            streamed_resources: mesh.streamed_resources.len(),
            has_physics: mesh.physics.is_some(),
            tags: mesh.tags.clone(),
            referenced_morph: mesh.referenced_morph.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MeshNodeReport {
    pub kind: &'static str,
    pub meshes: Vec<MeshSummary>,
}

impl MeshNodeReport {
    fn of(mesh: &NodeMesh) -> Self {
        Self {
            kind: mesh.kind_name(),
            meshes: mesh
                .constant_meshes()
                .iter()
                .map(|m| MeshSummary::of(m))
                .collect(),
        }
    }
}

fn pin_names<T>(entries: &[(String, T)]) -> Vec<String> {
    entries.iter().map(|(name, _)| name.clone()).collect()
}

#[derive(Debug, Serialize)]
pub struct SurfaceReport {
    pub name: String,
    pub mesh: Option<MeshNodeReport>,
    pub images: Vec<String>,
    pub colors: Vec<String>,
    pub scalars: Vec<String>,
}

impl SurfaceReport {
    fn of(surface: &NodeSurface) -> Self {
        Self {
            name: surface.name.clone(),
            mesh: surface.mesh.as_deref().map(MeshNodeReport::of),
            images: pin_names(&surface.images),
            colors: pin_names(&surface.colors),
            scalars: pin_names(&surface.scalars),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LodReport {
    pub lod: u32,
    pub surfaces: Vec<SurfaceReport>,
}

#[derive(Debug, Serialize)]
pub struct ObjectReport {
    pub name: String,
    pub component: Option<String>,
    pub lods: Vec<LodReport>,
}

impl ObjectReport {
    fn of(object: &NodeObject, only_lod: Option<u32>) -> Self {
        Self {
            name: object.name.clone(),
            component: object.component.clone(),
            lods: object
                .lods
                .iter()
                .zip(0u32..)
                .filter(|(_, lod)| only_lod.is_none_or(|only| only == *lod))
                .map(|(lod, index)| LodReport {
                    lod: index,
                    surfaces: lod.surfaces.iter().map(|s| SurfaceReport::of(s)).collect(),
                })
                .collect(),
        }
    }
}

/// Sizes of the shared stores filled while converting
#[derive(Debug, Serialize)]
pub struct StoreReport {
    pub morph_blocks: usize,
    pub cloth_blocks: usize,
    pub mesh_metadata: usize,
    pub surface_metadata: usize,
    pub clothing_assets: usize,
    pub physics_assets: usize,
    pub skin_weight_profiles: usize,
}

#[derive(Debug, Serialize)]
pub struct CompileReport {
    pub objects: Vec<ObjectReport>,
    pub parameters: Vec<ParameterInfo>,
    pub converted_meshes: usize,
    pub stores: StoreReport,
    pub referenced_skeletons: Vec<String>,
    pub anim_instances: Vec<String>,
    pub sockets: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileReport {
    /// Report of a compiled graph, optionally restricted to one LOD
    pub fn new(compiled: &CompiledGraph, only_lod: Option<u32>) -> Self {
        let c = &compiled.compilation;
        Self {
            objects: compiled
                .objects
                .iter()
                .map(|o| ObjectReport::of(o, only_lod))
                .collect(),
            parameters: compiled.parameters.clone(),
            converted_meshes: compiled.converted_meshes,
            stores: StoreReport {
                morph_blocks: c.morph_data.len(),
                cloth_blocks: c.cloth_data.len(),
                mesh_metadata: c.mesh_metadata.len(),
                surface_metadata: c.surface_metadata.len(),
                clothing_assets: c.clothing_assets.len(),
                physics_assets: c.physics_assets.len(),
                skin_weight_profiles: c.skin_weight_profiles.len(),
            },
            referenced_skeletons: c.referenced_skeletons.clone(),
            anim_instances: compiled.anim_instances.clone(),
            sockets: compiled.sockets.clone(),
            diagnostics: compiled.diagnostics.entries().to_vec(),
        }
    }
}
