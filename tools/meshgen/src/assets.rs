//! Source asset model
//!
//! Imported skeletal and static meshes, skeletons, physics and clothing
//! assets, data tables and images, as the compiler reads them. Loaded from
//! the project JSON next to the graph.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    #[serde(default)]
    pub translation: Vec3,
    #[serde(default)]
    pub rotation: Quat,
    #[serde(default = "unit_scale")]
    pub scale: Vec3,
}

fn unit_scale() -> Vec3 {
    Vec3::ONE
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

// ============================================================================
// Skeletal Meshes
// ============================================================================

/// Bone of a mesh's reference skeleton, parents listed before children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefBone {
    pub name: String,
    #[serde(default)]
    pub parent: Option<u16>,
    #[serde(default)]
    pub transform: Transform,
}

fn white() -> [u8; 4] {
    [255; 4]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftVertex {
    pub position: Vec3,
    #[serde(default)]
    pub tangent_x: Vec3,
    #[serde(default)]
    pub tangent_y: Vec3,
    #[serde(default)]
    pub tangent_z: Vec4,
    #[serde(default)]
    pub uvs: Vec<Vec2>,
    #[serde(default = "white")]
    pub color: [u8; 4],
    /// Section-local bone indices
    #[serde(default)]
    pub bones: Vec<u16>,
    /// Raw weights, summing to 255 or 65535 depending on the asset
    #[serde(default)]
    pub weights: Vec<u16>,
}

/// One cloth-to-render vertex mapping record
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct ClothMapping {
    pub position_bary_and_dist: [f32; 4],
    pub normal_bary_and_dist: [f32; 4],
    pub tangent_bary_and_dist: [f32; 4],
    pub source_mesh_vert_indices: [u16; 4],
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClothBinding {
    pub asset: String,
    /// Per render vertex, or several per vertex when multi-influence
    #[serde(default)]
    pub mapping: Vec<ClothMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileInfluences {
    #[serde(default)]
    pub bones: Vec<u16>,
    #[serde(default)]
    pub weights: Vec<u16>,
}

/// Alternative skin weights of one section for one profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSkinWeightProfile {
    pub name: String,
    pub vertices: Vec<ProfileInfluences>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletalMeshSection {
    #[serde(default)]
    pub material_index: u16,
    pub base_index: u32,
    pub num_triangles: u32,
    /// First vertex of the section in the LOD vertex numbering
    #[serde(default)]
    pub base_vertex: u32,
    pub vertices: Vec<SoftVertex>,
    #[serde(default)]
    pub bone_map: Vec<u16>,
    #[serde(default = "default_influences")]
    pub max_bone_influences: u32,
    #[serde(default)]
    pub clothing: Option<ClothBinding>,
    #[serde(default)]
    pub skin_weight_profiles: Vec<SectionSkinWeightProfile>,
}

fn default_influences() -> u32 {
    4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletalMeshLod {
    pub sections: Vec<SkeletalMeshSection>,
    #[serde(default)]
    pub indices: Vec<u32>,
    #[serde(default)]
    pub required_bones: Vec<u16>,
    #[serde(default = "default_texcoords")]
    pub num_texcoords: u32,
}

fn default_texcoords() -> u32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LodInfo {
    #[serde(default)]
    pub bones_to_remove: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MorphDelta {
    /// Vertex in the LOD vertex numbering
    pub source_idx: u32,
    pub position_delta: Vec3,
    #[serde(default)]
    pub tangent_z_delta: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorphLod {
    #[serde(default)]
    pub section_indices: Vec<u32>,
    /// Sorted by `source_idx`
    pub deltas: Vec<MorphDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorphTarget {
    pub name: String,
    pub lods: Vec<MorphLod>,
}

impl MorphTarget {
    pub fn lod(&self, lod: usize) -> Option<&MorphLod> {
        self.lods.get(lod)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletalMeshAsset {
    pub name: String,
    #[serde(default)]
    pub skeleton: Option<String>,
    #[serde(default)]
    pub ref_skeleton: Vec<RefBone>,
    pub lods: Vec<SkeletalMeshLod>,
    #[serde(default)]
    pub lod_infos: Vec<LodInfo>,
    #[serde(default)]
    pub morph_targets: Vec<MorphTarget>,
    #[serde(default)]
    pub physics_asset: Option<String>,
    #[serde(default)]
    pub use_16bit_bone_weights: bool,
    #[serde(default)]
    pub has_vertex_colors: bool,
    #[serde(default)]
    pub asset_user_data: Vec<String>,
    #[serde(default)]
    pub sockets: Vec<String>,
}

impl SkeletalMeshAsset {
    pub fn section(&self, lod: usize, section: usize) -> Option<&SkeletalMeshSection> {
        self.lods.get(lod)?.sections.get(section)
    }

    pub fn find_morph(&self, name: &str) -> Option<&MorphTarget> {
        self.morph_targets.iter().find(|m| m.name == name)
    }

    pub fn max_weight(&self) -> u16 {
        if self.use_16bit_bone_weights {
            u16::MAX
        } else {
            u8::MAX as u16
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonBone {
    pub name: String,
    #[serde(default)]
    pub parent: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonAsset {
    pub name: String,
    pub bones: Vec<SkeletonBone>,
}

impl SkeletonAsset {
    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    pub fn parent_name(&self, bone: usize) -> Option<&str> {
        let parent = self.bones.get(bone)?.parent?;
        self.bones.get(parent as usize).map(|b| b.name.as_str())
    }
}

// ============================================================================
// Static Meshes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticVertex {
    pub position: Vec3,
    #[serde(default)]
    pub tangent_x: Vec4,
    #[serde(default)]
    pub tangent_z: Vec4,
    #[serde(default)]
    pub uvs: Vec<Vec2>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticMeshSection {
    #[serde(default)]
    pub material_index: u16,
    pub first_index: u32,
    pub num_triangles: u32,
    pub min_vertex_index: u32,
    pub max_vertex_index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticMeshLod {
    pub sections: Vec<StaticMeshSection>,
    pub vertices: Vec<StaticVertex>,
    pub indices: Vec<u32>,
    #[serde(default = "default_texcoords")]
    pub num_texcoords: u32,
    #[serde(default)]
    pub high_precision_uvs: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticMeshAsset {
    pub name: String,
    /// Empty when the asset has no render data
    #[serde(default)]
    pub lods: Vec<StaticMeshLod>,
}

// ============================================================================
// Physics and Clothing
// ============================================================================

/// Collision mode of a physics shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CollisionEnabled {
    NoCollision = 0,
    QueryOnly = 1,
    PhysicsOnly = 2,
    #[default]
    QueryAndPhysics = 3,
    ProbeOnly = 4,
    QueryAndProbe = 5,
}

fn default_mass() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeCommon {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub collision: CollisionEnabled,
    #[serde(default = "default_mass")]
    pub contribute_to_mass: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SphereElem {
    #[serde(flatten)]
    pub common: ShapeCommon,
    #[serde(default)]
    pub center: Vec3,
    pub radius: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxElem {
    #[serde(flatten)]
    pub common: ShapeCommon,
    #[serde(default)]
    pub center: Vec3,
    #[serde(default)]
    pub rotation: Quat,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvexElem {
    #[serde(flatten)]
    pub common: ShapeCommon,
    pub vertices: Vec<Vec3>,
    #[serde(default)]
    pub indices: Vec<u32>,
    #[serde(default)]
    pub transform: Transform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SphylElem {
    #[serde(flatten)]
    pub common: ShapeCommon,
    #[serde(default)]
    pub center: Vec3,
    #[serde(default)]
    pub rotation: Quat,
    pub radius: f32,
    pub length: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaperedCapsuleElem {
    #[serde(flatten)]
    pub common: ShapeCommon,
    #[serde(default)]
    pub center: Vec3,
    #[serde(default)]
    pub rotation: Quat,
    pub radius0: f32,
    pub radius1: f32,
    pub length: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodySetup {
    pub bone: String,
    #[serde(default)]
    pub spheres: Vec<SphereElem>,
    #[serde(default)]
    pub boxes: Vec<BoxElem>,
    #[serde(default)]
    pub convexes: Vec<ConvexElem>,
    #[serde(default)]
    pub sphyls: Vec<SphylElem>,
    #[serde(default)]
    pub tapered_capsules: Vec<TaperedCapsuleElem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicsAsset {
    pub name: String,
    #[serde(default)]
    pub bodies: Vec<BodySetup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClothingAsset {
    pub name: String,
    #[serde(default)]
    pub physics_asset: Option<String>,
    /// Render LOD -> clothing LOD
    #[serde(default)]
    pub lod_map: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimInstanceAsset {
    pub name: String,
    /// Physics assets replacing the mesh's bodies at runtime
    #[serde(default)]
    pub physics_overrides: Vec<String>,
}

// ============================================================================
// Tables and Images
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableValue {
    Scalar(f32),
    Color([f32; 4]),
    Mesh(crate::graph::MeshSectionRef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    #[serde(default)]
    pub default: Option<TableValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub name: String,
    #[serde(default)]
    pub values: HashMap<String, TableValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
    pub name: String,
    pub columns: Vec<TableColumn>,
    #[serde(default)]
    pub rows: Vec<TableRow>,
}

impl DataTable {
    pub fn column(&self, name: &str) -> Option<&TableColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub name: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// Image file whose header supplies the size when width/height are 0
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// ============================================================================
// Components
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoneToRemove {
    pub name: String,
    /// Keep the bone itself and remove only its descendants
    #[serde(default)]
    pub only_children: bool,
}

/// A customizable component: reference skeleton plus per-LOD bone removal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSettings {
    pub name: String,
    pub reference_mesh: String,
    #[serde(default)]
    pub bones_to_remove: Vec<Vec<BoneToRemove>>,
}

// ============================================================================
// Library
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetLibrary {
    #[serde(default)]
    pub skeletal_meshes: Vec<SkeletalMeshAsset>,
    #[serde(default)]
    pub static_meshes: Vec<StaticMeshAsset>,
    #[serde(default)]
    pub skeletons: Vec<SkeletonAsset>,
    #[serde(default)]
    pub physics_assets: Vec<PhysicsAsset>,
    #[serde(default)]
    pub clothing_assets: Vec<ClothingAsset>,
    #[serde(default)]
    pub anim_instances: Vec<AnimInstanceAsset>,
    #[serde(default)]
    pub tables: Vec<DataTable>,
    #[serde(default)]
    pub images: Vec<ImageAsset>,
    #[serde(default)]
    pub components: Vec<ComponentSettings>,
}

impl AssetLibrary {
    /// Bone indices that point outside their skeleton, one line each
    ///
    /// Parents must be listed before their children.
    pub fn index_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for skeleton in &self.skeletons {
            for (index, bone) in skeleton.bones.iter().enumerate() {
                if bone.parent.is_some_and(|p| p as usize >= index) {
                    problems.push(format!(
                        "Skeleton [{}] bone [{}] has parent index {} that is not listed before it",
                        skeleton.name,
                        bone.name,
                        bone.parent.unwrap_or_default()
                    ));
                }
            }
        }

        for mesh in &self.skeletal_meshes {
            let bones = mesh.ref_skeleton.len();
            for (index, bone) in mesh.ref_skeleton.iter().enumerate() {
                if bone.parent.is_some_and(|p| p as usize >= index) {
                    problems.push(format!(
                        "SkeletalMesh [{}] bone [{}] has parent index {} that is not listed before it",
                        mesh.name,
                        bone.name,
                        bone.parent.unwrap_or_default()
                    ));
                }
            }
            for (lod_index, lod) in mesh.lods.iter().enumerate() {
                if let Some(bone) = lod.required_bones.iter().find(|&&b| b as usize >= bones) {
                    problems.push(format!(
                        "SkeletalMesh [{}] LOD {lod_index} requires bone {bone} of {bones}",
                        mesh.name
                    ));
                }
                for (section_index, section) in lod.sections.iter().enumerate() {
                    if let Some(bone) = section.bone_map.iter().find(|&&b| b as usize >= bones) {
                        problems.push(format!(
                            "SkeletalMesh [{}] LOD {lod_index} section {section_index} maps bone {bone} of {bones}",
                            mesh.name
                        ));
                    }
                }
            }
        }
        problems
    }

    pub fn skeletal_mesh(&self, name: &str) -> Option<&SkeletalMeshAsset> {
        self.skeletal_meshes.iter().find(|a| a.name == name)
    }

    pub fn static_mesh(&self, name: &str) -> Option<&StaticMeshAsset> {
        self.static_meshes.iter().find(|a| a.name == name)
    }

    pub fn skeleton(&self, name: &str) -> Option<&SkeletonAsset> {
        self.skeletons.iter().find(|a| a.name == name)
    }

    pub fn physics_asset(&self, name: &str) -> Option<&PhysicsAsset> {
        self.physics_assets.iter().find(|a| a.name == name)
    }

    pub fn clothing_asset(&self, name: &str) -> Option<&ClothingAsset> {
        self.clothing_assets.iter().find(|a| a.name == name)
    }

    pub fn anim_instance(&self, name: &str) -> Option<&AnimInstanceAsset> {
        self.anim_instances.iter().find(|a| a.name == name)
    }

    pub fn table(&self, name: &str) -> Option<&DataTable> {
        self.tables.iter().find(|a| a.name == name)
    }

    pub fn image(&self, name: &str) -> Option<&ImageAsset> {
        self.images.iter().find(|a| a.name == name)
    }

    pub fn component(&self, name: &str) -> Option<&ComponentSettings> {
        self.components.iter().find(|c| c.name == name)
    }
}
