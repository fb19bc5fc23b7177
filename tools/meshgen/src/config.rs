//! meshgen.toml compiler options

use crate::skin::BoneInfluenceMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How LODs after the first are produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoLodStrategy {
    /// Every LOD uses the section its pin is connected to
    #[default]
    Manual,
    /// LOD n uses the mesh's own LOD `connected + (n - first)`
    AutomaticFromMesh,
}

/// Compiler options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Bone influences per vertex in the output
    pub num_bone_influences: BoneInfluenceMode,

    /// Store bone weights as 16-bit values
    pub sixteen_bit_bone_weights: bool,

    /// Emit per-vertex morph delta blocks for runtime blending
    pub real_time_morphs_enabled: bool,

    /// Morphs emitted for runtime blending; empty means all morphs
    pub real_time_morphs: Vec<String>,

    /// Per-morph overrides of the selection above
    pub real_time_morph_overrides: Vec<MorphOverride>,

    pub clothing_enabled: bool,

    pub skin_weight_profiles_enabled: bool,

    /// Merge physics assets into the compiled meshes
    pub physics_asset_merge_enabled: bool,

    /// Compile physics bodies for animation-instance overrides
    pub anim_physics_manipulation_enabled: bool,

    /// Use 32-bit texture coordinates
    pub high_precision_texcoords: bool,

    /// Size skin buffers to the mesh's own maximum when it is below the mode
    pub unlimited_bone_influences: bool,

    pub auto_lod_strategy: AutoLodStrategy,

    /// Maximum probes per dedup insertion
    #[serde(default = "default_probe_limit")]
    pub dedup_probe_limit: u32,
}

fn default_probe_limit() -> u32 {
    u32::MAX
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            num_bone_influences: BoneInfluenceMode::Four,
            sixteen_bit_bone_weights: false,
            real_time_morphs_enabled: true,
            real_time_morphs: Vec::new(),
            real_time_morph_overrides: Vec::new(),
            clothing_enabled: true,
            skin_weight_profiles_enabled: true,
            physics_asset_merge_enabled: true,
            anim_physics_manipulation_enabled: true,
            high_precision_texcoords: true,
            unlimited_bone_influences: false,
            auto_lod_strategy: AutoLodStrategy::Manual,
            dedup_probe_limit: default_probe_limit(),
        }
    }
}

/// Force a morph on or off for runtime blending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MorphOverride {
    pub morph: String,
    pub enabled: bool,
    /// Restrict the override to one mesh
    #[serde(default)]
    pub mesh: Option<String>,
}

/// Load compiler options from a TOML file
pub fn load_options(path: &Path) -> Result<CompilerOptions> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read options: {}", path.display()))?;

    parse_options(&content).with_context(|| format!("Failed to parse options: {}", path.display()))
}

pub fn parse_options(content: &str) -> Result<CompilerOptions> {
    let options: CompilerOptions = toml::from_str(content)?;
    Ok(options)
}
