//! Project files
//!
//! A project is one JSON document holding the graph and the asset library
//! it references. Image paths in the library are relative to the project
//! file.

use crate::assets::AssetLibrary;
use crate::graph::{Graph, NodeKind};
use crate::services::LibraryServices;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct ProjectDocument {
    graph: serde_json::Value,
    #[serde(default)]
    assets: AssetLibrary,
}

#[derive(Debug)]
pub struct Project {
    pub graph: Graph,
    pub assets: AssetLibrary,
    pub base_dir: PathBuf,
}

impl Project {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read project: {}", path.display()))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&content, base_dir)
            .with_context(|| format!("Failed to parse project: {}", path.display()))
    }

    pub fn parse(content: &str, base_dir: PathBuf) -> Result<Self> {
        let document: ProjectDocument = serde_json::from_str(content)?;
        let graph = Graph::from_value(document.graph)?;
        if let Some(problem) = document.assets.index_problems().into_iter().next() {
            bail!("Invalid asset library: {problem}");
        }
        Ok(Self {
            graph,
            assets: document.assets,
            base_dir,
        })
    }

    pub fn services(&self) -> LibraryServices<'_> {
        LibraryServices::with_base_dir(&self.assets, &self.base_dir)
    }

    /// References to assets or macros that do not exist, one line each
    pub fn check_references(&self) -> Vec<String> {
        let assets = &self.assets;
        let mut problems = Vec::new();
        let mut missing = |what: &str, name: &str, owner: String| {
            problems.push(format!("{owner} references missing {what} [{name}]"));
        };

        for node in self.graph.nodes() {
            let owner = format!("Node {} ({})", node.id.0, node.label());
            match &node.kind {
                NodeKind::SkeletalMesh {
                    mesh, anim_instance, ..
                } => {
                    if let Some(mesh) = mesh.as_deref().filter(|m| assets.skeletal_mesh(m).is_none()) {
                        missing("skeletal mesh", mesh, owner.clone());
                    }
                    if let Some(anim) = anim_instance
                        .as_deref()
                        .filter(|a| assets.anim_instance(a).is_none())
                    {
                        missing("animation instance", anim, owner);
                    }
                }
                NodeKind::StaticMesh { mesh: Some(mesh), .. } if assets.static_mesh(mesh).is_none() => {
                    missing("static mesh", mesh, owner);
                }
                NodeKind::Table { table: Some(table), .. } if assets.table(table).is_none() => {
                    missing("data table", table, owner);
                }
                NodeKind::ImageConstant { image: Some(image) } if assets.image(image).is_none() => {
                    missing("image", image, owner);
                }
                NodeKind::MacroInstance { macro_name } if self.graph.find_macro(macro_name).is_none() => {
                    missing("macro", macro_name, owner);
                }
                NodeKind::Object {
                    component: Some(component),
                    ..
                } if assets.component(component).is_none() => {
                    missing("component", component, owner);
                }
                _ => {}
            }
        }

        for component in &assets.components {
            if assets.skeletal_mesh(&component.reference_mesh).is_none() {
                missing(
                    "skeletal mesh",
                    &component.reference_mesh,
                    format!("Component {}", component.name),
                );
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = r#"{
        "graph": { "nodes": [
            { "id": 1, "kind": { "type": "SkeletalMesh", "mesh": "SK_Missing" },
              "pins": [ { "id": 2, "name": "Mesh", "direction": "Output", "category": "Mesh" } ] },
            { "id": 3, "kind": { "type": "MacroInstance", "macro_name": "Head" } }
        ] },
        "assets": {
            "components": [ { "name": "Body", "reference_mesh": "SK_Body" } ]
        }
    }"#;

    #[test]
    fn test_parse_and_check_references() {
        let project = Project::parse(PROJECT, PathBuf::new()).unwrap();
        assert_eq!(project.graph.nodes().len(), 2);
        assert_eq!(
            project.check_references(),
            vec![
                "Node 1 (SkeletalMesh) references missing skeletal mesh [SK_Missing]",
                "Node 3 (MacroInstance) references missing macro [Head]",
                "Component Body references missing skeletal mesh [SK_Body]",
            ]
        );
    }

    #[test]
    fn test_invalid_graph_is_an_error() {
        let text = r#"{ "graph": { "nodes": [ { "id": 1, "kind": { "type": "Reroute" } },
                                           { "id": 1, "kind": { "type": "Reroute" } } ] } }"#;
        let err = Project::parse(text, PathBuf::new()).unwrap_err();
        assert!(err.to_string().contains("duplicate node id"));
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("character.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Project::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("character.json"));
        assert!(Project::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_out_of_range_bones_are_an_error() {
        let assets = r#"{
            "skeletons": [ { "name": "SKEL_Broken", "bones": [ { "name": "root", "parent": 0 } ] } ],
            "skeletal_meshes": [ {
                "name": "SK_Body",
                "ref_skeleton": [ { "name": "root" }, { "name": "spine", "parent": 4 } ],
                "lods": [ { "sections": [], "required_bones": [0, 7] } ]
            } ]
        }"#;
        let library: AssetLibrary = serde_json::from_str(assets).unwrap();
        assert_eq!(
            library.index_problems(),
            vec![
                "Skeleton [SKEL_Broken] bone [root] has parent index 0 that is not listed before it",
                "SkeletalMesh [SK_Body] bone [spine] has parent index 4 that is not listed before it",
                "SkeletalMesh [SK_Body] LOD 0 requires bone 7 of 2",
            ]
        );

        let text = format!(r#"{{ "graph": {{ "nodes": [] }}, "assets": {assets} }}"#);
        let err = Project::parse(&text, PathBuf::new()).unwrap_err();
        assert!(err.to_string().starts_with("Invalid asset library: Skeleton [SKEL_Broken]"));
    }
}
