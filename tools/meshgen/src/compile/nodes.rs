//! Runtime node graph
//!
//! What the translators emit. Nodes are immutable once built and shared
//! through `Rc`; converted meshes inside them are shared the same way and
//! cloned by any consumer that needs to change them.

use super::tables::SharedTable;
use crate::graph::{ColorChannelUsage, MeshSectionRef};
use meshgen_common::RuntimeMesh;
use std::rc::Rc;

/// Column of a runtime table selected by a table parameter
#[derive(Debug, Clone)]
pub struct TableRef {
    pub table: SharedTable,
    pub column: String,
    pub parameter_name: String,
    /// Hash of the lowercased table name
    pub source_id: u32,
}

#[derive(Debug, Clone)]
pub enum NodeScalar {
    Constant(f32),
    Parameter {
        name: String,
        default_value: f32,
        min: Option<f32>,
        max: Option<f32>,
    },
    EnumParameter {
        name: String,
        options: Vec<String>,
        default_index: u32,
    },
    Switch {
        parameter: Rc<NodeScalar>,
        options: Vec<Option<Rc<NodeScalar>>>,
    },
    Table(TableRef),
}

impl NodeScalar {
    /// Options of an enum parameter, `None` for every other kind
    pub fn enum_options(&self) -> Option<&[String]> {
        match self {
            NodeScalar::EnumParameter { options, .. } => Some(options),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum NodeColor {
    Constant([f32; 4]),
    Parameter {
        name: String,
        default_value: [f32; 4],
    },
    Switch {
        parameter: Rc<NodeScalar>,
        options: Vec<Option<Rc<NodeColor>>>,
    },
    Table(TableRef),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeImage {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct MeshVariation {
    pub tag: String,
    pub mesh: Option<Rc<NodeMesh>>,
}

#[derive(Debug, Clone)]
pub struct MeshReshape {
    pub base: Option<Rc<NodeMesh>>,
    pub base_shape: Option<Rc<NodeMesh>>,
    pub target_shape: Option<Rc<NodeMesh>>,
    pub reshape_vertices: bool,
    pub reshape_skeleton: bool,
    pub reshape_physics: bool,
    pub bones_to_deform: Vec<String>,
    pub physics_to_deform: Vec<String>,
    pub color_usage: [ColorChannelUsage; 4],
}

#[derive(Debug, Clone)]
pub enum NodeMesh {
    /// A converted section; `mesh` is `None` when the node had no asset
    Constant {
        mesh: Option<Rc<RuntimeMesh>>,
        source_id: u32,
        num_layouts: u32,
    },
    /// Blend of `morph` over `base` by `factor`
    Morph {
        base: Option<Rc<NodeMesh>>,
        factor: Option<Rc<NodeScalar>>,
        morph: Option<Rc<NodeMesh>>,
    },
    /// Morph built from the difference between two meshes
    MakeMorph {
        base: Rc<NodeMesh>,
        target: Rc<NodeMesh>,
    },
    Switch {
        parameter: Rc<NodeScalar>,
        options: Vec<Option<Rc<NodeMesh>>>,
    },
    Variation {
        default: Option<Rc<NodeMesh>>,
        variations: Vec<MeshVariation>,
    },
    Reshape(Box<MeshReshape>),
    Parameter {
        name: String,
        default: Option<MeshSectionRef>,
    },
    Table(TableRef),
}

impl NodeMesh {
    pub fn empty() -> Self {
        NodeMesh::Constant {
            mesh: None,
            source_id: 0,
            num_layouts: 0,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeMesh::Constant { .. } => "Constant",
            NodeMesh::Morph { .. } => "Morph",
            NodeMesh::MakeMorph { .. } => "MakeMorph",
            NodeMesh::Switch { .. } => "Switch",
            NodeMesh::Variation { .. } => "Variation",
            NodeMesh::Reshape(_) => "Reshape",
            NodeMesh::Parameter { .. } => "Parameter",
            NodeMesh::Table(_) => "Table",
        }
    }

    /// Converted meshes reachable from this node, depth first
    pub fn constant_meshes(&self) -> Vec<Rc<RuntimeMesh>> {
        let mut out = Vec::new();
        self.collect_meshes(&mut out);
        out
    }

    fn collect_meshes(&self, out: &mut Vec<Rc<RuntimeMesh>>) {
        let mut visit = |child: &Option<Rc<NodeMesh>>, out: &mut Vec<Rc<RuntimeMesh>>| {
            if let Some(child) = child {
                child.collect_meshes(out);
            }
        };
        match self {
            NodeMesh::Constant { mesh, .. } => out.extend(mesh.iter().cloned()),
            NodeMesh::Morph { base, morph, .. } => {
                visit(base, out);
                visit(morph, out);
            }
            NodeMesh::MakeMorph { base, target } => {
                base.collect_meshes(out);
                target.collect_meshes(out);
            }
            NodeMesh::Switch { options, .. } => options.iter().for_each(|o| visit(o, out)),
            NodeMesh::Variation {
                default,
                variations,
            } => {
                visit(default, out);
                variations.iter().for_each(|v| visit(&v.mesh, out));
            }
            NodeMesh::Reshape(reshape) => {
                visit(&reshape.base, out);
                visit(&reshape.base_shape, out);
                visit(&reshape.target_shape, out);
            }
            NodeMesh::Parameter { .. } | NodeMesh::Table(_) => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeSurface {
    pub name: String,
    pub mesh: Option<Rc<NodeMesh>>,
    pub images: Vec<(String, Rc<NodeImage>)>,
    pub colors: Vec<(String, Rc<NodeColor>)>,
    pub scalars: Vec<(String, Rc<NodeScalar>)>,
}

#[derive(Debug, Clone, Default)]
pub struct NodeLod {
    pub surfaces: Vec<Rc<NodeSurface>>,
}

/// Compile root: one object with its surfaces per LOD
#[derive(Debug, Clone)]
pub struct NodeObject {
    pub name: String,
    pub component: Option<String>,
    pub lods: Vec<NodeLod>,
}
