//! Customization graph model
//!
//! The authoring graph is a flat list of nodes. Every node owns its pins and
//! input pins list the output pins they are linked to. Node payloads are a
//! closed [`NodeKind`] enum so translators can match exhaustively.
//!
//! # JSON shape
//! ```text
//! { "nodes": [ { "id": 1, "name": "Body", "kind": { "type": "SkeletalMesh", ... },
//!                "pins": [ { "id": 10, "name": "Mesh", "direction": "Output",
//!                            "category": "Mesh", "links": [] } ] } ],
//!   "macros": [ { "name": "Head", "input": 5, "output": 6 } ] }
//! ```

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinId(pub u32);

/// Well-known pin names
pub mod pin_names {
    pub const MESH: &str = "Mesh";
    pub const BASE_MESH: &str = "Base Mesh";
    pub const BASE_SHAPE: &str = "Base Shape";
    pub const TARGET_SHAPE: &str = "Target Shape";
    pub const FACTOR: &str = "Factor";
    pub const MORPH_TARGET_NAME: &str = "Morph Target Name";
    pub const STACK: &str = "Stack";
    pub const SWITCH_PARAMETER: &str = "Switch Parameter";
    pub const DEFAULT: &str = "Default";
    pub const VALUE: &str = "Value";
    pub const SURFACE: &str = "Surface";
    pub const IMAGE: &str = "Image";
    pub const COLOR: &str = "Color";
    pub const STRING: &str = "String";
    pub const OBJECT: &str = "Object";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinCategory {
    Mesh,
    Scalar,
    Color,
    Image,
    Surface,
    Object,
    String,
    Enum,
    MorphStack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pin {
    pub id: PinId,
    pub name: String,
    pub direction: PinDirection,
    pub category: PinCategory,
    /// Output pins this input pin is connected to
    #[serde(default)]
    pub links: Vec<PinId>,
}

/// Output pin of a mesh node bound to one LOD/section of its asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionPin {
    pub pin: PinId,
    pub lod: u32,
    pub section: u32,
}

/// Default value of a mesh parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshSectionRef {
    pub mesh: String,
    #[serde(default)]
    pub lod: u32,
    #[serde(default)]
    pub section: u32,
}

/// How a reshape node uses one vertex color channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorChannelUsage {
    #[default]
    None,
    MaskWeight,
}

/// Which bones or physics bodies a reshape node deforms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoneDeformSelection {
    /// Listed bones only
    #[default]
    OnlySelected,
    /// Every bone of the source meshes except the listed ones
    AllButSelected,
    /// Every bone of the component's reference skeleton
    DeformRefSkeleton,
    /// Source mesh bones missing from the component's reference skeleton
    DeformNoneRefSkeleton,
}

impl BoneDeformSelection {
    pub fn uses_reference_skeleton(self) -> bool {
        matches!(
            self,
            BoneDeformSelection::DeformRefSkeleton | BoneDeformSelection::DeformNoneRefSkeleton
        )
    }

    /// Whether the matched set is inverted
    pub fn inverts(self) -> bool {
        matches!(
            self,
            BoneDeformSelection::AllButSelected | BoneDeformSelection::DeformNoneRefSkeleton
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeKind {
    SkeletalMesh {
        mesh: Option<String>,
        #[serde(default)]
        sections: Vec<SectionPin>,
        #[serde(default)]
        anim_instance: Option<String>,
        #[serde(default)]
        anim_slot: Option<String>,
        #[serde(default)]
        gameplay_tags: Vec<String>,
    },
    StaticMesh {
        mesh: Option<String>,
        #[serde(default)]
        sections: Vec<SectionPin>,
    },
    MeshMorph {
        morph_name: String,
    },
    MeshMorphStackDefinition {
        #[serde(default)]
        morph_names: Vec<String>,
    },
    MeshMorphStackApplication,
    MeshSwitch {
        #[serde(default)]
        options: Vec<String>,
    },
    MeshVariation {
        #[serde(default)]
        variations: Vec<String>,
    },
    MeshReshape {
        #[serde(default = "default_true")]
        reshape_vertices: bool,
        #[serde(default)]
        reshape_skeleton: bool,
        #[serde(default)]
        reshape_physics: bool,
        #[serde(default)]
        bones_to_deform: Vec<String>,
        #[serde(default)]
        selection_method: BoneDeformSelection,
        #[serde(default)]
        physics_to_deform: Vec<String>,
        #[serde(default)]
        physics_selection_method: BoneDeformSelection,
        #[serde(default)]
        color_usage: [ColorChannelUsage; 4],
    },
    MeshParameter {
        name: String,
        #[serde(default)]
        default: Option<MeshSectionRef>,
    },
    Table {
        table: Option<String>,
        #[serde(default)]
        parameter_name: String,
        /// Mesh output pins; the pin name selects the column
        #[serde(default)]
        sections: Vec<SectionPin>,
    },
    AnimationPose,
    MacroInstance {
        macro_name: String,
    },
    Tunnel,
    Reroute,
    ScalarConstant {
        value: f32,
    },
    ScalarParameter {
        name: String,
        #[serde(default)]
        default_value: f32,
        #[serde(default)]
        min: Option<f32>,
        #[serde(default)]
        max: Option<f32>,
    },
    EnumParameter {
        name: String,
        #[serde(default)]
        values: Vec<String>,
        #[serde(default)]
        default_index: u32,
    },
    ScalarSwitch {
        #[serde(default)]
        options: Vec<String>,
    },
    ColorConstant {
        value: [f32; 4],
    },
    ColorParameter {
        name: String,
        #[serde(default = "default_white")]
        default_value: [f32; 4],
    },
    ColorSwitch {
        #[serde(default)]
        options: Vec<String>,
    },
    ImageConstant {
        image: Option<String>,
    },
    StaticString {
        value: String,
    },
    Surface {
        name: String,
    },
    Object {
        name: String,
        #[serde(default)]
        component: Option<String>,
        #[serde(default = "default_lods")]
        num_lods: u32,
    },
}

fn default_true() -> bool {
    true
}

fn default_white() -> [f32; 4] {
    [1.0; 4]
}

fn default_lods() -> u32 {
    1
}

impl NodeKind {
    /// Short name used in logs and reports
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::SkeletalMesh { .. } => "SkeletalMesh",
            NodeKind::StaticMesh { .. } => "StaticMesh",
            NodeKind::MeshMorph { .. } => "MeshMorph",
            NodeKind::MeshMorphStackDefinition { .. } => "MeshMorphStackDefinition",
            NodeKind::MeshMorphStackApplication => "MeshMorphStackApplication",
            NodeKind::MeshSwitch { .. } => "MeshSwitch",
            NodeKind::MeshVariation { .. } => "MeshVariation",
            NodeKind::MeshReshape { .. } => "MeshReshape",
            NodeKind::MeshParameter { .. } => "MeshParameter",
            NodeKind::Table { .. } => "Table",
            NodeKind::AnimationPose => "AnimationPose",
            NodeKind::MacroInstance { .. } => "MacroInstance",
            NodeKind::Tunnel => "Tunnel",
            NodeKind::Reroute => "Reroute",
            NodeKind::ScalarConstant { .. } => "ScalarConstant",
            NodeKind::ScalarParameter { .. } => "ScalarParameter",
            NodeKind::EnumParameter { .. } => "EnumParameter",
            NodeKind::ScalarSwitch { .. } => "ScalarSwitch",
            NodeKind::ColorConstant { .. } => "ColorConstant",
            NodeKind::ColorParameter { .. } => "ColorParameter",
            NodeKind::ColorSwitch { .. } => "ColorSwitch",
            NodeKind::ImageConstant { .. } => "ImageConstant",
            NodeKind::StaticString { .. } => "StaticString",
            NodeKind::Surface { .. } => "Surface",
            NodeKind::Object { .. } => "Object",
        }
    }

    /// Whether the node's output can change with the LOD being compiled
    ///
    /// Anything that reaches a mesh can; plain values and roots cannot.
    pub fn is_affected_by_lod(&self) -> bool {
        !matches!(
            self,
            NodeKind::ScalarConstant { .. }
                | NodeKind::ScalarParameter { .. }
                | NodeKind::EnumParameter { .. }
                | NodeKind::ColorConstant { .. }
                | NodeKind::ColorParameter { .. }
                | NodeKind::ImageConstant { .. }
                | NodeKind::StaticString { .. }
                | NodeKind::Object { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub name: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub pins: Vec<Pin>,
}

impl Node {
    pub fn find_pin(&self, name: &str, direction: PinDirection) -> Option<&Pin> {
        self.pins
            .iter()
            .find(|p| p.direction == direction && p.name == name)
    }

    pub fn input_pin(&self, name: &str) -> Option<&Pin> {
        self.find_pin(name, PinDirection::Input)
    }

    pub fn output_pin(&self, name: &str) -> Option<&Pin> {
        self.find_pin(name, PinDirection::Output)
    }

    pub fn input_pins(&self) -> impl Iterator<Item = &Pin> {
        self.pins
            .iter()
            .filter(|p| p.direction == PinDirection::Input)
    }

    /// Display label: name if set, else the node type
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            self.kind.type_name()
        } else {
            &self.name
        }
    }
}

/// A macro: a subgraph bounded by an input and an output tunnel node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroDefinition {
    pub name: String,
    pub input: NodeId,
    pub output: NodeId,
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Failed to parse the graph document
    #[error("invalid graph JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Two nodes share an id
    #[error("duplicate node id {0:?}")]
    DuplicateNode(NodeId),

    /// Two pins share an id
    #[error("duplicate pin id {0:?}")]
    DuplicatePin(PinId),

    /// An input pin links to a pin that does not exist
    #[error("pin {from:?} links to unknown pin {to:?}")]
    DanglingLink { from: PinId, to: PinId },

    /// A macro references a missing tunnel node
    #[error("macro '{0}' references a missing tunnel node")]
    MissingTunnel(String),
}

#[derive(Debug, Deserialize)]
struct GraphDocument {
    nodes: Vec<Node>,
    #[serde(default)]
    macros: Vec<MacroDefinition>,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    macros: Vec<MacroDefinition>,
    node_index: HashMap<NodeId, usize>,
    /// Pin -> (node position, pin position)
    pin_index: HashMap<PinId, (usize, usize)>,
}

impl Graph {
    pub fn new(nodes: Vec<Node>, macros: Vec<MacroDefinition>) -> Result<Self, GraphError> {
        let mut node_index = HashMap::with_capacity(nodes.len());
        let mut pin_index = HashMap::new();
        for (n, node) in nodes.iter().enumerate() {
            if node_index.insert(node.id, n).is_some() {
                return Err(GraphError::DuplicateNode(node.id));
            }
            for (p, pin) in node.pins.iter().enumerate() {
                if pin_index.insert(pin.id, (n, p)).is_some() {
                    return Err(GraphError::DuplicatePin(pin.id));
                }
            }
        }

        for node in &nodes {
            for pin in &node.pins {
                if let Some(&to) = pin.links.iter().find(|l| !pin_index.contains_key(*l)) {
                    return Err(GraphError::DanglingLink { from: pin.id, to });
                }
            }
        }

        for definition in &macros {
            if !node_index.contains_key(&definition.input)
                || !node_index.contains_key(&definition.output)
            {
                return Err(GraphError::MissingTunnel(definition.name.clone()));
            }
        }

        Ok(Self {
            nodes,
            macros,
            node_index,
            pin_index,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, GraphError> {
        let document: GraphDocument = serde_json::from_str(text)?;
        Self::new(document.nodes, document.macros)
    }

    /// Graph embedded in a larger JSON document
    pub fn from_value(value: serde_json::Value) -> Result<Self, GraphError> {
        let document: GraphDocument = serde_json::from_value(value)?;
        Self::new(document.nodes, document.macros)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.node_index.get(&id).map(|&n| &self.nodes[n])
    }

    pub fn pin(&self, id: PinId) -> Option<&Pin> {
        self.pin_index
            .get(&id)
            .map(|&(n, p)| &self.nodes[n].pins[p])
    }

    /// Node owning a pin
    pub fn node_of(&self, pin: PinId) -> Option<&Node> {
        self.pin_index.get(&pin).map(|&(n, _)| &self.nodes[n])
    }

    pub fn connection_count(&self, pin: PinId) -> usize {
        self.pin(pin).map_or(0, |p| p.links.len())
    }

    /// Output pin connected to an input pin, looking through reroute nodes
    ///
    /// With several connections the first one wins; callers that need an
    /// exact arity check [`Graph::connection_count`] first.
    pub fn follow_input_pin(&self, pin: PinId) -> Option<PinId> {
        let mut current = pin;
        // Bounded so a loop of reroutes cannot hang the compiler
        for _ in 0..=self.nodes.len() {
            let linked = *self.pin(current)?.links.first()?;
            let node = self.node_of(linked)?;
            if !matches!(node.kind, NodeKind::Reroute) {
                return Some(linked);
            }
            current = node.input_pins().next()?.id;
        }
        None
    }

    /// All output pins connected to an input pin, reroutes resolved
    pub fn follow_input_pin_all(&self, pin: PinId) -> Vec<PinId> {
        let Some(p) = self.pin(pin) else {
            return Vec::new();
        };
        p.links
            .iter()
            .filter_map(|&linked| match self.node_of(linked) {
                Some(node) if matches!(node.kind, NodeKind::Reroute) => node
                    .input_pins()
                    .next()
                    .and_then(|input| self.follow_input_pin(input.id)),
                Some(_) => Some(linked),
                None => None,
            })
            .collect()
    }

    pub fn find_macro(&self, name: &str) -> Option<&MacroDefinition> {
        self.macros.iter().find(|m| m.name == name)
    }

    /// Object nodes, the compilation roots
    pub fn objects(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Object { .. }))
    }
}

#[cfg(test)]
pub(crate) mod test_graph {
    //! Small builder for graphs in unit tests

    use super::*;

    #[derive(Default)]
    pub struct GraphBuilder {
        nodes: Vec<Node>,
        macros: Vec<MacroDefinition>,
        next_id: u32,
    }

    impl GraphBuilder {
        pub fn new() -> Self {
            Self {
                next_id: 1,
                ..Self::default()
            }
        }

        pub fn node(&mut self, name: &str, kind: NodeKind) -> NodeId {
            let id = NodeId(self.next_id);
            self.next_id += 1;
            self.nodes.push(Node {
                id,
                name: name.to_string(),
                kind,
                pins: Vec::new(),
            });
            id
        }

        pub fn pin(
            &mut self,
            node: NodeId,
            name: &str,
            direction: PinDirection,
            category: PinCategory,
        ) -> PinId {
            let id = PinId(self.next_id);
            self.next_id += 1;
            let node = self
                .nodes
                .iter_mut()
                .find(|n| n.id == node)
                .expect("node exists");
            node.pins.push(Pin {
                id,
                name: name.to_string(),
                direction,
                category,
                links: Vec::new(),
            });
            id
        }

        pub fn input(&mut self, node: NodeId, name: &str, category: PinCategory) -> PinId {
            self.pin(node, name, PinDirection::Input, category)
        }

        pub fn output(&mut self, node: NodeId, name: &str, category: PinCategory) -> PinId {
            self.pin(node, name, PinDirection::Output, category)
        }

        pub fn link(&mut self, from_output: PinId, to_input: PinId) {
            for node in &mut self.nodes {
                if let Some(pin) = node.pins.iter_mut().find(|p| p.id == to_input) {
                    pin.links.push(from_output);
                }
            }
        }

        pub fn set_kind(&mut self, node: NodeId, kind: NodeKind) {
            if let Some(n) = self.nodes.iter_mut().find(|n| n.id == node) {
                n.kind = kind;
            }
        }

        pub fn add_macro(&mut self, name: &str, input: NodeId, output: NodeId) {
            self.macros.push(MacroDefinition {
                name: name.to_string(),
                input,
                output,
            });
        }

        pub fn build(self) -> Graph {
            Graph::new(self.nodes, self.macros).expect("valid test graph")
        }
    }
}
