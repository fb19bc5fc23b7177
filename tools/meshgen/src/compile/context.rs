//! Generation context
//!
//! Everything one compilation pass threads through the translators: the
//! converter's [`CompilationContext`], the graph and assets being compiled,
//! the LOD/component being generated, the scoped stacks and the caches.

use super::cache::{
    CycleGuard, CycleKey, GeneratedKey, GeneratedNode, MeshCacheKey, MorphKey, SharedStack,
    Translator,
};
use super::nodes::NodeScalar;
use super::tables::{RuntimeTable, SharedTable};
use crate::assets::{AssetLibrary, DataTable};
use crate::config::{AutoLodStrategy, CompilerOptions};
use crate::convert::{CompilationContext, MeshConversionFlags};
use crate::dedup::add_unique;
use crate::diagnostics::{Diagnostics, Severity};
use crate::graph::{Graph, Node, NodeId, PinId};
use crate::services::{ImageService, TableService};
use hashbrown::{HashMap, HashSet};
use meshgen_common::RuntimeMesh;
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;

/// Morph pushed by a morph node onto the meshes generated below it
#[derive(Debug, Clone)]
pub struct MorphEntry {
    pub node: NodeId,
    pub morph_name: String,
    pub factor: Option<Rc<NodeScalar>>,
    /// Mesh pin the morph was pushed from
    pub mesh_pin: PinId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParameterKind {
    Scalar,
    Enum,
    Color,
    Mesh,
    Table,
}

/// Runtime parameter exposed by the compiled graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterInfo {
    pub name: String,
    pub kind: ParameterKind,
}

pub struct GenerationContext<'a> {
    pub compilation: CompilationContext,
    pub graph: &'a Graph,
    pub assets: &'a AssetLibrary,
    pub tables: &'a dyn TableService,
    pub images: &'a dyn ImageService,
    pub diagnostics: Diagnostics,

    /// LOD being generated
    pub current_lod: u32,
    /// First LOD of the object; automatic LODs count from here
    pub first_lod: u32,
    pub current_component: Option<String>,

    pub(super) macro_stack: SharedStack<NodeId>,
    pub(super) mesh_flags: SharedStack<MeshConversionFlags>,
    pub(super) morph_stack: SharedStack<MorphEntry>,
    visiting: Rc<RefCell<HashSet<CycleKey>>>,

    generated: HashMap<GeneratedKey, GeneratedNode>,
    generated_meshes: HashMap<MeshCacheKey, Rc<RuntimeMesh>>,
    generated_tables: HashMap<String, SharedTable>,

    /// Animation instances referenced by tags, in first-use order
    pub anim_instances: Vec<String>,
    pub sockets: Vec<String>,
    /// Asset user data attached as streamed resources
    pub streamed_user_data: Vec<String>,
    pub parameters: Vec<ParameterInfo>,
}

impl<'a> GenerationContext<'a> {
    pub fn new(
        graph: &'a Graph,
        assets: &'a AssetLibrary,
        tables: &'a dyn TableService,
        images: &'a dyn ImageService,
        options: CompilerOptions,
    ) -> Self {
        Self {
            compilation: CompilationContext::new(options),
            graph,
            assets,
            tables,
            images,
            diagnostics: Diagnostics::new(),
            current_lod: 0,
            first_lod: 0,
            current_component: None,
            macro_stack: Rc::new(RefCell::new(Vec::new())),
            mesh_flags: Rc::new(RefCell::new(Vec::new())),
            morph_stack: Rc::new(RefCell::new(Vec::new())),
            visiting: Rc::new(RefCell::new(HashSet::new())),
            generated: HashMap::new(),
            generated_meshes: HashMap::new(),
            generated_tables: HashMap::new(),
            anim_instances: Vec::new(),
            sockets: Vec::new(),
            streamed_user_data: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.compilation.options
    }

    pub fn auto_lod_strategy(&self) -> AutoLodStrategy {
        self.compilation.options.auto_lod_strategy
    }

    pub fn error(&mut self, message: impl Into<String>, node: NodeId) {
        self.diagnostics.log(message, Some(node), Severity::Error);
    }

    pub fn warn(&mut self, message: impl Into<String>, node: NodeId) {
        self.diagnostics.log(message, Some(node), Severity::Warning);
    }

    /// Flags on top of the mesh-flags stack, empty when nothing was pushed
    pub fn current_flags(&self) -> MeshConversionFlags {
        self.mesh_flags.borrow().last().copied().unwrap_or_default()
    }

    pub fn macro_depth(&self) -> usize {
        self.macro_stack.borrow().len()
    }

    pub fn morph_depth(&self) -> usize {
        self.morph_stack.borrow().len()
    }

    /// Start evaluating `pin`; `None` (and an error) when it is already
    /// being evaluated in the same macro context
    pub(super) fn enter(&mut self, pin: PinId, translator: Translator, node: NodeId) -> Option<CycleGuard> {
        let key = CycleKey {
            pin,
            translator,
            macro_context: self.macro_stack.borrow().last().copied(),
        };
        let guard = CycleGuard::enter(&self.visiting, key);
        if guard.is_none() {
            self.error("Cycle detected.", node);
        }
        guard
    }

    pub(super) fn generated_key(
        &self,
        translator: Translator,
        pin: PinId,
        node: &Node,
        only_connected_lod: bool,
    ) -> GeneratedKey {
        let uses_mesh_state = matches!(translator, Translator::Mesh | Translator::Object);
        GeneratedKey {
            translator,
            pin,
            lod: if node.kind.is_affected_by_lod() {
                self.current_lod
            } else {
                0
            },
            macro_context: self.macro_stack.borrow().clone(),
            flags: if uses_mesh_state {
                self.current_flags()
            } else {
                MeshConversionFlags::empty()
            },
            morph_stack: if uses_mesh_state {
                self.morph_stack
                    .borrow()
                    .iter()
                    .map(|m| MorphKey {
                        node: m.node,
                        morph_name: m.morph_name.clone(),
                    })
                    .collect()
            } else {
                Vec::new()
            },
            only_connected_lod: uses_mesh_state && only_connected_lod,
            component: self.current_component.clone(),
        }
    }

    pub(super) fn cached(&self, key: &GeneratedKey) -> Option<GeneratedNode> {
        self.generated.get(key).cloned()
    }

    pub(super) fn store(&mut self, key: GeneratedKey, value: GeneratedNode) {
        self.generated.insert(key, value);
    }

    pub(super) fn cached_mesh(&self, key: &MeshCacheKey) -> Option<Rc<RuntimeMesh>> {
        self.generated_meshes.get(key).cloned()
    }

    pub(super) fn store_mesh(&mut self, key: MeshCacheKey, mesh: Rc<RuntimeMesh>) {
        self.generated_meshes.insert(key, mesh);
    }

    /// Number of distinct converted sections so far
    pub fn converted_mesh_count(&self) -> usize {
        self.generated_meshes.len()
    }

    /// Runtime table for a data table, created on first use
    pub(super) fn runtime_table(&mut self, table: &DataTable) -> SharedTable {
        self.generated_tables
            .entry(table.name.clone())
            .or_insert_with(|| Rc::new(RefCell::new(RuntimeTable::new(table))))
            .clone()
    }

    pub fn register_parameter(&mut self, name: &str, kind: ParameterKind) {
        if !self.parameters.iter().any(|p| p.name == name) {
            self.parameters.push(ParameterInfo {
                name: name.to_string(),
                kind,
            });
        }
    }

    pub fn anim_instance_index(&mut self, name: &str) -> usize {
        add_unique(&mut self.anim_instances, name.to_string())
    }

    pub fn socket_index(&mut self, name: &str) -> usize {
        add_unique(&mut self.sockets, name.to_string())
    }

    pub fn user_data_index(&mut self, name: &str) -> usize {
        add_unique(&mut self.streamed_user_data, name.to_string())
    }
}
