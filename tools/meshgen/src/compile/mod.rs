//! Graph compiler
//!
//! Walks the authoring graph from each object node and translates it into
//! the runtime node graph in [`nodes`]. Translators are plain recursive
//! functions over a shared [`GenerationContext`]:
//!
//! - results are memoized per [`cache::GeneratedKey`], failures included
//! - a pin re-entered while being evaluated is reported as a cycle
//! - macro instances and tunnels are resolved through a macro stack
//! - a translator that cannot produce its node logs one diagnostic and
//!   returns `None`, so sibling branches still compile

mod cache;
mod color;
mod context;
mod image;
mod macros;
mod mesh;
pub mod nodes;
mod scalar;
mod surface;
mod tables;

pub use cache::{GeneratedKey, MeshCacheKey, Translator};
pub use color::generate_color;
pub use context::{GenerationContext, MorphEntry, ParameterInfo, ParameterKind};
pub use self::image::generate_image;
pub use mesh::{animation_instance_tag, gameplay_tag, generate_mesh, socket_tag};
pub use scalar::generate_scalar;
pub use surface::{generate_object, generate_surface};
pub use tables::{RuntimeColumn, RuntimeTable, SharedTable, TableCell};

use crate::assets::AssetLibrary;
use crate::config::CompilerOptions;
use crate::convert::CompilationContext;
use crate::diagnostics::Diagnostics;
use crate::graph::{Graph, pin_names};
use crate::services::{ImageService, TableService};
use nodes::NodeObject;
use std::rc::Rc;
use tracing::info;

/// Everything one compilation pass produced
#[derive(Debug)]
pub struct CompiledGraph {
    pub objects: Vec<Rc<NodeObject>>,
    pub compilation: CompilationContext,
    pub diagnostics: Diagnostics,
    pub parameters: Vec<ParameterInfo>,
    pub anim_instances: Vec<String>,
    pub sockets: Vec<String>,
    pub streamed_user_data: Vec<String>,
    /// Distinct source sections converted
    pub converted_meshes: usize,
}

/// Compile every object node of `graph`
///
/// Never fails: problems are collected in the returned diagnostics and the
/// affected branches are left out.
pub fn compile_graph(
    graph: &Graph,
    assets: &AssetLibrary,
    tables: &dyn TableService,
    images: &dyn ImageService,
    options: CompilerOptions,
) -> CompiledGraph {
    let mut ctx = GenerationContext::new(graph, assets, tables, images, options);

    for component in &assets.components {
        if let Err(e) = ctx.compilation.register_component(component, assets) {
            ctx.diagnostics.log(e.to_string(), None, e.severity());
        }
    }

    let mut objects = Vec::new();
    for node in graph.objects() {
        let Some(pin) = node.output_pin(pin_names::OBJECT) else {
            ctx.warn("Object node has no Object output pin.", node.id);
            continue;
        };
        if let Some(object) = generate_object(&mut ctx, pin.id) {
            objects.push(object);
        }
    }

    info!(
        "Compiled {} objects, {} converted meshes, {} diagnostics",
        objects.len(),
        ctx.converted_mesh_count(),
        ctx.diagnostics.len()
    );

    CompiledGraph {
        objects,
        converted_meshes: ctx.converted_mesh_count(),
        compilation: ctx.compilation,
        diagnostics: ctx.diagnostics,
        parameters: ctx.parameters,
        anim_instances: ctx.anim_instances,
        sockets: ctx.sockets,
        streamed_user_data: ctx.streamed_user_data,
    }
}
