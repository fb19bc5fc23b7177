//! Surface and object translators
//!
//! An object is the compile root: it generates its surfaces once per LOD,
//! with the LOD and component set on the context so the source meshes
//! below pick the right sections and bone removal.

use super::cache::{GeneratedNode, Translator};
use super::color::generate_color;
use super::context::GenerationContext;
use super::image::generate_image;
use super::macros::{through_macro_instance, through_tunnel};
use super::mesh::generate_mesh;
use super::nodes::{NodeLod, NodeObject, NodeSurface};
use super::scalar::generate_scalar;
use crate::convert::{MeshSource, MorphSelection, SurfaceMetadata};
use crate::graph::{NodeKind, PinCategory, PinId, pin_names};
use std::rc::Rc;
use tracing::debug;

/// Conversion settings shared by every mesh of one surface
fn surface_mesh_source(ctx: &GenerationContext, name: &str) -> MeshSource {
    let options = ctx.options();
    let real_time_morphs = if options.real_time_morphs.is_empty() {
        MorphSelection::All
    } else {
        MorphSelection::Named(options.real_time_morphs.clone())
    };
    MeshSource {
        component: ctx.current_component.clone(),
        real_time_morphs,
        metadata: SurfaceMetadata {
            material_slot: name.to_string(),
            cast_shadow: true,
        },
        ..Default::default()
    }
}

pub fn generate_surface(ctx: &mut GenerationContext, pin: PinId) -> Option<Rc<NodeSurface>> {
    let graph = ctx.graph;
    let node = graph.node_of(pin)?;
    let key = ctx.generated_key(Translator::Surface, pin, node, false);
    if let Some(GeneratedNode::Surface(result)) = ctx.cached(&key) {
        return result;
    }
    let _guard = ctx.enter(pin, Translator::Surface, node.id)?;

    let name = match &node.kind {
        NodeKind::Surface { name } => name,
        NodeKind::MacroInstance { macro_name } => {
            return through_macro_instance(ctx, node, macro_name, pin, generate_surface);
        }
        NodeKind::Tunnel => return through_tunnel(ctx, node, pin, generate_surface),
        _ => {
            ctx.warn("Node type not implemented yet.", node.id);
            ctx.store(key, GeneratedNode::Surface(None));
            return None;
        }
    };

    let base = surface_mesh_source(ctx, name);
    let mut surface = NodeSurface {
        name: name.clone(),
        mesh: None,
        images: Vec::new(),
        colors: Vec::new(),
        scalars: Vec::new(),
    };

    for input in node.input_pins() {
        let Some(linked) = graph.follow_input_pin(input.id) else {
            continue;
        };
        match input.category {
            PinCategory::Mesh if input.name == pin_names::MESH => {
                surface.mesh = generate_mesh(ctx, linked, &base, false);
                if surface.mesh.is_none() {
                    ctx.warn("Mesh generation failed.", node.id);
                }
            }
            PinCategory::Image => {
                if let Some(image) = generate_image(ctx, linked) {
                    surface.images.push((input.name.clone(), image));
                }
            }
            PinCategory::Color => {
                if let Some(color) = generate_color(ctx, linked) {
                    surface.colors.push((input.name.clone(), color));
                }
            }
            PinCategory::Scalar => {
                if let Some(scalar) = generate_scalar(ctx, linked) {
                    surface.scalars.push((input.name.clone(), scalar));
                }
            }
            _ => debug!("Surface [{}] ignores input pin [{}]", name, input.name),
        }
    }

    let result = Some(Rc::new(surface));
    ctx.store(key, GeneratedNode::Surface(result.clone()));
    result
}

/// Generate an object node's surfaces for every LOD
///
/// A pin named `LOD {n}` supplies the surfaces of LOD n; without one every
/// surface input is used for all LODs.
pub fn generate_object(ctx: &mut GenerationContext, pin: PinId) -> Option<Rc<NodeObject>> {
    let graph = ctx.graph;
    let node = graph.node_of(pin)?;
    let NodeKind::Object {
        name,
        component,
        num_lods,
    } = &node.kind
    else {
        ctx.warn("Node type not implemented yet.", node.id);
        return None;
    };

    let previous_component = std::mem::replace(&mut ctx.current_component, component.clone());
    let previous_lod = (ctx.current_lod, ctx.first_lod);
    let key = ctx.generated_key(Translator::Object, pin, node, false);
    if let Some(GeneratedNode::Object(result)) = ctx.cached(&key) {
        ctx.current_component = previous_component;
        return result;
    }
    let Some(guard) = ctx.enter(pin, Translator::Object, node.id) else {
        ctx.current_component = previous_component;
        return None;
    };

    ctx.first_lod = 0;
    let mut lods = Vec::with_capacity(*num_lods as usize);
    for lod in 0..*num_lods {
        ctx.current_lod = lod;
        let lod_pin = node.input_pin(&format!("LOD {lod}"));
        let inputs: Vec<PinId> = match lod_pin {
            Some(p) => vec![p.id],
            None => node
                .input_pins()
                .filter(|p| p.category == PinCategory::Surface)
                .map(|p| p.id)
                .collect(),
        };

        let mut surfaces = Vec::new();
        for input in inputs {
            for linked in graph.follow_input_pin_all(input) {
                if let Some(surface) = generate_surface(ctx, linked) {
                    surfaces.push(surface);
                }
            }
        }
        debug!("Object [{}] LOD {} has {} surfaces", name, lod, surfaces.len());
        lods.push(NodeLod { surfaces });
    }

    drop(guard);
    (ctx.current_lod, ctx.first_lod) = previous_lod;
    ctx.current_component = previous_component;

    let result = Some(Rc::new(NodeObject {
        name: name.clone(),
        component: component.clone(),
        lods,
    }));
    ctx.store(key, GeneratedNode::Object(result.clone()));
    result
}
