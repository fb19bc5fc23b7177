//! Mesh translator
//!
//! Source mesh nodes convert their bound section through the mesh cache;
//! every other mesh node wraps the meshes generated below it. Morph nodes
//! do not emit anything themselves: they push a [`MorphEntry`] and the
//! skeletal meshes generated underneath wrap themselves in the morphs on
//! the stack.

use super::cache::{GeneratedNode, MeshCacheKey, ScopedPush, Translator};
use super::context::{GenerationContext, MorphEntry, ParameterKind};
use super::macros::{find_source_through_macros, through_macro_instance, through_tunnel};
use super::nodes::{MeshReshape, MeshVariation, NodeMesh, NodeScalar};
use super::scalar::{generate_scalar, generate_switch_parameter, switch_options};
use super::tables::{generate_mesh_table, row_values};
use crate::assets::{PhysicsAsset, SkeletalMeshAsset, StaticMeshAsset, TableValue};
use crate::config::AutoLodStrategy;
use crate::convert::{
    MeshConversionFlags, MeshSource, convert_skeletal_mesh, convert_static_mesh, mesh_source_id,
};
use crate::dedup::add_unique;
use crate::graph::{BoneDeformSelection, ColorChannelUsage, Node, NodeId, NodeKind, PinId, SectionPin, pin_names};
use meshgen_common::{RuntimeMesh, StreamedResourceId, StreamedResourceKind};
use std::rc::Rc;
use tracing::debug;

/// Tag binding a mesh to an animation instance slot
pub fn animation_instance_tag(index: usize, slot: &str) -> String {
    format!("__AnimBP:{slot}_Slot_{index}")
}

pub fn gameplay_tag(tag: &str) -> String {
    format!("__AnimBPTag:{tag}")
}

pub fn socket_tag(index: usize) -> String {
    format!("__Socket:{index}")
}

/// LOD and section an output pin of a source mesh node is bound to
fn section_of_pin(sections: &[SectionPin], pin: PinId) -> (u32, u32) {
    sections
        .iter()
        .find(|s| s.pin == pin)
        .map_or((0, 0), |s| (s.lod, s.section))
}

/// Generate the mesh produced at `pin`
///
/// `base` carries the per-surface conversion settings down to the source
/// mesh nodes. With `only_connected_lod` automatic LODs are not applied.
pub fn generate_mesh(
    ctx: &mut GenerationContext,
    pin: PinId,
    base: &MeshSource,
    only_connected_lod: bool,
) -> Option<Rc<NodeMesh>> {
    let graph = ctx.graph;
    let node = graph.node_of(pin)?;
    let key = ctx.generated_key(Translator::Mesh, pin, node, only_connected_lod);
    if let Some(GeneratedNode::Mesh(result)) = ctx.cached(&key) {
        return result;
    }
    let _guard = ctx.enter(pin, Translator::Mesh, node.id)?;

    let result = match &node.kind {
        NodeKind::SkeletalMesh { .. } => skeletal_mesh_node(ctx, node, pin, base, only_connected_lod),
        NodeKind::StaticMesh { mesh, sections } => static_mesh_node(ctx, node, pin, mesh.as_deref(), sections),
        NodeKind::MeshMorph { morph_name } => {
            morph_node(ctx, node, morph_name, base, only_connected_lod)
        }
        NodeKind::MeshMorphStackApplication => {
            morph_stack_application(ctx, node, base, only_connected_lod)
        }
        NodeKind::MeshSwitch { options } => {
            generate_switch_parameter(ctx, node, options.len()).map(|parameter| {
                let options = switch_options(ctx, node, options, |ctx, linked| {
                    generate_mesh(ctx, linked, base, only_connected_lod)
                });
                Rc::new(NodeMesh::Switch { parameter, options })
            })
        }
        NodeKind::MeshVariation { variations } => {
            variation_node(ctx, node, variations, base, only_connected_lod)
        }
        NodeKind::MeshReshape { .. } => reshape_node(ctx, node, base, only_connected_lod),
        NodeKind::MeshParameter { name, default } => {
            ctx.register_parameter(name, ParameterKind::Mesh);
            Some(Rc::new(NodeMesh::Parameter {
                name: name.clone(),
                default: default.clone(),
            }))
        }
        NodeKind::Table { .. } => generate_mesh_table(ctx, node, pin, base, only_connected_lod),
        NodeKind::AnimationPose => node
            .input_pin(pin_names::MESH)
            .and_then(|input| graph.follow_input_pin(input.id))
            .and_then(|linked| generate_mesh(ctx, linked, base, only_connected_lod)),
        NodeKind::MacroInstance { macro_name } => {
            return through_macro_instance(ctx, node, macro_name, pin, |ctx, linked| {
                generate_mesh(ctx, linked, base, only_connected_lod)
            });
        }
        NodeKind::Tunnel => {
            return through_tunnel(ctx, node, pin, |ctx, linked| {
                generate_mesh(ctx, linked, base, only_connected_lod)
            });
        }
        _ => {
            ctx.warn("Mesh node type not implemented yet.", node.id);
            None
        }
    };

    ctx.store(key, GeneratedNode::Mesh(result.clone()));
    result
}

/// Child mesh at the input pin `name`, a failure reported on `node`
fn generate_input_mesh(
    ctx: &mut GenerationContext,
    node: &Node,
    name: &str,
    base: &MeshSource,
    only_connected_lod: bool,
) -> Option<Rc<NodeMesh>> {
    let graph = ctx.graph;
    let linked = node
        .input_pin(name)
        .and_then(|input| graph.follow_input_pin(input.id))?;
    let mesh = generate_mesh(ctx, linked, base, only_connected_lod);
    if mesh.is_none() {
        ctx.warn("Mesh generation failed.", node.id);
    }
    mesh
}

// ============================================================================
// Source Meshes
// ============================================================================

/// Section of `asset` to convert while generating the current LOD
///
/// With automatic LODs, LOD n of the object uses the asset's LOD
/// `connected + (n - first)` and the section there with the connected
/// section's material. `None` when that LOD or material does not exist.
pub(super) fn lod_and_section_for_automatic_lods(
    ctx: &mut GenerationContext,
    node: &Node,
    asset: &SkeletalMeshAsset,
    connected: (u32, u32),
    only_connected_lod: bool,
) -> Option<(u32, u32)> {
    if ctx.auto_lod_strategy() != AutoLodStrategy::AutomaticFromMesh
        || only_connected_lod
        || ctx.current_lod == ctx.first_lod
    {
        return Some(connected);
    }
    let Some(connected_section) = asset.section(connected.0 as usize, connected.1 as usize) else {
        return Some(connected);
    };

    let lod = connected.0 + ctx.current_lod.saturating_sub(ctx.first_lod);
    let sections = &asset.lods.get(lod as usize)?.sections;
    let mut found = None;
    for (index, section) in sections.iter().enumerate() {
        if section.material_index != connected_section.material_index {
            continue;
        }
        if found.is_none() {
            found = Some((lod, index as u32));
        } else {
            ctx.warn(
                format!(
                    "Mesh {} contains multiple sections with the same Material Index",
                    asset.name
                ),
                node.id,
            );
        }
    }
    found
}

/// Converted section of a skeletal mesh, shared through the mesh cache
///
/// `target` is the section picked for the current LOD; `None` yields an
/// empty mesh. Conversion errors are reported on `node`.
pub(super) fn generate_skeletal_mesh(
    ctx: &mut GenerationContext,
    node: NodeId,
    source: &MeshSource,
    target: Option<(u32, u32)>,
    connected: (u32, u32),
    unique_tags: &str,
) -> Option<Rc<RuntimeMesh>> {
    let flags = ctx.current_flags();
    let key = MeshCacheKey {
        mesh: source.mesh.clone(),
        lod: target.map(|t| t.0),
        current_lod: ctx.current_lod,
        section: target.map(|t| t.1),
        flags,
        unique_tags: unique_tags.to_string(),
        node,
    };
    if let Some(mesh) = ctx.cached_mesh(&key) {
        return Some(mesh);
    }

    let Some((lod, section)) = target else {
        debug!(
            "No section of [{}] matches LOD {}, using an empty mesh",
            source.mesh, ctx.current_lod
        );
        let empty = Rc::new(RuntimeMesh::new());
        ctx.store_mesh(key, Rc::clone(&empty));
        return Some(empty);
    };

    let mut source = source.clone();
    source.lod = lod;
    source.section = section;
    source.flags = flags;
    source.mesh_must_exist = ctx.auto_lod_strategy() != AutoLodStrategy::AutomaticFromMesh
        || (lod, section) == connected;
    if source.component.is_none() {
        source.component = ctx.current_component.clone();
    }

    let assets = ctx.assets;
    match convert_skeletal_mesh(&mut ctx.compilation, assets, &source, None) {
        Ok(mesh) => {
            let mesh = Rc::new(mesh);
            ctx.store_mesh(key, Rc::clone(&mesh));
            Some(mesh)
        }
        Err(e) => {
            ctx.diagnostics.log(e.to_string(), Some(node), e.severity());
            None
        }
    }
}

/// Converted section of a static mesh, shared through the mesh cache
pub(super) fn generate_static_mesh(
    ctx: &mut GenerationContext,
    node: NodeId,
    asset: &StaticMeshAsset,
    lod: u32,
    section: u32,
) -> Option<Rc<RuntimeMesh>> {
    let key = MeshCacheKey {
        mesh: asset.name.clone(),
        lod: Some(lod),
        current_lod: ctx.current_lod,
        section: Some(section),
        flags: ctx.current_flags(),
        unique_tags: String::new(),
        node,
    };
    if let Some(mesh) = ctx.cached_mesh(&key) {
        return Some(mesh);
    }

    match convert_static_mesh(asset, lod as usize, section as usize) {
        Ok(mesh) => {
            let mesh = Rc::new(mesh);
            ctx.store_mesh(key, Rc::clone(&mesh));
            Some(mesh)
        }
        Err(e) => {
            ctx.diagnostics.log(e.to_string(), Some(node), e.severity());
            None
        }
    }
}

fn skeletal_mesh_node(
    ctx: &mut GenerationContext,
    node: &Node,
    pin: PinId,
    base: &MeshSource,
    only_connected_lod: bool,
) -> Option<Rc<NodeMesh>> {
    let assets = ctx.assets;
    let NodeKind::SkeletalMesh {
        mesh,
        sections,
        anim_instance,
        anim_slot,
        gameplay_tags,
    } = &node.kind
    else {
        return None;
    };

    let Some(mesh_name) = mesh else {
        ctx.warn("No Skeletal Mesh set in the SkeletalMesh node.", node.id);
        return Some(Rc::new(NodeMesh::empty()));
    };
    let Some(asset) = assets.skeletal_mesh(mesh_name) else {
        ctx.warn(
            format!("Failed to load the skeletal mesh set in the node.[Asset path: {mesh_name}]"),
            node.id,
        );
        return Some(Rc::new(NodeMesh::empty()));
    };

    let connected = section_of_pin(sections, pin);
    let target = lod_and_section_for_automatic_lods(ctx, node, asset, connected, only_connected_lod);

    // Tags and user data make the converted mesh distinct from the same
    // section used elsewhere, so they are part of the cache key
    let mut unique_tags = String::new();
    let mut tags = Vec::new();
    if let Some(anim_instance) = anim_instance {
        let index = ctx.anim_instance_index(anim_instance);
        tags.push(animation_instance_tag(index, anim_slot.as_deref().unwrap_or_default()));
    }
    tags.extend(gameplay_tags.iter().map(|t| gameplay_tag(t)));
    for tag in &tags {
        unique_tags.push_str(tag);
    }

    let mut streamed = Vec::new();
    for data in &asset.asset_user_data {
        let index = ctx.user_data_index(data);
        streamed.push(StreamedResourceId::new(
            StreamedResourceKind::AssetUserData,
            index as u32,
        ));
        unique_tags.push_str(data);
    }

    let mut source = base.clone();
    source.mesh = asset.name.clone();
    source.anim_instance = anim_instance.clone();

    let converted = generate_skeletal_mesh(ctx, node.id, &source, target, connected, &unique_tags);
    let converted = match converted {
        Some(cached) => {
            let mut mesh = (*cached).clone();
            for tag in tags {
                mesh.add_tag_unique(tag);
            }
            for id in streamed {
                mesh.add_streamed_resource(id);
            }
            for socket in &asset.sockets {
                let index = ctx.socket_index(socket);
                mesh.add_tag_unique(socket_tag(index));
            }
            Some(Rc::new(mesh))
        }
        None => None,
    };

    let layout_lod = match ctx.auto_lod_strategy() {
        AutoLodStrategy::AutomaticFromMesh => Some(connected.0),
        AutoLodStrategy::Manual => target.map(|t| t.0),
    };
    let num_layouts = layout_lod
        .and_then(|lod| asset.lods.get(lod as usize))
        .map_or(0, |lod| lod.num_texcoords);

    let result = Rc::new(NodeMesh::Constant {
        mesh: converted,
        source_id: mesh_source_id(&asset.name),
        num_layouts,
    });
    if ctx.morph_depth() > 0 {
        return Some(generate_morph_mesh(ctx, pin, result, only_connected_lod));
    }
    Some(result)
}

fn static_mesh_node(
    ctx: &mut GenerationContext,
    node: &Node,
    pin: PinId,
    mesh: Option<&str>,
    sections: &[SectionPin],
) -> Option<Rc<NodeMesh>> {
    let assets = ctx.assets;
    let Some(name) = mesh else {
        ctx.warn(
            format!("The StaticMesh node {} has no static mesh assigned", node.label()),
            node.id,
        );
        return None;
    };
    let Some(asset) = assets.static_mesh(name) else {
        ctx.warn(
            format!("Failed to load the static mesh set in the node.[Asset path: {name}]"),
            node.id,
        );
        return None;
    };
    if asset.lods.is_empty() {
        ctx.warn(
            format!(
                "The StaticMesh node {} has a static mesh assigned with no render data",
                node.label()
            ),
            node.id,
        );
        return None;
    }

    let (lod, section) = section_of_pin(sections, pin);
    let converted = generate_static_mesh(ctx, node.id, asset, lod, section)?;
    Some(Rc::new(NodeMesh::Constant {
        mesh: Some(converted),
        source_id: mesh_source_id(name),
        num_layouts: 1,
    }))
}

// ============================================================================
// Morphs
// ============================================================================

/// Wrap `source` in the morphs on the stack, outermost entry first
fn generate_morph_mesh(
    ctx: &mut GenerationContext,
    pin: PinId,
    source: Rc<NodeMesh>,
    only_connected_lod: bool,
) -> Rc<NodeMesh> {
    let entries: Vec<MorphEntry> = ctx.morph_stack.borrow().clone();
    let source_id = match source.as_ref() {
        NodeMesh::Constant { source_id, .. } => *source_id,
        _ => 0,
    };

    let mut result = Rc::clone(&source);
    for entry in entries.iter().rev() {
        let morph = build_morphed_mesh(ctx, pin, &entry.morph_name, only_connected_lod).map(|target| {
            Rc::new(NodeMesh::MakeMorph {
                base: Rc::clone(&source),
                target: Rc::new(NodeMesh::Constant {
                    mesh: Some(target),
                    source_id,
                    num_layouts: 0,
                }),
            })
        });
        if morph.is_none() {
            ctx.warn("Failed to generate morph target.", entry.node);
        }
        result = Rc::new(NodeMesh::Morph {
            base: Some(result),
            factor: entry.factor.clone(),
            morph,
        });
    }
    result
}

/// Section behind a skeletal mesh pin, marked as referencing `morph_name`
fn build_morphed_mesh(
    ctx: &mut GenerationContext,
    pin: PinId,
    morph_name: &str,
    only_connected_lod: bool,
) -> Option<Rc<RuntimeMesh>> {
    let graph = ctx.graph;
    let assets = ctx.assets;
    let node = graph.node_of(pin)?;
    let NodeKind::SkeletalMesh {
        mesh: Some(name),
        sections,
        ..
    } = &node.kind
    else {
        return None;
    };
    let asset = assets.skeletal_mesh(name)?;

    let connected = section_of_pin(sections, pin);
    let target = lod_and_section_for_automatic_lods(ctx, node, asset, connected, only_connected_lod);
    let source = MeshSource {
        mesh: asset.name.clone(),
        ..Default::default()
    };
    let base = generate_skeletal_mesh(ctx, node.id, &source, target, connected, "")?;

    let mut morphed = (*base).clone();
    morphed.set_referenced_morph(morph_name);
    Some(Rc::new(morphed))
}

/// Factor scalar of a morph, `None` when its source can leave [-1, 1]
fn generate_morph_factor(
    ctx: &mut GenerationContext,
    node: &Node,
    factor_pin: PinId,
) -> Option<Rc<NodeScalar>> {
    let graph = ctx.graph;
    let linked = graph.follow_input_pin(factor_pin)?;
    let out_of_range = |v: f32| !(-1.0..=1.0).contains(&v);
    let prefix = "Mesh morph nodes only accept factors between -1.0 and 1.0 inclusive";

    let mut valid = true;
    let source = find_source_through_macros(ctx, linked).and_then(|p| graph.node_of(p));
    match source.map(|s| &s.kind) {
        Some(NodeKind::ScalarParameter {
            default_value,
            min,
            max,
            ..
        }) => {
            if out_of_range(*default_value) {
                valid = false;
                ctx.warn(
                    format!(
                        "{prefix} but the default value of the float parameter node is ({default_value:.6}). Factor will be ignored."
                    ),
                    node.id,
                );
            }
            if let Some(min) = min.filter(|m| *m < -1.0) {
                valid = false;
                ctx.warn(
                    format!(
                        "{prefix} but the minimum UI value for the input float parameter node is ({min:.6}). Factor will be ignored."
                    ),
                    node.id,
                );
            }
            if let Some(max) = max.filter(|m| *m > 1.0) {
                valid = false;
                ctx.warn(
                    format!(
                        "{prefix} but the maximum UI value for the input float parameter node is ({max:.6}). Factor will be ignored."
                    ),
                    node.id,
                );
            }
        }
        Some(NodeKind::ScalarConstant { value }) if out_of_range(*value) => {
            valid = false;
            ctx.warn(
                format!(
                    "{prefix} but the value of the float constant node is ({value:.6}). Factor will be ignored."
                ),
                node.id,
            );
        }
        _ => {}
    }

    if valid { generate_scalar(ctx, linked) } else { None }
}

fn morph_node(
    ctx: &mut GenerationContext,
    node: &Node,
    morph_name: &str,
    base: &MeshSource,
    only_connected_lod: bool,
) -> Option<Rc<NodeMesh>> {
    let graph = ctx.graph;
    let mesh_pin = node.input_pin(pin_names::MESH);
    let Some((mesh_pin, linked)) =
        mesh_pin.and_then(|p| graph.follow_input_pin(p.id).map(|linked| (p.id, linked)))
    else {
        return Some(Rc::new(NodeMesh::Morph {
            base: None,
            factor: None,
            morph: None,
        }));
    };

    let mut morph_name = morph_name.to_string();
    let name_pin = node
        .input_pin(pin_names::MORPH_TARGET_NAME)
        .and_then(|p| graph.follow_input_pin(p.id));
    if let Some(name_pin) = name_pin {
        match find_source_through_macros(ctx, name_pin).and_then(|p| graph.node_of(p)) {
            Some(Node {
                kind: NodeKind::StaticString { value },
                ..
            }) => morph_name = value.clone(),
            Some(_) => {}
            None => ctx.warn("Could not find a linked String node.", node.id),
        }
    }

    let factor = node
        .input_pin(pin_names::FACTOR)
        .and_then(|p| generate_morph_factor(ctx, node, p.id));
    let _morph = ScopedPush::new(
        &ctx.morph_stack,
        MorphEntry {
            node: node.id,
            morph_name,
            factor,
            mesh_pin,
        },
    );
    generate_mesh(ctx, linked, base, only_connected_lod)
}

/// Output pin of the source mesh node feeding `pin`, through pass-through
/// mesh nodes and macros
fn find_mesh_base_source(ctx: &GenerationContext, pin: PinId) -> Option<PinId> {
    let graph = ctx.graph;
    let mut current = find_source_through_macros(ctx, pin)?;
    for _ in 0..=graph.nodes().len() {
        let node = graph.node_of(current)?;
        let input = match &node.kind {
            NodeKind::SkeletalMesh { .. } | NodeKind::StaticMesh { .. } | NodeKind::Table { .. } => {
                return Some(current);
            }
            NodeKind::MeshMorph { .. }
            | NodeKind::MeshMorphStackApplication
            | NodeKind::AnimationPose => node.input_pin(pin_names::MESH),
            NodeKind::MeshReshape { .. } => node.input_pin(pin_names::BASE_MESH),
            NodeKind::MeshVariation { .. } => node.input_pin(pin_names::DEFAULT),
            NodeKind::MeshSwitch { options } => options.first().and_then(|o| node.input_pin(o)),
            _ => None,
        }?;
        current = find_source_through_macros(ctx, graph.follow_input_pin(input.id)?)?;
    }
    None
}

/// Skeletal mesh asset at the root of the mesh chain feeding `pin`
fn base_skeletal_mesh<'a>(ctx: &GenerationContext<'a>, pin: PinId) -> Option<&'a SkeletalMeshAsset> {
    let graph = ctx.graph;
    let assets = ctx.assets;
    let source = find_mesh_base_source(ctx, pin)?;
    match &graph.node_of(source)?.kind {
        NodeKind::SkeletalMesh { mesh: Some(name), .. } => assets.skeletal_mesh(name),
        _ => None,
    }
}

/// Morph entries of the stack definition at `pin`
fn morph_stack_definition(
    ctx: &mut GenerationContext,
    pin: PinId,
    mesh_pin: PinId,
    morph_names: &[String],
) -> Vec<MorphEntry> {
    let graph = ctx.graph;
    let Some(node) = graph.node_of(pin) else {
        return Vec::new();
    };
    match &node.kind {
        NodeKind::MeshMorphStackDefinition { .. } => {
            let mut entries = Vec::new();
            for input in node.input_pins() {
                if input.links.is_empty() || !morph_names.contains(&input.name) {
                    continue;
                }
                let factor = generate_morph_factor(ctx, node, input.id);
                entries.push(MorphEntry {
                    node: node.id,
                    morph_name: input.name.clone(),
                    factor,
                    mesh_pin,
                });
            }
            entries
        }
        NodeKind::MacroInstance { macro_name } => {
            through_macro_instance(ctx, node, macro_name, pin, |ctx, linked| {
                Some(morph_stack_definition(ctx, linked, mesh_pin, morph_names))
            })
            .unwrap_or_default()
        }
        NodeKind::Tunnel => through_tunnel(ctx, node, pin, |ctx, linked| {
            Some(morph_stack_definition(ctx, linked, mesh_pin, morph_names))
        })
        .unwrap_or_default(),
        _ => {
            ctx.warn("Node type not implemented yet.", node.id);
            Vec::new()
        }
    }
}

fn morph_stack_application(
    ctx: &mut GenerationContext,
    node: &Node,
    base: &MeshSource,
    only_connected_lod: bool,
) -> Option<Rc<NodeMesh>> {
    let graph = ctx.graph;
    let Some(stack) = node
        .input_pin(pin_names::STACK)
        .and_then(|p| graph.follow_input_pin(p.id))
    else {
        ctx.warn("Stack definition connection not found.", node.id);
        return None;
    };

    let mesh_pin = node.input_pin(pin_names::MESH)?;
    let linked = graph.follow_input_pin(mesh_pin.id);
    let morph_names: Vec<String> = linked
        .and_then(|p| base_skeletal_mesh(ctx, p))
        .map(|asset| asset.morph_targets.iter().map(|m| m.name.clone()).collect())
        .unwrap_or_default();

    let entries = morph_stack_definition(ctx, stack, mesh_pin.id, &morph_names);
    let _morphs: Vec<ScopedPush<MorphEntry>> = entries
        .into_iter()
        .map(|entry| ScopedPush::new(&ctx.morph_stack, entry))
        .collect();
    generate_mesh(ctx, linked?, base, only_connected_lod)
}

// ============================================================================
// Variations and Reshape
// ============================================================================

fn variation_node(
    ctx: &mut GenerationContext,
    node: &Node,
    variations: &[String],
    base: &MeshSource,
    only_connected_lod: bool,
) -> Option<Rc<NodeMesh>> {
    let graph = ctx.graph;
    let default = generate_input_mesh(ctx, node, pin_names::DEFAULT, base, only_connected_lod);

    let mut out = Vec::with_capacity(variations.len());
    for tag in variations {
        let Some(input) = node.input_pin(tag) else {
            continue;
        };
        let Some(linked) = graph.follow_input_pin(input.id) else {
            continue;
        };
        out.push(MeshVariation {
            tag: tag.clone(),
            mesh: generate_mesh(ctx, linked, base, only_connected_lod),
        });
    }

    Some(Rc::new(NodeMesh::Variation {
        default,
        variations: out,
    }))
}

/// Skeletal meshes behind the base mesh of a reshape, each with its
/// animation instance
///
/// A table source contributes the mesh of every row of the connected column.
fn reshape_source_meshes<'a>(
    ctx: &GenerationContext<'a>,
    pin: PinId,
) -> Vec<(&'a SkeletalMeshAsset, Option<&'a str>)> {
    let graph = ctx.graph;
    let assets = ctx.assets;
    let tables = ctx.tables;
    let Some(source) = find_mesh_base_source(ctx, pin) else {
        return Vec::new();
    };
    let Some(node) = graph.node_of(source) else {
        return Vec::new();
    };
    match &node.kind {
        NodeKind::SkeletalMesh {
            mesh: Some(name),
            anim_instance,
            ..
        } => assets
            .skeletal_mesh(name)
            .map(|mesh| (mesh, anim_instance.as_deref()))
            .into_iter()
            .collect(),
        NodeKind::Table { table: Some(name), .. } => {
            let Some(table) = tables.resolve_table(name) else {
                return Vec::new();
            };
            let column_name = graph.pin(source).map(|p| p.name.as_str()).unwrap_or_default();
            let Some(column) = table.column(column_name) else {
                return Vec::new();
            };
            row_values(table, column)
                .filter_map(|(_, value)| match value {
                    Some(TableValue::Mesh(mesh)) => assets.skeletal_mesh(&mesh.mesh),
                    _ => None,
                })
                .map(|mesh| (mesh, None))
                .collect()
        }
        _ => Vec::new(),
    }
}

/// Reference mesh of the component being generated
fn component_reference_mesh<'a>(ctx: &GenerationContext<'a>) -> Option<&'a SkeletalMeshAsset> {
    let assets = ctx.assets;
    let component = ctx.current_component.as_deref()?;
    let info = ctx.compilation.component(component)?;
    assets.skeletal_mesh(&info.reference_mesh)
}

/// Physics assets of the reshape sources, paired with the mesh they came from
///
/// Animation instance overrides count when physics manipulation is enabled.
fn reshape_physics_assets<'a>(
    ctx: &GenerationContext<'a>,
    sources: &[(&'a SkeletalMeshAsset, Option<&'a str>)],
) -> Vec<(&'a PhysicsAsset, &'a SkeletalMeshAsset)> {
    let assets = ctx.assets;
    let with_overrides = ctx.options().anim_physics_manipulation_enabled;
    let mut physics = Vec::new();
    for &(mesh, anim_instance) in sources {
        if let Some(asset) = mesh.physics_asset.as_deref().and_then(|name| assets.physics_asset(name)) {
            physics.push((asset, mesh));
        }
        if !with_overrides {
            continue;
        }
        let overrides = anim_instance
            .and_then(|name| assets.anim_instance(name))
            .map(|anim| anim.physics_overrides.as_slice())
            .unwrap_or_default();
        physics.extend(
            overrides
                .iter()
                .filter_map(|name| assets.physics_asset(name))
                .map(|asset| (asset, mesh)),
        );
    }
    physics
}

fn has_bone(mesh: &SkeletalMeshAsset, name: &str) -> bool {
    mesh.ref_skeleton.iter().any(|bone| bone.name == name)
}

/// Bones a reshape deforms
///
/// Root bones are never deformed. `meshes` are the skeletal meshes behind
/// the base pin, `reference` the component's reference mesh.
fn select_bones_to_deform(
    listed: &[String],
    method: BoneDeformSelection,
    meshes: &[&SkeletalMeshAsset],
    reference: Option<&SkeletalMeshAsset>,
) -> Vec<String> {
    let mut selected: Vec<String> = Vec::new();
    match method {
        BoneDeformSelection::OnlySelected => {
            let mut missing = Vec::new();
            for name in listed {
                let bone = meshes
                    .iter()
                    .find_map(|mesh| mesh.ref_skeleton.iter().find(|b| b.name == *name));
                match bone {
                    Some(bone) if bone.parent.is_some() => {
                        add_unique(&mut selected, name.clone());
                    }
                    Some(_) => {}
                    None => missing.push(name.as_str()),
                }
            }
            if !missing.is_empty() {
                debug!("Bones to deform not in the skeleton: {}", missing.join(", "));
            }
        }
        BoneDeformSelection::AllButSelected => {
            for bone in meshes.iter().flat_map(|mesh| &mesh.ref_skeleton) {
                if bone.parent.is_some() && !listed.contains(&bone.name) {
                    add_unique(&mut selected, bone.name.clone());
                }
            }
        }
        BoneDeformSelection::DeformRefSkeleton => {
            for bone in reference.iter().flat_map(|mesh| &mesh.ref_skeleton) {
                if bone.parent.is_some() {
                    add_unique(&mut selected, bone.name.clone());
                }
            }
        }
        BoneDeformSelection::DeformNoneRefSkeleton => {
            let Some(reference) = reference else {
                return selected;
            };
            for bone in meshes.iter().flat_map(|mesh| &mesh.ref_skeleton) {
                if bone.parent.is_some() && !has_bone(reference, &bone.name) {
                    add_unique(&mut selected, bone.name.clone());
                }
            }
        }
    }
    selected
}

/// Bones of the physics bodies a reshape deforms
///
/// A body matches when its bone is a candidate present in the skeleton the
/// body is checked against. Candidates are the listed bones, or the whole
/// reference skeleton for the reference methods, which also check bodies
/// against the reference skeleton. Inverting methods keep the bodies that
/// do not match.
fn select_physics_to_deform(
    listed: &[String],
    method: BoneDeformSelection,
    physics: &[(&PhysicsAsset, &SkeletalMeshAsset)],
    reference: Option<&SkeletalMeshAsset>,
) -> Vec<String> {
    let candidates: Vec<&str> = if method.uses_reference_skeleton() {
        reference
            .map(|mesh| mesh.ref_skeleton.iter().map(|b| b.name.as_str()).collect())
            .unwrap_or_default()
    } else {
        listed.iter().map(String::as_str).collect()
    };

    let mut selected: Vec<String> = Vec::new();
    for &(asset, mesh) in physics {
        let skeleton = if method.uses_reference_skeleton() {
            reference
        } else {
            Some(mesh)
        };
        let Some(skeleton) = skeleton else {
            continue;
        };
        for body in &asset.bodies {
            let matched = candidates.contains(&body.bone.as_str()) && has_bone(skeleton, &body.bone);
            if matched != method.inverts() {
                add_unique(&mut selected, body.bone.clone());
            }
        }
    }
    selected
}

fn reshape_node(
    ctx: &mut GenerationContext,
    node: &Node,
    base: &MeshSource,
    only_connected_lod: bool,
) -> Option<Rc<NodeMesh>> {
    let graph = ctx.graph;
    let NodeKind::MeshReshape {
        reshape_vertices,
        reshape_skeleton,
        reshape_physics,
        bones_to_deform,
        selection_method,
        physics_to_deform,
        physics_selection_method,
        color_usage,
    } = &node.kind
    else {
        return None;
    };

    let base_pin = node
        .input_pin(pin_names::BASE_MESH)
        .and_then(|p| graph.follow_input_pin(p.id));
    let base_mesh = if base_pin.is_some() {
        generate_input_mesh(ctx, node, pin_names::BASE_MESH, base, only_connected_lod)
    } else {
        ctx.warn("Mesh reshape node requires a default value.", node.id);
        None
    };

    let mut color_usage = *color_usage;
    let mask_channels = color_usage
        .iter()
        .filter(|u| **u == ColorChannelUsage::MaskWeight)
        .count();
    if mask_channels > 1 {
        color_usage = [ColorChannelUsage::None; 4];
        ctx.warn(
            "Only one color channel with mask weight usage is allowed, multiple found. Reshape masking disabled.",
            node.id,
        );
    }

    let sources = base_pin
        .map(|p| reshape_source_meshes(ctx, p))
        .unwrap_or_default();
    let meshes: Vec<&SkeletalMeshAsset> = sources.iter().map(|&(mesh, _)| mesh).collect();
    let reference = component_reference_mesh(ctx);
    let bones_to_deform = if *reshape_skeleton {
        select_bones_to_deform(bones_to_deform, *selection_method, &meshes, reference)
    } else {
        Vec::new()
    };
    let physics_to_deform = if *reshape_physics {
        let physics = reshape_physics_assets(ctx, &sources);
        select_physics_to_deform(physics_to_deform, *physics_selection_method, &physics, reference)
    } else {
        Vec::new()
    };

    // Shapes only contribute vertex positions
    let (base_shape, target_shape) = {
        let _flags = ScopedPush::new(
            &ctx.mesh_flags,
            MeshConversionFlags::IGNORE_SKINNING
                | MeshConversionFlags::IGNORE_PHYSICS
                | MeshConversionFlags::DO_NOT_CREATE_MESH_METADATA,
        );
        (
            generate_input_mesh(ctx, node, pin_names::BASE_SHAPE, base, true),
            generate_input_mesh(ctx, node, pin_names::TARGET_SHAPE, base, true),
        )
    };

    Some(Rc::new(NodeMesh::Reshape(Box::new(MeshReshape {
        base: base_mesh,
        base_shape,
        target_shape,
        reshape_vertices: *reshape_vertices,
        reshape_skeleton: *reshape_skeleton,
        reshape_physics: *reshape_physics,
        bones_to_deform,
        physics_to_deform,
        color_usage,
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{
        AssetLibrary, BodySetup, DataTable, RefBone, SkeletalMeshLod, TableColumn, TableRow, Transform,
    };
    use crate::config::CompilerOptions;
    use crate::convert::test_assets::{body_mesh, library};
    use crate::graph::test_graph::GraphBuilder;
    use crate::graph::{Graph, MeshSectionRef, PinCategory};
    use crate::services::LibraryServices;
    use hashbrown::HashMap;

    fn skeletal(mesh: &str) -> NodeKind {
        NodeKind::SkeletalMesh {
            mesh: Some(mesh.to_string()),
            sections: Vec::new(),
            anim_instance: None,
            anim_slot: None,
            gameplay_tags: Vec::new(),
        }
    }

    /// Body mesh with a second LOD whose sections swap materials
    fn two_lod_library() -> AssetLibrary {
        let mut assets = library();
        let mesh = &mut assets.skeletal_meshes[0];
        let mut lod1: SkeletalMeshLod = mesh.lods[0].clone();
        lod1.sections.reverse();
        mesh.lods.push(lod1);
        assets
    }

    fn body_graph() -> (Graph, NodeId, PinId) {
        let mut b = GraphBuilder::new();
        let body = b.node("Body", skeletal("SK_Body"));
        let out = b.output(body, pin_names::MESH, PinCategory::Mesh);
        b.set_kind(
            body,
            NodeKind::SkeletalMesh {
                mesh: Some("SK_Body".to_string()),
                sections: vec![SectionPin {
                    pin: out,
                    lod: 0,
                    section: 0,
                }],
                anim_instance: Some("ABP_Body".to_string()),
                anim_slot: Some("Main".to_string()),
                gameplay_tags: vec!["Armor".to_string()],
            },
        );
        (b.build(), body, out)
    }

    #[test]
    fn test_automatic_lod_follows_material() {
        let assets = two_lod_library();
        let (graph, body, _) = body_graph();
        let services = LibraryServices::new(&assets);
        let options = CompilerOptions {
            auto_lod_strategy: AutoLodStrategy::AutomaticFromMesh,
            ..Default::default()
        };
        let mut ctx = GenerationContext::new(&graph, &assets, &services, &services, options);
        let node = graph.node(body).unwrap();
        let asset = &assets.skeletal_meshes[0];

        assert_eq!(lod_and_section_for_automatic_lods(&mut ctx, node, asset, (0, 0), false), Some((0, 0)));
        ctx.current_lod = 1;
        assert_eq!(lod_and_section_for_automatic_lods(&mut ctx, node, asset, (0, 0), false), Some((1, 1)));
        assert_eq!(lod_and_section_for_automatic_lods(&mut ctx, node, asset, (0, 0), true), Some((0, 0)));
        ctx.current_lod = 2;
        assert_eq!(lod_and_section_for_automatic_lods(&mut ctx, node, asset, (0, 0), false), None);
        assert!(ctx.diagnostics.is_empty());
    }

    #[test]
    fn test_skeletal_node_tags_and_layouts() {
        let assets = two_lod_library();
        let (graph, _, out) = body_graph();
        let services = LibraryServices::new(&assets);
        let mut ctx = GenerationContext::new(&graph, &assets, &services, &services, CompilerOptions::default());

        let result = generate_mesh(&mut ctx, out, &MeshSource::default(), false).unwrap();
        let NodeMesh::Constant {
            mesh: Some(mesh),
            source_id,
            num_layouts,
        } = result.as_ref()
        else {
            panic!("expected a converted constant, got {}", result.kind_name());
        };
        assert_eq!(*source_id, mesh_source_id("SK_Body"));
        assert_eq!(*num_layouts, 1);
        assert!(mesh.tags.contains(&"__AnimBP:Main_Slot_0".to_string()));
        assert!(mesh.tags.contains(&"__AnimBPTag:Armor".to_string()));
        assert_eq!(ctx.anim_instances, vec!["ABP_Body"]);
    }

    #[test]
    fn test_missing_skeletal_asset_yields_empty_constant() {
        let assets = AssetLibrary::default();
        let mut b = GraphBuilder::new();
        let body = b.node("Body", skeletal("SK_Missing"));
        let out = b.output(body, pin_names::MESH, PinCategory::Mesh);
        let graph = b.build();
        let services = LibraryServices::new(&assets);
        let mut ctx = GenerationContext::new(&graph, &assets, &services, &services, CompilerOptions::default());

        let result = generate_mesh(&mut ctx, out, &MeshSource::default(), false).unwrap();
        assert!(result.constant_meshes().is_empty());
        assert_eq!(
            ctx.diagnostics.entries()[0].message,
            "Failed to load the skeletal mesh set in the node.[Asset path: SK_Missing]"
        );
    }

    #[test]
    fn test_morph_factor_out_of_range_is_ignored() {
        let assets = two_lod_library();
        let mut b = GraphBuilder::new();
        let body = b.node("Body", skeletal("SK_Body"));
        let body_out = b.output(body, pin_names::MESH, PinCategory::Mesh);
        let factor = b.node("f", NodeKind::ScalarConstant { value: 2.0 });
        let factor_out = b.output(factor, pin_names::VALUE, PinCategory::Scalar);
        let morph = b.node(
            "Morph",
            NodeKind::MeshMorph {
                morph_name: "Smile".to_string(),
            },
        );
        let morph_mesh = b.input(morph, pin_names::MESH, PinCategory::Mesh);
        let morph_factor = b.input(morph, pin_names::FACTOR, PinCategory::Scalar);
        let morph_out = b.output(morph, pin_names::MESH, PinCategory::Mesh);
        b.link(body_out, morph_mesh);
        b.link(factor_out, morph_factor);
        let graph = b.build();
        let services = LibraryServices::new(&assets);
        let mut ctx = GenerationContext::new(&graph, &assets, &services, &services, CompilerOptions::default());

        let result = generate_mesh(&mut ctx, morph_out, &MeshSource::default(), false).unwrap();
        let NodeMesh::Morph {
            base: Some(base),
            factor: None,
            morph: Some(_),
        } = result.as_ref()
        else {
            panic!("expected a morph without factor, got {}", result.kind_name());
        };
        assert!(matches!(base.as_ref(), NodeMesh::Constant { .. }));
        assert_eq!(
            ctx.diagnostics.entries()[0].message,
            "Mesh morph nodes only accept factors between -1.0 and 1.0 inclusive but the value of the float constant node is (2.000000). Factor will be ignored."
        );
        assert_eq!(ctx.morph_depth(), 0);
    }

    fn tail_mesh() -> SkeletalMeshAsset {
        let bone = |name: &str, parent: Option<u16>| RefBone {
            name: name.to_string(),
            parent,
            transform: Transform::default(),
        };
        SkeletalMeshAsset {
            name: "SK_Tail".to_string(),
            ref_skeleton: vec![bone("root", None), bone("spine", Some(0)), bone("tail", Some(1))],
            ..body_mesh()
        }
    }

    fn body_physics() -> PhysicsAsset {
        let body = |bone: &str| BodySetup {
            bone: bone.to_string(),
            spheres: Vec::new(),
            boxes: Vec::new(),
            convexes: Vec::new(),
            sphyls: Vec::new(),
            tapered_capsules: Vec::new(),
        };
        PhysicsAsset {
            name: "PA_Body".to_string(),
            bodies: vec![body("spine"), body("head"), body("tail")],
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_only_selected_bones_need_a_parent() {
        let body = body_mesh();
        let tail = tail_mesh();
        let listed = names(&["root", "spine", "spine", "tail"]);
        let method = BoneDeformSelection::OnlySelected;

        assert_eq!(select_bones_to_deform(&listed, method, &[&body], None), vec!["spine"]);
        assert_eq!(
            select_bones_to_deform(&listed, method, &[&body, &tail], None),
            vec!["spine", "tail"]
        );
        assert!(select_bones_to_deform(&listed, method, &[], Some(&body)).is_empty());
    }

    #[test]
    fn test_all_but_selected_bones() {
        let body = body_mesh();
        let tail = tail_mesh();
        let selected = select_bones_to_deform(
            &names(&["arm"]),
            BoneDeformSelection::AllButSelected,
            &[&body, &tail],
            None,
        );
        assert_eq!(selected, vec!["spine", "head", "tail"]);
    }

    #[test]
    fn test_reference_skeleton_bones() {
        let body = body_mesh();
        let tail = tail_mesh();
        let listed = names(&["tail"]);

        let all = BoneDeformSelection::DeformRefSkeleton;
        assert_eq!(
            select_bones_to_deform(&listed, all, &[&tail], Some(&body)),
            vec!["spine", "arm", "head"]
        );
        assert!(select_bones_to_deform(&listed, all, &[&tail], None).is_empty());

        let outside = BoneDeformSelection::DeformNoneRefSkeleton;
        assert_eq!(
            select_bones_to_deform(&listed, outside, &[&body, &tail], Some(&body)),
            vec!["tail"]
        );
        assert!(select_bones_to_deform(&listed, outside, &[&tail], None).is_empty());
    }

    #[test]
    fn test_physics_selection_methods() {
        let body = body_mesh();
        let tail = tail_mesh();
        let physics = body_physics();
        let sources = [(&physics, &body)];

        let only = select_physics_to_deform(
            &names(&["head", "tail"]),
            BoneDeformSelection::OnlySelected,
            &sources,
            None,
        );
        assert_eq!(only, vec!["head"]);

        let all_but = select_physics_to_deform(
            &names(&["head"]),
            BoneDeformSelection::AllButSelected,
            &sources,
            None,
        );
        assert_eq!(all_but, vec!["spine", "tail"]);

        let reference = select_physics_to_deform(
            &[],
            BoneDeformSelection::DeformRefSkeleton,
            &sources,
            Some(&tail),
        );
        assert_eq!(reference, vec!["spine", "tail"]);

        let outside = select_physics_to_deform(
            &[],
            BoneDeformSelection::DeformNoneRefSkeleton,
            &sources,
            Some(&tail),
        );
        assert_eq!(outside, vec!["head"]);
    }

    #[test]
    fn test_reshape_sources_from_table_rows() {
        let mut assets = library();
        assets.skeletal_meshes.push(tail_mesh());
        let mesh_ref = |mesh: &str| {
            TableValue::Mesh(MeshSectionRef {
                mesh: mesh.to_string(),
                lod: 0,
                section: 0,
            })
        };
        assets.tables.push(DataTable {
            name: "DT_Bodies".to_string(),
            columns: vec![TableColumn {
                name: "Mesh".to_string(),
                default: Some(mesh_ref("SK_Body")),
            }],
            rows: vec![
                TableRow {
                    name: "Plain".to_string(),
                    values: HashMap::new(),
                },
                TableRow {
                    name: "Tailed".to_string(),
                    values: HashMap::from([("Mesh".to_string(), mesh_ref("SK_Tail"))]),
                },
            ],
        });

        let mut b = GraphBuilder::new();
        let table = b.node(
            "Bodies",
            NodeKind::Table {
                table: Some("DT_Bodies".to_string()),
                parameter_name: String::new(),
                sections: Vec::new(),
            },
        );
        let table_out = b.output(table, "Mesh", PinCategory::Mesh);
        let graph = b.build();
        let services = LibraryServices::new(&assets);
        let ctx = GenerationContext::new(&graph, &assets, &services, &services, CompilerOptions::default());

        let sources = reshape_source_meshes(&ctx, table_out);
        let found: Vec<&str> = sources.iter().map(|(mesh, _)| mesh.name.as_str()).collect();
        assert_eq!(found, vec!["SK_Body", "SK_Tail"]);

        let meshes: Vec<&SkeletalMeshAsset> = sources.iter().map(|&(mesh, _)| mesh).collect();
        let selected = select_bones_to_deform(
            &names(&["tail"]),
            BoneDeformSelection::OnlySelected,
            &meshes,
            None,
        );
        assert_eq!(selected, vec!["tail"]);
    }

    #[test]
    fn test_reshape_node_uses_component_reference() {
        let mut assets = library();
        assets.skeletal_meshes[0].physics_asset = Some("PA_Body".to_string());
        assets.physics_assets.push(body_physics());

        let mut b = GraphBuilder::new();
        let body = b.node("Body", skeletal("SK_Body"));
        let body_out = b.output(body, pin_names::MESH, PinCategory::Mesh);
        let reshape = b.node(
            "Reshape",
            NodeKind::MeshReshape {
                reshape_vertices: true,
                reshape_skeleton: true,
                reshape_physics: true,
                bones_to_deform: Vec::new(),
                selection_method: BoneDeformSelection::DeformRefSkeleton,
                physics_to_deform: names(&["head"]),
                physics_selection_method: BoneDeformSelection::AllButSelected,
                color_usage: [ColorChannelUsage::None; 4],
            },
        );
        let reshape_base = b.input(reshape, pin_names::BASE_MESH, PinCategory::Mesh);
        let reshape_out = b.output(reshape, pin_names::MESH, PinCategory::Mesh);
        b.link(body_out, reshape_base);
        let graph = b.build();
        let services = LibraryServices::new(&assets);
        let mut ctx = GenerationContext::new(&graph, &assets, &services, &services, CompilerOptions::default());
        ctx.compilation.register_component(&assets.components[0], &assets).unwrap();
        ctx.current_component = Some("Body".to_string());

        let result = generate_mesh(&mut ctx, reshape_out, &MeshSource::default(), false).unwrap();
        let NodeMesh::Reshape(reshape) = result.as_ref() else {
            panic!("expected a reshape, got {}", result.kind_name());
        };
        assert_eq!(reshape.bones_to_deform, vec!["spine", "arm", "head"]);
        assert_eq!(reshape.physics_to_deform, vec!["spine", "tail"]);
    }
}
