//! Image translator

use super::cache::{GeneratedNode, Translator};
use super::context::GenerationContext;
use super::macros::{through_macro_instance, through_tunnel};
use super::nodes::NodeImage;
use crate::graph::{NodeKind, PinId};
use std::rc::Rc;

pub fn generate_image(ctx: &mut GenerationContext, pin: PinId) -> Option<Rc<NodeImage>> {
    let graph = ctx.graph;
    let node = graph.node_of(pin)?;
    let key = ctx.generated_key(Translator::Image, pin, node, false);
    if let Some(GeneratedNode::Image(result)) = ctx.cached(&key) {
        return result;
    }
    let _guard = ctx.enter(pin, Translator::Image, node.id)?;

    let result = match &node.kind {
        NodeKind::ImageConstant { image: None } => {
            ctx.warn("No image set in the image node.", node.id);
            None
        }
        NodeKind::ImageConstant { image: Some(name) } => match ctx.images.resolve_image(name) {
            Some(handle) => Some(Rc::new(NodeImage {
                name: handle.name,
                width: handle.width,
                height: handle.height,
            })),
            None => {
                ctx.warn(
                    format!("Failed to load the image set in the node.[Asset path: {name}]"),
                    node.id,
                );
                None
            }
        },
        NodeKind::MacroInstance { macro_name } => {
            return through_macro_instance(ctx, node, macro_name, pin, generate_image);
        }
        NodeKind::Tunnel => return through_tunnel(ctx, node, pin, generate_image),
        _ => {
            ctx.warn("Node type not implemented yet.", node.id);
            None
        }
    };

    ctx.store(key, GeneratedNode::Image(result.clone()));
    result
}
