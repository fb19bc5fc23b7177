//! Color translator

use super::cache::{GeneratedNode, Translator};
use super::context::{GenerationContext, ParameterKind};
use super::macros::{through_macro_instance, through_tunnel};
use super::nodes::NodeColor;
use super::scalar::{generate_switch_parameter, switch_options};
use super::tables::generate_color_table;
use crate::graph::{NodeKind, PinId};
use std::rc::Rc;

pub fn generate_color(ctx: &mut GenerationContext, pin: PinId) -> Option<Rc<NodeColor>> {
    let graph = ctx.graph;
    let node = graph.node_of(pin)?;
    let key = ctx.generated_key(Translator::Color, pin, node, false);
    if let Some(GeneratedNode::Color(result)) = ctx.cached(&key) {
        return result;
    }
    let _guard = ctx.enter(pin, Translator::Color, node.id)?;

    let result = match &node.kind {
        NodeKind::ColorConstant { value } => Some(Rc::new(NodeColor::Constant(*value))),
        NodeKind::ColorParameter {
            name,
            default_value,
        } => {
            ctx.register_parameter(name, ParameterKind::Color);
            Some(Rc::new(NodeColor::Parameter {
                name: name.clone(),
                default_value: *default_value,
            }))
        }
        NodeKind::ColorSwitch { options } => {
            generate_switch_parameter(ctx, node, options.len()).map(|parameter| {
                let options = switch_options(ctx, node, options, generate_color);
                Rc::new(NodeColor::Switch { parameter, options })
            })
        }
        NodeKind::Table { .. } => generate_color_table(ctx, node, pin),
        NodeKind::MacroInstance { macro_name } => {
            return through_macro_instance(ctx, node, macro_name, pin, generate_color);
        }
        NodeKind::Tunnel => return through_tunnel(ctx, node, pin, generate_color),
        _ => {
            ctx.warn("Node type not implemented yet.", node.id);
            None
        }
    };

    ctx.store(key, GeneratedNode::Color(result.clone()));
    result
}
