//! Scalar translator and the switch parameter shared by every switch node

use super::cache::{GeneratedNode, Translator};
use super::context::{GenerationContext, ParameterKind};
use super::macros::{through_macro_instance, through_tunnel};
use super::nodes::NodeScalar;
use super::tables::generate_scalar_table;
use crate::graph::{Node, NodeKind, PinId, pin_names};
use std::rc::Rc;

pub fn generate_scalar(ctx: &mut GenerationContext, pin: PinId) -> Option<Rc<NodeScalar>> {
    let graph = ctx.graph;
    let node = graph.node_of(pin)?;
    let key = ctx.generated_key(Translator::Scalar, pin, node, false);
    if let Some(GeneratedNode::Scalar(result)) = ctx.cached(&key) {
        return result;
    }
    let _guard = ctx.enter(pin, Translator::Scalar, node.id)?;

    let result = match &node.kind {
        NodeKind::ScalarConstant { value } => Some(Rc::new(NodeScalar::Constant(*value))),
        NodeKind::ScalarParameter {
            name,
            default_value,
            min,
            max,
        } => {
            ctx.register_parameter(name, ParameterKind::Scalar);
            Some(Rc::new(NodeScalar::Parameter {
                name: name.clone(),
                default_value: *default_value,
                min: *min,
                max: *max,
            }))
        }
        NodeKind::EnumParameter {
            name,
            values,
            default_index,
        } => {
            ctx.register_parameter(name, ParameterKind::Enum);
            Some(Rc::new(NodeScalar::EnumParameter {
                name: name.clone(),
                options: values.clone(),
                default_index: *default_index,
            }))
        }
        NodeKind::ScalarSwitch { options } => {
            generate_switch_parameter(ctx, node, options.len()).map(|parameter| {
                let options = switch_options(ctx, node, options, generate_scalar);
                Rc::new(NodeScalar::Switch { parameter, options })
            })
        }
        NodeKind::Table { .. } => generate_scalar_table(ctx, node, pin),
        NodeKind::MacroInstance { macro_name } => {
            return through_macro_instance(ctx, node, macro_name, pin, generate_scalar);
        }
        NodeKind::Tunnel => return through_tunnel(ctx, node, pin, generate_scalar),
        _ => {
            ctx.warn("Node type not implemented yet.", node.id);
            None
        }
    };

    ctx.store(key, GeneratedNode::Scalar(result.clone()));
    result
}

/// Enum parameter driving a switch node with `num_options` outcomes
///
/// The switch is dropped (`None`) unless exactly one enum is connected. A
/// different number of options is only reported.
pub(super) fn generate_switch_parameter(
    ctx: &mut GenerationContext,
    node: &Node,
    num_options: usize,
) -> Option<Rc<NodeScalar>> {
    let graph = ctx.graph;
    let linked = node
        .input_pin(pin_names::SWITCH_PARAMETER)
        .filter(|pin| graph.connection_count(pin.id) == 1)
        .and_then(|pin| graph.follow_input_pin(pin.id));
    let Some(linked) = linked else {
        ctx.warn(
            "Switch nodes must have an enum switch parameter. Please connect an enum and refesh the switch node.",
            node.id,
        );
        return None;
    };

    let Some(parameter) = generate_scalar(ctx, linked) else {
        ctx.warn(
            "Could not generate switch enum parameter. Please refesh the switch node and connect an enum.",
            node.id,
        );
        return None;
    };
    let Some(options) = parameter.enum_options() else {
        ctx.warn("Switch parameter of incorrect type.", node.id);
        return None;
    };
    if options.len() != num_options {
        ctx.warn(
            "Switch enum and switch node have different number of options. Please refresh the switch node to make sure the outcomes are labeled properly.",
            node.id,
        );
    }
    Some(parameter)
}

/// One result per option pin of a switch; unconnected options are `None`
pub(super) fn switch_options<T>(
    ctx: &mut GenerationContext,
    node: &Node,
    options: &[String],
    mut generate: impl FnMut(&mut GenerationContext, PinId) -> Option<T>,
) -> Vec<Option<T>> {
    let graph = ctx.graph;
    options
        .iter()
        .map(|option| {
            node.input_pin(option)
                .and_then(|pin| graph.follow_input_pin(pin.id))
                .and_then(|linked| generate(ctx, linked))
        })
        .collect()
}
