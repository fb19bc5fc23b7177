//! Macro instances and tunnels
//!
//! A macro instance evaluates the matching pin of its macro's output tunnel
//! with the instance pushed on the macro stack. An input tunnel pops that
//! instance and continues from the instance's own input pin of the same
//! name. Results are never cached: the same pin yields different nodes in
//! different macro contexts.

use super::cache::{ScopedPop, ScopedPush};
use super::context::GenerationContext;
use crate::graph::{Node, NodeKind, PinId};

fn pin_name(ctx: &GenerationContext, pin: PinId) -> String {
    ctx.graph.pin(pin).map(|p| p.name.clone()).unwrap_or_default()
}

/// Evaluate `pin` of a macro instance node
pub(super) fn through_macro_instance<T>(
    ctx: &mut GenerationContext,
    node: &Node,
    macro_name: &str,
    pin: PinId,
    generate: impl FnOnce(&mut GenerationContext, PinId) -> Option<T>,
) -> Option<T> {
    let graph = ctx.graph;
    let name = pin_name(ctx, pin);
    let output = graph
        .find_macro(macro_name)
        .and_then(|definition| graph.node(definition.output))
        .and_then(|tunnel| tunnel.input_pin(&name));
    let Some(output) = output else {
        ctx.warn(
            format!("Macro Output node does not contain a pin with name {name}."),
            node.id,
        );
        return None;
    };
    let Some(linked) = graph.follow_input_pin(output.id) else {
        ctx.warn(format!("Macro Output node Pin {name} not linked."), node.id);
        return None;
    };

    let _scope = ScopedPush::new(&ctx.macro_stack, node.id);
    generate(ctx, linked)
}

/// Evaluate `pin` of an input tunnel through the enclosing macro instance
pub(super) fn through_tunnel<T>(
    ctx: &mut GenerationContext,
    node: &Node,
    pin: PinId,
    generate: impl FnOnce(&mut GenerationContext, PinId) -> Option<T>,
) -> Option<T> {
    let graph = ctx.graph;
    let Some(scope) = ScopedPop::new(&ctx.macro_stack) else {
        ctx.warn("Tunnel node evaluated outside of a macro instance.", node.id);
        return None;
    };
    let instance = scope.value().and_then(|&id| graph.node(id))?;

    let name = pin_name(ctx, pin);
    let Some(input) = instance.input_pin(&name) else {
        ctx.warn(
            format!("Macro Instance Node does not contain a pin with name {name}."),
            instance.id,
        );
        return None;
    };
    let linked = graph.follow_input_pin(input.id)?;
    generate(ctx, linked)
}

/// Output pin that ultimately feeds `pin`, looking through macro boundaries
///
/// Walks a private copy of the macro stack so the context is left untouched.
pub(super) fn find_source_through_macros(ctx: &GenerationContext, pin: PinId) -> Option<PinId> {
    let graph = ctx.graph;
    let mut stack = ctx.macro_stack.borrow().clone();
    let mut current = pin;

    for _ in 0..=graph.nodes().len() {
        let node = graph.node_of(current)?;
        let name = &graph.pin(current)?.name;
        match &node.kind {
            NodeKind::MacroInstance { macro_name } => {
                let output = graph
                    .find_macro(macro_name)
                    .and_then(|definition| graph.node(definition.output))
                    .and_then(|tunnel| tunnel.input_pin(name))?;
                stack.push(node.id);
                current = graph.follow_input_pin(output.id)?;
            }
            NodeKind::Tunnel => {
                let instance = stack.pop().and_then(|id| graph.node(id))?;
                let input = instance.input_pin(name)?;
                current = graph.follow_input_pin(input.id)?;
            }
            _ => return Some(current),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetLibrary;
    use crate::config::CompilerOptions;
    use crate::graph::PinCategory;
    use crate::graph::test_graph::GraphBuilder;
    use crate::services::LibraryServices;

    /// constant -> instance.In ; macro: input tunnel.In -> output tunnel.Out ; instance.Out
    fn macro_graph() -> (crate::graph::Graph, PinId, PinId, PinId) {
        let mut b = GraphBuilder::new();
        let constant = b.node("c", NodeKind::ScalarConstant { value: 3.0 });
        let value = b.output(constant, "Value", PinCategory::Scalar);

        let input_tunnel = b.node("in", NodeKind::Tunnel);
        let tunnel_out = b.output(input_tunnel, "In", PinCategory::Scalar);
        let output_tunnel = b.node("out", NodeKind::Tunnel);
        let tunnel_in = b.input(output_tunnel, "Out", PinCategory::Scalar);
        b.link(tunnel_out, tunnel_in);
        b.add_macro("Passthrough", input_tunnel, output_tunnel);

        let instance = b.node(
            "inst",
            NodeKind::MacroInstance {
                macro_name: "Passthrough".to_string(),
            },
        );
        let instance_in = b.input(instance, "In", PinCategory::Scalar);
        let instance_out = b.output(instance, "Out", PinCategory::Scalar);
        b.link(value, instance_in);
        (b.build(), instance_out, value, tunnel_out)
    }

    #[test]
    fn test_source_found_through_macro() {
        let (graph, instance_out, value, _) = macro_graph();
        let assets = AssetLibrary::default();
        let services = LibraryServices::new(&assets);
        let ctx = GenerationContext::new(&graph, &assets, &services, &services, CompilerOptions::default());

        assert_eq!(find_source_through_macros(&ctx, instance_out), Some(value));
        assert_eq!(ctx.macro_depth(), 0);
    }

    #[test]
    fn test_missing_output_pin_reports_name() {
        let (graph, instance_out, _, _) = macro_graph();
        let assets = AssetLibrary::default();
        let services = LibraryServices::new(&assets);
        let mut ctx = GenerationContext::new(&graph, &assets, &services, &services, CompilerOptions::default());
        let instance = graph.node_of(instance_out).unwrap();

        let result: Option<()> = through_macro_instance(&mut ctx, instance, "Missing", instance_out, |_, _| Some(()));
        assert!(result.is_none());
        assert_eq!(
            ctx.diagnostics.entries()[0].message,
            "Macro Output node does not contain a pin with name Out."
        );
    }

    #[test]
    fn test_tunnel_restores_macro_stack() {
        let (graph, instance_out, value, tunnel_out) = macro_graph();
        let assets = AssetLibrary::default();
        let services = LibraryServices::new(&assets);
        let mut ctx = GenerationContext::new(&graph, &assets, &services, &services, CompilerOptions::default());
        let instance = graph.node_of(instance_out).unwrap();

        let reached = through_macro_instance(&mut ctx, instance, "Passthrough", instance_out, |ctx, inner| {
            assert_eq!(ctx.macro_depth(), 1);
            let tunnel = ctx.graph.node_of(inner).unwrap();
            let found = through_tunnel(ctx, tunnel, inner, |ctx, outer| {
                assert_eq!(ctx.macro_depth(), 0);
                Some(outer)
            });
            assert_eq!(ctx.macro_depth(), 1);
            found
        });
        assert_eq!(reached, Some(value));
        assert_eq!(ctx.macro_depth(), 0);

        let tunnel = graph.node_of(tunnel_out).unwrap();
        let outside: Option<PinId> = through_tunnel(&mut ctx, tunnel, tunnel_out, |_, p| Some(p));
        assert!(outside.is_none());
        assert_eq!(ctx.macro_depth(), 0);
    }
}
