//! Plain-text rendering for the `inspect` command.

use std::fmt::Write;

use super::{Container, NodeKind};
use super::config::ConfigCell;

fn join_types(types: &[super::TypeKey]) -> String {
    if types.is_empty() {
        return "-".to_string();
    }
    types
        .iter()
        .map(|key| key.short_name())
        .collect::<Vec<_>>()
        .join(", ")
}

pub(super) fn render(container: &Container) -> String {
    let mut out = String::new();

    out.push_str("Modules:\n");
    for (index, module) in container.modules.iter().enumerate() {
        let pad = "  ".repeat(module.depth + 1);
        let _ = writeln!(out, "{pad}{}: {}", module.id, module.description);

        let members = container
            .vertices
            .iter()
            .zip(&container.nodes)
            .filter(|(vertex, _)| vertex.module == index);
        for (vertex, node) in members {
            match node.kind {
                NodeKind::Config(config) => {
                    let _ = writeln!(out, "{pad}  {}", vertex.name);
                    for flag in container.configs[config].cell.flags() {
                        let _ = writeln!(out, "{pad}    {} = {}", flag.name, flag.value);
                    }
                }
                NodeKind::Provider => {
                    let _ = writeln!(out, "{pad}  provider {}", vertex.name);
                    let _ = writeln!(out, "{pad}    in:  {}", join_types(&vertex.inputs));
                    let _ = writeln!(out, "{pad}    out: {}", join_types(&vertex.outputs));
                }
                NodeKind::Invoker => {
                    let _ = writeln!(out, "{pad}  invoker {}", vertex.name);
                    let _ = writeln!(out, "{pad}    in:  {}", join_types(&vertex.inputs));
                }
            }
        }
    }

    out.push_str("\nContainer:\n");
    for flag in container.lifecycle_config.flags() {
        let _ = writeln!(out, "  {} = {}", flag.name, flag.value);
    }

    let hooks = container.lifecycle.hooks();
    out.push_str("\nHooks:\n");
    for hook in hooks.iter().filter(|hook| hook.has_start) {
        let _ = writeln!(out, "  [start] {}", hook.label());
    }
    for hook in hooks.iter().rev().filter(|hook| hook.has_stop) {
        let _ = writeln!(out, "  [stop]  {}", hook.label());
    }

    out
}
