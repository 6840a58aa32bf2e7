//! Outline constraints.
//!
//! The editor is asked for a two-level outline within the mode's caps; the
//! reply is then trimmed so the caps hold whatever the model produced.

use tracing::warn;

use crate::models::settings::ModeSettings;
use crate::models::state::OutlineNode;

/// Constraint text handed to the outline prompt.
pub fn outline_constraints(settings: &ModeSettings) -> String {
    match (
        settings.outline_max_top_level.limit(),
        settings.outline_max_second_level.limit(),
    ) {
        (None, None) => "The outline has exactly two levels: top-level sections and their \
             sub-sections. There is no limit on the number of sections at either level."
            .to_string(),
        (top, second) => {
            let cap = |c: Option<usize>| c.map_or("any number of".to_string(), |n| n.to_string());
            format!(
                "The outline has exactly two levels. It must not exceed {} top-level sections, \
                 and each top-level section must not exceed {} sub-sections.",
                cap(top),
                cap(second)
            )
        }
    }
}

/// Enforce the caps and the two-level depth in place. Returns how many
/// nodes were removed.
pub fn enforce_outline(nodes: &mut Vec<OutlineNode>, settings: &ModeSettings) -> usize {
    let mut removed = 0;

    if let Some(max) = settings.outline_max_top_level.limit() {
        if nodes.len() > max {
            let extra: usize = nodes[max..].iter().map(subtree_size).sum();
            warn!(
                got = nodes.len(),
                max,
                "Outline exceeds the top-level cap, trimming"
            );
            nodes.truncate(max);
            removed += extra;
        }
    }

    for node in nodes.iter_mut() {
        if let Some(max) = settings.outline_max_second_level.limit() {
            if node.children.len() > max {
                let extra: usize = node.children[max..].iter().map(subtree_size).sum();
                warn!(
                    section = %node.title,
                    got = node.children.len(),
                    max,
                    "Outline section exceeds the second-level cap, trimming"
                );
                node.children.truncate(max);
                removed += extra;
            }
        }
        for child in node.children.iter_mut() {
            if !child.children.is_empty() {
                let extra: usize = child.children.iter().map(subtree_size).sum();
                warn!(section = %child.title, dropped = extra, "Dropping third-level outline nodes");
                child.children.clear();
                removed += extra;
            }
        }
    }

    removed
}

fn subtree_size(node: &OutlineNode) -> usize {
    1 + node.children.iter().map(subtree_size).sum::<usize>()
}

/// `true` when the outline is the single placeholder left by a failed
/// generation.
pub fn is_error_outline(nodes: &[OutlineNode]) -> bool {
    nodes.len() == 1 && nodes[0].is_error
}
