//! Include paths: expansion, default includes, and the eager-load plan.

mod loader;

pub use loader::{load, Node, Related};

use crate::config::{RelationDescriptor, ResolvedModel, ResolvedResource};
use crate::error::AppError;
use std::collections::BTreeMap;

/// One eager load, nested under the load of its parent path.
#[derive(Clone, Debug)]
pub struct IncludeNode {
    /// Name as requested. Used as the relationship key in documents.
    pub key: String,
    pub relation: RelationDescriptor,
    /// Whether the load is bounded by the parents' keys.
    pub constrained: bool,
    pub children: Vec<IncludeNode>,
}

/// Requested paths with every parent path made explicit, then the defaults,
/// keeping the first occurrence of each.
pub fn requested_paths(requested: &[String], defaults: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for path in requested.iter().chain(defaults) {
        let mut prefix = String::new();
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(segment);
            if !out.contains(&prefix) {
                out.push(prefix.clone());
            }
        }
    }
    out
}

/// Constraint flag per path.
///
/// Paged listings keep every constraint. Unbounded listings drop it for each path as it
/// is registered, but registering `a.b` re-registers `a` with the plain constrained load,
/// so a path that is a prefix of a later one ends up constrained. Known limitation.
pub fn constraint_plan(paths: &[String], unbounded: bool) -> BTreeMap<String, bool> {
    let mut plan = BTreeMap::new();
    for path in paths {
        let segments: Vec<&str> = path.split('.').collect();
        for depth in 1..segments.len() {
            plan.insert(segments[..depth].join("."), true);
        }
        plan.insert(path.clone(), !unbounded);
    }
    plan
}

/// Build the eager-load tree for `resource`. Unknown include names are rejected.
pub fn plan(
    model: &ResolvedModel,
    resource: &ResolvedResource,
    requested: &[String],
    unbounded: bool,
) -> Result<Vec<IncludeNode>, AppError> {
    let paths = requested_paths(requested, &resource.default_includes);
    let constraints = constraint_plan(&paths, unbounded);
    let mut roots = Vec::new();
    for path in &paths {
        let segments: Vec<&str> = path.split('.').collect();
        insert_path(model, resource, &mut roots, &segments, path, &constraints)?;
    }
    tracing::debug!(resource = %resource.type_name, paths = ?paths, unbounded, "include plan");
    Ok(roots)
}

fn insert_path(
    model: &ResolvedModel,
    resource: &ResolvedResource,
    nodes: &mut Vec<IncludeNode>,
    segments: &[&str],
    full_path: &str,
    constraints: &BTreeMap<String, bool>,
) -> Result<(), AppError> {
    let Some((key, rest)) = segments.split_first() else {
        return Ok(());
    };
    let position = match nodes.iter().position(|n| n.key == *key) {
        Some(i) => i,
        None => {
            let relation_name = resource
                .include_map
                .get(*key)
                .map(String::as_str)
                .unwrap_or(*key);
            let relation = resource
                .relation(relation_name)
                .ok_or_else(|| AppError::InvalidRequest(format!("Can not include {}", full_path)))?;
            let depth = full_path.split('.').count() - rest.len();
            let path: Vec<&str> = full_path.split('.').take(depth).collect();
            nodes.push(IncludeNode {
                key: key.to_string(),
                relation: relation.clone(),
                constrained: constraints.get(&path.join(".")).copied().unwrap_or(true),
                children: Vec::new(),
            });
            nodes.len() - 1
        }
    };
    if rest.is_empty() {
        return Ok(());
    }
    let target = model.target_of(&nodes[position].relation)?;
    insert_path(model, target, &mut nodes[position].children, rest, full_path, constraints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve};

    fn model() -> ResolvedModel {
        resolve(&parse_config(include_str!("../../tests/fixtures/billing.json")).unwrap()).unwrap()
    }

    fn strings(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parents_are_expanded_and_defaults_appended() {
        let paths = requested_paths(&strings(&["lines.invoice", "lines"]), &strings(&["account"]));
        assert_eq!(paths, strings(&["lines", "lines.invoice", "account"]));
    }

    #[test]
    fn nested_prefix_keeps_its_constraint_when_unbounded() {
        let plan = constraint_plan(&strings(&["account", "account.owner"]), true);
        assert_eq!(plan.get("account"), Some(&true));
        assert_eq!(plan.get("account.owner"), Some(&false));

        let paged = constraint_plan(&strings(&["account", "account.owner"]), false);
        assert!(paged.values().all(|c| *c));
    }

    #[test]
    fn include_map_applies_per_segment() {
        let model = model();
        let invoice = model.resource_by_type("invoice").unwrap();
        let tree = plan(&model, invoice, &strings(&["account.holder"]), false).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].key, "account");
        assert_eq!(tree[0].children[0].key, "holder");
        assert_eq!(tree[0].children[0].relation.name, "owner");
    }

    #[test]
    fn unknown_include_is_rejected() {
        let model = model();
        let account = model.resource_by_type("account").unwrap();
        let err = plan(&model, account, &strings(&["invoices.nope"]), false).unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(m) if m == "Can not include invoices.nope"));
    }
}
