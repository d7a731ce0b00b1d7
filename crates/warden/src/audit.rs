//! Import extraction over the guest language's own grammar.
//!
//! A compilation unit's imports are the root path segments of its top-level
//! `use` items plus any `extern crate` names. `crate`, `self` and `super`
//! roots resolve inside the unit itself and are never treated as imports.

use std::{collections::BTreeSet, path::Path};

use syn::{Item, UseTree};

use crate::WardenError;

/// Parses `source` and returns every imported root missing from `allowed`,
/// in source order, duplicates preserved.
pub(crate) fn disallowed_imports(
    path: &Path,
    source: &str,
    allowed: &BTreeSet<String>,
) -> Result<Vec<String>, WardenError> {
    let file = syn::parse_file(source).map_err(|source| WardenError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(import_roots(&file)
        .into_iter()
        .filter(|root| !allowed.contains(root))
        .collect())
}

pub(crate) fn import_roots(file: &syn::File) -> Vec<String> {
    let mut roots = Vec::new();
    for item in &file.items {
        match item {
            Item::Use(item) => collect_use_roots(&item.tree, &mut roots),
            Item::ExternCrate(item) => push_root(item.ident.to_string(), &mut roots),
            _ => {}
        }
    }
    roots
}

fn collect_use_roots(tree: &UseTree, roots: &mut Vec<String>) {
    match tree {
        UseTree::Path(path) => push_root(path.ident.to_string(), roots),
        UseTree::Name(name) => push_root(name.ident.to_string(), roots),
        UseTree::Rename(rename) => push_root(rename.ident.to_string(), roots),
        UseTree::Group(group) => {
            for tree in &group.items {
                collect_use_roots(tree, roots);
            }
        }
        UseTree::Glob(_) => {}
    }
}

fn push_root(root: String, roots: &mut Vec<String>) {
    if root != "crate" && root != "self" && root != "super" {
        roots.push(root);
    }
}
