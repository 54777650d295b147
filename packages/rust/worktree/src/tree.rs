//! Filtered work-tree construction.
//!
//! The upstream listing is flat; each item carries its full ancestor chain.
//! After filtering, an item keeps its parent link only when its immediate
//! parent also survived the filter; otherwise it becomes a root, even when
//! a further ancestor was kept. Losing hierarchy context there is the
//! documented behavior, not a bug to paper over. Enumeration order is
//! preserved so two runs over the same listing produce the same tree.

use std::collections::BTreeMap;

use tracing::{info, instrument};

use wikiharvest_client::{ItemScope, WikiClient};
use wikiharvest_shared::{Item, Result};

use crate::filter::ItemFilter;

/// The filtered, reparented item tree for one run.
#[derive(Debug, Clone, Default)]
pub struct WorkTree {
    /// Kept items by id.
    items: BTreeMap<String, Item>,
    /// Kept item ids in enumeration order.
    order: Vec<String>,
    /// Rewired parent links (kept child id -> kept ancestor id).
    parent_of: BTreeMap<String, String>,
    /// Children per kept parent, in enumeration order.
    children: BTreeMap<String, Vec<String>>,
    /// Root item ids, in enumeration order.
    roots: Vec<String>,
}

impl WorkTree {
    /// Build the tree from a flat enumeration, keeping only items that pass
    /// `filter` and attaching each to its immediate parent when that parent
    /// was also kept.
    pub fn build(enumerated: Vec<Item>, filter: &ItemFilter) -> Self {
        let mut tree = Self::default();

        for item in enumerated {
            if !filter.matches(&item) {
                continue;
            }
            tree.order.push(item.id.clone());
            tree.items.insert(item.id.clone(), item);
        }

        // Second pass: parent links. An item whose immediate parent was
        // filtered out is displayed as a root.
        for id in &tree.order {
            let item = &tree.items[id];
            let parent = item
                .immediate_parent()
                .filter(|p| tree.items.contains_key(*p))
                .map(String::from);

            match parent {
                Some(parent_id) => {
                    tree.children
                        .entry(parent_id.clone())
                        .or_default()
                        .push(id.clone());
                    tree.parent_of.insert(id.clone(), parent_id);
                }
                None => tree.roots.push(id.clone()),
            }
        }

        tree
    }

    /// Number of kept items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up a kept item.
    pub fn get(&self, id: &str) -> Option<&Item> {
        self.items.get(id)
    }

    /// Root item ids in enumeration order.
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Children of `id` in enumeration order.
    pub fn children_of(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Rewired parent of `id`, if it is not a root.
    pub fn parent_of(&self, id: &str) -> Option<&str> {
        self.parent_of.get(id).map(String::as_str)
    }

    /// Kept items in enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.order.iter().map(|id| &self.items[id])
    }

    /// Kept item ids in depth-first pre-order (root subtrees in enumeration
    /// order). The scheduler and the report both walk the tree in this
    /// order so their output is deterministic.
    pub fn preorder(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(self.items.len());
        let mut stack: Vec<&str> = self.roots.iter().rev().map(String::as_str).collect();

        while let Some(id) = stack.pop() {
            out.push(id);
            for child in self.children_of(id).iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Depth of `id` in the rewired tree (roots are 0).
    pub fn depth(&self, id: &str) -> usize {
        let mut depth = 0;
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// Titles of `id`'s surviving ancestors, root first. Used to place
    /// exported files in a directory hierarchy.
    pub fn ancestor_titles(&self, id: &str) -> Vec<&str> {
        let mut titles = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            titles.push(self.items[parent].title.as_str());
            current = parent;
        }
        titles.reverse();
        titles
    }
}

/// Enumerate `scope` through `client`, filter, and build the tree.
///
/// Returns the tree and the total number of items enumerated before
/// filtering. Enumeration is all-or-nothing; any listing failure aborts.
#[instrument(skip_all, fields(scope = %scope))]
pub async fn build_work_tree(
    client: &WikiClient,
    scope: &ItemScope,
    filter: &ItemFilter,
) -> Result<(WorkTree, usize)> {
    let enumerated = client.list_items(scope).await?;
    let total = enumerated.len();

    let tree = WorkTree::build(enumerated, filter);
    info!(
        enumerated = total,
        kept = tree.len(),
        roots = tree.roots().len(),
        "work tree built"
    );

    Ok((tree, total))
}
