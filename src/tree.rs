//! Persistent series tree: the merged trie over every call stack ever observed
//! for one series, with the value keys that route samples into columns.

use crate::error::StoreError;
use crate::profile::{ProfileTree, ProfileTreeNode, ValueKey};
use crate::series::ColumnSet;
use crate::types::LocationId;

#[derive(Debug)]
pub(crate) struct SeriesTreeNode {
    pub location_id: LocationId,
    /// Stack key of this node: location ids from here to the root, joined with `|`.
    /// Computed once when the node is created and reused for every later append.
    pub location_key: String,
    /// Every value key ever observed through this node.
    pub keys: Vec<ValueKey>,
    pub children: Vec<SeriesTreeNode>,
}

impl SeriesTreeNode {
    fn new(location_id: LocationId, location_key: String) -> Self {
        SeriesTreeNode {
            location_id,
            location_key,
            keys: Vec::new(),
            children: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct SeriesTree {
    pub root: SeriesTreeNode,
}

impl SeriesTree {
    pub fn new() -> Self {
        SeriesTree {
            root: SeriesTreeNode::new(0, "0".to_string()),
        }
    }

    /// Merges an input profile tree into this tree at the given sample index,
    /// writing every touched value into its flat/cumulative column. Value keys
    /// are propagated onto the visited nodes; label payloads are persisted on
    /// first observation of their key.
    pub fn insert(
        &mut self,
        index: usize,
        profile: &ProfileTree,
        columns: &mut ColumnSet,
    ) -> Result<(), StoreError> {
        merge_node(&mut self.root, profile.root(), index, columns)
    }
}

fn merge_node(
    snode: &mut SeriesTreeNode,
    pnode: &ProfileTreeNode,
    index: usize,
    columns: &mut ColumnSet,
) -> Result<(), StoreError> {
    for v in pnode.flat_values() {
        let key = ValueKey::derive(&snode.location_key, v);
        if !snode.keys.contains(&key) {
            snode.keys.push(key.clone());
        }
        columns.set_labels_once(&key, v);
        columns.append_flat(&key, index, v.value);
    }
    for v in pnode.cumulative_values() {
        let key = ValueKey::derive(&snode.location_key, v);
        if !snode.keys.contains(&key) {
            snode.keys.push(key.clone());
        }
        columns.set_labels_once(&key, v);
        columns.append_cumulative(&key, index, v.value);
    }

    for pchild in pnode.children() {
        let pos = match snode
            .children
            .iter()
            .position(|c| c.location_id == pchild.location_id())
        {
            Some(p) => p,
            None => {
                let key = format!("{}|{}", pchild.location_id(), snode.location_key);
                snode
                    .children
                    .push(SeriesTreeNode::new(pchild.location_id(), key));
                snode.children.len() - 1
            }
        };
        merge_node(&mut snode.children[pos], pchild, index, columns)?;
    }
    Ok(())
}
