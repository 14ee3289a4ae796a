use std::collections::HashMap;

use thiserror::Error;

use super::types::ImportRecord;

/// Non-fatal hierarchy problems surfaced for operator review.
///
/// None of these stop a run: affected records are kept as orphan-roots so the
/// data is still imported and the problem is visible in the result details.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("parent {parent_external_id} of {external_id} is not present in this import")]
    DanglingParent {
        external_id: String,
        parent_external_id: String,
    },
    #[error("cycle detected in parent chain through {external_id}")]
    Cycle { external_id: String },
    #[error("duplicate external id {external_id} in this import; first occurrence wins")]
    DuplicateExternalId { external_id: String },
}

/// One record wired into the resolved forest.
///
/// Parents are arena indexes into [`HierarchyResolution::records`], not
/// database keys: translation to persisted ids happens after the batch writer
/// has produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNode {
    pub record_idx: usize,
    pub parent_idx: Option<usize>,
    pub depth: u32,
}

/// Output of two-pass resolution over one import batch.
#[derive(Debug)]
pub struct HierarchyResolution {
    pub records: Vec<ImportRecord>,
    pub nodes: Vec<ResolvedNode>,
    pub errors: Vec<HierarchyError>,
    roots: Vec<usize>,
    children: Vec<Vec<usize>>,
}

impl HierarchyResolution {
    /// Root indexes, ordered by `(sort_order, external_id)`.
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Children of one node, ordered by `(sort_order, external_id)`.
    pub fn children(&self, idx: usize) -> &[usize] {
        &self.children[idx]
    }

    /// Record indexes in pre-order: every parent before its children, siblings
    /// in deterministic order. This is the processing order for writes.
    pub fn traversal_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.records.len());
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(idx) = stack.pop() {
            order.push(idx);
            for child in self.children[idx].iter().rev() {
                stack.push(*child);
            }
        }
        order
    }
}

/// Resolves string parent references into an in-memory forest.
///
/// Two passes are required: a child may reference a parent that appears later
/// in document order, or never appears at all. Pass 1 indexes every record by
/// external id; pass 2 wires parent links, demoting records with missing
/// parents or cyclic chains to orphan-roots and reporting each problem.
pub fn resolve(records: Vec<ImportRecord>) -> HierarchyResolution {
    let mut errors = Vec::new();

    // Pass 1: index by external id. First occurrence wins a contested slot.
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        if record.external_id.is_empty() {
            continue;
        }
        if index.contains_key(record.external_id.as_str()) {
            errors.push(HierarchyError::DuplicateExternalId {
                external_id: record.external_id.clone(),
            });
        } else {
            index.insert(record.external_id.as_str(), idx);
        }
    }

    // Pass 2: wire parent links.
    let mut parent_of: Vec<Option<usize>> = Vec::with_capacity(records.len());
    for record in &records {
        match &record.parent_external_id {
            None => parent_of.push(None),
            Some(parent_id) => match index.get(parent_id.as_str()) {
                Some(parent_idx) => parent_of.push(Some(*parent_idx)),
                None => {
                    errors.push(HierarchyError::DanglingParent {
                        external_id: record.external_id.clone(),
                        parent_external_id: parent_id.clone(),
                    });
                    parent_of.push(None);
                }
            },
        }
    }

    // A record that is its own ancestor would recurse forever at depth
    // computation; break each cycle at one edge and report it once.
    break_cycles(&records, &mut parent_of, &mut errors);

    let depths = compute_depths(&parent_of);

    let mut roots = Vec::new();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
    for (idx, parent) in parent_of.iter().enumerate() {
        match parent {
            Some(parent_idx) => children[*parent_idx].push(idx),
            None => roots.push(idx),
        }
    }

    let sibling_key = |idx: &usize| {
        let record = &records[*idx];
        (record.sort_order, record.external_id.clone())
    };
    roots.sort_by_key(sibling_key);
    for child_list in &mut children {
        child_list.sort_by_key(sibling_key);
    }

    let nodes = parent_of
        .iter()
        .enumerate()
        .map(|(idx, parent_idx)| ResolvedNode {
            record_idx: idx,
            parent_idx: *parent_idx,
            depth: depths[idx],
        })
        .collect();

    HierarchyResolution {
        records,
        nodes,
        errors,
        roots,
        children,
    }
}

fn break_cycles(
    records: &[ImportRecord],
    parent_of: &mut [Option<usize>],
    errors: &mut Vec<HierarchyError>,
) {
    #[derive(Clone, Copy, PartialEq)]
    enum Visit {
        Unvisited,
        InProgress,
        Done,
    }

    let mut state = vec![Visit::Unvisited; parent_of.len()];

    for start in 0..parent_of.len() {
        if state[start] != Visit::Unvisited {
            continue;
        }

        // Walk the ancestor chain, remembering the path taken.
        let mut path = Vec::new();
        let mut current = start;
        loop {
            match state[current] {
                Visit::Done => break,
                Visit::InProgress => {
                    // `current` was revisited within this walk: the chain from
                    // `current` back to itself is a cycle. Cut it here so the
                    // revisited record becomes an orphan-root.
                    errors.push(HierarchyError::Cycle {
                        external_id: records[current].external_id.clone(),
                    });
                    parent_of[current] = None;
                    break;
                }
                Visit::Unvisited => {
                    state[current] = Visit::InProgress;
                    path.push(current);
                    match parent_of[current] {
                        Some(parent_idx) => current = parent_idx,
                        None => break,
                    }
                }
            }
        }

        for visited in path {
            state[visited] = Visit::Done;
        }
    }
}

fn compute_depths(parent_of: &[Option<usize>]) -> Vec<u32> {
    // Cycles are already broken, so every chain walk terminates. Iterative on
    // purpose: a degenerate single-chain hierarchy must not blow the stack.
    let mut depths: Vec<Option<u32>> = vec![None; parent_of.len()];
    for start in 0..parent_of.len() {
        if depths[start].is_some() {
            continue;
        }

        let mut chain = Vec::new();
        let mut current = start;
        let base = loop {
            if let Some(depth) = depths[current] {
                break depth + 1;
            }
            chain.push(current);
            match parent_of[current] {
                Some(parent_idx) => current = parent_idx,
                None => break 0,
            }
        };

        // `chain` runs child-to-ancestor; assign ancestor-first.
        for (offset, idx) in chain.iter().rev().enumerate() {
            depths[*idx] = Some(base + offset as u32);
        }
    }
    depths.into_iter().map(|depth| depth.unwrap_or(0)).collect()
}
