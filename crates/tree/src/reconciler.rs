//! Pure transitions over the authoritative, pre-ordered span list.
//!
//! Every operation takes a snapshot and returns a new list; callers publish
//! the result atomically through the cache, so readers never observe a
//! partially applied change.

use std::collections::HashSet;

use waterfall_core::error::{Result, WaterfallError};
use waterfall_core::model::{ChildStatus, SpanInfo};

/// Position of `span_id`, trusting `hint` only while it still points at it.
pub fn locate(list: &[SpanInfo], hint: Option<usize>, span_id: &str) -> Result<usize> {
    if let Some(idx) = hint
        && list.get(idx).is_some_and(|s| s.span_id == span_id)
    {
        return Ok(idx);
    }
    list.iter()
        .position(|s| s.span_id == span_id)
        .ok_or_else(|| WaterfallError::StaleReconciliation(span_id.to_string()))
}

/// End (exclusive) of the contiguous descendant run following `idx`.
pub fn subtree_end(list: &[SpanInfo], idx: usize) -> usize {
    let level = list[idx].level;
    list[idx + 1..]
        .iter()
        .position(|s| s.level <= level)
        .map_or(list.len(), |offset| idx + 1 + offset)
}

/// Whether the node at `idx` has children spliced in after it.
pub fn has_loaded_children(list: &[SpanInfo], idx: usize) -> bool {
    list.get(idx + 1)
        .is_some_and(|next| next.parent_span_id.as_deref() == Some(list[idx].span_id.as_str()))
}

pub fn mark_loading(list: &[SpanInfo], span_id: &str) -> Result<Vec<SpanInfo>> {
    let idx = locate(list, None, span_id)?;
    let mut next = list.to_vec();
    if next[idx].child_status == ChildStatus::RemoteChildren {
        next[idx].child_status = ChildStatus::LoadingChildren;
    }
    Ok(next)
}

/// Inserts a fetched batch of children right after their parent.
///
/// Spans already present are dropped from the batch. The parent shows its
/// children unless the user collapsed it while the fetch was in flight.
pub fn splice_children(
    list: &[SpanInfo],
    parent_id: &str,
    batch: Vec<SpanInfo>,
) -> Result<Vec<SpanInfo>> {
    let present: HashSet<&str> = list.iter().map(|s| s.span_id.as_str()).collect();
    let mut fresh: Vec<SpanInfo> = batch
        .into_iter()
        .filter(|s| !present.contains(s.span_id.as_str()))
        .collect();
    let fresh_count = fresh.len();

    let mut out = Vec::with_capacity(list.len() + fresh_count);
    let mut found = false;
    for (idx, span) in list.iter().enumerate() {
        if found || span.span_id != parent_id {
            out.push(span.clone());
            continue;
        }
        found = true;

        let loaded_before = list[idx + 1..]
            .iter()
            .take_while(|s| s.level > span.level)
            .filter(|s| s.parent_span_id.as_deref() == Some(parent_id))
            .count();
        let mut parent = span.clone();
        parent.child_status = merged_status(span.child_status, loaded_before + fresh_count);
        if parent.child_count.is_none() {
            parent.child_count = Some((loaded_before + fresh_count) as u64);
        }
        out.push(parent);
        out.append(&mut fresh);
    }

    if !found {
        return Err(WaterfallError::StaleReconciliation(parent_id.to_string()));
    }
    Ok(out)
}

fn merged_status(current: ChildStatus, loaded: usize) -> ChildStatus {
    match (current, loaded) {
        (ChildStatus::HideChildren, 0) => ChildStatus::NoChildren,
        (ChildStatus::HideChildren, _) => ChildStatus::HideChildren,
        (_, 0) => ChildStatus::NoChildren,
        _ => ChildStatus::ShowChildren,
    }
}

/// Hides a node's children. Every descendant that has or may have children
/// is hidden too, so re-expanding the node shows one level only.
pub fn collapse(list: &[SpanInfo], span_id: &str) -> Result<Vec<SpanInfo>> {
    let idx = locate(list, None, span_id)?;
    let end = subtree_end(list, idx);
    let mut next = list.to_vec();

    if matches!(
        next[idx].child_status,
        ChildStatus::ShowChildren | ChildStatus::LoadingChildren
    ) {
        next[idx].child_status = ChildStatus::HideChildren;
    }
    for span in &mut next[idx + 1..end] {
        if span.child_status != ChildStatus::NoChildren {
            span.child_status = ChildStatus::HideChildren;
        }
    }
    Ok(next)
}

/// Shows already fetched children again; never triggers a fetch.
pub fn expand(list: &[SpanInfo], span_id: &str) -> Result<Vec<SpanInfo>> {
    let idx = locate(list, None, span_id)?;
    let mut next = list.to_vec();
    if next[idx].child_status == ChildStatus::HideChildren {
        next[idx].child_status = if has_loaded_children(list, idx) {
            ChildStatus::ShowChildren
        } else {
            ChildStatus::RemoteChildren
        };
    }
    Ok(next)
}

/// Folds a freshly loaded list of roots and their first children into the
/// current one. Known spans keep their position and state; children the
/// current list lacks are spliced under their root and unknown roots are
/// appended with their children.
pub fn merge_reload(list: &[SpanInfo], reloaded: &[SpanInfo]) -> Result<Vec<SpanInfo>> {
    let mut out = list.to_vec();
    let mut idx = 0;
    while idx < reloaded.len() {
        let root = &reloaded[idx];
        let end = subtree_end(reloaded, idx);
        if out.iter().any(|s| s.span_id == root.span_id) {
            out = splice_children(&out, &root.span_id, reloaded[idx + 1..end].to_vec())?;
        } else {
            out.extend_from_slice(&reloaded[idx..end]);
        }
        idx = end;
    }
    Ok(out)
}

/// Failure path of a load: a node without loaded children becomes
/// retryable again.
pub fn revert_loading(list: &[SpanInfo], span_id: &str) -> Result<Vec<SpanInfo>> {
    let idx = locate(list, None, span_id)?;
    let mut next = list.to_vec();
    if matches!(
        next[idx].child_status,
        ChildStatus::LoadingChildren | ChildStatus::HideChildren
    ) && !has_loaded_children(list, idx)
    {
        next[idx].child_status = ChildStatus::RemoteChildren;
    }
    Ok(next)
}
