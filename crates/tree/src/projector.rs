use std::collections::HashSet;

use waterfall_core::model::{ChildStatus, SpanInfo};

/// Indices of the rows to render, in list order.
///
/// A span is hidden when its parent is hidden or collapsed. Because the list
/// is a pre-order flattening, parents are always scanned before their
/// children, so a single pass is enough.
#[derive(Debug, Clone)]
pub struct VisibleRows<'a> {
    list: &'a [SpanInfo],
    pos: usize,
    collapsed: HashSet<&'a str>,
}

pub fn visible_indices(list: &[SpanInfo]) -> VisibleRows<'_> {
    VisibleRows {
        list,
        pos: 0,
        collapsed: HashSet::new(),
    }
}

impl Iterator for VisibleRows<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while let Some(span) = self.list.get(self.pos) {
            let idx = self.pos;
            self.pos += 1;

            let hidden = span
                .parent_span_id
                .as_deref()
                .is_some_and(|parent| self.collapsed.contains(parent));
            if hidden || span.child_status == ChildStatus::HideChildren {
                self.collapsed.insert(span.span_id.as_str());
            }
            if !hidden {
                return Some(idx);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.list.len() - self.pos.min(self.list.len())))
    }
}

/// Materialized row mapping for a virtualized list.
#[derive(Debug, Clone)]
pub struct Projection<'a> {
    list: &'a [SpanInfo],
    rows: Vec<usize>,
}

impl<'a> Projection<'a> {
    pub fn new(list: &'a [SpanInfo]) -> Self {
        Self {
            list,
            rows: visible_indices(list).collect(),
        }
    }

    /// Total number of rows, used to size the scroll area.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Authoritative list index and span of the `row`-th visible row.
    pub fn row(&self, row: usize) -> Option<(usize, &'a SpanInfo)> {
        let idx = *self.rows.get(row)?;
        Some((idx, &self.list[idx]))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &'a SpanInfo)> + '_ {
        self.rows.iter().map(|&idx| (idx, &self.list[idx]))
    }
}
