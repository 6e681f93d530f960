//! Editor selections
//!
//! Selections are stored in document-local offsets of the text at the focused
//! path. A selection that no longer fits its text is dropped, never clamped.

use crate::change::{Assoc, ChangeSet};
use serde::{Deserialize, Serialize};

/// One selected range. `anchor == head` is a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRange {
    pub anchor: usize,
    pub head: usize,
}

impl SelectionRange {
    pub fn cursor(pos: usize) -> Self {
        Self { anchor: pos, head: pos }
    }

    pub fn new(anchor: usize, head: usize) -> Self {
        Self { anchor, head }
    }

    pub fn from(&self) -> usize {
        self.anchor.min(self.head)
    }

    pub fn to(&self) -> usize {
        self.anchor.max(self.head)
    }

    pub fn is_empty(&self) -> bool {
        self.anchor == self.head
    }

    fn map(&self, changes: &ChangeSet) -> Option<SelectionRange> {
        if self.is_empty() {
            let pos = changes.map_pos(self.head, Assoc::Before)?;
            return Some(SelectionRange::cursor(pos));
        }
        // Insertions at either edge stay outside the range
        let from = changes.map_pos(self.from(), Assoc::After)?;
        let to = changes.map_pos(self.to(), Assoc::Before)?.max(from);
        if self.anchor <= self.head {
            Some(SelectionRange::new(from, to))
        } else {
            Some(SelectionRange::new(to, from))
        }
    }
}

/// A set of selected ranges with one main range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub ranges: Vec<SelectionRange>,
    #[serde(default)]
    pub main: usize,
}

impl Selection {
    pub fn cursor(pos: usize) -> Self {
        Self::single(SelectionRange::cursor(pos))
    }

    pub fn single(range: SelectionRange) -> Self {
        Self {
            ranges: vec![range],
            main: 0,
        }
    }

    /// True if every range lies within `[0, len]`
    pub fn fits(&self, len: usize) -> bool {
        !self.ranges.is_empty() && self.ranges.iter().all(|r| r.to() <= len)
    }

    /// Map through a change. Returns `None` if any range falls outside the
    /// text the change applies to.
    pub fn map(&self, changes: &ChangeSet) -> Option<Selection> {
        if !self.fits(changes.len_before()) {
            return None;
        }
        let ranges = self
            .ranges
            .iter()
            .map(|range| range.map(changes))
            .collect::<Option<Vec<_>>>()?;
        let mapped = Selection {
            ranges,
            main: self.main,
        };
        mapped.fits(changes.len_after()).then_some(mapped)
    }

    /// Map through a sequence of changes, stopping at the first failure
    pub fn map_all<'a>(&self, changes: impl IntoIterator<Item = &'a ChangeSet>) -> Option<Selection> {
        changes
            .into_iter()
            .try_fold(self.clone(), |selection, change| selection.map(change))
    }
}
