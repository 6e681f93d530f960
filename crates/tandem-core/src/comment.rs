//! Comments anchored into document text

use crate::change::{Assoc, ChangeSet};
use crate::path::is_same_or_descendant;
use serde::{Deserialize, Deserializer, Serialize};

/// A `[from, to)` range in the text at a comment's path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub from: usize,
    pub to: usize,
}

impl TextRange {
    pub fn new(from: usize, to: usize) -> Self {
        Self { from, to }
    }

    /// Map through a change. Empty or out-of-bounds results unanchor the range.
    pub fn map(&self, changes: &ChangeSet) -> Option<TextRange> {
        if self.from >= self.to || self.to > changes.len_before() {
            return None;
        }
        let from = changes.map_pos(self.from, Assoc::After)?;
        let to = changes.map_pos(self.to, Assoc::Before)?;
        (from < to && to <= changes.len_after()).then_some(TextRange { from, to })
    }
}

/// A comment anchored to the text at `path`. `text_range` is `None` once
/// the anchored text is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub text_range: Option<TextRange>,
}

/// A partial comment record. Absent fields are left untouched; an explicit
/// `null` text range unanchors the comment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentPatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub text_range: Option<Option<TextRange>>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// All comments known to a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentStore {
    comments: Vec<Comment>,
}

impl CommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> &[Comment] {
        &self.comments
    }

    pub fn get(&self, id: &str) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == id)
    }

    pub fn replace_all(&mut self, comments: Vec<Comment>) {
        self.comments = comments;
    }

    pub fn upsert(&mut self, comment: Comment) {
        match self.comments.iter_mut().find(|c| c.id == comment.id) {
            Some(existing) => *existing = comment,
            None => self.comments.push(comment),
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Comment> {
        let idx = self.comments.iter().position(|c| c.id == id)?;
        Some(self.comments.remove(idx))
    }

    /// Rebase every range anchored at exactly `path`. Returns true if any
    /// comment was touched.
    pub fn map_path(&mut self, path: &str, changes: &ChangeSet) -> bool {
        let mut touched = false;
        for comment in self.comments.iter_mut().filter(|c| c.path == path) {
            if let Some(range) = comment.text_range {
                comment.text_range = range.map(changes);
                touched = true;
            }
        }
        touched
    }

    /// Unanchor every comment at or below `path`
    pub fn unanchor_subtree(&mut self, path: &str) -> bool {
        let mut touched = false;
        for comment in self
            .comments
            .iter_mut()
            .filter(|c| is_same_or_descendant(&c.path, path))
        {
            if comment.text_range.take().is_some() {
                touched = true;
            }
        }
        touched
    }

    /// Merge partial records. Patches for unknown ids with a path create a
    /// comment; others are ignored.
    pub fn apply_patches(&mut self, patches: &[CommentPatch]) -> bool {
        let mut touched = false;
        for patch in patches {
            match self.comments.iter_mut().find(|c| c.id == patch.id) {
                Some(comment) => {
                    if let Some(path) = &patch.path {
                        comment.path = path.clone();
                    }
                    if let Some(range) = patch.text_range {
                        comment.text_range = range;
                    }
                    touched = true;
                }
                None => {
                    if let Some(path) = &patch.path {
                        self.comments.push(Comment {
                            id: patch.id.clone(),
                            path: path.clone(),
                            text_range: patch.text_range.flatten(),
                        });
                        touched = true;
                    }
                }
            }
        }
        touched
    }
}
