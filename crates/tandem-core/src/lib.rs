//! Tandem Core - Document Model and Rebase Engine
//!
//! This crate provides the transport-independent part of Tandem:
//! - A path-addressed JSON document tree
//! - Text change sets that compose, map over each other and map positions
//! - Rebasing of unconfirmed local text edits against the server's order
//! - Selections, comments and awareness that follow text edits

pub mod awareness;
pub mod change;
pub mod comment;
pub mod document;
pub mod error;
pub mod path;
pub mod path_state;
pub mod rebase;
pub mod selection;

pub use awareness::{Awareness, AwarenessInfo, ClientInfo};
pub use change::{Assoc, ChangeSet, Op};
pub use comment::{Comment, CommentPatch, CommentStore, TextRange};
pub use document::{Document, SortEntry};
pub use error::{Error, Result};
pub use path::PathSegment;
pub use path_state::{PathState, PathStore};
pub use rebase::{rebase, Incoming, Rebased};
pub use selection::{Selection, SelectionRange};
