//! Rebasing unconfirmed local changes against the server's order
//!
//! The server echoes every text update in its global order. For one path we
//! hold the queue `U` of local changes the server has not confirmed yet and
//! receive a batch `R`. Updates in `R` authored by us confirm the head of `U`
//! positionally; all other updates are foreign and are composed into one net
//! change that is applied to the local text once. Whatever is left in `U` is
//! rebased so it stays valid on top of the new server state.

use crate::change::ChangeSet;
use crate::error::Result;
use tracing::trace;

/// One update of an incoming batch
#[derive(Debug, Clone, Copy)]
pub struct Incoming<'a> {
    pub changes: &'a ChangeSet,
    /// Authored by this client
    pub own: bool,
}

/// Outcome of rebasing one path
#[derive(Debug, Clone, PartialEq)]
pub struct Rebased {
    /// Net foreign change to apply to the local text, if any
    pub remote: Option<ChangeSet>,
    /// Number of local changes the batch confirmed
    pub confirmed: usize,
    /// The remaining unconfirmed changes, rebased onto the server state
    pub unconfirmed: Vec<ChangeSet>,
}

/// Rebase `unconfirmed` against `incoming`.
///
/// Nothing is mutated; on error the caller's queue is untouched.
pub fn rebase<'a>(
    unconfirmed: &[ChangeSet],
    incoming: impl IntoIterator<Item = Incoming<'a>>,
) -> Result<Rebased> {
    let mut own = 0;
    let mut acc: Option<ChangeSet> = None;

    for update in incoming {
        if own < unconfirmed.len() && update.own {
            // The server applied our change after everything in acc, so acc
            // has to move across it to apply to our text
            if let Some(remote) = acc.take() {
                acc = Some(remote.map(&unconfirmed[own], true)?);
            }
            own += 1;
        } else {
            acc = Some(match acc.take() {
                Some(remote) => remote.compose(update.changes)?,
                None => update.changes.clone(),
            });
        }
    }

    let remaining = &unconfirmed[own..];
    let rebased = match acc.as_mut() {
        Some(remote) if !remaining.is_empty() => {
            let mut rebased = Vec::with_capacity(remaining.len());
            for entry in remaining {
                rebased.push(entry.map(remote, false)?);
                *remote = remote.map(entry, true)?;
            }
            rebased
        }
        _ => remaining.to_vec(),
    };

    trace!(
        confirmed = own,
        pending = rebased.len(),
        foreign = acc.is_some(),
        "Rebased unconfirmed changes"
    );
    Ok(Rebased {
        remote: acc,
        confirmed: own,
        unconfirmed: rebased,
    })
}
