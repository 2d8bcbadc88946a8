//! Visibility filter for merged record streams.
//!
//! [`VisibilityFilter`] wraps a `(key ASC, LSN DESC)` record stream and
//! yields only the key-value pairs **live at a given LSN horizon**:
//!
//! - Versions above the horizon are ignored entirely.
//! - Of the remaining versions, the newest one per key decides: a put is a
//!   candidate, a tombstone hides the key.
//! - A surviving put is finally checked against the collection delete table —
//!   a collection deleted at `d ≤ horizon` hides every version written
//!   strictly before `d`.
//!
//! The input iterator **must** be sorted by `(key ASC, LSN DESC)` — the order
//! produced by [`MergeIterator`](super::utils::MergeIterator).

use std::sync::Arc;

use super::utils::Record;
use crate::hotspot::HotspotManager;

/// Filters a sorted record stream to the pairs visible at one horizon.
pub struct VisibilityFilter<I>
where
    I: Iterator<Item = Record>,
{
    /// Underlying merged record stream.
    input: I,

    /// LSN horizon of this read ([`u64::MAX`] for latest-state).
    visible_lsn: u64,

    /// Collection delete predicate.
    hotspot: Arc<HotspotManager>,

    /// The key most recently decided (emitted or suppressed).
    current_key: Option<Vec<u8>>,
}

impl<I> VisibilityFilter<I>
where
    I: Iterator<Item = Record>,
{
    pub fn new(input: I, visible_lsn: u64, hotspot: Arc<HotspotManager>) -> Self {
        Self {
            input,
            visible_lsn,
            hotspot,
            current_key: None,
        }
    }
}

impl<I> Iterator for VisibilityFilter<I>
where
    I: Iterator<Item = Record>,
{
    type Item = (Vec<u8>, Vec<u8>); // (key, value)

    fn next(&mut self) -> Option<Self::Item> {
        for record in self.input.by_ref() {
            // Invisible to this horizon; does not claim the key, an older
            // version may still be the newest visible one.
            if record.lsn() > self.visible_lsn {
                continue;
            }

            // The newest visible version of each key decides the key's fate;
            // later (older) versions of a decided key are skipped.
            if self.current_key.as_deref() == Some(record.key().as_slice()) {
                continue;
            }

            match record {
                Record::Delete { key, .. } => {
                    self.current_key = Some(key);
                }

                Record::Put {
                    key, value, lsn, ..
                } => {
                    self.current_key = Some(key.clone());

                    let collection = self.hotspot.extract_collection(&key);
                    if self
                        .hotspot
                        .is_collection_deleted(collection, self.visible_lsn, lsn)
                    {
                        // Hidden by a collection delete. Older versions have
                        // lower LSNs and are hidden by the same delete, so
                        // the whole key is settled.
                        continue;
                    }

                    return Some((key, value));
                }
            }
        }

        None
    }
}
