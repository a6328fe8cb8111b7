//! Consumer-side draining of worker results and chunked library submission.

use std::collections::{HashSet, VecDeque};
use std::ops::Range;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};

use image::DynamicImage;
use log::{debug, trace};

use crate::protocol::{ArtworkIdentity, ArtworkJob, ArtworkResult, ArtworkTarget};

/// Library rows as seen by the artwork pipeline.
pub trait LibraryArtworkView {
    fn row_count(&self) -> usize;
    /// Identity currently displayed at `row`, if the row exists.
    fn row_identity(&self, row: usize) -> Option<ArtworkIdentity>;
    /// Whether the row still shows the default icon.
    fn row_shows_placeholder(&self, row: usize) -> bool;
    fn set_row_image(&mut self, row: usize, image: &DynamicImage);
}

/// Non-blocking reader of the worker's result queue.
pub struct ResultPump {
    results: Receiver<ArtworkResult>,
    batch_size: usize,
    disconnected: bool,
}

impl ResultPump {
    pub fn new(results: Receiver<ArtworkResult>, batch_size: usize) -> Self {
        Self {
            results,
            batch_size: batch_size.max(1),
            disconnected: false,
        }
    }

    /// Set once the worker has gone away and every result has been read.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Takes at most one batch of available results without blocking.
    pub fn drain_batch(&mut self) -> Vec<ArtworkResult> {
        let mut batch = Vec::new();
        while batch.len() < self.batch_size {
            match self.results.try_recv() {
                Ok(result) => batch.push(result),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected {
                        debug!("ResultPump: Worker disconnected");
                    }
                    self.disconnected = true;
                    break;
                }
            }
        }
        if !batch.is_empty() {
            trace!("ResultPump: Drained {} result(s)", batch.len());
        }
        batch
    }

    /// Applies every library-row target of `result` that still displays its identity.
    ///
    /// Returns the number of rows updated; stale targets are dropped silently.
    pub fn apply_library_targets(
        view: &mut dyn LibraryArtworkView,
        result: &ArtworkResult,
    ) -> usize {
        let mut applied = 0;
        for target in &result.targets {
            let ArtworkTarget::LibraryRow(row) = *target else {
                continue;
            };
            if apply_to_library_row(view, row, &result.identity, &result.image) {
                applied += 1;
            } else {
                debug!(
                    "ResultPump: Dropping stale result for row {} ({})",
                    row,
                    result.identity.label()
                );
            }
        }
        applied
    }
}

/// Sets `image` on `row` only when the row still shows `identity`.
pub fn apply_to_library_row(
    view: &mut dyn LibraryArtworkView,
    row: usize,
    identity: &ArtworkIdentity,
    image: &DynamicImage,
) -> bool {
    let still_displayed = view
        .row_identity(row)
        .is_some_and(|displayed| displayed.matches_display(identity));
    if still_displayed {
        view.set_row_image(row, image);
    }
    still_displayed
}

/// Applies `image` to every row showing the same artist and album.
pub fn refresh_matching_rows(
    view: &mut dyn LibraryArtworkView,
    identity: &ArtworkIdentity,
    image: &DynamicImage,
) -> usize {
    if identity.artist.is_none() && identity.album.is_none() {
        return 0;
    }
    let mut updated = 0;
    for row in 0..view.row_count() {
        if apply_to_library_row(view, row, identity, image) {
            updated += 1;
        }
    }
    updated
}

/// Library rows waiting to be submitted to the worker, one chunk per turn.
#[derive(Debug, Clone)]
pub struct LibrarySubmission {
    rows: VecDeque<usize>,
    chunk: usize,
}

impl LibrarySubmission {
    /// Queues the visible rows first, followed by the rest of the library.
    pub fn new(row_count: usize, visible: Range<usize>, chunk: usize) -> Self {
        let visible = visible.start.min(row_count)..visible.end.min(row_count);
        let mut seen = HashSet::new();
        let rows = visible
            .chain(0..row_count)
            .filter(|row| seen.insert(*row))
            .collect();
        Self {
            rows,
            chunk: chunk.max(1),
        }
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    pub fn is_finished(&self) -> bool {
        self.rows.is_empty()
    }

    /// Handles up to one chunk of rows that still show the default icon.
    ///
    /// Rows `cached` can serve are updated in place; the rest become worker
    /// jobs. Returns the number of jobs sent.
    pub fn advance(
        &mut self,
        view: &mut dyn LibraryArtworkView,
        cached: &mut dyn FnMut(&ArtworkIdentity) -> Result<Option<DynamicImage>, String>,
        jobs: &Sender<ArtworkJob>,
    ) -> Result<usize, String> {
        let mut submitted = 0;
        for _ in 0..self.chunk {
            let Some(row) = self.rows.pop_front() else {
                break;
            };
            if !view.row_shows_placeholder(row) {
                continue;
            }
            let Some(identity) = view.row_identity(row) else {
                continue;
            };
            if let Some(image) = cached(&identity)? {
                view.set_row_image(row, &image);
                continue;
            }
            jobs.send(ArtworkJob {
                identity,
                target: ArtworkTarget::LibraryRow(row),
            })
            .map_err(|_| "artwork worker is not running".to_string())?;
            submitted += 1;
        }
        Ok(submitted)
    }
}
