//! Matcher sessions: lazy, ordered streams of matching block numbers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::future::join_all;
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use bloombits_core::types::FragmentId;

use crate::error::{MatchError, RetrievalError};
use crate::matcher::{Direction, Matcher};
use crate::scheduler::{Scheduler, SessionId};

/// One query over one block range.
///
/// Sections are evaluated one at a time in traversal order, only when the
/// buffered results of the previous one are used up. Dropping or closing the
/// session releases its pending scheduler requests.
pub struct MatcherSession {
    id: SessionId,
    matcher: Matcher,
    scheduler: Arc<Scheduler>,
    cancel: CancellationToken,
    direction: Direction,
    start: u64,
    end: u64,
    /// Next section to evaluate; `None` once the range is exhausted.
    cursor: Option<u64>,
    buffer: VecDeque<u64>,
    done: bool,
}

impl MatcherSession {
    pub(crate) fn new(
        matcher: Matcher,
        scheduler: Arc<Scheduler>,
        cancel: CancellationToken,
        start: u64,
        end: u64,
        direction: Direction,
    ) -> Self {
        let size = matcher.section_size();
        let cursor = match direction {
            Direction::Ascending => start / size,
            Direction::Descending => end / size,
        };
        Self {
            id: scheduler.new_session(),
            matcher,
            scheduler,
            cancel,
            direction,
            start,
            end,
            cursor: Some(cursor),
            buffer: VecDeque::new(),
            done: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The next matching block number, `Ok(None)` when the range is exhausted
    /// or the session was cancelled.
    pub async fn next(&mut self) -> Result<Option<u64>, MatchError> {
        loop {
            if self.cancel.is_cancelled() {
                self.finish();
                return Ok(None);
            }
            if let Some(block) = self.buffer.pop_front() {
                return Ok(Some(block));
            }
            if self.done {
                return Ok(None);
            }
            let Some(section) = self.advance() else {
                self.finish();
                return Ok(None);
            };
            match self.evaluate_section(section).await {
                Ok(Some(blocks)) => self.buffer.extend(blocks),
                Ok(None) => {
                    self.finish();
                    return Ok(None);
                }
                Err(source) => {
                    let at_block = self.first_block_in_range(section);
                    debug!(session = ?self.id, section, at_block, error = %source, "session incomplete");
                    self.finish();
                    return Err(MatchError::Incomplete { at_block, source });
                }
            }
        }
    }

    /// Stop evaluation and release pending scheduler requests.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.finish();
    }

    /// Adapt the session into a `Stream`; the stream ends after an error.
    pub fn into_stream(self) -> impl Stream<Item = Result<u64, MatchError>> {
        futures::stream::unfold(self, |mut session| async move {
            match session.next().await {
                Ok(Some(block)) => Some((Ok(block), session)),
                Ok(None) => None,
                Err(e) => Some((Err(e), session)),
            }
        })
    }

    fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.buffer.clear();
            self.scheduler.release(self.id);
        }
    }

    /// Take the cursor section and move it one step in traversal order.
    fn advance(&mut self) -> Option<u64> {
        let section = self.cursor?;
        let size = self.matcher.section_size();
        self.cursor = match self.direction {
            Direction::Ascending => (section < self.end / size).then_some(section + 1),
            Direction::Descending => (section > self.start / size).then(|| section - 1),
        };
        Some(section)
    }

    /// In-range offsets of `section`.
    fn offsets(&self, section: u64) -> (u64, u64) {
        let size = self.matcher.section_size();
        let first = section * size;
        let lo = self.start.saturating_sub(first);
        let hi = (self.end - first).min(size - 1);
        (lo, hi)
    }

    fn first_block_in_range(&self, section: u64) -> u64 {
        let first = section * self.matcher.section_size();
        let (lo, hi) = self.offsets(section);
        match self.direction {
            Direction::Ascending => first + lo,
            Direction::Descending => first + hi,
        }
    }

    /// Fetch and combine the planes of one section. `Ok(None)` means cancelled.
    async fn evaluate_section(&self, section: u64) -> Result<Option<Vec<u64>>, RetrievalError> {
        let (lo, hi) = self.offsets(section);
        let ids: Vec<FragmentId> = self
            .matcher
            .required_bits()
            .iter()
            .map(|&bit| FragmentId::new(bit, section))
            .collect();

        let receivers = self.scheduler.request_all(self.id, &ids);
        let results = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(None),
            results = join_all(receivers) => results,
        };

        let mut planes = HashMap::with_capacity(ids.len());
        for (id, result) in ids.iter().zip(results) {
            let plane = result.map_err(|_| RetrievalError::Closed)??;
            planes.insert(id.bit, plane);
        }
        let vector = self.matcher.evaluate(&planes).ok_or_else(|| {
            RetrievalError::Backend(format!("malformed fragments for section {section}"))
        })?;
        let blocks = self
            .matcher
            .matching_blocks(section, &vector, lo, hi, self.direction);
        debug!(session = ?self.id, section, fragments = ids.len(), matches = blocks.len(), "section evaluated");
        Ok(Some(blocks))
    }
}

impl Drop for MatcherSession {
    fn drop(&mut self) {
        self.finish();
    }
}
