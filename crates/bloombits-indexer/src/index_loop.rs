//! The section index loop.
//!
//! A single task owns all indexing state and reacts to chain events:
//!
//! # New head
//! Compute the confirmed section count. While sections are missing, build the
//! next one: read its headers, check parent linkage against the previous
//! section head, feed the processor, then write the processor's output, the
//! section checkpoint and the new count in one batch.
//!
//! # Reorg
//! Sections ending after the common ancestor lose their checkpoints and the
//! count drops in one batch. A build in flight over the replaced blocks is
//! dropped and restarted from the new canonical chain.
//!
//! # Failure
//! Storage errors, missing headers and broken linkage leave the section
//! unstored. The loop logs, marks itself stalled and retries on the next head.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bloombits_core::chain::{ChainEvent, ChainReader};
use bloombits_core::checkpoint::CheckpointManager;
use bloombits_core::cursor::SectionCursor;
use bloombits_core::error::IndexerError;
use bloombits_core::indexer::{IndexStatus, IndexerConfig, IndexerState};
use bloombits_core::processor::SectionProcessor;
use bloombits_core::reorg::Invalidation;
use bloombits_core::store::{KeyValueStore, WriteBatch};
use bloombits_core::types::BlockHash;

type SharedProcessor = Arc<Mutex<Box<dyn SectionProcessor>>>;

/// A configured, not yet running section indexer.
pub struct ChainIndexer {
    config: IndexerConfig,
    store: Arc<dyn KeyValueStore>,
    chain: Arc<dyn ChainReader>,
    processor: Box<dyn SectionProcessor>,
}

impl ChainIndexer {
    pub(crate) fn new(
        config: IndexerConfig,
        store: Arc<dyn KeyValueStore>,
        chain: Arc<dyn ChainReader>,
        processor: Box<dyn SectionProcessor>,
    ) -> Self {
        Self {
            config,
            store,
            chain,
            processor,
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Spawn the index loop on the current tokio runtime.
    pub fn start(self) -> IndexerHandle {
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(IndexStatus::idle());
        // Subscribe before spawning so no event between here and the first poll is lost.
        let events = self.chain.subscribe();

        info!(
            processor = self.processor.name(),
            namespace = %self.config.namespace,
            section_size = self.config.section_size,
            confirmation_depth = self.config.confirmation_depth,
            "starting section indexer"
        );

        let index_loop = IndexLoop {
            cursor: self.config.cursor(),
            throttling: self.config.throttling(),
            checkpoints: CheckpointManager::new(self.store, self.config.namespace.into_bytes()),
            chain: self.chain,
            processor: Arc::new(Mutex::new(self.processor)),
            status: status_tx,
            cancel: cancel.clone(),
            stored: 0,
            last_head: None,
            known: 0,
            chain_head: None,
            stalled: false,
            needs_verify: true,
            throttle_next: false,
            stopping: false,
        };
        let task = tokio::spawn(index_loop.run(events));

        IndexerHandle {
            status: status_rx,
            cancel,
            task: std::sync::Mutex::new(Some(task)),
            section_size: self.config.section_size,
        }
    }
}

/// Handle to a running indexer: status queries and shutdown.
pub struct IndexerHandle {
    status: watch::Receiver<IndexStatus>,
    cancel: CancellationToken,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
    section_size: u64,
}

impl IndexerHandle {
    /// `(stored sections, last indexed block, head hash of the last stored section)`.
    pub fn sections(&self) -> (u64, Option<u64>, Option<BlockHash>) {
        let status = self.status.borrow();
        (
            status.stored_sections,
            status.last_indexed_block(self.section_size),
            status.last_section_head,
        )
    }

    /// The latest published status.
    pub fn status(&self) -> IndexStatus {
        self.status.borrow().clone()
    }

    /// Wait until the published status satisfies `pred`.
    ///
    /// Returns the matching status, or the last one seen if the indexer stopped first.
    pub async fn wait_for(&self, mut pred: impl FnMut(&IndexStatus) -> bool) -> IndexStatus {
        let mut rx = self.status.clone();
        loop {
            {
                let status = rx.borrow_and_update();
                if pred(&status) {
                    return status.clone();
                }
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    /// Stop intake of chain events, drop any in-flight build and wait for the loop to exit.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "index loop task failed");
            }
        }
    }
}

impl Drop for IndexerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ─── Loop internals ───────────────────────────────────────────────────────────

/// Output of a finished, not yet written section build.
struct SectionBuild {
    section: u64,
    head: BlockHash,
    batch: WriteBatch,
}

struct InFlight {
    section: u64,
    future: BoxFuture<'static, Result<SectionBuild, IndexerError>>,
}

struct IndexLoop {
    cursor: SectionCursor,
    throttling: Duration,
    checkpoints: CheckpointManager,
    chain: Arc<dyn ChainReader>,
    processor: SharedProcessor,
    status: watch::Sender<IndexStatus>,
    cancel: CancellationToken,
    /// Number of stored sections.
    stored: u64,
    /// Head hash of section `stored - 1`.
    last_head: Option<BlockHash>,
    /// Sections confirmed by the latest head.
    known: u64,
    chain_head: Option<u64>,
    stalled: bool,
    /// The last stored section head must be checked against the canonical chain.
    needs_verify: bool,
    throttle_next: bool,
    stopping: bool,
}

impl IndexLoop {
    async fn run(mut self, mut events: broadcast::Receiver<ChainEvent>) {
        match self.chain.current_head().await {
            Ok(head) => self.observe_head(head.map(|h| h.number)),
            Err(e) => {
                warn!(error = %e, "failed to read chain head on startup");
                self.stalled = true;
            }
        }

        let mut build: Option<InFlight> = None;
        let mut events_open = true;

        loop {
            if build.is_none() && !self.stalled && self.needs_verify {
                match self.verify_last_head().await {
                    Ok(()) => self.needs_verify = false,
                    Err(e) => self.fail(None, e),
                }
            }
            if build.is_none() {
                build = self.next_build();
            }
            self.publish();

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                event = events.recv(), if events_open => match event {
                    Ok(ChainEvent::NewHead(head)) => {
                        self.stalled = false;
                        self.observe_head(Some(head.number));
                    }
                    Ok(ChainEvent::Reorg { common_ancestor, new_head }) => {
                        self.stalled = false;
                        self.observe_head(Some(new_head.number));
                        self.handle_reorg(common_ancestor, &mut build).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "chain events lagged, re-reading head");
                        self.stalled = false;
                        self.needs_verify = true;
                        if build.take().is_some() {
                            debug!("in-flight build dropped after lag");
                        }
                        match self.chain.current_head().await {
                            Ok(head) => self.observe_head(head.map(|h| h.number)),
                            Err(e) => self.fail(None, e),
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("chain event stream closed");
                        events_open = false;
                    }
                },

                Some(result) = poll_build(&mut build) => {
                    let section = build.take().map(|b| b.section);
                    match result {
                        Ok(done) => {
                            if let Err(e) = self.write_section(done).await {
                                self.fail(section, e);
                            }
                        }
                        Err(e) => self.fail(section, e),
                    }
                }
            }
        }

        self.stopping = true;
        self.publish();
        if let Some(dropped) = build.take() {
            debug!(section = dropped.section, "in-flight build dropped on shutdown");
        }
        info!(stored = self.stored, "section indexer stopped");
        self.status.send_modify(|s| s.state = IndexerState::Stopped);
    }

    fn observe_head(&mut self, head: Option<u64>) {
        self.chain_head = head;
        self.known = head.map_or(0, |h| self.cursor.confirmed_sections(h));
    }

    /// Schedule the next missing section, if any.
    fn next_build(&mut self) -> Option<InFlight> {
        if self.stalled || self.needs_verify || self.stored >= self.known {
            return None;
        }
        let section = self.stored;
        let delay = if self.throttle_next {
            self.throttling
        } else {
            Duration::ZERO
        };
        self.throttle_next = false;
        debug!(section, known = self.known, "building section");
        let future = build_section(
            self.cursor,
            self.chain.clone(),
            self.processor.clone(),
            section,
            self.last_head,
            delay,
        )
        .boxed();
        Some(InFlight { section, future })
    }

    async fn handle_reorg(&mut self, common_ancestor: u64, build: &mut Option<InFlight>) {
        let plan = Invalidation::plan(&self.cursor, self.stored, common_ancestor);

        if let Some(in_flight) = build.as_ref() {
            if plan.affects(&self.cursor, in_flight.section) {
                debug!(section = in_flight.section, common_ancestor, "aborting build overlapping reorg");
                *build = None;
            }
        }
        if plan.is_empty() {
            debug!(common_ancestor, stored = self.stored, "reorg above stored sections");
            return;
        }

        self.status.send_modify(|s| s.state = IndexerState::ReorgRecovery);
        match self.rewind_to(plan.retained).await {
            Ok(()) => info!(
                common_ancestor,
                retained = plan.retained,
                invalidated = ?plan.invalidated,
                "sections invalidated by reorg"
            ),
            Err(e) => {
                // Left for verify_last_head once writes succeed again.
                self.needs_verify = true;
                self.fail(None, e);
            }
        }
    }

    /// Drop stored sections whose head is no longer canonical, newest first.
    async fn verify_last_head(&mut self) -> Result<(), IndexerError> {
        self.stored = self.checkpoints.stored_sections().await?;
        let mut retained = self.stored;
        let mut last_head = None;
        while retained > 0 {
            let section = retained - 1;
            let head = self.checkpoints.section_head(section).await?;
            let canonical = self
                .chain
                .header_by_number(self.cursor.last_block(section))
                .await?;
            match (head, canonical) {
                (Some(head), Some(canonical)) if head == canonical.hash => {
                    last_head = Some(head);
                    break;
                }
                _ => {
                    warn!(section, "stored section head is not canonical, rewinding");
                    retained = section;
                }
            }
        }
        if retained < self.stored {
            self.rewind_to(retained).await?;
        } else {
            self.last_head = last_head;
        }
        debug!(stored = self.stored, "stored sections verified");
        Ok(())
    }

    /// Delete checkpoints of sections `retained..stored` and lower the count, atomically.
    async fn rewind_to(&mut self, retained: u64) -> Result<(), IndexerError> {
        let mut batch = WriteBatch::new();
        for section in retained..self.stored {
            self.checkpoints.stage_removal(&mut batch, section);
        }
        self.checkpoints.stage_count(&mut batch, retained);
        self.checkpoints.store().write(batch).await?;

        self.stored = retained;
        self.last_head = match retained.checked_sub(1) {
            Some(section) => self.checkpoints.section_head(section).await?,
            None => None,
        };
        Ok(())
    }

    async fn write_section(&mut self, done: SectionBuild) -> Result<(), IndexerError> {
        if done.section != self.stored {
            debug!(section = done.section, stored = self.stored, "discarding outdated build");
            return Ok(());
        }
        let SectionBuild {
            section,
            head,
            mut batch,
        } = done;
        self.checkpoints.stage_section(&mut batch, section, head)?;
        self.checkpoints.stage_count(&mut batch, section + 1);
        let ops = batch.len();
        self.checkpoints.store().write(batch).await?;

        self.stored = section + 1;
        self.last_head = Some(head);
        self.throttle_next = self.stored < self.known;
        info!(section, head = %head, ops, "section stored");
        Ok(())
    }

    fn fail(&mut self, section: Option<u64>, error: IndexerError) {
        warn!(
            section,
            error = %error,
            chain_change = error.is_chain_change(),
            "section indexing failed, retrying on next head"
        );
        self.stalled = true;
        self.throttle_next = false;
    }

    fn state(&self) -> IndexerState {
        if self.stopping {
            IndexerState::Stopping
        } else if self.stalled {
            IndexerState::Stalled
        } else if self.stored < self.known || self.needs_verify {
            IndexerState::CatchingUp
        } else {
            IndexerState::Synced
        }
    }

    fn publish(&self) {
        self.status.send_replace(IndexStatus {
            stored_sections: self.stored,
            known_sections: self.known,
            last_section_head: self.last_head,
            chain_head: self.chain_head,
            state: self.state(),
        });
    }
}

async fn poll_build(
    build: &mut Option<InFlight>,
) -> Option<Result<SectionBuild, IndexerError>> {
    match build {
        Some(in_flight) => Some((&mut in_flight.future).await),
        None => std::future::pending().await,
    }
}

/// Read, link-check and process one section. Writes nothing; dropping it aborts cleanly.
async fn build_section(
    cursor: SectionCursor,
    chain: Arc<dyn ChainReader>,
    processor: SharedProcessor,
    section: u64,
    prev_head: Option<BlockHash>,
    delay: Duration,
) -> Result<SectionBuild, IndexerError> {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let mut processor = processor.lock().await;
    processor.reset(section, prev_head).await?;

    let mut parent = prev_head;
    for number in cursor.first_block(section)..=cursor.last_block(section) {
        let header = chain
            .header_by_number(number)
            .await?
            .ok_or(IndexerError::MissingHeader(number))?;
        if let Some(expected) = parent {
            if header.parent_hash != expected {
                return Err(IndexerError::ChainChanged {
                    section,
                    block_number: number,
                });
            }
        }
        parent = Some(header.hash);
        processor.process(&header).await?;
    }
    let head = parent.ok_or(IndexerError::MissingHeader(cursor.last_block(section)))?;

    let mut batch = WriteBatch::new();
    processor.commit(&mut batch).await?;
    Ok(SectionBuild {
        section,
        head,
        batch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IndexerBuilder;
    use async_trait::async_trait;
    use bloombits_core::bloom::Bloom;
    use bloombits_core::chain::MemoryChain;
    use bloombits_core::keys;
    use bloombits_core::types::BlockHeader;
    use bloombits_storage::MemoryStore;

    fn blooms(range: std::ops::Range<u16>) -> Vec<Bloom> {
        range.map(|i| Bloom::from_bits([i % 2048])).collect()
    }

    fn indexer(store: Arc<MemoryStore>, chain: Arc<MemoryChain>, size: u64, depth: u64) -> ChainIndexer {
        IndexerBuilder::new()
            .section_size(size)
            .confirmation_depth(depth)
            .throttling_ms(0)
            .build_bloom(store, chain)
            .unwrap()
    }

    async fn wait_synced(handle: &IndexerHandle, stored: u64) -> IndexStatus {
        tokio::time::timeout(
            Duration::from_secs(5),
            handle.wait_for(|s| s.state == IndexerState::Synced && s.stored_sections == stored),
        )
        .await
        .expect("indexer did not sync")
    }

    #[tokio::test]
    async fn indexes_confirmed_sections_on_start() {
        let chain = Arc::new(MemoryChain::from_blooms(blooms(0..20)));
        let store = Arc::new(MemoryStore::new());
        let handle = indexer(store.clone(), chain.clone(), 8, 2).start();

        // head 19, depth 2 → (20 - 2) / 8 = 2 sections
        let status = wait_synced(&handle, 2).await;
        assert_eq!(status.known_sections, 2);
        let (stored, last_block, head) = handle.sections();
        assert_eq!(stored, 2);
        assert_eq!(last_block, Some(15));
        assert_eq!(head, Some(chain.header(15).unwrap().hash));
        assert_eq!(store.keys_with_prefix(keys::FRAGMENT_PREFIX).len(), 2 * 2048);
        handle.close().await;
        assert_eq!(handle.status().state, IndexerState::Stopped);
    }

    #[tokio::test]
    async fn follows_new_heads() {
        let chain = Arc::new(MemoryChain::from_blooms(blooms(0..4)));
        let store = Arc::new(MemoryStore::new());
        let handle = indexer(store, chain.clone(), 4, 0).start();
        wait_synced(&handle, 1).await;

        chain.extend(blooms(4..11));
        wait_synced(&handle, 2).await;
        chain.extend(blooms(11..12));
        wait_synced(&handle, 3).await;
        handle.close().await;
    }

    #[tokio::test]
    async fn reorg_invalidates_and_rebuilds() {
        let chain = Arc::new(MemoryChain::from_blooms(blooms(0..12)));
        let store = Arc::new(MemoryStore::new());
        let handle = indexer(store, chain.clone(), 4, 0).start();
        wait_synced(&handle, 3).await;

        // Replace blocks 6..=11: sections 1 and 2 are rebuilt on the new chain.
        chain.reorg(5, blooms(100..106));
        let status = tokio::time::timeout(
            Duration::from_secs(5),
            handle.wait_for(|s| {
                s.state == IndexerState::Synced
                    && s.stored_sections == 3
                    && s.last_section_head == chain.header(11).map(|h| h.hash)
            }),
        )
        .await
        .unwrap();
        assert_eq!(status.last_section_head, Some(chain.header(11).unwrap().hash));
        handle.close().await;
    }

    /// Forwards to a [`MemoryStore`] and records every key a write touches.
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryStore,
        touched: std::sync::Mutex<Vec<Vec<u8>>>,
        written: std::sync::Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingStore {
        fn record(&self, key: &[u8], put: bool) {
            self.touched.lock().unwrap().push(key.to_vec());
            if put {
                self.written.lock().unwrap().push(key.to_vec());
            }
        }

        fn clear(&self) {
            self.touched.lock().unwrap().clear();
            self.written.lock().unwrap().clear();
        }

        fn was_written(&self, key: &[u8]) -> bool {
            self.written.lock().unwrap().iter().any(|k| k == key)
        }

        async fn fragments(&self) -> std::collections::BTreeMap<Vec<u8>, Vec<u8>> {
            let mut out = std::collections::BTreeMap::new();
            for key in self.inner.keys_with_prefix(keys::FRAGMENT_PREFIX) {
                let value = self.inner.get(&key).await.unwrap().unwrap();
                out.insert(key, value);
            }
            out
        }
    }

    #[async_trait]
    impl bloombits_core::store::KeyValueStore for RecordingStore {
        async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), IndexerError> {
            self.record(key, true);
            self.inner.put(key, value).await
        }

        async fn delete(&self, key: &[u8]) -> Result<(), IndexerError> {
            self.record(key, false);
            self.inner.delete(key).await
        }

        async fn write(&self, batch: bloombits_core::store::WriteBatch) -> Result<(), IndexerError> {
            for op in batch.ops() {
                match op {
                    bloombits_core::store::BatchOp::Put { key, .. } => self.record(key, true),
                    bloombits_core::store::BatchOp::Delete { key } => self.record(key, false),
                }
            }
            self.inner.write(batch).await
        }
    }

    #[tokio::test]
    async fn reorg_onto_identical_blocks_rebuilds_identical_sections() {
        const NS: &[u8] = b"bloombits";
        let chain = Arc::new(MemoryChain::from_blooms(blooms(0..12)));
        let store = Arc::new(RecordingStore::default());
        let handle = IndexerBuilder::new()
            .section_size(4)
            .confirmation_depth(0)
            .throttling_ms(0)
            .build_bloom(store.clone(), chain.clone())
            .unwrap()
            .start();
        wait_synced(&handle, 3).await;

        let checkpoints = bloombits_core::checkpoint::CheckpointManager::new(store.clone(), NS);
        let fragments_before = store.fragments().await;
        let mut heads_before = Vec::new();
        for section in 0..3 {
            heads_before.push(checkpoints.section_head(section).await.unwrap());
        }
        store.clear();

        // Same blooms after the ancestor, so the replacement blocks hash the same.
        chain.reorg(5, blooms(6..12));
        assert_eq!(chain.header(11).map(|h| h.hash), heads_before[2]);
        let last_head = keys::section_head_key(NS, 2);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !store.was_written(&last_head) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("section 2 was not rebuilt");
        wait_synced(&handle, 3).await;

        assert_eq!(store.fragments().await, fragments_before);
        for section in 0..3 {
            assert_eq!(
                checkpoints.section_head(section).await.unwrap(),
                heads_before[section as usize]
            );
        }
        assert!(store.was_written(&keys::section_head_key(NS, 1)));

        // Section 0 ends at block 3, below the ancestor: none of its keys moved.
        let first_head = keys::section_head_key(NS, 0);
        let touched = store.touched.lock().unwrap().clone();
        assert!(!touched.is_empty());
        for key in &touched {
            assert_ne!(key, &first_head);
            let section_zero_fragment = key.starts_with(keys::FRAGMENT_PREFIX)
                && key.len() >= 11
                && key[3..11] == 0u64.to_be_bytes();
            assert!(!section_zero_fragment, "section 0 fragment rewritten: {key:?}");
        }
        handle.close().await;
    }

    #[tokio::test]
    async fn reorg_to_shorter_chain_lowers_count() {
        let chain = Arc::new(MemoryChain::from_blooms(blooms(0..12)));
        let store = Arc::new(MemoryStore::new());
        let handle = indexer(store, chain.clone(), 4, 0).start();
        wait_synced(&handle, 3).await;

        chain.reorg(4, blooms(200..202));
        let status = wait_synced(&handle, 1).await;
        assert_eq!(status.chain_head, Some(6));
        handle.close().await;
    }

    #[tokio::test]
    async fn restart_resumes_and_verifies_heads() {
        let chain = Arc::new(MemoryChain::from_blooms(blooms(0..8)));
        let store = Arc::new(MemoryStore::new());
        let handle = indexer(store.clone(), chain.clone(), 4, 0).start();
        wait_synced(&handle, 2).await;
        handle.close().await;

        // While stopped, the chain reorganises below the second section's head.
        chain.reorg(5, blooms(50..53));
        let handle = indexer(store, chain.clone(), 4, 0).start();
        let status = wait_synced(&handle, 2).await;
        assert_eq!(status.last_section_head, Some(chain.header(7).unwrap().hash));
        handle.close().await;
    }

    #[tokio::test]
    async fn storage_failure_stalls_then_retries() {
        let chain = Arc::new(MemoryChain::from_blooms(blooms(0..4)));
        let store = Arc::new(MemoryStore::new());
        store.set_fail_writes(true);
        let handle = indexer(store.clone(), chain.clone(), 4, 0).start();

        tokio::time::timeout(
            Duration::from_secs(5),
            handle.wait_for(|s| s.state == IndexerState::Stalled),
        )
        .await
        .unwrap();
        assert_eq!(handle.sections().0, 0);

        store.set_fail_writes(false);
        chain.extend(blooms(4..5));
        wait_synced(&handle, 1).await;
        handle.close().await;
    }

    struct MissingAfter {
        inner: MemoryChain,
        limit: u64,
    }

    #[async_trait]
    impl ChainReader for MissingAfter {
        async fn current_head(&self) -> Result<Option<BlockHeader>, IndexerError> {
            self.inner.current_head().await
        }
        async fn header_by_number(&self, number: u64) -> Result<Option<BlockHeader>, IndexerError> {
            if number >= self.limit {
                return Ok(None);
            }
            self.inner.header_by_number(number).await
        }
        fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
            self.inner.subscribe()
        }
    }

    #[tokio::test]
    async fn missing_header_leaves_section_unstored() {
        let chain = Arc::new(MissingAfter {
            inner: MemoryChain::from_blooms(blooms(0..8)),
            limit: 6,
        });
        let store = Arc::new(MemoryStore::new());
        let handle = IndexerBuilder::new()
            .section_size(4)
            .confirmation_depth(0)
            .throttling_ms(0)
            .build_bloom(store, chain)
            .unwrap()
            .start();

        let status = tokio::time::timeout(
            Duration::from_secs(5),
            handle.wait_for(|s| s.state == IndexerState::Stalled),
        )
        .await
        .unwrap();
        assert_eq!(status.stored_sections, 1);
        handle.close().await;
    }

    #[tokio::test]
    async fn close_stops_event_intake() {
        let chain = Arc::new(MemoryChain::from_blooms(blooms(0..4)));
        let store = Arc::new(MemoryStore::new());
        let handle = indexer(store, chain.clone(), 4, 0).start();
        wait_synced(&handle, 1).await;
        handle.close().await;

        chain.extend(blooms(4..8));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.sections().0, 1);
    }
}
