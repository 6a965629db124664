//! Chain synchronization engine.
//!
//! Keeps the local finalized chain in step with the network: polls peers for
//! their heights, tracks the resulting gaps, requests missing blocks in
//! ranges and batches, serves the same requests from peers, and hands
//! received blocks to the compliance layer.

pub mod config;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod store;

pub use config::EngineConfig;
pub use error::{EngineError, StateError, StorageError};
pub use metrics::{EngineMetrics, MessageCounters, NoopMetrics};

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chainsync::{Batch, Range, SyncCore};
use model::{Block, BlockHeader, BlockId, NodeId, SyncedBlock};
use network::codec;
use network::{
    BatchRequest, BlockResponse, Conduit, MessageKind, RangeRequest, SyncMessage, SyncRequest,
    SyncResponse,
};
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, warn};

use crate::queue::RequestQueue;
use crate::store::ResponseStore;

// ---------------------------------------------------------------------------
// Collaborator contracts
// ---------------------------------------------------------------------------

/// Read access to the latest finalized block header.
pub trait FinalizedState: Send + Sync + 'static {
    fn finalized_head(&self) -> Result<BlockHeader, StateError>;
}

/// Read-only block lookups, used to serve peer requests.
pub trait BlockStore: Send + Sync + 'static {
    fn block_by_height(
        &self,
        height: u64,
    ) -> impl Future<Output = Result<Block, StorageError>> + Send;

    fn block_by_id(&self, id: BlockId) -> impl Future<Output = Result<Block, StorageError>> + Send;
}

/// Enumerates consensus participants eligible for sync traffic, excluding
/// the local node.
pub trait PeerProvider: Send + Sync + 'static {
    fn consensus_peers(&self) -> Vec<NodeId>;
}

/// Non-blocking sink handing synced blocks to the compliance layer. If the
/// layer buffers internally, that buffer is its concern.
pub trait BlockConsumer: Send + Sync + 'static {
    fn submit(&self, synced: SyncedBlock);
}

impl BlockConsumer for tokio::sync::mpsc::UnboundedSender<SyncedBlock> {
    fn submit(&self, synced: SyncedBlock) {
        // the compliance layer going away during shutdown is not our problem
        let _ = self.send(synced);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The synchronization engine. All dependencies are injected through
/// [`Engine::new`]; nothing global beyond the `tracing` dispatcher.
///
/// Inbound messages enter through [`Engine::process`] (or
/// [`Engine::process_encoded`] from the wire). Requests land in per-kind
/// queues and responses in per-kind stores, each side drained by its own
/// loop once [`Engine::start`] has spawned them.
pub struct Engine<S, B, N, P, C, M> {
    config: EngineConfig,
    state: S,
    blocks: B,
    conduit: N,
    peers: P,
    compliance: C,
    metrics: M,

    /// Sole guard of tracker state. Scans hold it across the sends they
    /// trigger so they observe and update a consistent snapshot.
    core: Mutex<SyncCore>,

    sync_requests: RequestQueue<SyncRequest>,
    range_requests: RequestQueue<RangeRequest>,
    batch_requests: RequestQueue<BatchRequest>,
    sync_responses: ResponseStore<SyncResponse>,
    block_responses: ResponseStore<BlockResponse>,
    request_notifier: Notify,
    response_notifier: Notify,
}

impl<S, B, N, P, C, M> Engine<S, B, N, P, C, M>
where
    S: FinalizedState,
    B: BlockStore,
    N: Conduit,
    P: PeerProvider,
    C: BlockConsumer,
    M: EngineMetrics,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        core: SyncCore,
        state: S,
        blocks: B,
        conduit: N,
        peers: P,
        compliance: C,
        metrics: M,
    ) -> Self {
        let queue_capacity = config.queue_capacity;
        let response_capacity = config.response_capacity;
        Engine {
            config,
            state,
            blocks,
            conduit,
            peers,
            compliance,
            metrics,
            core: Mutex::new(core),
            sync_requests: RequestQueue::new(queue_capacity),
            range_requests: RequestQueue::new(queue_capacity),
            batch_requests: RequestQueue::new(queue_capacity),
            sync_responses: ResponseStore::new(response_capacity),
            block_responses: ResponseStore::new(response_capacity),
            request_notifier: Notify::new(),
            response_notifier: Notify::new(),
        }
    }

    /// Spawn the four engine loops and return their controller. The loops
    /// are running when this returns.
    pub fn start(self) -> SyncHandle<S, B, N, P, C, M> {
        let engine = Arc::new(self);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(4);

        {
            let engine = Arc::clone(&engine);
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                engine.request_processing_loop(rx).await;
            }));
        }
        {
            let engine = Arc::clone(&engine);
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                engine.response_processing_loop(rx).await;
            }));
        }
        {
            let engine = Arc::clone(&engine);
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                engine.poll_loop(rx).await;
            }));
        }
        {
            let engine = Arc::clone(&engine);
            tasks.push(tokio::spawn(async move {
                engine.scan_loop(shutdown_rx).await;
            }));
        }

        SyncHandle {
            engine,
            shutdown,
            tasks,
        }
    }

    /// Classify an inbound message and queue it for its processing loop.
    /// Never blocks; queues and stores deduplicate and evict as documented.
    pub fn process(&self, origin: NodeId, message: SyncMessage) {
        match message {
            SyncMessage::SyncRequest(request) => {
                self.sync_requests.push(origin, request);
                self.request_notifier.notify_one();
            }
            SyncMessage::RangeRequest(request) => {
                self.range_requests.push(origin, request);
                self.request_notifier.notify_one();
            }
            SyncMessage::BatchRequest(request) => {
                self.batch_requests.push(origin, request);
                self.request_notifier.notify_one();
            }
            SyncMessage::SyncResponse(response) => {
                self.sync_responses.put(origin, response);
                self.response_notifier.notify_one();
            }
            SyncMessage::BlockResponse(response) => {
                self.block_responses.put(origin, response);
                self.response_notifier.notify_one();
            }
        }
    }

    /// Decode a wire envelope and process it. A malformed or unknown
    /// envelope is returned to the caller; nothing is queued for it.
    pub fn process_encoded(&self, origin: NodeId, data: &[u8]) -> Result<(), EngineError> {
        let message = codec::decode(data)?;
        self.process(origin, message);
        Ok(())
    }

    /// Ask the tracker to fetch a specific block by ID. Intended for the
    /// compliance layer announcing pending descendants it knows only by ID.
    pub async fn request_block_id(&self, id: BlockId) {
        self.core.lock().await.request_block_id(id);
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    async fn request_processing_loop(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                _ = self.request_notifier.notified() => {
                    self.process_available_requests().await;
                }
            }
        }
    }

    async fn response_processing_loop(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                _ = self.response_notifier.notified() => {
                    self.process_available_responses().await;
                }
            }
        }
    }

    async fn poll_loop(&self, mut shutdown: watch::Receiver<bool>) {
        if self.config.poll_interval.is_zero() {
            debug!("height polling disabled");
            return;
        }
        let mut poll = interval(self.config.poll_interval);
        poll.tick().await; // skip first immediate tick
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                _ = poll.tick() => {
                    if let Err(e) = self.poll_height().await {
                        error!(err = %e, "could not poll heights");
                    }
                }
            }
        }
    }

    async fn scan_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut scan = interval(self.config.scan_interval);
        scan.tick().await; // skip first immediate tick
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                _ = scan.tick() => {
                    self.scan_once().await;
                }
            }
        }
    }

    /// Drain the request queues until all are empty, sync requests first so
    /// peer-height knowledge stays at least as fresh as bulk requests.
    /// Handler failures abort only the failed item; sync must keep running.
    async fn process_available_requests(&self) {
        loop {
            if let Some((origin, request)) = self.sync_requests.pop() {
                if let Err(e) = self.process_sync_request(origin, request).await {
                    error!(err = %e, "could not process sync request");
                }
                continue;
            }
            if let Some((origin, request)) = self.range_requests.pop() {
                if let Err(e) = self.process_range_request(origin, request).await {
                    error!(err = %e, "could not process range request");
                }
                continue;
            }
            if let Some((origin, request)) = self.batch_requests.pop() {
                if let Err(e) = self.process_batch_request(origin, request).await {
                    error!(err = %e, "could not process batch request");
                }
                continue;
            }
            // queues drained, back to waiting for the next notification
            return;
        }
    }

    /// Drain the response stores until both are empty, sync responses first.
    async fn process_available_responses(&self) {
        loop {
            if let Some((origin, response)) = self.sync_responses.get() {
                if let Err(e) = self.process_sync_response(origin, response).await {
                    error!(err = %e, "could not process sync response");
                }
                continue;
            }
            if let Some((origin, response)) = self.block_responses.get() {
                if let Err(e) = self.process_block_response(origin, response).await {
                    error!(err = %e, "could not process block response");
                }
                continue;
            }
            return;
        }
    }

    async fn process_sync_request(
        &self,
        origin: NodeId,
        request: SyncRequest,
    ) -> Result<(), EngineError> {
        self.metrics.message_received(MessageKind::SyncRequest);
        let result = self.on_sync_request(origin, request).await;
        self.metrics.message_handled(MessageKind::SyncRequest);
        result
    }

    async fn process_range_request(
        &self,
        origin: NodeId,
        request: RangeRequest,
    ) -> Result<(), EngineError> {
        self.metrics.message_received(MessageKind::RangeRequest);
        let result = self.on_range_request(origin, request).await;
        self.metrics.message_handled(MessageKind::RangeRequest);
        result
    }

    async fn process_batch_request(
        &self,
        origin: NodeId,
        request: BatchRequest,
    ) -> Result<(), EngineError> {
        self.metrics.message_received(MessageKind::BatchRequest);
        let result = self.on_batch_request(origin, request).await;
        self.metrics.message_handled(MessageKind::BatchRequest);
        result
    }

    async fn process_sync_response(
        &self,
        origin: NodeId,
        response: SyncResponse,
    ) -> Result<(), EngineError> {
        self.metrics.message_received(MessageKind::SyncResponse);
        let result = self.on_sync_response(origin, response).await;
        self.metrics.message_handled(MessageKind::SyncResponse);
        result
    }

    async fn process_block_response(
        &self,
        origin: NodeId,
        response: BlockResponse,
    ) -> Result<(), EngineError> {
        self.metrics.message_received(MessageKind::BlockResponse);
        let result = self.on_block_response(origin, response).await;
        self.metrics.message_handled(MessageKind::BlockResponse);
        result
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    /// A peer told us its finalized height and wants ours. Track any gap it
    /// reveals; reply only if we are sufficiently ahead of the requester.
    pub async fn on_sync_request(
        &self,
        origin: NodeId,
        request: SyncRequest,
    ) -> Result<(), EngineError> {
        let final_head = self.state.finalized_head()?;
        {
            let mut core = self.core.lock().await;
            core.note_peer(origin, request.height);
            core.handle_height(&final_head, request.height);
            // stay quiet when within tolerance or behind the requester
            if core.within_tolerance(&final_head, request.height)
                || request.height > final_head.height
            {
                return Ok(());
            }
        }

        let response = SyncResponse {
            nonce: request.nonce,
            height: final_head.height,
        };
        if let Err(e) = self
            .conduit
            .unicast(SyncMessage::SyncResponse(response), origin)
            .await
        {
            warn!(peer = %origin.short(), err = %e, "could not send sync response");
            return Ok(());
        }
        self.metrics.message_sent(MessageKind::SyncResponse);
        Ok(())
    }

    /// A peer reported its height, solicited or not. Only the tracker cares.
    pub async fn on_sync_response(
        &self,
        origin: NodeId,
        response: SyncResponse,
    ) -> Result<(), EngineError> {
        let final_head = self.state.finalized_head()?;
        let mut core = self.core.lock().await;
        core.note_peer(origin, response.height);
        core.handle_height(&final_head, response.height);
        Ok(())
    }

    /// Serve a contiguous range from the store, stopping at the first hole.
    pub async fn on_range_request(
        &self,
        origin: NodeId,
        request: RangeRequest,
    ) -> Result<(), EngineError> {
        let head = self.state.finalized_head()?;
        if head.height < request.from_height || request.from_height > request.to_height {
            return Ok(());
        }

        let mut blocks = Vec::new();
        for height in request.from_height..=request.to_height {
            match self.blocks.block_by_height(height).await {
                Ok(block) => blocks.push(block),
                Err(StorageError::NotFound) => {
                    debug!(height, "requested height not in store, stopping range");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if blocks.is_empty() {
            debug!(
                from = request.from_height,
                to = request.to_height,
                "skipping empty range response"
            );
            return Ok(());
        }

        let response = BlockResponse {
            nonce: request.nonce,
            blocks,
        };
        if let Err(e) = self
            .conduit
            .unicast(SyncMessage::BlockResponse(response), origin)
            .await
        {
            warn!(peer = %origin.short(), err = %e, "could not send range response");
            return Ok(());
        }
        self.metrics.message_sent(MessageKind::BlockResponse);
        Ok(())
    }

    /// Serve specific blocks by ID, skipping unknown ones.
    pub async fn on_batch_request(
        &self,
        origin: NodeId,
        request: BatchRequest,
    ) -> Result<(), EngineError> {
        if request.block_ids.is_empty() {
            return Ok(());
        }

        let unique: HashSet<BlockId> = request.block_ids.iter().copied().collect();
        let mut blocks = Vec::with_capacity(unique.len());
        for id in unique {
            match self.blocks.block_by_id(id).await {
                Ok(block) => blocks.push(block),
                Err(StorageError::NotFound) => {
                    debug!(block_id = %id.short(), "requested block not in store");
                }
                Err(e) => return Err(e.into()),
            }
        }

        if blocks.is_empty() {
            debug!("skipping empty batch response");
            return Ok(());
        }

        let response = BlockResponse {
            nonce: request.nonce,
            blocks,
        };
        if let Err(e) = self
            .conduit
            .unicast(SyncMessage::BlockResponse(response), origin)
            .await
        {
            warn!(peer = %origin.short(), err = %e, "could not send batch response");
            return Ok(());
        }
        self.metrics.message_sent(MessageKind::BlockResponse);
        Ok(())
    }

    /// Forward each delivered block to the compliance layer, unless the
    /// tracker has already seen one for that height or ID.
    pub async fn on_block_response(
        &self,
        origin: NodeId,
        response: BlockResponse,
    ) -> Result<(), EngineError> {
        for block in response.blocks {
            let should_process = { self.core.lock().await.handle_block(&block.header) };
            if !should_process {
                continue;
            }
            debug!(
                height = block.header.height,
                block_id = %block.id().short(),
                "forwarding synced block to compliance"
            );
            self.compliance.submit(SyncedBlock {
                origin_id: origin,
                block,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Periodic work
    // -----------------------------------------------------------------------

    /// Multicast our finalized height to a sample of consensus peers.
    pub async fn poll_height(&self) -> Result<(), EngineError> {
        let final_head = self.state.finalized_head()?;
        let participants = self.peers.consensus_peers();
        if participants.is_empty() {
            debug!("skipping height poll, no peers");
            return Ok(());
        }

        let request = SyncRequest {
            nonce: rand::random(),
            height: final_head.height,
        };
        self.conduit
            .multicast(
                SyncMessage::SyncRequest(request),
                self.config.poll_fanout,
                &participants,
            )
            .await?;
        self.metrics.message_sent(MessageKind::SyncRequest);
        Ok(())
    }

    /// One scan pass: collect pending ranges and batches from the tracker
    /// and request them, holding the core lock across the sends.
    pub async fn scan_once(&self) {
        let final_head = match self.state.finalized_head() {
            Ok(head) => head,
            Err(e) => {
                error!(err = %e, "could not get finalized head");
                return;
            }
        };

        let mut core = self.core.lock().await;
        let (ranges, batches) = core.scan_pending(&final_head);
        if ranges.is_empty() && batches.is_empty() {
            return;
        }
        self.send_requests(&mut core, ranges, batches).await;
    }

    /// Multicast one request per range and batch. A failed send is counted
    /// and the rest still go out; the entries stay unrequested, so the next
    /// scan picks them up again.
    async fn send_requests(&self, core: &mut SyncCore, ranges: Vec<Range>, batches: Vec<Batch>) {
        let participants = self.peers.consensus_peers();
        if participants.is_empty() {
            debug!("skipping gap requests, no peers");
            return;
        }

        let mut failed = 0usize;
        for range in ranges {
            let request = RangeRequest {
                nonce: rand::random(),
                from_height: range.from,
                to_height: range.to,
            };
            let nonce = request.nonce;
            if let Err(e) = self
                .conduit
                .multicast(
                    SyncMessage::RangeRequest(request),
                    self.config.request_fanout,
                    &participants,
                )
                .await
            {
                warn!(err = %e, from = range.from, to = range.to, "could not submit range request");
                failed += 1;
                continue;
            }
            debug!(
                range_from = range.from,
                range_to = range.to,
                range_nonce = nonce,
                "range requested"
            );
            core.range_requested(&range);
            self.metrics.message_sent(MessageKind::RangeRequest);
        }

        for batch in batches {
            let request = BatchRequest {
                nonce: rand::random(),
                block_ids: batch.block_ids.clone(),
            };
            if let Err(e) = self
                .conduit
                .multicast(
                    SyncMessage::BatchRequest(request),
                    self.config.request_fanout,
                    &participants,
                )
                .await
            {
                warn!(err = %e, blocks = batch.len(), "could not submit batch request");
                failed += 1;
                continue;
            }
            core.batch_requested(&batch);
            self.metrics.message_sent(MessageKind::BatchRequest);
        }

        if failed > 0 {
            error!(failed, "some gap requests were not sent");
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle controller
// ---------------------------------------------------------------------------

/// Controller for a started engine. Dropping it without calling
/// [`SyncHandle::stop`] also stops the loops, but without waiting for them.
pub struct SyncHandle<S, B, N, P, C, M> {
    engine: Arc<Engine<S, B, N, P, C, M>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl<S, B, N, P, C, M> SyncHandle<S, B, N, P, C, M>
where
    S: FinalizedState,
    B: BlockStore,
    N: Conduit,
    P: PeerProvider,
    C: BlockConsumer,
    M: EngineMetrics,
{
    pub fn engine(&self) -> &Engine<S, B, N, P, C, M> {
        &self.engine
    }

    pub fn process(&self, origin: NodeId, message: SyncMessage) {
        self.engine.process(origin, message);
    }

    pub fn process_encoded(&self, origin: NodeId, data: &[u8]) -> Result<(), EngineError> {
        self.engine.process_encoded(origin, data)
    }

    /// Signal every loop to stop and wait until all of them have returned.
    /// In-flight sends are not cancelled; they complete or fail first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
