//! Resize pipeline task
//!
//! One task owns every pipeline stage for a connection. Window events,
//! server messages and timer expiries are handled strictly one at a time, so
//! the stages never need locking. A settled resize is dispatched to the
//! server, turned into an invalidation, and flushed as a fetch request in a
//! single step.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use reflow_protocol::{
    ClientMessage, Dimensions, DomainId, ErrorCode, Generation, PaneEntry, PaneId, RangeContent,
    ServerMessage, SplitDirection, TopologyFingerprint, PROTOCOL_VERSION,
};
use reflow_utils::{ReflowError, Result};

use crate::connection::MessageSender;
use crate::resize::{
    invalidated_rows, AckOutcome, ExpiredControl, FetchCoalescer, FetchOutcome,
    InvalidationRange, PaneView, ReflowOracle, ResizeDebouncer, ResizeEvent, ResizeNotifier,
    SettledResize, TopologyState, ViewportInvalidationTracker, DEFAULT_DEBOUNCE_MS,
    DEFAULT_FETCH_COALESCE_MS, DEFAULT_RPC_TIMEOUT_MS,
};

/// Default retries for an unanswered RPC before the error stays surfaced
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Sizes sent to the server whose PaneResized echo has not arrived yet
const MAX_PENDING_ECHOES: usize = 16;

/// Timing knobs for the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub debounce: Duration,
    pub fetch_coalesce: Duration,
    pub rpc_timeout: Duration,
    pub max_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            fetch_coalesce: Duration::from_millis(DEFAULT_FETCH_COALESCE_MS),
            rpc_timeout: Duration::from_millis(DEFAULT_RPC_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Inputs to the pipeline task
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Raw size report for one pane
    Resize(ResizeEvent),
    /// Raw size report for the whole window, applied to the domain's root pane
    WindowResize {
        cols: u16,
        rows: u16,
        timestamp: Instant,
    },
    /// User scrolled a pane
    ScrollTo { pane_id: PaneId, offset: u64 },
    /// Pane went away locally
    PaneDestroyed(PaneId),
    Split {
        pane_id: PaneId,
        direction: SplitDirection,
    },
    Close { pane_id: PaneId },
    Server(ServerMessage),
    /// Server connection went away
    Disconnected,
    Shutdown,
}

/// Where fetched content and errors go
pub trait RenderSink: Send + 'static {
    /// Fresh content for the given rows
    fn apply_lines(&mut self, pane_id: PaneId, generation: Generation, ranges: &[RangeContent]);

    /// A pane now has a new size
    fn pane_resized(&mut self, _pane_id: PaneId, _dimensions: Dimensions) {}

    /// The pane list was replaced by a resync
    fn topology_changed(&mut self, _panes: &[PaneId]) {}

    /// A recoverable error scoped to one pane
    fn on_pane_error(&mut self, _pane_id: PaneId, _error: &ReflowError) {}

    /// The connection can no longer be used
    fn on_connection_broken(&mut self, _error: &ReflowError) {}
}

/// Counters collected over the life of a pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub raw_events: u64,
    pub settled: u64,
    pub suppressed: u64,
    pub size_only: u64,
    pub resyncs: u64,
    pub mismatches: u64,
    pub rows_invalidated: u64,
    pub fetch_requests: u64,
    pub fetch_applied: u64,
    pub stale_dropped: u64,
    pub duplicates: u64,
    pub timeouts: u64,
}

#[derive(Debug)]
struct PaneState {
    view: PaneView,
    echoes: VecDeque<Dimensions>,
}

impl PaneState {
    fn new(view: PaneView) -> Self {
        Self {
            view,
            echoes: VecDeque::new(),
        }
    }

    fn expect_echo(&mut self, dimensions: Dimensions) {
        if self.echoes.len() == MAX_PENDING_ECHOES {
            self.echoes.pop_front();
        }
        self.echoes.push_back(dimensions);
    }

    /// Consume an echo of a size this client sent, if it is one
    fn take_echo(&mut self, dimensions: Dimensions) -> bool {
        match self.echoes.iter().position(|d| *d == dimensions) {
            Some(index) => {
                self.echoes.drain(..=index);
                true
            }
            None => false,
        }
    }
}

/// Handle to a spawned pipeline
pub struct PipelineHandle {
    tx: mpsc::Sender<PipelineEvent>,
    task: JoinHandle<Result<PipelineStats>>,
}

impl PipelineHandle {
    pub fn events(&self) -> mpsc::Sender<PipelineEvent> {
        self.tx.clone()
    }

    pub async fn send(&self, event: PipelineEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| ReflowError::internal("resize pipeline stopped"))
    }

    pub async fn resize(&self, pane_id: PaneId, cols: u16, rows: u16) -> Result<()> {
        self.send(PipelineEvent::Resize(ResizeEvent::new(pane_id, cols, rows)))
            .await
    }

    /// Ask the task to stop and wait for its final counters
    pub async fn shutdown(self) -> Result<PipelineStats> {
        let _ = self.tx.send(PipelineEvent::Shutdown).await;
        self.join().await
    }

    /// Wait for the task to finish on its own
    pub async fn join(self) -> Result<PipelineStats> {
        self.task
            .await
            .map_err(|e| ReflowError::internal(format!("resize pipeline panicked: {}", e)))?
    }
}

/// The client resize pipeline for one server connection
pub struct ResizePipeline<S: RenderSink> {
    config: PipelineConfig,
    client_id: Uuid,
    requested_domain: Option<DomainId>,
    topology: Option<TopologyState>,
    debouncer: ResizeDebouncer,
    tracker: ViewportInvalidationTracker,
    coalescer: FetchCoalescer,
    notifier: ResizeNotifier,
    panes: HashMap<PaneId, PaneState>,
    /// Window size reported before the root pane was known
    pending_window: Option<Dimensions>,
    sender: MessageSender,
    events: mpsc::Receiver<PipelineEvent>,
    sink: S,
    raw_events: u64,
    settled: u64,
    rows_invalidated: u64,
}

impl<S: RenderSink> ResizePipeline<S> {
    pub fn new(
        config: PipelineConfig,
        sender: MessageSender,
        sink: S,
        oracle: Box<dyn ReflowOracle>,
        domain: Option<DomainId>,
    ) -> (Self, mpsc::Sender<PipelineEvent>) {
        let (tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pipeline = Self {
            config,
            client_id: Uuid::new_v4(),
            requested_domain: domain,
            topology: None,
            debouncer: ResizeDebouncer::new(config.debounce),
            tracker: ViewportInvalidationTracker::new(oracle),
            coalescer: FetchCoalescer::new(config.fetch_coalesce, config.rpc_timeout),
            notifier: ResizeNotifier::new(config.rpc_timeout),
            panes: HashMap::new(),
            pending_window: None,
            sender,
            events,
            sink,
            raw_events: 0,
            settled: 0,
            rows_invalidated: 0,
        };
        (pipeline, tx)
    }

    /// Build a pipeline and run it on its own task
    pub fn spawn(
        config: PipelineConfig,
        sender: MessageSender,
        sink: S,
        oracle: Box<dyn ReflowOracle>,
        domain: Option<DomainId>,
    ) -> PipelineHandle {
        let (pipeline, tx) = Self::new(config, sender, sink, oracle, domain);
        PipelineHandle {
            tx,
            task: tokio::spawn(pipeline.run()),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        let fetch = self.coalescer.stats();
        let notify = self.notifier.stats();
        PipelineStats {
            raw_events: self.raw_events,
            settled: self.settled,
            suppressed: self.debouncer.suppressed(),
            size_only: notify.size_only,
            resyncs: notify.resyncs,
            mismatches: notify.mismatches,
            rows_invalidated: self.rows_invalidated,
            fetch_requests: fetch.requests,
            fetch_applied: fetch.applied,
            stale_dropped: fetch.stale_dropped,
            duplicates: fetch.duplicates,
            timeouts: fetch.timeouts + notify.timeouts,
        }
    }

    /// Handshake, then process events until shutdown or a fatal error
    pub async fn run(mut self) -> Result<PipelineStats> {
        let result = self.event_loop().await;
        let stats = self.stats();
        match result {
            Ok(()) => {
                info!(?stats, "Resize pipeline stopped");
                Ok(stats)
            }
            Err(e) => {
                warn!(error = %e, "Resize pipeline failed");
                self.sink.on_connection_broken(&e);
                Err(e)
            }
        }
    }

    async fn event_loop(&mut self) -> Result<()> {
        self.send(ClientMessage::Connect {
            client_id: self.client_id,
            protocol_version: PROTOCOL_VERSION,
            domain_id: self.requested_domain,
        })
        .await?;

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                // Queued events go first so a backlog never settles early
                biased;
                event = self.events.recv() => match event {
                    None | Some(PipelineEvent::Shutdown) => return Ok(()),
                    Some(event) => self.handle_event(event, Instant::now()).await?,
                },
                _ = wait_until(deadline) => self.on_timer(Instant::now()).await?,
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.debouncer.next_deadline(),
            self.coalescer.next_deadline(),
            self.notifier.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    async fn send(&mut self, msg: ClientMessage) -> Result<()> {
        trace!(message_type = msg.type_name(), "Sending");
        self.sender.send(msg).await
    }

    async fn handle_event(&mut self, event: PipelineEvent, now: Instant) -> Result<()> {
        match event {
            PipelineEvent::Resize(event) => {
                self.raw_events += 1;
                self.debouncer.push(event);
            }
            PipelineEvent::WindowResize {
                cols,
                rows,
                timestamp,
            } => {
                self.raw_events += 1;
                match self.topology.as_ref().and_then(TopologyState::root) {
                    Some(root) => {
                        self.debouncer
                            .push(ResizeEvent::at(root, Dimensions::new(cols, rows), timestamp));
                    }
                    None => {
                        trace!("Window resize before the first pane list");
                        self.pending_window = Some(Dimensions::new(cols, rows));
                    }
                }
            }
            PipelineEvent::ScrollTo { pane_id, offset } => self.scroll_to(pane_id, offset, now),
            PipelineEvent::PaneDestroyed(pane_id) => {
                debug!(pane_id = %pane_id, "Pane destroyed locally");
                self.drop_pane(pane_id);
            }
            PipelineEvent::Split { pane_id, direction } => {
                if let Some(topology) = self.topology.as_mut() {
                    topology.mark_dirty("split");
                }
                self.send(ClientMessage::SplitPane { pane_id, direction })
                    .await?;
            }
            PipelineEvent::Close { pane_id } => {
                if let Some(topology) = self.topology.as_mut() {
                    topology.mark_dirty("close");
                }
                self.drop_pane(pane_id);
                self.send(ClientMessage::ClosePane { pane_id }).await?;
            }
            PipelineEvent::Server(msg) => self.on_server_message(msg, now).await?,
            PipelineEvent::Disconnected => {
                return Err(ReflowError::connection("server closed the connection"));
            }
            PipelineEvent::Shutdown => {}
        }
        Ok(())
    }

    async fn on_timer(&mut self, now: Instant) -> Result<()> {
        for settled in self.debouncer.fire_due(now) {
            self.on_settled(settled, now).await?;
        }

        for pane_id in self.coalescer.due_flushes(now) {
            self.flush_pane(pane_id, now).await?;
        }

        for expired in self.coalescer.expire(now) {
            let err = ReflowError::transient(
                expired.pane_id,
                format!("fetch {} timed out", expired.generation),
            );
            warn!(attempt = expired.attempt, "{}", err);
            self.sink.on_pane_error(expired.pane_id, &err);
            if expired.attempt <= self.config.max_retries {
                self.flush_pane(expired.pane_id, now).await?;
            }
        }

        for expired in self.notifier.expire(now) {
            match expired {
                ExpiredControl::SizeUpdate { pane_id, attempt } => {
                    let err = ReflowError::transient(pane_id, "size update timed out");
                    warn!(attempt, "{}", err);
                    self.sink.on_pane_error(pane_id, &err);
                    if attempt > self.config.max_retries {
                        continue;
                    }
                    let retry = match self.topology.as_ref() {
                        Some(topology) => {
                            self.notifier
                                .retry_size_update(topology, pane_id, attempt, now)
                        }
                        None => None,
                    };
                    if let Some(msg) = retry {
                        self.send(msg).await?;
                    }
                }
                ExpiredControl::Resync { domain_id, attempt } => {
                    warn!(domain_id = %domain_id, attempt, "Resync timed out");
                    if attempt > self.config.max_retries {
                        return Err(ReflowError::connection(format!(
                            "no pane list for domain {} after {} attempts",
                            domain_id, attempt
                        )));
                    }
                    let msg = self.notifier.retry_resync(domain_id, attempt, now);
                    self.send(msg).await?;
                }
            }
        }
        Ok(())
    }

    async fn on_settled(&mut self, settled: SettledResize, now: Instant) -> Result<()> {
        self.settled += 1;
        let Some(topology) = self.topology.as_mut() else {
            return Ok(());
        };

        let dispatch = self.notifier.dispatch(topology, &settled, now);
        if let Some(pane) = self.panes.get_mut(&settled.pane_id) {
            pane.expect_echo(settled.new);
        }
        for msg in dispatch.messages {
            self.send(msg).await?;
        }

        self.apply_geometry(settled.pane_id, settled.new, now).await
    }

    /// Move a pane to new dimensions and fetch what that exposes
    async fn apply_geometry(
        &mut self,
        pane_id: PaneId,
        dimensions: Dimensions,
        now: Instant,
    ) -> Result<()> {
        let Some(pane) = self.panes.get_mut(&pane_id) else {
            return Ok(());
        };

        let ranges = self.tracker.invalidate(pane_id, &pane.view, dimensions);
        pane.view.dimensions = dimensions;
        self.rows_invalidated += invalidated_rows(&ranges);
        self.coalescer.enqueue(&ranges, now);
        self.sink.pane_resized(pane_id, dimensions);

        self.flush_pane(pane_id, now).await
    }

    async fn flush_pane(&mut self, pane_id: PaneId, now: Instant) -> Result<()> {
        if let Some(request) = self.coalescer.flush(pane_id, now) {
            self.send(request.into_message()).await?;
        }
        Ok(())
    }

    fn scroll_to(&mut self, pane_id: PaneId, offset: u64, now: Instant) {
        let Some(pane) = self.panes.get_mut(&pane_id) else {
            return;
        };
        pane.view.scroll_offset = offset.min(pane.view.max_scroll_offset());
        self.coalescer
            .enqueue_missing(pane_id, pane.view.viewport(), now);
    }

    async fn track_pane(&mut self, entry: &PaneEntry, now: Instant) -> Result<()> {
        let view = PaneView::new(entry.dimensions, entry.total_lines);
        self.debouncer.track_pane(entry.pane_id, entry.dimensions);
        self.coalescer.register_pane(entry.pane_id);
        self.panes.insert(entry.pane_id, PaneState::new(view));

        let visible = InvalidationRange {
            pane_id: entry.pane_id,
            range: view.viewport(),
        };
        self.coalescer.enqueue(&[visible], now);
        self.flush_pane(entry.pane_id, now).await
    }

    fn drop_pane(&mut self, pane_id: PaneId) {
        if self.debouncer.remove_pane(pane_id) {
            debug!(pane_id = %pane_id, "Cancelled pending resize");
        }
        self.coalescer.remove_pane(pane_id);
        self.notifier.remove_pane(pane_id);
        self.panes.remove(&pane_id);
    }

    async fn request_resync(&mut self, now: Instant) -> Result<()> {
        let Some(domain_id) = self.topology.as_ref().map(TopologyState::domain_id) else {
            return Ok(());
        };
        if let Some(msg) = self.notifier.request_resync(domain_id, now) {
            self.send(msg).await?;
        }
        Ok(())
    }

    async fn on_server_message(&mut self, msg: ServerMessage, now: Instant) -> Result<()> {
        match msg {
            ServerMessage::Connected {
                server_version,
                protocol_version,
                domain_id,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(ReflowError::ProtocolMismatch {
                        client: PROTOCOL_VERSION,
                        server: protocol_version,
                    });
                }
                info!(%server_version, domain_id = %domain_id, "Attached to domain");
                self.topology = Some(TopologyState::new(domain_id));
                self.request_resync(now).await?;
            }

            ServerMessage::Pong => trace!("Pong"),

            ServerMessage::ListPanesResponse {
                domain_id,
                panes,
                topology_fingerprint,
            } => {
                self.on_pane_list(domain_id, panes, topology_fingerprint, now)
                    .await?;
            }

            ServerMessage::SizeUpdated {
                pane_id,
                cols,
                rows,
                topology_fingerprint,
            } => {
                let Some(topology) = self.topology.as_mut() else {
                    return Ok(());
                };
                match self.notifier.on_ack(topology, pane_id, topology_fingerprint) {
                    AckOutcome::Confirmed => {
                        trace!(pane_id = %pane_id, cols, rows, "Size update acknowledged");
                    }
                    AckOutcome::Unsolicited => {
                        trace!(pane_id = %pane_id, "Unsolicited size acknowledgement");
                    }
                    AckOutcome::Mismatch(err) => {
                        self.sink.on_pane_error(pane_id, &err);
                        self.request_resync(now).await?;
                    }
                }
            }

            ServerMessage::FetchResponse {
                pane_id,
                generation,
                total_lines,
                ranges,
            } => {
                match self
                    .coalescer
                    .on_response(pane_id, generation, total_lines, ranges)?
                {
                    FetchOutcome::Applied {
                        pane_id,
                        generation,
                        total_lines,
                        ranges,
                    } => {
                        if let Some(pane) = self.panes.get_mut(&pane_id) {
                            pane.view.total_lines = total_lines;
                        }
                        self.sink.apply_lines(pane_id, generation, &ranges);
                    }
                    FetchOutcome::Stale { .. }
                    | FetchOutcome::Duplicate { .. }
                    | FetchOutcome::UnknownPane { .. } => {}
                }
            }

            ServerMessage::PaneResized {
                pane_id,
                cols,
                rows,
            } => {
                let dimensions = Dimensions::new(cols, rows);
                let Some(pane) = self.panes.get_mut(&pane_id) else {
                    return Ok(());
                };
                if pane.take_echo(dimensions) || pane.view.dimensions == dimensions {
                    return Ok(());
                }
                debug!(pane_id = %pane_id, size = %dimensions, "Pane resized elsewhere");
                self.debouncer.set_baseline(pane_id, dimensions);
                if let Some(topology) = self.topology.as_mut() {
                    topology.apply_size_only(pane_id, dimensions);
                }
                self.apply_geometry(pane_id, dimensions, now).await?;
            }

            ServerMessage::TopologyChanged { domain_id } => {
                let Some(topology) = self.topology.as_mut() else {
                    return Ok(());
                };
                if topology.domain_id() == domain_id {
                    topology.mark_dirty("server reported topology change");
                    self.request_resync(now).await?;
                }
            }

            ServerMessage::Error { code, message } => match code {
                ErrorCode::ProtocolMismatch | ErrorCode::NotConnected => {
                    return Err(ReflowError::fatal(format!("{:?}: {}", code, message)));
                }
                ErrorCode::PaneNotFound
                | ErrorCode::DomainNotFound
                | ErrorCode::InvalidOperation => {
                    warn!(?code, %message, "Server rejected request");
                    if let Some(topology) = self.topology.as_mut() {
                        topology.mark_dirty("request rejected");
                    }
                    // A rejected size update never echoes; let the resync's
                    // geometry through
                    for pane in self.panes.values_mut() {
                        pane.echoes.clear();
                    }
                    self.request_resync(now).await?;
                }
                ErrorCode::InternalError => warn!(%message, "Server internal error"),
            },
        }
        Ok(())
    }

    async fn on_pane_list(
        &mut self,
        domain_id: DomainId,
        panes: Vec<PaneEntry>,
        fingerprint: TopologyFingerprint,
        now: Instant,
    ) -> Result<()> {
        let Some(topology) = self.topology.as_mut() else {
            warn!("Pane list before handshake");
            return Ok(());
        };
        if topology.domain_id() != domain_id {
            warn!(domain_id = %domain_id, "Pane list for a domain this client is not attached to");
            return Ok(());
        }

        let diff = topology.apply_resync(&panes, fingerprint)?;
        let pane_ids = topology.pane_ids();
        debug!(
            domain_id = %domain_id,
            fingerprint = %fingerprint,
            added = diff.added.len(),
            removed = diff.removed.len(),
            resized = diff.resized.len(),
            "Applied pane list"
        );

        for pane_id in &diff.removed {
            self.drop_pane(*pane_id);
        }
        for entry in &panes {
            if let Some(pane) = self.panes.get_mut(&entry.pane_id) {
                pane.view.total_lines = entry.total_lines;
            }
        }
        for entry in &diff.added {
            self.track_pane(entry, now).await?;
        }
        for (pane_id, dimensions) in diff.resized {
            let ours = self
                .panes
                .get(&pane_id)
                .map(|pane| !pane.echoes.is_empty())
                .unwrap_or(true);
            if ours {
                // Our own update is still on its way through the server
                continue;
            }
            self.debouncer.set_baseline(pane_id, dimensions);
            self.apply_geometry(pane_id, dimensions, now).await?;
        }
        self.sink.topology_changed(&pane_ids);

        if let Some(dimensions) = self.pending_window.take() {
            match self.topology.as_ref().and_then(TopologyState::root) {
                Some(root) => {
                    self.debouncer
                        .push(ResizeEvent::at(root, dimensions, now));
                }
                None => self.pending_window = Some(dimensions),
            }
        }

        if let Some(msg) = self.notifier.resync_complete(now) {
            self.send(msg).await?;
        }
        Ok(())
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use reflow_protocol::{topology_fingerprint, LineRange};

    use crate::resize::NoReflow;

    #[derive(Debug, Default)]
    struct SinkLog {
        applied: Vec<(PaneId, Generation, Vec<LineRange>)>,
        resized: Vec<(PaneId, Dimensions)>,
        pane_errors: Vec<(PaneId, String)>,
        broken: Option<String>,
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<SinkLog>>);

    impl RenderSink for RecordingSink {
        fn apply_lines(
            &mut self,
            pane_id: PaneId,
            generation: Generation,
            ranges: &[RangeContent],
        ) {
            let ranges = ranges.iter().map(|r| r.range).collect();
            self.0.lock().unwrap().applied.push((pane_id, generation, ranges));
        }

        fn pane_resized(&mut self, pane_id: PaneId, dimensions: Dimensions) {
            self.0.lock().unwrap().resized.push((pane_id, dimensions));
        }

        fn on_pane_error(&mut self, pane_id: PaneId, error: &ReflowError) {
            self.0
                .lock()
                .unwrap()
                .pane_errors
                .push((pane_id, error.to_string()));
        }

        fn on_connection_broken(&mut self, error: &ReflowError) {
            self.0.lock().unwrap().broken = Some(error.to_string());
        }
    }

    struct Harness {
        events: mpsc::Sender<PipelineEvent>,
        outgoing: mpsc::Receiver<ClientMessage>,
        sink: Arc<Mutex<SinkLog>>,
        task: JoinHandle<Result<PipelineStats>>,
        domain: DomainId,
        pane: PaneId,
    }

    fn content_for(ranges: &[LineRange]) -> Vec<RangeContent> {
        ranges
            .iter()
            .map(|range| RangeContent {
                range: *range,
                lines: range.rows().map(|row| format!("line {}", row)).collect(),
            })
            .collect()
    }

    fn pane_list(domain: DomainId, pane: PaneId, total_lines: u64) -> ServerMessage {
        let panes = vec![PaneEntry {
            pane_id: pane,
            parent: None,
            split: None,
            dimensions: Dimensions::new(80, 24),
            total_lines,
        }];
        let fp = topology_fingerprint(panes.iter().map(PaneEntry::node));
        ServerMessage::ListPanesResponse {
            domain_id: domain,
            panes,
            topology_fingerprint: fp,
        }
    }

    impl Harness {
        /// Spawn a pipeline attached to a one-pane domain of 80x24
        async fn attached(total_lines: u64) -> Harness {
            let (out_tx, outgoing) = mpsc::channel(1024);
            let sink = RecordingSink::default();
            let log = sink.0.clone();
            let (pipeline, events) = ResizePipeline::new(
                PipelineConfig::default(),
                MessageSender::new(out_tx),
                sink,
                Box::new(NoReflow),
                None,
            );
            let mut h = Harness {
                events,
                outgoing,
                sink: log,
                task: tokio::spawn(pipeline.run()),
                domain: DomainId::new(),
                pane: PaneId::new(),
            };

            assert!(matches!(h.next().await, ClientMessage::Connect { .. }));
            h.server(ServerMessage::Connected {
                server_version: "test".into(),
                protocol_version: PROTOCOL_VERSION,
                domain_id: h.domain,
            })
            .await;
            assert_eq!(
                h.next().await,
                ClientMessage::ResyncRequest { domain_id: h.domain }
            );

            h.server(pane_list(h.domain, h.pane, total_lines)).await;
            let (generation, ranges) = h.expect_fetch().await;
            assert_eq!(generation, Generation(1));
            let top = total_lines.saturating_sub(24);
            assert_eq!(ranges, vec![LineRange::new(top, top + 24)]);
            h.answer_fetch(generation, total_lines, &ranges).await;
            h
        }

        async fn next(&mut self) -> ClientMessage {
            self.outgoing.recv().await.unwrap()
        }

        /// Next message if one shows up before the pipeline goes quiet
        async fn maybe_next(&mut self) -> Option<ClientMessage> {
            tokio::time::timeout(Duration::from_millis(200), self.outgoing.recv())
                .await
                .ok()
                .flatten()
        }

        async fn expect_fetch(&mut self) -> (Generation, Vec<LineRange>) {
            match self.next().await {
                ClientMessage::FetchRequest {
                    pane_id,
                    generation,
                    ranges,
                } => {
                    assert_eq!(pane_id, self.pane);
                    (generation, ranges)
                }
                other => panic!("expected FetchRequest, got {:?}", other),
            }
        }

        async fn server(&self, msg: ServerMessage) {
            self.events.send(PipelineEvent::Server(msg)).await.unwrap();
        }

        async fn answer_fetch(
            &self,
            generation: Generation,
            total_lines: u64,
            ranges: &[LineRange],
        ) {
            self.server(ServerMessage::FetchResponse {
                pane_id: self.pane,
                generation,
                total_lines,
                ranges: content_for(ranges),
            })
            .await;
        }

        async fn ack(&self, cols: u16, rows: u16, fingerprint: TopologyFingerprint) {
            self.server(ServerMessage::SizeUpdated {
                pane_id: self.pane,
                cols,
                rows,
                topology_fingerprint: fingerprint,
            })
            .await;
        }

        async fn resize(&self, cols: u16, rows: u16) {
            self.events
                .send(PipelineEvent::Resize(ResizeEvent::new(self.pane, cols, rows)))
                .await
                .unwrap();
        }

        fn fingerprint(&self) -> TopologyFingerprint {
            topology_fingerprint(vec![reflow_protocol::TopologyNode {
                pane_id: self.pane,
                parent: None,
                split: None,
            }])
        }

        async fn shutdown(self) -> (Result<PipelineStats>, Arc<Mutex<SinkLog>>) {
            let _ = self.events.send(PipelineEvent::Shutdown).await;
            (self.task.await.unwrap(), self.sink)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resize_storm_yields_one_update_and_one_fetch() {
        let mut h = Harness::attached(100_000).await;

        for i in 0..300u16 {
            h.resize(80, 24 + (i % 40)).await;
            tokio::time::advance(Duration::from_millis(5)).await;
        }
        h.resize(80, 50).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(
            h.next().await,
            ClientMessage::SizeOnlyUpdate {
                pane_id: h.pane,
                cols: 80,
                rows: 50,
            }
        );
        let (generation, ranges) = h.expect_fetch().await;
        assert_eq!(generation, Generation(2));
        assert_eq!(ranges, vec![LineRange::new(99_950, 99_976)]);

        let fp = h.fingerprint();
        h.ack(80, 50, fp).await;
        h.answer_fetch(generation, 100_000, &ranges).await;
        assert_eq!(h.maybe_next().await, None);

        let (stats, sink) = h.shutdown().await;
        let stats = stats.unwrap();
        assert_eq!(stats.raw_events, 301);
        assert_eq!(stats.settled, 1);
        assert_eq!(stats.size_only, 1);
        assert_eq!(stats.resyncs, 1);
        assert_eq!(stats.rows_invalidated, 26);
        assert_eq!(stats.fetch_requests, 2);
        assert_eq!(sink.lock().unwrap().applied.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_back_to_start_sends_nothing() {
        let mut h = Harness::attached(1_000).await;

        for rows in [30u16, 40, 50, 40, 24] {
            h.resize(80, rows).await;
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        assert_eq!(h.maybe_next().await, None);

        let (stats, _) = h.shutdown().await;
        let stats = stats.unwrap();
        assert_eq!(stats.settled, 0);
        assert_eq!(stats.suppressed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_fetches_uncached_rows_after_window() {
        let mut h = Harness::attached(1_000).await;
        let window = Duration::from_millis(DEFAULT_FETCH_COALESCE_MS);

        let start = Instant::now();
        h.events
            .send(PipelineEvent::ScrollTo {
                pane_id: h.pane,
                offset: 10,
            })
            .await
            .unwrap();
        tokio::task::yield_now().await;
        tokio::time::advance(window - Duration::from_millis(1)).await;
        assert!(h.outgoing.try_recv().is_err());

        let (generation, ranges) = h.expect_fetch().await;
        assert!(start.elapsed() >= window);
        assert_eq!(generation, Generation(2));
        // Rows 976.. are already cached from the initial viewport
        assert_eq!(ranges, vec![LineRange::new(966, 976)]);
        h.answer_fetch(generation, 1_000, &ranges).await;

        // Back to the bottom: everything visible is cached
        h.events
            .send(PipelineEvent::ScrollTo {
                pane_id: h.pane,
                offset: 0,
            })
            .await
            .unwrap();
        assert_eq!(h.maybe_next().await, None);

        let (stats, sink) = h.shutdown().await;
        let stats = stats.unwrap();
        assert_eq!(stats.fetch_requests, 2);
        assert_eq!(stats.fetch_applied, 2);
        assert_eq!(sink.lock().unwrap().applied.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_size_update_takes_server_geometry() {
        let mut h = Harness::attached(1_000).await;

        h.resize(80, 30).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(matches!(h.next().await, ClientMessage::SizeOnlyUpdate { rows: 30, .. }));
        let (generation, ranges) = h.expect_fetch().await;
        assert_eq!(ranges, vec![LineRange::new(970, 976)]);
        h.answer_fetch(generation, 1_000, &ranges).await;

        h.server(ServerMessage::Error {
            code: ErrorCode::InvalidOperation,
            message: "rejected".into(),
        })
        .await;
        assert_eq!(
            h.next().await,
            ClientMessage::ResyncRequest { domain_id: h.domain }
        );

        // The server kept the pane at 80x24
        h.server(pane_list(h.domain, h.pane, 1_000)).await;
        assert_eq!(h.maybe_next().await, None);
        assert_eq!(
            h.sink.lock().unwrap().resized.last(),
            Some(&(h.pane, Dimensions::new(80, 24)))
        );

        // Asking for 80x30 again is a real change, not a no-op burst
        h.resize(80, 30).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            h.next().await,
            ClientMessage::SizeOnlyUpdate {
                pane_id: h.pane,
                cols: 80,
                rows: 30,
            }
        );
        let (_, ranges) = h.expect_fetch().await;
        assert_eq!(ranges, vec![LineRange::new(970, 976)]);

        let (stats, _) = h.shutdown().await;
        assert_eq!(stats.unwrap().size_only, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fetch_response_is_dropped() {
        let mut h = Harness::attached(1_000).await;
        let fp = h.fingerprint();

        h.resize(80, 30).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(matches!(h.next().await, ClientMessage::SizeOnlyUpdate { .. }));
        let (g2, first) = h.expect_fetch().await;

        h.resize(80, 40).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(matches!(h.next().await, ClientMessage::SizeOnlyUpdate { .. }));
        let (g3, second) = h.expect_fetch().await;
        assert_eq!(g3, g2.next());
        // The superseded rows ride along with the newer request
        assert!(second
            .iter()
            .any(|r| r.start <= first[0].start && first[0].end <= r.end));

        h.ack(80, 30, fp).await;
        h.ack(80, 40, fp).await;
        h.answer_fetch(g3, 1_000, &second).await;
        h.answer_fetch(g2, 1_000, &first).await;

        let (stats, sink) = h.shutdown().await;
        let stats = stats.unwrap();
        assert_eq!(stats.stale_dropped, 1);
        let applied = &sink.lock().unwrap().applied;
        assert_eq!(applied.last().map(|a| a.1), Some(g3));
        assert!(applied.iter().all(|a| a.1 != g2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_split_forces_resync_on_next_resize() {
        let mut h = Harness::attached(1_000).await;

        h.events
            .send(PipelineEvent::Split {
                pane_id: h.pane,
                direction: SplitDirection::Vertical,
            })
            .await
            .unwrap();
        assert_eq!(
            h.next().await,
            ClientMessage::SplitPane {
                pane_id: h.pane,
                direction: SplitDirection::Vertical,
            }
        );

        h.resize(100, 24).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(matches!(h.next().await, ClientMessage::SizeOnlyUpdate { .. }));
        assert_eq!(
            h.next().await,
            ClientMessage::ResyncRequest { domain_id: h.domain }
        );

        let (stats, _) = h.shutdown().await;
        let stats = stats.unwrap();
        assert_eq!(stats.size_only, 0);
        assert_eq!(stats.resyncs, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fingerprint_mismatch_triggers_resync() {
        let mut h = Harness::attached(1_000).await;

        h.resize(80, 30).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(matches!(h.next().await, ClientMessage::SizeOnlyUpdate { .. }));
        let (generation, ranges) = h.expect_fetch().await;
        h.answer_fetch(generation, 1_000, &ranges).await;

        h.ack(80, 30, TopologyFingerprint(0x1234)).await;
        assert_eq!(
            h.next().await,
            ClientMessage::ResyncRequest { domain_id: h.domain }
        );

        let (stats, sink) = h.shutdown().await;
        assert_eq!(stats.unwrap().mismatches, 1);
        assert_eq!(sink.lock().unwrap().pane_errors.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_retries_with_new_generation() {
        let mut h = Harness::attached(1_000).await;

        h.resize(80, 30).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(matches!(h.next().await, ClientMessage::SizeOnlyUpdate { .. }));
        let fp = h.fingerprint();
        h.ack(80, 30, fp).await;
        let (first, ranges) = h.expect_fetch().await;

        tokio::time::sleep(Duration::from_millis(DEFAULT_RPC_TIMEOUT_MS + 10)).await;
        let (retry, retry_ranges) = h.expect_fetch().await;
        assert_eq!(retry, first.next());
        assert_eq!(retry_ranges, ranges);

        let (stats, sink) = h.shutdown().await;
        assert_eq!(stats.unwrap().timeouts, 1);
        let sink = sink.lock().unwrap();
        assert_eq!(sink.pane_errors.len(), 1);
        assert!(sink.pane_errors[0].1.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroyed_pane_never_emits() {
        let mut h = Harness::attached(1_000).await;

        h.resize(80, 30).await;
        h.events
            .send(PipelineEvent::PaneDestroyed(h.pane))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.maybe_next().await, None);

        let (stats, _) = h.shutdown().await;
        assert_eq!(stats.unwrap().settled, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_resize_echo_is_ignored() {
        let mut h = Harness::attached(1_000).await;
        let fp = h.fingerprint();

        h.resize(80, 30).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(matches!(h.next().await, ClientMessage::SizeOnlyUpdate { .. }));
        let (generation, ranges) = h.expect_fetch().await;
        h.ack(80, 30, fp).await;
        h.answer_fetch(generation, 1_000, &ranges).await;

        h.server(ServerMessage::PaneResized {
            pane_id: h.pane,
            cols: 80,
            rows: 30,
        })
        .await;
        assert_eq!(h.maybe_next().await, None);

        // A size settled by someone else is fetched but not sent back
        h.server(ServerMessage::PaneResized {
            pane_id: h.pane,
            cols: 80,
            rows: 36,
        })
        .await;
        let (_, ranges) = h.expect_fetch().await;
        assert_eq!(ranges, vec![LineRange::new(964, 970)]);
        assert_eq!(h.maybe_next().await, None);

        let (stats, _) = h.shutdown().await;
        assert_eq!(stats.unwrap().size_only, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_future_generation_breaks_connection() {
        let h = Harness::attached(1_000).await;

        h.answer_fetch(Generation(99), 1_000, &[]).await;
        let (result, sink) = h.shutdown().await;
        assert!(matches!(result, Err(ReflowError::FatalProtocol(_))));
        assert!(sink.lock().unwrap().broken.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_protocol_mismatch_is_fatal() {
        let (out_tx, mut outgoing) = mpsc::channel(16);
        let sink = RecordingSink::default();
        let (pipeline, events) = ResizePipeline::new(
            PipelineConfig::default(),
            MessageSender::new(out_tx),
            sink,
            Box::new(NoReflow),
            None,
        );
        let task = tokio::spawn(pipeline.run());
        assert!(matches!(
            outgoing.recv().await,
            Some(ClientMessage::Connect { .. })
        ));

        events
            .send(PipelineEvent::Server(ServerMessage::Connected {
                server_version: "old".into(),
                protocol_version: PROTOCOL_VERSION + 1,
                domain_id: DomainId::new(),
            }))
            .await
            .unwrap();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(ReflowError::ProtocolMismatch { .. })));
    }
}
