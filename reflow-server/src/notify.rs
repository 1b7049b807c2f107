//! Server-side resize notification coalescing
//!
//! Several code paths can resize a pane: a client's size update, the
//! terminal backend, layout recalculation after a close, a split. Each of
//! them raises a [`ResizeSignal`] into one channel. The coalescer drains
//! that channel, merges every signal for a pane inside one window under a
//! single [`PendingResizeSignal`] key, and when the window ends broadcasts
//! exactly one `PaneResized` carrying the geometry the pane has *then*.
//!
//! Windows are fixed from the first signal, so a steady trickle of signals
//! still produces a notification every window instead of none at all.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use reflow_protocol::{DomainId, PaneId, ServerMessage};

use crate::config::ConfigHandle;
use crate::domain::SharedDomains;
use crate::registry::ClientRegistry;

/// Code path that changed a pane's geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResizeSource {
    /// A client's SizeOnlyUpdate
    ClientRequest,
    /// The terminal backend reported a new size
    Pty,
    /// Space handed back after a close
    Layout,
    /// Space taken by a split
    Split,
}

/// One raise from one code path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeSignal {
    pub pane_id: PaneId,
    pub source: ResizeSource,
}

/// Dedup key for one coalescing window of one pane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingResizeSignal {
    pub pane_id: PaneId,
    pub resize_epoch: u64,
}

/// Cloneable handle used by raisers
#[derive(Debug, Clone)]
pub struct ResizeSignalSender {
    tx: mpsc::UnboundedSender<ResizeSignal>,
}

impl ResizeSignalSender {
    /// Raise a signal; false once the coalescer is gone
    pub fn raise(&self, pane_id: PaneId, source: ResizeSource) -> bool {
        self.tx.send(ResizeSignal { pane_id, source }).is_ok()
    }
}

/// Create the single channel every raiser sends into
pub fn resize_signal_channel() -> (ResizeSignalSender, mpsc::UnboundedReceiver<ResizeSignal>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ResizeSignalSender { tx }, rx)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoalescerStats {
    pub raised: u64,
    pub notified: u64,
    /// Windows whose pane was gone at flush time
    pub dropped: u64,
}

#[derive(Debug)]
struct PendingWindow {
    key: PendingResizeSignal,
    deadline: Instant,
    sources: Vec<ResizeSource>,
    raised: u32,
}

/// Merges resize signals into one `PaneResized` per pane per window
pub struct ServerNotificationCoalescer {
    domains: SharedDomains,
    registry: Arc<ClientRegistry>,
    config: ConfigHandle,
    pending: HashMap<PaneId, PendingWindow>,
    next_epoch: u64,
    stats: CoalescerStats,
}

impl ServerNotificationCoalescer {
    pub fn new(
        domains: SharedDomains,
        registry: Arc<ClientRegistry>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            domains,
            registry,
            config,
            pending: HashMap::new(),
            next_epoch: 1,
            stats: CoalescerStats::default(),
        }
    }

    pub fn stats(&self) -> CoalescerStats {
        self.stats
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fold a signal into its pane's window, opening one if needed
    pub fn raise(&mut self, signal: ResizeSignal, now: Instant) -> PendingResizeSignal {
        self.stats.raised += 1;
        if let Some(window) = self.pending.get_mut(&signal.pane_id) {
            window.raised += 1;
            if !window.sources.contains(&signal.source) {
                window.sources.push(signal.source);
            }
            trace!(pane_id = %signal.pane_id, source = ?signal.source, "Merged resize signal");
            return window.key;
        }

        let key = PendingResizeSignal {
            pane_id: signal.pane_id,
            resize_epoch: self.next_epoch,
        };
        self.next_epoch += 1;
        // Read per window so a reload takes effect on the next one
        let window = self.config.load().notify.window();
        self.pending.insert(
            signal.pane_id,
            PendingWindow {
                key,
                deadline: now + window,
                sources: vec![signal.source],
                raised: 1,
            },
        );
        key
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|w| w.deadline).min()
    }

    /// Close every window that ended by `now`
    pub fn take_due(&mut self, now: Instant) -> Vec<PendingResizeSignal> {
        let due: Vec<PaneId> = self
            .pending
            .iter()
            .filter(|(_, w)| w.deadline <= now)
            .map(|(pane_id, _)| *pane_id)
            .collect();

        let mut keys = Vec::with_capacity(due.len());
        for pane_id in due {
            if let Some(window) = self.pending.remove(&pane_id) {
                debug!(
                    pane_id = %pane_id,
                    epoch = window.key.resize_epoch,
                    raised = window.raised,
                    sources = ?window.sources,
                    "Resize window closed"
                );
                keys.push(window.key);
            }
        }
        keys.sort_by_key(|k| k.resize_epoch);
        keys
    }

    /// Build notifications from the geometry panes have right now
    pub fn resolve(&mut self, keys: &[PendingResizeSignal]) -> Vec<(DomainId, ServerMessage)> {
        let domains = self.domains.read();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let found = domains
                .domain_of(key.pane_id)
                .and_then(|domain_id| Some((domain_id, domains.find_pane(key.pane_id)?)));
            match found {
                Some((domain_id, pane)) => {
                    let dims = pane.dimensions();
                    out.push((
                        domain_id,
                        ServerMessage::PaneResized {
                            pane_id: key.pane_id,
                            cols: dims.cols,
                            rows: dims.rows,
                        },
                    ));
                }
                None => {
                    self.stats.dropped += 1;
                    trace!(pane_id = %key.pane_id, "Pane gone before notification");
                }
            }
        }
        self.stats.notified += out.len() as u64;
        out
    }

    pub fn flush_due(&mut self, now: Instant) -> Vec<(DomainId, ServerMessage)> {
        let keys = self.take_due(now);
        if keys.is_empty() {
            return Vec::new();
        }
        self.resolve(&keys)
    }

    /// Drain signals until the channel closes or `cancel` fires
    pub async fn run(
        mut self,
        mut signals: mpsc::UnboundedReceiver<ResizeSignal>,
        cancel: CancellationToken,
    ) -> CoalescerStats {
        info!("Resize notification coalescer started");
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = wait_until(deadline) => {
                    for (domain_id, msg) in self.flush_due(Instant::now()) {
                        self.registry.broadcast_to_domain(domain_id, msg).await;
                    }
                }

                signal = signals.recv() => match signal {
                    Some(signal) => {
                        self.raise(signal, Instant::now());
                    }
                    None => break,
                },
            }
        }
        info!(stats = ?self.stats, "Resize notification coalescer stopped");
        self.stats
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use reflow_protocol::{Dimensions, SplitDirection};

    use crate::config::new_config_handle;
    use crate::domain::DomainManager;

    struct Fixture {
        domains: SharedDomains,
        registry: Arc<ClientRegistry>,
        domain: DomainId,
        root: PaneId,
        rx: mpsc::Receiver<ServerMessage>,
    }

    fn fixture() -> Fixture {
        let domains = DomainManager::shared(Default::default());
        let (domain, root) = {
            let manager = domains.read();
            let domain = manager.default_domain();
            (domain, manager.domain(domain).unwrap().root())
        };
        let registry = Arc::new(ClientRegistry::new());
        let (tx, rx) = mpsc::channel(64);
        let client = registry.register_client(tx);
        registry.attach_to_domain(client, domain);
        Fixture {
            domains,
            registry,
            domain,
            root,
            rx,
        }
    }

    fn coalescer(f: &Fixture) -> ServerNotificationCoalescer {
        ServerNotificationCoalescer::new(
            Arc::clone(&f.domains),
            Arc::clone(&f.registry),
            new_config_handle(),
        )
    }

    fn signal(pane_id: PaneId, source: ResizeSource) -> ResizeSignal {
        ResizeSignal { pane_id, source }
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_raises_one_notification() {
        let f = fixture();
        let mut coalescer = coalescer(&f);
        let start = Instant::now();

        let sources = [
            ResizeSource::ClientRequest,
            ResizeSource::Pty,
            ResizeSource::Layout,
        ];
        let mut keys = Vec::new();
        for i in 0..300u16 {
            keys.push(coalescer.raise(signal(f.root, sources[i as usize % 3]), start));
        }
        assert!(keys.iter().all(|k| *k == keys[0]));
        assert_eq!(coalescer.pending_count(), 1);
        assert_eq!(coalescer.next_deadline(), Some(start + Duration::from_millis(16)));

        assert!(coalescer.flush_due(start + Duration::from_millis(15)).is_empty());
        let out = coalescer.flush_due(start + Duration::from_millis(16));
        assert_eq!(out.len(), 1);
        assert_eq!(coalescer.stats().raised, 300);
        assert_eq!(coalescer.stats().notified, 1);
        assert_eq!(coalescer.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_geometry_read_at_flush_time() {
        let f = fixture();
        let mut coalescer = coalescer(&f);
        let start = Instant::now();

        coalescer.raise(signal(f.root, ResizeSource::Pty), start);
        f.domains
            .write()
            .resize_pane(f.root, Dimensions::new(100, 40))
            .unwrap();
        coalescer.raise(signal(f.root, ResizeSource::Pty), start);
        f.domains
            .write()
            .resize_pane(f.root, Dimensions::new(120, 50))
            .unwrap();

        let out = coalescer.flush_due(start + Duration::from_millis(16));
        assert_eq!(
            out,
            vec![(
                f.domain,
                ServerMessage::PaneResized {
                    pane_id: f.root,
                    cols: 120,
                    rows: 50
                }
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_pane_dropped() {
        let f = fixture();
        let mut coalescer = coalescer(&f);
        let start = Instant::now();

        let child = f
            .domains
            .write()
            .split_pane(f.root, SplitDirection::Vertical)
            .unwrap()
            .new_pane;
        coalescer.raise(signal(child, ResizeSource::Split), start);
        coalescer.raise(signal(f.root, ResizeSource::Split), start);
        f.domains.write().close_pane(child).unwrap();

        let out = coalescer.flush_due(start + Duration::from_millis(16));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1.pane_id(), Some(f.root));
        assert_eq!(coalescer.stats().dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_window_gets_new_epoch() {
        let f = fixture();
        let mut coalescer = coalescer(&f);
        let start = Instant::now();

        let first = coalescer.raise(signal(f.root, ResizeSource::Pty), start);
        coalescer.flush_due(start + Duration::from_millis(16));
        let second = coalescer.raise(
            signal(f.root, ResizeSource::Pty),
            start + Duration::from_millis(20),
        );
        assert_eq!(first.pane_id, second.pane_id);
        assert!(second.resize_epoch > first.resize_epoch);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reloaded_window_applies_to_next_window() {
        let f = fixture();
        let config = new_config_handle();
        let mut coalescer = ServerNotificationCoalescer::new(
            Arc::clone(&f.domains),
            Arc::clone(&f.registry),
            Arc::clone(&config),
        );
        let mut updated = (**config.load()).clone();
        updated.notify.coalesce_ms = 40;
        config.store(Arc::new(updated));

        let start = Instant::now();
        coalescer.raise(signal(f.root, ResizeSource::Pty), start);
        assert_eq!(coalescer.next_deadline(), Some(start + Duration::from_millis(40)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_broadcasts_once() {
        let mut f = fixture();
        let coalescer = coalescer(&f);
        let (sender, rx) = resize_signal_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(coalescer.run(rx, cancel.clone()));

        for _ in 0..50 {
            assert!(sender.raise(f.root, ResizeSource::ClientRequest));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let msg = f.rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMessage::PaneResized { pane_id, .. } if pane_id == f.root));
        assert!(f.rx.try_recv().is_err());

        cancel.cancel();
        let stats = task.await.unwrap();
        assert_eq!(stats.raised, 50);
        assert_eq!(stats.notified, 1);
    }
}
