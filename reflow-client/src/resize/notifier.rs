//! Resize notification
//!
//! Decides how a settled resize reaches the server. A pure dimension change
//! against a confirmed, clean topology goes out as a SizeOnlyUpdate. Anything
//! that might have altered the split structure also asks for a full resync
//! of the domain's pane list.
//!
//! | topology state                                  | decision |
//! |-------------------------------------------------|----------|
//! | pane not cached, or domain never resynced       | Unknown  |
//! | dirty (split, close, TopologyChanged, mismatch) | Resync   |
//! | cached fingerprint differs from confirmed one   | Resync   |
//! | otherwise                                       | SizeOnly |

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use reflow_protocol::{ClientMessage, Dimensions, DomainId, PaneId, TopologyFingerprint};
use reflow_utils::ReflowError;

use super::debounce::SettledResize;
use super::topology::TopologyState;

/// How a settled resize is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeDecision {
    /// Geometry only; the topology is known not to have changed
    SizeOnly,
    /// The topology may have changed; refetch the pane list
    Resync,
    /// Nothing trustworthy is cached for the pane; treated as Resync
    Unknown,
}

impl ResizeDecision {
    pub fn requires_resync(&self) -> bool {
        !matches!(self, ResizeDecision::SizeOnly)
    }
}

/// Messages produced for one settled resize
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub decision: ResizeDecision,
    pub messages: Vec<ClientMessage>,
}

/// Result of a SizeUpdated acknowledgement
#[derive(Debug)]
pub enum AckOutcome {
    /// Server applied the size under the expected topology
    Confirmed,
    /// Server's fingerprint disagrees with the confirmed one
    Mismatch(ReflowError),
    /// No update for this pane was waiting on an ack
    Unsolicited,
}

/// A control RPC that went unanswered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiredControl {
    SizeUpdate { pane_id: PaneId, attempt: u32 },
    Resync { domain_id: DomainId, attempt: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifierStats {
    pub size_only: u64,
    pub resyncs: u64,
    pub mismatches: u64,
    pub timeouts: u64,
}

#[derive(Debug)]
struct PendingAck {
    deadline: Instant,
    attempt: u32,
}

#[derive(Debug)]
struct PendingResync {
    domain_id: DomainId,
    deadline: Instant,
    attempt: u32,
    /// Another resync was asked for after this one went out
    rerun: bool,
}

/// Chooses between size-only updates and full resyncs
#[derive(Debug)]
pub struct ResizeNotifier {
    rpc_timeout: Duration,
    acks: HashMap<PaneId, PendingAck>,
    resync: Option<PendingResync>,
    stats: NotifierStats,
}

impl ResizeNotifier {
    pub fn new(rpc_timeout: Duration) -> Self {
        Self {
            rpc_timeout,
            acks: HashMap::new(),
            resync: None,
            stats: NotifierStats::default(),
        }
    }

    pub fn stats(&self) -> NotifierStats {
        self.stats
    }

    pub fn resync_in_flight(&self) -> bool {
        self.resync.is_some()
    }

    pub fn awaiting_ack(&self, pane_id: PaneId) -> bool {
        self.acks.contains_key(&pane_id)
    }

    /// Classify a settled resize against the cached topology
    pub fn decide(&self, topology: &TopologyState, settled: &SettledResize) -> ResizeDecision {
        if !topology.is_synced() || !topology.contains(settled.pane_id) {
            return ResizeDecision::Unknown;
        }
        if topology.is_dirty() {
            return ResizeDecision::Resync;
        }
        if topology.confirmed_fingerprint() != Some(topology.fingerprint()) {
            return ResizeDecision::Resync;
        }
        ResizeDecision::SizeOnly
    }

    /// Decide and build the messages for a settled resize
    ///
    /// The new geometry always goes out as a SizeOnlyUpdate so the server
    /// applies it; the resync paths add a ResyncRequest behind it.
    pub fn dispatch(
        &mut self,
        topology: &mut TopologyState,
        settled: &SettledResize,
        now: Instant,
    ) -> Dispatch {
        let decision = self.decide(topology, settled);
        debug!(
            pane_id = %settled.pane_id,
            from = %settled.old,
            to = %settled.new,
            ?decision,
            "Dispatching settled resize"
        );

        let mut messages = vec![self.size_update(settled.pane_id, settled.new, 0, now)];
        topology.apply_size_only(settled.pane_id, settled.new);

        match decision {
            ResizeDecision::SizeOnly => self.stats.size_only += 1,
            ResizeDecision::Resync | ResizeDecision::Unknown => {
                messages.extend(self.request_resync(topology.domain_id(), now));
            }
        }

        Dispatch { decision, messages }
    }

    /// Resend a size update with the pane's current cached size
    pub fn retry_size_update(
        &mut self,
        topology: &TopologyState,
        pane_id: PaneId,
        attempt: u32,
        now: Instant,
    ) -> Option<ClientMessage> {
        let dimensions = topology.geometry(pane_id)?.dimensions;
        Some(self.size_update(pane_id, dimensions, attempt, now))
    }

    fn size_update(
        &mut self,
        pane_id: PaneId,
        dimensions: Dimensions,
        attempt: u32,
        now: Instant,
    ) -> ClientMessage {
        self.acks.insert(
            pane_id,
            PendingAck {
                deadline: now + self.rpc_timeout,
                attempt,
            },
        );
        ClientMessage::SizeOnlyUpdate {
            pane_id,
            cols: dimensions.cols,
            rows: dimensions.rows,
        }
    }

    /// Ask for the domain's pane list
    ///
    /// While a resync is outstanding further requests are folded into one
    /// rerun sent once the outstanding one completes.
    pub fn request_resync(&mut self, domain_id: DomainId, now: Instant) -> Option<ClientMessage> {
        if let Some(pending) = self.resync.as_mut() {
            pending.rerun = true;
            return None;
        }
        Some(self.send_resync(domain_id, 0, now))
    }

    fn send_resync(&mut self, domain_id: DomainId, attempt: u32, now: Instant) -> ClientMessage {
        self.stats.resyncs += 1;
        self.resync = Some(PendingResync {
            domain_id,
            deadline: now + self.rpc_timeout,
            attempt,
            rerun: false,
        });
        ClientMessage::ResyncRequest { domain_id }
    }

    /// Resend a resync that timed out
    pub fn retry_resync(
        &mut self,
        domain_id: DomainId,
        attempt: u32,
        now: Instant,
    ) -> ClientMessage {
        self.send_resync(domain_id, attempt, now)
    }

    /// A pane list arrived; returns the rerun request if one was folded in
    pub fn resync_complete(&mut self, now: Instant) -> Option<ClientMessage> {
        let pending = self.resync.take()?;
        if pending.rerun {
            Some(self.send_resync(pending.domain_id, 0, now))
        } else {
            None
        }
    }

    /// Check a SizeUpdated ack against the confirmed fingerprint
    pub fn on_ack(
        &mut self,
        topology: &mut TopologyState,
        pane_id: PaneId,
        server_fingerprint: TopologyFingerprint,
    ) -> AckOutcome {
        if self.acks.remove(&pane_id).is_none() {
            return AckOutcome::Unsolicited;
        }
        // A resync on its way settles the structure either way
        if self.resync.is_some() || topology.is_dirty() {
            return AckOutcome::Confirmed;
        }

        match topology.confirmed_fingerprint() {
            Some(expected) if expected != server_fingerprint => {
                self.stats.mismatches += 1;
                warn!(
                    domain_id = %topology.domain_id(),
                    pane_id = %pane_id,
                    %expected,
                    actual = %server_fingerprint,
                    "Topology changed under a size-only update"
                );
                topology.mark_dirty("fingerprint mismatch");
                AckOutcome::Mismatch(ReflowError::TopologyMismatch {
                    domain: topology.domain_id().to_string(),
                    expected: expected.to_string(),
                    actual: server_fingerprint.to_string(),
                })
            }
            _ => AckOutcome::Confirmed,
        }
    }

    /// Forget anything outstanding for a pane
    pub fn remove_pane(&mut self, pane_id: PaneId) {
        self.acks.remove(&pane_id);
    }

    /// Expire unanswered control RPCs
    pub fn expire(&mut self, now: Instant) -> Vec<ExpiredControl> {
        let mut expired: Vec<ExpiredControl> = Vec::new();

        let due: Vec<PaneId> = self
            .acks
            .iter()
            .filter(|(_, ack)| ack.deadline <= now)
            .map(|(pane_id, _)| *pane_id)
            .collect();
        for pane_id in due {
            if let Some(ack) = self.acks.remove(&pane_id) {
                expired.push(ExpiredControl::SizeUpdate {
                    pane_id,
                    attempt: ack.attempt + 1,
                });
            }
        }

        if matches!(&self.resync, Some(r) if r.deadline <= now) {
            if let Some(r) = self.resync.take() {
                expired.push(ExpiredControl::Resync {
                    domain_id: r.domain_id,
                    attempt: r.attempt + 1,
                });
            }
        }

        self.stats.timeouts += expired.len() as u64;
        expired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.acks
            .values()
            .map(|ack| ack.deadline)
            .chain(self.resync.as_ref().map(|r| r.deadline))
            .min()
    }
}
