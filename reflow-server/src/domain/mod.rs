//! Domains and their panes
//!
//! A domain is one split tree of panes. The manager owns every domain and
//! is shared between connection handlers, the notification coalescer and
//! the fetch responder behind a single lock.

mod pane;
mod scrollback;

pub use pane::ServerPane;
pub use scrollback::ScrollbackBuffer;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info};

use reflow_protocol::{
    topology_fingerprint, Dimensions, DomainId, ErrorCode, PaneEntry, PaneId, SplitDirection,
    TopologyFingerprint,
};

use crate::config::TerminalConfig;
use crate::registry::ClientId;

/// Domain state shared across tasks
pub type SharedDomains = Arc<RwLock<DomainManager>>;

/// Failures of domain operations, reported to clients as error codes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("domain not found: {0}")]
    DomainNotFound(DomainId),

    #[error("pane not found: {0}")]
    PaneNotFound(PaneId),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl DomainError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DomainError::DomainNotFound(_) => ErrorCode::DomainNotFound,
            DomainError::PaneNotFound(_) => ErrorCode::PaneNotFound,
            DomainError::InvalidOperation(_) => ErrorCode::InvalidOperation,
        }
    }
}

pub type DomainResult<T> = std::result::Result<T, DomainError>;

/// Result of splitting a pane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitOutcome {
    pub domain_id: DomainId,
    pub new_pane: PaneId,
    pub parent: PaneId,
    pub parent_dimensions: Dimensions,
}

/// Result of closing a pane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseOutcome {
    pub domain_id: DomainId,
    /// Pane that received the freed space
    pub parent: PaneId,
    pub parent_dimensions: Dimensions,
}

/// One split tree of panes
#[derive(Debug)]
pub struct Domain {
    id: DomainId,
    root: PaneId,
    panes: HashMap<PaneId, ServerPane>,
}

impl Domain {
    /// Create a domain holding a single root pane
    pub fn new(dimensions: Dimensions, scrollback_lines: usize) -> Self {
        let root = ServerPane::new(dimensions, scrollback_lines);
        let root_id = root.id();
        let mut panes = HashMap::new();
        panes.insert(root_id, root);
        Self {
            id: DomainId::new(),
            root: root_id,
            panes,
        }
    }

    pub fn id(&self) -> DomainId {
        self.id
    }

    pub fn root(&self) -> PaneId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.panes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panes.is_empty()
    }

    pub fn contains(&self, pane_id: PaneId) -> bool {
        self.panes.contains_key(&pane_id)
    }

    pub fn pane(&self, pane_id: PaneId) -> Option<&ServerPane> {
        self.panes.get(&pane_id)
    }

    pub fn pane_mut(&mut self, pane_id: PaneId) -> Option<&mut ServerPane> {
        self.panes.get_mut(&pane_id)
    }

    pub fn panes(&self) -> impl Iterator<Item = &ServerPane> {
        self.panes.values()
    }

    /// Pane list sorted by id, as sent in a resync
    pub fn entries(&self) -> Vec<PaneEntry> {
        let mut entries: Vec<PaneEntry> = self.panes.values().map(ServerPane::entry).collect();
        entries.sort_by_key(|e| e.pane_id);
        entries
    }

    pub fn fingerprint(&self) -> TopologyFingerprint {
        topology_fingerprint(self.panes.values().map(ServerPane::node))
    }

    /// Split `pane_id`, giving half of it to a new child pane
    ///
    /// Horizontal splits share columns, vertical splits share rows. The
    /// parent keeps the larger half.
    pub fn split(
        &mut self,
        pane_id: PaneId,
        direction: SplitDirection,
        scrollback_lines: usize,
    ) -> DomainResult<SplitOutcome> {
        let parent = self
            .panes
            .get_mut(&pane_id)
            .ok_or(DomainError::PaneNotFound(pane_id))?;
        let dims = parent.dimensions();

        let (parent_dims, child_dims) = match direction {
            SplitDirection::Horizontal => {
                if dims.cols < 2 {
                    return Err(DomainError::InvalidOperation(format!(
                        "pane {} is too narrow to split",
                        pane_id
                    )));
                }
                let child = dims.cols / 2;
                (
                    Dimensions::new(dims.cols - child, dims.rows),
                    Dimensions::new(child, dims.rows),
                )
            }
            SplitDirection::Vertical => {
                if dims.rows < 2 {
                    return Err(DomainError::InvalidOperation(format!(
                        "pane {} is too short to split",
                        pane_id
                    )));
                }
                let child = dims.rows / 2;
                (
                    Dimensions::new(dims.cols, dims.rows - child),
                    Dimensions::new(dims.cols, child),
                )
            }
        };

        parent.resize(parent_dims);
        let child = ServerPane::with_parent(
            Some(pane_id),
            Some(direction),
            child_dims,
            scrollback_lines,
        );
        let new_pane = child.id();
        self.panes.insert(new_pane, child);

        Ok(SplitOutcome {
            domain_id: self.id,
            new_pane,
            parent: pane_id,
            parent_dimensions: parent_dims,
        })
    }

    /// Close `pane_id`, handing its children and its space to its parent
    pub fn close(&mut self, pane_id: PaneId) -> DomainResult<CloseOutcome> {
        if pane_id == self.root {
            return Err(DomainError::InvalidOperation(format!(
                "pane {} is the domain root",
                pane_id
            )));
        }
        let closed = self
            .panes
            .remove(&pane_id)
            .ok_or(DomainError::PaneNotFound(pane_id))?;
        let parent_id = closed.parent().unwrap_or(self.root);

        for pane in self.panes.values_mut() {
            if pane.parent() == Some(pane_id) {
                pane.set_parent(Some(parent_id));
            }
        }

        let freed = closed.dimensions();
        let parent = self
            .panes
            .get_mut(&parent_id)
            .ok_or(DomainError::PaneNotFound(parent_id))?;
        let dims = parent.dimensions();
        let grown = match closed.split() {
            Some(SplitDirection::Horizontal) => {
                Dimensions::new(dims.cols.saturating_add(freed.cols), dims.rows)
            }
            Some(SplitDirection::Vertical) | None => {
                Dimensions::new(dims.cols, dims.rows.saturating_add(freed.rows))
            }
        };
        parent.resize(grown);

        Ok(CloseOutcome {
            domain_id: self.id,
            parent: parent_id,
            parent_dimensions: grown,
        })
    }

    pub(crate) fn forget_client(&mut self, client: ClientId) {
        for pane in self.panes.values_mut() {
            pane.forget_client(client);
        }
    }
}

/// Owns every domain on the server
#[derive(Debug)]
pub struct DomainManager {
    domains: HashMap<DomainId, Domain>,
    /// Pane -> owning domain
    pane_index: HashMap<PaneId, DomainId>,
    default_domain: DomainId,
    terminal: TerminalConfig,
}

impl DomainManager {
    /// Create a manager with one default domain
    pub fn new(terminal: TerminalConfig) -> Self {
        let mut manager = Self {
            domains: HashMap::new(),
            pane_index: HashMap::new(),
            default_domain: DomainId::new(),
            terminal,
        };
        manager.default_domain = manager.create_domain();
        manager
    }

    pub fn shared(terminal: TerminalConfig) -> SharedDomains {
        Arc::new(RwLock::new(Self::new(terminal)))
    }

    pub fn default_domain(&self) -> DomainId {
        self.default_domain
    }

    /// Settings used for panes created from now on
    pub fn set_terminal(&mut self, terminal: TerminalConfig) {
        self.terminal = terminal;
    }

    /// Create an empty domain (one root pane at the default size)
    pub fn create_domain(&mut self) -> DomainId {
        let dims = Dimensions::new(self.terminal.default_cols, self.terminal.default_rows);
        let domain = Domain::new(dims, self.terminal.scrollback_lines);
        let id = domain.id();
        self.pane_index.insert(domain.root(), id);
        info!(domain_id = %id, root = %domain.root(), "Created domain");
        self.domains.insert(id, domain);
        id
    }

    pub fn domain(&self, domain_id: DomainId) -> DomainResult<&Domain> {
        self.domains
            .get(&domain_id)
            .ok_or(DomainError::DomainNotFound(domain_id))
    }

    pub fn domain_mut(&mut self, domain_id: DomainId) -> DomainResult<&mut Domain> {
        self.domains
            .get_mut(&domain_id)
            .ok_or(DomainError::DomainNotFound(domain_id))
    }

    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    pub fn domain_of(&self, pane_id: PaneId) -> Option<DomainId> {
        self.pane_index.get(&pane_id).copied()
    }

    pub fn find_pane(&self, pane_id: PaneId) -> Option<&ServerPane> {
        let domain_id = self.domain_of(pane_id)?;
        self.domains.get(&domain_id)?.pane(pane_id)
    }

    pub fn find_pane_mut(&mut self, pane_id: PaneId) -> Option<&mut ServerPane> {
        let domain_id = self.domain_of(pane_id)?;
        self.domains.get_mut(&domain_id)?.pane_mut(pane_id)
    }

    /// Apply new geometry to a pane; topology is untouched
    pub fn resize_pane(&mut self, pane_id: PaneId, dimensions: Dimensions) -> DomainResult<bool> {
        let pane = self
            .find_pane_mut(pane_id)
            .ok_or(DomainError::PaneNotFound(pane_id))?;
        let changed = pane.resize(dimensions);
        debug!(pane_id = %pane_id, size = %dimensions, changed, "Resized pane");
        Ok(changed)
    }

    pub fn split_pane(
        &mut self,
        pane_id: PaneId,
        direction: SplitDirection,
    ) -> DomainResult<SplitOutcome> {
        let domain_id = self
            .domain_of(pane_id)
            .ok_or(DomainError::PaneNotFound(pane_id))?;
        let scrollback_lines = self.terminal.scrollback_lines;
        let outcome = self
            .domain_mut(domain_id)?
            .split(pane_id, direction, scrollback_lines)?;
        self.pane_index.insert(outcome.new_pane, domain_id);
        info!(pane_id = %pane_id, new_pane = %outcome.new_pane, ?direction, "Split pane");
        Ok(outcome)
    }

    pub fn close_pane(&mut self, pane_id: PaneId) -> DomainResult<CloseOutcome> {
        let domain_id = self
            .domain_of(pane_id)
            .ok_or(DomainError::PaneNotFound(pane_id))?;
        let outcome = self.domain_mut(domain_id)?.close(pane_id)?;
        self.pane_index.remove(&pane_id);
        info!(pane_id = %pane_id, parent = %outcome.parent, "Closed pane");
        Ok(outcome)
    }

    /// Full pane list and fingerprint of a domain
    pub fn pane_list(
        &self,
        domain_id: DomainId,
    ) -> DomainResult<(Vec<PaneEntry>, TopologyFingerprint)> {
        let domain = self.domain(domain_id)?;
        Ok((domain.entries(), domain.fingerprint()))
    }

    pub fn fingerprint(&self, domain_id: DomainId) -> DomainResult<TopologyFingerprint> {
        Ok(self.domain(domain_id)?.fingerprint())
    }

    /// Append output to a pane's scrollback; returns its new line count
    pub fn write_lines<I>(&mut self, pane_id: PaneId, lines: I) -> DomainResult<u64>
    where
        I: IntoIterator<Item = String>,
    {
        let pane = self
            .find_pane_mut(pane_id)
            .ok_or(DomainError::PaneNotFound(pane_id))?;
        pane.scrollback_mut().push_lines(lines);
        Ok(pane.total_lines())
    }

    /// Drop per-client state held by panes
    pub fn forget_client(&mut self, client: ClientId) {
        for domain in self.domains.values_mut() {
            domain.forget_client(client);
        }
    }
}

impl Default for DomainManager {
    fn default() -> Self {
        Self::new(TerminalConfig::default())
    }
}
