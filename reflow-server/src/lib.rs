//! reflow-server: server half of the resize synchronization pipeline
//!
//! Owns pane geometry and scrollback, applies client size updates, coalesces
//! resize bursts into one `PaneResized` per pane per window and answers
//! fetches with generation-stamped content.

pub mod config;
pub mod domain;
pub mod handlers;
pub mod notify;
pub mod registry;
pub mod responder;
pub mod server;

pub use config::{AppConfig, ConfigHandle, ConfigLoader, ConfigWatcher};
pub use domain::{DomainError, DomainManager, SharedDomains};
pub use handlers::{HandlerContext, HandlerResult};
pub use notify::{
    resize_signal_channel, CoalescerStats, ResizeSignal, ResizeSignalSender, ResizeSource,
    ServerNotificationCoalescer,
};
pub use registry::{ClientId, ClientRegistry};
pub use responder::RenderChangeResponder;
pub use server::{handle_client, RunningServer, Server, SharedState};
