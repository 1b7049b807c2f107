//! reflow-client: client half of the resize synchronization pipeline
//!
//! Turns bursts of window resize events into at most one server update and
//! one content fetch per pane, and keeps a generation-checked line cache of
//! what the server returns.

pub mod config;
pub mod connection;
pub mod pipeline;
pub mod resize;

pub use config::{ClientConfig, ConnectionConfig, ResizeConfig};
pub use connection::{Connection, ConnectionState, MessageSender};
pub use pipeline::{
    PipelineConfig, PipelineEvent, PipelineHandle, PipelineStats, RenderSink, ResizePipeline,
    DEFAULT_MAX_RETRIES,
};
pub use resize::{NoReflow, ReflowOracle, ResizeEvent};
