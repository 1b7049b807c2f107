pub mod common;
pub mod lines;
pub mod pane;
pub mod topology;

pub use common::*;
pub use lines::*;
pub use pane::*;
pub use topology::*;
