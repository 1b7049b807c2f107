//! Default configuration values
//!
//! Written out as the documented starting point for `server.toml`.

pub const DEFAULT_CONFIG_TOML: &str = r##"
# reflow server configuration

[notify]
# Window for merging resize signals into one PaneResized
coalesce_ms = 16

[terminal]
scrollback_lines = 100000
default_rows = 24
default_cols = 80

[server]
# socket = "/run/user/1000/reflow/reflow.sock"
"##;
