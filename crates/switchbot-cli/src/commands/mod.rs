//! Command implementations for the CLI.

mod config;
mod control;
mod info;
mod key;
mod scan;

pub use config::cmd_config;
pub use control::{Action, cmd_control};
pub use info::cmd_info;
pub use key::cmd_get_key;
pub use scan::cmd_scan;
