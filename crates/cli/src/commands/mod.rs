pub mod config;
pub mod request;
pub mod status;
pub mod utils;

pub use config::{handle_config_command, ConfigCommands};
pub use request::{run_request, ChannelView, RequestTarget};
pub use status::show_status;
