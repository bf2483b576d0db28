mod actions;
mod events;
mod install;
mod output;
mod services;
mod ui;

pub use actions::{start_all, stop_all, system_info};
pub use events::watch_events;
pub use install::{download_service, install_service};
pub use output::OutputFormat;
pub use services::{
    get_service, list_services, start_service, status_service, stop_service, update_port,
    ListFilter,
};
