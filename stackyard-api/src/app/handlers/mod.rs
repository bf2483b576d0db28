mod events;
mod health;
mod install;
mod services;
mod system;

pub use events::stream_events;
pub use health::health;
pub use install::{download_service, install_service};
pub use services::{
    get_service, get_status, list_installed, list_running, list_services, start_all,
    start_service, stop_all, stop_service, update_port,
};
pub use system::get_system_info;
