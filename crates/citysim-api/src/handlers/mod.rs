mod config;
mod groups;
mod health;
mod runs;
mod scenes;

pub use config::get_engine_config;
pub use groups::create_group;
pub use health::health_check;
pub use runs::{cancel_run, delete_run, get_run, list_project_runs, submit_run};
pub use scenes::create_scene;
