pub mod ai_model;
pub mod archive_audit;
pub mod control_command;
pub mod market;
pub mod migrations;
pub mod order;
pub mod position_snapshot;
pub mod service_status;
pub mod system_config;
