pub mod list_instances;
pub mod setup;
