pub mod archive;
pub mod orchestrator;
pub mod permissions;
