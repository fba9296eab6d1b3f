// Data models module
// Serializable types shared by the assistant services

pub mod assistant;
pub mod project_state;

pub use assistant::*;
pub use project_state::*;
