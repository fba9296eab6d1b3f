// BuildPilot - assistant orchestration engine
// Streams model replies, writes the files they contain, runs their commands
// in a workspace terminal and repairs failed commands.

pub mod models;
pub mod repositories;
pub mod services;
pub mod utils;

pub use models::*;
