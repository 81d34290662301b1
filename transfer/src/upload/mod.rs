mod conflict;
mod engine;
mod queue;

pub use conflict::{
    ConflictChoice, ConflictDecision, ConflictPrompt, ConflictResolver, disambiguated_name,
};
pub use engine::UploadEngine;
pub use queue::UploadQueue;
