//! Combines several provider databases into one merged database: per-network
//! PI matching, attribute-priority-driven merged-PI construction, AI union,
//! and incremental re-merge on new source AI (spec §4.6).

pub mod ai_merge;
pub mod incremental;
pub mod match_predicate;
pub mod network_merge;
pub mod pi_merge;

pub use ai_merge::merge_ai;
pub use incremental::{affected_networks, reapply_networks};
pub use match_predicate::matches;
pub use network_merge::{assemble_global, merge_network};
pub use pi_merge::{merge_matched, Candidate};
