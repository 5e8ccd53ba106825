//! Data model, context cache and on-disk dump format for a single provider
//! or a merged database (spec §3, §4.4, §4.5, §6).

pub mod ai;
pub mod block_queue;
pub mod context_manager;
pub mod db_context;
pub mod dump;
pub mod merge_ctx;
pub mod pi;
pub mod timescale_queue;

pub use ai::{AppInfo, NetworkInfo};
pub use block_queue::{Block, BlockKind, BlockQueue, GenericBlockType};
pub use context_manager::{ContextManager, FailMode};
pub use db_context::{DbContext, DbKind};
pub use dump::{decode_ai_block, decode_pi_block, encode_ai_block, encode_pi_block, BlockType as DumpBlockType};
pub use merge_ctx::{AttributeClass, MergeContext, NetworkMapping};
pub use pi::{CodeSet, Features, MergeSources, Pil, ProgrammeItem};
pub use timescale_queue::{TimescaleQueue, TscBuffer, TscEntry, TscFlags};
