pub mod block;
pub mod events;

pub use block::{Block, BlockHeader, BlockId, NodeId, Payload};
pub use events::SyncedBlock;
