use std::future::Future;

use model::NodeId;
use rand::seq::SliceRandom;
use thiserror::Error;

use crate::messages::SyncMessage;

#[derive(Debug, Error)]
pub enum ConduitError {
    #[error("send to {peer} failed: {reason}")]
    SendFailed { peer: NodeId, reason: String },
    #[error("multicast reached none of {total} targets")]
    NoneReached { total: usize },
}

/// Engine-scoped network handle. Implementations own transport, framing and
/// authentication; the sync core only needs these two sends.
pub trait Conduit: Send + Sync + 'static {
    /// Send a message to a single peer.
    fn unicast(
        &self,
        message: SyncMessage,
        target: NodeId,
    ) -> impl Future<Output = Result<(), ConduitError>> + Send;

    /// Send a message to `fanout` peers sampled without replacement from
    /// `targets`. Fewer targets than the fanout means all of them.
    fn multicast(
        &self,
        message: SyncMessage,
        fanout: usize,
        targets: &[NodeId],
    ) -> impl Future<Output = Result<(), ConduitError>> + Send;
}

/// Sample `fanout` targets without replacement. Shared by conduit
/// implementations so they all agree on the multicast contract.
pub fn sample_targets(targets: &[NodeId], fanout: usize) -> Vec<NodeId> {
    let mut rng = rand::thread_rng();
    targets
        .choose_multiple(&mut rng, fanout.min(targets.len()))
        .copied()
        .collect()
}
