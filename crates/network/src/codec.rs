//! Wire envelope for synchronization messages: a one-byte message code
//! followed by the bincode-encoded body.

use thiserror::Error;

use crate::messages::{
    BatchRequest, BlockResponse, RangeRequest, SyncMessage, SyncRequest, SyncResponse,
};

const CODE_SYNC_REQUEST: u8 = 1;
const CODE_SYNC_RESPONSE: u8 = 2;
const CODE_RANGE_REQUEST: u8 = 3;
const CODE_BATCH_REQUEST: u8 = 4;
const CODE_BLOCK_RESPONSE: u8 = 5;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("empty envelope")]
    EmptyEnvelope,
    #[error("unknown message code {0}")]
    UnknownMessageCode(u8),
    #[error("malformed message body: {0}")]
    MalformedBody(#[from] bincode::Error),
}

/// Encode a message into its wire envelope.
pub fn encode(message: &SyncMessage) -> Result<Vec<u8>, CodecError> {
    let (code, body) = match message {
        SyncMessage::SyncRequest(m) => (CODE_SYNC_REQUEST, bincode::serialize(m)?),
        SyncMessage::SyncResponse(m) => (CODE_SYNC_RESPONSE, bincode::serialize(m)?),
        SyncMessage::RangeRequest(m) => (CODE_RANGE_REQUEST, bincode::serialize(m)?),
        SyncMessage::BatchRequest(m) => (CODE_BATCH_REQUEST, bincode::serialize(m)?),
        SyncMessage::BlockResponse(m) => (CODE_BLOCK_RESPONSE, bincode::serialize(m)?),
    };
    let mut envelope = Vec::with_capacity(1 + body.len());
    envelope.push(code);
    envelope.extend_from_slice(&body);
    Ok(envelope)
}

/// Decode a wire envelope. An unrecognized code is a typed error so the
/// caller can reject the sender's input without touching any queue.
pub fn decode(data: &[u8]) -> Result<SyncMessage, CodecError> {
    let (&code, body) = data.split_first().ok_or(CodecError::EmptyEnvelope)?;
    let message = match code {
        CODE_SYNC_REQUEST => SyncMessage::SyncRequest(bincode::deserialize::<SyncRequest>(body)?),
        CODE_SYNC_RESPONSE => {
            SyncMessage::SyncResponse(bincode::deserialize::<SyncResponse>(body)?)
        }
        CODE_RANGE_REQUEST => {
            SyncMessage::RangeRequest(bincode::deserialize::<RangeRequest>(body)?)
        }
        CODE_BATCH_REQUEST => {
            SyncMessage::BatchRequest(bincode::deserialize::<BatchRequest>(body)?)
        }
        CODE_BLOCK_RESPONSE => {
            SyncMessage::BlockResponse(bincode::deserialize::<BlockResponse>(body)?)
        }
        other => return Err(CodecError::UnknownMessageCode(other)),
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use model::{Block, BlockHeader, BlockId, NodeId, Payload};

    fn sample_block(height: u64) -> Block {
        Block {
            header: BlockHeader {
                height,
                parent_id: BlockId::from([3u8; 32]),
                payload_hash: B256::ZERO,
                timestamp: 1_700_000_000,
                proposer: NodeId::from([9u8; 32]),
            },
            payload: Payload {
                transactions: vec![vec![0xde, 0xad], vec![0xbe, 0xef]],
            },
        }
    }

    #[test]
    fn test_round_trip_every_kind() {
        let messages = vec![
            SyncMessage::SyncRequest(SyncRequest {
                nonce: 1,
                height: 42,
            }),
            SyncMessage::SyncResponse(SyncResponse {
                nonce: 2,
                height: 43,
            }),
            SyncMessage::RangeRequest(RangeRequest {
                nonce: 3,
                from_height: 10,
                to_height: 20,
            }),
            SyncMessage::BatchRequest(BatchRequest {
                nonce: 4,
                block_ids: vec![BlockId::from([7u8; 32])],
            }),
            SyncMessage::BlockResponse(BlockResponse {
                nonce: 5,
                blocks: vec![sample_block(11), sample_block(12)],
            }),
        ];
        for message in messages {
            let encoded = encode(&message).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_unknown_code_is_rejected() {
        let err = decode(&[0xff, 0, 1, 2]).unwrap_err();
        assert!(matches!(err, CodecError::UnknownMessageCode(0xff)));
    }

    #[test]
    fn test_empty_envelope_is_rejected() {
        let err = decode(&[]).unwrap_err();
        assert!(matches!(err, CodecError::EmptyEnvelope));
    }

    #[test]
    fn test_truncated_body_is_rejected() {
        let encoded = encode(&SyncMessage::SyncRequest(SyncRequest {
            nonce: 1,
            height: 42,
        }))
        .unwrap();
        let err = decode(&encoded[..encoded.len() - 1]).unwrap_err();
        assert!(matches!(err, CodecError::MalformedBody(_)));
    }
}
