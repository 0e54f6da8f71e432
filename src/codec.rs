use thiserror::Error;

use crate::{
    command::{PROTOCOL_VERSION, RequestEnvelope, ResponseEnvelope},
    updates::UpdateNotice,
};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Payload is not a valid command: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported protocol version {found}, expected {}", PROTOCOL_VERSION)]
    UnsupportedVersion { found: u16 },
}

pub fn decode_request(payload: &[u8]) -> Result<RequestEnvelope, CodecError> {
    let envelope: RequestEnvelope = serde_json::from_slice(payload)?;
    if envelope.version != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: envelope.version,
        });
    }
    Ok(envelope)
}

pub fn encode_request(envelope: &RequestEnvelope) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(envelope)?)
}

pub fn decode_response(payload: &[u8]) -> Result<ResponseEnvelope, CodecError> {
    let envelope: ResponseEnvelope = serde_json::from_slice(payload)?;
    if envelope.version != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: envelope.version,
        });
    }
    Ok(envelope)
}

pub fn encode_response(envelope: &ResponseEnvelope) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(envelope)?)
}

pub fn encode_notice(notice: &UpdateNotice) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(notice)?)
}

pub fn decode_notice(payload: &[u8]) -> Result<UpdateNotice, CodecError> {
    Ok(serde_json::from_slice(payload)?)
}
