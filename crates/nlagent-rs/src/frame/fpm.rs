// crates/nlagent-rs/src/frame/fpm.rs

use crate::error::AgentError;
use crate::frame::codec::Codec;

/// FPM protocol version carried in every header.
pub const FPM_PROTO_VERSION: u8 = 1;
/// The only payload type the relay exchanges: netlink messages.
pub const FPM_MSG_TYPE_NETLINK: u8 = 1;
/// Size of the FPM header on the wire.
pub const FPM_MSG_HDR_LEN: usize = 4;

/// The 4-byte header of an FPM record.
///
/// `msg_len` covers header plus payload and travels in network byte order;
/// everything after the header is one or more netlink messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpmHeader {
    pub version: u8,
    pub msg_type: u8,
    pub msg_len: u16,
}

impl FpmHeader {
    /// Builds the header describing `payload_len` bytes of netlink data.
    pub fn for_payload(payload_len: usize) -> Result<FpmHeader, AgentError> {
        let msg_len = payload_len + FPM_MSG_HDR_LEN;
        if msg_len > u16::MAX as usize {
            return Err(AgentError::FpmPayloadTooLarge(payload_len));
        }
        Ok(FpmHeader {
            version: FPM_PROTO_VERSION,
            msg_type: FPM_MSG_TYPE_NETLINK,
            msg_len: msg_len as u16,
        })
    }

    /// Checks the fields a peer is allowed to send. A failure here means
    /// the stream is corrupt and the connection must be torn down.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.version != FPM_PROTO_VERSION {
            return Err(AgentError::InvalidFpmVersion(self.version));
        }
        if self.msg_type != FPM_MSG_TYPE_NETLINK {
            return Err(AgentError::InvalidFpmMsgType(self.msg_type));
        }
        if (self.msg_len as usize) < FPM_MSG_HDR_LEN {
            return Err(AgentError::InvalidFpmLength(self.msg_len));
        }
        Ok(())
    }

    /// Length of the payload following the header.
    pub fn data_len(&self) -> usize {
        self.msg_len as usize - FPM_MSG_HDR_LEN
    }
}

impl Codec for FpmHeader {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, AgentError> {
        if buffer.len() < FPM_MSG_HDR_LEN {
            return Err(AgentError::BufferTooShort);
        }
        buffer[0] = self.version;
        buffer[1] = self.msg_type;
        buffer[2..4].copy_from_slice(&self.msg_len.to_be_bytes());
        Ok(FPM_MSG_HDR_LEN)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, AgentError> {
        if buffer.len() < FPM_MSG_HDR_LEN {
            return Err(AgentError::BufferTooShort);
        }
        Ok(FpmHeader {
            version: buffer[0],
            msg_type: buffer[1],
            msg_len: u16::from_be_bytes(buffer[2..4].try_into()?),
        })
    }
}

/// Wraps a netlink payload into a complete FPM frame.
pub fn build_frame(payload: &[u8]) -> Result<Vec<u8>, AgentError> {
    let header = FpmHeader::for_payload(payload.len())?;
    let mut frame = vec![0u8; FPM_MSG_HDR_LEN + payload.len()];
    header.serialize(&mut frame)?;
    frame[FPM_MSG_HDR_LEN..].copy_from_slice(payload);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_codec_roundtrip() {
        let header = FpmHeader::for_payload(60).unwrap();
        let mut buffer = [0u8; FPM_MSG_HDR_LEN];
        assert_eq!(header.serialize(&mut buffer).unwrap(), FPM_MSG_HDR_LEN);

        // version 1, type netlink, 64 bytes total in network byte order.
        assert_eq!(buffer, [0x01, 0x01, 0x00, 0x40]);

        let decoded = FpmHeader::deserialize(&buffer).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.data_len(), 60);
    }

    #[test]
    fn test_build_frame_prepends_header() {
        let payload = vec![0xAB; 60];
        let frame = build_frame(&payload).unwrap();
        assert_eq!(frame.len(), 64);
        assert_eq!(&frame[..4], &[0x01, 0x01, 0x00, 0x40]);
        assert_eq!(&frame[4..], &payload[..]);
    }

    #[test]
    fn test_validate_rejects_corrupt_headers() {
        let good = FpmHeader { version: 1, msg_type: 1, msg_len: 4 };
        assert!(good.validate().is_ok());

        let bad_version = FpmHeader { version: 2, ..good };
        assert_eq!(bad_version.validate(), Err(AgentError::InvalidFpmVersion(2)));

        let bad_type = FpmHeader { msg_type: 9, ..good };
        assert_eq!(bad_type.validate(), Err(AgentError::InvalidFpmMsgType(9)));

        let bad_len = FpmHeader { msg_len: 3, ..good };
        assert_eq!(bad_len.validate(), Err(AgentError::InvalidFpmLength(3)));
    }

    #[test]
    fn test_oversized_payload_is_refused() {
        let payload = vec![0u8; u16::MAX as usize];
        assert!(matches!(build_frame(&payload), Err(AgentError::FpmPayloadTooLarge(_))));
    }
}
