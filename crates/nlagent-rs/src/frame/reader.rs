// crates/nlagent-rs/src/frame/reader.rs

use crate::error::AgentError;
use crate::frame::codec::Codec;
use crate::frame::fpm::{FPM_MSG_HDR_LEN, FpmHeader};
use crate::frame::netlink::{NLMSG_HDRLEN, nlmsg_align, nlmsg_len};
use log::debug;

/// How records are delimited on a framed TCP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// 4-byte FPM header whose length field covers header plus payload.
    Fpm,
    /// Each record is a single netlink message; `nlmsg_len` delimits it.
    Netlink,
}

impl Framing {
    /// Minimum number of buffered bytes before a record length can be read.
    pub fn header_len(self) -> usize {
        match self {
            Framing::Fpm => FPM_MSG_HDR_LEN,
            Framing::Netlink => NLMSG_HDRLEN,
        }
    }
}

/// Length-delimited record extractor tolerating arbitrary TCP chunking.
///
/// Input bytes accumulate in an internal buffer; `next_frame` peeks the
/// header without consuming, waits for the full record, then drains exactly
/// one record. Callers loop until `Ok(None)` so every complete frame is
/// handled per wake-up. A header that fails validation is a protocol
/// fault: the stream is corrupt and must be restarted.
#[derive(Debug)]
pub struct FrameReader {
    framing: Framing,
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new(framing: Framing) -> Self {
        FrameReader { framing, buf: Vec::new() }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extracts the next complete record, or `Ok(None)` if more bytes are
    /// needed.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, AgentError> {
        if self.buf.len() < self.framing.header_len() {
            return Ok(None);
        }

        let record_len = match self.framing {
            Framing::Fpm => {
                let header = FpmHeader::deserialize(&self.buf)?;
                header.validate()?;
                header.msg_len as usize
            }
            Framing::Netlink => {
                let len = nlmsg_len(&self.buf)?;
                if (len as usize) < NLMSG_HDRLEN {
                    return Err(AgentError::InvalidNlMsgLength(len));
                }
                nlmsg_align(len as usize)
            }
        };

        if self.buf.len() < record_len {
            debug!(
                "[reader] buffered {} bytes, record needs {}, waiting",
                self.buf.len(),
                record_len
            );
            return Ok(None);
        }

        Ok(Some(self.buf.drain(..record_len).collect()))
    }
}
