use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::MdcError,
    types::{ACK, HEADER, MdcReply, MdcRequest, NAK, REPLY_MARKER, checksum},
};

/// Bytes before the payload: header, marker/command, display id, length.
const PREAMBLE_LEN: usize = 4;

/// Encodes [`MdcRequest`] frames and decodes [`MdcReply`] frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct MdcCodec;

impl Encoder<MdcRequest> for MdcCodec {
    type Error = MdcError;

    fn encode(&mut self, item: MdcRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = u8::try_from(item.data.len())
            .map_err(|_| MdcError::PayloadTooLong(item.data.len()))?;

        dst.reserve(PREAMBLE_LEN + item.data.len() + 1);
        let start = dst.len();
        dst.put_u8(HEADER);
        dst.put_u8(item.command);
        dst.put_u8(item.display_id);
        dst.put_u8(len);
        dst.put_slice(&item.data);

        // checksum covers everything after the header byte
        let sum = checksum(&dst[start + 1..]);
        dst.put_u8(sum);
        Ok(())
    }
}

impl Decoder for MdcCodec {
    type Item = MdcReply;
    type Error = MdcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Resynchronise on the header byte, dropping any line noise before it.
        match src.iter().position(|b| *b == HEADER) {
            Some(0) => {}
            Some(pos) => src.advance(pos),
            None => {
                src.clear();
                return Ok(None);
            }
        }

        if src.len() < PREAMBLE_LEN {
            return Ok(None);
        }

        let marker = src[1];
        if marker != REPLY_MARKER {
            src.advance(1);
            return Err(MdcError::UnexpectedFrame(marker));
        }

        let payload_len = src[3] as usize;
        let frame_len = PREAMBLE_LEN + payload_len + 1;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        let expected = checksum(&frame[1..frame_len - 1]);
        let actual = frame[frame_len - 1];
        if expected != actual {
            return Err(MdcError::InvalidChecksum { expected, actual });
        }

        if payload_len < 2 {
            return Err(MdcError::ShortPayload(payload_len));
        }

        let acknowledged = match frame[4] {
            ACK => true,
            NAK => false,
            other => return Err(MdcError::InvalidAck(other)),
        };

        Ok(Some(MdcReply {
            display_id: frame[2],
            acknowledged,
            command: frame[5],
            values: frame[6..frame_len - 1].to_vec(),
        }))
    }
}
