pub mod codec;
pub mod error;
pub mod types;

pub use crate::{
    codec::MdcCodec,
    error::MdcError,
    types::{Command, InputSource, MdcReply, MdcRequest, PowerValue},
};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

pub fn encode_request(request: MdcRequest) -> Result<BytesMut, MdcError> {
    let mut codec = MdcCodec;
    let mut dst = BytesMut::new();
    codec.encode(request, &mut dst)?;
    Ok(dst)
}

pub fn decode_reply(src: &mut BytesMut) -> Result<Option<MdcReply>, MdcError> {
    let mut codec = MdcCodec;
    codec.decode(src)
}
