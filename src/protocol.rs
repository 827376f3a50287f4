//! Wire message types and framing for the dealer/sub channels.
//!
//! Grounded on `bgpview_io_client_broker.c`'s `send_request`/`handle_reply`/
//! `handle_server_msg` framing logic: request frames are
//! `[msg_type][interests][intents][seq_num LE][payload...]`, replies are
//! `[type][seq_num LE]`, heartbeats and term are a bare type byte.

use crate::config::InterestSet;
use crate::error::{BgpviewError, Result};

/// One logical frame exchanged with the server. The transport (C1) is
/// responsible for preserving frame boundaries within a message; this type
/// only describes the payload bytes of a single frame.
pub type Frame = Vec<u8>;

/// Message types exchanged on the dealer socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Ready,
    Heartbeat,
    Term,
    View,
    Reply,
}

impl MsgType {
    fn to_byte(self) -> u8 {
        match self {
            MsgType::Ready => 1,
            MsgType::Heartbeat => 2,
            MsgType::Term => 3,
            MsgType::View => 4,
            MsgType::Reply => 5,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(MsgType::Ready),
            2 => Ok(MsgType::Heartbeat),
            3 => Ok(MsgType::Term),
            4 => Ok(MsgType::View),
            5 => Ok(MsgType::Reply),
            other => Err(BgpviewError::Protocol(format!("unknown msg_type byte {other}"))),
        }
    }
}

/// A `VIEW` (or other payload-carrying) request as sent by the broker.
#[derive(Debug, Clone)]
pub struct RequestMessage {
    pub msg_type: MsgType,
    pub interests: InterestSet,
    pub intents: u8,
    pub seq_num: u32,
    pub payload: Vec<Frame>,
}

impl RequestMessage {
    /// Encode onto the wire: `[type][interests][intents][seq_num LE][payload...]`.
    pub fn encode(&self) -> Vec<Frame> {
        let mut header = Vec::with_capacity(7);
        header.push(self.msg_type.to_byte());
        header.push(self.interests.0);
        header.push(self.intents);
        header.extend_from_slice(&self.seq_num.to_le_bytes());
        let mut frames = Vec::with_capacity(1 + self.payload.len());
        frames.push(header);
        frames.extend(self.payload.iter().cloned());
        frames
    }

    pub fn decode(frames: &[Frame]) -> Result<Self> {
        let header = frames
            .first()
            .ok_or_else(|| BgpviewError::Protocol("empty request message".into()))?;
        if header.len() < 7 {
            return Err(BgpviewError::Protocol("request header too short".into()));
        }
        let msg_type = MsgType::from_byte(header[0])?;
        let interests = InterestSet(header[1]);
        let intents = header[2];
        let seq_num = u32::from_le_bytes([header[3], header[4], header[5], header[6]]);
        Ok(RequestMessage {
            msg_type,
            interests,
            intents,
            seq_num,
            payload: frames[1..].to_vec(),
        })
    }
}

/// A bare heartbeat or term frame: a single type byte.
pub fn encode_bare(msg_type: MsgType) -> Frame {
    vec![msg_type.to_byte()]
}

/// `READY` frame: type byte plus the interests and intents bytes, no
/// sequence number or payload.
pub fn encode_ready(interests: InterestSet, intents: u8) -> Frame {
    vec![MsgType::Ready.to_byte(), interests.0, intents]
}

pub fn decode_bare(frame: &Frame) -> Result<MsgType> {
    let b = frame
        .first()
        .copied()
        .ok_or_else(|| BgpviewError::Protocol("empty bare frame".into()))?;
    MsgType::from_byte(b)
}

/// Server → broker reply: `[type][seq_num LE]`.
#[derive(Debug, Clone, Copy)]
pub struct ReplyMessage {
    pub seq_num: u32,
}

impl ReplyMessage {
    pub fn encode(&self) -> Frame {
        let mut buf = Vec::with_capacity(5);
        buf.push(MsgType::Reply.to_byte());
        buf.extend_from_slice(&self.seq_num.to_le_bytes());
        buf
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        if frame.len() < 5 {
            return Err(BgpviewError::Protocol("reply frame too short".into()));
        }
        let msg_type = MsgType::from_byte(frame[0])?;
        if msg_type != MsgType::Reply {
            return Err(BgpviewError::Protocol("expected REPLY frame".into()));
        }
        let seq_num = u32::from_le_bytes([frame[1], frame[2], frame[3], frame[4]]);
        Ok(ReplyMessage { seq_num })
    }
}

/// Encode the subscription byte-prefix for an interests bitmask.
pub fn encode_sub_prefix(interests: InterestSet) -> Frame {
    vec![interests.0]
}

/// Decode a sub-channel frame's leading byte back into an interests bitmask,
/// stripping the prefix from the returned payload. A decoded value of 0 is a
/// protocol error.
pub fn decode_sub_message(frames: &[Frame]) -> Result<(InterestSet, Vec<Frame>)> {
    let prefix = frames
        .first()
        .ok_or_else(|| BgpviewError::Protocol("empty sub message".into()))?;
    let bits = *prefix
        .first()
        .ok_or_else(|| BgpviewError::Protocol("empty sub prefix frame".into()))?;
    if bits == 0 {
        return Err(BgpviewError::Protocol("sub prefix decoded to zero interests".into()));
    }
    Ok((InterestSet(bits), frames[1..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_message_round_trips() {
        let msg = RequestMessage {
            msg_type: MsgType::View,
            interests: InterestSet(InterestSet::FULL),
            intents: 1,
            seq_num: 42,
            payload: vec![vec![1, 2, 3], vec![4, 5]],
        };
        let encoded = msg.encode();
        let decoded = RequestMessage::decode(&encoded).expect("decode");
        assert_eq!(decoded.seq_num, 42);
        assert_eq!(decoded.msg_type, MsgType::View);
        assert_eq!(decoded.payload, vec![vec![1, 2, 3], vec![4, 5]]);
    }

    #[test]
    fn reply_message_round_trips() {
        let reply = ReplyMessage { seq_num: 7 };
        let encoded = reply.encode();
        let decoded = ReplyMessage::decode(&encoded).expect("decode");
        assert_eq!(decoded.seq_num, 7);
    }

    #[test]
    fn sub_prefix_zero_is_protocol_error() {
        let frames = vec![vec![0u8], vec![9, 9]];
        let err = decode_sub_message(&frames).unwrap_err();
        assert!(matches!(err, BgpviewError::Protocol(_)));
    }

    #[test]
    fn sub_prefix_round_trips() {
        let interests = InterestSet(InterestSet::FIRSTFULL | InterestSet::FULL);
        let prefix = encode_sub_prefix(interests);
        let mut frames = vec![prefix];
        frames.push(vec![0xAA, 0xBB]);
        let (decoded, payload) = decode_sub_message(&frames).expect("decode");
        assert_eq!(decoded, interests);
        assert_eq!(payload, vec![vec![0xAA, 0xBB]]);
    }

    #[test]
    fn unknown_msg_type_is_protocol_error() {
        let err = MsgType::from_byte(99).unwrap_err();
        assert!(matches!(err, BgpviewError::Protocol(_)));
    }
}
