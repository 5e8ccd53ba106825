//! Wire codec (WC, §4.1): frame check/build and endian-aware swapping.

use crate::message::{
    forward_req_schema, Width, CONNECT_BODY_LEN, CONNECT_SCHEMA, FORWARD_CNF_BODY_LEN,
    FORWARD_CNF_SCHEMA, HEADER_SIZE, MAX_MESSAGE_SIZE, MsgHeader, MsgType, STATS_INITIAL_SCHEMA,
    STATS_MINIMAL_SCHEMA, STATS_UPDATE_SCHEMA, VPS_PDC_BODY_LEN, VPS_PDC_SCHEMA,
};
use epg_core::error::ProtocolError;

/// Per-connection codec state: whether the peer's byte order differs from
/// ours, established once during the `CONNECT_REQ`/`CONNECT_CNF` handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    pub swap: bool,
}

impl Codec {
    pub fn new(swap: bool) -> Codec {
        Codec { swap }
    }

    /// Validate a received header/body pair, byte-swapping the body's
    /// integer fields in place when `self.swap` is set. Any failure here
    /// means the connection must be closed; there is no partial acceptance.
    pub fn check(&self, header: &MsgHeader, body: &mut [u8]) -> Result<MsgType, ProtocolError> {
        let total_len = HEADER_SIZE + body.len();
        if total_len < HEADER_SIZE || total_len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::BadLength);
        }
        if header.length as usize != total_len {
            return Err(ProtocolError::BadLength);
        }
        let msg_type = MsgType::from_u8(header.msg_type).ok_or(ProtocolError::BadType)?;

        if self.swap {
            self.swap_body(msg_type, body)?;
        }
        Ok(msg_type)
    }

    /// Frame a message body with its header. `reserved` is always zero;
    /// outgoing bodies are never swapped here (they're host order; the
    /// receiver swaps on its end per the negotiated endian magic).
    pub fn build(&self, msg_type: MsgType, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let total_len = HEADER_SIZE + body.len();
        if total_len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::BadLength);
        }
        let header = MsgHeader {
            length: total_len as u16,
            msg_type: msg_type as u8,
            reserved: 0,
        };
        let mut out = Vec::with_capacity(total_len);
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(body);
        Ok(out)
    }

    fn swap_body(&self, msg_type: MsgType, body: &mut [u8]) -> Result<(), ProtocolError> {
        match msg_type {
            MsgType::ConnectReq | MsgType::ConnectCnf => {
                if body.len() != CONNECT_BODY_LEN {
                    return Err(ProtocolError::BadLength);
                }
                CONNECT_SCHEMA.swap_in_place(body);
            }
            MsgType::StatsInd => {
                if body.is_empty() {
                    return Err(ProtocolError::BadLength);
                }
                let schema = match body[0] {
                    0 => &STATS_MINIMAL_SCHEMA,
                    1 => &STATS_INITIAL_SCHEMA,
                    2 => &STATS_UPDATE_SCHEMA,
                    _ => return Err(ProtocolError::BadType),
                };
                if body.len() != schema.body_len {
                    return Err(ProtocolError::BadLength);
                }
                schema.swap_in_place(body);
            }
            MsgType::ForwardReq => {
                if body.len() < 2 {
                    return Err(ProtocolError::BadLength);
                }
                body[0..2].reverse();
                let count = u16::from_ne_bytes([body[0], body[1]]) as usize;
                let expected = 2 + 6 * count;
                if body.len() != expected {
                    return Err(ProtocolError::BadLength);
                }
                for field in forward_req_schema(count).into_iter().skip(1) {
                    field.swap(body);
                }
            }
            MsgType::TscInd => {
                if body.len() % crate::message::TSC_ENTRY_LEN != 0 {
                    return Err(ProtocolError::BadLength);
                }
                for chunk in body.chunks_mut(crate::message::TSC_ENTRY_LEN) {
                    crate::message::TSC_ENTRY_SCHEMA.swap_in_place(chunk);
                }
            }
            MsgType::ForwardCnf => {
                if body.len() != FORWARD_CNF_BODY_LEN {
                    return Err(ProtocolError::BadLength);
                }
                FORWARD_CNF_SCHEMA.swap_in_place(body);
            }
            MsgType::VpsPdcInd => {
                if body.len() != VPS_PDC_BODY_LEN {
                    return Err(ProtocolError::BadLength);
                }
                VPS_PDC_SCHEMA.swap_in_place(body);
            }
            // ConqueryCnf is ASCII text; ForwardInd/BlockInd/DbUpdInd/DumpInd/
            // CloseInd/StatsReq carry no swappable fields at this layer in the
            // current message set, or (BLOCK_IND) carry an opaque database
            // block whose internal endian handling is owned by epg-db's
            // dump/reload code per §4.5, not the wire codec.
            _ => {
                let _ = Width::U16; // keep import used across match arms in debug builds
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MsgHeader, MsgType};

    #[test]
    fn rejects_unknown_type() {
        let codec = Codec::new(false);
        let header = MsgHeader {
            length: 5,
            msg_type: 200,
            reserved: 0,
        };
        let mut body = [0u8; 1];
        assert_eq!(codec.check(&header, &mut body), Err(ProtocolError::BadType));
    }

    #[test]
    fn rejects_length_mismatch() {
        let codec = Codec::new(false);
        let header = MsgHeader {
            length: 99,
            msg_type: MsgType::CloseInd as u8,
            reserved: 0,
        };
        let mut body = [0u8; 1];
        assert_eq!(
            codec.check(&header, &mut body),
            Err(ProtocolError::BadLength)
        );
    }

    #[test]
    fn build_then_check_round_trips_without_swap() {
        let codec = Codec::new(false);
        let framed = codec.build(MsgType::CloseInd, &[]).unwrap();
        let mut header_buf = [0u8; HEADER_SIZE];
        header_buf.copy_from_slice(&framed[..HEADER_SIZE]);
        let header = MsgHeader::decode(&header_buf);
        let mut body = framed[HEADER_SIZE..].to_vec();
        assert_eq!(codec.check(&header, &mut body).unwrap(), MsgType::CloseInd);
    }

    fn foreign16(v: u16) -> [u8; 2] {
        if cfg!(target_endian = "little") {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        }
    }

    fn foreign32(v: u32) -> [u8; 4] {
        if cfg!(target_endian = "little") {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        }
    }

    #[test]
    fn forward_req_swap_round_trips() {
        let codec = Codec::new(true);
        // Bytes as they'd arrive from a peer of the opposite byte order to ours.
        let mut body = vec![0u8; 2 + 6 * 2];
        body[0..2].copy_from_slice(&foreign16(2));
        body[2..4].copy_from_slice(&foreign16(0x0d94));
        body[4..8].copy_from_slice(&foreign32(1000));
        body[8..10].copy_from_slice(&foreign16(0x0dc1));
        body[10..14].copy_from_slice(&foreign32(2000));

        let header = MsgHeader {
            length: (HEADER_SIZE + body.len()) as u16,
            msg_type: MsgType::ForwardReq as u8,
            reserved: 0,
        };
        codec.check(&header, &mut body).unwrap();
        assert_eq!(u16::from_ne_bytes([body[0], body[1]]), 2);
        assert_eq!(u16::from_ne_bytes([body[2], body[3]]), 0x0d94);
        assert_eq!(u32::from_ne_bytes([body[4], body[5], body[6], body[7]]), 1000);
    }
}
