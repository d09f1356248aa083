use byteorder::{BigEndian, ByteOrder};

use super::header::{CommonHeader, PT_SDES, patch_length};
use super::RtcpError;

/// SDES items (subset, extend as needed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdesItem {
    Cname(String), // type=1
    Name(String),  // 2
    Email(String), // 3
    Phone(String), // 4
    Loc(String),   // 5
    Tool(String),  // 6
    Note(String),  // 7
    Priv(Vec<u8>), // 8 (opaque)
    Unknown(u8, Vec<u8>),
}

impl SdesItem {
    fn type_code(&self) -> u8 {
        match self {
            SdesItem::Cname(_) => 1,
            SdesItem::Name(_) => 2,
            SdesItem::Email(_) => 3,
            SdesItem::Phone(_) => 4,
            SdesItem::Loc(_) => 5,
            SdesItem::Tool(_) => 6,
            SdesItem::Note(_) => 7,
            SdesItem::Priv(_) => 8,
            SdesItem::Unknown(t, _) => *t,
        }
    }

    fn item_bytes(&self) -> &[u8] {
        match self {
            SdesItem::Cname(s)
            | SdesItem::Name(s)
            | SdesItem::Email(s)
            | SdesItem::Phone(s)
            | SdesItem::Loc(s)
            | SdesItem::Tool(s)
            | SdesItem::Note(s) => s.as_bytes(),
            SdesItem::Priv(v) | SdesItem::Unknown(_, v) => v,
        }
    }

    fn from_wire(t: u8, data: &[u8]) -> Self {
        let text = || String::from_utf8_lossy(data).into_owned();
        match t {
            1 => SdesItem::Cname(text()),
            2 => SdesItem::Name(text()),
            3 => SdesItem::Email(text()),
            4 => SdesItem::Phone(text()),
            5 => SdesItem::Loc(text()),
            6 => SdesItem::Tool(text()),
            7 => SdesItem::Note(text()),
            8 => SdesItem::Priv(data.to_vec()),
            _ => SdesItem::Unknown(t, data.to_vec()),
        }
    }
}

/// One SSRC with its item list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SdesChunk {
    pub ssrc: u32,
    pub items: Vec<SdesItem>,
}

impl SdesChunk {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RtcpError> {
        let start = out.len();
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        for item in &self.items {
            let data = item.item_bytes();
            if data.len() > u8::MAX as usize {
                return Err(RtcpError::SdesItemTooLong);
            }
            out.push(item.type_code());
            out.push(data.len() as u8);
            out.extend_from_slice(data);
        }
        out.push(0); // END
        let rem = (out.len() - start) % 4;
        if rem != 0 {
            out.extend(std::iter::repeat_n(0u8, 4 - rem));
        }
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize), RtcpError> {
        if buf.len() < 4 {
            return Err(RtcpError::TooShort);
        }
        let ssrc = BigEndian::read_u32(&buf[0..4]);
        let mut idx = 4usize;
        let mut items = Vec::new();

        // Items until END(0), then pad to a 4-byte boundary.
        while idx < buf.len() {
            let t = buf[idx];
            idx += 1;
            if t == 0 {
                let pad = (4 - (idx % 4)) % 4;
                if buf.len() < idx + pad {
                    return Err(RtcpError::Truncated);
                }
                idx += pad;
                break;
            }
            if buf.len() < idx + 1 {
                return Err(RtcpError::SdesItemTooShort);
            }
            let len = buf[idx] as usize;
            idx += 1;
            if buf.len() < idx + len {
                return Err(RtcpError::SdesItemTooShort);
            }
            items.push(SdesItem::from_wire(t, &buf[idx..idx + len]));
            idx += len;
        }

        Ok((Self { ssrc, items }, idx))
    }
}

/// Source description packet; always carries at least a CNAME in practice.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sdes {
    pub chunks: Vec<SdesChunk>,
}

impl Sdes {
    pub fn cname(ssrc: u32, cname: impl Into<String>) -> Self {
        Self {
            chunks: vec![SdesChunk {
                ssrc,
                items: vec![SdesItem::Cname(cname.into())],
            }],
        }
    }

    /// First CNAME in the packet, if any.
    #[must_use]
    pub fn first_cname(&self) -> Option<&str> {
        self.chunks.iter().find_map(|c| {
            c.items.iter().find_map(|i| match i {
                SdesItem::Cname(s) => Some(s.as_str()),
                _ => None,
            })
        })
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RtcpError> {
        let start = out.len();
        CommonHeader::new(self.chunks.len() as u8, PT_SDES, false).encode_into(out);
        for ch in &self.chunks {
            ch.encode_into(out)?;
        }
        patch_length(out, start);
        Ok(())
    }

    pub fn decode(_hdr: &CommonHeader, payload: &[u8]) -> Result<Self, RtcpError> {
        let mut chunks = Vec::new();
        let mut idx = 0usize;
        while idx + 4 <= payload.len() {
            let (chunk, used) = SdesChunk::decode(&payload[idx..])?;
            chunks.push(chunk);
            idx += used;
        }
        if idx != payload.len() {
            return Err(RtcpError::Truncated);
        }
        Ok(Self { chunks })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn cname_round_trip() {
        let sdes = Sdes::cname(0x1020_3040, "stream@host");
        let mut out = Vec::new();
        sdes.encode_into(&mut out).unwrap();
        assert_eq!(out.len() % 4, 0);

        let (hdr, total) = CommonHeader::decode(&out).unwrap();
        let dec = Sdes::decode(&hdr, &out[4..total]).unwrap();
        assert_eq!(dec, sdes);
        assert_eq!(dec.first_cname(), Some("stream@host"));
    }

    #[test]
    fn multiple_items_round_trip() {
        let sdes = Sdes {
            chunks: vec![SdesChunk {
                ssrc: 9,
                items: vec![
                    SdesItem::Cname("a@b".into()),
                    SdesItem::Tool("rtpkit".into()),
                    SdesItem::Note("n".into()),
                ],
            }],
        };
        let mut out = Vec::new();
        sdes.encode_into(&mut out).unwrap();
        let (hdr, total) = CommonHeader::decode(&out).unwrap();
        assert_eq!(Sdes::decode(&hdr, &out[4..total]).unwrap(), sdes);
    }

    #[test]
    fn oversized_item_rejected() {
        let sdes = Sdes::cname(1, "x".repeat(300));
        let mut out = Vec::new();
        assert_eq!(sdes.encode_into(&mut out).unwrap_err(), RtcpError::SdesItemTooLong);
    }

    #[test]
    fn empty_item_is_tolerated() {
        let sdes = Sdes::cname(1, "");
        let mut out = Vec::new();
        sdes.encode_into(&mut out).unwrap();
        let (hdr, total) = CommonHeader::decode(&out).unwrap();
        let dec = Sdes::decode(&hdr, &out[4..total]).unwrap();
        assert_eq!(dec.first_cname(), Some(""));
    }
}
