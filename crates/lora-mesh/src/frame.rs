//! Wire format of mesh frames
//!
//! All frames share a fixed prefix; multi-byte fields are little-endian
//! and there is no padding.
//!
//! ```text
//! Map frame (type 4):
//! ┌───────┬──────┬──────────┬──────────┬─────────────────────┬────────────────┐
//! │ "LoR" │ type │ dest (4) │ from (4) │ [node_id(4) hop(1)]*│ AA 55 00 FF AA │
//! └───────┴──────┴──────────┴──────────┴─────────────────────┴────────────────┘
//!
//! Data frame (Direct 1, Forward 2, Broadcast 3, MapRequest 5):
//! ┌───────┬──────┬──────────┬──────────┬──────────┬──────────────┐
//! │ "LoR" │ type │ dest (4) │ from (4) │ orig (4) │ payload      │
//! └───────┴──────┴──────────┴──────────┴──────────┴──────────────┘
//! ```
//!
//! # Field use per frame type
//!
//! | Type        | `dest`            | `from`            | `orig`               |
//! |-------------|-------------------|-------------------|----------------------|
//! | Direct      | recipient         | sender            | originator or 0      |
//! | Forward     | relay to act      | final destination | originator           |
//! | Broadcast   | broadcast id      | sender            | 0                    |
//! | MapRequest  | broadcast id      | sender            | 0                    |
//! | Map         | broadcast id      | sender            | (not present)        |
//!
//! A relay that can reach the final destination directly turns a
//! `Forward` into a `Direct` with `from` set to the originator.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::config::{
    DATA_HEADER_LEN, MAP_END_MARKER, MAP_ENTRY_LEN, MAP_HEADER_LEN, MAX_FRAME_LEN, MESH_MAGIC,
};
use crate::error::{MeshError, Result};

/// Frame type carried in the fourth byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Data for a direct neighbor
    Direct = 1,
    /// Data handed to a relay
    Forward = 2,
    /// Flooded data for every node
    Broadcast = 3,
    /// Routing table of the sender
    Map = 4,
    /// Flooded request for everyone to send their map
    MapRequest = 5,
}

impl TryFrom<u8> for FrameKind {
    type Error = MeshError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Direct),
            2 => Ok(Self::Forward),
            3 => Ok(Self::Broadcast),
            4 => Ok(Self::Map),
            5 => Ok(Self::MapRequest),
            other => Err(MeshError::UnknownFrameType(other)),
        }
    }
}

impl From<FrameKind> for u8 {
    fn from(kind: FrameKind) -> Self {
        kind as u8
    }
}

impl FrameKind {
    /// Check if frames of this kind are flooded through the mesh
    pub fn is_flooded(&self) -> bool {
        matches!(self, FrameKind::Broadcast | FrameKind::MapRequest)
    }
}

/// One node entry of a map frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapEntry {
    /// Node address
    pub node_id: u32,
    /// Hops from the map's sender to this node
    pub hops: u8,
}

/// A routing table broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapFrame {
    /// Broadcast id (0 in maps from older peers)
    pub dest: u32,
    /// Node that sent the map
    pub from: u32,
    /// Nodes known to the sender
    pub entries: Vec<MapEntry>,
}

impl MapFrame {
    /// Size of the encoded frame including the end marker
    pub fn encoded_len(&self) -> usize {
        MAP_HEADER_LEN + (self.entries.len() + 1) * MAP_ENTRY_LEN
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_slice(&MESH_MAGIC);
        buf.put_u8(FrameKind::Map.into());
        buf.put_u32_le(self.dest);
        buf.put_u32_le(self.from);
        for entry in &self.entries {
            buf.put_u32_le(entry.node_id);
            buf.put_u8(entry.hops);
        }
        buf.put_slice(&MAP_END_MARKER);
    }

    fn decode_body(dest: u32, from: u32, mut body: &[u8]) -> Result<Self> {
        if body.len() % MAP_ENTRY_LEN != 0 {
            return Err(MeshError::MisSizedMap {
                from,
                len: body.len(),
            });
        }
        if body.len() < MAP_ENTRY_LEN || body[body.len() - MAP_ENTRY_LEN..] != MAP_END_MARKER {
            return Err(MeshError::MissingEndMarker { from });
        }

        let count = body.len() / MAP_ENTRY_LEN - 1;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let node_id = body.get_u32_le();
            let hops = body.get_u8();
            entries.push(MapEntry { node_id, hops });
        }

        Ok(Self {
            dest,
            from,
            entries,
        })
    }
}

/// A data or control frame with the 16 byte header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    /// Frame type, never [`FrameKind::Map`]
    pub kind: FrameKind,
    /// Recipient, relay or broadcast id depending on `kind`
    pub dest: u32,
    /// Sender, or the final destination of a `Forward`
    pub from: u32,
    /// Originating node of relayed data, 0 if not relayed
    pub orig: u32,
    /// Application payload
    pub payload: Bytes,
}

impl DataFrame {
    /// Data for a direct neighbor
    pub fn direct(dest: u32, from: u32, payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Direct,
            dest,
            from,
            orig: 0,
            payload,
        }
    }

    /// Data handed to `relay` on its way to `final_dest`
    pub fn forward(relay: u32, final_dest: u32, orig: u32, payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Forward,
            dest: relay,
            from: final_dest,
            orig,
            payload,
        }
    }

    /// Flooded data
    pub fn broadcast(broadcast_id: u32, from: u32, payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Broadcast,
            dest: broadcast_id,
            from,
            orig: 0,
            payload,
        }
    }

    /// Flooded request for map syncs
    pub fn map_request(broadcast_id: u32, from: u32) -> Self {
        Self {
            kind: FrameKind::MapRequest,
            dest: broadcast_id,
            from,
            orig: 0,
            payload: Bytes::new(),
        }
    }

    /// Final destination of a `Forward`, the recipient otherwise
    pub fn final_destination(&self) -> u32 {
        match self.kind {
            FrameKind::Forward => self.from,
            _ => self.dest,
        }
    }

    /// Node the payload came from, as reported to the application
    pub fn originator(&self) -> u32 {
        if self.orig != 0 {
            self.orig
        } else {
            self.from
        }
    }

    /// Node that sent this frame into the mesh
    pub fn sender(&self) -> u32 {
        match self.kind {
            FrameKind::Forward => self.orig,
            _ => self.from,
        }
    }

    /// Size of the encoded frame
    pub fn encoded_len(&self) -> usize {
        DATA_HEADER_LEN + self.payload.len()
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_slice(&MESH_MAGIC);
        buf.put_u8(self.kind.into());
        buf.put_u32_le(self.dest);
        buf.put_u32_le(self.from);
        buf.put_u32_le(self.orig);
        buf.put_slice(&self.payload);
    }
}

/// A decoded mesh frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Routing table broadcast
    Map(MapFrame),
    /// Data or map request
    Data(DataFrame),
}

impl Frame {
    /// Frame type
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Map(_) => FrameKind::Map,
            Frame::Data(data) => data.kind,
        }
    }

    /// Size of the encoded frame
    pub fn encoded_len(&self) -> usize {
        match self {
            Frame::Map(map) => map.encoded_len(),
            Frame::Data(data) => data.encoded_len(),
        }
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        match self {
            Frame::Map(map) => map.encode_into(&mut buf),
            Frame::Data(data) => data.encode_into(&mut buf),
        }
        buf.freeze()
    }

    /// Decode a received frame
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() > MAX_FRAME_LEN {
            return Err(MeshError::FrameTooLarge {
                size: raw.len(),
                max: MAX_FRAME_LEN,
            });
        }
        if raw.len() < MESH_MAGIC.len() || raw[..MESH_MAGIC.len()] != MESH_MAGIC {
            return Err(MeshError::InvalidMagic {
                got: raw[..raw.len().min(MESH_MAGIC.len())].to_vec(),
            });
        }
        if raw.len() < MAP_HEADER_LEN {
            return Err(MeshError::FrameTooShort {
                size: raw.len(),
                min: MAP_HEADER_LEN,
            });
        }

        let mut buf = &raw[MESH_MAGIC.len()..];
        let kind = FrameKind::try_from(buf.get_u8())?;
        let dest = buf.get_u32_le();
        let from = buf.get_u32_le();

        match kind {
            FrameKind::Map => Ok(Frame::Map(MapFrame::decode_body(dest, from, buf)?)),
            _ => {
                if raw.len() < DATA_HEADER_LEN {
                    return Err(MeshError::FrameTooShort {
                        size: raw.len(),
                        min: DATA_HEADER_LEN,
                    });
                }
                let orig = buf.get_u32_le();
                Ok(Frame::Data(DataFrame {
                    kind,
                    dest,
                    from,
                    orig,
                    payload: Bytes::copy_from_slice(buf),
                }))
            }
        }
    }
}

impl From<MapFrame> for Frame {
    fn from(map: MapFrame) -> Self {
        Frame::Map(map)
    }
}

impl From<DataFrame> for Frame {
    fn from(data: DataFrame) -> Self {
        Frame::Data(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_bytes(from: u32, entries: &[(u32, u8)], marker: bool) -> Vec<u8> {
        let mut raw = b"LoR".to_vec();
        raw.push(4);
        raw.extend_from_slice(&0u32.to_le_bytes());
        raw.extend_from_slice(&from.to_le_bytes());
        for (id, hops) in entries {
            raw.extend_from_slice(&id.to_le_bytes());
            raw.push(*hops);
        }
        if marker {
            raw.extend_from_slice(&MAP_END_MARKER);
        }
        raw
    }

    #[test]
    fn test_frame_kind_from_u8() {
        assert_eq!(FrameKind::try_from(1).unwrap(), FrameKind::Direct);
        assert_eq!(FrameKind::try_from(5).unwrap(), FrameKind::MapRequest);
        assert!(matches!(
            FrameKind::try_from(0),
            Err(MeshError::UnknownFrameType(0))
        ));
        assert!(FrameKind::Broadcast.is_flooded());
        assert!(!FrameKind::Forward.is_flooded());
    }

    #[test]
    fn test_direct_frame_layout() {
        let frame = Frame::from(DataFrame::direct(
            0x22222222,
            0x11111111,
            Bytes::from_static(b"hi"),
        ));
        let raw = frame.encode();
        assert_eq!(raw.len(), DATA_HEADER_LEN + 2);
        assert_eq!(&raw[..3], b"LoR");
        assert_eq!(raw[3], 1);
        assert_eq!(&raw[4..8], &0x22222222u32.to_le_bytes());
        assert_eq!(&raw[8..12], &0x11111111u32.to_le_bytes());
        assert_eq!(&raw[12..16], &[0, 0, 0, 0]);
        assert_eq!(&raw[16..], b"hi");
    }

    #[test]
    fn test_map_frame_layout() {
        let frame = Frame::from(MapFrame {
            dest: 0x11111101,
            from: 0x11111111,
            entries: vec![MapEntry {
                node_id: 0x33333333,
                hops: 2,
            }],
        });
        let raw = frame.encode();
        assert_eq!(raw.len(), MAP_HEADER_LEN + 2 * MAP_ENTRY_LEN);
        assert_eq!(raw[3], 4);
        assert_eq!(&raw[12..16], &0x33333333u32.to_le_bytes());
        assert_eq!(raw[16], 2);
        assert_eq!(&raw[17..], &MAP_END_MARKER);
    }

    #[test]
    fn test_decode_map_locates_end_marker() {
        let raw = map_bytes(0x22222222, &[(0x33333333, 0), (0x44444444, 3)], true);
        let Frame::Map(map) = Frame::decode(&raw).unwrap() else {
            panic!("expected map frame");
        };
        assert_eq!(map.from, 0x22222222);
        assert_eq!(
            map.entries,
            vec![
                MapEntry {
                    node_id: 0x33333333,
                    hops: 0
                },
                MapEntry {
                    node_id: 0x44444444,
                    hops: 3
                },
            ]
        );
    }

    #[test]
    fn test_decode_empty_map() {
        let raw = map_bytes(0x22222222, &[], true);
        let Frame::Map(map) = Frame::decode(&raw).unwrap() else {
            panic!("expected map frame");
        };
        assert!(map.entries.is_empty());
    }

    #[test]
    fn test_decode_map_without_end_marker() {
        let raw = map_bytes(0x22222222, &[(0x33333333, 0)], false);
        let err = Frame::decode(&raw).unwrap_err();
        assert!(matches!(
            err,
            MeshError::MissingEndMarker { from: 0x22222222 }
        ));

        let raw = map_bytes(0x22222222, &[], false);
        assert!(matches!(
            Frame::decode(&raw),
            Err(MeshError::MissingEndMarker { .. })
        ));
    }

    #[test]
    fn test_decode_mis_sized_map() {
        let mut raw = map_bytes(0x22222222, &[(0x33333333, 0)], true);
        raw.push(0x00);
        assert!(matches!(
            Frame::decode(&raw),
            Err(MeshError::MisSizedMap { len: 11, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut raw = Frame::from(DataFrame::direct(1, 2, Bytes::new()))
            .encode()
            .to_vec();
        raw[1] = b'x';
        let err = Frame::decode(&raw).unwrap_err();
        assert!(err.is_malformed_frame());
        assert!(matches!(err, MeshError::InvalidMagic { .. }));

        assert!(matches!(
            Frame::decode(b"Lo"),
            Err(MeshError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_short_data_frame() {
        let raw = map_bytes(1, &[], false);
        let mut raw = raw[..MAP_HEADER_LEN].to_vec();
        raw[3] = 1;
        assert!(matches!(
            Frame::decode(&raw),
            Err(MeshError::FrameTooShort { size: 12, min: 16 })
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let raw = vec![0u8; MAX_FRAME_LEN + 1];
        assert!(matches!(
            Frame::decode(&raw),
            Err(MeshError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_forward_fields() {
        let frame = DataFrame::forward(
            0x11111111,
            0x33333333,
            0x44444444,
            Bytes::from_static(b"relay me"),
        );
        let decoded = Frame::decode(&Frame::from(frame.clone()).encode()).unwrap();
        let Frame::Data(data) = decoded else {
            panic!("expected data frame");
        };
        assert_eq!(data, frame);
        assert_eq!(data.final_destination(), 0x33333333);
        assert_eq!(data.originator(), 0x44444444);
        assert_eq!(data.sender(), 0x44444444);
    }

    #[test]
    fn test_originator_falls_back_to_from() {
        let frame = DataFrame::direct(0x11111111, 0x22222222, Bytes::new());
        assert_eq!(frame.originator(), 0x22222222);
        assert_eq!(frame.sender(), 0x22222222);
        assert_eq!(frame.final_destination(), 0x11111111);
    }

    #[test]
    fn test_map_request_has_header_only() {
        let frame = Frame::from(DataFrame::map_request(0x22222201, 0x22222222));
        assert_eq!(frame.encode().len(), DATA_HEADER_LEN);
        assert_eq!(frame.kind(), FrameKind::MapRequest);
    }
}
