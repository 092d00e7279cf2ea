//! Public header encoding and decoding.
//!
//! The public header is the only part of a datagram the dispatcher reads.
//! Everything after it belongs to the connection state machine.

use crate::core::{
    ConnectionId, HeaderError, PacketNumber, Version, CONNECTION_ID_SIZE, FLAG_CONNECTION_ID_MASK,
    FLAG_PACKET_NUMBER_MASK, FLAG_RESERVED_MASK, FLAG_RESET, FLAG_VERSION, MAX_PACKET_NUMBER,
    VERSION_SIZE,
};

/// Number of connection id bytes carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionIdLength {
    /// Id omitted.
    Zero,
    /// Low byte only.
    One,
    /// Low four bytes.
    Four,
    /// Full eight-byte id.
    Eight,
}

impl ConnectionIdLength {
    /// Size in bytes.
    pub fn bytes(self) -> usize {
        match self {
            Self::Zero => 0,
            Self::One => 1,
            Self::Four => 4,
            Self::Eight => CONNECTION_ID_SIZE,
        }
    }

    fn from_flags(flags: u8) -> Self {
        match flags & FLAG_CONNECTION_ID_MASK {
            0x00 => Self::Zero,
            0x04 => Self::One,
            0x08 => Self::Four,
            _ => Self::Eight,
        }
    }

    fn to_flags(self) -> u8 {
        match self {
            Self::Zero => 0x00,
            Self::One => 0x04,
            Self::Four => 0x08,
            Self::Eight => 0x0C,
        }
    }
}

/// Number of packet number bytes carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketNumberLength {
    /// One byte.
    One,
    /// Two bytes.
    Two,
    /// Four bytes.
    Four,
    /// Six bytes.
    Six,
}

impl PacketNumberLength {
    /// Size in bytes.
    pub fn bytes(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 4,
            Self::Six => 6,
        }
    }

    /// Smallest encoding that can hold `packet_number`.
    pub fn for_packet_number(packet_number: PacketNumber) -> Self {
        match packet_number.value() {
            0..=0xFF => Self::One,
            0x100..=0xFFFF => Self::Two,
            0x1_0000..=0xFFFF_FFFF => Self::Four,
            _ => Self::Six,
        }
    }

    fn from_flags(flags: u8) -> Self {
        match flags & FLAG_PACKET_NUMBER_MASK {
            0x00 => Self::One,
            0x10 => Self::Two,
            0x20 => Self::Four,
            _ => Self::Six,
        }
    }

    fn to_flags(self) -> u8 {
        match self {
            Self::One => 0x00,
            Self::Two => 0x10,
            Self::Four => 0x20,
            Self::Six => 0x30,
        }
    }
}

/// Decoded public header.
///
/// Wire format:
/// ```text
/// +-------+----------------+-------------+------------------+
/// | flags | connection id  | version     | packet number    |
/// | 1 B   | 0/1/4/8 B (LE) | 4 B BE, opt | 1/2/4/6 B (LE)   |
/// +-------+----------------+-------------+------------------+
/// ```
///
/// Public resets carry neither version nor packet number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicHeader {
    /// Connection id, zero-extended when truncated on the wire.
    pub connection_id: ConnectionId,
    /// How many id bytes were on the wire.
    pub connection_id_length: ConnectionIdLength,
    /// Public reset flag.
    pub reset: bool,
    /// Version tag, present only while the client has not heard from the server.
    pub version: Option<Version>,
    /// Packet number (absent for public resets).
    pub packet_number: Option<PacketNumber>,
    /// Encoding used for the packet number.
    pub packet_number_length: PacketNumberLength,
}

impl PublicHeader {
    /// Header for a regular packet with a full connection id.
    pub fn new(
        connection_id: ConnectionId,
        version: Option<Version>,
        packet_number: PacketNumber,
    ) -> Self {
        Self {
            connection_id,
            connection_id_length: ConnectionIdLength::Eight,
            reset: false,
            version,
            packet_number: Some(packet_number),
            packet_number_length: PacketNumberLength::for_packet_number(packet_number),
        }
    }

    /// Header for a public reset.
    pub fn reset(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            connection_id_length: ConnectionIdLength::Eight,
            reset: true,
            version: None,
            packet_number: None,
            packet_number_length: PacketNumberLength::One,
        }
    }

    /// Check if the full 8-byte connection id was present.
    pub fn has_full_connection_id(&self) -> bool {
        self.connection_id_length == ConnectionIdLength::Eight
    }

    /// Encoded size of this header.
    pub fn encoded_len(&self) -> usize {
        let mut len = 1 + self.connection_id_length.bytes();
        if self.version.is_some() {
            len += VERSION_SIZE;
        }
        if self.packet_number.is_some() {
            len += self.packet_number_length.bytes();
        }
        len
    }

    /// Append the encoded header to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut flags = self.connection_id_length.to_flags();
        if self.reset {
            flags |= FLAG_RESET;
        }
        if self.version.is_some() {
            flags |= FLAG_VERSION;
        }
        if self.packet_number.is_some() {
            flags |= self.packet_number_length.to_flags();
        }
        out.push(flags);

        let id_bytes = self.connection_id.to_bytes();
        out.extend_from_slice(&id_bytes[..self.connection_id_length.bytes()]);

        if let Some(version) = self.version {
            out.extend_from_slice(&version.tag().to_be_bytes());
        }

        if let Some(packet_number) = self.packet_number {
            let value = packet_number.value() & MAX_PACKET_NUMBER;
            out.extend_from_slice(&value.to_le_bytes()[..self.packet_number_length.bytes()]);
        }
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out);
        out
    }

    /// Decode the public header at the start of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, HeaderError> {
        let mut reader = Reader::new(buf);
        let flags = reader.u8()?;
        if flags & FLAG_RESERVED_MASK != 0 {
            return Err(HeaderError::InvalidFlags(flags));
        }

        let reset = flags & FLAG_RESET != 0;
        let has_version = flags & FLAG_VERSION != 0;
        if reset && has_version {
            return Err(HeaderError::ResetWithVersion);
        }

        let connection_id_length = ConnectionIdLength::from_flags(flags);
        let mut id_bytes = [0u8; CONNECTION_ID_SIZE];
        id_bytes[..connection_id_length.bytes()]
            .copy_from_slice(reader.take(connection_id_length.bytes())?);
        let connection_id = ConnectionId::from_bytes(id_bytes);

        let version = if has_version {
            let mut tag = [0u8; VERSION_SIZE];
            tag.copy_from_slice(reader.take(VERSION_SIZE)?);
            Some(Version::new(u32::from_be_bytes(tag)))
        } else {
            None
        };

        let packet_number_length = PacketNumberLength::from_flags(flags);
        let packet_number = if reset {
            None
        } else {
            let mut pn = [0u8; 8];
            pn[..packet_number_length.bytes()]
                .copy_from_slice(reader.take(packet_number_length.bytes())?);
            Some(PacketNumber::new(u64::from_le_bytes(pn)))
        };

        Ok(Self {
            connection_id,
            connection_id_length,
            reset,
            version,
            packet_number,
            packet_number_length,
        })
    }
}

/// Bounds-checked cursor over a byte slice.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], HeaderError> {
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(HeaderError::TooShort {
                expected: end,
                actual: self.buf.len(),
            });
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, HeaderError> {
        Ok(self.take(1)?[0])
    }
}
