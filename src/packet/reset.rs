//! Public reset packets.
//!
//! A public reset tells a peer that the server has no state for the
//! connection id it is using. The body is not encrypted; the nonce proof
//! only lets this server recognise its own resets.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{BufMut, Bytes, BytesMut};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroize;

use super::header::{PublicHeader, Reader};
use crate::core::{ConnectionId, HeaderError, PacketNumber, Version, NONCE_PROOF_SIZE};

const RESET_PROOF_INFO: &[u8] = b"quic-dispatcher v1 reset proof";

const ADDRESS_FAMILY_V4: u8 = 4;
const ADDRESS_FAMILY_V6: u8 = 6;

/// Per-process secret used to derive reset nonce proofs.
///
/// Zeroized on drop.
#[derive(Clone)]
pub struct ResetSecret([u8; 32]);

impl ResetSecret {
    /// Generate a fresh random secret.
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self(secret)
    }

    /// Use existing secret material.
    pub fn from_bytes(secret: [u8; 32]) -> Self {
        Self(secret)
    }

    /// Derive the nonce proof for `connection_id`.
    ///
    /// ```text
    /// proof = HKDF-Expand(secret, "quic-dispatcher v1 reset proof" || id, 8)
    /// ```
    pub fn nonce_proof(&self, connection_id: ConnectionId) -> [u8; NONCE_PROOF_SIZE] {
        let hk = Hkdf::<Sha256>::from_prk(&self.0)
            .expect("32 bytes is valid PRK length for SHA-256 HKDF");
        let mut proof = [0u8; NONCE_PROOF_SIZE];
        hk.expand_multi_info(&[RESET_PROOF_INFO, &connection_id.to_bytes()], &mut proof)
            .expect("8 bytes is valid output length for SHA-256 HKDF");
        proof
    }
}

impl Drop for ResetSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for ResetSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResetSecret(..)")
    }
}

/// A public reset packet.
///
/// ```text
/// +--------+-------------+-------------+---------+----------------+
/// | header | nonce proof | rejected pn | version | client address |
/// | 9 B    | 8 B         | 8 B LE      | 4 B BE  | 7 or 19 B      |
/// +--------+-------------+-------------+---------+----------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicReset {
    /// Connection id the reset refers to.
    pub connection_id: ConnectionId,
    /// Proof that this server generated the reset.
    pub nonce_proof: [u8; NONCE_PROOF_SIZE],
    /// Packet number that triggered the reset.
    pub rejected_packet_number: PacketNumber,
    /// Version the server associated with the connection id.
    pub version: Version,
    /// Address the triggering packet came from.
    pub client_address: SocketAddr,
}

impl PublicReset {
    /// Build a reset for `connection_id`, deriving the proof from `secret`.
    pub fn new(
        secret: &ResetSecret,
        connection_id: ConnectionId,
        rejected_packet_number: PacketNumber,
        version: Version,
        client_address: SocketAddr,
    ) -> Self {
        Self {
            connection_id,
            nonce_proof: secret.nonce_proof(connection_id),
            rejected_packet_number,
            version,
            client_address,
        }
    }

    /// Encode the full packet, header included.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(48);
        let mut header = Vec::with_capacity(9);
        PublicHeader::reset(self.connection_id).encode(&mut header);
        buf.put_slice(&header);
        buf.put_slice(&self.nonce_proof);
        buf.put_u64_le(self.rejected_packet_number.value());
        buf.put_u32(self.version.tag());
        match self.client_address.ip() {
            IpAddr::V4(ip) => {
                buf.put_u8(ADDRESS_FAMILY_V4);
                buf.put_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                buf.put_u8(ADDRESS_FAMILY_V6);
                buf.put_slice(&ip.octets());
            }
        }
        buf.put_u16(self.client_address.port());
        buf.freeze()
    }

    /// Decode a full reset packet.
    pub fn decode(packet: &[u8]) -> Result<Self, HeaderError> {
        let header = PublicHeader::decode(packet)?;
        if !header.reset {
            return Err(HeaderError::InvalidFlags(packet[0]));
        }

        let mut reader = Reader::new(&packet[header.encoded_len()..]);

        let mut nonce_proof = [0u8; NONCE_PROOF_SIZE];
        nonce_proof.copy_from_slice(reader.take(NONCE_PROOF_SIZE)?);

        let mut pn = [0u8; 8];
        pn.copy_from_slice(reader.take(8)?);
        let rejected_packet_number = PacketNumber::new(u64::from_le_bytes(pn));

        let mut tag = [0u8; 4];
        tag.copy_from_slice(reader.take(4)?);
        let version = Version::new(u32::from_be_bytes(tag));

        let ip = match reader.u8()? {
            ADDRESS_FAMILY_V4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(reader.take(4)?);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            ADDRESS_FAMILY_V6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(reader.take(16)?);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            family => return Err(HeaderError::InvalidAddressFamily(family)),
        };
        let mut port = [0u8; 2];
        port.copy_from_slice(reader.take(2)?);

        Ok(Self {
            connection_id: header.connection_id,
            nonce_proof,
            rejected_packet_number,
            version,
            client_address: SocketAddr::new(ip, u16::from_be_bytes(port)),
        })
    }
}
