//! Slow-protocols PDU codec: LACPDU and Marker PDU.
//!
//! Both PDUs occupy a fixed 110-byte big-endian payload that follows the
//! Ethernet header. Offsets below are relative to the payload start (the
//! subtype octet).

use crate::error::{LacpError, Result};
use crate::types::{PortParams, PortState};
use byteorder::{BigEndian, ByteOrder};
use sonic_types::MacAddress;

/// EtherType of IEEE 802.3 slow protocols.
pub const SLOW_PROTOCOLS_ETHERTYPE: u16 = 0x8809;
/// Length of an Ethernet header without VLAN tag.
pub const ETH_HEADER_LEN: usize = 14;
/// Fixed payload length of both LACPDU and Marker PDU.
pub const PDU_LEN: usize = 110;

pub const SUBTYPE_LACP: u8 = 0x01;
pub const SUBTYPE_MARKER: u8 = 0x02;
pub const LACP_VERSION: u8 = 0x01;
pub const MARKER_VERSION: u8 = 0x01;

const TLV_TERMINATOR: u8 = 0x00;
const TLV_ACTOR: u8 = 0x01;
const TLV_PARTNER: u8 = 0x02;
const TLV_COLLECTOR: u8 = 0x03;
const INFO_TLV_LEN: u8 = 0x14;
const COLLECTOR_TLV_LEN: u8 = 0x10;

const ACTOR_OFFSET: usize = 2;
const PARTNER_OFFSET: usize = 22;
const COLLECTOR_OFFSET: usize = 42;
const TERMINATOR_OFFSET: usize = 58;

const MARKER_TLV_INFORMATION: u8 = 0x01;
const MARKER_TLV_RESPONSE: u8 = 0x02;
const MARKER_INFO_LEN: u8 = 0x10;

/// A decoded LACPDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lacpdu {
    pub actor: PortParams,
    pub partner: PortParams,
    pub collector_max_delay: u16,
}

impl Lacpdu {
    /// Encodes the PDU into its fixed payload.
    pub fn encode(&self) -> [u8; PDU_LEN] {
        let mut buf = [0u8; PDU_LEN];
        buf[0] = SUBTYPE_LACP;
        buf[1] = LACP_VERSION;
        write_info_tlv(&mut buf[ACTOR_OFFSET..PARTNER_OFFSET], TLV_ACTOR, &self.actor);
        write_info_tlv(&mut buf[PARTNER_OFFSET..COLLECTOR_OFFSET], TLV_PARTNER, &self.partner);

        let collector = &mut buf[COLLECTOR_OFFSET..TERMINATOR_OFFSET];
        collector[0] = TLV_COLLECTOR;
        collector[1] = COLLECTOR_TLV_LEN;
        BigEndian::write_u16(&mut collector[2..4], self.collector_max_delay);

        buf[TERMINATOR_OFFSET] = TLV_TERMINATOR;
        buf[TERMINATOR_OFFSET + 1] = 0;
        buf
    }

    /// Decodes a LACPDU payload. The version octet is not checked so that
    /// later protocol versions still interoperate.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < PDU_LEN {
            return Err(LacpError::truncated("LACPDU", PDU_LEN, buf.len()));
        }
        if buf[0] != SUBTYPE_LACP {
            return Err(LacpError::UnknownSubtype(buf[0]));
        }
        let actor = read_info_tlv(&buf[ACTOR_OFFSET..PARTNER_OFFSET], TLV_ACTOR, "actor")?;
        let partner = read_info_tlv(&buf[PARTNER_OFFSET..COLLECTOR_OFFSET], TLV_PARTNER, "partner")?;

        let collector = &buf[COLLECTOR_OFFSET..TERMINATOR_OFFSET];
        if collector[0] != TLV_COLLECTOR || collector[1] != COLLECTOR_TLV_LEN {
            return Err(LacpError::MalformedTlv {
                what: "collector",
                tlv_type: collector[0],
                length: collector[1],
            });
        }
        Ok(Self {
            actor,
            partner,
            collector_max_delay: BigEndian::read_u16(&collector[2..4]),
        })
    }
}

fn write_info_tlv(buf: &mut [u8], tlv_type: u8, params: &PortParams) {
    buf[0] = tlv_type;
    buf[1] = INFO_TLV_LEN;
    BigEndian::write_u16(&mut buf[2..4], params.system_priority);
    buf[4..10].copy_from_slice(params.system.as_bytes());
    BigEndian::write_u16(&mut buf[10..12], params.key);
    BigEndian::write_u16(&mut buf[12..14], params.port_priority);
    BigEndian::write_u16(&mut buf[14..16], params.port_number);
    buf[16] = params.port_state.bits();
}

fn read_info_tlv(buf: &[u8], tlv_type: u8, what: &'static str) -> Result<PortParams> {
    if buf[0] != tlv_type || buf[1] != INFO_TLV_LEN {
        return Err(LacpError::MalformedTlv {
            what,
            tlv_type: buf[0],
            length: buf[1],
        });
    }
    let system = MacAddress::from_slice(&buf[4..10])
        .ok_or_else(|| LacpError::truncated(what, 6, buf.len().saturating_sub(4)))?;
    Ok(PortParams {
        system,
        system_priority: BigEndian::read_u16(&buf[2..4]),
        key: BigEndian::read_u16(&buf[10..12]),
        port_priority: BigEndian::read_u16(&buf[12..14]),
        port_number: BigEndian::read_u16(&buf[14..16]),
        port_state: PortState::from_bits_retain(buf[16]),
    })
}

/// Marker PDU TLV kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Information,
    Response,
    /// Any other TLV type, kept so it can be counted.
    Unknown(u8),
}

impl MarkerKind {
    fn tlv_type(self) -> u8 {
        match self {
            MarkerKind::Information => MARKER_TLV_INFORMATION,
            MarkerKind::Response => MARKER_TLV_RESPONSE,
            MarkerKind::Unknown(t) => t,
        }
    }
}

/// A decoded Marker PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerPdu {
    pub kind: MarkerKind,
    pub requester_port: u16,
    pub requester_system: MacAddress,
    pub transaction_id: u32,
}

impl MarkerPdu {
    /// The response that answers this marker: same requester fields,
    /// response TLV.
    pub fn to_response(&self) -> MarkerPdu {
        MarkerPdu {
            kind: MarkerKind::Response,
            ..*self
        }
    }

    pub fn encode(&self) -> [u8; PDU_LEN] {
        let mut buf = [0u8; PDU_LEN];
        buf[0] = SUBTYPE_MARKER;
        buf[1] = MARKER_VERSION;
        buf[2] = self.kind.tlv_type();
        buf[3] = MARKER_INFO_LEN;
        BigEndian::write_u16(&mut buf[4..6], self.requester_port);
        buf[6..12].copy_from_slice(self.requester_system.as_bytes());
        BigEndian::write_u32(&mut buf[12..16], self.transaction_id);
        // 16..18 pad, 18..20 terminator, rest reserved.
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < PDU_LEN {
            return Err(LacpError::truncated("Marker PDU", PDU_LEN, buf.len()));
        }
        if buf[0] != SUBTYPE_MARKER {
            return Err(LacpError::UnknownSubtype(buf[0]));
        }
        let kind = match buf[2] {
            MARKER_TLV_INFORMATION => MarkerKind::Information,
            MARKER_TLV_RESPONSE => MarkerKind::Response,
            other => MarkerKind::Unknown(other),
        };
        let requester_system = MacAddress::from_slice(&buf[6..12])
            .ok_or_else(|| LacpError::truncated("Marker PDU", PDU_LEN, buf.len()))?;
        Ok(Self {
            kind,
            requester_port: BigEndian::read_u16(&buf[4..6]),
            requester_system,
            transaction_id: BigEndian::read_u32(&buf[12..16]),
        })
    }
}

/// A received slow-protocols PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlowProtocolPdu {
    Lacp(Lacpdu),
    Marker(MarkerPdu),
}

impl SlowProtocolPdu {
    /// Decodes a payload by dispatching on its subtype octet.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        match buf.first() {
            None => Err(LacpError::truncated("slow-protocols PDU", 1, 0)),
            Some(&SUBTYPE_LACP) => Lacpdu::decode(buf).map(SlowProtocolPdu::Lacp),
            Some(&SUBTYPE_MARKER) => MarkerPdu::decode(buf).map(SlowProtocolPdu::Marker),
            Some(&other) => Err(LacpError::UnknownSubtype(other)),
        }
    }
}

/// Prefixes a payload with the slow-protocols Ethernet header.
pub fn build_frame(src: MacAddress, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ETH_HEADER_LEN + payload.len());
    frame.extend_from_slice(MacAddress::SLOW_PROTOCOLS.as_bytes());
    frame.extend_from_slice(src.as_bytes());
    frame.extend_from_slice(&SLOW_PROTOCOLS_ETHERTYPE.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Strips the Ethernet header from a slow-protocols frame.
///
/// Returns `None` for frames with another destination or EtherType.
pub fn frame_payload(frame: &[u8]) -> Option<&[u8]> {
    if frame.len() < ETH_HEADER_LEN {
        return None;
    }
    let dst = MacAddress::from_slice(&frame[0..6])?;
    if dst != MacAddress::SLOW_PROTOCOLS
        || BigEndian::read_u16(&frame[12..14]) != SLOW_PROTOCOLS_ETHERTYPE
    {
        return None;
    }
    Some(&frame[ETH_HEADER_LEN..])
}
