// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire-format views over the frames the repeater inspects.
//!
//! These are byte-exact header layouts for Ethernet II, ARP, IPv4, UDP and
//! DHCP, cast in place over received frames. The radio's fullMAC firmware
//! always presents a fixed 14-byte Ethernet II header (no VLAN tags), so the
//! offsets here are stable.
//!
//! Everything in this module treats a short or malformed frame as "not the
//! thing we were looking for" and returns `None`; the forwarding decision
//! then falls back to the multicast bit alone.

use drv_wifi_radio_api::{Ipv4Addr, MacAddr};
use static_assertions::const_assert_eq;
use zerocopy::byteorder::{NetworkEndian, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const IP_PROTO_UDP: u8 = 17;
pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

pub const ETH_HDR_LEN: usize = 14;
/// Shortest frame carrying a full fixed IPv4 header.
pub const MIN_IPV4_FRAME_LEN: usize = 34;
/// Shortest frame carrying a full Ethernet ARP packet.
pub const MIN_ARP_FRAME_LEN: usize = 42;
/// Shortest frame that can carry a DHCP message worth sniffing: Ethernet +
/// minimal IPv4 + UDP + the fixed DHCP header and options magic.
pub const MIN_DHCP_FRAME_LEN: usize = 286;

/// "Reply to the broadcast address" bit in the DHCP flags field.
pub const DHCP_FLAG_BROADCAST: u16 = 0x8000;

pub const DHCP_OP_BOOTREPLY: u8 = 2;
pub const DHCP_MAGIC: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

pub const DHCP_OPT_PAD: u8 = 0;
pub const DHCP_OPT_SUBNET_MASK: u8 = 1;
pub const DHCP_OPT_ROUTER: u8 = 3;
pub const DHCP_OPT_MSG_TYPE: u8 = 53;
pub const DHCP_OPT_END: u8 = 0xff;

pub const DHCP_MSG_ACK: u8 = 5;

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct EthernetHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: U16<NetworkEndian>,
}

const_assert_eq!(core::mem::size_of::<EthernetHeader>(), ETH_HDR_LEN);

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct Ipv4Header {
    pub version_ihl: u8,
    pub dscp_ecn: u8,
    pub total_len: U16<NetworkEndian>,
    pub ident: U16<NetworkEndian>,
    pub flags_frag: U16<NetworkEndian>,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: U16<NetworkEndian>,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

const_assert_eq!(core::mem::size_of::<Ipv4Header>(), 20);

impl Ipv4Header {
    /// Header length in bytes, from the IHL field. Can legitimately exceed
    /// 20 when IP options are present; values below 20 mean the frame is
    /// garbage.
    pub fn header_len(&self) -> usize {
        usize::from(self.version_ihl & 0x0f) * 4
    }
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ArpPacket {
    pub htype: U16<NetworkEndian>,
    pub ptype: U16<NetworkEndian>,
    pub hlen: u8,
    pub plen: u8,
    pub oper: U16<NetworkEndian>,
    pub sha: MacAddr,
    pub spa: Ipv4Addr,
    pub tha: MacAddr,
    pub tpa: Ipv4Addr,
}

const_assert_eq!(core::mem::size_of::<ArpPacket>(), 28);

pub const ARP_OPER_REQUEST: u16 = 1;

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UdpHeader {
    pub src_port: U16<NetworkEndian>,
    pub dst_port: U16<NetworkEndian>,
    pub length: U16<NetworkEndian>,
    pub checksum: U16<NetworkEndian>,
}

const_assert_eq!(core::mem::size_of::<UdpHeader>(), 8);

/// The fixed portion of a DHCP message, through `file`. The options (led by
/// the magic cookie) follow directly.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct DhcpHeader {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: U32<NetworkEndian>,
    pub secs: U16<NetworkEndian>,
    pub flags: U16<NetworkEndian>,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
}

const_assert_eq!(core::mem::size_of::<DhcpHeader>(), 236);

impl DhcpHeader {
    /// First six octets of `chaddr`, which is all of it for Ethernet.
    pub fn client_mac(&self) -> MacAddr {
        let mut mac = [0; 6];
        mac.copy_from_slice(&self.chaddr[..6]);
        MacAddr(mac)
    }
}

/// Splits a frame into its Ethernet header and payload.
pub fn ethernet(frame: &[u8]) -> Option<(&EthernetHeader, &[u8])> {
    EthernetHeader::ref_from_prefix(frame).ok()
}

/// Splits a frame into its Ethernet header and payload, mutably.
pub fn ethernet_mut(
    frame: &mut [u8],
) -> Option<(&mut EthernetHeader, &mut [u8])> {
    EthernetHeader::mut_from_prefix(frame).ok()
}

/// Destination MAC of a frame the caller has already length-checked.
pub fn dst_mac(frame: &[u8]) -> MacAddr {
    let mut mac = [0; 6];
    mac.copy_from_slice(&frame[..6]);
    MacAddr(mac)
}

/// Source MAC of a frame the caller has already length-checked.
pub fn src_mac(frame: &[u8]) -> MacAddr {
    let mut mac = [0; 6];
    mac.copy_from_slice(&frame[6..12]);
    MacAddr(mac)
}

/// Destination IPv4 address, if this is an intact IPv4 frame.
pub fn ipv4_dst(frame: &[u8]) -> Option<Ipv4Addr> {
    let (eth, body) = ethernet(frame)?;
    if eth.ethertype.get() != ETHERTYPE_IPV4 {
        return None;
    }
    let (ip, _) = Ipv4Header::ref_from_prefix(body).ok()?;
    Some(ip.dst)
}

/// Locates the UDP header and payload of an IPv4/UDP frame, honoring the
/// IHL. Returns `None` for anything that isn't IPv4/UDP or is truncated.
pub fn udp(frame: &[u8]) -> Option<(&Ipv4Header, &UdpHeader, &[u8])> {
    let (eth, body) = ethernet(frame)?;
    if eth.ethertype.get() != ETHERTYPE_IPV4 {
        return None;
    }
    let (ip, _) = Ipv4Header::ref_from_prefix(body).ok()?;
    if ip.protocol != IP_PROTO_UDP {
        return None;
    }
    let ihl = ip.header_len();
    if ihl < 20 {
        return None;
    }
    let (udp, payload) = UdpHeader::ref_from_prefix(body.get(ihl..)?).ok()?;
    Some((ip, udp, payload))
}

/// The inline pre-check for a server-to-client DHCP frame: cheap enough to
/// run on every received frame, and false for ~99.9% of them before any
/// deeper parsing happens.
pub fn is_dhcp_reply(frame: &[u8]) -> bool {
    if frame.len() < MIN_DHCP_FRAME_LEN {
        return false;
    }
    match udp(frame) {
        Some((_, udp, _)) => {
            udp.src_port.get() == DHCP_SERVER_PORT
                && udp.dst_port.get() == DHCP_CLIENT_PORT
        }
        None => false,
    }
}
