// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The identity transformations that make several downstream clients look
//! like one station.
//!
//! [`upstream`] runs on frames received from non-primary downstream clients
//! before they go out the station interface: it learns the client's IPv4
//! address, then masquerades the frame's link-layer identity as the cloned
//! client. [`downstream`] runs on unicast frames received from upstream: it
//! uses the learned table to put the real client's address back.
//!
//! Both rewriters mutate the caller's buffer in place, never allocate, and
//! never fail; a frame that doesn't parse is simply left alone apart from
//! the unconditional source-address masquerade.

use drv_wifi_radio_api::MacAddr;
use mac_nat::MacNatTable;
use zerocopy::FromBytes;

use crate::frame::{
    self, ArpPacket, DhcpHeader, Ipv4Header, UdpHeader, DHCP_CLIENT_PORT,
    DHCP_FLAG_BROADCAST, DHCP_SERVER_PORT, ETHERTYPE_ARP, ETHERTYPE_IPV4,
    IP_PROTO_UDP, MIN_ARP_FRAME_LEN, MIN_IPV4_FRAME_LEN,
};

/// Rewrites a frame from a non-primary client for transmission upstream.
///
/// - IPv4: learns (source IP, source MAC). If the frame is a client-to-
///   server DHCP message, additionally sets the broadcast flag and zeroes
///   the UDP checksum: the server would otherwise unicast its reply to the
///   client's real `chaddr`, which the radio's receive filter on the station
///   interface would drop (the station's MAC is the cloned primary's, not
///   this client's). Zeroing the checksum is legal for IPv4 UDP and saves
///   recomputing it after the flags edit.
/// - ARP: learns (sender IP, sender MAC), then replaces the sender hardware
///   address with the cloned MAC.
/// - Always: replaces the Ethernet source with the cloned MAC.
pub fn upstream<const N: usize>(
    frame: &mut [u8],
    nat: &mut MacNatTable<N>,
    cloned: MacAddr,
) {
    let len = frame.len();
    let Some((eth, body)) = frame::ethernet_mut(frame) else {
        return;
    };

    match eth.ethertype.get() {
        ETHERTYPE_IPV4 if len >= MIN_IPV4_FRAME_LEN => {
            if let Ok((ip, rest)) = Ipv4Header::mut_from_prefix(&mut *body) {
                nat.learn(ip.src, eth.src);

                if ip.protocol == IP_PROTO_UDP {
                    let opts = ip.header_len().saturating_sub(20);
                    fix_dhcp_request(rest.get_mut(opts..).unwrap_or(&mut []));
                }
            }
        }
        ETHERTYPE_ARP if len >= MIN_ARP_FRAME_LEN => {
            if let Ok((arp, _)) = ArpPacket::mut_from_prefix(&mut *body) {
                nat.learn(arp.spa, arp.sha);
                arp.sha = cloned;
            }
        }
        _ => {}
    }

    eth.src = cloned;
}

/// If `udp_bytes` holds a DHCP client-to-server message, asks the server to
/// broadcast its reply and invalidates the now-stale UDP checksum.
fn fix_dhcp_request(udp_bytes: &mut [u8]) {
    let Ok((udp, payload)) = UdpHeader::mut_from_prefix(udp_bytes) else {
        return;
    };
    if udp.src_port.get() != DHCP_CLIENT_PORT
        || udp.dst_port.get() != DHCP_SERVER_PORT
    {
        return;
    }
    let Ok((dhcp, _)) = DhcpHeader::mut_from_prefix(payload) else {
        return;
    };
    dhcp.flags.set(dhcp.flags.get() | DHCP_FLAG_BROADCAST);
    udp.checksum.set(0);
}

/// Rewrites a unicast frame received from upstream so it reaches the client
/// it is actually for.
///
/// The caller only invokes this when more than one client is associated; a
/// lone (primary) client receives its frames unmodified. A destination that
/// maps back to the cloned client itself is also left alone -- its frames
/// already carry the right address.
pub fn downstream<const N: usize>(
    frame: &mut [u8],
    nat: &MacNatTable<N>,
    cloned: MacAddr,
) {
    let len = frame.len();
    let Some((eth, body)) = frame::ethernet_mut(frame) else {
        return;
    };

    match eth.ethertype.get() {
        ETHERTYPE_IPV4 if len >= MIN_IPV4_FRAME_LEN => {
            if let Ok((ip, _)) = Ipv4Header::ref_from_prefix(&*body) {
                if let Some(real) = nat.lookup_by_ip(ip.dst) {
                    if real != cloned {
                        eth.dst = real;
                    }
                }
            }
        }
        ETHERTYPE_ARP if len >= MIN_ARP_FRAME_LEN => {
            if let Ok((arp, _)) = ArpPacket::mut_from_prefix(&mut *body) {
                if let Some(real) = nat.lookup_by_ip(arp.tpa) {
                    if real != cloned {
                        eth.dst = real;
                        arp.tha = real;
                    }
                }
            }
        }
        _ => {}
    }
}
