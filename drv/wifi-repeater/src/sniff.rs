// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! DHCP-ACK sniffing.
//!
//! While bridging, the station interface's own DHCP client is stopped -- the
//! leases flowing through belong to the downstream clients. That leaves the
//! repeater without an address of its own in the upstream subnet, which it
//! needs so the configuration page stays reachable. Instead of running a
//! second DHCP exchange (which would confuse the upstream server -- two
//! clients, one MAC), the repeater reads the answers going past: each
//! server-to-client ACK names the subnet, the gateway, and a (client IP,
//! client MAC) pair for the MAC-NAT table, and the first one of a session is
//! used to pick a free-looking management address.
//!
//! The caller has already matched the UDP 67->68 port pattern and the
//! minimum length before `parse_ack` runs.

use drv_wifi_radio_api::{Ipv4Addr, MacAddr};
use zerocopy::FromBytes;

use crate::frame::{
    self, DhcpHeader, DHCP_MAGIC, DHCP_MSG_ACK, DHCP_OPT_END,
    DHCP_OPT_MSG_TYPE, DHCP_OPT_PAD, DHCP_OPT_ROUTER, DHCP_OPT_SUBNET_MASK,
    DHCP_OP_BOOTREPLY,
};

/// What a DHCP ACK tells us.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Lease {
    pub client_ip: Ipv4Addr,
    pub client_mac: MacAddr,
    pub subnet_mask: Ipv4Addr,
    /// Zero if the server sent no router option.
    pub router: Ipv4Addr,
}

/// Parses a pre-qualified server-to-client DHCP frame. Returns the lease if
/// it is an ACK with a usable subnet mask; anything malformed is `None`.
pub fn parse_ack(frame: &[u8]) -> Option<Lease> {
    let (_, _, dhcp_bytes) = frame::udp(frame)?;
    let (dhcp, options) = DhcpHeader::ref_from_prefix(dhcp_bytes).ok()?;

    if dhcp.op != DHCP_OP_BOOTREPLY {
        return None;
    }
    if options.get(..4)? != &DHCP_MAGIC {
        return None;
    }

    let mut msg_type = None;
    let mut mask = None;
    let mut router = None;

    // Walk the options. Each iteration consumes at least one byte, so the
    // frame length bounds the loop.
    let opts = &options[4..];
    let mut i = 0;
    while i < opts.len() {
        match opts[i] {
            DHCP_OPT_PAD => i += 1,
            DHCP_OPT_END => break,
            tag => {
                let len = usize::from(*opts.get(i + 1)?);
                let data = opts.get(i + 2..i + 2 + len)?;
                match tag {
                    DHCP_OPT_MSG_TYPE if len >= 1 => {
                        msg_type = Some(data[0]);
                    }
                    DHCP_OPT_SUBNET_MASK if len >= 4 => {
                        mask = Some(Ipv4Addr([
                            data[0], data[1], data[2], data[3],
                        ]));
                    }
                    // A router list may carry several entries; the first
                    // one is the default gateway.
                    DHCP_OPT_ROUTER if len >= 4 => {
                        router = Some(Ipv4Addr([
                            data[0], data[1], data[2], data[3],
                        ]));
                    }
                    _ => {}
                }
                i += 2 + len;
            }
        }
    }

    if msg_type != Some(DHCP_MSG_ACK) {
        return None;
    }

    Some(Lease {
        client_ip: dhcp.yiaddr,
        client_mac: dhcp.client_mac(),
        subnet_mask: mask?,
        router: router.unwrap_or(Ipv4Addr::ZERO),
    })
}

/// Picks a management address for the AP interface inside the discovered
/// subnet: the highest host address (broadcast minus one), walked downward
/// up to ten times if it lands on the client or the gateway, with the
/// client's neighbors as a last resort.
pub fn derive_ap_addr(
    client: Ipv4Addr,
    mask: Ipv4Addr,
    router: Ipv4Addr,
) -> Ipv4Addr {
    let taken = |a: u32| a == client.bits() || a == router.bits();

    let broadcast = (client.bits() & mask.bits()) | !mask.bits();
    let mut candidate = broadcast.wrapping_sub(1);
    for _ in 0..10 {
        if !taken(candidate) {
            return Ipv4Addr::from_bits(candidate);
        }
        candidate = candidate.wrapping_sub(1);
    }

    let below = client.bits().wrapping_sub(1);
    if !taken(below) {
        return Ipv4Addr::from_bits(below);
    }
    Ipv4Addr::from_bits(client.bits().wrapping_add(1))
}
