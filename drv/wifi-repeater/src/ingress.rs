// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-interface receive paths.
//!
//! These run on the radio driver's receive threads, one per interface, and
//! replace the default protocol-stack ingress. They are the hot path:
//! nothing here blocks or allocates, and the only locks taken are short
//! spinlock critical sections on the MAC-NAT table and the shared state.
//!
//! Every buffer that comes in leaves through exactly one of the two
//! terminal operations -- delivered to the host IP stack or released back
//! to the driver. Forwarding out the peer interface copies at the driver
//! layer and is not a terminal operation.

use drv_wifi_radio_api::{
    FrameBuffer, HostStack, Iface, MacAddr, RadioControl,
};
use ringbuf::ringbuf_entry_root;
use zerocopy::FromBytes;

use crate::frame::{self, ArpPacket, ARP_OPER_REQUEST, ETHERTYPE_ARP};
use crate::{rewrite, sniff, Repeater, Trace};

use core::sync::atomic::Ordering;

impl<R: RadioControl, H: HostStack> Repeater<R, H> {
    /// Receive path for the station interface: frames from the upstream
    /// network.
    pub fn on_sta_rx<B: FrameBuffer>(&self, mut buf: B) {
        if buf.bytes().len() < frame::ETH_HDR_LEN {
            buf.release();
            return;
        }

        if !self.flags.forwarding.load(Ordering::Relaxed) {
            // Not bridging: act like the default ingress.
            let dst = frame::dst_mac(buf.bytes());
            if dst.is_multicast() || dst == self.sta_identity() {
                buf.deliver(Iface::Sta);
            } else {
                buf.release();
            }
            return;
        }

        // While bridging, the station's DHCP client is stopped and the
        // leases going past belong to downstream clients; read them. The
        // pre-check rejects ~99.9% of frames on length or ports alone.
        if frame::is_dhcp_reply(buf.bytes()) {
            self.sniff_dhcp_ack(buf.bytes());
        }

        let multicast = frame::dst_mac(buf.bytes()).is_multicast();
        if !multicast && self.client_count() > 1 {
            let cloned = self.cloned_mac();
            let nat = self.nat.lock();
            rewrite::downstream(buf.bytes_mut(), &nat, cloned);
        }

        // Everything from upstream goes out over the AP side; the radio
        // drops frames for clients that aren't associated.
        self.radio.transmit(Iface::Ap, buf.bytes());

        // The repeater itself still wants broadcasts and its own unicast.
        let dst = frame::dst_mac(buf.bytes());
        if multicast {
            if self.multicast_delivery_allowed(buf.bytes()) {
                buf.deliver(Iface::Sta);
            } else {
                buf.release();
            }
        } else if self.sta_unicast_for_us(buf.bytes(), dst) {
            buf.deliver(Iface::Sta);
        } else {
            buf.release();
        }
    }

    /// Decides whether a unicast frame from upstream is management traffic
    /// for the repeater itself. The cloned identity is *shared* with the
    /// primary client, so a destination MAC match alone is not enough: an
    /// IPv4 frame must also carry the repeater's management address, or it
    /// is the primary's traffic and belongs on the AP side only. Non-IPv4
    /// frames to our MAC (ARP replies and the like) are always ours to look
    /// at.
    fn sta_unicast_for_us(&self, bytes: &[u8], dst: MacAddr) -> bool {
        if dst == self.original_sta_mac {
            return true;
        }
        if dst != self.cloned_mac() {
            return false;
        }
        match frame::ipv4_dst(bytes) {
            Some(ip) => {
                ip.bits() == self.flags.mgmt_ip.load(Ordering::Relaxed)
            }
            None => true,
        }
    }

    /// Receive path for the AP interface: frames from downstream clients.
    pub fn on_ap_rx<B: FrameBuffer>(&self, mut buf: B) {
        if buf.bytes().len() < frame::ETH_HDR_LEN {
            buf.release();
            return;
        }

        if !self.flags.forwarding.load(Ordering::Relaxed) {
            let dst = frame::dst_mac(buf.bytes());
            if dst.is_multicast() || dst == self.ap_mac {
                buf.deliver(Iface::Ap);
            } else {
                buf.release();
            }
            return;
        }

        // A non-primary client's frames need their identity folded into the
        // cloned one before they can go upstream. The primary's frames
        // already carry the right source.
        let src = frame::src_mac(buf.bytes());
        if self.client_count() > 1
            && !src.is_multicast()
            && src != self.cloned_mac()
        {
            let cloned = self.cloned_mac();
            let mut nat = self.nat.lock();
            rewrite::upstream(buf.bytes_mut(), &mut nat, cloned);
        }

        let sta_up = self.flags.sta_connected.load(Ordering::Relaxed);
        let dst = frame::dst_mac(buf.bytes());
        if dst.is_multicast() {
            // Broadcasts go both ways: upstream so ARP and discovery work
            // across the bridge, and into our own stack so the repeater
            // remains reachable.
            if sta_up {
                self.radio.transmit(Iface::Sta, buf.bytes());
            }
            if self.multicast_delivery_allowed(buf.bytes()) {
                buf.deliver(Iface::Ap);
            } else {
                buf.release();
            }
        } else if dst == self.ap_mac {
            // Management traffic for the configuration server.
            buf.deliver(Iface::Ap);
        } else {
            if sta_up {
                self.radio.transmit(Iface::Sta, buf.bytes());
            }
            buf.release();
        }
    }

    /// The optional broadcast-filter mode: when on, the only non-unicast
    /// frames worth waking the host stack for are ARP requests probing the
    /// repeater's own management address. Everything else is forwarded at
    /// L2 only.
    fn multicast_delivery_allowed(&self, bytes: &[u8]) -> bool {
        if !self.config.ap_broadcast_filter {
            return true;
        }
        let Some((eth, body)) = frame::ethernet(bytes) else {
            return false;
        };
        if eth.ethertype.get() != ETHERTYPE_ARP {
            return false;
        }
        let Ok((arp, _)) = ArpPacket::ref_from_prefix(body) else {
            return false;
        };
        arp.oper.get() == ARP_OPER_REQUEST
            && arp.tpa.bits() == self.flags.mgmt_ip.load(Ordering::Relaxed)
    }

    /// Feeds one pre-qualified DHCP reply to the sniffer and stages the AP
    /// address derivation on the first ACK of the session.
    fn sniff_dhcp_ack(&self, bytes: &[u8]) {
        let Some(lease) = sniff::parse_ack(bytes) else {
            return;
        };
        self.nat.lock().learn(lease.client_ip, lease.client_mac);
        ringbuf_entry_root!(Trace::LeaseSniffed {
            client: lease.client_ip
        });

        let mut inner = self.inner.lock();
        if !inner.ap_cfg_latched {
            inner.ap_cfg_latched = true;
            let addr = sniff::derive_ap_addr(
                lease.client_ip,
                lease.subnet_mask,
                lease.router,
            );
            inner.pending_ap_cfg = Some(drv_wifi_radio_api::Ipv4Config {
                addr,
                netmask: lease.subnet_mask,
                gateway: lease.router,
            });
            ringbuf_entry_root!(Trace::ApAddrStaged(addr));
        }
    }
}
