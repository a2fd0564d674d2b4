// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bridging state machine.
//!
//! Radio events arrive here on the driver's event thread. Handlers never
//! block: they flip flags, stage work for the tick, or hand back a
//! [`WorkerRequest`] for the platform to run on the worker thread. The
//! heavyweight transitions (anything that changes the station MAC) live in
//! [`crate::worker`].

use drv_wifi_radio_api::{
    AssocPin, HostStack, Iface, Ipv4Config, MacAddr, PowerSave, RadioControl,
    RadioEvent,
};
use ringbuf::ringbuf_entry_root;

use crate::worker::WorkerRequest;
use crate::{Repeater, Trace, RECONNECT_DELAY_MS};

use core::sync::atomic::Ordering;

/// Where the repeater is in its life cycle. Each variant carries exactly the
/// data that is meaningful in that state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BridgeState {
    /// Station runs with its factory MAC and its own DHCP client; no
    /// forwarding. No usable downstream clients.
    Idle,
    /// The worker is cloning `target` onto the station interface.
    MacChanging { target: MacAddr },
    /// Station impersonates `primary`; forwarding is allowed.
    Bridging { primary: MacAddr },
    /// The worker is reverting to the factory MAC.
    MacRestoring,
}

impl<R: RadioControl, H: HostStack> Repeater<R, H> {
    /// Feeds one radio event into the state machine. Returns a request for
    /// the worker thread, if the event calls for a MAC change.
    pub fn handle_radio_event(
        &self,
        event: RadioEvent,
        now_ms: u64,
    ) -> Option<WorkerRequest> {
        match event {
            RadioEvent::StaStart => {
                if !self.flags.reconnect_suppressed.load(Ordering::Relaxed) {
                    if let Err(e) = self.radio.connect() {
                        ringbuf_entry_root!(Trace::RadioErr(e));
                    }
                }
                None
            }

            RadioEvent::StaConnected { bssid, channel } => {
                self.flags.sta_connected.store(true, Ordering::Relaxed);
                {
                    let mut inner = self.inner.lock();
                    if inner.anchor.is_none() {
                        // First successful association: latch the upstream
                        // AP so post-clone reconnects skip the scan and
                        // can't wander to another BSS.
                        inner.anchor = Some(AssocPin { bssid, channel });
                        ringbuf_entry_root!(Trace::AnchorLatched { channel });
                    }
                    inner.reconnect_at = None;
                }
                self.start_forwarding_if_ready();
                None
            }

            RadioEvent::StaDisconnected { .. } => {
                self.flags.sta_connected.store(false, Ordering::Relaxed);
                self.stop_forwarding();
                if !self.flags.reconnect_suppressed.load(Ordering::Relaxed) {
                    // The worker isn't driving this disconnect; get back on
                    // the air shortly.
                    self.inner.lock().reconnect_at =
                        Some(now_ms + RECONNECT_DELAY_MS);
                }
                None
            }

            RadioEvent::ApClientJoin { mac, .. } => {
                ringbuf_entry_root!(Trace::ClientJoined(mac));
                self.refresh_clients();
                let mut inner = self.inner.lock();
                match inner.state {
                    BridgeState::Idle => {
                        inner.state = BridgeState::MacChanging { target: mac };
                        Some(WorkerRequest::Clone { target: mac })
                    }
                    // Any additional client while bridging is handled
                    // entirely by the MAC-NAT table.
                    _ => None,
                }
            }

            RadioEvent::ApClientLeave { mac, .. } => {
                ringbuf_entry_root!(Trace::ClientLeft(mac));
                let clients = self.refresh_clients();
                let req = {
                    let mut inner = self.inner.lock();
                    match inner.state {
                        BridgeState::Bridging { primary }
                            if primary == mac =>
                        {
                            // The identity we're wearing just left.
                            if let Some(&next) =
                                clients.iter().find(|&&c| c != mac)
                            {
                                inner.state =
                                    BridgeState::MacChanging { target: next };
                                Some(WorkerRequest::Clone { target: next })
                            } else {
                                inner.state = BridgeState::MacRestoring;
                                Some(WorkerRequest::Restore)
                            }
                        }
                        _ => None,
                    }
                };
                if req.is_some() {
                    // We just left `Bridging`; forwarding may not outlive
                    // it, even briefly.
                    self.stop_forwarding();
                }
                req
            }
        }
    }

    /// Periodic housekeeping, called from the low-priority status thread.
    pub fn handle_tick(&self, now_ms: u64) {
        // Apply AP interface configuration staged by the sniffer.
        let staged = self.inner.lock().pending_ap_cfg.take();
        if let Some(cfg) = staged {
            self.host.configure_ipv4(Iface::Ap, cfg);
            self.host.stop_dhcp_server(Iface::Ap);
            self.set_mgmt_ip(cfg.addr);
            ringbuf_entry_root!(Trace::ApAddrApplied(cfg.addr));
        }

        // Fire a due auto-reconnect.
        let due = {
            let mut inner = self.inner.lock();
            match inner.reconnect_at {
                Some(at) if at <= now_ms => {
                    inner.reconnect_at = None;
                    true
                }
                _ => false,
            }
        };
        if due && !self.flags.reconnect_suppressed.load(Ordering::Relaxed) {
            ringbuf_entry_root!(Trace::Reconnecting);
            if let Err(e) = self.radio.connect() {
                ringbuf_entry_root!(Trace::RadioErr(e));
            }
        }
    }

    /// Called when the host stack reports a (real) address on the station
    /// interface: mirror it onto the AP interface so the configuration
    /// endpoint answers at the station's address too. Placeholder artifacts
    /// (zero, link-local) are ignored.
    pub fn handle_sta_got_ip(&self, cfg: Ipv4Config) {
        if cfg.addr.is_zero() || cfg.addr.is_link_local() {
            return;
        }
        let mirror = {
            let inner = self.inner.lock();
            matches!(
                inner.state,
                BridgeState::Idle | BridgeState::Bridging { .. }
            )
        };
        if mirror {
            self.host.configure_ipv4(Iface::Ap, cfg);
            self.host.stop_dhcp_server(Iface::Ap);
            self.set_mgmt_ip(cfg.addr);
            ringbuf_entry_root!(Trace::StaAddrMirrored(cfg.addr));
        }
    }

    /// Starts forwarding if -- and only if -- the station is associated
    /// under a cloned identity with the state machine settled in
    /// `Bridging`. Called from both the STA-CONNECTED handler and the clone
    /// worker's epilogue, since either may be the one that completes the
    /// picture.
    pub(crate) fn start_forwarding_if_ready(&self) {
        let in_bridging =
            matches!(self.inner.lock().state, BridgeState::Bridging { .. });
        if in_bridging
            && self.flags.mac_cloned.load(Ordering::Relaxed)
            && self.flags.sta_connected.load(Ordering::Relaxed)
            && !self.flags.forwarding.swap(true, Ordering::Relaxed)
        {
            self.radio.set_power_save(PowerSave::Off);
            ringbuf_entry_root!(Trace::ForwardingOn);
        }
    }

    /// Stops forwarding. Safe to call redundantly; used by the worker before
    /// any MAC transition and by the disconnect handler.
    pub(crate) fn stop_forwarding(&self) {
        if self.flags.forwarding.swap(false, Ordering::Relaxed) {
            self.radio.set_power_save(PowerSave::MinModem);
            ringbuf_entry_root!(Trace::ForwardingOff);
        }
    }
}
