// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The MAC-change worker.
//!
//! Changing the station MAC means taking the link down, so the sequences
//! here are the only code in the repeater that blocks: they wait (bounded)
//! for the driver's disconnect and connect events and sleep briefly around
//! the MAC change itself to let the driver settle. A single gate serializes
//! them; whatever happens, at most one MAC change is in flight system-wide,
//! and a failed sequence always leaves the station with a valid MAC --
//! either the target or the factory one, never something in between.
//!
//! The platform runs these on a dedicated worker thread. A request that
//! finds the gate held past its timeout is dropped with a trace entry; the
//! state machine converges off the next join/leave event instead of queuing
//! stale work.

use drv_wifi_radio_api::{HostStack, Iface, MacAddr, RadioControl};
use ringbuf::ringbuf_entry_root;

use crate::bridge::BridgeState;
use crate::{
    Repeater, Trace, CONNECT_TIMEOUT_MS, DISCONNECT_TIMEOUT_MS,
    FACTORY_AP_CFG, MAC_SETTLE_MS, STA_PLACEHOLDER_CFG,
};

use core::sync::atomic::Ordering;

const GATE_TIMEOUT_MS: u32 = 5_000;
const GATE_POLL_MS: u32 = 20;

/// Work the state machine wants done on the worker thread.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WorkerRequest {
    /// Present `target` as the station's MAC and reassociate.
    Clone { target: MacAddr },
    /// Revert to the factory MAC and tear the bridge down.
    Restore,
}

impl<R: RadioControl, H: HostStack> Repeater<R, H> {
    /// Executes one worker request. May hand back a follow-up request (a
    /// restore that finds clients waiting converts itself into a clone);
    /// the platform feeds that back into this method.
    pub fn run_worker(&self, req: WorkerRequest) -> Option<WorkerRequest> {
        // Serialize against any worker still running. If it won't yield in
        // time, drop this request: the state machine is already converging,
        // and the next client event will issue a fresh one.
        let mut waited = 0;
        let _guard = loop {
            if let Some(guard) = self.gate.try_lock() {
                break guard;
            }
            if waited >= GATE_TIMEOUT_MS {
                ringbuf_entry_root!(Trace::WorkerGateBusy);
                return None;
            }
            self.radio.sleep_ms(GATE_POLL_MS);
            waited += GATE_POLL_MS;
        };

        match req {
            WorkerRequest::Clone { target } => self.clone_sequence(target),
            WorkerRequest::Restore => self.restore_sequence(),
        }
    }

    /// Takes the station down, presents `target` as its MAC, and brings it
    /// back up pinned to the anchored upstream AP.
    fn clone_sequence(&self, target: MacAddr) -> Option<WorkerRequest> {
        ringbuf_entry_root!(Trace::CloneStart(target));

        self.stop_forwarding();
        self.flags.reconnect_suppressed.store(true, Ordering::Relaxed);

        if let Err(e) = self.radio.disconnect() {
            ringbuf_entry_root!(Trace::RadioErr(e));
        }
        if !self.radio.wait_sta_disconnected(DISCONNECT_TIMEOUT_MS) {
            // Keep going: set_sta_mac will fail loudly if the link is
            // genuinely still up, and the fallback below handles that.
            ringbuf_entry_root!(Trace::RadioErr(
                drv_wifi_radio_api::RadioError::DisconnectFailed
            ));
        }

        // The station keeps no address while bridging; park a link-local
        // placeholder so the interface stays up.
        self.host.stop_dhcp_client(Iface::Sta);
        self.host.configure_ipv4(Iface::Sta, STA_PLACEHOLDER_CFG);

        self.radio.sleep_ms(MAC_SETTLE_MS);
        if self.radio.set_sta_mac(target).is_err() {
            ringbuf_entry_root!(Trace::CloneSetMacFailed);
            return self.abandon_clone();
        }
        self.radio.sleep_ms(MAC_SETTLE_MS);

        let pin = {
            let mut inner = self.inner.lock();
            inner.cloned_mac = target;
            inner.anchor
        };
        self.flags.mac_cloned.store(true, Ordering::Relaxed);

        // Reassociate to the same AP on the same channel; a full scan here
        // would stretch the outage and might land elsewhere.
        if let Err(e) = self.radio.pin_association(pin) {
            ringbuf_entry_root!(Trace::RadioErr(e));
        }
        self.flags.reconnect_suppressed.store(false, Ordering::Relaxed);
        if let Err(e) = self.radio.connect() {
            ringbuf_entry_root!(Trace::RadioErr(e));
        }

        if self.radio.wait_sta_connected(CONNECT_TIMEOUT_MS) {
            self.inner.lock().state =
                BridgeState::Bridging { primary: target };
            // Downstream leases must come from upstream now.
            self.host.stop_dhcp_server(Iface::Ap);
            self.start_forwarding_if_ready();
            ringbuf_entry_root!(Trace::CloneDone(target));
            None
        } else {
            ringbuf_entry_root!(Trace::CloneConnectTimeout);
            self.flags.reconnect_suppressed.store(true, Ordering::Relaxed);
            if let Err(e) = self.radio.disconnect() {
                ringbuf_entry_root!(Trace::RadioErr(e));
            }
            let _ = self.radio.wait_sta_disconnected(DISCONNECT_TIMEOUT_MS);
            self.abandon_clone()
        }
    }

    /// Common bail-out for a clone that can't complete: back to the factory
    /// MAC, back to a normal station, end in `Idle`.
    fn abandon_clone(&self) -> Option<WorkerRequest> {
        if let Err(e) = self.radio.set_sta_mac(self.original_sta_mac) {
            // The driver refused both the target and the factory MAC; the
            // interface still holds whichever address it last accepted, so
            // the "valid MAC at all times" guarantee stands even here.
            ringbuf_entry_root!(Trace::RadioErr(e));
        }
        self.flags.mac_cloned.store(false, Ordering::Relaxed);
        {
            let mut inner = self.inner.lock();
            inner.cloned_mac = self.original_sta_mac;
            inner.state = BridgeState::Idle;
        }
        if let Err(e) = self.radio.pin_association(None) {
            ringbuf_entry_root!(Trace::RadioErr(e));
        }
        self.host.start_dhcp_client(Iface::Sta);
        self.flags.reconnect_suppressed.store(false, Ordering::Relaxed);
        if let Err(e) = self.radio.connect() {
            ringbuf_entry_root!(Trace::RadioErr(e));
        }
        None
    }

    /// Reverts the station to its factory identity and the AP interface to
    /// the factory management network.
    fn restore_sequence(&self) -> Option<WorkerRequest> {
        ringbuf_entry_root!(Trace::RestoreStart);

        self.stop_forwarding();
        self.flags.reconnect_suppressed.store(true, Ordering::Relaxed);

        if let Err(e) = self.radio.disconnect() {
            ringbuf_entry_root!(Trace::RadioErr(e));
        }
        let _ = self.radio.wait_sta_disconnected(DISCONNECT_TIMEOUT_MS);

        self.radio.sleep_ms(MAC_SETTLE_MS);
        if let Err(e) = self.radio.set_sta_mac(self.original_sta_mac) {
            ringbuf_entry_root!(Trace::RadioErr(e));
        }
        // Clear the cloned identity *before* anything can reconnect, so a
        // connected event during the tail of this sequence cannot start
        // forwarding.
        self.flags.mac_cloned.store(false, Ordering::Relaxed);
        self.inner.lock().cloned_mac = self.original_sta_mac;

        self.host.start_dhcp_client(Iface::Sta);

        // Tear down the bridging session state: learned mappings belong to
        // the upstream subnet we're leaving.
        self.nat.lock().clear();
        {
            let mut inner = self.inner.lock();
            inner.ap_cfg_latched = false;
            inner.pending_ap_cfg = None;
        }
        self.host.configure_ipv4(Iface::Ap, FACTORY_AP_CFG);
        self.host.start_dhcp_server(Iface::Ap);
        self.set_mgmt_ip(FACTORY_AP_CFG.addr);

        // Allow a full scan for the next association. The latched anchor
        // stays around for the next clone.
        if let Err(e) = self.radio.pin_association(None) {
            ringbuf_entry_root!(Trace::RadioErr(e));
        }

        self.inner.lock().state = BridgeState::Idle;
        self.flags.reconnect_suppressed.store(false, Ordering::Relaxed);
        if let Err(e) = self.radio.connect() {
            ringbuf_entry_root!(Trace::RadioErr(e));
        }
        if !self.radio.wait_sta_connected(CONNECT_TIMEOUT_MS) {
            // Not fatal: the periodic auto-reconnect keeps trying from
            // here.
            ringbuf_entry_root!(Trace::RestoreConnectTimeout);
        }
        ringbuf_entry_root!(Trace::RestoreDone);

        // Clients that joined while we were restoring would otherwise sit
        // unbridged until the next join/leave event; hand back a clone for
        // the first of them.
        let clients = self.refresh_clients();
        if let Some(&first) = clients.first() {
            self.inner.lock().state =
                BridgeState::MacChanging { target: first };
            return Some(WorkerRequest::Clone { target: first });
        }
        None
    }
}
