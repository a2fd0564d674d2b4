// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core of a single-radio layer-2 WiFi repeater.
//!
//! The radio exposes one MAC address per interface and no 4-address mode, so
//! the only way to bridge downstream clients into the upstream network
//! without NAT is to make them share a link-layer identity: the station
//! interface *becomes* the first client by cloning its MAC, and any further
//! clients are folded into that identity by rewriting addresses per frame,
//! keyed off a small IPv4-to-MAC table. DHCP, ARP, and unicast semantics are
//! preserved end to end; every client holds a lease from the upstream
//! server.
//!
//! The moving parts:
//!
//! - [`frame`], [`rewrite`], [`sniff`]: pure frame inspection and in-place
//!   rewriting -- no I/O, no locks, fully unit-tested.
//! - [`ingress`]: the two receive callbacks that replace the default stack
//!   ingress on each interface. Hot path; never blocks, never allocates,
//!   consumes every buffer exactly once.
//! - [`bridge`]: the state machine (`Idle` / `MacChanging` / `Bridging` /
//!   `MacRestoring`) driven by radio events and the periodic tick.
//! - [`worker`]: the disconnect / set-MAC / reconnect sequences. The only
//!   place that blocks; serialized by a gate so at most one MAC change is in
//!   flight system-wide.
//!
//! The platform glue owns the threads. It forwards driver events to
//! [`Repeater::handle_radio_event`] (event thread), runs returned
//! [`worker::WorkerRequest`]s on a dedicated worker thread via
//! [`Repeater::run_worker`], calls [`Repeater::handle_tick`] from a
//! low-priority periodic thread, and wires the driver's receive callbacks to
//! [`Repeater::on_sta_rx`] / [`Repeater::on_ap_rx`].

#![cfg_attr(not(test), no_std)]

pub mod bridge;
pub mod frame;
pub mod ingress;
pub mod rewrite;
pub mod sniff;
pub mod worker;

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use drv_wifi_radio_api::config::RepeaterConfig;
use drv_wifi_radio_api::{
    AssocPin, HostStack, Iface, Ipv4Addr, Ipv4Config, MacAddr, RadioControl,
    RadioError, RepeaterState, RepeaterStatus,
};
use mac_nat::MacNatTable;
use ringbuf::*;

use crate::bridge::BridgeState;

/// MAC-NAT capacity. Eight entries matches the radio's client limit.
pub const MAC_NAT_SLOTS: usize = 8;

/// The AP interface's factory management configuration, in effect whenever
/// no upstream subnet is known.
pub const FACTORY_AP_CFG: Ipv4Config = Ipv4Config {
    addr: Ipv4Addr::new(192, 168, 4, 1),
    netmask: Ipv4Addr::new(255, 255, 255, 0),
    gateway: Ipv4Addr::new(192, 168, 4, 1),
};

/// Placeholder address parked on the station interface while its DHCP client
/// is stopped: the host network layer refuses to bring up an interface with
/// no address at all, and a link-local one stays out of the way of bridged
/// traffic.
const STA_PLACEHOLDER_CFG: Ipv4Config = Ipv4Config {
    addr: Ipv4Addr::new(169, 254, 87, 1),
    netmask: Ipv4Addr::new(255, 255, 0, 0),
    gateway: Ipv4Addr::ZERO,
};

pub(crate) const DISCONNECT_TIMEOUT_MS: u32 = 5_000;
pub(crate) const CONNECT_TIMEOUT_MS: u32 = 15_000;
/// Settle time around driver MAC changes.
pub(crate) const MAC_SETTLE_MS: u32 = 150;
pub(crate) const RECONNECT_DELAY_MS: u64 = 1_000;

#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum Trace {
    None,
    CloneStart(MacAddr),
    CloneDone(MacAddr),
    CloneSetMacFailed,
    CloneConnectTimeout,
    RestoreStart,
    RestoreDone,
    RestoreConnectTimeout,
    WorkerGateBusy,
    AnchorLatched { channel: u8 },
    ForwardingOn,
    ForwardingOff,
    ClientJoined(MacAddr),
    ClientLeft(MacAddr),
    LeaseSniffed { client: Ipv4Addr },
    ApAddrStaged(Ipv4Addr),
    ApAddrApplied(Ipv4Addr),
    StaAddrMirrored(Ipv4Addr),
    Reconnecting,
    RadioErr(RadioError),
}

ringbuf!(Trace, 64, Trace::None);

/// Hot flags, read by the ingress callbacks without taking any lock. Each is
/// an independent single-word snapshot; the callbacks never need cross-flag
/// atomicity, so relaxed ordering is enough.
pub(crate) struct Flags {
    pub forwarding: AtomicBool,
    pub sta_connected: AtomicBool,
    pub mac_cloned: AtomicBool,
    pub reconnect_suppressed: AtomicBool,
    pub client_count: AtomicU8,
    /// The repeater's own management address, host byte order; consulted by
    /// the broadcast-filter fast path.
    pub mgmt_ip: AtomicU32,
}

impl Flags {
    const fn new() -> Self {
        Self {
            forwarding: AtomicBool::new(false),
            sta_connected: AtomicBool::new(false),
            mac_cloned: AtomicBool::new(false),
            reconnect_suppressed: AtomicBool::new(false),
            client_count: AtomicU8::new(0),
            mgmt_ip: AtomicU32::new(0),
        }
    }
}

/// State shared between the event thread, the worker, and (for the cloned
/// MAC and staged configuration) the ingress callbacks. Critical sections on
/// this lock are a handful of loads and stores; nothing blocks while holding
/// it.
pub(crate) struct Inner {
    pub state: BridgeState,
    /// The client MAC currently presented on the station interface.
    /// Meaningful only while `mac_cloned` is set; parked on the factory MAC
    /// otherwise.
    pub cloned_mac: MacAddr,
    /// Latched on first successful upstream association, kept for the
    /// process lifetime.
    pub anchor: Option<AssocPin>,
    /// Set once the first ACK of a bridging session has produced an AP
    /// address; later ACKs skip the derivation.
    pub ap_cfg_latched: bool,
    /// AP configuration derived by the sniffer, waiting for the tick to
    /// apply it (the ingress path must not call into the host stack).
    pub pending_ap_cfg: Option<Ipv4Config>,
    pub reconnect_at: Option<u64>,
}

/// The repeater core. One of these exists for the life of the process.
pub struct Repeater<R, H> {
    pub(crate) radio: R,
    pub(crate) host: H,
    pub(crate) original_sta_mac: MacAddr,
    pub(crate) ap_mac: MacAddr,
    pub(crate) config: RepeaterConfig,
    pub(crate) flags: Flags,
    pub(crate) nat: spin::Mutex<MacNatTable<MAC_NAT_SLOTS>>,
    pub(crate) inner: spin::Mutex<Inner>,
    /// The worker gate: held for the whole of a clone or restore sequence.
    pub(crate) gate: spin::Mutex<()>,
}

impl<R: RadioControl, H: HostStack> Repeater<R, H> {
    pub fn new(radio: R, host: H, config: RepeaterConfig) -> Self {
        let original_sta_mac = radio.sta_mac();
        let ap_mac = radio.ap_mac();
        Self {
            radio,
            host,
            original_sta_mac,
            ap_mac,
            config,
            flags: Flags::new(),
            nat: spin::Mutex::new(MacNatTable::DEFAULT),
            inner: spin::Mutex::new(Inner {
                state: BridgeState::Idle,
                cloned_mac: original_sta_mac,
                anchor: None,
                ap_cfg_latched: false,
                pending_ap_cfg: None,
                reconnect_at: None,
            }),
            gate: spin::Mutex::new(()),
        }
    }

    /// Brings the interfaces to their boot configuration: factory AP
    /// management network with its DHCP server answering, station running
    /// its own DHCP client, radio in power save.
    pub fn init(&self) {
        self.host.configure_ipv4(Iface::Ap, FACTORY_AP_CFG);
        self.host.start_dhcp_server(Iface::Ap);
        self.host.start_dhcp_client(Iface::Sta);
        self.radio
            .set_power_save(drv_wifi_radio_api::PowerSave::MinModem);
        self.set_mgmt_ip(FACTORY_AP_CFG.addr);
    }

    /// Read-only status view for the configuration server.
    pub fn status(&self) -> RepeaterStatus {
        let state = match self.inner.lock().state {
            BridgeState::Idle => RepeaterState::Idle,
            BridgeState::MacChanging { .. } => RepeaterState::MacChanging,
            BridgeState::Bridging { .. } => RepeaterState::Bridging,
            BridgeState::MacRestoring => RepeaterState::MacRestoring,
        };
        RepeaterStatus {
            state,
            mac_cloned: self.flags.mac_cloned.load(Ordering::Relaxed),
            client_count: self.flags.client_count.load(Ordering::Relaxed),
            sta_addr: Ipv4Addr::from_bits(
                self.flags.mgmt_ip.load(Ordering::Relaxed),
            ),
            forwarding: self.flags.forwarding.load(Ordering::Relaxed),
        }
    }

    pub fn forwarding_active(&self) -> bool {
        self.flags.forwarding.load(Ordering::Relaxed)
    }

    pub fn client_count(&self) -> u8 {
        self.flags.client_count.load(Ordering::Relaxed)
    }

    /// The MAC the station interface is currently supposed to present.
    pub fn sta_identity(&self) -> MacAddr {
        if self.flags.mac_cloned.load(Ordering::Relaxed) {
            self.inner.lock().cloned_mac
        } else {
            self.original_sta_mac
        }
    }

    pub(crate) fn cloned_mac(&self) -> MacAddr {
        self.inner.lock().cloned_mac
    }

    /// Number of live MAC-NAT mappings, for the diagnostics page.
    pub fn mac_nat_len(&self) -> usize {
        self.nat.lock().len()
    }

    pub(crate) fn set_mgmt_ip(&self, addr: Ipv4Addr) {
        self.flags.mgmt_ip.store(addr.bits(), Ordering::Relaxed);
    }

    /// Re-derives the client count from the driver's authoritative list and
    /// returns the list. Duplicate join/leave events therefore can't skew
    /// the count.
    pub(crate) fn refresh_clients(
        &self,
    ) -> heapless::Vec<MacAddr, { drv_wifi_radio_api::MAX_AP_CLIENTS }> {
        let mut clients = heapless::Vec::new();
        self.radio.ap_clients(&mut clients);
        self.flags
            .client_count
            .store(clients.len() as u8, Ordering::Relaxed);
        clients
    }
}
