// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface between the repeater core and its surroundings.
//!
//! The repeater core is written against the traits in this crate so that it
//! stays independent of any particular radio driver and host IP stack: the
//! platform glue implements [`RadioControl`] and [`HostStack`] over the real
//! driver, and the test suite implements them with scripted fakes. The
//! address newtypes here are byte-exact wire representations, so they can be
//! laid directly over received frames.

#![cfg_attr(not(test), no_std)]

pub mod config;

use core::fmt;

use hubpack::SerializedSize;
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Upper bound on simultaneously associated downstream clients. This is a
/// radio firmware limit, not ours; the authoritative list lives in the
/// driver.
pub const MAX_AP_CLIENTS: usize = 8;

/// A 48-bit IEEE 802 hardware address, stored as it appears on the wire.
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
    Serialize,
    Deserialize,
    SerializedSize,
)]
#[repr(transparent)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const ZERO: Self = Self([0; 6]);
    pub const BROADCAST: Self = Self([0xff; 6]);

    /// True for group (multicast and broadcast) addresses, which is bit 0 of
    /// the first octet on the wire.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 1 != 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// An IPv4 address in network byte order, stored as it appears on the wire.
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
    Serialize,
    Deserialize,
    SerializedSize,
)]
#[repr(transparent)]
pub struct Ipv4Addr(pub [u8; 4]);

impl Ipv4Addr {
    pub const ZERO: Self = Self([0; 4]);

    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self([a, b, c, d])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 4]
    }

    /// True for 169.254.0.0/16, the self-assigned range used as a placeholder
    /// while an interface has no real address.
    pub fn is_link_local(&self) -> bool {
        self.0[0] == 169 && self.0[1] == 254
    }

    /// The address as a host-order integer, for subnet arithmetic.
    pub fn bits(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits.to_be_bytes())
    }
}

impl fmt::Debug for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.0;
        write!(f, "{}.{}.{}.{}", a[0], a[1], a[2], a[3])
    }
}

/// A complete IPv4 interface configuration.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub struct Ipv4Config {
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

/// The radio's two interfaces.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub enum Iface {
    /// Infrastructure-mode interface that downstream clients associate to.
    Ap,
    /// Station-mode interface associated to the upstream router.
    Sta,
}

/// The association target latched after the first successful upstream
/// association, used to pin reconnections onto the same AP and channel so
/// they skip the scan.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AssocPin {
    pub bssid: MacAddr,
    pub channel: u8,
}

/// Events the radio driver delivers to the core, translated from its native
/// event representation by the platform glue.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RadioEvent {
    StaStart,
    StaConnected { bssid: MacAddr, channel: u8 },
    StaDisconnected { reason: u16 },
    ApClientJoin { mac: MacAddr, aid: u16 },
    ApClientLeave { mac: MacAddr, aid: u16 },
}

/// Things the radio driver can refuse to do.
#[derive(
    Copy,
    Clone,
    Debug,
    FromPrimitive,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    SerializedSize,
)]
pub enum RadioError {
    SetMacFailed = 1,
    ConnectFailed,
    DisconnectFailed,
    ConfigFailed,
}

/// Radio power-save modes the core switches between.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PowerSave {
    /// No power save; required while frames are being forwarded, since modem
    /// sleep adds latency the bridged clients would notice.
    Off,
    /// Minimum modem power save, for when the repeater is just a station.
    MinModem,
}

/// Control operations on the radio driver.
///
/// Methods take `&self` because the driver handle is shared between the
/// event thread, the worker, and the per-interface receive threads;
/// implementations do their own internal locking (the real driver's C API
/// is thread-safe, and the test fakes use interior mutability).
pub trait RadioControl {
    fn sta_mac(&self) -> MacAddr;
    fn ap_mac(&self) -> MacAddr;
    fn set_sta_mac(&self, mac: MacAddr) -> Result<(), RadioError>;

    fn connect(&self) -> Result<(), RadioError>;
    fn disconnect(&self) -> Result<(), RadioError>;

    /// Pins the station association to a specific BSSID and channel
    /// (skipping the scan), or un-pins it to allow a full scan.
    fn pin_association(&self, pin: Option<AssocPin>) -> Result<(), RadioError>;

    /// Queues a frame for transmission on `iface`. The driver copies the
    /// frame; the caller keeps ownership of the buffer. Transmission is
    /// best-effort, matching the medium.
    fn transmit(&self, iface: Iface, frame: &[u8]);

    /// Copies the driver's authoritative list of associated downstream
    /// clients into `out`.
    fn ap_clients(&self, out: &mut heapless::Vec<MacAddr, MAX_AP_CLIENTS>);

    fn set_power_save(&self, mode: PowerSave);

    /// Blocks until the station reports connected, or `timeout_ms` elapses.
    /// Returns whether the event arrived. Only the worker calls this.
    fn wait_sta_connected(&self, timeout_ms: u32) -> bool;

    /// Blocks until the station reports disconnected, or `timeout_ms`
    /// elapses. Returns whether the event arrived. Only the worker calls
    /// this.
    fn wait_sta_disconnected(&self, timeout_ms: u32) -> bool;

    /// Blocks the calling thread. Only the worker calls this.
    fn sleep_ms(&self, ms: u32);
}

/// Control operations on the host IP stack.
pub trait HostStack {
    fn configure_ipv4(&self, iface: Iface, cfg: Ipv4Config);
    fn start_dhcp_client(&self, iface: Iface);
    fn stop_dhcp_client(&self, iface: Iface);
    fn start_dhcp_server(&self, iface: Iface);
    fn stop_dhcp_server(&self, iface: Iface);
}

/// A received frame, owned by the core until consumed.
///
/// The driver hands the core a buffer and a companion release handle; the
/// pair is modeled as a move-only value with exactly two consuming
/// operations, so the type system enforces that every buffer is either
/// handed to the host stack or freed -- once, and not both. Transmitting the
/// frame on the peer interface (via [`RadioControl::transmit`]) copies and
/// does not consume.
pub trait FrameBuffer {
    fn bytes(&self) -> &[u8];
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Hands the frame to the host IP stack's input path for `iface`,
    /// transferring ownership of the underlying buffer to the stack.
    fn deliver(self, iface: Iface);

    /// Returns the buffer to the driver's pool.
    fn release(self);
}

/// Coarse repeater state, as reported to external consumers.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub enum RepeaterState {
    Idle,
    MacChanging,
    Bridging,
    MacRestoring,
}

/// Read-only status view consumed by the HTTP configuration server.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub struct RepeaterStatus {
    pub state: RepeaterState,
    pub mac_cloned: bool,
    pub client_count: u8,
    pub sta_addr: Ipv4Addr,
    pub forwarding: bool,
}
