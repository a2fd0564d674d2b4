// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scripted fakes standing in for the radio driver and the host IP stack,
//! plus builders for the handful of frame shapes the tests inject.

// Each test binary uses its own subset of this module.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use drv_wifi_radio_api::config::RepeaterConfig;
use drv_wifi_radio_api::{
    AssocPin, FrameBuffer, HostStack, Iface, Ipv4Addr, Ipv4Config, MacAddr,
    PowerSave, RadioControl, RadioError, RadioEvent,
};
use drv_wifi_repeater::Repeater;

pub const ORIGINAL_STA: MacAddr = MacAddr([0x24, 0x0a, 0xc4, 0x00, 0x00, 0x01]);
pub const AP_MAC: MacAddr = MacAddr([0x24, 0x0a, 0xc4, 0x00, 0x00, 0x02]);
pub const BSSID: MacAddr = MacAddr([0x50, 0xff, 0x20, 0x11, 0x22, 0x33]);
pub const CLIENT_A: MacAddr = MacAddr([0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0x01]);
pub const CLIENT_B: MacAddr = MacAddr([0xbb, 0xbb, 0xbb, 0xbb, 0xbb, 0x02]);
pub const CLIENT_C: MacAddr = MacAddr([0xcc, 0xcc, 0xcc, 0xcc, 0xcc, 0x03]);

pub struct RadioState {
    pub sta_mac: MacAddr,
    pub sta_mac_history: Vec<MacAddr>,
    pub set_mac_fails: bool,
    pub clients: Vec<MacAddr>,
    pub connect_calls: u32,
    pub disconnect_calls: u32,
    /// Scripted result for `wait_sta_connected`.
    pub connect_succeeds: bool,
    pub pin_history: Vec<Option<AssocPin>>,
    pub power_modes: Vec<PowerSave>,
    pub transmitted: Vec<(Iface, Vec<u8>)>,
    pub slept_ms: u64,
}

impl Default for RadioState {
    fn default() -> Self {
        Self {
            sta_mac: ORIGINAL_STA,
            sta_mac_history: Vec::new(),
            set_mac_fails: false,
            clients: Vec::new(),
            connect_calls: 0,
            disconnect_calls: 0,
            connect_succeeds: true,
            pin_history: Vec::new(),
            power_modes: Vec::new(),
            transmitted: Vec::new(),
            slept_ms: 0,
        }
    }
}

/// Cheaply clonable handle onto one shared radio state, so the test keeps a
/// copy for scripting and inspection while the repeater owns another.
#[derive(Clone, Default)]
pub struct FakeRadio {
    pub state: Arc<Mutex<RadioState>>,
    /// While set, `wait_sta_disconnected` spins, keeping its caller (and
    /// the worker gate) occupied.
    pub hold_disconnect: Arc<AtomicBool>,
}

impl FakeRadio {
    pub fn lock(&self) -> std::sync::MutexGuard<'_, RadioState> {
        self.state.lock().unwrap()
    }

    pub fn tx_to(&self, iface: Iface) -> Vec<Vec<u8>> {
        self.lock()
            .transmitted
            .iter()
            .filter(|(i, _)| *i == iface)
            .map(|(_, f)| f.clone())
            .collect()
    }
}

impl RadioControl for FakeRadio {
    fn sta_mac(&self) -> MacAddr {
        self.lock().sta_mac
    }

    fn ap_mac(&self) -> MacAddr {
        AP_MAC
    }

    fn set_sta_mac(&self, mac: MacAddr) -> Result<(), RadioError> {
        let mut s = self.lock();
        if s.set_mac_fails && mac != ORIGINAL_STA {
            return Err(RadioError::SetMacFailed);
        }
        s.sta_mac = mac;
        s.sta_mac_history.push(mac);
        Ok(())
    }

    fn connect(&self) -> Result<(), RadioError> {
        self.lock().connect_calls += 1;
        Ok(())
    }

    fn disconnect(&self) -> Result<(), RadioError> {
        self.lock().disconnect_calls += 1;
        Ok(())
    }

    fn pin_association(&self, pin: Option<AssocPin>) -> Result<(), RadioError> {
        self.lock().pin_history.push(pin);
        Ok(())
    }

    fn transmit(&self, iface: Iface, frame: &[u8]) {
        self.lock().transmitted.push((iface, frame.to_vec()));
    }

    fn ap_clients(
        &self,
        out: &mut heapless::Vec<MacAddr, { drv_wifi_radio_api::MAX_AP_CLIENTS }>,
    ) {
        out.clear();
        for c in &self.lock().clients {
            out.push(*c).unwrap();
        }
    }

    fn set_power_save(&self, mode: PowerSave) {
        self.lock().power_modes.push(mode);
    }

    fn wait_sta_connected(&self, _timeout_ms: u32) -> bool {
        self.lock().connect_succeeds
    }

    fn wait_sta_disconnected(&self, _timeout_ms: u32) -> bool {
        while self.hold_disconnect.load(Ordering::Relaxed) {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        true
    }

    fn sleep_ms(&self, ms: u32) {
        // Simulated time only.
        self.lock().slept_ms += u64::from(ms);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOp {
    Configure(Iface, Ipv4Config),
    DhcpClientStart(Iface),
    DhcpClientStop(Iface),
    DhcpServerStart(Iface),
    DhcpServerStop(Iface),
}

#[derive(Clone, Default)]
pub struct FakeStack {
    pub ops: Arc<Mutex<Vec<StackOp>>>,
}

impl FakeStack {
    pub fn ops(&self) -> Vec<StackOp> {
        self.ops.lock().unwrap().clone()
    }

    fn push(&self, op: StackOp) {
        self.ops.lock().unwrap().push(op);
    }

    /// The most recent IPv4 configuration applied to `iface`.
    pub fn last_config(&self, iface: Iface) -> Option<Ipv4Config> {
        self.ops()
            .iter()
            .rev()
            .find_map(|op| match op {
                StackOp::Configure(i, cfg) if *i == iface => Some(*cfg),
                _ => None,
            })
    }

    /// Replays the op log to find the current DHCP server state on `iface`.
    pub fn dhcp_server_on(&self, iface: Iface) -> bool {
        self.ops()
            .iter()
            .rev()
            .find_map(|op| match op {
                StackOp::DhcpServerStart(i) if *i == iface => Some(true),
                StackOp::DhcpServerStop(i) if *i == iface => Some(false),
                _ => None,
            })
            .unwrap_or(false)
    }

    /// Replays the op log to find the current DHCP client state on `iface`.
    pub fn dhcp_client_on(&self, iface: Iface) -> bool {
        self.ops()
            .iter()
            .rev()
            .find_map(|op| match op {
                StackOp::DhcpClientStart(i) if *i == iface => Some(true),
                StackOp::DhcpClientStop(i) if *i == iface => Some(false),
                _ => None,
            })
            .unwrap_or(false)
    }
}

impl HostStack for FakeStack {
    fn configure_ipv4(&self, iface: Iface, cfg: Ipv4Config) {
        self.push(StackOp::Configure(iface, cfg));
    }

    fn start_dhcp_client(&self, iface: Iface) {
        self.push(StackOp::DhcpClientStart(iface));
    }

    fn stop_dhcp_client(&self, iface: Iface) {
        self.push(StackOp::DhcpClientStop(iface));
    }

    fn start_dhcp_server(&self, iface: Iface) {
        self.push(StackOp::DhcpServerStart(iface));
    }

    fn stop_dhcp_server(&self, iface: Iface) {
        self.push(StackOp::DhcpServerStop(iface));
    }
}

/// What became of an injected frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    Delivered(Iface),
    Released,
}

/// A frame buffer whose fate the test can observe after the callback
/// consumed it.
pub struct FakeBuf {
    data: Vec<u8>,
    fate: Arc<Mutex<Option<Fate>>>,
}

impl FakeBuf {
    pub fn new(data: Vec<u8>) -> (Self, Arc<Mutex<Option<Fate>>>) {
        let fate = Arc::new(Mutex::new(None));
        (
            Self {
                data,
                fate: fate.clone(),
            },
            fate,
        )
    }
}

impl FrameBuffer for FakeBuf {
    fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn deliver(self, iface: Iface) {
        *self.fate.lock().unwrap() = Some(Fate::Delivered(iface));
    }

    fn release(self) {
        *self.fate.lock().unwrap() = Some(Fate::Released);
    }
}

pub fn fate_of(cell: &Arc<Mutex<Option<Fate>>>) -> Fate {
    cell.lock().unwrap().expect("callback leaked the buffer")
}

// --- frame builders ------------------------------------------------------

/// A minimal IPv4 frame (TCP payload, so it never looks like DHCP).
pub fn ipv4_frame(
    dst: MacAddr,
    src: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
) -> Vec<u8> {
    let mut f = vec![0u8; 64];
    f[..6].copy_from_slice(&dst.0);
    f[6..12].copy_from_slice(&src.0);
    f[12] = 0x08;
    f[13] = 0x00;
    f[14] = 0x45;
    f[23] = 6;
    f[26..30].copy_from_slice(&src_ip.0);
    f[30..34].copy_from_slice(&dst_ip.0);
    f
}

/// A broadcast ARP request from `sha`/`spa` probing `tpa`.
pub fn arp_request(sha: MacAddr, spa: Ipv4Addr, tpa: Ipv4Addr) -> Vec<u8> {
    let mut f = vec![0u8; 42];
    f[..6].copy_from_slice(&MacAddr::BROADCAST.0);
    f[6..12].copy_from_slice(&sha.0);
    f[12] = 0x08;
    f[13] = 0x06;
    f[14..22].copy_from_slice(&[0, 1, 8, 0, 6, 4, 0, 1]);
    f[22..28].copy_from_slice(&sha.0);
    f[28..32].copy_from_slice(&spa.0);
    // tha unknown in a request; stays zero.
    f[38..42].copy_from_slice(&tpa.0);
    f
}

/// A unicast ARP frame (e.g. a downstream reply coming back from upstream).
pub fn arp_to(
    dst: MacAddr,
    sha: MacAddr,
    spa: Ipv4Addr,
    tha: MacAddr,
    tpa: Ipv4Addr,
) -> Vec<u8> {
    let mut f = vec![0u8; 42];
    f[..6].copy_from_slice(&dst.0);
    f[6..12].copy_from_slice(&sha.0);
    f[12] = 0x08;
    f[13] = 0x06;
    f[14..22].copy_from_slice(&[0, 1, 8, 0, 6, 4, 0, 2]);
    f[22..28].copy_from_slice(&sha.0);
    f[28..32].copy_from_slice(&spa.0);
    f[32..38].copy_from_slice(&tha.0);
    f[38..42].copy_from_slice(&tpa.0);
    f
}

/// A server-to-client DHCP ACK, as the upstream server would send it.
pub fn dhcp_ack(
    yiaddr: Ipv4Addr,
    mask: Ipv4Addr,
    router: Ipv4Addr,
    chaddr: MacAddr,
) -> Vec<u8> {
    let mut f = vec![0u8; 342];
    f[..6].copy_from_slice(&MacAddr::BROADCAST.0);
    f[12] = 0x08;
    f[13] = 0x00;
    f[14] = 0x45;
    f[23] = 17;
    f[34..36].copy_from_slice(&67u16.to_be_bytes());
    f[36..38].copy_from_slice(&68u16.to_be_bytes());

    let dhcp = 42;
    f[dhcp] = 2; // BOOTREPLY
    f[dhcp + 16..dhcp + 20].copy_from_slice(&yiaddr.0);
    f[dhcp + 28..dhcp + 34].copy_from_slice(&chaddr.0);
    f[dhcp + 236..dhcp + 240].copy_from_slice(&[0x63, 0x82, 0x53, 0x63]);

    let mut o = dhcp + 240;
    for (tag, data) in [
        (53u8, &[5u8][..]),
        (1u8, &mask.0[..]),
        (3u8, &router.0[..]),
    ] {
        f[o] = tag;
        f[o + 1] = data.len() as u8;
        f[o + 2..o + 2 + data.len()].copy_from_slice(data);
        o += 2 + data.len();
    }
    f[o] = 0xff;
    f
}

/// A client-to-server DHCP request with a non-zero UDP checksum and the
/// broadcast flag clear.
pub fn dhcp_request(src: MacAddr) -> Vec<u8> {
    let mut f = vec![0u8; 342];
    f[..6].copy_from_slice(&MacAddr::BROADCAST.0);
    f[6..12].copy_from_slice(&src.0);
    f[12] = 0x08;
    f[13] = 0x00;
    f[14] = 0x45;
    f[23] = 17;
    f[34..36].copy_from_slice(&68u16.to_be_bytes());
    f[36..38].copy_from_slice(&67u16.to_be_bytes());
    f[40..42].copy_from_slice(&0xbeefu16.to_be_bytes());
    f[42] = 1; // BOOTREQUEST
    f[42 + 236..42 + 240].copy_from_slice(&[0x63, 0x82, 0x53, 0x63]);
    f
}

// --- fixtures ------------------------------------------------------------

pub fn repeater() -> (Repeater<FakeRadio, FakeStack>, FakeRadio, FakeStack) {
    repeater_with_config(RepeaterConfig::DEFAULT)
}

pub fn repeater_with_config(
    config: RepeaterConfig,
) -> (Repeater<FakeRadio, FakeStack>, FakeRadio, FakeStack) {
    let radio = FakeRadio::default();
    let stack = FakeStack::default();
    let rep = Repeater::new(radio.clone(), stack.clone(), config);
    rep.init();
    (rep, radio, stack)
}

/// Simulates the initial upstream association.
pub fn connect_upstream(rep: &Repeater<FakeRadio, FakeStack>) {
    rep.handle_radio_event(RadioEvent::StaStart, 0);
    rep.handle_radio_event(
        RadioEvent::StaConnected {
            bssid: BSSID,
            channel: 6,
        },
        0,
    );
}

/// Associates `mac` downstream and returns whatever the state machine wants
/// run on the worker.
pub fn join(
    rep: &Repeater<FakeRadio, FakeStack>,
    radio: &FakeRadio,
    mac: MacAddr,
) -> Option<drv_wifi_repeater::worker::WorkerRequest> {
    radio.lock().clients.push(mac);
    rep.handle_radio_event(RadioEvent::ApClientJoin { mac, aid: 1 }, 0)
}

/// Disassociates `mac` and returns the resulting worker request, if any.
pub fn leave(
    rep: &Repeater<FakeRadio, FakeStack>,
    radio: &FakeRadio,
    mac: MacAddr,
) -> Option<drv_wifi_repeater::worker::WorkerRequest> {
    radio.lock().clients.retain(|c| *c != mac);
    rep.handle_radio_event(RadioEvent::ApClientLeave { mac, aid: 1 }, 0)
}

/// Drives the repeater from cold start into `Bridging` with `mac` as the
/// primary client.
pub fn bridge_with(
    rep: &Repeater<FakeRadio, FakeStack>,
    radio: &FakeRadio,
    mac: MacAddr,
) {
    connect_upstream(rep);
    let req = join(rep, radio, mac).expect("join should request a clone");
    let followup = rep.run_worker(req);
    assert!(followup.is_none(), "clone should not chain more work");
    // The driver announces the reassociation under the new MAC.
    rep.handle_radio_event(
        RadioEvent::StaConnected {
            bssid: BSSID,
            channel: 6,
        },
        0,
    );
    assert!(rep.forwarding_active(), "bridge should be forwarding");
}
