//! Slot transports: the register-level side of a membus interface
//!
//! A [`SlotTransport`] moves one byte range of one port to the device, and
//! samples a full frame of an input port. The coalescing logic lives in the
//! membus driver; a transport only ever sees the dirty span.

use dmxbus_core::{DmxError, Result, SLOTS_PER_UNIVERSE};
use parking_lot::Mutex;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Device-side port access
pub trait SlotTransport: Send + Sync {
    /// Short description for logs
    fn name(&self) -> String;

    /// Number of output ports the device offers
    fn output_ports(&self) -> usize;

    /// Number of input ports the device offers
    fn input_ports(&self) -> usize {
        0
    }

    /// Transfer `data` to slots `offset..offset+data.len()` of an output port
    fn send(&self, port: usize, start_code: u8, offset: usize, data: &[u8]) -> Result<()>;

    /// Read the current frame of an input port
    fn receive(&self, _port: usize, _frame: &mut [u8; SLOTS_PER_UNIVERSE]) -> Result<()> {
        Err(DmxError::Unsupported("receive"))
    }
}

/// One recorded [`MemoryTransport::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub port: usize,
    pub start_code: u8,
    pub offset: usize,
    pub data: Vec<u8>,
}

struct MemoryState {
    outputs: Vec<[u8; SLOTS_PER_UNIVERSE]>,
    inputs: Vec<[u8; SLOTS_PER_UNIVERSE]>,
    transfers: Vec<Transfer>,
}

/// In-memory register file with transfer log and fault injection
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
    failures: AtomicUsize,
}

impl MemoryTransport {
    pub fn new(output_ports: usize, input_ports: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                outputs: vec![[0; SLOTS_PER_UNIVERSE]; output_ports],
                inputs: vec![[0; SLOTS_PER_UNIVERSE]; input_ports],
                transfers: Vec::new(),
            }),
            failures: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` sends fail
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Current device-side content of an output port
    pub fn output(&self, port: usize) -> Option<[u8; SLOTS_PER_UNIVERSE]> {
        self.state.lock().outputs.get(port).copied()
    }

    /// Simulate received data on an input port
    pub fn set_input(&self, port: usize, offset: usize, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let frame = state
            .inputs
            .get_mut(port)
            .ok_or_else(|| DmxError::Backend(format!("no input port {}", port)))?;
        let end = (offset + bytes.len()).min(SLOTS_PER_UNIVERSE);
        if offset < end {
            frame[offset..end].copy_from_slice(&bytes[..end - offset]);
        }
        Ok(())
    }

    /// Drain the transfer log
    pub fn take_transfers(&self) -> Vec<Transfer> {
        std::mem::take(&mut self.state.lock().transfers)
    }
}

impl SlotTransport for MemoryTransport {
    fn name(&self) -> String {
        "memory".to_string()
    }

    fn output_ports(&self) -> usize {
        self.state.lock().outputs.len()
    }

    fn input_ports(&self) -> usize {
        self.state.lock().inputs.len()
    }

    fn send(&self, port: usize, start_code: u8, offset: usize, data: &[u8]) -> Result<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(DmxError::Backend(format!("port {}: handshake timeout", port)));
        }

        let mut state = self.state.lock();
        let frame = state
            .outputs
            .get_mut(port)
            .ok_or_else(|| DmxError::Backend(format!("no output port {}", port)))?;
        if offset + data.len() > SLOTS_PER_UNIVERSE {
            return Err(DmxError::OffsetOutOfRange {
                offset: offset + data.len(),
                limit: SLOTS_PER_UNIVERSE,
            });
        }
        frame[offset..offset + data.len()].copy_from_slice(data);
        state.transfers.push(Transfer {
            port,
            start_code,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn receive(&self, port: usize, frame: &mut [u8; SLOTS_PER_UNIVERSE]) -> Result<()> {
        let state = self.state.lock();
        let input = state
            .inputs
            .get(port)
            .ok_or_else(|| DmxError::Backend(format!("no input port {}", port)))?;
        frame.copy_from_slice(input);
        Ok(())
    }
}

/// Art-Net OpDmx length of the header preceding the slot data
const ARTNET_HEADER_LEN: usize = 18;

/// Art-Net (UDP) output transport, one Art-Net universe per port.
///
/// Art-Net frames always carry the full universe, so the transport keeps the
/// device-side image of every port and sends it whole after merging the span.
pub struct ArtNetTransport {
    socket: UdpSocket,
    target: SocketAddr,
    base_universe: u16,
    ports: Mutex<Vec<ArtNetPort>>,
}

struct ArtNetPort {
    frame: [u8; SLOTS_PER_UNIVERSE],
    sequence: u8,
}

impl ArtNetTransport {
    /// Bind a broadcast-capable socket sending to `target`
    pub fn new(target: &str, base_universe: u16, ports: usize) -> Result<Self> {
        let target: SocketAddr = target
            .parse()
            .map_err(|e| DmxError::Backend(format!("Invalid Art-Net target address: {}", e)))?;
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| DmxError::Backend(e.to_string()))?;
        socket
            .set_broadcast(true)
            .map_err(|e| DmxError::Backend(e.to_string()))?;

        tracing::info!(
            "Art-Net transport: {} ports from universe {} -> {}",
            ports,
            base_universe,
            target
        );

        Ok(Self {
            socket,
            target,
            base_universe,
            ports: Mutex::new(
                (0..ports)
                    .map(|_| ArtNetPort {
                        frame: [0; SLOTS_PER_UNIVERSE],
                        sequence: 0,
                    })
                    .collect(),
            ),
        })
    }

    /// Build an OpDmx packet
    fn build_packet(universe: u16, sequence: u8, slots: &[u8; SLOTS_PER_UNIVERSE]) -> Vec<u8> {
        let mut packet = vec![0u8; ARTNET_HEADER_LEN + SLOTS_PER_UNIVERSE];

        packet[0..8].copy_from_slice(b"Art-Net\0");
        // OpCode OpDmx, little-endian
        packet[8..10].copy_from_slice(&0x5000u16.to_le_bytes());
        // Protocol version 14, big-endian
        packet[10..12].copy_from_slice(&14u16.to_be_bytes());
        packet[12] = sequence;
        packet[13] = 0;
        packet[14..16].copy_from_slice(&universe.to_le_bytes());
        packet[16..18].copy_from_slice(&(SLOTS_PER_UNIVERSE as u16).to_be_bytes());
        packet[ARTNET_HEADER_LEN..].copy_from_slice(slots);

        packet
    }
}

impl SlotTransport for ArtNetTransport {
    fn name(&self) -> String {
        format!("artnet:{}", self.target)
    }

    fn output_ports(&self) -> usize {
        self.ports.lock().len()
    }

    fn send(&self, port: usize, start_code: u8, offset: usize, data: &[u8]) -> Result<()> {
        if start_code != 0 {
            tracing::trace!("Art-Net carries no start code, ignoring {:#04x}", start_code);
        }
        let packet = {
            let mut ports = self.ports.lock();
            let state = ports
                .get_mut(port)
                .ok_or_else(|| DmxError::Backend(format!("no Art-Net port {}", port)))?;
            let end = (offset + data.len()).min(SLOTS_PER_UNIVERSE);
            state.frame[offset..end].copy_from_slice(&data[..end - offset]);
            let universe = self.base_universe.wrapping_add(port as u16);
            let packet = Self::build_packet(universe, state.sequence, &state.frame);
            state.sequence = state.sequence.wrapping_add(1);
            packet
        };

        self.socket
            .send_to(&packet, self.target)
            .map_err(|e| DmxError::Backend(format!("Art-Net send failed: {}", e)))?;
        tracing::trace!("Sent Art-Net DMX packet for port {}", port);
        Ok(())
    }
}
