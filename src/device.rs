//! Device table (C3, spec §4.3).
//!
//! Tracks which of up to [`MAX_DEVICES`](crate::config::MAX_DEVICES) remote
//! devices are on-line, their geometry, and which of their blocks are
//! allocated. The allocation bitmap is a flat `sectors * blocks` bitset
//! rather than the source's row-major array, per the Design Notes.

use crate::codec::{BlockOp, Opcode, RegisterFrame};
use crate::config::MAX_DEVICES;
use crate::error::VfsResult;
use crate::transport::TransportClient;

/// A flat bitset over `sectors * blocks` positions, addressed as
/// `sector * blocks + block`.
#[derive(Debug, Clone)]
pub struct Bitset {
    words: Vec<u64>,
    len: usize,
}

impl Bitset {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(64)],
            len,
        }
    }

    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        (self.words[index / 64] >> (index % 64)) & 1 == 1
    }

    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.len);
        self.words[index / 64] |= 1u64 << (index % 64);
    }

    /// Index of the first unset bit, if any.
    pub fn first_unset(&self) -> Option<usize> {
        (0..self.len).find(|&i| !self.get(i))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// One of up to 16 remote storage devices.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub online: bool,
    pub sectors: u16,
    pub blocks: u16,
    allocated: Bitset,
}

impl DeviceDescriptor {
    fn new(sectors: u16, blocks: u16) -> Self {
        Self {
            online: true,
            sectors,
            blocks,
            allocated: Bitset::new(sectors as usize * blocks as usize),
        }
    }

    fn index_of(&self, sector: u16, block: u16) -> usize {
        sector as usize * self.blocks as usize + block as usize
    }

    pub fn is_allocated(&self, sector: u16, block: u16) -> bool {
        self.allocated.get(self.index_of(sector, block))
    }

    fn mark_used(&mut self, sector: u16, block: u16) {
        let index = self.index_of(sector, block);
        self.allocated.set(index);
    }

    /// First free (sector, block) in sector-major / block-minor order.
    fn first_free(&self) -> Option<(u16, u16)> {
        let index = self.allocated.first_unset()?;
        let sector = (index / self.blocks as usize) as u16;
        let block = (index % self.blocks as usize) as u16;
        Some((sector, block))
    }
}

/// Tracks up to [`MAX_DEVICES`] devices, indexed by device id.
#[derive(Debug)]
pub struct DeviceTable {
    devices: Vec<Option<DeviceDescriptor>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self {
            devices: (0..MAX_DEVICES).map(|_| None).collect(),
        }
    }

    /// Records device `id` as present with the given geometry, replacing
    /// any prior state. Called once per device during `init_all`.
    pub fn init_device(&mut self, id: u8, sectors: u16, blocks: u16) {
        self.devices[id as usize] = Some(DeviceDescriptor::new(sectors, blocks));
    }

    pub fn get(&self, id: u8) -> Option<&DeviceDescriptor> {
        self.devices.get(id as usize)?.as_ref()
    }

    /// Scan devices in id order; within a device, sector-major /
    /// block-minor for the first free slot. Does **not** mark the bit —
    /// the caller marks it only after a confirmed write (§9 item 3).
    pub fn allocate_block(&self) -> Option<(u8, u16, u16)> {
        for (id, slot) in self.devices.iter().enumerate() {
            if let Some(device) = slot {
                if device.online {
                    if let Some((sector, block)) = device.first_free() {
                        return Some((id as u8, sector, block));
                    }
                }
            }
        }
        None
    }

    pub fn mark_used(&mut self, device: u8, sector: u16, block: u16) {
        if let Some(Some(d)) = self.devices.get_mut(device as usize) {
            d.mark_used(sector, block);
        }
    }

    /// Release all per-device allocation state.
    pub fn teardown(&mut self) {
        for slot in self.devices.iter_mut() {
            *slot = None;
        }
    }

    /// Probe the controller for present devices, then init each one and
    /// record its geometry. Called once, by `FileLayer::open`'s
    /// first-ever-call path.
    pub fn init_all(&mut self, transport: &mut TransportClient) -> VfsResult<()> {
        let probe = RegisterFrame {
            b0: 0,
            b1: 0,
            c0: Opcode::DevProbe as u8,
            c1: 0,
            c2: 0,
            d0: 0,
            d1: 0,
        };
        let (response, _) = transport.request(probe, None)?;
        let present_mask = response.d0;

        for id in 0..MAX_DEVICES as u8 {
            if present_mask & (1 << id) == 0 {
                continue;
            }
            let init = RegisterFrame {
                b0: 0,
                b1: 0,
                c0: Opcode::DevInit as u8,
                c1: id,
                c2: 0,
                d0: 0,
                d1: 0,
            };
            let (response, _) = transport.request(init, None)?;
            let sectors = response.d0;
            let blocks = response.d1;
            self.init_device(id, sectors, blocks);
        }
        Ok(())
    }
}

/// Build a BLOCK_XFER request frame.
pub fn block_xfer_frame(device: u8, sector: u16, block: u16, op: BlockOp) -> RegisterFrame {
    RegisterFrame {
        b0: 0,
        b1: 0,
        c0: Opcode::BlockXfer as u8,
        c1: device,
        c2: op as u8,
        d0: block,
        d1: sector,
    }
}
