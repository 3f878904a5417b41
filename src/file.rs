//! File layer (C5, spec §4.5).
//!
//! Translates (handle, offset, length) into block-aligned transport calls,
//! allocates fresh blocks on write-past-EOF, and maintains each open file's
//! block list. This is the only component that touches C1-C4 directly; a
//! correct embedding serializes all calls into it on one thread (§5 — no
//! internal locking here, by design).

use std::net::SocketAddr;
use std::time::Duration;

use crate::cache::{BlockCache, CacheKey};
use crate::codec::{BlockOp, Opcode, RegisterFrame};
use crate::config::{Config, BLOCK_SIZE};
use crate::device::{block_xfer_frame, DeviceTable};
use crate::error::{VfsError, VfsResult};
use crate::transport::TransportClient;

pub type FileHandle = i32;

#[derive(Debug, Clone)]
struct FileDescriptor {
    name: String,
    position: usize,
    size: usize,
    open: bool,
    blocks: Vec<(u8, u16, u16)>,
}

impl FileDescriptor {
    fn block_count(&self) -> usize {
        self.size.div_ceil(BLOCK_SIZE)
    }
}

pub struct FileLayer {
    transport: TransportClient,
    devices: DeviceTable,
    cache: Option<BlockCache>,
    cache_blocks: usize,
    files: Vec<FileDescriptor>,
    next_handle: FileHandle,
    first_open: bool,
}

impl FileLayer {
    pub fn new(config: &Config) -> Self {
        Self::with_addr(config.controller_addr, config.connect_timeout, config.cache_blocks)
    }

    pub fn with_addr(addr: SocketAddr, connect_timeout: Duration, cache_blocks: usize) -> Self {
        Self {
            transport: TransportClient::new(addr, connect_timeout),
            devices: DeviceTable::new(),
            cache: None,
            cache_blocks,
            files: Vec::new(),
            next_handle: 0,
            first_open: true,
        }
    }

    fn descriptor(&self, fh: FileHandle) -> VfsResult<&FileDescriptor> {
        self.files
            .get(usize::try_from(fh).map_err(|_| VfsError::Usage("negative handle".into()))?)
            .filter(|d| d.open)
            .ok_or_else(|| VfsError::Usage(format!("handle {fh} is not open")))
    }

    fn descriptor_mut(&mut self, fh: FileHandle) -> VfsResult<&mut FileDescriptor> {
        let index = usize::try_from(fh).map_err(|_| VfsError::Usage("negative handle".into()))?;
        match self.files.get_mut(index) {
            Some(d) if d.open => Ok(d),
            _ => Err(VfsError::Usage(format!("handle {fh} is not open"))),
        }
    }

    /// Current size of an open file, in bytes.
    pub fn size(&self, fh: FileHandle) -> VfsResult<usize> {
        Ok(self.descriptor(fh)?.size)
    }

    /// Current read/write position of an open file.
    pub fn position(&self, fh: FileHandle) -> VfsResult<usize> {
        Ok(self.descriptor(fh)?.position)
    }

    /// Open `path`. On the very first call ever made, this also powers on
    /// the controller and probes/initializes every present device. Two
    /// opens of the same path are independent, empty descriptors — there
    /// is no name -> existing-file lookup (§9 item 4).
    pub fn open(&mut self, path: &str) -> VfsResult<FileHandle> {
        if self.first_open {
            self.cache = Some(BlockCache::new(self.cache_blocks));
            let power_on = RegisterFrame {
                b0: 0,
                b1: 0,
                c0: Opcode::PowerOn as u8,
                c1: 0,
                c2: 0,
                d0: 0,
                d1: 0,
            };
            self.transport.request(power_on, None)?;
            self.devices.init_all(&mut self.transport)?;
            self.first_open = false;
        }

        let handle = self.next_handle;
        self.files.push(FileDescriptor {
            name: path.to_string(),
            position: 0,
            size: 0,
            open: true,
            blocks: Vec::new(),
        });
        self.next_handle += 1;
        Ok(handle)
    }

    /// Fetch a block's current contents through the cache, falling back to
    /// a transport round trip on miss.
    fn load_block(&mut self, device: u8, sector: u16, block: u16) -> VfsResult<[u8; BLOCK_SIZE]> {
        let key = CacheKey {
            device,
            sector,
            block,
        };
        if let Some(data) = self.cache.as_mut().expect("cache initialized by open").get(key) {
            return Ok(data);
        }
        let frame = block_xfer_frame(device, sector, block, BlockOp::Read);
        let (_, payload) = self.transport.request(frame, None)?;
        let data = payload.ok_or_else(|| {
            VfsError::Protocol("block-xfer read response carried no payload".to_string())
        })?;
        self.cache.as_mut().expect("cache initialized by open").put(key, data);
        Ok(data)
    }

    /// Write a block's full contents through the transport, then refresh
    /// the cache so a subsequent read observes the new bytes without a
    /// round trip.
    fn store_block(
        &mut self,
        device: u8,
        sector: u16,
        block: u16,
        data: [u8; BLOCK_SIZE],
    ) -> VfsResult<()> {
        let frame = block_xfer_frame(device, sector, block, BlockOp::Write);
        self.transport.request(frame, Some(&data))?;
        let key = CacheKey {
            device,
            sector,
            block,
        };
        self.cache.as_mut().expect("cache initialized by open").put(key, data);
        Ok(())
    }

    /// Read up to `buf.len()` bytes starting at the current position,
    /// truncated to the bytes actually available before EOF.
    pub fn read(&mut self, fh: FileHandle, buf: &mut [u8]) -> VfsResult<usize> {
        let (position, size) = {
            let descriptor = self.descriptor(fh)?;
            (descriptor.position, descriptor.size)
        };

        let available = size.saturating_sub(position);
        let to_read = buf.len().min(available);
        if to_read == 0 {
            return Ok(0);
        }

        let mut cursor = position;
        let mut copied = 0usize;
        while copied < to_read {
            let block_index = cursor / BLOCK_SIZE;
            let offset_in_block = cursor % BLOCK_SIZE;
            let take = (BLOCK_SIZE - offset_in_block).min(to_read - copied);

            let (device, sector, block) = *self
                .descriptor(fh)?
                .blocks
                .get(block_index)
                .ok_or_else(|| VfsError::Protocol("read past recorded block list".to_string()))?;

            let data = self.load_block(device, sector, block)?;
            buf[copied..copied + take].copy_from_slice(&data[offset_in_block..offset_in_block + take]);

            copied += take;
            cursor += take;
            self.descriptor_mut(fh)?.position = cursor;
        }

        Ok(copied)
    }

    /// Write `buf` starting at the current position, allocating new
    /// blocks via the device table whenever the write extends past the
    /// current size. Not atomic across chunks: a failure partway through
    /// leaves earlier chunks written (§4.5.3).
    pub fn write(&mut self, fh: FileHandle, buf: &[u8]) -> VfsResult<usize> {
        self.descriptor(fh)?; // validates handle is open

        let mut cursor = self.descriptor(fh)?.position;
        let mut written = 0usize;

        while written < buf.len() {
            let block_index = cursor / BLOCK_SIZE;
            let offset_in_block = cursor % BLOCK_SIZE;
            let take = (BLOCK_SIZE - offset_in_block).min(buf.len() - written);
            let full_block = offset_in_block == 0 && take == BLOCK_SIZE;

            let existing_triple = self.descriptor(fh)?.blocks.get(block_index).copied();

            let (device, sector, block, is_new) = match existing_triple {
                Some((device, sector, block)) => (device, sector, block, false),
                None => {
                    let triple = self
                        .devices
                        .allocate_block()
                        .ok_or(VfsError::Capacity)?;
                    (triple.0, triple.1, triple.2, true)
                }
            };

            let mut data = if full_block || is_new {
                [0u8; BLOCK_SIZE]
            } else {
                self.load_block(device, sector, block)?
            };
            data[offset_in_block..offset_in_block + take]
                .copy_from_slice(&buf[written..written + take]);

            self.store_block(device, sector, block, data)?;

            if is_new {
                self.devices.mark_used(device, sector, block);
                self.descriptor_mut(fh)?.blocks.push((device, sector, block));
            }

            written += take;
            cursor += take;

            let descriptor = self.descriptor_mut(fh)?;
            descriptor.position = cursor;
            if cursor > descriptor.size {
                descriptor.size = cursor;
            }
            debug_assert_eq!(descriptor.blocks.len(), descriptor.block_count());
        }

        Ok(written)
    }

    /// Move the position without touching any block; fails if `off`
    /// exceeds the current size.
    pub fn seek(&mut self, fh: FileHandle, off: usize) -> VfsResult<usize> {
        let descriptor = self.descriptor_mut(fh)?;
        if off > descriptor.size {
            return Err(VfsError::Usage(format!(
                "seek to {off} exceeds size {}",
                descriptor.size
            )));
        }
        descriptor.position = off;
        Ok(off)
    }

    /// Mark a handle closed. Blocks remain allocated; the descriptor is
    /// retained (but `open = false`) and the handle is never reissued.
    pub fn close(&mut self, fh: FileHandle) -> VfsResult<()> {
        let descriptor = self.descriptor_mut(fh)?;
        descriptor.open = false;
        Ok(())
    }

    /// Close every descriptor, release device and cache state, and power
    /// off the controller. Best-effort: memory is released even if the
    /// power-off exchange fails.
    pub fn shutdown(mut self) -> VfsResult<()> {
        for descriptor in self.files.iter_mut() {
            descriptor.open = false;
        }
        self.devices.teardown();

        let power_off = RegisterFrame {
            b0: 0,
            b1: 0,
            c0: Opcode::PowerOff as u8,
            c1: 0,
            c2: 0,
            d0: 0,
            d1: 0,
        };
        let power_off_result = self.transport.request(power_off, None);

        if let Some(cache) = self.cache.take() {
            cache.close();
        }

        self.files.clear();

        if let Err(err) = power_off_result {
            tracing::warn!(error = %err, "power-off exchange failed during shutdown");
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor_for_test(size: usize, blocks: Vec<(u8, u16, u16)>) -> FileDescriptor {
        FileDescriptor {
            name: "test".to_string(),
            position: 0,
            size,
            open: true,
            blocks,
        }
    }

    #[test]
    fn block_count_rounds_up() {
        assert_eq!(descriptor_for_test(0, vec![]).block_count(), 0);
        assert_eq!(descriptor_for_test(1, vec![]).block_count(), 1);
        assert_eq!(descriptor_for_test(256, vec![]).block_count(), 1);
        assert_eq!(descriptor_for_test(257, vec![]).block_count(), 2);
        assert_eq!(descriptor_for_test(600, vec![]).block_count(), 3);
    }
}
