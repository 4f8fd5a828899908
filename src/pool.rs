//! Fixed-block memory pool (component 4.C), split into a control pool
//! (small, frequent allocations: pings, pongs, close frames) and a data
//! pool (larger, less frequent: outgoing text/binary frames).
//!
//! The original pairs each allocation with a runtime "already freed" check
//! so a double free is merely detected rather than impossible. Rust can do
//! better: `PoolHandle` owns its slot and is consumed by value on free, so
//! calling `free` twice on the same handle doesn't compile — there's no
//! second handle to call it with.

use crate::error::WebSocketError;

/// An owned slot in a `Pool`. Holds no `Clone`/`Copy` impl on purpose: the
/// only way to get rid of one is to hand it to `Pool::free`, which consumes
/// it, so a double free is a type error rather than a runtime condition.
pub struct PoolHandle {
    index: usize,
    kind: BlockKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Control,
    Data,
}

struct Block {
    buf: Vec<u8>,
    len: usize,
    in_use: bool,
}

/// A single fixed-block-size free list.
struct BlockPool {
    block_size: usize,
    blocks: Vec<Block>,
    free: Vec<usize>,
}

impl BlockPool {
    fn new(block_size: usize, count: usize) -> Self {
        let blocks = (0..count)
            .map(|_| Block { buf: vec![0u8; block_size], len: 0, in_use: false })
            .collect::<Vec<_>>();
        let free = (0..count).rev().collect();
        BlockPool { block_size, blocks, free }
    }

    fn alloc(&mut self, len: usize) -> Option<usize> {
        if len > self.block_size {
            return None;
        }
        let index = self.free.pop()?;
        let block = &mut self.blocks[index];
        block.len = len;
        block.in_use = true;
        Some(index)
    }

    fn free(&mut self, index: usize) {
        let block = &mut self.blocks[index];
        debug_assert!(block.in_use, "pool block freed while not in use");
        block.in_use = false;
        block.len = 0;
        self.free.push(index);
    }
}

/// Two-pool allocator: small control-frame payloads come from a pool of
/// small fixed blocks, larger data-frame payloads from a pool of large
/// fixed blocks, so a flood of pings can't starve an in-flight data send
/// and vice versa.
pub struct Pool {
    control: BlockPool,
    data: BlockPool,
}

impl Pool {
    pub fn new(control_block_size: usize, control_count: usize, data_block_size: usize, data_count: usize) -> Self {
        Pool {
            control: BlockPool::new(control_block_size, control_count),
            data: BlockPool::new(data_block_size, data_count),
        }
    }

    /// Allocates a control-pool block (pings, pongs, close frames — always
    /// small and bounded by `CONTROL_PAYLOAD_MAX`).
    pub fn alloc_control(&mut self, payload: &[u8]) -> Result<PoolHandle, WebSocketError> {
        let index = self.control.alloc(payload.len()).ok_or(WebSocketError::OutOfMemory)?;
        self.control.blocks[index].buf[..payload.len()].copy_from_slice(payload);
        Ok(PoolHandle { index, kind: BlockKind::Control })
    }

    /// Allocates a data-pool block (outgoing text/binary frame payloads).
    pub fn alloc_data(&mut self, payload: &[u8]) -> Result<PoolHandle, WebSocketError> {
        let index = self.data.alloc(payload.len()).ok_or(WebSocketError::OutOfMemory)?;
        self.data.blocks[index].buf[..payload.len()].copy_from_slice(payload);
        Ok(PoolHandle { index, kind: BlockKind::Data })
    }

    pub fn payload(&self, handle: &PoolHandle) -> &[u8] {
        let block = match handle.kind {
            BlockKind::Control => &self.control.blocks[handle.index],
            BlockKind::Data => &self.data.blocks[handle.index],
        };
        &block.buf[..block.len]
    }

    /// Returns the handle's block to its pool's free list. Takes `handle`
    /// by value, so the caller no longer has anything to free a second
    /// time with.
    pub fn free(&mut self, handle: PoolHandle) {
        match handle.kind {
            BlockKind::Control => self.control.free(handle.index),
            BlockKind::Data => self.data.free(handle.index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_and_reads_back_payload() {
        let mut pool = Pool::new(128, 4, 4096, 4);
        let handle = pool.alloc_control(b"ping").unwrap();
        assert_eq!(pool.payload(&handle), b"ping");
        pool.free(handle);
    }

    #[test]
    fn exhausted_pool_reports_out_of_memory() {
        let mut pool = Pool::new(128, 1, 4096, 1);
        let first = pool.alloc_control(b"a").unwrap();
        let err = pool.alloc_control(b"b").unwrap_err();
        assert!(matches!(err, WebSocketError::OutOfMemory));
        pool.free(first);
        assert!(pool.alloc_control(b"c").is_ok());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut pool = Pool::new(8, 2, 4096, 2);
        let err = pool.alloc_control(&[0u8; 9]).unwrap_err();
        assert!(matches!(err, WebSocketError::OutOfMemory));
    }

    #[test]
    fn control_and_data_pools_are_independent() {
        let mut pool = Pool::new(8, 1, 4096, 1);
        let _control = pool.alloc_control(b"x").unwrap();
        // The control pool is full, but the data pool is untouched.
        assert!(pool.alloc_data(b"still room").is_ok());
    }
}
