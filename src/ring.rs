// SPDX-License-Identifier: MIT
//
// The shared-memory MPSC block ring. This core only ever opens a region the
// service created; it reserves blocks off the free stack, writes frame
// payloads into them, and pushes them onto the used stack for the service to
// drain. Both stacks are singly linked lists threaded through each block's
// `next_index`, exactly as the service-side consumer expects — this module
// never implements the consumer side, only the layout and CAS discipline it
// relies on.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::error::{LogSinkError, Result};
use crate::frame::{Frame, FRAME_SIZE};
use crate::platform::OpenRegion;
use crate::shm_name;

const SIGNATURE: [u8; 4] = *b"ALVA";
const BLOCK_MAGIC: u32 = 0x1122_3344;
const HEADER_SIZE: usize = 64;

#[repr(C)]
struct RingHeaderLayout {
    signature: [u8; 4],
    free_stack_head: AtomicI32,
    used_stack_head: AtomicI32,
    block_count: u32,
    payload_size: u32,
    block_stride: u32,
    _reserved: [u8; 40],
}

const _: () = assert!(std::mem::size_of::<RingHeaderLayout>() == HEADER_SIZE);

#[repr(C)]
struct BlockHeader {
    magic: AtomicU32,
    next_index: AtomicI32,
    data_size: AtomicU32,
    overflow_count: AtomicU32,
}

const BLOCK_HEADER_SIZE: usize = std::mem::size_of::<BlockHeader>();

/// A handle to the service-created shared-memory ring, opened (never
/// created) by this process.
pub struct Ring {
    _region: OpenRegion,
    header: *const RingHeaderLayout,
    blocks_base: *mut u8,
    block_count: u32,
    block_stride: u32,
}

unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Opens the region under the global kernel-object name, falling back
    /// to the local variant.
    pub fn open(prefix: &str, service_pid: u32) -> Result<Self> {
        let global = shm_name::global_region_name(prefix, service_pid);
        let local = shm_name::local_region_name(prefix, service_pid);

        let region = match OpenRegion::open(&global) {
            Ok(r) => r,
            Err(_) => OpenRegion::open(&local)
                .map_err(|e| LogSinkError::RingUnavailable(e.to_string()))?,
        };

        if region.size() < HEADER_SIZE {
            return Err(LogSinkError::RingCorrupted("region smaller than header"));
        }

        let header = region.as_ptr() as *const RingHeaderLayout;
        let signature = unsafe { (*header).signature };
        if signature != SIGNATURE {
            return Err(LogSinkError::RingCorrupted("signature mismatch"));
        }

        let block_count = unsafe { (*header).block_count };
        let payload_size = unsafe { (*header).payload_size };
        let block_stride = unsafe { (*header).block_stride };
        if payload_size as usize != FRAME_SIZE {
            return Err(LogSinkError::RingCorrupted("unexpected payload size"));
        }
        let needed = HEADER_SIZE + block_count as usize * block_stride as usize;
        if region.size() < needed {
            return Err(LogSinkError::RingCorrupted("region smaller than header + blocks"));
        }

        let blocks_base = unsafe { region.as_mut_ptr().add(HEADER_SIZE) };

        Ok(Self {
            _region: region,
            header,
            blocks_base,
            block_count,
            block_stride,
        })
    }

    fn header(&self) -> &RingHeaderLayout {
        unsafe { &*self.header }
    }

    fn block_header(&self, index: i32) -> &BlockHeader {
        debug_assert!(index >= 0 && (index as u32) < self.block_count);
        let ptr = unsafe { self.blocks_base.add(index as usize * self.block_stride as usize) };
        unsafe { &*(ptr as *const BlockHeader) }
    }

    fn payload_ptr(&self, index: i32) -> *mut u8 {
        let block_ptr = unsafe { self.blocks_base.add(index as usize * self.block_stride as usize) };
        unsafe { block_ptr.add(BLOCK_HEADER_SIZE) }
    }

    fn push_free(&self, index: i32) {
        loop {
            let head = self.header().free_stack_head.load(Ordering::Acquire);
            self.block_header(index).next_index.store(head, Ordering::Relaxed);
            if self
                .header()
                .free_stack_head
                .compare_exchange(head, index, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Reserves one free block. Returns `Ok(None)` if the free stack is
    /// currently empty — not an error; callers decide whether to spill,
    /// block, or drop. No backoff: a failed CAS retries immediately.
    pub fn begin_writing(&self) -> Result<Option<ReservedBlock<'_>>> {
        loop {
            let head = self.header().free_stack_head.load(Ordering::Acquire);
            if head == -1 {
                return Ok(None);
            }
            let block = self.block_header(head);
            let next = block.next_index.load(Ordering::Relaxed);
            if self
                .header()
                .free_stack_head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let magic = block.magic.load(Ordering::Acquire);
                if magic != BLOCK_MAGIC {
                    return Err(LogSinkError::RingCorrupted("block magic mismatch"));
                }
                block.overflow_count.store(0, Ordering::Relaxed);
                block.next_index.store(-1, Ordering::Relaxed);
                return Ok(Some(ReservedBlock { ring: self, index: head, resolved: false }));
            }
        }
    }

    /// Reserves `count` free blocks for one multi-block message. On
    /// failure to acquire them all, every block reserved so far is returned
    /// to the free stack (each `ReservedBlock`'s drop aborts it).
    pub fn begin_writing_sequence(&self, count: usize) -> Result<Option<Vec<ReservedBlock<'_>>>> {
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            match self.begin_writing()? {
                Some(b) => blocks.push(b),
                None => return Ok(None), // blocks' Drop aborts what was reserved
            }
        }
        Ok(Some(blocks))
    }

    fn commit_single(&self, index: i32, bytes_written: u32, overflow_count: u32) {
        let block = self.block_header(index);
        block.data_size.store(bytes_written, Ordering::Relaxed);
        block.overflow_count.store(overflow_count, Ordering::Relaxed);
        loop {
            let head = self.header().used_stack_head.load(Ordering::Acquire);
            block.next_index.store(head, Ordering::Relaxed);
            if self
                .header()
                .used_stack_head
                .compare_exchange(head, index, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    fn commit_sequence(&self, indices: &[i32], sizes: &[u32], overflow_count: u32) {
        debug_assert_eq!(indices.len(), sizes.len());
        for (i, &idx) in indices.iter().enumerate() {
            self.block_header(idx).data_size.store(sizes[i], Ordering::Relaxed);
            self.block_header(idx).overflow_count.store(0, Ordering::Relaxed);
        }
        // overflow_count is carried on the block that reads first: submission
        // order index 0.
        self.block_header(indices[0]).overflow_count.store(overflow_count, Ordering::Relaxed);

        loop {
            let old_head = self.header().used_stack_head.load(Ordering::Acquire);
            // Link the chain so that, after the consumer steals and reverses
            // it, blocks read back out in submission order: traversal from
            // the new head must be [last .. first, ..old_head].
            self.block_header(indices[0]).next_index.store(old_head, Ordering::Relaxed);
            for w in indices.windows(2) {
                self.block_header(w[1]).next_index.store(w[0], Ordering::Relaxed);
            }
            let new_head = indices[indices.len() - 1];
            if self
                .header()
                .used_stack_head
                .compare_exchange(old_head, new_head, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Encodes `frame` and commits it as a single-block message.
    pub fn write_frame(&self, reserved: ReservedBlock<'_>, frame: &Frame, overflow_count: u32) {
        let encoded = frame.encode();
        self.write_payload(reserved, &encoded, overflow_count);
    }

    fn write_payload(&self, mut reserved: ReservedBlock<'_>, bytes: &[u8; FRAME_SIZE], overflow_count: u32) {
        let ptr = self.payload_ptr(reserved.index);
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, FRAME_SIZE) };
        self.commit_single(reserved.index, FRAME_SIZE as u32, overflow_count);
        reserved.resolved = true;
    }

    /// Encodes and commits a multi-block message sequence (one `Message`
    /// frame followed by its `MessageExtension` frames) as a single atomic
    /// push.
    pub fn write_frame_sequence(&self, mut reserved: Vec<ReservedBlock<'_>>, frames: &[Frame], overflow_count: u32) {
        debug_assert_eq!(reserved.len(), frames.len());
        let mut indices = Vec::with_capacity(reserved.len());
        let mut sizes = Vec::with_capacity(reserved.len());
        for (block, frame) in reserved.iter().zip(frames) {
            let encoded = frame.encode();
            let ptr = self.payload_ptr(block.index);
            unsafe { std::ptr::copy_nonoverlapping(encoded.as_ptr(), ptr, FRAME_SIZE) };
            indices.push(block.index);
            sizes.push(FRAME_SIZE as u32);
        }
        self.commit_sequence(&indices, &sizes, overflow_count);
        for b in reserved.iter_mut() {
            b.resolved = true;
        }
    }
}

/// An exclusively held free block awaiting commit or abort. Dropping without
/// committing returns the block to the free stack.
pub struct ReservedBlock<'a> {
    ring: &'a Ring,
    index: i32,
    resolved: bool,
}

impl<'a> ReservedBlock<'a> {
    pub fn index(&self) -> i32 {
        self.index
    }

    /// Explicitly returns the block to the free stack without committing.
    pub fn abort(mut self) {
        self.ring.push_free(self.index);
        self.resolved = true;
    }
}

impl Drop for ReservedBlock<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.ring.push_free(self.index);
        }
    }
}
