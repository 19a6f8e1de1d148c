//! Deterministic first-fit heap
//!
//! Design summary:
//! - Contiguous arena covered by a doubly-linked chain of blocks,
//!   each an embedded header followed by its payload.
//! - First-fit allocation with block splitting, coalescing of
//!   adjacent free blocks on every free.
//! - A magic word in every header detects corruption and double
//!   frees.
//! - Statistics charge a block's full footprint (header + payload)
//!   to whichever side of the free/allocated divide it sits on, so
//!   `total == free + allocated` holds after any operation.
//!
//! The global kernel heap wraps a [`Heap`] in a critical section;
//! none of the operations block.

use core::ptr::{self, NonNull};

use crate::config::{HEAP_ALIGNMENT, HEAP_MAGIC, HEAP_MIN_BLOCK, KERNEL_HEAP_SIZE};
use crate::critical::{critical_section, CriticalSection, CsCell};

/// Per-block metadata embedded in the arena, immediately before the
/// payload it describes.
#[repr(C)]
struct BlockHeader {
    /// Payload size in bytes (header excluded)
    size: usize,
    /// Free/allocated flag
    free: bool,
    /// Next block in address order
    next: *mut BlockHeader,
    /// Previous block in address order
    prev: *mut BlockHeader,
    /// Corruption detection word
    magic: u32,
}

/// Header footprint, padded so payloads stay aligned
const HEADER_SIZE: usize = align_up(core::mem::size_of::<BlockHeader>(), HEAP_ALIGNMENT);

/// Heap statistics, accumulated across operations
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapStats {
    /// Total arena size in bytes
    pub total_bytes: usize,
    /// Bytes currently on the free side (headers included)
    pub free_bytes: usize,
    /// Bytes currently allocated (headers included)
    pub allocated_bytes: usize,
    /// High-water mark of `allocated_bytes`
    pub peak_allocated: usize,
    /// Number of successful allocations
    pub num_allocations: usize,
    /// Number of successful frees
    pub num_frees: usize,
    /// Number of blocks in the chain
    pub num_blocks: usize,
    /// Payload size of the largest free block
    pub largest_free: usize,
}

/// First-fit heap over a caller-provided arena
pub struct Heap {
    start: *mut u8,
    end: *mut u8,
    first: *mut BlockHeader,
    stats: HeapStats,
}

// Raw pointers confine the heap to one context at a time; the global
// instance is only reached through the critical section.
unsafe impl Send for Heap {}

#[inline]
const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

impl Heap {
    /// Create a heap over `buffer..buffer + size`.
    ///
    /// The buffer must be aligned to [`HEAP_ALIGNMENT`] and large
    /// enough for at least one minimal block.
    ///
    /// # Safety
    /// `buffer` must be valid for reads and writes of `size` bytes
    /// for the lifetime of the heap, and not aliased by anything
    /// else.
    pub unsafe fn new(buffer: *mut u8, size: usize) -> Result<Heap, crate::KernelError> {
        if buffer.is_null()
            || (buffer as usize) % HEAP_ALIGNMENT != 0
            || size < HEADER_SIZE + HEAP_MIN_BLOCK
        {
            return Err(crate::KernelError::InvalidParam);
        }

        let first = buffer as *mut BlockHeader;
        unsafe {
            (*first).size = size - HEADER_SIZE;
            (*first).free = true;
            (*first).next = ptr::null_mut();
            (*first).prev = ptr::null_mut();
            (*first).magic = HEAP_MAGIC;
        }

        Ok(Heap {
            start: buffer,
            end: unsafe { buffer.add(size) },
            first,
            stats: HeapStats {
                total_bytes: size,
                free_bytes: size,
                allocated_bytes: 0,
                peak_allocated: 0,
                num_allocations: 0,
                num_frees: 0,
                num_blocks: 1,
                largest_free: size - HEADER_SIZE,
            },
        })
    }

    #[inline]
    fn payload(block: *mut BlockHeader) -> *mut u8 {
        (block as *mut u8).wrapping_add(HEADER_SIZE)
    }

    #[inline]
    fn header_of(ptr: *mut u8) -> *mut BlockHeader {
        ptr.wrapping_sub(HEADER_SIZE) as *mut BlockHeader
    }

    #[inline]
    fn footprint(block: *mut BlockHeader) -> usize {
        HEADER_SIZE + unsafe { (*block).size }
    }

    /// Validate a header: bounds and magic word.
    fn validate(&self, block: *mut BlockHeader) -> bool {
        let addr = block as *mut u8;
        if addr < self.start || addr >= self.end {
            return false;
        }
        unsafe { (*block).magic == HEAP_MAGIC }
    }

    /// Allocate `size` bytes, rounded up to the heap alignment.
    ///
    /// Returns `None` when no suitable block exists.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let size = align_up(size, HEAP_ALIGNMENT);

        let block = self.find_free(size)?;
        self.split(block, size);

        unsafe { (*block).free = false };
        let footprint = Self::footprint(block);
        self.stats.free_bytes -= footprint;
        self.stats.allocated_bytes += footprint;
        self.stats.num_allocations += 1;
        if self.stats.allocated_bytes > self.stats.peak_allocated {
            self.stats.peak_allocated = self.stats.allocated_bytes;
        }

        NonNull::new(Self::payload(block))
    }

    /// Allocate zero-initialized storage for `count` items of `size`
    /// bytes each.
    pub fn calloc(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let total = count.checked_mul(size)?;
        let ptr = self.alloc(total)?;
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, total) };
        Some(ptr)
    }

    /// Return a block to the heap.
    ///
    /// An invalid or corrupted pointer is logged and ignored, as is a
    /// double free.
    pub fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        let block = Self::header_of(ptr);
        if !self.validate(block) {
            crate::klog!(error, "heap: corrupted or foreign block at {=usize}", ptr as usize);
            return;
        }
        if unsafe { (*block).free } {
            crate::klog!(warn, "heap: double free at {=usize}", ptr as usize);
            return;
        }

        let footprint = Self::footprint(block);
        unsafe { (*block).free = true };
        self.stats.num_frees += 1;
        self.stats.allocated_bytes -= footprint;
        self.stats.free_bytes += footprint;

        self.coalesce(block);
    }

    /// Resize an allocation.
    ///
    /// `realloc(null, n)` behaves as `alloc(n)`; `realloc(p, 0)`
    /// frees `p` and returns `None`. The same pointer is returned
    /// when the existing payload already fits.
    pub fn realloc(&mut self, ptr: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
        let Some(ptr) = NonNull::new(ptr) else {
            return self.alloc(new_size);
        };
        if new_size == 0 {
            self.free(ptr.as_ptr());
            return None;
        }

        let block = Self::header_of(ptr.as_ptr());
        if !self.validate(block) {
            crate::klog!(error, "heap: realloc of invalid block at {=usize}", ptr.as_ptr() as usize);
            return None;
        }

        let old_size = unsafe { (*block).size };
        if align_up(new_size, HEAP_ALIGNMENT) <= old_size {
            return Some(ptr);
        }

        let new_ptr = self.alloc(new_size)?;
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size.min(new_size));
        }
        self.free(ptr.as_ptr());
        Some(new_ptr)
    }

    /// Snapshot of the statistics, with the largest-free field
    /// recomputed from the chain.
    pub fn stats(&self) -> HeapStats {
        let mut stats = self.stats;
        stats.largest_free = self.largest_free();
        stats
    }

    /// Payload size of the largest free block.
    pub fn largest_free(&self) -> usize {
        let mut largest = 0;
        let mut cur = self.first;
        while !cur.is_null() {
            unsafe {
                if (*cur).free && (*cur).size > largest {
                    largest = (*cur).size;
                }
                cur = (*cur).next;
            }
        }
        largest
    }

    /// Walk the whole chain checking magic words, linkage, and
    /// arena coverage.
    pub fn check_integrity(&self) -> bool {
        let mut cur = self.first;
        let mut blocks = 0usize;
        let mut prev: *mut BlockHeader = ptr::null_mut();

        while !cur.is_null() {
            if !self.validate(cur) {
                return false;
            }
            unsafe {
                if (*cur).prev != prev {
                    return false;
                }
                // Blocks must tile the arena with no gaps
                let block_end = (cur as *mut u8).add(Self::footprint(cur));
                match NonNull::new((*cur).next) {
                    Some(next) => {
                        if next.as_ptr() as *mut u8 != block_end {
                            return false;
                        }
                    }
                    None => {
                        if block_end != self.end {
                            return false;
                        }
                    }
                }
                blocks += 1;
                prev = cur;
                cur = (*cur).next;
            }
        }

        blocks == self.stats.num_blocks
    }

    /// Full pass coalescing every free-free adjacency.
    pub fn defragment(&mut self) {
        let mut cur = self.first;
        while !cur.is_null() {
            unsafe {
                if (*cur).free {
                    self.merge_with_next(cur);
                }
                cur = (*cur).next;
            }
        }
    }

    fn find_free(&self, size: usize) -> Option<*mut BlockHeader> {
        let mut cur = self.first;
        while !cur.is_null() {
            unsafe {
                if (*cur).free && (*cur).size >= size {
                    return Some(cur);
                }
                cur = (*cur).next;
            }
        }
        None
    }

    /// Split `block` so it holds exactly `size` payload bytes, when
    /// the remainder is still a useful block.
    fn split(&mut self, block: *mut BlockHeader, size: usize) {
        let old_size = unsafe { (*block).size };
        if old_size < size + HEADER_SIZE + HEAP_MIN_BLOCK {
            return;
        }

        let rest = (block as *mut u8).wrapping_add(HEADER_SIZE + size) as *mut BlockHeader;
        unsafe {
            (*rest).size = old_size - size - HEADER_SIZE;
            (*rest).free = true;
            (*rest).next = (*block).next;
            (*rest).prev = block;
            (*rest).magic = HEAP_MAGIC;

            if let Some(next) = NonNull::new((*block).next) {
                (*next.as_ptr()).prev = rest;
            }
            (*block).next = rest;
            (*block).size = size;
        }
        self.stats.num_blocks += 1;
    }

    /// Absorb free successors of `block` while they exist.
    fn merge_with_next(&mut self, block: *mut BlockHeader) {
        unsafe {
            while let Some(next) = NonNull::new((*block).next) {
                let next = next.as_ptr();
                if !(*next).free {
                    break;
                }
                (*block).size += HEADER_SIZE + (*next).size;
                (*block).next = (*next).next;
                if let Some(after) = NonNull::new((*next).next) {
                    (*after.as_ptr()).prev = block;
                }
                self.stats.num_blocks -= 1;
            }
        }
    }

    /// Coalesce `block` with its free neighbors on both sides.
    fn coalesce(&mut self, block: *mut BlockHeader) {
        self.merge_with_next(block);
        unsafe {
            if let Some(prev) = NonNull::new((*block).prev) {
                if (*prev.as_ptr()).free {
                    self.merge_with_next(prev.as_ptr());
                }
            }
        }
    }
}

// ============ Global kernel heap ============

/// Backing storage for the kernel heap; u64 elements keep the arena
/// on the heap alignment
static mut HEAP_ARENA: [u64; KERNEL_HEAP_SIZE / 8] = [0; KERNEL_HEAP_SIZE / 8];

/// The kernel heap; `None` until `kernel::init` runs
static KERNEL_HEAP: CsCell<Option<Heap>> = CsCell::new(None);

/// (Re)initialize the kernel heap over the static arena.
pub(crate) fn init_kernel_heap(cs: &CriticalSection) -> crate::KernelResult<()> {
    let heap = unsafe { Heap::new(ptr::addr_of_mut!(HEAP_ARENA) as *mut u8, KERNEL_HEAP_SIZE)? };
    *KERNEL_HEAP.get(cs) = Some(heap);
    Ok(())
}

fn with_heap<R>(f: impl FnOnce(&mut Heap) -> R, default: R) -> R {
    critical_section(|cs| match KERNEL_HEAP.get(cs).as_mut() {
        Some(heap) => f(heap),
        None => default,
    })
}

/// Allocate from the kernel heap. Returns `None` until the kernel is
/// initialized or when memory is exhausted.
pub fn alloc(size: usize) -> Option<NonNull<u8>> {
    with_heap(|h| h.alloc(size), None)
}

/// Allocate zeroed storage from the kernel heap.
pub fn calloc(count: usize, size: usize) -> Option<NonNull<u8>> {
    with_heap(|h| h.calloc(count, size), None)
}

/// Return a block to the kernel heap.
pub fn free(ptr: *mut u8) {
    with_heap(|h| h.free(ptr), ())
}

/// Resize a kernel heap allocation.
pub fn realloc(ptr: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
    with_heap(|h| h.realloc(ptr, new_size), None)
}

/// Kernel heap statistics.
pub fn stats() -> HeapStats {
    with_heap(|h| h.stats(), HeapStats::default())
}

/// Verify the kernel heap chain.
pub fn check_integrity() -> bool {
    with_heap(|h| h.check_integrity(), false)
}

/// Coalesce every free-free adjacency in the kernel heap.
pub fn defragment() {
    with_heap(|h| h.defragment(), ())
}

/// Payload size of the largest free block in the kernel heap.
pub fn largest_free() -> usize {
    with_heap(|h| h.largest_free(), 0)
}
