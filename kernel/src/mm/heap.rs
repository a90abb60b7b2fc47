//! Kernel heap
//!
//! A first-fit allocator over a fixed run of kernel pages carved at boot.
//! The heap is a chain of chunks; every chunk begins with one header word
//! encoding `HEADER_BIT | ALLOCATED_BIT | size_in_dwords`, where the size
//! counts the header itself. Allocation walks the chain, splits the first
//! free chunk that fits, and returns the address just past the header.
//!
//! `kfree` is a no-op: kernel objects are long-lived and the leak is
//! explicit policy. A header word without `HEADER_BIT` means the chain
//! was stomped, which is a kernel bug and panics.

use core::ptr::NonNull;

use spin::Mutex;

#[cfg(all(target_arch = "x86", target_os = "none"))]
use super::page_table::PteFlags;
use super::PAGE_SIZE;
use crate::error::{KernelError, KernelResult};

/// Number of kernel pages carved for the heap at boot.
pub const HEAP_PAGES: usize = 4;

/// Marks a word as a chunk header.
const CHUNK_HEADER: u32 = 0x8000_0000;

/// Marks a header's chunk as allocated.
const CHUNK_ALLOCATED: u32 = 0x4000_0000;

/// Chunk size field, in dwords, header included.
const SIZE_MASK: u32 = 0x00FF_FFFF;

/// First-fit chunk allocator over a caller-provided dword run.
pub struct KernelHeap {
    base: *mut u32,
    dwords: usize,
}

// SAFETY: the raw base pointer is owned exclusively by the heap; all
// access goes through &mut self, and the global instance is behind a
// Mutex.
unsafe impl Send for KernelHeap {}

impl KernelHeap {
    /// A heap with no backing memory; every allocation fails.
    pub const fn empty() -> Self {
        Self {
            base: core::ptr::null_mut(),
            dwords: 0,
        }
    }

    /// Take ownership of `dwords` words at `base` and format them as one
    /// free chunk.
    ///
    /// # Safety
    ///
    /// `base` must be a 4-byte aligned region of at least `dwords` words
    /// that outlives the heap and is referenced by nothing else.
    pub unsafe fn init(&mut self, base: *mut u32, dwords: usize) {
        debug_assert!(dwords as u32 <= SIZE_MASK);
        self.base = base;
        self.dwords = dwords;
        // SAFETY: caller guarantees base points at owned writable memory.
        unsafe { base.write(dwords as u32 | CHUNK_HEADER) };
    }

    /// Whether `init` has run.
    pub fn is_initialized(&self) -> bool {
        !self.base.is_null()
    }

    /// Allocate `size` bytes (rounded up to the 4-byte quantum) and
    /// return the address after the chunk header.
    pub fn alloc(&mut self, size: usize) -> KernelResult<NonNull<u8>> {
        if self.base.is_null() {
            return Err(KernelError::OutOfHeap { requested: size });
        }
        // Payload dwords plus the header word.
        let need = (size.div_ceil(4) + 1) as u32;
        if need & !SIZE_MASK != 0 {
            return Err(KernelError::OutOfHeap { requested: size });
        }

        let mut ptr = self.base;
        // SAFETY: `ptr` steps through chunk headers inside the owned run;
        // each step advances by the chunk size recorded in a validated
        // header, and the loop stops at the limit.
        unsafe {
            let limit = self.base.add(self.dwords);
            while ptr < limit {
                let header = ptr.read();
                if header & CHUNK_HEADER == 0 {
                    panic!("kernel heap corrupted at {:p}", ptr);
                }
                let chunk = header & SIZE_MASK;
                if chunk == 0 {
                    panic!("kernel heap corrupted at {:p}", ptr);
                }

                if header & CHUNK_ALLOCATED == 0 && chunk >= need {
                    // Split: the tail of this chunk becomes a new free
                    // chunk (possibly header-only).
                    let remainder = chunk - need;
                    if remainder > 0 {
                        ptr.add(need as usize)
                            .write(remainder | CHUNK_HEADER);
                    }
                    ptr.write(need | CHUNK_HEADER | CHUNK_ALLOCATED);
                    return Ok(NonNull::new_unchecked(ptr.add(1).cast()));
                }

                ptr = ptr.add(chunk as usize);
            }
        }
        Err(KernelError::OutOfHeap { requested: size })
    }
}

/// The global kernel heap, formatted by [`init`].
static KERNEL_HEAP: Mutex<KernelHeap> = Mutex::new(KernelHeap::empty());

/// Carve [`HEAP_PAGES`] kernel pages and format the heap over them.
///
/// The kernel-page cursor is monotonic, so the pages are virtually
/// contiguous and the heap spans them as one run.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn init() -> KernelResult<()> {
    let mut first = None;
    for _ in 0..HEAP_PAGES {
        let page = super::vmm::alloc_kernel_page(PteFlags::WRITABLE)?;
        if first.is_none() {
            first = Some(page);
        }
    }
    let base = first.expect("HEAP_PAGES is nonzero");
    // SAFETY: the pages were just allocated for exclusive heap use and
    // are mapped writable at consecutive kernel addresses.
    unsafe {
        KERNEL_HEAP
            .lock()
            .init(base.as_mut_ptr(), HEAP_PAGES * PAGE_SIZE / 4);
    }
    log::info!("[HEAP] {} KiB at {}", HEAP_PAGES * PAGE_SIZE / 1024, base);
    Ok(())
}

/// Host build: the host page allocator gives no contiguity guarantee, so
/// the heap run comes from one leaked block instead.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn init() -> KernelResult<()> {
    let mut heap = KERNEL_HEAP.lock();
    if heap.is_initialized() {
        return Ok(());
    }
    let layout =
        core::alloc::Layout::from_size_align(HEAP_PAGES * PAGE_SIZE, PAGE_SIZE)
            .expect("heap layout is statically valid");
    // SAFETY: nonzero layout; the block is intentionally leaked so the
    // heap owns it for the rest of the process.
    let base = unsafe { std::alloc::alloc_zeroed(layout) };
    if base.is_null() {
        return Err(KernelError::OutOfHeap { requested: HEAP_PAGES * PAGE_SIZE });
    }
    // SAFETY: freshly allocated exclusive block of exactly the right size.
    unsafe { heap.init(base.cast(), HEAP_PAGES * PAGE_SIZE / 4) };
    Ok(())
}

/// Allocate kernel memory. Returns `None` when the heap cannot satisfy
/// the request; callers decide whether that is fatal.
pub fn kmalloc(size: usize) -> Option<NonNull<u8>> {
    KERNEL_HEAP.lock().alloc(size).ok()
}

/// Release kernel memory.
///
/// Deliberately a no-op: chunks are never reused or coalesced. Kernel
/// allocations are long-lived and the bounded leak buys a trivially
/// correct allocator.
pub fn kfree(_ptr: NonNull<u8>) {}
