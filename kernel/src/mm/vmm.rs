//! Virtual-memory manager
//!
//! All leaf operations act on the *currently loaded* address space
//! through the recursive self-map: the directory entry for a virtual
//! address lives at a fixed offset inside [`PAGE_DIR_VADDR`], and the
//! corresponding table inside the window at
//! [`page_table::PAGE_TABLES_BASE`]. Editing an address space that is
//! *not* loaded (user-task setup) goes through the kernel-visible aliases
//! recorded on the owning task's page lists instead.
//!
//! On a host build the self-map walkers are never reached: kernel pages
//! come from the host allocator and `vtophys` is the identity, which is
//! exactly enough for the task and address-space logic to be exercised by
//! tests.

use core::ptr;

use spin::Mutex;

use super::frame_allocator::{alloc_frame, free_frame};
use super::page_table::{self, dir_index, table_index, PageTableEntry, PteFlags, PAGE_DIR_VADDR};
use super::{PhysAddr, VirtAddr, PAGE_SIZE};
use crate::arch;
use crate::error::{KernelError, KernelResult};
use crate::sched::task::TaskSlot;

/// Bottom of the kernel dynamic region. `alloc_kernel_page` hands out
/// consecutive pages from here; kernel virtual addresses are never
/// reused.
pub const KERNEL_DYNAMIC_BASE: usize = 0x0080_0000;

/// Where user task images are loaded.
pub const USER_IMAGE_BASE: usize = 0x8000_0000;

/// Initial user stack pointer.
pub const USER_STACK_TOP: usize = 0xFFFF_F000;

/// Monotone cursor for `alloc_kernel_page`. Finite but sufficient: the
/// region up to the user half covers ~2 GiB of kernel pages.
#[cfg(all(target_arch = "x86", target_os = "none"))]
static NEXT_KERNEL_VADDR: Mutex<usize> = Mutex::new(KERNEL_DYNAMIC_BASE);

/// Flush the TLB for the active space.
pub fn flush_tlb() {
    arch::flush_tlb();
}

/// Pointer to the active space's directory entry `d`, via the self-map.
fn pde_slot(d: usize) -> *mut u32 {
    (PAGE_DIR_VADDR + d * 4) as *mut u32
}

/// Pointer to the active space's table entry `(d, t)`, via the self-map.
fn pte_slot(d: usize, t: usize) -> *mut u32 {
    (page_table::table_window(d).as_usize() + t * 4) as *mut u32
}

/// Map `vaddr` in the active address space, allocating the page table on
/// the way if the directory entry is absent. Returns the data frame.
///
/// On exhaustion after the table frame was already installed, the table
/// frame is deliberately leaked: callers never observe a half-mapped
/// page, and there is no reclamation pass to confuse.
pub fn alloc_page(vaddr: VirtAddr, flags: PteFlags) -> KernelResult<PhysAddr> {
    let d = dir_index(vaddr);
    let t = table_index(vaddr);

    // SAFETY: the self-map slots are valid pointers whenever paging is
    // enabled with a directory that installs itself at SELF_MAP_INDEX,
    // which init_boot_map and spawn both guarantee.
    unsafe {
        let pde = PageTableEntry::from_raw(pde_slot(d).read());
        if !pde.is_present() {
            let table_frame = alloc_frame().ok_or(KernelError::OutOfFrames)?;
            pde_slot(d).write(
                PageTableEntry::new(table_frame, PteFlags::PRESENT | PteFlags::WRITABLE | flags)
                    .raw(),
            );
            // The window for `d` may still hold a stale translation.
            flush_tlb();
            // Fresh table frames carry whatever RAM held; a stale present
            // bit would alias an arbitrary frame later.
            ptr::write_bytes(page_table::table_window(d).as_mut_ptr::<u8>(), 0, PAGE_SIZE);
        }

        let frame = alloc_frame().ok_or(KernelError::OutOfFrames)?;
        pte_slot(d, t).write(PageTableEntry::new(frame, PteFlags::PRESENT | flags).raw());
        Ok(frame)
    }
}

/// Allocate and map the next kernel page. Kernel heap and kernel stacks
/// grow linearly upward from [`KERNEL_DYNAMIC_BASE`]; freed kernel
/// virtual addresses are not reused.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn alloc_kernel_page(flags: PteFlags) -> KernelResult<VirtAddr> {
    let mut cursor = NEXT_KERNEL_VADDR.lock();
    let vaddr = VirtAddr::new(*cursor);
    alloc_page(vaddr, flags)?;
    *cursor += PAGE_SIZE;
    Ok(vaddr)
}

/// Host build: kernel pages come from the host allocator (zeroed, leaked,
/// page-aligned), so spawn and user-space setup can run under tests.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn alloc_kernel_page(_flags: PteFlags) -> KernelResult<VirtAddr> {
    let layout = core::alloc::Layout::from_size_align(PAGE_SIZE, PAGE_SIZE)
        .expect("page layout is statically valid");
    // SAFETY: layout has nonzero size; the allocation is intentionally
    // leaked, mirroring the no-reuse policy of the kernel cursor.
    let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(KernelError::OutOfFrames);
    }
    Ok(VirtAddr::new(ptr as usize))
}

/// Unmap `vaddr` in the active space and return its frame to the
/// allocator. Freeing a page that is not mapped is a kernel bug.
pub fn free_page(vaddr: VirtAddr) {
    let d = dir_index(vaddr);
    let t = table_index(vaddr);

    // SAFETY: self-map validity as in alloc_page.
    unsafe {
        let pde = PageTableEntry::from_raw(pde_slot(d).read());
        if !pde.is_present() {
            panic!("tried to free unmapped page {}", vaddr);
        }
        let pte = PageTableEntry::from_raw(pte_slot(d, t).read());
        if !pte.is_present() {
            panic!("tried to free unmapped page {}", vaddr);
        }
        pte_slot(d, t).write(PageTableEntry::empty().raw());
        free_frame(pte.frame());
    }
    flush_tlb();
}

/// Translate a virtual address in the active space to its physical
/// address, or `None` when it is not mapped.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn vtophys(vaddr: VirtAddr) -> Option<PhysAddr> {
    let d = dir_index(vaddr);
    let t = table_index(vaddr);

    // SAFETY: self-map validity as in alloc_page.
    unsafe {
        let pde = PageTableEntry::from_raw(pde_slot(d).read());
        if !pde.is_present() {
            return None;
        }
        let pte = PageTableEntry::from_raw(pte_slot(d, t).read());
        if !pte.is_present() {
            return None;
        }
        Some(PhysAddr::new(
            pte.frame().as_usize() | (vaddr.as_usize() & 0xFFF),
        ))
    }
}

/// Host build: translation is the identity, truncated to the 32-bit
/// width a page-table entry can hold, so directory construction and the
/// alias bookkeeping stay self-consistent on a 64-bit host.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn vtophys(vaddr: VirtAddr) -> Option<PhysAddr> {
    Some(PhysAddr::new(vaddr.as_usize() & 0xFFFF_FFFF))
}

// ---------------------------------------------------------------------------
// Per-task user page records
// ---------------------------------------------------------------------------

/// One user page: where the kernel sees it and where the task sees it.
/// Every user frame is also mapped into kernel space so the kernel can
/// always reach user memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserPage {
    pub kvaddr: VirtAddr,
    pub uvaddr: VirtAddr,
}

/// Capacity of the shared page-record pool.
pub const PAGE_NODE_POOL_SIZE: usize = 1024;

#[derive(Clone, Copy)]
struct PageNode {
    page: UserPage,
    next: Option<u16>,
}

/// Arena backing every task's page lists. Nodes are handed out by index
/// and never recycled: fault-killed tasks leak their records by policy,
/// and the handles keep a future reclamation pass possible.
pub struct PageNodePool {
    nodes: [PageNode; PAGE_NODE_POOL_SIZE],
    used: usize,
}

impl PageNodePool {
    pub const fn new() -> Self {
        const EMPTY: PageNode = PageNode {
            page: UserPage {
                kvaddr: VirtAddr::new(0),
                uvaddr: VirtAddr::new(0),
            },
            next: None,
        };
        Self {
            nodes: [EMPTY; PAGE_NODE_POOL_SIZE],
            used: 0,
        }
    }

    fn alloc(&mut self, node: PageNode) -> KernelResult<u16> {
        if self.used == PAGE_NODE_POOL_SIZE {
            return Err(KernelError::PageListExhausted);
        }
        let idx = self.used as u16;
        self.nodes[self.used] = node;
        self.used += 1;
        Ok(idx)
    }
}

impl Default for PageNodePool {
    fn default() -> Self {
        Self::new()
    }
}

static PAGE_NODES: Mutex<PageNodePool> = Mutex::new(PageNodePool::new());

/// Intrusive list head over the shared node pool.
#[derive(Debug, Clone, Copy)]
pub struct PageList {
    head: Option<u16>,
}

impl PageList {
    pub const fn new() -> Self {
        Self { head: None }
    }

    /// Prepend a record.
    pub fn push(&mut self, page: UserPage) -> KernelResult<()> {
        let mut pool = PAGE_NODES.lock();
        let idx = pool.alloc(PageNode {
            page,
            next: self.head,
        })?;
        self.head = Some(idx);
        Ok(())
    }

    /// Visit every record, newest first.
    pub fn for_each(&self, mut f: impl FnMut(UserPage)) {
        let pool = PAGE_NODES.lock();
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = pool.nodes[idx as usize];
            f(node.page);
            cursor = node.next;
        }
    }

    /// Kernel alias of the record whose frame is `phys`, if any.
    pub fn find_kvaddr_by_phys(&self, phys: PhysAddr) -> Option<VirtAddr> {
        let mut found = None;
        self.for_each(|page| {
            if found.is_none() && vtophys(page.kvaddr).map(|p| p.as_usize() & !0xFFF)
                == Some(phys.as_usize() & !0xFFF)
            {
                found = Some(page.kvaddr);
            }
        });
        found
    }

    pub fn len(&self) -> usize {
        let mut n = 0;
        self.for_each(|_| n += 1);
        n
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Forget the records. The nodes stay allocated in the pool; this is
    /// the intentional leak on task death.
    pub fn detach(&mut self) {
        self.head = None;
    }
}

impl Default for PageList {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate a page for a user task at `uvaddr` inside *that task's*
/// address space, which need not be the active one.
///
/// The data frame is (a) mapped into kernel space at a fresh kernel
/// address, (b) recorded on the task's page list, and (c) entered into
/// the task's directory through the kernel-visible aliases. The TLB is
/// flushed only when the edited space is the active one. Returns the
/// kernel alias of the new page.
pub fn alloc_user_page(task: &mut TaskSlot, uvaddr: VirtAddr) -> KernelResult<VirtAddr> {
    let d = dir_index(uvaddr);
    let t = table_index(uvaddr);
    let dir = task.page_dir.as_mut_ptr::<u32>();

    // SAFETY: `task.page_dir` is the kernel alias of the task's directory
    // page, established at spawn; index arithmetic stays inside the page.
    let pde = unsafe { PageTableEntry::from_raw(dir.add(d).read()) };

    let table_kvaddr = if !pde.is_present() {
        let tabpage = alloc_kernel_page(PteFlags::WRITABLE)?;
        // SAFETY: the page was just allocated for exclusive use as a page
        // table; zero it so no stale present bits alias random frames.
        unsafe { ptr::write_bytes(tabpage.as_mut_ptr::<u8>(), 0, PAGE_SIZE) };
        let phys = vtophys(tabpage).ok_or(KernelError::UnmappedAddress {
            vaddr: tabpage.as_usize(),
        })?;
        // SAFETY: as above; `d` < 1024.
        unsafe {
            dir.add(d).write(
                PageTableEntry::new(phys, PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER)
                    .raw(),
            );
        }
        task.page_tables.push(UserPage {
            kvaddr: tabpage,
            uvaddr: VirtAddr::new(d << 22),
        })?;
        tabpage
    } else {
        // The table already exists; find its kernel alias. Losing the
        // alias would mean the page-table list and the directory disagree,
        // which is a kernel bug.
        match task.page_tables.find_kvaddr_by_phys(pde.frame()) {
            Some(kvaddr) => kvaddr,
            None => panic!("page table alias missing for {}", uvaddr),
        }
    };

    let kvaddr = alloc_kernel_page(PteFlags::WRITABLE | PteFlags::USER)?;
    let phys = vtophys(kvaddr).ok_or(KernelError::UnmappedAddress {
        vaddr: kvaddr.as_usize(),
    })?;
    // SAFETY: `table_kvaddr` aliases the task's page table page; `t` < 1024.
    unsafe {
        table_kvaddr.as_mut_ptr::<u32>().add(t).write(
            PageTableEntry::new(phys, PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER)
                .raw(),
        );
    }
    task.pages.push(UserPage { kvaddr, uvaddr })?;

    if arch::read_cr3() == task.cr3 {
        flush_tlb();
    }
    Ok(kvaddr)
}

// ---------------------------------------------------------------------------
// Boot address space
// ---------------------------------------------------------------------------

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod boot {
    //! The starter kernel page map. The kernel image is linked at 1 MiB
    //! and identity-mapped; the directory and its first table live in the
    //! image itself.

    #[repr(C, align(4096))]
    pub struct PageAligned(pub [u32; 1024]);

    pub static mut BOOT_PAGE_DIRECTORY: PageAligned = PageAligned([0; 1024]);
    pub static mut BOOT_PAGE_TABLE: PageAligned = PageAligned([0; 1024]);

    extern "C" {
        /// End of the read-only (code + rodata) part of the image.
        pub static __kernel_code_end: u8;
        /// End of the whole image; free memory starts here.
        pub static __kernel_end: u8;
    }
}

/// First byte after the kernel image (physical; the image is
/// identity-mapped).
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn kernel_image_end() -> PhysAddr {
    // SAFETY: the linker provides the symbol; only its address is used.
    PhysAddr::new(unsafe { &boot::__kernel_end as *const u8 as usize })
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn kernel_image_end() -> PhysAddr {
    // Host build: a stand-in matching the 1 MiB link base.
    PhysAddr::new(0x0010_0000)
}

/// Kernel alias of the boot page directory (the idle task's directory).
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn kernel_directory() -> VirtAddr {
    VirtAddr::new(&raw const boot::BOOT_PAGE_DIRECTORY as usize)
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn kernel_directory() -> VirtAddr {
    VirtAddr::new(0)
}

/// CR3 value of the kernel address space. The boot directory lives in
/// the identity-mapped image, so its virtual address is its physical
/// address.
pub fn kernel_cr3() -> usize {
    kernel_directory().as_usize()
}

/// Build the starter kernel map and switch paging on: identity-map the
/// image from 1 MiB (code read-only, data read-write), alias VGA text
/// memory at `0xFF000` for the console driver, and install the recursive
/// self-map.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn init_boot_map() {
    use page_table::SELF_MAP_INDEX;

    let code_end = {
        // SAFETY: linker symbol, address only.
        unsafe { &boot::__kernel_code_end as *const u8 as usize }
    };
    let kernel_end = kernel_image_end().as_usize();

    // SAFETY: paging is off, so the statics are plain memory at their
    // physical addresses and nothing else touches them during boot.
    unsafe {
        let dir = &raw mut boot::BOOT_PAGE_DIRECTORY;
        let table = &raw mut boot::BOOT_PAGE_TABLE;

        for i in 256..page_table::ENTRIES_PER_TABLE {
            let addr = i * PAGE_SIZE;
            if addr > kernel_end {
                break;
            }
            let flags = if addr < code_end {
                PteFlags::PRESENT
            } else {
                PteFlags::PRESENT | PteFlags::WRITABLE
            };
            (*table).0[i] = PageTableEntry::new(PhysAddr::new(addr), flags).raw();
        }

        // VGA text memory at vaddr 0xFF000.
        (*table).0[255] = PageTableEntry::new(
            PhysAddr::new(0xB8000),
            PteFlags::PRESENT | PteFlags::WRITABLE,
        )
        .raw();

        (*dir).0[0] = PageTableEntry::new(
            PhysAddr::new(table as usize),
            PteFlags::PRESENT | PteFlags::WRITABLE,
        )
        .raw();
        (*dir).0[SELF_MAP_INDEX] = PageTableEntry::new(
            PhysAddr::new(dir as usize),
            PteFlags::PRESENT | PteFlags::WRITABLE,
        )
        .raw();

        arch::x86::write_cr3(dir as usize);
        arch::x86::write_cr0(arch::read_cr0() | 0x8000_0000);
    }
}

/// Host build: there is no paging to enable.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn init_boot_map() {}

#[cfg(test)]
mod tests {
    use std::vec;
    use std::vec::Vec;

    use super::*;

    #[test]
    fn kernel_pages_are_zeroed_and_distinct() {
        let a = alloc_kernel_page(PteFlags::WRITABLE).unwrap();
        let b = alloc_kernel_page(PteFlags::WRITABLE).unwrap();
        assert_ne!(a, b);
        // SAFETY: freshly allocated private pages.
        unsafe {
            assert_eq!(a.as_ptr::<u8>().read(), 0);
            assert_eq!(a.as_ptr::<u8>().add(PAGE_SIZE - 1).read(), 0);
        }
    }

    #[test]
    fn page_list_push_and_walk() {
        let mut list = PageList::new();
        assert!(list.is_empty());
        for i in 0..4usize {
            list.push(UserPage {
                kvaddr: VirtAddr::new(0x9000_0000 + i * PAGE_SIZE),
                uvaddr: VirtAddr::new(0x8000_0000 + i * PAGE_SIZE),
            })
            .unwrap();
        }
        assert_eq!(list.len(), 4);

        // Newest first.
        let mut seen = Vec::new();
        list.for_each(|p| seen.push(p.uvaddr.as_usize()));
        assert_eq!(
            seen,
            vec![0x8000_3000, 0x8000_2000, 0x8000_1000, 0x8000_0000]
        );

        // Identity vtophys on host: lookup by "physical" address.
        let hit = list.find_kvaddr_by_phys(PhysAddr::new(0x9000_1000));
        assert_eq!(hit, Some(VirtAddr::new(0x9000_1000)));
        assert_eq!(list.find_kvaddr_by_phys(PhysAddr::new(0x4000_0000)), None);

        list.detach();
        assert!(list.is_empty());
    }
}
