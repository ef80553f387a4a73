use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::{fmt, ops::Range};

use collection_ex::RangeMap;
use minfo::{
    LINEAR_HEAP_VADDR, NEW_LINEAR_HEAP_KERNEL_VERSION, NEW_LINEAR_HEAP_VADDR, TLS_ENTRY_SIZE,
};
use scopeguard::ScopeGuard;

use super::{
    caps::{AddressMapping, Capabilities, SvcMask},
    codeset::{CodeSet, SegmentKind},
    flags::{ProcessFlags, RawProcessFlags, FLAG_NAMES},
    hdl::{HandleType, Object},
    prio::{self, Priority},
    tls::SlotBitmap,
};
use crate::{
    config::KernelConfig,
    error::{Error, Result},
    logger::flags::Flags,
    mem::{
        is_page_aligned, AddressSpace, Arena, Backing, MemoryRegionInfo, Permissions,
        RegionAllocator, RegionTable, ResourceLimit, VAddr,
    },
};

/// Everything the scheduler needs to start a process' first thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MainThread {
    pub process_id: u32,
    pub entrypoint: VAddr,
    pub priority: Priority,
    pub stack_top: VAddr,
    pub stack_size: u32,
}

/// Creates and schedules the main thread of a process.
pub trait Launcher {
    fn launch_main_thread(&self, thread: &MainThread) -> Result;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Running,
}

/// What a fixed mapping made by [`Process::run`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fixed {
    Segment(SegmentKind),
    Stack,
    Io,
}

impl Fixed {
    /// Whether the mapping is charged as miscellaneous memory.
    fn charged(self) -> bool {
        !matches!(self, Fixed::Io)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeapKind {
    Heap,
    Linear,
}

/// The guest linear heap window for a process of `kernel_version` drawing
/// from `region`.
pub fn linear_heap_range(kernel_version: u16, region: &MemoryRegionInfo) -> Range<VAddr> {
    let base = if kernel_version < NEW_LINEAR_HEAP_KERNEL_VERSION {
        LINEAR_HEAP_VADDR
    } else {
        NEW_LINEAR_HEAP_VADDR
    } + region.base();
    base..base + region.size()
}

/// An emulated process.
pub struct Process {
    id: u32,
    codeset: Arc<CodeSet>,
    resource_limit: Arc<dyn ResourceLimit>,
    config: Arc<KernelConfig>,
    regions: RegionTable,
    memory_region: Option<Arc<MemoryRegionInfo>>,

    caps: Capabilities,
    state: State,

    vm: Box<dyn AddressSpace>,
    fixed: RangeMap<VAddr, Fixed>,
    heap_memory: Arena,
    heap: RegionAllocator,
    linear: Option<RegionAllocator>,
    misc_memory_used: u32,
    tls: SlotBitmap,
}

impl Process {
    pub(crate) fn new(
        id: u32,
        codeset: Arc<CodeSet>,
        vm: Box<dyn AddressSpace>,
        resource_limit: Arc<dyn ResourceLimit>,
        config: Arc<KernelConfig>,
        regions: RegionTable,
    ) -> Self {
        let heap = RegionAllocator::new("heap", config.heap_range.clone());
        log::info!("process {} ({}) created", id, codeset.name());
        Process {
            id,
            codeset,
            resource_limit,
            config,
            regions,
            memory_region: None,
            caps: Capabilities::new(),
            state: State::Created,
            vm,
            fixed: RangeMap::new(0..VAddr::MAX),
            heap_memory: Arena::new(),
            heap,
            linear: None,
            misc_memory_used: 0,
            tls: SlotBitmap::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn codeset(&self) -> &Arc<CodeSet> {
        &self.codeset
    }

    #[inline]
    pub fn resource_limit(&self) -> &Arc<dyn ResourceLimit> {
        &self.resource_limit
    }

    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    #[inline]
    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    #[inline]
    pub fn svc_access_mask(&self) -> &SvcMask {
        self.caps.svc_access_mask()
    }

    #[inline]
    pub fn handle_table_size(&self) -> u32 {
        self.caps.handle_table_size()
    }

    #[inline]
    pub fn kernel_version(&self) -> u16 {
        self.caps.kernel_version()
    }

    #[inline]
    pub fn flags(&self) -> &ProcessFlags {
        self.caps.flags()
    }

    #[inline]
    pub fn address_mappings(&self) -> &[AddressMapping] {
        self.caps.address_mappings()
    }

    #[inline]
    pub fn heap_start(&self) -> VAddr {
        self.heap.range().start
    }

    #[inline]
    pub fn heap_end(&self) -> VAddr {
        self.heap.range().end
    }

    #[inline]
    pub fn heap_used(&self) -> u32 {
        self.heap.used()
    }

    #[inline]
    pub fn linear_heap_used(&self) -> u32 {
        self.linear.as_ref().map_or(0, RegionAllocator::used)
    }

    #[inline]
    pub fn misc_memory_used(&self) -> u32 {
        self.misc_memory_used
    }

    #[inline]
    pub fn tls(&self) -> &SlotBitmap {
        &self.tls
    }

    #[inline]
    pub fn heap_memory(&self) -> &Arena {
        &self.heap_memory
    }

    /// The memory region the process draws from, if it has committed
    /// anything yet.
    #[inline]
    pub fn memory_region(&self) -> Option<&Arc<MemoryRegionInfo>> {
        self.memory_region.as_ref()
    }

    /// The region named by the process flags, bound on first use.
    fn region(&mut self) -> Arc<MemoryRegionInfo> {
        let regions = &self.regions;
        let region = self.caps.flags().memory_region;
        Arc::clone(
            self.memory_region
                .get_or_insert_with(|| Arc::clone(regions.get(region))),
        )
    }

    pub fn linear_heap_base(&self) -> VAddr {
        self.linear_heap_window().start
    }

    pub fn linear_heap_limit(&self) -> VAddr {
        self.linear_heap_window().end
    }

    fn linear_heap_window(&self) -> Range<VAddr> {
        match &self.linear {
            Some(linear) => linear.range().clone(),
            None => {
                let region = match &self.memory_region {
                    Some(region) => region,
                    None => self.regions.get(self.caps.flags().memory_region),
                };
                linear_heap_range(self.kernel_version(), region)
            }
        }
    }

    /// Apply the kernel capability descriptors of the program.
    ///
    /// Descriptors applied before a failure stay in effect. Once the process
    /// has committed memory its region and kernel version are fixed, so the
    /// descriptors are refused from then on.
    pub fn parse_kernel_caps(&mut self, words: &[u32]) -> Result {
        if self.state != State::Created || self.memory_region.is_some() {
            return Err(Error::INVALID_ARGUMENT);
        }
        let ret = self.caps.parse(
            self.config.descriptor_table,
            words,
            self.config.max_handle_table_size,
        );
        match ret {
            Ok(()) => log::debug!(
                "process {}: version {:#06x}, {:?} region, flags {}",
                self.id,
                self.kernel_version(),
                self.flags().memory_region,
                Flags::new(RawProcessFlags::from(*self.flags()).raw().into(), FLAG_NAMES)
            ),
            Err(err) => log::warn!("process {}: bad kernel capabilities: {}", self.id, err),
        }
        ret
    }

    /// Like [`Process::parse_kernel_caps`], over the little-endian byte form
    /// found in program metadata.
    pub fn parse_kernel_caps_bytes(&mut self, bytes: &[u8]) -> Result {
        if bytes.len() % 4 != 0 {
            return Err(Error::CAPABILITY_ERROR);
        }
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect();
        self.parse_kernel_caps(&words)
    }

    /// Charge `bytes` to the resource limit and the memory region.
    fn charge(&mut self, bytes: u32) -> Result {
        let region = self.region();
        if !self.resource_limit.reserve(bytes) {
            return Err(Error::RESOURCE_EXHAUSTED);
        }
        if !region.reserve(bytes) {
            self.resource_limit.release(bytes);
            return Err(Error::OUT_OF_MEMORY);
        }
        Ok(())
    }

    fn uncharge(&self, bytes: u32) {
        self.resource_limit.release(bytes);
        if let Some(region) = &self.memory_region {
            region.release(bytes);
        }
    }

    fn new_linear(&mut self) -> RegionAllocator {
        let region = self.region();
        let mut linear =
            RegionAllocator::new("linear heap", linear_heap_range(self.kernel_version(), &region));
        for (range, _) in self.fixed.iter().map(|(_, item)| item) {
            linear.lock(range);
        }
        log::debug!(
            "process {}: linear heap at {:#x}..{:#x}",
            self.id,
            linear.range().start,
            linear.range().end
        );
        linear
    }

    fn linear(&mut self) -> &mut RegionAllocator {
        let linear = match self.linear.take() {
            Some(linear) => linear,
            None => self.new_linear(),
        };
        self.linear.insert(linear)
    }

    fn allocator(&mut self, kind: HeapKind) -> &mut RegionAllocator {
        match kind {
            HeapKind::Heap => &mut self.heap,
            HeapKind::Linear => self.linear(),
        }
    }

    fn commit(
        &mut self,
        kind: HeapKind,
        target: VAddr,
        size: u32,
        perms: Permissions,
    ) -> Result<VAddr> {
        let target = (target != 0).then(|| target);
        self.allocator(kind).check_allocate(target, size)?;

        self.charge(size)?;
        let limit = Arc::clone(&self.resource_limit);
        let region = self.region();
        let charge = scopeguard::guard((), move |_| {
            limit.release(size);
            region.release(size);
        });

        let (alloc, arena, vm) = match kind {
            HeapKind::Heap => (&mut self.heap, &mut self.heap_memory, &mut self.vm),
            HeapKind::Linear => match &mut self.linear {
                Some(linear) => (linear, &mut self.heap_memory, &mut self.vm),
                None => return Err(Error::OUT_OF_MEMORY),
            },
        };

        let extent = alloc.allocate(target, size, arena)?;
        let backing = Backing::Arena {
            block: Arc::clone(arena.block()),
            offset: extent.offset,
        };
        if let Err(err) = vm.map(extent.virt.clone(), perms, backing) {
            let _ = alloc.deallocate(extent.virt, arena);
            return Err(err);
        }

        ScopeGuard::into_inner(charge);
        log::trace!(
            "process {}: {:?} commit {:#x}..{:#x} {:?}",
            self.id,
            kind,
            extent.virt.start,
            extent.virt.end,
            perms
        );
        Ok(extent.virt.start)
    }

    fn decommit(&mut self, kind: HeapKind, target: VAddr, size: u32) -> Result {
        let range = self.allocator(kind).check_deallocate(target, size)?;
        self.vm.unmap(range.clone())?;

        let (alloc, arena) = match kind {
            HeapKind::Heap => (&mut self.heap, &mut self.heap_memory),
            HeapKind::Linear => match &mut self.linear {
                Some(linear) => (linear, &mut self.heap_memory),
                None => return Err(Error::INVALID_ADDRESS),
            },
        };
        alloc.deallocate(range, arena)?;
        self.uncharge(size);
        Ok(())
    }

    /// Commit `size` bytes of regular heap at `target`, or at the lowest free
    /// address if `target` is zero. Returns the committed address.
    pub fn heap_allocate(&mut self, target: VAddr, size: u32, perms: Permissions) -> Result<VAddr> {
        self.commit(HeapKind::Heap, target, size, perms)
    }

    pub fn heap_free(&mut self, target: VAddr, size: u32) -> Result {
        self.decommit(HeapKind::Heap, target, size)
    }

    /// Commit `size` bytes of linear heap, see [`Process::heap_allocate`].
    pub fn linear_allocate(
        &mut self,
        target: VAddr,
        size: u32,
        perms: Permissions,
    ) -> Result<VAddr> {
        self.commit(HeapKind::Linear, target, size, perms)
    }

    pub fn linear_free(&mut self, target: VAddr, size: u32) -> Result {
        self.decommit(HeapKind::Linear, target, size)
    }

    /// Take a TLS slot, returning its index and guest address.
    pub fn allocate_tls(&mut self) -> Result<(usize, VAddr)> {
        let index = self.tls.allocate()?;
        if let Err(err) = self.charge(TLS_ENTRY_SIZE) {
            let _ = self.tls.free(index);
            return Err(err);
        }
        self.misc_memory_used += TLS_ENTRY_SIZE;
        Ok((index, SlotBitmap::slot_addr(index)))
    }

    pub fn free_tls(&mut self, index: usize) -> Result {
        self.tls.free(index)?;
        self.misc_memory_used -= TLS_ENTRY_SIZE;
        self.uncharge(TLS_ENTRY_SIZE);
        Ok(())
    }

    fn map_fixed(
        &mut self,
        range: Range<VAddr>,
        perms: Permissions,
        backing: Backing,
        what: Fixed,
    ) -> Result {
        let linear_hit = self.linear.as_ref().map_or(false, |l| l.overlaps(&range));
        if self.fixed.overlaps(&range) || self.heap.overlaps(&range) || linear_hit {
            return Err(Error::INVALID_ADDRESS);
        }

        let size = range.end - range.start;
        if what.charged() {
            self.charge(size)?;
        }
        if let Err(err) = self.vm.map(range.clone(), perms, backing) {
            if what.charged() {
                self.uncharge(size);
            }
            return Err(err);
        }

        self.heap.lock(&range);
        if let Some(linear) = &mut self.linear {
            linear.lock(&range);
        }
        if what.charged() {
            self.misc_memory_used += size;
        }
        log::trace!(
            "process {}: {:?} at {:#x}..{:#x} {:?}",
            self.id,
            what,
            range.start,
            range.end,
            perms
        );
        let _ = self.fixed.insert(range, what);
        Ok(())
    }

    fn unmap_fixed(&mut self, start: VAddr) {
        let (range, what) = match self.fixed.remove(start) {
            Some(item) => item,
            None => return,
        };
        if let Err(err) = self.vm.unmap(range.clone()) {
            log::warn!("process {}: failed to unmap {:?}: {}", self.id, range, err);
        }
        self.heap.unlock(&range);
        if let Some(linear) = &mut self.linear {
            linear.unlock(&range);
        }
        if what.charged() {
            let size = range.end - range.start;
            self.misc_memory_used -= size;
            self.uncharge(size);
        }
    }

    fn map_image(&mut self, stack_size: u32, mapped: &mut Vec<VAddr>) -> Result {
        let codeset = Arc::clone(&self.codeset);
        for (kind, seg) in codeset.segments().filter(|(_, seg)| !seg.is_empty()) {
            let range = seg.range().ok_or(Error::INVALID_ADDRESS)?;
            let backing = Backing::Image {
                memory: Arc::clone(codeset.memory()),
                offset: seg.offset,
            };
            self.map_fixed(range, kind.perms(), backing, Fixed::Segment(kind))?;
            mapped.push(seg.addr);
        }

        if stack_size > 0 {
            let top = self.config.stack_top;
            let base = top.checked_sub(stack_size).ok_or(Error::INVALID_SIZE)?;
            self.map_fixed(base..top, Permissions::READ_WRITE, Backing::Zeroed, Fixed::Stack)?;
            mapped.push(base);
        }

        let mappings: Vec<AddressMapping> = self.address_mappings().to_vec();
        for mapping in mappings {
            let end = mapping
                .address
                .checked_add(mapping.size)
                .ok_or(Error::INVALID_ADDRESS)?;
            let perms = if mapping.writable {
                Permissions::READ_WRITE
            } else {
                Permissions::READ
            };
            let backing = Backing::Io {
                addr: mapping.address,
            };
            self.map_fixed(mapping.address..end, perms, backing, Fixed::Io)?;
            mapped.push(mapping.address);
        }
        Ok(())
    }

    /// Map the program image and start the main thread.
    ///
    /// Nothing mapped by this call stays mapped if it fails.
    pub fn run(&mut self, priority: Priority, stack_size: u32, launcher: &dyn Launcher) -> Result {
        if self.state != State::Created {
            return Err(Error::INVALID_ARGUMENT);
        }
        prio::check(priority, self.flags().privileged_priority)?;
        if !is_page_aligned(stack_size) {
            return Err(Error::INVALID_SIZE);
        }

        let mut mapped = Vec::new();
        let ret = self.map_image(stack_size, &mut mapped).and_then(|_| {
            launcher.launch_main_thread(&MainThread {
                process_id: self.id,
                entrypoint: self.codeset.entrypoint(),
                priority,
                stack_top: self.config.stack_top,
                stack_size,
            })
        });

        match ret {
            Ok(()) => {
                self.state = State::Running;
                log::info!(
                    "process {} ({}) running at {:#x}",
                    self.id,
                    self.codeset.name(),
                    self.codeset.entrypoint()
                );
                Ok(())
            }
            Err(err) => {
                for start in mapped.into_iter().rev() {
                    self.unmap_fixed(start);
                }
                log::warn!("process {}: failed to run: {}", self.id, err);
                Err(err)
            }
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        let starts: Vec<VAddr> = self.fixed.iter().map(|(&start, _)| start).collect();
        for start in starts.into_iter().rev() {
            self.unmap_fixed(start);
        }

        let extents = self
            .heap
            .extents()
            .chain(self.linear.iter().flat_map(|linear| linear.extents()));
        for extent in extents {
            if let Err(err) = self.vm.unmap(extent.virt.clone()) {
                log::warn!("process {}: failed to unmap {:?}: {}", self.id, extent.virt, err);
            }
        }

        let committed = self.heap.used() + self.linear_heap_used() + self.misc_memory_used;
        if committed > 0 {
            self.uncharge(committed);
        }
        log::info!("process {} destroyed", self.id);
    }
}

impl Object for Process {
    fn handle_type(&self) -> HandleType {
        HandleType::Process
    }

    fn type_name(&self) -> &'static str {
        "Process"
    }

    fn name(&self) -> &str {
        self.codeset.name()
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("name", &self.codeset.name())
            .field("state", &self.state)
            .field("heap_used", &self.heap_used())
            .field("linear_heap_used", &self.linear_heap_used())
            .field("misc_memory_used", &self.misc_memory_used)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::{
        mem::{CommitLimit, MemoryRegion},
        mock::{MockLauncher, MockSpace, Op},
        task::codeset::Segment,
        Kernel, KernelConfig,
    };

    const CODE: VAddr = 0x0010_0000;
    const HEAP: VAddr = 0x0800_0000;
    const LIMIT: u32 = 0x10_0000;

    fn codeset() -> Arc<CodeSet> {
        let codeset = CodeSet::builder()
            .name("test")
            .program_id(0x0004_0000_0000_1000)
            .memory(vec![0u8; 0x1000].into())
            .code(Segment::new(0, CODE, 0x1000))
            .entrypoint(CODE)
            .build()
            .unwrap();
        Arc::new(codeset)
    }

    fn spawn(kernel: &Kernel, limit: u32) -> (Process, MockSpace, Arc<CommitLimit>) {
        let space = MockSpace::new();
        let limit = Arc::new(CommitLimit::new(limit));
        let process = kernel
            .create_process(codeset(), Box::new(space.clone()), limit.clone())
            .unwrap();
        (process, space, limit)
    }

    fn app_used(kernel: &Kernel) -> u32 {
        kernel.region(MemoryRegion::Application).used()
    }

    #[test]
    fn ids_strictly_increase() {
        let kernel = Kernel::default();
        let ids: Vec<u32> = (0..5).map(|_| spawn(&kernel, LIMIT).0.id()).collect();
        assert_eq!(ids, [10, 11, 12, 13, 14]);
        assert_eq!(kernel.next_process_id(), 15);
    }

    #[test]
    fn defaults() {
        let kernel = Kernel::default();
        let (process, _, _) = spawn(&kernel, LIMIT);
        assert_eq!(process.handle_table_size(), 0x200);
        assert_eq!(process.svc_access_mask().count_ones(), 0);
        assert_eq!(process.flags(), &ProcessFlags::default());
        assert_eq!((process.heap_start(), process.heap_end()), (HEAP, 0x1000_0000));
        assert_eq!(process.state(), State::Created);
        assert!(process.memory_region().is_none());

        assert_eq!(process.handle_type(), HandleType::Process);
        assert_eq!(process.type_name(), "Process");
        assert_eq!(Object::name(&process), "test");
    }

    #[test]
    fn run_maps_the_code_segment() {
        let kernel = Kernel::default();
        let (mut process, space, limit) = spawn(&kernel, LIMIT);
        let launcher = MockLauncher::default();

        process.run(0x30, 0, &launcher).unwrap();

        let log = space.log.lock();
        let maps: Vec<_> = log.maps().collect();
        assert_eq!(maps, [(&(CODE..CODE + 0x1000), Permissions::READ_EXECUTE)]);
        assert!(matches!(log.ops[0], Op::Map(_, _, Backing::Image { offset: 0, .. })));

        assert_eq!(
            *launcher.launched.lock(),
            [MainThread {
                process_id: process.id(),
                entrypoint: CODE,
                priority: 0x30,
                stack_top: 0x1000_0000,
                stack_size: 0,
            }]
        );
        assert_eq!(process.state(), State::Running);
        assert_eq!(process.misc_memory_used(), 0x1000);
        assert_eq!(limit.used(), 0x1000);
        assert_eq!(app_used(&kernel), 0x1000);
    }

    #[test]
    fn run_maps_stack_and_io() {
        let kernel = Kernel::default();
        let (mut process, space, _) = spawn(&kernel, LIMIT);
        process
            .parse_kernel_caps(&[0xFF91_EC00, 0xFF81_EC01, 0xFFE1_F000])
            .unwrap();
        process.run(0x30, 0x4000, &MockLauncher::default()).unwrap();

        let log = space.log.lock();
        let maps: Vec<_> = log.maps().map(|(r, p)| (r.clone(), p)).collect();
        assert_eq!(
            maps,
            [
                (CODE..CODE + 0x1000, Permissions::READ_EXECUTE),
                (0x0FFF_C000..0x1000_0000, Permissions::READ_WRITE),
                (0x1EC0_0000..0x1EC0_1000, Permissions::READ),
                (0x1F00_0000..0x1F00_1000, Permissions::READ_WRITE),
            ]
        );
        assert!(matches!(log.ops[2], Op::Map(_, _, Backing::Io { addr: 0x1EC0_0000 })));
        assert_eq!(process.misc_memory_used(), 0x5000);
        drop(log);

        // The stack is off limits for the heap.
        assert_eq!(
            process.heap_allocate(0x0FFF_F000, 0x1000, Permissions::READ_WRITE),
            Err(Error::INVALID_ADDRESS)
        );
    }

    #[test]
    fn run_checks_priority_and_state() {
        let kernel = Kernel::default();
        let (mut process, _, _) = spawn(&kernel, LIMIT);
        let launcher = MockLauncher::default();

        assert_eq!(process.run(0x10, 0, &launcher), Err(Error::PERMISSION_DENIED));
        assert_eq!(process.run(0x40, 0, &launcher), Err(Error::INVALID_ARGUMENT));
        assert_eq!(process.run(0x30, 0x800, &launcher), Err(Error::INVALID_SIZE));

        process.parse_kernel_caps(&[0xFF00_0110]).unwrap();
        process.run(0x10, 0, &launcher).unwrap();

        assert_eq!(process.run(0x30, 0, &launcher), Err(Error::INVALID_ARGUMENT));
        assert_eq!(
            process.parse_kernel_caps(&[0xFC00_0220]),
            Err(Error::INVALID_ARGUMENT)
        );
        assert_eq!(launcher.launched.lock().len(), 1);
    }

    #[test]
    fn run_rolls_back_on_failure() {
        let kernel = Kernel::default();
        let (mut process, space, limit) = spawn(&kernel, LIMIT);
        let launcher = MockLauncher::default();

        let heap = process
            .heap_allocate(0x0FFF_F000, 0x1000, Permissions::READ_WRITE)
            .unwrap();
        assert_eq!(process.run(0x30, 0x4000, &launcher), Err(Error::INVALID_ADDRESS));

        assert_eq!(space.log.lock().mapped, [heap..heap + 0x1000]);
        assert_eq!(process.misc_memory_used(), 0);
        assert_eq!(limit.used(), 0x1000);
        assert_eq!(app_used(&kernel), 0x1000);
        assert!(launcher.launched.lock().is_empty());
        assert_eq!(process.state(), State::Created);

        process.heap_free(heap, 0x1000).unwrap();
        process.run(0x30, 0x4000, &launcher).unwrap();
    }

    #[test]
    fn run_rolls_back_when_launch_fails() {
        let kernel = Kernel::default();
        let (mut process, space, limit) = spawn(&kernel, LIMIT);
        let launcher = MockLauncher {
            fail: true,
            ..MockLauncher::default()
        };

        assert_eq!(
            process.run(0x30, 0x1000, &launcher),
            Err(Error::RESOURCE_EXHAUSTED)
        );
        assert!(space.log.lock().mapped.is_empty());
        assert_eq!(process.misc_memory_used(), 0);
        assert_eq!(limit.used(), 0);
    }

    #[test]
    fn heap_allocations_ascend() {
        let kernel = Kernel::default();
        let (mut process, space, _) = spawn(&kernel, LIMIT);

        let a = process.heap_allocate(0, 0x1000, Permissions::READ_WRITE).unwrap();
        let b = process.heap_allocate(0, 0x1000, Permissions::READ_WRITE).unwrap();
        assert_eq!((a, b), (HEAP, HEAP + 0x1000));
        assert_eq!(process.heap_used(), 0x2000);

        let log = space.log.lock();
        assert!(matches!(
            log.ops[1],
            Op::Map(_, Permissions::READ_WRITE, Backing::Arena { offset: 0x1000, .. })
        ));
    }

    #[test]
    fn heap_containment() {
        let kernel = Kernel::default();
        let (mut process, _, _) = spawn(&kernel, LIMIT);
        let rw = Permissions::READ_WRITE;

        let end = process.heap_end();
        assert_eq!(process.heap_allocate(end - 0x1000, 0x1000, rw), Ok(end - 0x1000));
        assert_eq!(process.heap_allocate(end, 0x1000, rw), Err(Error::INVALID_ADDRESS));
        assert_eq!(
            process.heap_allocate(HEAP - 0x1000, 0x1000, rw),
            Err(Error::INVALID_ADDRESS)
        );
        assert_eq!(
            process.heap_allocate(end - 0x2000, 0x2000, rw),
            Err(Error::INVALID_ADDRESS)
        );
        assert_eq!(process.heap_allocate(0, 0x1800, rw), Err(Error::INVALID_SIZE));
        assert_eq!(process.heap_allocate(HEAP + 1, 0x1000, rw), Err(Error::INVALID_SIZE));

        let mut ranges = Vec::new();
        for size in [0x3000, 0x1000, 0x2000] {
            let addr = process.heap_allocate(0, size, rw).unwrap();
            assert!(HEAP <= addr && addr + size <= end);
            ranges.push(addr..addr + size);
        }
        for (i, a) in ranges.iter().enumerate() {
            for b in &ranges[i + 1..] {
                assert!(a.end <= b.start || b.end <= a.start);
            }
        }
    }

    #[test]
    fn heap_free_round_trip() {
        let kernel = Kernel::default();
        let (mut process, space, limit) = spawn(&kernel, LIMIT);
        let rw = Permissions::READ_WRITE;

        let a = process.heap_allocate(0, 0x2000, rw).unwrap();
        process.heap_free(a, 0x2000).unwrap();
        assert_eq!(process.heap_used(), 0);
        assert_eq!(limit.used(), 0);
        assert_eq!(app_used(&kernel), 0);
        assert!(space.log.lock().mapped.is_empty());
        assert!(process.heap_memory().is_empty());

        assert_eq!(process.heap_allocate(0, 0x1000, rw), Ok(a));
        assert_eq!(process.heap_free(a, 0x2000), Err(Error::INVALID_ADDRESS));
        assert_eq!(process.heap_free(a + 0x1000, 0x1000), Err(Error::INVALID_ADDRESS));
        assert_eq!(process.heap_free(a, 0), Err(Error::INVALID_SIZE));
        assert_eq!(process.heap_used(), 0x1000);
    }

    #[test]
    fn resource_limit_refusal() {
        let kernel = Kernel::default();
        let (mut process, space, limit) = spawn(&kernel, 0x1000);

        assert_eq!(
            process.heap_allocate(0, 0x2000, Permissions::READ_WRITE),
            Err(Error::RESOURCE_EXHAUSTED)
        );
        assert_eq!(process.heap_used(), 0);
        assert_eq!(limit.used(), 0);
        assert_eq!(app_used(&kernel), 0);
        assert!(space.log.lock().ops.is_empty());
        assert!(process.heap_memory().is_empty());
    }

    #[test]
    fn failed_map_rolls_back() {
        let kernel = Kernel::default();
        let space = MockSpace {
            fail_at: Some(HEAP),
            ..MockSpace::new()
        };
        let limit = Arc::new(CommitLimit::new(LIMIT));
        let mut process = kernel
            .create_process(codeset(), Box::new(space), limit.clone())
            .unwrap();

        assert_eq!(
            process.heap_allocate(0, 0x1000, Permissions::READ_WRITE),
            Err(Error::INVALID_ADDRESS)
        );
        assert_eq!(process.heap_used(), 0);
        assert_eq!(limit.used(), 0);
        assert!(process.heap_memory().is_empty());
    }

    #[test]
    fn linear_heap_base_follows_kernel_version() {
        let kernel = Kernel::default();

        let (process, _, _) = spawn(&kernel, LIMIT);
        assert_eq!(process.linear_heap_base(), 0x1400_0000);
        assert_eq!(process.linear_heap_limit(), 0x1800_0000);

        let (mut process, _, _) = spawn(&kernel, LIMIT);
        process.parse_kernel_caps(&[0xFC00_022C]).unwrap();
        assert_eq!(process.linear_heap_base(), 0x3000_0000);

        let (mut process, _, _) = spawn(&kernel, LIMIT);
        process
            .parse_kernel_caps(&[0xFC00_022C, 0xFF00_0300])
            .unwrap();
        assert_eq!(process.linear_heap_base(), 0x36C0_0000);
        assert_eq!(process.linear_heap_limit(), 0x3800_0000);

        let addr = process
            .linear_allocate(0, 0x1000, Permissions::READ_WRITE)
            .unwrap();
        assert_eq!(addr, 0x36C0_0000);
        assert_eq!(process.linear_heap_used(), 0x1000);
        assert_eq!(process.heap_used(), 0);
        assert_eq!(kernel.region(MemoryRegion::Base).used(), 0x1000);

        process.linear_free(addr, 0x1000).unwrap();
        assert_eq!(process.linear_heap_used(), 0);
        assert_eq!(kernel.region(MemoryRegion::Base).used(), 0);
    }

    #[test]
    fn linear_heap_region_exhaustion() {
        let config = KernelConfig::builder()
            .memory_regions([(0, 0x4000), (0x4000, 0x4000), (0x8000, 0x4000)])
            .build()
            .unwrap();
        let kernel = Kernel::new(config);
        let (mut a, _, limit_a) = spawn(&kernel, LIMIT);
        let (mut b, _, limit_b) = spawn(&kernel, LIMIT);
        let rw = Permissions::READ_WRITE;

        a.linear_allocate(0, 0x3000, rw).unwrap();
        // The region is shared, so the other process only finds one page.
        assert_eq!(b.linear_allocate(0, 0x2000, rw), Err(Error::OUT_OF_MEMORY));
        assert_eq!(b.linear_allocate(0, 0x1000, rw), Ok(0x1400_0000));

        assert_eq!(a.linear_allocate(0, 0x1000, rw), Err(Error::OUT_OF_MEMORY));
        assert_eq!(a.heap_allocate(0, 0x1000, rw), Err(Error::OUT_OF_MEMORY));
        assert_eq!(limit_a.used(), 0x3000);
        assert_eq!(limit_b.used(), 0x1000);
        assert_eq!(a.linear_heap_used(), 0x3000);
        assert_eq!(app_used(&kernel), 0x4000);
    }

    #[test]
    fn tls_slots() {
        let kernel = Kernel::default();
        let (mut process, _, limit) = spawn(&kernel, LIMIT);

        assert_eq!(process.allocate_tls(), Ok((0, 0x1FF8_2000)));
        assert_eq!(process.allocate_tls(), Ok((1, 0x1FF8_2200)));
        assert_eq!(process.misc_memory_used(), 0x400);
        assert_eq!(limit.used(), 0x400);

        process.free_tls(0).unwrap();
        assert_eq!(process.free_tls(0), Err(Error::INVALID_ARGUMENT));
        assert_eq!(process.free_tls(300), Err(Error::INVALID_ARGUMENT));
        assert_eq!(process.allocate_tls(), Ok((0, 0x1FF8_2000)));
        assert_eq!(process.tls().count(), 2);
    }

    #[test]
    fn tls_exhaustion() {
        let kernel = Kernel::default();
        let (mut process, _, _) = spawn(&kernel, LIMIT);
        for i in 0..SlotBitmap::CAPACITY {
            assert_eq!(process.allocate_tls().map(|(index, _)| index), Ok(i));
        }
        assert_eq!(process.allocate_tls(), Err(Error::RESOURCE_EXHAUSTED));
        process.free_tls(42).unwrap();
        assert_eq!(process.allocate_tls().map(|(index, _)| index), Ok(42));
    }

    #[test]
    fn kernel_caps() {
        let kernel = Kernel::default();
        let (mut process, _, _) = spawn(&kernel, LIMIT);
        process.parse_kernel_caps(&[0xF100_0001]).unwrap();
        let set: Vec<usize> = process.svc_access_mask().iter_ones().collect();
        assert_eq!(set, [24]);

        let words: Vec<u32> = (0..9u32)
            .flat_map(|i| [0xFF80_0100 + i * 2, 0xFF80_0101 + i * 2])
            .collect();
        assert_eq!(process.parse_kernel_caps(&words), Err(Error::CAPABILITY_ERROR));
        assert_eq!(process.address_mappings().len(), 8);
    }

    #[test]
    fn kernel_caps_refused_after_commit() {
        let kernel = Kernel::default();
        let (mut process, _, _) = spawn(&kernel, LIMIT);
        process
            .heap_allocate(0, 0x1000, Permissions::READ_WRITE)
            .unwrap();
        assert_eq!(
            process.parse_kernel_caps(&[0xFC00_022C, 0xFF00_0300]),
            Err(Error::INVALID_ARGUMENT)
        );
        assert_eq!(process.kernel_version(), 0);
        assert_eq!(process.flags().memory_region, MemoryRegion::Application);

        let addr = process
            .linear_allocate(0, 0x1000, Permissions::READ_WRITE)
            .unwrap();
        assert_eq!(addr, 0x1400_0000);
        assert_eq!(kernel.region(MemoryRegion::Base).used(), 0);
        assert_eq!(app_used(&kernel), 0x2000);

        let (mut process, _, _) = spawn(&kernel, LIMIT);
        process.allocate_tls().unwrap();
        assert_eq!(
            process.parse_kernel_caps(&[0xF100_0001]),
            Err(Error::INVALID_ARGUMENT)
        );
    }

    #[test]
    fn kernel_caps_from_bytes() {
        let kernel = Kernel::default();
        let (mut process, _, _) = spawn(&kernel, LIMIT);
        let bytes: Vec<u8> = [0xFC00_0220u32, 0xFE00_0100]
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect();
        process.parse_kernel_caps_bytes(&bytes).unwrap();
        assert_eq!(process.kernel_version(), 0x0220);
        assert_eq!(process.handle_table_size(), 0x100);

        assert_eq!(
            process.parse_kernel_caps_bytes(&bytes[..3]),
            Err(Error::CAPABILITY_ERROR)
        );
    }

    #[test]
    fn drop_returns_everything() {
        let kernel = Kernel::default();
        let (mut process, space, limit) = spawn(&kernel, LIMIT);
        let rw = Permissions::READ_WRITE;

        process.heap_allocate(0, 0x3000, rw).unwrap();
        process.heap_free(HEAP + 0x1000, 0x1000).unwrap();
        process.linear_allocate(0, 0x2000, rw).unwrap();
        process.allocate_tls().unwrap();
        process.run(0x30, 0x2000, &MockLauncher::default()).unwrap();
        assert_eq!(limit.used(), 0x2000 + 0x2000 + 0x200 + 0x1000 + 0x2000);

        let codeset = Arc::clone(process.codeset());
        assert_eq!(space.log.lock().mapped_bytes(), 0x2000 + 0x2000 + 0x1000 + 0x2000);
        drop(process);

        let log = space.log.lock();
        assert_eq!(log.mapped_bytes(), 0);
        assert!(log.unmaps().any(|range| *range == (HEAP..HEAP + 0x1000)));
        drop(log);
        assert_eq!(limit.used(), 0);
        assert_eq!(app_used(&kernel), 0);
        assert_eq!(Arc::strong_count(&codeset), 1);
    }
}
