//! Shared helpers for the unit tests: a scriptable execution host and a builder for minimal
//! mixed-mode PE images.

use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::{
    activation::{SlotId, Target},
    host::{ExecutionHost, HostError, HostHandle, ResolveRequest},
    image::VTableFixupFlags,
};

/// The managed entry point every [`MockHost`] slot resolves to unless told otherwise.
pub extern "C" fn entry_100() -> i32 {
    100
}

/// An [`ExecutionHost`] that counts its calls and fails on demand.
pub struct MockHost {
    bring_ups: AtomicUsize,
    resolves: AtomicUsize,
    failing_bring_ups: AtomicUsize,
    failing_resolves: AtomicUsize,
    bring_up_delay_ms: AtomicU64,
    resolve_error: Mutex<Option<HostError>>,
    targets: DashMap<SlotId, Target>,
    per_slot: DashMap<SlotId, usize>,
    last_request: Mutex<Option<ResolveRequest>>,
}

impl MockHost {
    pub fn new() -> Arc<MockHost> {
        Arc::new(MockHost {
            bring_ups: AtomicUsize::new(0),
            resolves: AtomicUsize::new(0),
            failing_bring_ups: AtomicUsize::new(0),
            failing_resolves: AtomicUsize::new(0),
            bring_up_delay_ms: AtomicU64::new(0),
            resolve_error: Mutex::new(None),
            targets: DashMap::new(),
            per_slot: DashMap::new(),
            last_request: Mutex::new(None),
        })
    }

    pub fn fail_next_bring_ups(&self, count: usize) {
        self.failing_bring_ups.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_resolves(&self, count: usize) {
        self.failing_resolves.store(count, Ordering::SeqCst);
    }

    /// Every resolve fails with `error` until cleared.
    pub fn set_resolve_error(&self, error: HostError) {
        *self.resolve_error.lock() = Some(error);
    }

    pub fn set_bring_up_delay(&self, delay: Duration) {
        self.bring_up_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_target(&self, slot: SlotId, target: Target) {
        self.targets.insert(slot, target);
    }

    pub fn bring_ups(&self) -> usize {
        self.bring_ups.load(Ordering::SeqCst)
    }

    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    pub fn resolves_of(&self, slot: SlotId) -> usize {
        self.per_slot.get(&slot).map_or(0, |count| *count)
    }

    pub fn last_request(&self) -> Option<ResolveRequest> {
        *self.last_request.lock()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl ExecutionHost for MockHost {
    fn ensure_started(&self) -> Result<HostHandle, HostError> {
        self.bring_ups.fetch_add(1, Ordering::SeqCst);

        let delay = self.bring_up_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }

        if Self::take_failure(&self.failing_bring_ups) {
            return Err(HostError::with_code(
                "bring-up failure injected",
                0x8000_8083_u32 as i32,
            ));
        }
        HostHandle::from_raw(0x4000).ok_or_else(|| HostError::new("null handle"))
    }

    fn resolve(&self, _host: HostHandle, request: &ResolveRequest) -> Result<Target, HostError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        *self.per_slot.entry(request.slot).or_insert(0) += 1;
        *self.last_request.lock() = Some(*request);

        if let Some(error) = self.resolve_error.lock().clone() {
            return Err(error);
        }
        if Self::take_failure(&self.failing_resolves) {
            return Err(HostError::new("resolve failure injected"));
        }

        match self.targets.get(&request.slot) {
            Some(target) => Ok(*target),
            None => Target::from_address(entry_100 as extern "C" fn() -> i32 as usize)
                .ok_or_else(|| HostError::new("null entry point")),
        }
    }
}

const SECTION_RVA: u32 = 0x1000;
const SECTION_OFFSET: usize = 0x200;
const SECTION_SIZE: usize = 0x400;
const FIXUPS_RVA: u32 = 0x1080;
const SLOTS_RVA: u32 = 0x1100;
const METADATA_RVA: u32 = 0x1380;

/// Builds a minimal PE32 mixed-mode image.
///
/// Layout: one `.text` section at RVA 0x1000 / file offset 0x200 holding the CLR header at its
/// start, the `VTableFixups` directory at 0x1080, and the slots from 0x1100 on, each run
/// aligned to 8 bytes.
pub struct MixedModeImageBuilder {
    image_base: u32,
    clr_header: bool,
    fixups: Vec<(VTableFixupFlags, Vec<u32>)>,
}

impl MixedModeImageBuilder {
    pub fn new() -> Self {
        MixedModeImageBuilder {
            image_base: 0x1000_0000,
            clr_header: true,
            fixups: Vec::new(),
        }
    }

    pub fn without_clr_header(mut self) -> Self {
        self.clr_header = false;
        self
    }

    /// Adds a fixup run whose slots hold `tokens`.
    pub fn fixup(mut self, flags: VTableFixupFlags, tokens: &[u32]) -> Self {
        self.fixups.push((flags, tokens.to_vec()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut pe = Vec::new();

        // DOS header
        pe.extend_from_slice(b"MZ");
        pe.resize(0x3C, 0);
        pe.extend_from_slice(&0x80u32.to_le_bytes()); // e_lfanew
        pe.resize(0x80, 0);

        // PE signature
        pe.extend_from_slice(b"PE\0\0");

        // COFF header
        pe.extend_from_slice(&0x014Cu16.to_le_bytes()); // Machine: i386
        pe.extend_from_slice(&1u16.to_le_bytes()); // NumberOfSections
        pe.extend_from_slice(&0u32.to_le_bytes()); // TimeDateStamp
        pe.extend_from_slice(&0u32.to_le_bytes()); // PointerToSymbolTable
        pe.extend_from_slice(&0u32.to_le_bytes()); // NumberOfSymbols
        pe.extend_from_slice(&0x00E0u16.to_le_bytes()); // SizeOfOptionalHeader
        pe.extend_from_slice(&0x2102u16.to_le_bytes()); // Characteristics: executable, 32-bit, DLL

        // Optional header (PE32)
        pe.extend_from_slice(&0x010Bu16.to_le_bytes()); // Magic
        pe.extend_from_slice(&[0u8; 2]); // Linker version
        pe.extend_from_slice(&(SECTION_SIZE as u32).to_le_bytes()); // SizeOfCode
        pe.extend_from_slice(&0u32.to_le_bytes()); // SizeOfInitializedData
        pe.extend_from_slice(&0u32.to_le_bytes()); // SizeOfUninitializedData
        pe.extend_from_slice(&0u32.to_le_bytes()); // AddressOfEntryPoint
        pe.extend_from_slice(&SECTION_RVA.to_le_bytes()); // BaseOfCode
        pe.extend_from_slice(&0x2000u32.to_le_bytes()); // BaseOfData

        pe.extend_from_slice(&self.image_base.to_le_bytes()); // ImageBase
        pe.extend_from_slice(&0x1000u32.to_le_bytes()); // SectionAlignment
        pe.extend_from_slice(&0x200u32.to_le_bytes()); // FileAlignment
        pe.extend_from_slice(&6u16.to_le_bytes()); // MajorOperatingSystemVersion
        pe.extend_from_slice(&0u16.to_le_bytes()); // MinorOperatingSystemVersion
        pe.extend_from_slice(&0u16.to_le_bytes()); // MajorImageVersion
        pe.extend_from_slice(&0u16.to_le_bytes()); // MinorImageVersion
        pe.extend_from_slice(&6u16.to_le_bytes()); // MajorSubsystemVersion
        pe.extend_from_slice(&0u16.to_le_bytes()); // MinorSubsystemVersion
        pe.extend_from_slice(&0u32.to_le_bytes()); // Win32VersionValue
        pe.extend_from_slice(&0x2000u32.to_le_bytes()); // SizeOfImage
        pe.extend_from_slice(&0x200u32.to_le_bytes()); // SizeOfHeaders
        pe.extend_from_slice(&0u32.to_le_bytes()); // CheckSum
        pe.extend_from_slice(&3u16.to_le_bytes()); // Subsystem: console
        pe.extend_from_slice(&0x8160u16.to_le_bytes()); // DllCharacteristics
        pe.extend_from_slice(&0x100000u32.to_le_bytes()); // SizeOfStackReserve
        pe.extend_from_slice(&0x1000u32.to_le_bytes()); // SizeOfStackCommit
        pe.extend_from_slice(&0x100000u32.to_le_bytes()); // SizeOfHeapReserve
        pe.extend_from_slice(&0x1000u32.to_le_bytes()); // SizeOfHeapCommit
        pe.extend_from_slice(&0u32.to_le_bytes()); // LoaderFlags
        pe.extend_from_slice(&16u32.to_le_bytes()); // NumberOfRvaAndSizes

        // Data directories 0-13
        pe.extend_from_slice(&[0u8; 14 * 8]);
        // 14: CLR runtime header
        if self.clr_header {
            pe.extend_from_slice(&SECTION_RVA.to_le_bytes());
            pe.extend_from_slice(&72u32.to_le_bytes());
        } else {
            pe.extend_from_slice(&[0u8; 8]);
        }
        // 15: reserved
        pe.extend_from_slice(&[0u8; 8]);

        // .text section header
        pe.extend_from_slice(b".text\0\0\0");
        pe.extend_from_slice(&(SECTION_SIZE as u32).to_le_bytes()); // VirtualSize
        pe.extend_from_slice(&SECTION_RVA.to_le_bytes()); // VirtualAddress
        pe.extend_from_slice(&(SECTION_SIZE as u32).to_le_bytes()); // SizeOfRawData
        pe.extend_from_slice(&(SECTION_OFFSET as u32).to_le_bytes()); // PointerToRawData
        pe.extend_from_slice(&[0u8; 12]);
        pe.extend_from_slice(&0x6000_0020u32.to_le_bytes()); // CODE | EXECUTE | READ

        pe.resize(SECTION_OFFSET + SECTION_SIZE, 0);

        let at = |rva: u32| SECTION_OFFSET + (rva - SECTION_RVA) as usize;

        // Fixup directory and slots
        let mut directory = Vec::new();
        let mut slot_rva = SLOTS_RVA;
        for (flags, tokens) in &self.fixups {
            let width: u32 = if flags.contains(VTableFixupFlags::SLOT_64BIT) { 8 } else { 4 };

            directory.extend_from_slice(&slot_rva.to_le_bytes());
            directory.extend_from_slice(&(tokens.len() as u16).to_le_bytes());
            directory.extend_from_slice(&flags.bits().to_le_bytes());

            for token in tokens {
                let offset = at(slot_rva);
                pe[offset..offset + 4].copy_from_slice(&token.to_le_bytes());
                slot_rva += width;
            }
            slot_rva = (slot_rva + 7) & !7;
        }
        assert!(slot_rva <= METADATA_RVA, "too many fixup slots for the test image");
        assert!(
            directory.len() <= (SLOTS_RVA - FIXUPS_RVA) as usize,
            "too many fixup runs for the test image"
        );
        let offset = at(FIXUPS_RVA);
        pe[offset..offset + directory.len()].copy_from_slice(&directory);

        // CLR header
        let (fixups_rva, fixups_size) = if directory.is_empty() {
            (0u32, 0u32)
        } else {
            (FIXUPS_RVA, directory.len() as u32)
        };

        let mut header = Vec::with_capacity(72);
        header.extend_from_slice(&72u32.to_le_bytes()); // cb
        header.extend_from_slice(&2u16.to_le_bytes()); // MajorRuntimeVersion
        header.extend_from_slice(&5u16.to_le_bytes()); // MinorRuntimeVersion
        header.extend_from_slice(&METADATA_RVA.to_le_bytes()); // MetaData
        header.extend_from_slice(&0x10u32.to_le_bytes());
        header.extend_from_slice(&0x10u32.to_le_bytes()); // Flags: NATIVE_ENTRYPOINT
        header.extend_from_slice(&0u32.to_le_bytes()); // EntryPoint
        header.extend_from_slice(&[0u8; 8]); // Resources
        header.extend_from_slice(&[0u8; 8]); // StrongNameSignature
        header.extend_from_slice(&[0u8; 8]); // CodeManagerTable
        header.extend_from_slice(&fixups_rva.to_le_bytes()); // VTableFixups
        header.extend_from_slice(&fixups_size.to_le_bytes());
        header.extend_from_slice(&[0u8; 8]); // ExportAddressTableJumps
        header.extend_from_slice(&[0u8; 8]); // ManagedNativeHeader

        let offset = at(SECTION_RVA);
        pe[offset..offset + header.len()].copy_from_slice(&header);

        pe
    }
}
