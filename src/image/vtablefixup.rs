//! `VTableFixups` directory entries.
//!
//! The CLR header of a mixed-mode module points to an array of 8-byte `VTableFixup` records
//! (ECMA-335 II.25.3.3.3). Each record names a run of `count` vtable slots at `rva`; before
//! activation every slot holds the metadata token of its method, afterwards it holds the
//! resolved entry point. Only runs marked [`VTableFixupFlags::FROM_UNMANAGED`] are reached
//! from native callers through fixup thunks.

use bitflags::bitflags;

use crate::{file::parser::Parser, Result};

bitflags! {
    /// The `Type` field of a `VTableFixup` record (`COR_VTABLE_*`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VTableFixupFlags: u16 {
        /// Slots are 32 bits wide
        const SLOT_32BIT = 0x01;
        /// Slots are 64 bits wide
        const SLOT_64BIT = 0x02;
        /// Slots are called from unmanaged code and need a transition thunk
        const FROM_UNMANAGED = 0x04;
        /// Like `FROM_UNMANAGED`, keeping the caller's application domain
        const FROM_UNMANAGED_RETAIN_APPDOMAIN = 0x08;
        /// Call the most derived override of the method
        const CALL_MOST_DERIVED = 0x10;
    }
}

/// One record of the `VTableFixups` directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VTableFixup {
    /// RVA of the first slot of this run
    pub rva: u32,
    /// Number of slots in the run
    pub count: u16,
    /// Slot width and calling flags
    pub flags: VTableFixupFlags,
}

impl VTableFixup {
    /// On-disk size of one record.
    pub const SIZE: usize = 8;

    /// Reads every record of a `VTableFixups` directory.
    ///
    /// # Arguments
    /// * `data` - The directory contents, `vtable_fixups_size` bytes starting at `vtable_fixups_rva`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the directory size is not a multiple of the record
    /// size, if a run with slots has a zero RVA, or if a record does not declare exactly one
    /// slot width.
    pub fn read_all(data: &[u8]) -> Result<Vec<VTableFixup>> {
        if data.len() % Self::SIZE != 0 {
            return Err(malformed_error!(
                "VTableFixups directory size {} is not a multiple of {}",
                data.len(),
                Self::SIZE
            ));
        }

        let mut parser = Parser::new(data);
        let mut fixups = Vec::with_capacity(data.len() / Self::SIZE);

        while parser.has_more_data() {
            fixups.push(Self::read(&mut parser)?);
        }

        Ok(fixups)
    }

    fn read(parser: &mut Parser<'_>) -> Result<VTableFixup> {
        let rva = parser.read_le::<u32>()?;
        let count = parser.read_le::<u16>()?;
        let flags = VTableFixupFlags::from_bits_retain(parser.read_le::<u16>()?);

        let wide = flags.contains(VTableFixupFlags::SLOT_64BIT);
        let narrow = flags.contains(VTableFixupFlags::SLOT_32BIT);
        if wide == narrow {
            return Err(malformed_error!(
                "VTableFixup at 0x{:08X} must be exactly one of 32 or 64 bit - type 0x{:04X}",
                rva,
                flags.bits()
            ));
        }

        if rva == 0 && count != 0 {
            return Err(malformed_error!(
                "VTableFixup with {} slots has a zero RVA",
                count
            ));
        }

        Ok(VTableFixup { rva, count, flags })
    }

    /// Width of one slot in bytes.
    #[must_use]
    pub fn slot_width(&self) -> u32 {
        if self.flags.contains(VTableFixupFlags::SLOT_64BIT) {
            8
        } else {
            4
        }
    }

    /// Returns `true` if native code reaches these slots through fixup thunks.
    #[must_use]
    pub fn is_from_unmanaged(&self) -> bool {
        self.flags.intersects(
            VTableFixupFlags::FROM_UNMANAGED | VTableFixupFlags::FROM_UNMANAGED_RETAIN_APPDOMAIN,
        )
    }

    /// RVAs of the individual slots of this run.
    pub fn slot_rvas(&self) -> impl Iterator<Item = u32> + '_ {
        let width = self.slot_width();
        (0..u32::from(self.count)).map(move |index| self.rva.wrapping_add(index * width))
    }
}
