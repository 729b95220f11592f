//! Mixed-mode image reading.
//!
//! A mixed-mode (IJW) module describes its patchable call sites in the `VTableFixups`
//! directory of its CLR header. [`MixedModeImage`] loads the PE, reads the header and the
//! directory, and reads the metadata token that sits in every slot before activation. The
//! resulting [`DeclaredSlot`] list is what [`crate::Activator::attach_image`] declares to the
//! module activation table.
//!
//! # Key Components
//!
//! - [`MixedModeImage`] - Parsed image with its fixup runs and declared slots
//! - [`cor20header::Cor20Header`] - The CLR runtime header
//! - [`vtablefixup::VTableFixup`] - One run of vtable slots
//! - [`Token`] - Metadata token stored in an unpatched slot
//!
//! # Examples
//!
//! ```rust,no_run
//! use ijwhost::image::MixedModeImage;
//! use std::path::Path;
//!
//! let image = MixedModeImage::from_file(Path::new("IjwNativeDll.dll"))?;
//! for slot in image.slots() {
//!     println!("slot {} -> {}", slot.slot, slot.token);
//! }
//! # Ok::<(), ijwhost::Error>(())
//! ```

pub mod cor20header;
pub mod token;
pub mod vtablefixup;

use std::path::Path;

pub use cor20header::{Cor20Header, COMIMAGE_FLAGS_ILONLY, COMIMAGE_FLAGS_NATIVE_ENTRYPOINT};
pub use token::Token;
pub use vtablefixup::{VTableFixup, VTableFixupFlags};

use crate::{activation::SlotId, file::io::read_le, File, Result};

/// A vtable slot declared by a module image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclaredSlot {
    /// Slot identity, the RVA of the vtable entry
    pub slot: SlotId,
    /// The metadata token stored in the entry
    pub token: Token,
    /// Flags of the fixup run the slot belongs to
    pub flags: VTableFixupFlags,
}

impl DeclaredSlot {
    /// Returns `true` if native code reaches this slot through a fixup thunk.
    #[must_use]
    pub fn is_from_unmanaged(&self) -> bool {
        self.flags.intersects(
            VTableFixupFlags::FROM_UNMANAGED | VTableFixupFlags::FROM_UNMANAGED_RETAIN_APPDOMAIN,
        )
    }
}

/// A loaded mixed-mode module image.
pub struct MixedModeImage {
    file: File,
    header: Cor20Header,
    fixups: Vec<VTableFixup>,
    slots: Vec<DeclaredSlot>,
}

impl MixedModeImage {
    /// Loads and reads an image from disk.
    ///
    /// # Errors
    /// Returns an error if the file cannot be loaded as a PE with a CLR header, or if the
    /// header or fixup directory is malformed.
    pub fn from_file(path: &Path) -> Result<MixedModeImage> {
        Self::from_parsed(File::from_file(path)?)
    }

    /// Loads and reads an image from a memory buffer.
    ///
    /// # Errors
    /// See [`MixedModeImage::from_file`].
    pub fn from_mem(data: Vec<u8>) -> Result<MixedModeImage> {
        Self::from_parsed(File::from_mem(data)?)
    }

    /// Reads the CLR header, fixup directory and slot tokens of an already loaded file.
    ///
    /// # Errors
    /// See [`MixedModeImage::from_file`].
    pub fn from_parsed(file: File) -> Result<MixedModeImage> {
        let (clr_rva, clr_size) = file.clr();
        if clr_size < Cor20Header::SIZE {
            return Err(malformed_error!(
                "CLR runtime header directory too small - {} bytes",
                clr_size
            ));
        }

        let clr_offset = file.rva_to_offset(clr_rva)?;
        let header = Cor20Header::read(file.data_slice(clr_offset, Cor20Header::SIZE)?)?;

        let fixups = if header.has_vtable_fixups() {
            let offset = file.rva_to_offset(header.vtable_fixups_rva as usize)?;
            VTableFixup::read_all(file.data_slice(offset, header.vtable_fixups_size as usize)?)?
        } else {
            Vec::new()
        };

        let mut slots = Vec::new();
        for fixup in &fixups {
            for rva in fixup.slot_rvas() {
                let offset = file.rva_to_offset(rva as usize)?;
                // 64-bit slots keep the token in their low half
                let token = read_le::<u32>(file.data_slice(offset, fixup.slot_width() as usize)?)?;
                slots.push(DeclaredSlot {
                    slot: SlotId::new(rva),
                    token: Token::new(token),
                    flags: fixup.flags,
                });
            }
        }

        Ok(MixedModeImage {
            file,
            header,
            fixups,
            slots,
        })
    }

    /// The underlying PE file.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    /// The CLR runtime header.
    #[must_use]
    pub fn header(&self) -> &Cor20Header {
        &self.header
    }

    /// The fixup runs of the `VTableFixups` directory.
    #[must_use]
    pub fn fixups(&self) -> &[VTableFixup] {
        &self.fixups
    }

    /// Every slot of every fixup run, in directory order.
    #[must_use]
    pub fn slots(&self) -> &[DeclaredSlot] {
        &self.slots
    }

    /// The slots native callers reach through fixup thunks.
    pub fn unmanaged_slots(&self) -> impl Iterator<Item = &DeclaredSlot> {
        self.slots.iter().filter(|slot| slot.is_from_unmanaged())
    }

    /// Looks up the declared slot at `slot`.
    #[must_use]
    pub fn slot(&self, slot: SlotId) -> Option<&DeclaredSlot> {
        self.slots.iter().find(|declared| declared.slot == slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::MixedModeImageBuilder;

    #[test]
    fn declared_slots() {
        let bytes = MixedModeImageBuilder::new()
            .fixup(VTableFixupFlags::SLOT_32BIT | VTableFixupFlags::FROM_UNMANAGED, &[0x0600_0001, 0x0600_0002])
            .fixup(VTableFixupFlags::SLOT_64BIT, &[0x0600_0003])
            .build();

        let image = MixedModeImage::from_mem(bytes).unwrap();

        assert_eq!(image.header().cb, 72);
        assert_eq!(image.fixups().len(), 2);
        assert_eq!(image.slots().len(), 3);
        assert_eq!(image.unmanaged_slots().count(), 2);

        let first = image.fixups()[0];
        let slot = image.slot(SlotId::new(first.rva)).unwrap();
        assert_eq!(slot.token, Token::new(0x0600_0001));
        assert!(slot.is_from_unmanaged());

        let second = image.slot(SlotId::new(first.rva + 4)).unwrap();
        assert_eq!(second.token, Token::new(0x0600_0002));

        let wide = image.fixups()[1];
        let slot = image.slot(SlotId::new(wide.rva)).unwrap();
        assert_eq!(slot.token, Token::new(0x0600_0003));
        assert!(!slot.is_from_unmanaged());
    }

    #[test]
    fn no_fixups() {
        let image = MixedModeImage::from_mem(MixedModeImageBuilder::new().build()).unwrap();
        assert!(image.fixups().is_empty());
        assert!(image.slots().is_empty());
        assert!(image.slot(SlotId::new(0x1100)).is_none());
    }

    #[test]
    fn from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IjwNativeDll.dll");
        let bytes = MixedModeImageBuilder::new()
            .fixup(VTableFixupFlags::SLOT_32BIT | VTableFixupFlags::FROM_UNMANAGED, &[0x0600_0007])
            .build();
        std::fs::write(&path, bytes).unwrap();

        let image = MixedModeImage::from_file(&path).unwrap();
        assert_eq!(image.slots()[0].token.row(), 7);
        assert!(!image.file().is_pe32_plus());
    }
}
