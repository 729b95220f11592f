//! CLR 2.0 (Cor20) header parsing for mixed-mode modules.
//!
//! This module defines the [`Cor20Header`] struct, which represents the main header of a
//! managed or mixed-mode image as found in the `IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR` data
//! directory of PE files. For activation only the `VTableFixups` directory matters, the other
//! fields are validated so that garbage never reaches the fixup reader.
//!
//! # Reference
//! - [ECMA-335 II.25.3.3](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use crate::{file::parser::Parser, Error::OutOfBounds, Result};

/// `COMIMAGE_FLAGS_ILONLY`: the image contains no native code.
pub const COMIMAGE_FLAGS_ILONLY: u32 = 0x0000_0001;
/// `COMIMAGE_FLAGS_NATIVE_ENTRYPOINT`: the entry point field is an RVA, not a token.
pub const COMIMAGE_FLAGS_NATIVE_ENTRYPOINT: u32 = 0x0000_0010;

/// The CLR runtime header, the 72-byte structure the `COM_DESCRIPTOR` data directory of a
/// managed or mixed-mode PE points to.
///
/// Directory pairs (`*_rva` / `*_size`) are either both zero or both set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cor20Header {
    /// Header size, always 72
    pub cb: u32,
    /// Major version of the runtime the image targets
    pub major_runtime_version: u16,
    /// Minor version of the runtime the image targets
    pub minor_runtime_version: u16,
    /// Location of the metadata root
    pub meta_data_rva: u32,
    /// Length of the metadata
    pub meta_data_size: u32,
    /// `COMIMAGE_FLAGS_*` bits
    pub flags: u32,
    /// Entry point, a metadata token or (with `COMIMAGE_FLAGS_NATIVE_ENTRYPOINT`) an RVA
    pub entry_point_token: u32,
    /// Location of managed resources
    pub resource_rva: u32,
    /// Length of managed resources
    pub resource_size: u32,
    /// Location of the strong name signature
    pub strong_name_signature_rva: u32,
    /// Length of the strong name signature
    pub strong_name_signature_size: u32,
    /// Location of the `VTableFixups` directory
    pub vtable_fixups_rva: u32,
    /// Length of the `VTableFixups` directory, a multiple of 8
    pub vtable_fixups_size: u32,
    /// Precompiled image header, zero for images produced by a C++/CLI compiler
    pub managed_native_header_rva: u32,
    /// Length of the precompiled image header
    pub managed_native_header_size: u32,
}

/// Reads an `rva` / `size` pair that must be either fully absent or fully present.
fn read_directory(parser: &mut Parser<'_>, name: &str) -> Result<(u32, u32)> {
    let rva = parser.read_le::<u32>()?;
    let size = parser.read_le::<u32>()?;
    if (rva == 0) != (size == 0) {
        return Err(malformed_error!(
            "{} directory is half set - rva 0x{:08X}, size {}",
            name,
            rva,
            size
        ));
    }
    Ok((rva, size))
}

/// Reads an `rva` / `size` pair that ECMA-335 reserves and requires to be zero.
fn read_reserved(parser: &mut Parser<'_>, name: &str) -> Result<()> {
    let rva = parser.read_le::<u32>()?;
    let size = parser.read_le::<u32>()?;
    if rva != 0 || size != 0 {
        return Err(malformed_error!("{} is reserved and must be zero", name));
    }
    Ok(())
}

impl Cor20Header {
    /// Size of the header on disk.
    pub const SIZE: usize = 72;

    /// Reads and validates a header from the start of `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than [`Cor20Header::SIZE`],
    /// and [`crate::Error::Malformed`] if a field violates ECMA-335 II.25.3.3.
    pub fn read(data: &[u8]) -> Result<Cor20Header> {
        // ECMA-335 flags plus TRACKDEBUGDATA / 32BITPREFERRED written by current toolchains
        const VALID_FLAGS: u32 = 0x0003_001F;
        const MAX_METADATA: u32 = 0x1000_0000;

        if data.len() < Self::SIZE {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(data);

        let cb = parser.read_le::<u32>()?;
        if cb as usize != Self::SIZE {
            return Err(malformed_error!("CLR header claims {} bytes instead of 72", cb));
        }

        let major_runtime_version = parser.read_le::<u16>()?;
        let minor_runtime_version = parser.read_le::<u16>()?;
        if !(1..=10).contains(&major_runtime_version) {
            return Err(malformed_error!(
                "Unknown runtime version {}.{}",
                major_runtime_version,
                minor_runtime_version
            ));
        }

        let meta_data_rva = parser.read_le::<u32>()?;
        let meta_data_size = parser.read_le::<u32>()?;
        if meta_data_rva == 0 || meta_data_size == 0 || meta_data_size > MAX_METADATA {
            return Err(malformed_error!(
                "Metadata directory out of range - rva 0x{:08X}, size {}",
                meta_data_rva,
                meta_data_size
            ));
        }

        let flags = parser.read_le::<u32>()?;
        if flags & !VALID_FLAGS != 0 {
            return Err(malformed_error!("Undefined CLR header flags 0x{:08X}", flags));
        }

        let entry_point_token = parser.read_le::<u32>()?;
        let (resource_rva, resource_size) = read_directory(&mut parser, "Resources")?;
        let (strong_name_signature_rva, strong_name_signature_size) =
            read_directory(&mut parser, "StrongNameSignature")?;
        read_reserved(&mut parser, "CodeManagerTable")?;
        let (vtable_fixups_rva, vtable_fixups_size) =
            read_directory(&mut parser, "VTableFixups")?;
        read_reserved(&mut parser, "ExportAddressTableJumps")?;
        let managed_native_header_rva = parser.read_le::<u32>()?;
        let managed_native_header_size = parser.read_le::<u32>()?;

        Ok(Cor20Header {
            cb,
            major_runtime_version,
            minor_runtime_version,
            meta_data_rva,
            meta_data_size,
            flags,
            entry_point_token,
            resource_rva,
            resource_size,
            strong_name_signature_rva,
            strong_name_signature_size,
            vtable_fixups_rva,
            vtable_fixups_size,
            managed_native_header_rva,
            managed_native_header_size,
        })
    }

    /// Returns `true` if the image declares a `VTableFixups` directory.
    #[must_use]
    pub fn has_vtable_fixups(&self) -> bool {
        self.vtable_fixups_rva != 0 && self.vtable_fixups_size != 0
    }

    /// Returns `true` if the image is IL only, i.e. it cannot be a mixed-mode module.
    #[must_use]
    pub fn is_il_only(&self) -> bool {
        self.flags & COMIMAGE_FLAGS_ILONLY != 0
    }
}
