//! PE file abstraction for mixed-mode module images.
//!
//! This module provides access to the Portable Executable structure of an IJW module: the
//! headers, the section table, the CLR runtime header data directory and RVA to file offset
//! translation. It abstracts over where the bytes come from (a memory-mapped file on disk or
//! an owned buffer) through the [`crate::file::Backend`] trait.
//!
//! # Key Components
//!
//! - [`crate::file::File`] - Parsed PE image with CLR-specific accessors
//! - [`crate::file::Backend`] - Trait for different data sources
//! - [`crate::file::parser::Parser`] - Cursor used to decode structures out of the image
//! - [`crate::file::io`] - Low-level little-endian reads
//!
//! # Examples
//!
//! ```rust,no_run
//! use ijwhost::File;
//! use std::path::Path;
//!
//! let file = File::from_file(Path::new("IjwNativeDll.dll"))?;
//!
//! let (clr_rva, clr_size) = file.clr();
//! let clr_offset = file.rva_to_offset(clr_rva)?;
//! let clr_data = file.data_slice(clr_offset, clr_size)?;
//! println!("CLR header starts with: {:02x?}", &clr_data[0..8]);
//! # Ok::<(), ijwhost::Error>(())
//! ```

mod backend;
pub mod io;
pub mod parser;

use std::path::Path;

use crate::{
    Error::{Empty, GoblinErr, OutOfBounds},
    Result,
};
use backend::{Memory, Physical};
use goblin::pe::{header::Header, section_table::SectionTable, PE};
use ouroboros::self_referencing;

pub use backend::Backend;

#[self_referencing]
/// Represents a loaded PE file that carries a CLR runtime header.
///
/// `File` wraps the parsed PE and provides methods for accessing headers, sections and the
/// CLR data directory, and for converting RVAs into file offsets. Loading fails for images
/// without a CLR runtime header directory, since such a module cannot contain vtable fixups.
///
/// # Examples
///
/// ```rust,no_run
/// use ijwhost::File;
///
/// let data = std::fs::read("IjwNativeDll.dll")?;
/// let file = File::from_mem(data)?;
///
/// let (clr_rva, clr_size) = file.clr();
/// println!("CLR header at RVA 0x{:x}, {} bytes", clr_rva, clr_size);
/// # Ok::<(), ijwhost::Error>(())
/// ```
pub struct File {
    /// The underlying data source (memory or file).
    data: Box<dyn Backend>,
    /// The parsed PE structure, referencing the data.
    #[borrows(data)]
    #[not_covariant]
    pe: PE<'this>,
}

impl File {
    /// Loads a PE file from the given path.
    ///
    /// The file is memory-mapped for efficient access.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, is empty, is not a valid PE or does
    /// not carry a CLR runtime header.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::open(file)?;

        Self::load(input)
    }

    /// Loads a PE file from a memory buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is empty, is not a valid PE or does not carry a CLR
    /// runtime header.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::from(data);

        Self::load(input)
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.is_empty() {
            return Err(Empty);
        }

        let data = Box::new(data);

        File::try_new(data, |data| match PE::parse(data.data()) {
            Ok(pe) => match pe.header.optional_header {
                Some(optional_header) => {
                    if optional_header
                        .data_directories
                        .get_clr_runtime_header()
                        .is_none()
                    {
                        Err(malformed_error!(
                            "File does not have a CLR runtime header directory"
                        ))
                    } else {
                        Ok(pe)
                    }
                }
                None => Err(malformed_error!("File does not have an OptionalHeader")),
            },
            Err(error) => Err(GoblinErr(error)),
        })
    }

    /// Returns the total size of the loaded file in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.with_data(|data| data.len())
    }

    /// Returns `true` if the file has a length of zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the preferred image base from the optional header.
    #[must_use]
    pub fn imagebase(&self) -> u64 {
        self.with_pe(|pe| pe.image_base)
    }

    /// Returns `true` for PE32+ (64-bit) images.
    #[must_use]
    pub fn is_pe32_plus(&self) -> bool {
        self.with_pe(|pe| pe.is_64)
    }

    /// Returns the COFF header.
    #[must_use]
    pub fn header(&self) -> &Header<'_> {
        self.with_pe(|pe| &pe.header)
    }

    /// Returns the RVA and size of the CLR runtime header.
    ///
    /// Both are guaranteed to be present, as loading rejects images without this directory.
    #[must_use]
    pub fn clr(&self) -> (usize, usize) {
        self.with_pe(|pe| {
            pe.header
                .optional_header
                .as_ref()
                .and_then(|header| {
                    header
                        .data_directories
                        .get_clr_runtime_header()
                        .map(|clr_dir| (clr_dir.virtual_address as usize, clr_dir.size as usize))
                })
                .unwrap_or((0, 0))
        })
    }

    /// Iterates over the section table.
    pub fn sections(&self) -> impl Iterator<Item = &SectionTable> {
        self.with_pe(|pe| pe.sections.iter())
    }

    /// Returns the entire file contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data())
    }

    /// Returns `len` bytes starting at the file `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the range leaves the file.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.with_data(|data| data.data_slice(offset, len))
    }

    /// Converts a relative virtual address into a file offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the RVA does not fall inside any section's raw data, or if a
    /// section header overflows.
    pub fn rva_to_offset(&self, rva: usize) -> Result<usize> {
        let rva_u32 =
            u32::try_from(rva).map_err(|_| malformed_error!("RVA too large to fit in u32: {}", rva))?;

        self.with_pe(|pe| {
            for section in &pe.sections {
                let span = section.virtual_size.max(section.size_of_raw_data);
                let Some(section_max) = section.virtual_address.checked_add(span) else {
                    return Err(malformed_error!(
                        "Section malformed, causing integer overflow - {} + {}",
                        section.virtual_address,
                        span
                    ));
                };

                if section.virtual_address <= rva_u32 && section_max > rva_u32 {
                    let delta = rva_u32 - section.virtual_address;
                    if delta >= section.size_of_raw_data {
                        // Uninitialised tail of the section, nothing backs it in the file.
                        return Err(OutOfBounds);
                    }

                    return Ok(section.pointer_to_raw_data as usize + delta as usize);
                }
            }

            Err(malformed_error!(
                "RVA could not be converted to offset - {}",
                rva
            ))
        })
    }
}
