//! # Symbol and Source-Line Resolution
//!
//! Two different questions get answered about a sampled address, at two
//! different times:
//!
//! 1. **Which symbol covers it?** Asked once per sample while aggregating.
//!    Answered by the ELF symbol table of the image ([`ElfSymbolTables`]).
//!    The answer is a `(symbol, byte offset)` pair that keys the histogram.
//!
//! 2. **Which source line is it?** Asked once per cost-bearing offset while
//!    emitting. Answered by the DWARF line tables of the image
//!    ([`DwarfResolver`]), including any inlined call frames.
//!
//! ## Address Spaces
//!
//! Both tables are keyed by the image's *link-time* virtual addresses, the
//! ones `objdump -d` prints. `perf script` reports runtime addresses, which
//! differ for PIE executables and shared libraries (ASLR). The perf reader
//! sidesteps the relocation entirely: perf already names the symbol and the
//! offset into it, so the link-time address is
//!
//! ```text
//! link-time address = symbol start (from .symtab) + offset (from perf)
//! ```
//!
//! Samples perf could not attribute keep their raw runtime address and end up
//! in the unresolved bucket of their image.
//!
//! ## DWARF Debug Information
//!
//! Source lines come from DWARF sections embedded in the image (or found
//! under `--symfs`; kernel samples read `--vmlinux`). Without them every cost line degrades to line `0`,
//! which the callgrind consumer understands as "unknown location".
//!
//! **Libraries used**:
//! - `object`: ELF parsing and symbol tables
//! - `gimli`: Low-level DWARF parser
//! - `addr2line`: Line tables and inlined frames on top of gimli
//! - `rustc-demangle`: Readable Rust symbol names for `fn=` lines
//! - `symbolic-demangle`: The same for C++ names
//!
//! ## Resolver Lifetime
//!
//! An image is opened with [`AddressResolver::open_image`] and closed by
//! dropping the returned handle. The emitter keeps at most one image open and
//! never interleaves resolution across images.

pub mod symbol_table;
pub mod symbolizer;

use std::path::{Path, PathBuf};

pub use symbol_table::{demangle_symbol, ElfSymbolTables, SymbolInfo, SymbolLookup, SymbolTable};
pub use symbolizer::{
    AddressResolver, DwarfResolver, ImageResolver, InlineFrame, Resolution, SourceLine, Symbolizer,
};

/// Image name perf records for kernel samples
pub const KERNEL_IMAGE: &str = "[kernel.kallsyms]";

/// Check whether perf attributed an image to the running kernel
#[must_use]
pub fn is_kernel_image(image: &str) -> bool {
    image.starts_with(KERNEL_IMAGE)
}

/// Where the images named by perf are read from
#[derive(Debug, Clone, Default)]
pub struct ImagePaths {
    /// Root that absolute image paths are re-rooted under
    pub symfs: Option<PathBuf>,
    /// Uncompressed kernel image standing in for `[kernel.kallsyms]`
    pub vmlinux: Option<PathBuf>,
}

impl ImagePaths {
    #[must_use]
    pub fn new(symfs: Option<PathBuf>) -> Self {
        Self { symfs, vmlinux: None }
    }

    #[must_use]
    pub fn with_vmlinux(mut self, vmlinux: Option<PathBuf>) -> Self {
        self.vmlinux = vmlinux;
        self
    }

    /// File to open for `image`
    #[must_use]
    pub fn resolve(&self, image: &str) -> PathBuf {
        match &self.vmlinux {
            Some(vmlinux) if is_kernel_image(image) => vmlinux.clone(),
            _ => resolve_image_path(self.symfs.as_deref(), image),
        }
    }

    /// Pseudo images with no file behind them, such as `[vdso]`
    #[must_use]
    pub fn is_pseudo(&self, image: &str) -> bool {
        image.starts_with('[') && !(self.vmlinux.is_some() && is_kernel_image(image))
    }
}

/// Map an image name as recorded by perf to the file to open
///
/// With `--symfs`, absolute image paths are re-rooted under that directory.
#[must_use]
pub fn resolve_image_path(symfs: Option<&Path>, image: &str) -> PathBuf {
    let path = Path::new(image);
    match symfs {
        Some(root) => root.join(path.strip_prefix("/").unwrap_or(path)),
        None => path.to_path_buf(),
    }
}
