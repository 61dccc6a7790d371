use addr2line::Context;
use gimli::{EndianRcSlice, RunTimeEndian};
use log::{info, warn};
use object::{Object, ObjectSection};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::ImagePaths;
use crate::domain::ResolverError;

/// Opens binary images for source-line resolution
///
/// Closing an image is dropping its handle. Callers must not hold handles to
/// two images at once.
pub trait AddressResolver {
    type Image: ImageResolver;

    /// Open an image by the name perf recorded for it
    ///
    /// # Errors
    /// `NotFound` when the file does not exist, `NotExecutable` when it is
    /// not an object file that can carry debug information.
    fn open_image(&mut self, image: &str) -> Result<Self::Image, ResolverError>;
}

/// Resolves link-time addresses within one open image
pub trait ImageResolver {
    /// Best-effort resolution; never fails, degrades to [`Resolution::Unresolved`]
    fn resolve(&self, address: u64) -> Resolution;
}

/// Source file and line of an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub file: String,
    pub line: u32,
}

/// A call site that an address was inlined through
///
/// `file` and `line` point into the *caller*, at the place the inlined
/// function was expanded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineFrame {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
}

/// Result of resolving one address
///
/// `inlined_by` is ordered from the innermost caller outwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved { location: SourceLine, inlined_by: Vec<InlineFrame> },
    /// Something was found, but not both a file and a line
    PartiallyResolved { file: Option<String>, inlined_by: Vec<InlineFrame> },
    Unresolved,
}

impl Resolution {
    /// Build a resolution from frames ordered innermost first
    #[must_use]
    pub fn from_frames(mut frames: Vec<InlineFrame>) -> Self {
        if frames.is_empty() {
            return Self::Unresolved;
        }
        let innermost = frames.remove(0);
        match (innermost.file, innermost.line) {
            (Some(file), Some(line)) => {
                Self::Resolved { location: SourceLine { file, line }, inlined_by: frames }
            }
            (None, None) if frames.is_empty() && innermost.function.is_none() => Self::Unresolved,
            (file, _) => Self::PartiallyResolved { file, inlined_by: frames },
        }
    }

    #[must_use]
    pub fn file(&self) -> Option<&str> {
        match self {
            Self::Resolved { location, .. } => Some(&location.file),
            Self::PartiallyResolved { file, .. } => file.as_deref(),
            Self::Unresolved => None,
        }
    }

    /// Line number, only when fully resolved
    #[must_use]
    pub fn line(&self) -> Option<u32> {
        match self {
            Self::Resolved { location, .. } => Some(location.line),
            _ => None,
        }
    }

    #[must_use]
    pub fn inlined_by(&self) -> &[InlineFrame] {
        match self {
            Self::Resolved { inlined_by, .. } | Self::PartiallyResolved { inlined_by, .. } => {
                inlined_by
            }
            Self::Unresolved => &[],
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved { location, inlined_by } => {
                write!(f, "{}:{}", location.file, location.line)?;
                if !inlined_by.is_empty() {
                    write!(f, " (inlined x{})", inlined_by.len())?;
                }
                Ok(())
            }
            Self::PartiallyResolved { file, .. } => {
                write!(f, "{}:?", file.as_deref().unwrap_or("??"))
            }
            Self::Unresolved => f.write_str("??:0"),
        }
    }
}

/// DWARF-backed resolver honouring `--symfs` and `--vmlinux`
#[derive(Debug, Default)]
pub struct DwarfResolver {
    paths: ImagePaths,
    /// Images already reported as lacking debug info
    warned: HashSet<PathBuf>,
}

impl DwarfResolver {
    #[must_use]
    pub fn new(symfs: Option<PathBuf>) -> Self {
        Self::with_paths(ImagePaths::new(symfs))
    }

    #[must_use]
    pub fn with_paths(paths: ImagePaths) -> Self {
        Self { paths, warned: HashSet::new() }
    }
}

impl AddressResolver for DwarfResolver {
    type Image = Symbolizer;

    fn open_image(&mut self, image: &str) -> Result<Symbolizer, ResolverError> {
        let path = self.paths.resolve(image);
        let symbolizer = Symbolizer::new(&path)?;
        if !symbolizer.has_debug_info() && self.warned.insert(path.clone()) {
            warn!("{}: no DWARF debug info, source locations unavailable", path.display());
        }
        Ok(symbolizer)
    }
}

/// Symbolizer for resolving link-time addresses of one image to source lines
///
/// Includes a cache so repeated offsets of hot symbols are resolved once.
pub struct Symbolizer {
    ctx: Context<EndianRcSlice<RunTimeEndian>>,
    /// Cache of resolutions by address
    cache: RefCell<HashMap<u64, Resolution>>,
    has_debug_info: bool,
}

impl Symbolizer {
    /// Create a new symbolizer for the given binary
    ///
    /// # Errors
    /// Returns an error if the binary file cannot be found, read or parsed
    pub fn new<P: AsRef<Path>>(binary_path: P) -> Result<Self, ResolverError> {
        let path = binary_path.as_ref();
        if !path.is_file() {
            return Err(ResolverError::NotFound(path.to_path_buf()));
        }
        let binary_data = fs::read(path)?;

        let obj_file = object::File::parse(&*binary_data)
            .map_err(|_| ResolverError::NotExecutable(path.to_path_buf()))?;

        let has_debug_info = obj_file.section_by_name(".debug_info").is_some_and(|s| s.size() > 0);
        if has_debug_info {
            info!("Loading DWARF line tables from {}", path.display());
        }

        // Load DWARF debug info
        let endian =
            if obj_file.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

        let load_section =
            |id: gimli::SectionId| -> Result<EndianRcSlice<RunTimeEndian>, gimli::Error> {
                let data = obj_file
                    .section_by_name(id.name())
                    .and_then(|section| section.uncompressed_data().ok())
                    .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
                Ok(EndianRcSlice::new(Rc::from(&*data), endian))
            };

        let dwarf = gimli::Dwarf::load(&load_section)
            .map_err(|_| ResolverError::NotExecutable(path.to_path_buf()))?;
        let ctx = Context::from_dwarf(dwarf)
            .map_err(|_| ResolverError::NotExecutable(path.to_path_buf()))?;

        Ok(Self { ctx, cache: RefCell::new(HashMap::new()), has_debug_info })
    }

    /// False when the image carries no `.debug_info`; every address then
    /// resolves to nothing better than a line table entry
    #[must_use]
    pub fn has_debug_info(&self) -> bool {
        self.has_debug_info
    }

    fn lookup_frames(&self, addr: u64) -> Vec<InlineFrame> {
        let mut frames = Vec::new();

        if let Ok(mut frame_iter) = self.ctx.find_frames(addr).skip_all_loads() {
            while let Ok(Some(frame)) = frame_iter.next() {
                let function =
                    frame.function.and_then(|f| f.demangle().ok().map(|s| s.to_string()));
                let (file, line) = frame.location.map_or((None, None), |loc| {
                    (loc.file.map(std::string::ToString::to_string), loc.line.filter(|&l| l != 0))
                });
                frames.push(InlineFrame { file, line, function });
            }
        }

        // Line tables without function entries (assembly, stripped DIEs)
        if frames.is_empty() {
            if let Ok(Some(loc)) = self.ctx.find_location(addr) {
                frames.push(InlineFrame {
                    file: loc.file.map(std::string::ToString::to_string),
                    line: loc.line.filter(|&l| l != 0),
                    function: None,
                });
            }
        }

        frames
    }
}

impl ImageResolver for Symbolizer {
    fn resolve(&self, addr: u64) -> Resolution {
        if let Some(cached) = self.cache.borrow().get(&addr) {
            return cached.clone();
        }

        let resolved = Resolution::from_frames(self.lookup_frames(addr));
        self.cache.borrow_mut().insert(addr, resolved.clone());
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(file: Option<&str>, line: Option<u32>, function: Option<&str>) -> InlineFrame {
        InlineFrame {
            file: file.map(str::to_string),
            line,
            function: function.map(str::to_string),
        }
    }

    #[test]
    fn test_no_frames_is_unresolved() {
        assert_eq!(Resolution::from_frames(Vec::new()), Resolution::Unresolved);
    }

    #[test]
    fn test_full_location_is_resolved() {
        let res = Resolution::from_frames(vec![frame(Some("foo.c"), Some(10), Some("foo"))]);
        assert_eq!(res.file(), Some("foo.c"));
        assert_eq!(res.line(), Some(10));
        assert!(res.inlined_by().is_empty());
        assert_eq!(res.to_string(), "foo.c:10");
    }

    #[test]
    fn test_file_without_line_is_partial() {
        let res = Resolution::from_frames(vec![frame(Some("foo.c"), None, Some("foo"))]);
        assert!(matches!(res, Resolution::PartiallyResolved { .. }));
        assert_eq!(res.file(), Some("foo.c"));
        assert_eq!(res.line(), None);
    }

    #[test]
    fn test_function_only_is_partial() {
        let res = Resolution::from_frames(vec![frame(None, None, Some("foo"))]);
        assert!(matches!(res, Resolution::PartiallyResolved { file: None, .. }));
    }

    #[test]
    fn test_inline_callers_follow_innermost() {
        let res = Resolution::from_frames(vec![
            frame(Some("vec.h"), Some(40), Some("push")),
            frame(Some("util.c"), Some(7), Some("fill")),
            frame(Some("main.c"), Some(3), Some("main")),
        ]);
        assert_eq!(res.file(), Some("vec.h"));
        assert_eq!(res.line(), Some(40));
        let callers: Vec<_> = res.inlined_by().iter().map(|f| f.file.as_deref()).collect();
        assert_eq!(callers, vec![Some("util.c"), Some("main.c")]);
    }

    #[test]
    fn test_open_missing_image() {
        let mut resolver = DwarfResolver::new(None);
        let result = resolver.open_image("/nonexistent/path/to/binary");
        assert!(matches!(result, Err(ResolverError::NotFound(_))));
    }

    #[test]
    fn test_open_non_object_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"definitely not an ELF file").unwrap();

        let result = Symbolizer::new(&path);
        assert!(matches!(result, Err(ResolverError::NotExecutable(_))));
    }
}
