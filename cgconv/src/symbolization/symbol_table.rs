//! ELF symbol tables for address → (symbol, offset) lookup
//!
//! Symbols are read from `.symtab` (falling back to `.dynsym` for stripped
//! images), sorted by start address and searched with a binary search.

use log::{debug, info, warn};
use object::{Object, ObjectSection, ObjectSymbol, SymbolKind};
use rustc_demangle::try_demangle;
use symbolic_common::Name;
use symbolic_demangle::{Demangle, DemangleOptions};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::ImagePaths;
use crate::domain::ResolverError;

/// A function symbol: its link-time start address and length in bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub name: String,
    pub start: u64,
    pub len: u64,
}

impl SymbolInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, start: u64, len: u64) -> Self {
        Self { name: name.into(), start, len }
    }

    /// Check if an address falls within this symbol
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address - self.start < self.len
    }
}

/// Symbol-table lookup consumed by the aggregator
pub trait SymbolLookup {
    /// Find the symbol covering `address` in `image`
    fn lookup_symbol(&mut self, image: &str, address: u64) -> Option<&SymbolInfo>;

    /// Start address of the symbol called `name` in `image`
    fn locate_symbol(&mut self, _image: &str, _name: &str) -> Option<u64> {
        None
    }
}

/// Demangle a Rust or C++ symbol name
///
/// Rust names lose their hash suffix, C++ names keep their parameter list.
/// Anything else is returned unchanged.
#[must_use]
pub fn demangle_symbol(symbol: &str) -> String {
    if let Ok(rust) = try_demangle(symbol) {
        return format!("{rust:#}");
    }
    Name::from(symbol)
        .try_demangle(DemangleOptions::name_only().parameters(true))
        .into_owned()
}

/// Sorted function symbols of one image
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<SymbolInfo>,
    /// Raw and demangled names → index into `symbols`
    by_name: HashMap<String, usize>,
}

struct RawSymbol {
    name: String,
    start: u64,
    size: u64,
    section_end: Option<u64>,
}

impl SymbolTable {
    /// Build a table from already-sized symbols
    ///
    /// Symbols sharing a start address collapse into the longest one; every
    /// alias name still locates it.
    #[must_use]
    pub fn from_symbols(mut symbols: Vec<SymbolInfo>) -> Self {
        symbols.retain(|s| s.len > 0);
        symbols.sort_by(|a, b| a.start.cmp(&b.start).then(b.len.cmp(&a.len)));

        let mut table = Self::default();
        for sym in symbols {
            match table.symbols.last() {
                Some(kept) if kept.start == sym.start => {
                    let idx = table.symbols.len() - 1;
                    table.by_name.entry(sym.name).or_insert(idx);
                }
                _ => {
                    table.by_name.entry(sym.name.clone()).or_insert(table.symbols.len());
                    table.symbols.push(sym);
                }
            }
        }
        table
    }

    /// Parse the function symbols of an in-memory object file
    ///
    /// # Errors
    /// Returns an error if the data is not a supported object file
    pub fn parse(data: &[u8]) -> Result<Self, object::Error> {
        let obj = object::File::parse(data)?;

        let mut raw = text_symbols(&obj, obj.symbols());
        if raw.is_empty() {
            raw = text_symbols(&obj, obj.dynamic_symbols());
        }

        Ok(Self::from_raw(raw))
    }

    /// Read and parse the symbols of an image on disk
    ///
    /// # Errors
    /// `NotFound` if the file is missing, `NotExecutable` if it is not an object file
    pub fn load(path: &Path) -> Result<Self, ResolverError> {
        if !path.is_file() {
            return Err(ResolverError::NotFound(path.to_path_buf()));
        }
        let data = fs::read(path)?;
        Self::parse(&data).map_err(|_| ResolverError::NotExecutable(path.to_path_buf()))
    }

    fn from_raw(mut raw: Vec<RawSymbol>) -> Self {
        // Prefer sized entries when aliases share a start address
        raw.sort_by(|a, b| a.start.cmp(&b.start).then(b.size.cmp(&a.size)));

        let mut groups: Vec<(RawSymbol, Vec<String>)> = Vec::with_capacity(raw.len());
        for sym in raw {
            match groups.last_mut() {
                Some((kept, aliases)) if kept.start == sym.start => aliases.push(sym.name),
                _ => groups.push((sym, Vec::new())),
            }
        }

        let mut symbols = Vec::with_capacity(groups.len());
        let mut by_name = HashMap::with_capacity(groups.len() * 2);

        for (i, (sym, aliases)) in groups.iter().enumerate() {
            let len = if sym.size > 0 {
                sym.size
            } else {
                // Zero-size symbols extend to the next symbol or their section end
                let next = groups.get(i + 1).map(|(n, _)| n.start);
                let end = match (next, sym.section_end) {
                    (Some(next), Some(section_end)) => next.min(section_end),
                    (Some(end), None) | (None, Some(end)) => end,
                    (None, None) => sym.start,
                };
                end.saturating_sub(sym.start)
            };
            if len == 0 {
                continue;
            }

            let display = demangle_symbol(&sym.name);
            let idx = symbols.len();
            by_name.insert(sym.name.clone(), idx);
            by_name.insert(display.clone(), idx);
            for alias in aliases {
                by_name.entry(alias.clone()).or_insert(idx);
                by_name.entry(demangle_symbol(alias)).or_insert(idx);
            }
            symbols.push(SymbolInfo { name: display, start: sym.start, len });
        }

        Self { symbols, by_name }
    }

    /// Find the symbol covering `address`
    #[must_use]
    pub fn lookup(&self, address: u64) -> Option<&SymbolInfo> {
        let idx = self.symbols.partition_point(|s| s.start <= address);
        let candidate = self.symbols.get(idx.checked_sub(1)?)?;
        candidate.contains(address).then_some(candidate)
    }

    /// Start address of a symbol by raw or demangled name
    #[must_use]
    pub fn locate(&self, name: &str) -> Option<u64> {
        self.by_name.get(name).map(|&idx| self.symbols[idx].start)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

fn text_symbols<'data>(
    obj: &object::File<'data>,
    symbols: impl Iterator<Item = impl ObjectSymbol<'data>>,
) -> Vec<RawSymbol> {
    symbols
        .filter(|sym| sym.kind() == SymbolKind::Text && sym.is_definition() && sym.address() != 0)
        .filter_map(|sym| {
            let name = sym.name().ok().filter(|n| !n.is_empty())?.to_string();
            let section_end = sym
                .section_index()
                .and_then(|idx| obj.section_by_index(idx).ok())
                .map(|section| section.address() + section.size());
            Some(RawSymbol { name, start: sym.address(), size: sym.size(), section_end })
        })
        .collect()
}

/// Lazily loaded symbol tables, one per image
///
/// Images that cannot be loaded are remembered as such and warned about once;
/// every address in them is unresolved.
#[derive(Debug, Default)]
pub struct ElfSymbolTables {
    paths: ImagePaths,
    tables: HashMap<String, Option<SymbolTable>>,
}

impl ElfSymbolTables {
    #[must_use]
    pub fn new(symfs: Option<PathBuf>) -> Self {
        Self::with_paths(ImagePaths::new(symfs))
    }

    #[must_use]
    pub fn with_paths(paths: ImagePaths) -> Self {
        Self { paths, tables: HashMap::new() }
    }

    /// Register a table for an image instead of loading it from disk
    pub fn insert(&mut self, image: impl Into<String>, table: SymbolTable) {
        self.tables.insert(image.into(), Some(table));
    }

    fn table(&mut self, image: &str) -> Option<&SymbolTable> {
        if !self.tables.contains_key(image) {
            let path = self.paths.resolve(image);
            let table = match SymbolTable::load(&path) {
                Ok(table) => {
                    info!("Loaded {} function symbols from {}", table.len(), path.display());
                    Some(table)
                }
                // Pseudo images such as [kernel.kallsyms] or [vdso]
                Err(e) if self.paths.is_pseudo(image) => {
                    debug!("No symbol table for {image}: {e}");
                    None
                }
                Err(e) => {
                    warn!("No symbol table for {image}: {e}");
                    None
                }
            };
            self.tables.insert(image.to_string(), table);
        }
        self.tables.get(image).and_then(Option::as_ref)
    }
}

impl SymbolLookup for ElfSymbolTables {
    fn lookup_symbol(&mut self, image: &str, address: u64) -> Option<&SymbolInfo> {
        self.table(image)?.lookup(address)
    }

    fn locate_symbol(&mut self, image: &str, name: &str) -> Option<u64> {
        self.table(image)?.locate(name)
    }
}
