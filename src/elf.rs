//! Symbolization of captured callstacks against the ELF files mapped in a process.

use std::{
    collections::{HashMap, HashSet},
    fmt, fs,
    rc::Rc,
};

use anyhow::{Context, Result};
use object::{
    read::elf::{ElfFile64, SectionHeader},
    Object, ObjectSection, ObjectSymbol,
};
use stackctx_callstack::DecodedCallstack;
use tracing::debug;

use crate::{range_map::RangeMap, COLOR_BLU, COLOR_MGT, COLOR_RED, COLOR_RST, COLOR_YLW};

#[derive(Debug)]
struct Symbol {
    file: Rc<String>,
    name: String,
    addr: usize,
    size: usize,
}

#[derive(Debug)]
pub struct SymResolver {
    symbols: RangeMap<Symbol>,
    maps: RangeMap<Rc<String>>,
    /// Frames to hide, such as the stack walker's own.
    filter: HashSet<String>,
}

impl SymResolver {
    pub fn new(pid: u32) -> Result<Self> {
        let maps = load_maps(pid).context("load process maps")?;
        let mut symbols = RangeMap::new();
        for (file, maps) in &maps {
            load_file_symbols(&mut symbols, maps, file).with_context(|| file.to_owned())?;
        }
        debug!("Loaded {} symbols from {} files", symbols.len(), maps.len());

        let maps = maps
            .into_iter()
            .flat_map(|(file, map)| {
                let file = Rc::new(file);
                map.into_iter().map(move |(range, _)| (range, file.clone()))
            })
            .collect();

        Ok(Self { symbols, maps, filter: HashSet::new() })
    }

    pub fn with_symbol_filter(self, filter: HashSet<String>) -> Self {
        Self { filter, ..self }
    }

    pub fn resolve(&self, addr: usize) -> Option<Sym<'_>> {
        let sym = self.symbols.get(addr)?;
        Some(Sym { file: &sym.file, name: &sym.name, offset: addr - sym.addr, size: sym.size })
    }

    pub fn resolve_file(&self, addr: usize) -> Option<&str> {
        self.maps.get(addr).map(|file| file.as_str())
    }

    /// `^prefix` filters match the start of the symbol, others anywhere in it.
    pub fn is_filtered_out(&self, symbol: &Sym) -> bool {
        self.filter.iter().any(|filter| match filter.strip_prefix('^') {
            Some(prefix) => symbol.name.starts_with(prefix),
            None => symbol.name.contains(filter.as_str()),
        })
    }

    /// Prints one frame per line, innermost first.
    pub fn print_callstack(&self, stack: &DecodedCallstack) {
        fn p_ip(ip: usize) {
            print!("        {COLOR_BLU}0x{ip:016x}{COLOR_RST}: ");
        }

        let mut filtered = 0usize;
        for &ip in &stack.entries {
            match self.resolve(ip) {
                Some(sym) if self.is_filtered_out(&sym) => filtered += 1,
                Some(sym) => {
                    if filtered > 0 {
                        println!("         ({filtered} filtered out)");
                        filtered = 0;
                    }
                    p_ip(ip);
                    println!("{sym}");
                }
                None => {
                    p_ip(ip);
                    print!("???");
                    match self.resolve_file(ip) {
                        Some(file) => println!(" in {COLOR_MGT}{file}{COLOR_RST}"),
                        None => println!(),
                    }
                }
            }
        }
        if filtered > 0 {
            println!("         ({filtered} filtered out)");
        }
        if stack.truncated {
            println!("        {COLOR_RED}... (truncated){COLOR_RST}");
        }
    }
}

pub struct Sym<'a> {
    file: &'a str,
    name: &'a str,
    offset: usize,
    size: usize,
}

impl fmt::Display for Sym<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Sym { file, name, offset, size } = self;
        write!(
            f,
            "{COLOR_YLW}{name}{COLOR_RST}+0x{offset:x}/0x{size:x} in {COLOR_MGT}{file}{COLOR_RST}"
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Mapping {
    start: usize,
    end: usize,
    offset: usize,
}

fn load_maps(pid: u32) -> Result<HashMap<String, RangeMap<Mapping>>> {
    let file = format!("/proc/{pid}/maps");
    let maps = fs::read_to_string(&file).with_context(|| file)?;
    parse_maps(&maps)
}

/// Executable file-backed mappings of a `/proc/<pid>/maps` listing, by file.
fn parse_maps(maps: &str) -> Result<HashMap<String, RangeMap<Mapping>>> {
    let mut ret = HashMap::new();

    for line in maps.lines() {
        let items = line.split_whitespace().collect::<Vec<_>>();
        let [addrs, offset, file] = match items.as_slice() {
            // Anonymous mapping
            [_addrs, _perms, _offset, _dev, _inode] => continue,
            // Pseudo files: [heap], [stack], [vdso], ...
            [_addrs, _perms, _offset, _dev, _inode, name] if name.starts_with('[') => continue,
            // The backing file has been deleted
            [_addrs, _perms, _offset, _dev, _inode, _name, "(deleted)"] => continue,
            // Non-executable mapping
            [_addrs, perms, _offset, _dev, _inode, _name] if !perms.contains('x') => continue,
            &[addrs, _perms, offset, _dev, _inode, file] => [addrs, offset, file],
            _ => continue,
        };
        let Some((start, end)) = addrs.split_once('-') else { continue };
        let start = usize::from_str_radix(start, 16)?;
        let end = usize::from_str_radix(end, 16)?;
        let offset = usize::from_str_radix(offset, 16)?;

        ret.entry(file.to_owned())
            .or_insert_with(RangeMap::new)
            .insert(start..end, Mapping { start, end, offset });
    }

    Ok(ret)
}

fn load_file_symbols(
    symbols: &mut RangeMap<Symbol>,
    maps: &RangeMap<Mapping>,
    file: &str,
) -> Result<()> {
    debug!("Loading symbols from {file}");
    let data = fs::read(file)?;
    let obj: ElfFile64 = ElfFile64::parse(&*data)?;
    let endian = obj.endian();

    // maps translates the process address space to file offsets; map_rev goes from file
    // offsets back to where the mapping starts in the process.
    let map_rev = maps
        .iter()
        .map(|(_, m)| (m.offset..(m.offset + (m.end - m.start)), (m.start, m.offset)))
        .collect::<RangeMap<_>>();

    let file = Rc::new(file.to_owned());
    for sym in obj.symbols() {
        let Some(idx) = sym.section_index() else { continue };
        let Ok(sec) = obj.section_by_index(idx) else { continue };
        let Ok(name) = sym.name() else { continue };

        let sec_off = sec.elf_section_header().sh_offset(endian) as usize;
        let Some(&(map_base, map_off)) = map_rev.get(sec_off) else { continue };

        // pc = (map_base - map_off) + (sec_off - sec_addr) + sym
        let map_start = map_base - map_off;
        let sec_off = sec_off.wrapping_sub(sec.address() as usize);
        let vaddr = map_start.wrapping_add(sec_off).wrapping_add(sym.address() as usize);
        let size = sym.size() as usize;

        let name = rustc_demangle::demangle(name).to_string();
        let symbol = Symbol { file: file.clone(), name, addr: vaddr, size };
        symbols.insert(vaddr..vaddr.wrapping_add(size), symbol);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPS: &str = "\
55d4c5a00000-55d4c5a2a000 r--p 00000000 fd:01 1234 /usr/bin/stackctx
55d4c5a2a000-55d4c5b00000 r-xp 0002a000 fd:01 1234 /usr/bin/stackctx
55d4c6e1e000-55d4c6e3f000 rw-p 00000000 00:00 0 [heap]
7f1a2b400000-7f1a2b428000 r-xp 00028000 fd:01 42 /usr/lib/libc.so.6
7f1a2b600000-7f1a2b610000 r-xp 00000000 fd:01 43 /tmp/gone.so (deleted)
7f1a2b700000-7f1a2b701000 rw-p 00000000 00:00 0
7ffd1c3f2000-7ffd1c3f4000 r-xp 00000000 00:00 0 [vdso]
";

    #[test]
    fn executable_file_mappings_only() {
        let maps = parse_maps(MAPS).unwrap();
        let mut files: Vec<_> = maps.keys().map(String::as_str).collect();
        files.sort();
        assert_eq!(files, ["/usr/bin/stackctx", "/usr/lib/libc.so.6"]);

        let mapping = maps["/usr/bin/stackctx"].get(0x55d4c5a2a010).unwrap();
        assert_eq!(mapping.offset, 0x2a000);
        assert!(maps["/usr/bin/stackctx"].get(0x55d4c5a00010).is_none());
    }

    #[test]
    fn filters() {
        let resolver = SymResolver {
            symbols: RangeMap::new(),
            maps: RangeMap::new(),
            filter: ["^backtrace::".to_owned(), "tokio".to_owned()].into_iter().collect(),
        };
        let sym = |name| Sym { file: "f", name, offset: 0, size: 0 };
        assert!(resolver.is_filtered_out(&sym("backtrace::trace")));
        assert!(resolver.is_filtered_out(&sym("std::rt::tokio::block_on")));
        assert!(!resolver.is_filtered_out(&sym("stackctx::workload::descend")));
    }
}
