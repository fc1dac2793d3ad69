//! Recognize debug files and extract their debug ids.

use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use uuid::Uuid;

const MH_MAGIC: u32 = 0xfeed_face;
const MH_CIGAM: u32 = 0xcefa_edfe;
const MH_MAGIC_64: u32 = 0xfeed_facf;
const MH_CIGAM_64: u32 = 0xcffa_edfe;
const FAT_MAGIC: u32 = 0xcafe_babe;
const FAT_MAGIC_64: u32 = 0xcafe_babf;
const LC_UUID: u32 = 0x1b;

/// Java class files share the fat magic; real fat binaries have few slices.
const MAX_FAT_ARCHS: u32 = 30;

/// Upper bound on the load command region we are willing to read.
const MAX_LOAD_COMMANDS_SIZE: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifKind {
    MachO,
    Breakpad,
    BcSymbolMap,
    UuidMap,
}

impl DifKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DifKind::MachO => "macho",
            DifKind::Breakpad => "breakpad",
            DifKind::BcSymbolMap => "bcsymbolmap",
            DifKind::UuidMap => "uuidmap",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "macho" => Some(DifKind::MachO),
            "breakpad" => Some(DifKind::Breakpad),
            "bcsymbolmap" => Some(DifKind::BcSymbolMap),
            "uuidmap" => Some(DifKind::UuidMap),
            _ => None,
        }
    }
}

impl std::fmt::Display for DifKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recognized debug file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub kind: DifKind,
    /// One per architecture for fat Mach-O files, otherwise exactly one.
    pub debug_ids: Vec<String>,
}

/// Classify a file by its archive entry name and contents.
///
/// Returns `Ok(None)` for files that are not debug files or are too
/// malformed to yield a debug id.
pub fn classify<R: Read + Seek>(name: &str, reader: &mut R) -> io::Result<Option<Classified>> {
    let path = Path::new(name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

    if extension.eq_ignore_ascii_case("bcsymbolmap") {
        return Ok(uuid_from_stem(stem).map(|id| Classified {
            kind: DifKind::BcSymbolMap,
            debug_ids: vec![id],
        }));
    }

    if extension.eq_ignore_ascii_case("plist") {
        if name.contains("Contents/Resources/") {
            if let Some(id) = uuid_from_stem(stem) {
                return Ok(Some(Classified {
                    kind: DifKind::UuidMap,
                    debug_ids: vec![id],
                }));
            }
        }
        return Ok(None);
    }

    reader.seek(SeekFrom::Start(0))?;
    let mut head = [0u8; 4];
    if read_full(reader, &mut head)? < head.len() {
        return Ok(None);
    }

    if head.starts_with(b"MODU") {
        return breakpad_id(reader);
    }

    let ids = match u32::from_be_bytes(head) {
        FAT_MAGIC => fat_uuids(reader, false),
        FAT_MAGIC_64 => fat_uuids(reader, true),
        _ => macho_uuid(reader, 0).map(|id| id.into_iter().collect()),
    };
    let ids = match ids {
        Ok(ids) => ids,
        // Truncated headers.
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    if ids.is_empty() {
        return Ok(None);
    }
    Ok(Some(Classified {
        kind: DifKind::MachO,
        debug_ids: ids.iter().map(Uuid::to_string).collect(),
    }))
}

fn uuid_from_stem(stem: &str) -> Option<String> {
    Uuid::parse_str(stem).ok().map(|u| u.to_string())
}

/// Read until `buf` is full or EOF; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// `MODULE <os> <arch> <debug id> <name>` on the first line.
fn breakpad_id<R: Read + Seek>(reader: &mut R) -> io::Result<Option<Classified>> {
    reader.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; 512];
    let len = read_full(reader, &mut buf)?;
    let text = String::from_utf8_lossy(&buf[..len]);
    let Some(line) = text.lines().next() else {
        return Ok(None);
    };

    let mut parts = line.split_whitespace();
    if parts.next() != Some("MODULE") {
        return Ok(None);
    }
    let Some(raw_id) = parts.nth(2) else {
        return Ok(None);
    };
    if raw_id.len() < 32 || !raw_id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Ok(None);
    }

    let Ok(uuid) = Uuid::parse_str(&raw_id[..32]) else {
        return Ok(None);
    };
    let age = match &raw_id[32..] {
        "" => 0,
        suffix => match u32::from_str_radix(suffix, 16) {
            Ok(age) => age,
            Err(_) => return Ok(None),
        },
    };
    let debug_id = if age == 0 {
        uuid.to_string()
    } else {
        format!("{}-{:x}", uuid, age)
    };

    Ok(Some(Classified {
        kind: DifKind::Breakpad,
        debug_ids: vec![debug_id],
    }))
}

fn read_u32<R: Read>(reader: &mut R, big_endian: bool) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(if big_endian {
        u32::from_be_bytes(buf)
    } else {
        u32::from_le_bytes(buf)
    })
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

/// Fat headers are always big-endian.
fn fat_uuids<R: Read + Seek>(reader: &mut R, is_64: bool) -> io::Result<Vec<Uuid>> {
    reader.seek(SeekFrom::Start(4))?;
    let count = read_u32(reader, true)?;
    if count == 0 || count > MAX_FAT_ARCHS {
        return Ok(Vec::new());
    }

    let mut offsets = Vec::with_capacity(count as usize);
    for _ in 0..count {
        // cputype, cpusubtype
        read_u32(reader, true)?;
        read_u32(reader, true)?;
        if is_64 {
            let offset = read_u64(reader)?;
            read_u64(reader)?;
            read_u32(reader, true)?;
            read_u32(reader, true)?;
            offsets.push(offset);
        } else {
            let offset = read_u32(reader, true)?;
            read_u32(reader, true)?;
            read_u32(reader, true)?;
            offsets.push(u64::from(offset));
        }
    }

    let mut ids = Vec::new();
    for offset in offsets {
        if let Some(id) = macho_uuid(reader, offset)? {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    Ok(ids)
}

/// Find `LC_UUID` in the thin Mach-O image starting at `offset`.
fn macho_uuid<R: Read + Seek>(reader: &mut R, offset: u64) -> io::Result<Option<Uuid>> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut magic = [0u8; 4];
    if read_full(reader, &mut magic)? < 4 {
        return Ok(None);
    }

    let (big_endian, header_size) = match u32::from_be_bytes(magic) {
        MH_MAGIC => (true, 28u64),
        MH_CIGAM => (false, 28),
        MH_MAGIC_64 => (true, 32),
        MH_CIGAM_64 => (false, 32),
        _ => return Ok(None),
    };

    // cputype, cpusubtype, filetype
    reader.seek(SeekFrom::Start(offset + 16))?;
    let ncmds = read_u32(reader, big_endian)?;
    let sizeofcmds = read_u32(reader, big_endian)?;
    if sizeofcmds > MAX_LOAD_COMMANDS_SIZE {
        return Ok(None);
    }

    reader.seek(SeekFrom::Start(offset + header_size))?;
    let mut commands = vec![0u8; sizeofcmds as usize];
    if read_full(reader, &mut commands)? < commands.len() {
        return Ok(None);
    }

    let word = |bytes: &[u8]| -> u32 {
        let arr = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if big_endian {
            u32::from_be_bytes(arr)
        } else {
            u32::from_le_bytes(arr)
        }
    };

    let mut pos = 0usize;
    for _ in 0..ncmds {
        if pos + 8 > commands.len() {
            break;
        }
        let cmd = word(&commands[pos..pos + 4]);
        let cmdsize = word(&commands[pos + 4..pos + 8]) as usize;
        if cmdsize < 8 || pos + cmdsize > commands.len() {
            break;
        }
        if cmd == LC_UUID && cmdsize >= 24 {
            let bytes: [u8; 16] = commands[pos + 8..pos + 24]
                .try_into()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "short LC_UUID"))?;
            return Ok(Some(Uuid::from_bytes(bytes)));
        }
        pos += cmdsize;
    }

    Ok(None)
}
