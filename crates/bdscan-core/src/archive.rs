//! GMA 归档读取
//!
//! 布局（整数均为小端）：
//! ```text
//! "GMAD"            4 字节魔数
//! version           u8
//! owner_id          u64
//! created_at        u64
//! required deps     以 NUL 结尾的字符串序列，遇到空串结束
//! name / desc / author  3 个 NUL 结尾字符串
//! content_version   i32
//! 文件表            循环：u32 index（0 结束）, NUL 结尾文件名, i64 size, u32 crc
//! 内容区            各条目内容按文件表顺序首尾相接
//! ```
//! 文件表没有偏移字段，条目偏移是此前各条目 size 的前缀和。
//! CRC 只解析、不校验。
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::warn;

use crate::error::ArchiveError;
use crate::types::FileKind;

pub const GMA_MAGIC: [u8; 4] = *b"GMAD";
/// 已知的最高格式版本；更高版本仅告警
pub const KNOWN_MAX_VERSION: u8 = 3;
/// 归档扩展名
pub const ARCHIVE_EXTENSION: &str = "gma";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub magic: [u8; 4],
    pub format_version: u8,
    pub owner_id: u64,
    pub created_at: u64,
    pub required_dependencies: Vec<String>,
    pub name: String,
    pub description: String,
    pub author: String,
    pub content_version: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub filename: String,
    pub byte_size: i64,
    pub crc32: u32,
    /// 相对内容区起点的偏移（前缀和）
    pub relative_offset: i64,
}

impl ArchiveEntry {
    /// 小写扩展名（不含点）；无扩展名返回空串
    pub fn extension(&self) -> String {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default()
    }

    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_file_name(&self.filename)
    }
}

/// 一次解析得到的完整索引
#[derive(Debug, Clone)]
pub struct ArchiveIndex {
    pub header: ArchiveHeader,
    pub entries: Vec<ArchiveEntry>,
    /// 文件表结束（index 0 之后）的绝对偏移，即内容区起点
    pub content_start: u64,
}

impl ArchiveIndex {
    /// 打开并解析归档文件；未知版本告警但继续
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path)?;
        let index = Self::parse(&mut BufReader::new(file))?;
        if index.header.format_version > KNOWN_MAX_VERSION {
            warn!(path = %path.display(), version = index.header.format_version, "unknown GMA version");
        }
        Ok(index)
    }

    /// 从任意可定位的读取器解析头部与文件表
    pub fn parse<R: BufRead + Seek>(r: &mut R) -> Result<Self, ArchiveError> {
        let mut magic = [0u8; 4];
        read_exact(r, &mut magic, "magic")?;
        if magic != GMA_MAGIC {
            return Err(ArchiveError::BadMagic { found: magic });
        }

        let format_version = read_u8(r, "version")?;
        let owner_id = read_u64(r, "owner id")?;
        let created_at = read_u64(r, "timestamp")?;

        let mut required_dependencies = Vec::new();
        loop {
            let dep = read_cstring(r, "required content")?;
            if dep.is_empty() {
                break;
            }
            required_dependencies.push(dep);
        }

        let name = read_cstring(r, "name")?;
        let description = read_cstring(r, "description")?;
        let author = read_cstring(r, "author")?;
        let content_version = read_i32(r, "content version")?;

        let mut entries = Vec::new();
        let mut running: i64 = 0;
        loop {
            let file_index = read_u32(r, "entry index")?;
            if file_index == 0 {
                break;
            }
            let filename = read_cstring(r, "entry filename")?;
            let byte_size = read_i64(r, "entry size")?;
            let crc32 = read_u32(r, "entry crc")?;
            if byte_size < 0 {
                return Err(ArchiveError::NegativeSize { filename, size: byte_size });
            }
            entries.push(ArchiveEntry { filename, byte_size, crc32, relative_offset: running });
            running = running.saturating_add(byte_size);
        }

        let content_start = r.stream_position()?;

        Ok(Self {
            header: ArchiveHeader {
                magic,
                format_version,
                owner_id,
                created_at,
                required_dependencies,
                name,
                description,
                author,
                content_version,
            },
            entries,
            content_start,
        })
    }

    /// 内容区总长度（各条目 size 之和）
    pub fn content_len(&self) -> i64 {
        self.entries.iter().map(|e| e.byte_size).sum()
    }

    /// 仅保留可扫描的成员（lua/vmt/vtf/ttf）
    pub fn scannable_entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.iter().filter(|e| is_scannable_member(&e.filename))
    }
}

pub fn read_header(path: &Path) -> Result<ArchiveHeader, ArchiveError> {
    ArchiveIndex::open(path).map(|i| i.header)
}

pub fn list_entries(path: &Path) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    ArchiveIndex::open(path).map(|i| i.entries)
}

pub fn content_start_offset(path: &Path) -> Result<u64, ArchiveError> {
    ArchiveIndex::open(path).map(|i| i.content_start)
}

/// 独立打开归档并读取单个成员内容
/// 数据不足时返回实际读到的部分（不视为错误）
pub fn extract(path: &Path, entry: &ArchiveEntry, content_start: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    extract_from(&mut file, entry, content_start)
}

pub fn extract_from<R: Read + Seek>(r: &mut R, entry: &ArchiveEntry, content_start: u64) -> std::io::Result<Vec<u8>> {
    let size = u64::try_from(entry.byte_size).unwrap_or(0);
    let rel = u64::try_from(entry.relative_offset).unwrap_or(0);
    r.seek(SeekFrom::Start(content_start.saturating_add(rel)))?;
    let mut buf = Vec::with_capacity(size.min(16 * 1024 * 1024) as usize);
    r.take(size).read_to_end(&mut buf)?;
    Ok(buf)
}

/// 成员文件名的扩展名是否属于可扫描集合
pub fn is_scannable_member(filename: &str) -> bool {
    FileKind::from_file_name(filename).is_some()
}

fn read_exact<R: Read>(r: &mut R, buf: &mut [u8], field: &'static str) -> Result<(), ArchiveError> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => ArchiveError::Truncated { field },
        _ => ArchiveError::Io(e),
    })
}

fn read_u8<R: Read>(r: &mut R, field: &'static str) -> Result<u8, ArchiveError> {
    let mut b = [0u8; 1];
    read_exact(r, &mut b, field)?;
    Ok(b[0])
}

fn read_u32<R: Read>(r: &mut R, field: &'static str) -> Result<u32, ArchiveError> {
    let mut b = [0u8; 4];
    read_exact(r, &mut b, field)?;
    Ok(u32::from_le_bytes(b))
}

fn read_i32<R: Read>(r: &mut R, field: &'static str) -> Result<i32, ArchiveError> {
    let mut b = [0u8; 4];
    read_exact(r, &mut b, field)?;
    Ok(i32::from_le_bytes(b))
}

fn read_u64<R: Read>(r: &mut R, field: &'static str) -> Result<u64, ArchiveError> {
    let mut b = [0u8; 8];
    read_exact(r, &mut b, field)?;
    Ok(u64::from_le_bytes(b))
}

fn read_i64<R: Read>(r: &mut R, field: &'static str) -> Result<i64, ArchiveError> {
    let mut b = [0u8; 8];
    read_exact(r, &mut b, field)?;
    Ok(i64::from_le_bytes(b))
}

/// 读取以 NUL 结尾的字符串；未遇到 NUL 即 EOF 视为截断
fn read_cstring<R: BufRead>(r: &mut R, field: &'static str) -> Result<String, ArchiveError> {
    let mut buf = Vec::new();
    r.read_until(0, &mut buf)?;
    if buf.pop() != Some(0) {
        return Err(ArchiveError::Truncated { field });
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
