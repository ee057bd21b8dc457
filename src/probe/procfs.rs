//! Readers for line-oriented `/proc`-style files.
//!
//! Every reader returns a mapping keyed by the first token of each line,
//! with numeric fields parsed once.

use std::collections::BTreeMap;
use std::path::Path;

use super::{ProbeError, ProbeResult};

/// Rows keyed by first token. Non-numeric fields are skipped.
pub type KeyedTable = BTreeMap<String, Vec<i64>>;

/// Parse a keyed table from text.
///
/// Blank lines and lines starting with `#` are skipped. A trailing `:` on
/// the key is dropped.
pub fn parse_keyed_table(text: &str) -> KeyedTable {
    let mut table = KeyedTable::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let Some(key) = fields.next() else { continue };
        let values = fields.filter_map(|f| f.parse::<i64>().ok()).collect();
        table.insert(key.trim_end_matches(':').to_string(), values);
    }
    table
}

/// Read and parse a keyed table.
pub async fn read_keyed_table(path: impl AsRef<Path>) -> ProbeResult<KeyedTable> {
    Ok(parse_keyed_table(&read(path.as_ref()).await?))
}

async fn read(path: &Path) -> ProbeResult<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        ProbeError::network(format!("failed to read '{}'", path.display())).with_source(e)
    })
}

/// `/proc/meminfo` values in bytes (counts for the `HugePages_*` rows).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Meminfo(pub BTreeMap<String, u64>);

impl Meminfo {
    pub fn parse(text: &str) -> ProbeResult<Self> {
        let mut fields = BTreeMap::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let (key, rest) = line
                .split_once(':')
                .ok_or_else(|| ProbeError::protocol(format!("malformed meminfo line '{line}'")))?;
            let mut parts = rest.split_whitespace();
            let value: u64 = parts
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| ProbeError::protocol(format!("malformed meminfo line '{line}'")))?;
            let value = match parts.next() {
                Some("kB") => value.saturating_mul(1024),
                _ => value,
            };
            fields.insert(key.trim().to_string(), value);
        }
        Ok(Self(fields))
    }

    pub async fn read(path: impl AsRef<Path>) -> ProbeResult<Self> {
        Self::parse(&read(path.as_ref()).await?)
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.0.get(key).copied()
    }
}

/// One loaded kernel module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub size: u64,
    pub refcount: u64,
    pub state: String,
}

/// `/proc/modules`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modules(pub BTreeMap<String, ModuleInfo>);

impl Modules {
    pub fn parse(text: &str) -> ProbeResult<Self> {
        let mut modules = BTreeMap::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                return Err(ProbeError::protocol(format!("malformed modules line '{line}'")));
            }
            let parse = |s: &str| {
                s.parse::<u64>()
                    .map_err(|_| ProbeError::protocol(format!("malformed modules line '{line}'")))
            };
            modules.insert(
                fields[0].to_string(),
                ModuleInfo {
                    size: parse(fields[1])?,
                    refcount: parse(fields[2])?,
                    state: fields[4].to_string(),
                },
            );
        }
        Ok(Self(modules))
    }

    pub async fn read(path: impl AsRef<Path>) -> ProbeResult<Self> {
        Self::parse(&read(path.as_ref()).await?)
    }
}

/// One slab cache row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabCache {
    pub active_objs: u64,
    pub num_objs: u64,
    pub objsize: u64,
    pub objperslab: u64,
    pub pagesperslab: u64,
}

impl SlabCache {
    /// Memory held by all objects, in bytes.
    pub fn memory(&self) -> u64 {
        self.num_objs.saturating_mul(self.objsize)
    }

    /// Memory held by active objects, in bytes.
    pub fn active_memory(&self) -> u64 {
        self.active_objs.saturating_mul(self.objsize)
    }
}

/// `/proc/slabinfo` (version 2.x).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slabinfo(pub BTreeMap<String, SlabCache>);

impl Slabinfo {
    pub fn parse(text: &str) -> ProbeResult<Self> {
        let mut lines = text.lines();
        match lines.next() {
            Some(header) if header.starts_with("slabinfo - version: 2") => {}
            Some(header) => {
                return Err(ProbeError::protocol(format!(
                    "unsupported slabinfo header '{header}'"
                )));
            }
            None => return Err(ProbeError::protocol("empty slabinfo")),
        }

        let mut caches = BTreeMap::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                return Err(ProbeError::protocol(format!("malformed slabinfo line '{line}'")));
            }
            let mut nums = [0u64; 5];
            for (slot, field) in nums.iter_mut().zip(&fields[1..6]) {
                *slot = field
                    .parse()
                    .map_err(|_| ProbeError::protocol(format!("malformed slabinfo line '{line}'")))?;
            }
            caches.insert(
                fields[0].to_string(),
                SlabCache {
                    active_objs: nums[0],
                    num_objs: nums[1],
                    objsize: nums[2],
                    objperslab: nums[3],
                    pagesperslab: nums[4],
                },
            );
        }
        Ok(Self(caches))
    }

    pub async fn read(path: impl AsRef<Path>) -> ProbeResult<Self> {
        Self::parse(&read(path.as_ref()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeErrorKind;

    const SLABINFO: &str = "slabinfo - version: 2.1
# name            <active_objs> <num_objs> <objsize> <objperslab> <pagesperslab> : tunables <limit> <batchcount> <sharedfactor> : slabdata <active_slabs> <num_slabs> <sharedavail>
ext4_inode_cache   12000  12500   1080   30    8 : tunables    0    0    0 : slabdata    416    416      0
dentry             45000  46000    192   21    1 : tunables    0    0    0 : slabdata   2190   2190      0
";

    #[test]
    fn test_parse_keyed_table() {
        let table = parse_keyed_table("MemTotal:  100 kB\n# comment\n\nfoo 1 x 2\n");
        assert_eq!(table.get("MemTotal"), Some(&vec![100]));
        assert_eq!(table.get("foo"), Some(&vec![1, 2]));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_meminfo() {
        let info = Meminfo::parse("MemTotal:       16384 kB\nHugePages_Total:       4\n").unwrap();
        assert_eq!(info.get("MemTotal"), Some(16384 * 1024));
        assert_eq!(info.get("HugePages_Total"), Some(4));
        assert!(Meminfo::parse("garbage").is_err());
    }

    #[test]
    fn test_modules() {
        let text = "nf_tables 249856 4 nft_ct,nft_chain_nat, Live 0x0000000000000000\n\
                    ext4 815104 2 - Live 0x0000000000000000\n";
        let modules = Modules::parse(text).unwrap();
        let ext4 = &modules.0["ext4"];
        assert_eq!(ext4.size, 815104);
        assert_eq!(ext4.refcount, 2);
        assert_eq!(ext4.state, "Live");
        assert_eq!(modules.0.len(), 2);
    }

    #[test]
    fn test_slabinfo() {
        let slab = Slabinfo::parse(SLABINFO).unwrap();
        let dentry = slab.0["dentry"];
        assert_eq!(dentry.active_objs, 45000);
        assert_eq!(dentry.num_objs, 46000);
        assert_eq!(dentry.objsize, 192);
        assert_eq!(dentry.memory(), 46000 * 192);
        assert_eq!(slab.0.len(), 2);
    }

    #[test]
    fn test_slabinfo_bad_header() {
        let err = Slabinfo::parse("slabinfo - version: 1.1\n").unwrap_err();
        assert_eq!(err.kind(), ProbeErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let err = read_keyed_table("/nonexistent/proc/file").await.unwrap_err();
        assert_eq!(err.kind(), ProbeErrorKind::Network);
    }

    #[tokio::test]
    async fn test_read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slabinfo");
        std::fs::write(&path, SLABINFO).unwrap();
        let slab = Slabinfo::read(&path).await.unwrap();
        assert!(slab.0.contains_key("ext4_inode_cache"));
    }
}
