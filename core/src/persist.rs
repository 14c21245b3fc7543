use crate::feature::FieldId;
use crate::index::HashIndex;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_items: usize,
    pub key_field: FieldId,
    pub created_at: String,
    pub version: u32,
}

pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    fn snapshot(&self) -> PathBuf { self.root.join("index.bin") }
    fn meta(&self) -> PathBuf { self.root.join("meta.json") }
}

pub fn save_index(paths: &IndexPaths, index: &HashIndex) -> Result<MetaFile> {
    create_dir_all(&paths.root)?;
    let mut f = BufWriter::new(File::create(paths.snapshot())?);
    bincode::serialize_into(&mut f, index)?;
    f.flush()?;

    let meta = MetaFile {
        num_items: index.len(),
        key_field: index.key_field(),
        created_at: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default(),
        version: SNAPSHOT_VERSION,
    };
    save_meta(paths, &meta)?;
    Ok(meta)
}

pub fn load_index(paths: &IndexPaths) -> Result<HashIndex> {
    let meta = load_meta(paths)?;
    if meta.version != SNAPSHOT_VERSION {
        bail!("snapshot version {} is not supported (expected {})", meta.version, SNAPSHOT_VERSION);
    }
    let f = File::open(paths.snapshot())
        .with_context(|| format!("opening {}", paths.snapshot().display()))?;
    let index: HashIndex = bincode::deserialize_from(BufReader::new(f))?;
    if index.len() != meta.num_items || index.key_field() != meta.key_field {
        bail!("snapshot at {} does not match its meta.json", paths.root.display());
    }
    Ok(index)
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.meta())?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    let mut f = File::open(paths.meta())
        .with_context(|| format!("opening {}", paths.meta().display()))?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: MetaFile = serde_json::from_str(&buf)?;
    Ok(meta)
}
