//! Per-identity embedding galleries on disk.
//!
//! Current format is a single versioned binary file, published
//! atomically via tmp-and-rename. Two legacy layouts remain readable:
//! a headerless binary file and a directory of comma-separated text
//! vectors.
//!
//! Versioned layout, all integers little-endian:
//! ```text
//! "FGAL"  magic
//! u32     format version (1)
//! u32     created_at length, then that many RFC 3339 bytes
//! u64     record count
//! per record:
//!   u64   dim, then dim f32 values
//!   4 f32 source bbox [x, y, w, h]
//!   f32   detector confidence
//! u8      mean flag, then (u64 dim + values) when 1
//! ```

use chrono::Utc;
use facegate_core::types::{Embedding, Gallery, StoredEmbedding};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

const GALLERY_MAGIC: &[u8; 4] = b"FGAL";
const GALLERY_VERSION: u32 = 1;

const GALLERY_FILE: &str = "gallery.bin";
const LEGACY_BINARY_FILE: &str = "embeddings.bin";
const LEGACY_MEAN_FILE: &str = "mean.txt";

/// Hard cap on declared counts and dims while parsing, so a corrupt
/// header cannot trigger a huge allocation.
const MAX_DECLARED: u64 = 1 << 20;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no gallery for identity {0}")]
    NotFound(String),
    #[error("corrupt gallery file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("identity id {0:?} is not a valid name")]
    BadIdentity(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Gallery persistence rooted at `<base>/embeddings/`.
pub struct GalleryStore {
    root: PathBuf,
}

impl GalleryStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            root: base.into().join("embeddings"),
        }
    }

    fn identity_dir(&self, employee_id: &str) -> Result<PathBuf, StoreError> {
        validate_identity(employee_id)?;
        Ok(self.root.join(format!("employee_{employee_id}")))
    }

    /// Where an identity's gallery file lives (whether or not it exists).
    pub fn gallery_path(&self, employee_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.identity_dir(employee_id)?.join(GALLERY_FILE))
    }

    /// Persist a gallery, replacing any previous one atomically.
    pub fn save(&self, gallery: &Gallery) -> Result<(), StoreError> {
        let dir = self.identity_dir(&gallery.employee_id)?;
        fs::create_dir_all(&dir)?;

        let created_at = if gallery.created_at.is_empty() {
            Utc::now().to_rfc3339()
        } else {
            gallery.created_at.clone()
        };

        let bytes = encode_gallery(gallery, &created_at);

        let final_path = dir.join(GALLERY_FILE);
        let tmp_path = dir.join(format!("{GALLERY_FILE}.tmp"));
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, &final_path)?;

        tracing::info!(
            employee_id = %gallery.employee_id,
            embeddings = gallery.embeddings.len(),
            path = %final_path.display(),
            "saved gallery"
        );
        Ok(())
    }

    /// Load one identity's gallery, trying the versioned file first and
    /// the two legacy layouts after.
    pub fn load(&self, employee_id: &str) -> Result<Gallery, StoreError> {
        let dir = self.identity_dir(employee_id)?;

        let versioned = dir.join(GALLERY_FILE);
        if versioned.exists() {
            return decode_gallery_file(&versioned, employee_id);
        }

        let legacy_bin = dir.join(LEGACY_BINARY_FILE);
        if legacy_bin.exists() {
            tracing::debug!(employee_id, "reading legacy binary gallery");
            return decode_legacy_binary(&legacy_bin, employee_id);
        }

        if dir.join("emb_0.txt").exists() {
            tracing::debug!(employee_id, "reading legacy text gallery");
            return decode_legacy_text(&dir, employee_id);
        }

        Err(StoreError::NotFound(employee_id.to_string()))
    }

    pub fn exists(&self, employee_id: &str) -> bool {
        self.identity_dir(employee_id)
            .map(|dir| {
                dir.join(GALLERY_FILE).exists()
                    || dir.join(LEGACY_BINARY_FILE).exists()
                    || dir.join("emb_0.txt").exists()
            })
            .unwrap_or(false)
    }

    /// All identities with a readable gallery, sorted.
    pub fn list_identities(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_prefix("employee_") {
                if self.exists(id) {
                    ids.push(id.to_string());
                }
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Load every readable gallery. Unreadable ones are logged and
    /// skipped so one corrupt file cannot block identification.
    pub fn load_all(&self) -> Result<Vec<Gallery>, StoreError> {
        let mut galleries = Vec::new();
        for id in self.list_identities()? {
            match self.load(&id) {
                Ok(g) => galleries.push(g),
                Err(e) => tracing::warn!(employee_id = %id, error = %e, "skipping unreadable gallery"),
            }
        }
        Ok(galleries)
    }

    /// Remove an identity's gallery. Missing is not an error.
    pub fn remove(&self, employee_id: &str) -> Result<(), StoreError> {
        let dir = self.identity_dir(employee_id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::info!(employee_id, "removed gallery");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Identity ids become directory names; restrict them accordingly.
pub(crate) fn validate_identity(employee_id: &str) -> Result<(), StoreError> {
    let ok = !employee_id.is_empty()
        && employee_id.len() <= 64
        && employee_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::BadIdentity(employee_id.to_string()))
    }
}

fn encode_gallery(gallery: &Gallery, created_at: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(GALLERY_MAGIC);
    out.extend_from_slice(&GALLERY_VERSION.to_le_bytes());
    out.extend_from_slice(&(created_at.len() as u32).to_le_bytes());
    out.extend_from_slice(created_at.as_bytes());
    out.extend_from_slice(&(gallery.embeddings.len() as u64).to_le_bytes());

    for stored in &gallery.embeddings {
        out.extend_from_slice(&(stored.embedding.dim() as u64).to_le_bytes());
        for v in &stored.embedding.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for b in stored.bbox {
            out.extend_from_slice(&b.to_le_bytes());
        }
        out.extend_from_slice(&stored.confidence.to_le_bytes());
    }

    match &gallery.mean {
        Some(mean) if !mean.is_empty() => {
            out.push(1);
            out.extend_from_slice(&(mean.dim() as u64).to_le_bytes());
            for v in &mean.values {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        _ => out.push(0),
    }

    out
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], StoreError> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(StoreError::Corrupt {
                path: self.path.to_path_buf(),
                reason: format!("truncated at offset {}", self.pos),
            }),
        }
    }

    fn u8(&mut self) -> Result<u8, StoreError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, StoreError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, StoreError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> Result<f32, StoreError> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32, StoreError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn bounded(&mut self, what: &str) -> Result<usize, StoreError> {
        let n = self.u64()?;
        if n > MAX_DECLARED {
            return Err(StoreError::Corrupt {
                path: self.path.to_path_buf(),
                reason: format!("implausible {what}: {n}"),
            });
        }
        Ok(n as usize)
    }

    fn f32_vec(&mut self, dim: usize) -> Result<Vec<f32>, StoreError> {
        let mut values = Vec::with_capacity(dim);
        for _ in 0..dim {
            values.push(self.f32()?);
        }
        Ok(values)
    }
}

fn decode_gallery_file(path: &Path, employee_id: &str) -> Result<Gallery, StoreError> {
    let data = fs::read(path)?;
    let mut r = Reader { data: &data, pos: 0, path };

    if r.take(4)? != GALLERY_MAGIC {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: "bad magic".into(),
        });
    }
    let version = r.u32()?;
    if version != GALLERY_VERSION {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("unsupported version {version}"),
        });
    }

    let ts_len = r.u32()? as usize;
    if ts_len > 128 {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("implausible timestamp length {ts_len}"),
        });
    }
    let created_at = String::from_utf8_lossy(r.take(ts_len)?).into_owned();

    let count = r.bounded("record count")?;
    let mut embeddings = Vec::with_capacity(count);
    for _ in 0..count {
        let dim = r.bounded("embedding dim")?;
        let values = r.f32_vec(dim)?;
        let bbox = [r.f32()?, r.f32()?, r.f32()?, r.f32()?];
        let confidence = r.f32()?;
        embeddings.push(StoredEmbedding {
            embedding: Embedding::new(values),
            bbox,
            confidence,
        });
    }

    let mean = if r.u8()? == 1 {
        let dim = r.bounded("mean dim")?;
        Some(Embedding::new(r.f32_vec(dim)?))
    } else {
        None
    };

    Ok(Gallery {
        employee_id: employee_id.to_string(),
        embeddings,
        mean,
        created_at,
    })
}

/// Legacy headerless binary: u64 count, then per record u64 dim +
/// f32 values + 4 i32 bbox + f32 confidence. No mean on disk; it is
/// recomputed on load.
fn decode_legacy_binary(path: &Path, employee_id: &str) -> Result<Gallery, StoreError> {
    let data = fs::read(path)?;
    let mut r = Reader { data: &data, pos: 0, path };

    let count = r.bounded("record count")?;
    let mut embeddings = Vec::with_capacity(count);
    for _ in 0..count {
        let dim = r.bounded("embedding dim")?;
        let values = r.f32_vec(dim)?;
        let bbox = [
            r.i32()? as f32,
            r.i32()? as f32,
            r.i32()? as f32,
            r.i32()? as f32,
        ];
        let confidence = r.f32()?;
        embeddings.push(StoredEmbedding {
            embedding: Embedding::new(values),
            bbox,
            confidence,
        });
    }

    let mean = recompute_mean(&embeddings);
    Ok(Gallery {
        employee_id: employee_id.to_string(),
        embeddings,
        mean,
        created_at: String::new(),
    })
}

/// Legacy text layout: emb_0.txt, emb_1.txt, ... each a single line of
/// comma-separated floats, plus an optional mean.txt.
fn decode_legacy_text(dir: &Path, employee_id: &str) -> Result<Gallery, StoreError> {
    let mut embeddings = Vec::new();

    for i in 0.. {
        let path = dir.join(format!("emb_{i}.txt"));
        if !path.exists() {
            break;
        }
        let values = parse_float_line(&path)?;
        embeddings.push(StoredEmbedding {
            embedding: Embedding::new(values),
            bbox: [0.0; 4],
            confidence: 0.0,
        });
    }

    let mean_path = dir.join(LEGACY_MEAN_FILE);
    let mean = if mean_path.exists() {
        Some(Embedding::new(parse_float_line(&mean_path)?))
    } else {
        recompute_mean(&embeddings)
    };

    Ok(Gallery {
        employee_id: employee_id.to_string(),
        embeddings,
        mean,
        created_at: String::new(),
    })
}

fn parse_float_line(path: &Path) -> Result<Vec<f32>, StoreError> {
    let mut text = String::new();
    fs::File::open(path)?.read_to_string(&mut text)?;

    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f32>().map_err(|_| StoreError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("bad float {s:?}"),
            })
        })
        .collect()
}

fn recompute_mean(embeddings: &[StoredEmbedding]) -> Option<Embedding> {
    let vectors: Vec<Embedding> = embeddings.iter().map(|s| s.embedding.clone()).collect();
    let mean = Embedding::mean_of(&vectors);
    (!mean.is_empty()).then_some(mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_gallery(id: &str) -> Gallery {
        let embeddings = vec![
            StoredEmbedding {
                embedding: Embedding::new(vec![1.0, 0.0, 0.0]),
                bbox: [10.0, 20.0, 100.0, 120.0],
                confidence: 0.92,
            },
            StoredEmbedding {
                embedding: Embedding::new(vec![0.0, 1.0, 0.0]),
                bbox: [12.0, 22.0, 98.0, 118.0],
                confidence: 0.88,
            },
        ];
        Gallery {
            employee_id: id.to_string(),
            mean: Some(Embedding::new(vec![0.5, 0.5, 0.0])),
            embeddings,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path());

        store.save(&sample_gallery("emp42")).unwrap();
        let loaded = store.load("emp42").unwrap();

        assert_eq!(loaded.employee_id, "emp42");
        assert_eq!(loaded.embeddings.len(), 2);
        assert_eq!(loaded.embeddings[0].embedding.values, vec![1.0, 0.0, 0.0]);
        assert_eq!(loaded.embeddings[1].bbox, [12.0, 22.0, 98.0, 118.0]);
        assert!((loaded.embeddings[1].confidence - 0.88).abs() < 1e-6);
        assert_eq!(loaded.mean.unwrap().values, vec![0.5, 0.5, 0.0]);
        assert!(!loaded.created_at.is_empty());
    }

    #[test]
    fn test_save_leaves_no_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path());
        store.save(&sample_gallery("emp1")).unwrap();

        let identity_dir = dir.path().join("embeddings/employee_emp1");
        let names: Vec<String> = fs::read_dir(&identity_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![GALLERY_FILE.to_string()]);
    }

    #[test]
    fn test_load_missing_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path());
        assert!(matches!(store.load("ghost"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_bad_identity_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path());
        assert!(matches!(store.load("../etc"), Err(StoreError::BadIdentity(_))));
        assert!(matches!(store.load(""), Err(StoreError::BadIdentity(_))));
    }

    #[test]
    fn test_corrupt_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path());
        let identity_dir = dir.path().join("embeddings/employee_emp1");
        fs::create_dir_all(&identity_dir).unwrap();
        fs::write(identity_dir.join(GALLERY_FILE), b"XXXX junk").unwrap();

        assert!(matches!(store.load("emp1"), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path());
        store.save(&sample_gallery("emp1")).unwrap();

        let path = dir.path().join("embeddings/employee_emp1").join(GALLERY_FILE);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert!(matches!(store.load("emp1"), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_legacy_binary_read() {
        let dir = tempfile::tempdir().unwrap();
        let identity_dir = dir.path().join("embeddings/employee_old1");
        fs::create_dir_all(&identity_dir).unwrap();

        // One record: dim 2, values [0.5, 0.5], bbox i32s, confidence.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&2u64.to_le_bytes());
        bytes.extend_from_slice(&0.5f32.to_le_bytes());
        bytes.extend_from_slice(&0.5f32.to_le_bytes());
        for v in [10i32, 20, 30, 40] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.extend_from_slice(&0.9f32.to_le_bytes());
        fs::write(identity_dir.join(LEGACY_BINARY_FILE), &bytes).unwrap();

        let store = GalleryStore::new(dir.path());
        let gallery = store.load("old1").unwrap();
        assert_eq!(gallery.embeddings.len(), 1);
        assert_eq!(gallery.embeddings[0].embedding.values, vec![0.5, 0.5]);
        assert_eq!(gallery.embeddings[0].bbox, [10.0, 20.0, 30.0, 40.0]);
        assert_eq!(gallery.mean.unwrap().values, vec![0.5, 0.5]);
        assert!(gallery.created_at.is_empty());
    }

    #[test]
    fn test_legacy_text_read() {
        let dir = tempfile::tempdir().unwrap();
        let identity_dir = dir.path().join("embeddings/employee_old2");
        fs::create_dir_all(&identity_dir).unwrap();
        fs::write(identity_dir.join("emb_0.txt"), "1.0, 0.0, 0.0").unwrap();
        fs::write(identity_dir.join("emb_1.txt"), "0.0,1.0,0.0").unwrap();
        fs::write(identity_dir.join(LEGACY_MEAN_FILE), "0.5,0.5,0.0").unwrap();

        let store = GalleryStore::new(dir.path());
        let gallery = store.load("old2").unwrap();
        assert_eq!(gallery.embeddings.len(), 2);
        assert_eq!(gallery.embeddings[1].embedding.values, vec![0.0, 1.0, 0.0]);
        assert_eq!(gallery.mean.unwrap().values, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_legacy_text_mean_recomputed_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let identity_dir = dir.path().join("embeddings/employee_old3");
        fs::create_dir_all(&identity_dir).unwrap();
        fs::write(identity_dir.join("emb_0.txt"), "1.0,0.0").unwrap();
        fs::write(identity_dir.join("emb_1.txt"), "0.0,1.0").unwrap();

        let store = GalleryStore::new(dir.path());
        let gallery = store.load("old3").unwrap();
        assert_eq!(gallery.mean.unwrap().values, vec![0.5, 0.5]);
    }

    #[test]
    fn test_list_identities() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path());
        store.save(&sample_gallery("bbb")).unwrap();
        store.save(&sample_gallery("aaa")).unwrap();

        // A stray directory without gallery data is ignored.
        fs::create_dir_all(dir.path().join("embeddings/employee_empty")).unwrap();
        fs::create_dir_all(dir.path().join("embeddings/unrelated")).unwrap();

        assert_eq!(store.list_identities().unwrap(), vec!["aaa", "bbb"]);
    }

    #[test]
    fn test_list_identities_no_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path().join("never-created"));
        assert!(store.list_identities().unwrap().is_empty());
    }

    #[test]
    fn test_load_all_skips_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path());
        store.save(&sample_gallery("good")).unwrap();

        let bad_dir = dir.path().join("embeddings/employee_bad");
        fs::create_dir_all(&bad_dir).unwrap();
        fs::write(bad_dir.join(GALLERY_FILE), b"oops").unwrap();

        let galleries = store.load_all().unwrap();
        assert_eq!(galleries.len(), 1);
        assert_eq!(galleries[0].employee_id, "good");
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path());
        store.save(&sample_gallery("emp1")).unwrap();
        assert!(store.exists("emp1"));

        store.remove("emp1").unwrap();
        assert!(!store.exists("emp1"));
        store.remove("emp1").unwrap(); // second remove is fine
    }

    #[test]
    fn test_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path());
        store.save(&sample_gallery("emp1")).unwrap();

        let mut smaller = sample_gallery("emp1");
        smaller.embeddings.truncate(1);
        store.save(&smaller).unwrap();

        assert_eq!(store.load("emp1").unwrap().embeddings.len(), 1);
    }
}
