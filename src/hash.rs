use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest as _, Sha256};

use config::HashMode;

/// Number of digest bytes kept from the SHA-256 output.
const DIGEST_LEN: usize = 16;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Unable to hash input file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One component of a task's identity.
#[derive(Debug, Clone, PartialEq)]
pub enum HashItem {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<HashItem>),
    /// entries are hashed in the order given
    Map(Vec<(String, HashItem)>),
    File(PathBuf),
}

impl From<&str> for HashItem {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for HashItem {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// 128-bit task fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short human-readable form, `xx/yyyyyyy`.
    pub fn hash_log(&self) -> String {
        let hex = self.to_hex();
        format!("{}/{}", &hex[..2], &hex[2..9])
    }

    /// `<root>/<hex[0..2]>/<hex[2..]>`
    pub fn work_dir(&self, root: &Path) -> PathBuf {
        let hex = self.to_hex();
        let mut dir = PathBuf::with_capacity(root.as_os_str().len() + hex.len() + 2);
        dir.push(root);
        dir.push(&hex[..2]);
        dir.push(&hex[2..]);
        dir
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental digest builder. Every item is fed with a type tag and a
/// length prefix, so different item sequences never produce the same stream.
#[derive(Debug, Clone)]
pub struct TaskHasher {
    mode: HashMode,
    sha: Sha256,
}

impl TaskHasher {
    pub fn new(mode: HashMode) -> Self {
        Self {
            mode,
            sha: Sha256::new(),
        }
    }

    pub fn update(&mut self, item: &HashItem) -> Result<&mut Self, Error> {
        match item {
            HashItem::Str(s) => self.tagged(b's', s.as_bytes()),
            HashItem::Int(n) => self.tagged(b'i', &n.to_le_bytes()),
            HashItem::Bool(b) => self.tagged(b'b', &[u8::from(*b)]),
            HashItem::List(items) => {
                self.header(b'l', items.len() as u64);
                for item in items {
                    self.update(item)?;
                }
            }
            HashItem::Map(entries) => {
                self.header(b'm', entries.len() as u64);
                for (key, value) in entries {
                    self.tagged(b'k', key.as_bytes());
                    self.update(value)?;
                }
            }
            HashItem::File(path) => self.file(path)?,
        }
        Ok(self)
    }

    pub fn finish(self) -> Digest {
        let full = self.sha.finalize();
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(&full[..DIGEST_LEN]);
        Digest(bytes)
    }

    fn header(&mut self, tag: u8, len: u64) {
        self.sha.update([tag]);
        self.sha.update(len.to_le_bytes());
    }

    fn tagged(&mut self, tag: u8, bytes: &[u8]) {
        self.header(tag, bytes.len() as u64);
        self.sha.update(bytes);
    }

    fn file(&mut self, path: &Path) -> Result<(), Error> {
        let io_err = |source| Error::Io {
            path: path.to_path_buf(),
            source,
        };
        match self.mode {
            HashMode::Standard => {
                let stat = std::fs::metadata(path).and_then(|meta| Ok((meta.len(), meta.modified()?)));
                let Ok((len, modified)) = stat else {
                    // staging reports the missing file; identity is the path alone.
                    log::debug!("hashing unreadable input {:?} by path", path);
                    self.tagged(b'a', path.to_string_lossy().as_bytes());
                    return Ok(());
                };
                let mtime = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
                self.tagged(b'f', path.to_string_lossy().as_bytes());
                self.sha.update(len.to_le_bytes());
                self.sha.update(mtime.as_secs().to_le_bytes());
                self.sha.update(mtime.subsec_nanos().to_le_bytes());
            }
            HashMode::Deep => {
                let mut file = File::open(path).map_err(io_err)?;
                let len = file.metadata().map_err(io_err)?.len();
                self.header(b'F', len);
                std::io::copy(&mut file, &mut self.sha).map_err(io_err)?;
            }
        }
        Ok(())
    }
}

/// Digest of `items`, in order.
pub fn digest(items: &[HashItem], mode: HashMode) -> Result<Digest, Error> {
    let mut hasher = TaskHasher::new(mode);
    for item in items {
        hasher.update(item)?;
    }
    Ok(hasher.finish())
}
