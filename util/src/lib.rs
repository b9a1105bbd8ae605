mod memory;
pub use memory::MemoryUnit;

mod duration;
pub use duration::{format_hm, format_hms, parse_duration};

mod timer;
pub use timer::Timer;

#[derive(thiserror::Error, Debug)]
#[error("Filesystem path is not valid UTF-8")]
pub struct PathEncodingError;

/// Failure to interpret a memory or duration string.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum UnitParseError {
    #[error("Not a valid memory amount: \"{0}\"")]
    Memory(String),
    #[error("Not a valid duration: \"{0}\"")]
    Duration(String),
}

pub type Hasher = std::hash::BuildHasherDefault<rustc_hash::FxHasher>;
pub type HashMap<K, V> = std::collections::HashMap<K, V, Hasher>;
pub type HashSet<T> = std::collections::HashSet<T, Hasher>;
