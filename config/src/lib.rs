//! Read-only view of the directives that govern how a task is scheduled,
//! cached and recovered.
//!
//! A [`ResourceSpec`] is filled in by whatever collaborator owns pipeline
//! configuration, either through its typed fields or through the string-keyed
//! [`ResourceSpec::set`]. The execution core only ever reads it.

mod resource;
pub use resource::{DirectiveValue, ResourceSpec};

mod strategy;
pub use strategy::{CacheMode, ErrorStrategy, HashMode};

/// Separator for list-valued directives written as a single string (`a:b:c`).
pub const LIST_DELIM: char = ':';

/// Prefix for opaque backend-specific pass-through options (`ext.account`).
pub const EXTRA_PREFIX: &str = "ext.";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Unknown directive \"{0}\"")]
    UnknownDirective(String),
    #[error("Directive \"{0}\" is not set")]
    MissingDirective(String),
    #[error("Invalid value \"{value}\" for directive \"{key}\"")]
    InvalidValue { key: String, value: String },
    #[error(transparent)]
    Unit(#[from] util::UnitParseError),
}
