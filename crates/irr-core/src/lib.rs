//! # IRR Core
//!
//! Core types shared by every crate of the routing registry mirror.
//!
//! ## Key Types
//!
//! - [`ObjectClass`]: closed table of known RPSL object classes
//! - [`Record`]: a stored registry object with its derived status fields
//! - [`RecordParser`] / [`RpslParser`]: object text to [`Record`]
//! - [`Roa`]: route origin authorisation
//! - [`PrefixBits`]: left-aligned network bits for prefix trees
//! - [`Settings`]: daemon configuration loaded from TOML

pub mod config;
pub mod error;
pub mod object_class;
pub mod prefix;
pub mod record;
pub mod roa;
pub mod rpsl;

pub use config::{LogFormat, LogSettings, RpkiSettings, Settings, SourceSettings};
pub use error::{ConfigError, CoreError, CoreResult, ParseError};
pub use object_class::{ClassMeta, ObjectClass};
pub use prefix::{AddressFamily, PrefixBits};
pub use record::{
    DatabaseOperation, PSEUDO_SOURCE, Record, RecordKey, RoutePreferenceStatus, RpkiStatus,
    ScopeFilterStatus, format_asn, parse_asn,
};
pub use roa::Roa;
pub use rpsl::{RecordParser, RpslParser};
