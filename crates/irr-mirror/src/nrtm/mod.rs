//! NRTM: parsing upstream responses, applying their operations, and
//! serving the local journal to downstream mirrors

pub mod generator;
pub mod operation;
pub mod parser;

pub use generator::{NO_NEWER_UPDATES, NrtmGenerator};
pub use operation::{ApplyCounts, ApplyOutcome, NrtmOperation};
pub use parser::{NrtmStreamParser, NrtmVersion, ParsedStream, StreamHeader};

/// Markers after which a replication response is complete
pub const END_MARKERS: &[&str] = &[
    "\n%END",
    "\n% END",
    "\n%ERROR",
    "\n% ERROR",
    "\n% Warning: there are no newer updates available",
    "\n% Warning (1): there are no newer updates available",
];

/// Replication query for everything after `newest`
pub fn replication_query(source: &str, serial_start: u64) -> String {
    format!("-g {source}:3:{serial_start}-LAST")
}
