//! # IRR Routing
//!
//! Derived status computation over route records.
//!
//! - [`rpki`]: ROA trie, bulk and single route validators, ROA document
//!   parsing and pseudo records generated from ROAs
//! - [`preference`]: radix tree and the inter-registry preference resolver
//!
//! Both passes only report records whose status changed; applying the
//! changes goes through [`irr_storage::DatabaseHandler`] so every flip is
//! journaled.

pub mod error;
pub mod preference;
pub mod rpki;

pub use error::{RoaParseError, RoutingError, RoutingResult};
pub use preference::{PreferenceDeltas, RadixTree, RoutePreferenceResolver};
pub use rpki::{
    BulkRouteValidator, RoaTrie, RouteValidator, RpkiDeltas, SingleRouteValidator,
    parse_roa_document, pseudo_route_record,
};
