//! RPKI origin validation

pub mod pseudo;
pub mod roa_parser;
pub mod trie;
pub mod validator;

pub use pseudo::{pseudo_route_record, pseudo_route_text};
pub use roa_parser::parse_roa_document;
pub use trie::RoaTrie;
pub use validator::{
    BulkRouteValidator, RouteValidator, RpkiDeltas, SingleRouteValidator, status_from_covering,
};
