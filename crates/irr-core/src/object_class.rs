//! Closed table of known RPSL object classes
//!
//! Every class the registry understands has one [`ClassMeta`] entry in a
//! static table. Lookups by name go through that table; there is no
//! runtime registration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Known object classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectClass {
    AsBlock,
    AsSet,
    AutNum,
    Domain,
    FilterSet,
    InetRtr,
    Inet6num,
    Inetnum,
    KeyCert,
    Mntner,
    PeeringSet,
    Person,
    Role,
    Route,
    Route6,
    RouteSet,
    RtrSet,
}

/// Static metadata for one object class
#[derive(Debug)]
pub struct ClassMeta {
    pub class: ObjectClass,
    /// Name as used in the first attribute of an object
    pub name: &'static str,
    /// Attributes whose values form the primary key
    pub primary_key: &'static [&'static str],
    /// Attributes a strictly validated object must carry
    pub mandatory: &'static [&'static str],
    /// Class specific optional attributes
    pub optional: &'static [&'static str],
    /// Whether primary key values are case-folded to upper case
    pub uppercase_pk: bool,
}

/// Attributes accepted on every class
pub const COMMON_ATTRIBUTES: &[&str] = &[
    "descr",
    "remarks",
    "notify",
    "mnt-by",
    "changed",
    "admin-c",
    "tech-c",
    "org",
    "created",
    "last-modified",
    "source",
];

static CLASS_TABLE: [ClassMeta; 17] = [
    ClassMeta {
        class: ObjectClass::AsBlock,
        name: "as-block",
        primary_key: &["as-block"],
        mandatory: &["as-block", "source"],
        optional: &["mnt-lower"],
        uppercase_pk: true,
    },
    ClassMeta {
        class: ObjectClass::AsSet,
        name: "as-set",
        primary_key: &["as-set"],
        mandatory: &["as-set", "mnt-by", "source"],
        optional: &["members", "mbrs-by-ref"],
        uppercase_pk: true,
    },
    ClassMeta {
        class: ObjectClass::AutNum,
        name: "aut-num",
        primary_key: &["aut-num"],
        mandatory: &["aut-num", "as-name", "mnt-by", "source"],
        optional: &[
            "member-of", "import", "mp-import", "export", "mp-export", "default", "mp-default",
            "import-via", "export-via", "status",
        ],
        uppercase_pk: true,
    },
    ClassMeta {
        class: ObjectClass::Domain,
        name: "domain",
        primary_key: &["domain"],
        mandatory: &["domain", "source"],
        optional: &["nserver", "zone-c", "ds-rdata", "refer"],
        uppercase_pk: false,
    },
    ClassMeta {
        class: ObjectClass::FilterSet,
        name: "filter-set",
        primary_key: &["filter-set"],
        mandatory: &["filter-set", "source"],
        optional: &["filter", "mp-filter"],
        uppercase_pk: true,
    },
    ClassMeta {
        class: ObjectClass::InetRtr,
        name: "inet-rtr",
        primary_key: &["inet-rtr"],
        mandatory: &["inet-rtr", "local-as", "ifaddr", "source"],
        optional: &["alias", "interface", "peer", "mp-peer", "member-of"],
        uppercase_pk: false,
    },
    ClassMeta {
        class: ObjectClass::Inet6num,
        name: "inet6num",
        primary_key: &["inet6num"],
        mandatory: &["inet6num", "netname", "country", "status", "source"],
        optional: &["mnt-lower", "mnt-routes", "mnt-irt", "geoloc", "language"],
        uppercase_pk: false,
    },
    ClassMeta {
        class: ObjectClass::Inetnum,
        name: "inetnum",
        primary_key: &["inetnum"],
        mandatory: &["inetnum", "netname", "country", "status", "source"],
        optional: &["mnt-lower", "mnt-routes", "mnt-irt", "geoloc", "language"],
        uppercase_pk: false,
    },
    ClassMeta {
        class: ObjectClass::KeyCert,
        name: "key-cert",
        primary_key: &["key-cert"],
        mandatory: &["key-cert", "certif", "source"],
        optional: &["method", "owner", "fingerpr"],
        uppercase_pk: true,
    },
    ClassMeta {
        class: ObjectClass::Mntner,
        name: "mntner",
        primary_key: &["mntner"],
        mandatory: &["mntner", "upd-to", "auth", "mnt-by", "source"],
        optional: &["mnt-nfy", "referral-by"],
        uppercase_pk: true,
    },
    ClassMeta {
        class: ObjectClass::PeeringSet,
        name: "peering-set",
        primary_key: &["peering-set"],
        mandatory: &["peering-set", "source"],
        optional: &["peering", "mp-peering"],
        uppercase_pk: true,
    },
    ClassMeta {
        class: ObjectClass::Person,
        name: "person",
        primary_key: &["nic-hdl"],
        mandatory: &["person", "address", "phone", "e-mail", "nic-hdl", "source"],
        optional: &["fax-no"],
        uppercase_pk: true,
    },
    ClassMeta {
        class: ObjectClass::Role,
        name: "role",
        primary_key: &["nic-hdl"],
        mandatory: &["role", "address", "e-mail", "nic-hdl", "source"],
        optional: &["phone", "fax-no", "trouble", "abuse-mailbox"],
        uppercase_pk: true,
    },
    ClassMeta {
        class: ObjectClass::Route,
        name: "route",
        primary_key: &["route", "origin"],
        mandatory: &["route", "origin", "mnt-by", "source"],
        optional: &[
            "holes", "member-of", "inject", "aggr-mtd", "aggr-bndry", "export-comps",
            "components", "geoidx", "roa-uri", "max-length", "pingable", "ping-hdl",
        ],
        uppercase_pk: true,
    },
    ClassMeta {
        class: ObjectClass::Route6,
        name: "route6",
        primary_key: &["route6", "origin"],
        mandatory: &["route6", "origin", "mnt-by", "source"],
        optional: &[
            "holes", "member-of", "inject", "aggr-mtd", "aggr-bndry", "export-comps",
            "components", "geoidx", "roa-uri", "max-length", "pingable", "ping-hdl",
        ],
        uppercase_pk: true,
    },
    ClassMeta {
        class: ObjectClass::RouteSet,
        name: "route-set",
        primary_key: &["route-set"],
        mandatory: &["route-set", "mnt-by", "source"],
        optional: &["members", "mp-members", "mbrs-by-ref"],
        uppercase_pk: true,
    },
    ClassMeta {
        class: ObjectClass::RtrSet,
        name: "rtr-set",
        primary_key: &["rtr-set"],
        mandatory: &["rtr-set", "source"],
        optional: &["members", "mp-members", "mbrs-by-ref"],
        uppercase_pk: true,
    },
];

impl ObjectClass {
    /// All known classes in table order
    pub fn all() -> impl Iterator<Item = ObjectClass> {
        CLASS_TABLE.iter().map(|meta| meta.class)
    }

    /// Static metadata for this class
    pub fn meta(&self) -> &'static ClassMeta {
        // Table order matches declaration order
        &CLASS_TABLE[*self as usize]
    }

    /// Look up a class by its RPSL name (case-insensitive)
    pub fn from_name(name: &str) -> Option<ObjectClass> {
        CLASS_TABLE
            .iter()
            .find(|meta| meta.name.eq_ignore_ascii_case(name.trim()))
            .map(|meta| meta.class)
    }

    /// RPSL name of this class
    pub fn as_str(&self) -> &'static str {
        self.meta().name
    }

    /// Whether this class describes a route announcement
    pub fn is_route(&self) -> bool {
        matches!(self, ObjectClass::Route | ObjectClass::Route6)
    }

    /// Whether `attribute` is accepted on this class
    pub fn knows_attribute(&self, attribute: &str) -> bool {
        let meta = self.meta();
        meta.mandatory.contains(&attribute)
            || meta.optional.contains(&attribute)
            || COMMON_ATTRIBUTES.contains(&attribute)
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectClass {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectClass::from_name(s).ok_or_else(|| ParseError::UnknownClass(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_declaration_order() {
        for (index, meta) in CLASS_TABLE.iter().enumerate() {
            assert_eq!(meta.class as usize, index, "{} out of order", meta.name);
        }
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(ObjectClass::from_name("route6"), Some(ObjectClass::Route6));
        assert_eq!(ObjectClass::from_name("AUT-NUM"), Some(ObjectClass::AutNum));
        assert_eq!(ObjectClass::from_name("irt"), None);
        assert!("bogus".parse::<ObjectClass>().is_err());
    }

    #[test]
    fn test_route_primary_key_spans_origin() {
        assert_eq!(ObjectClass::Route.meta().primary_key, &["route", "origin"]);
        assert!(ObjectClass::Route.is_route());
        assert!(!ObjectClass::Mntner.is_route());
    }

    #[test]
    fn test_known_attributes() {
        assert!(ObjectClass::Route.knows_attribute("max-length"));
        assert!(ObjectClass::Route.knows_attribute("remarks"));
        assert!(!ObjectClass::Route.knows_attribute("favourite-colour"));
    }
}
