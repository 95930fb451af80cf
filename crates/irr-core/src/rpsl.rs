//! Lenient RPSL text parser
//!
//! Turns one object paragraph into a [`Record`]. The lenient mode used for
//! mirrored data tolerates unknown attributes and missing non-key
//! attributes, but still rejects text that is not structurally an object.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::Utc;
use ipnetwork::IpNetwork;

use crate::error::ParseError;
use crate::object_class::ObjectClass;
use crate::prefix::{network_bounds, normalise};
use crate::record::{
    Record, RoutePreferenceStatus, RpkiStatus, ScopeFilterStatus, format_asn, parse_asn,
};

/// Text to record conversion
pub trait RecordParser: Send + Sync {
    /// Parse one object; `strict` enables full attribute validation
    fn record_from_text(&self, text: &str, strict: bool) -> Result<Record, ParseError>;
}

/// Default parser for the classes in the object class table
#[derive(Debug, Clone, Copy, Default)]
pub struct RpslParser;

impl RpslParser {
    pub fn new() -> Self {
        Self
    }
}

impl RecordParser for RpslParser {
    fn record_from_text(&self, text: &str, strict: bool) -> Result<Record, ParseError> {
        let (pairs, object_text) = split_attributes(text)?;
        let (class_name, _) = pairs
            .first()
            .ok_or_else(|| ParseError::malformed("object contains no attributes"))?;
        let object_class = ObjectClass::from_name(class_name)
            .ok_or_else(|| ParseError::UnknownClass(class_name.clone()))?;

        let mut attributes: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in &pairs {
            attributes.entry(name.clone()).or_default().push(value.clone());
        }

        if strict {
            validate_strict(object_class, &pairs, &attributes)?;
        }

        let mut record = Record {
            rpsl_pk: String::new(),
            source: attributes
                .get("source")
                .and_then(|v| v.first())
                .map(|s| s.to_ascii_uppercase())
                .unwrap_or_default(),
            object_class,
            object_text,
            attributes,
            prefix: None,
            ip_first: None,
            ip_last: None,
            asn_first: None,
            asn_last: None,
            rpki_status: RpkiStatus::NotFound,
            scopefilter_status: ScopeFilterStatus::InScope,
            route_preference_status: RoutePreferenceStatus::Visible,
            updated: Utc::now(),
        };
        derive_key_fields(&mut record)?;
        Ok(record)
    }
}

/// Split text into `(name, value)` pairs, folding continuation lines
///
/// Also returns the normalised object text without comment lines.
fn split_attributes(text: &str) -> Result<(Vec<(String, String)>, String), ParseError> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut kept_lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        let trimmed_end = line.trim_end();
        if trimmed_end.is_empty() || trimmed_end.starts_with('%') || trimmed_end.starts_with('#')
        {
            continue;
        }

        if line.starts_with([' ', '\t', '+']) {
            let (_, value) = pairs.last_mut().ok_or_else(|| {
                ParseError::malformed("continuation line without preceding attribute")
            })?;
            let continued = strip_comment(trimmed_end.trim_start_matches('+'));
            if !continued.is_empty() {
                if !value.is_empty() {
                    value.push(' ');
                }
                value.push_str(continued);
            }
            kept_lines.push(trimmed_end);
            continue;
        }

        let (name, value) = trimmed_end
            .split_once(':')
            .ok_or_else(|| ParseError::malformed(format!("line is not an attribute: {line:?}")))?;
        let name = name.trim();
        let valid_name = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid_name {
            return Err(ParseError::malformed(format!(
                "invalid attribute name {name:?}"
            )));
        }
        pairs.push((name.to_ascii_lowercase(), strip_comment(value).to_string()));
        kept_lines.push(trimmed_end);
    }

    let mut object_text = kept_lines.join("\n");
    object_text.push('\n');
    Ok((pairs, object_text))
}

fn strip_comment(value: &str) -> &str {
    value.split('#').next().unwrap_or_default().trim()
}

fn validate_strict(
    class: ObjectClass,
    pairs: &[(String, String)],
    attributes: &BTreeMap<String, Vec<String>>,
) -> Result<(), ParseError> {
    let meta = class.meta();
    for mandatory in meta.mandatory {
        let present = attributes
            .get(*mandatory)
            .is_some_and(|values| values.iter().any(|v| !v.is_empty()));
        if !present {
            return Err(ParseError::MissingAttribute {
                class: meta.name.to_string(),
                attribute: mandatory.to_string(),
            });
        }
    }
    for (name, _) in pairs {
        if !class.knows_attribute(name) {
            return Err(ParseError::malformed(format!(
                "unknown attribute {name} on {} object",
                meta.name
            )));
        }
    }
    Ok(())
}

fn required<'a>(record: &'a Record, attribute: &str) -> Result<&'a str, ParseError> {
    record
        .first_value(attribute)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ParseError::MissingAttribute {
            class: record.object_class.as_str().to_string(),
            attribute: attribute.to_string(),
        })
}

fn parse_network(attribute: &str, value: &str) -> Result<IpNetwork, ParseError> {
    value
        .parse::<IpNetwork>()
        .map(|network| normalise(&network))
        .map_err(|e| ParseError::invalid(attribute, value, e.to_string()))
}

fn parse_address(attribute: &str, value: &str) -> Result<IpAddr, ParseError> {
    value
        .trim()
        .parse::<IpAddr>()
        .map_err(|e| ParseError::invalid(attribute, value, e.to_string()))
}

fn parse_origin(value: &str) -> Result<u32, ParseError> {
    parse_asn(value).ok_or_else(|| ParseError::invalid("origin", value, "not an AS number"))
}

/// Fill primary key, IP and ASN columns from the attribute map
fn derive_key_fields(record: &mut Record) -> Result<(), ParseError> {
    let class = record.object_class;
    match class {
        ObjectClass::Route | ObjectClass::Route6 => {
            let attribute = class.as_str();
            let network = parse_network(attribute, required(record, attribute)?)?;
            let wrong_family = match class {
                ObjectClass::Route => !network.is_ipv4(),
                _ => !network.is_ipv6(),
            };
            if wrong_family {
                return Err(ParseError::invalid(
                    attribute,
                    network.to_string(),
                    "address family does not match object class",
                ));
            }
            let origin = parse_origin(required(record, "origin")?)?;
            let (first, last) = network_bounds(&network);
            record.rpsl_pk = format!("{}{}", network, format_asn(origin));
            record.prefix = Some(network);
            record.ip_first = Some(first);
            record.ip_last = Some(last);
            record.asn_first = Some(origin);
            record.asn_last = Some(origin);
        }
        ObjectClass::AutNum => {
            let value = required(record, "aut-num")?;
            let asn = parse_asn(value)
                .ok_or_else(|| ParseError::invalid("aut-num", value, "not an AS number"))?;
            record.rpsl_pk = format_asn(asn);
            record.asn_first = Some(asn);
            record.asn_last = Some(asn);
        }
        ObjectClass::AsBlock => {
            let value = required(record, "as-block")?;
            let (start, end) = value
                .split_once('-')
                .and_then(|(a, b)| Some((parse_asn(a)?, parse_asn(b)?)))
                .ok_or_else(|| ParseError::invalid("as-block", value, "expected ASn - ASm"))?;
            if start > end {
                return Err(ParseError::invalid("as-block", value, "range is reversed"));
            }
            record.rpsl_pk = format!("{} - {}", format_asn(start), format_asn(end));
            record.asn_first = Some(start);
            record.asn_last = Some(end);
        }
        ObjectClass::Inetnum => {
            let value = required(record, "inetnum")?.to_string();
            let (first, last) = match value.split_once('-') {
                Some((a, b)) => (parse_address("inetnum", a)?, parse_address("inetnum", b)?),
                None => network_bounds(&parse_network("inetnum", &value)?),
            };
            if !first.is_ipv4() || !last.is_ipv4() || first > last {
                return Err(ParseError::invalid("inetnum", value, "invalid IPv4 range"));
            }
            record.rpsl_pk = format!("{first} - {last}");
            record.ip_first = Some(first);
            record.ip_last = Some(last);
        }
        ObjectClass::Inet6num => {
            let value = required(record, "inet6num")?.to_string();
            let network = parse_network("inet6num", &value)?;
            if !network.is_ipv6() {
                return Err(ParseError::invalid("inet6num", value, "not an IPv6 prefix"));
            }
            let (first, last) = network_bounds(&network);
            record.rpsl_pk = network.to_string();
            record.prefix = Some(network);
            record.ip_first = Some(first);
            record.ip_last = Some(last);
        }
        _ => {
            let meta = class.meta();
            let mut parts = Vec::with_capacity(meta.primary_key.len());
            for attribute in meta.primary_key {
                let value = required(record, attribute)?;
                let value = value.split_whitespace().next().unwrap_or(value);
                parts.push(if meta.uppercase_pk {
                    value.to_ascii_uppercase()
                } else {
                    value.to_ascii_lowercase()
                });
            }
            record.rpsl_pk = parts.join("");
        }
    }
    Ok(())
}
