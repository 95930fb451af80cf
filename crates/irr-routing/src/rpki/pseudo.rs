//! Pseudo route records generated from ROAs
//!
//! Stored under [`PSEUDO_SOURCE`] so RPKI data can be queried like any other
//! registry. They are always `valid` and never re-validated.

use irr_core::{
    PSEUDO_SOURCE, ParseError, Record, RecordParser, Roa, RpkiStatus, RpslParser, format_asn,
};

/// Object text for the pseudo record of one ROA
pub fn pseudo_route_text(roa: &Roa, remarks: &str) -> String {
    let class = if roa.prefix.is_ipv4() { "route" } else { "route6" };
    let origin = format_asn(roa.asn);
    format!(
        "{class}: {prefix}\n\
         descr: RPKI ROA for {prefix} / {origin}\n\
         remarks: {remarks}\n\
         max-length: {max_length}\n\
         origin: {origin}\n\
         source: {PSEUDO_SOURCE}  # Trust Anchor: {ta}\n",
        prefix = roa.prefix,
        max_length = roa.max_length,
        ta = roa.trust_anchor,
    )
}

/// Build the pseudo record of one ROA
pub fn pseudo_route_record(roa: &Roa, remarks: &str) -> Result<Record, ParseError> {
    let text = pseudo_route_text(roa, remarks);
    let mut record = RpslParser::new().record_from_text(&text, false)?;
    record.rpki_status = RpkiStatus::Valid;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use irr_core::ObjectClass;

    #[test]
    fn test_v4_pseudo_record() {
        let roa = Roa::new("192.0.2.0/24".parse().unwrap(), 65546, 28, "TEST-TA");
        let record = pseudo_route_record(&roa, "from RPKI").unwrap();
        assert_eq!(record.object_class, ObjectClass::Route);
        assert_eq!(record.source, PSEUDO_SOURCE);
        assert_eq!(record.rpsl_pk, "192.0.2.0/24AS65546");
        assert_eq!(record.rpki_status, RpkiStatus::Valid);
        assert_eq!(record.first_value("max-length"), Some("28"));
        assert!(record.object_text.contains("Trust Anchor: TEST-TA"));
    }

    #[test]
    fn test_v6_pseudo_record() {
        let roa = Roa::new("2001:db8::/32".parse().unwrap(), 65547, 48, "TEST-TA");
        let record = pseudo_route_record(&roa, "from RPKI").unwrap();
        assert_eq!(record.object_class, ObjectClass::Route6);
        assert_eq!(record.origin(), Some(65547));
    }
}
