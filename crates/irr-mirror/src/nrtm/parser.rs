//! NRTM response parsing
//!
//! The whole response is parsed before anything is applied, so a stream
//! that turns out to be truncated or out of order changes nothing.

use tracing::{debug, instrument};

use irr_core::{DatabaseOperation, ObjectClass};

use crate::error::{MirrorError, MirrorResult};
use crate::nrtm::operation::NrtmOperation;
use crate::text::{is_comment_paragraph, split_paragraphs};

/// NRTM protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NrtmVersion {
    /// Operation lines carry no serial
    V1,
    /// Operation lines carry an explicit serial
    V3,
}

impl NrtmVersion {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "1" => Some(Self::V1),
            "3" => Some(Self::V3),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "1",
            Self::V3 => "3",
        }
    }
}

/// Parsed `START` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub version: NrtmVersion,
    pub source: String,
    pub first: u64,
    pub last: u64,
    pub filtered: bool,
}

/// A fully parsed response
#[derive(Debug, Clone, Default)]
pub struct ParsedStream {
    pub header: Option<StreamHeader>,
    pub operations: Vec<NrtmOperation>,
}

impl ParsedStream {
    /// Highest serial carried by an operation
    pub fn highest_serial(&self) -> Option<u64> {
        self.operations.iter().map(|op| op.serial).max()
    }
}

/// Parser for one source's NRTM responses
#[derive(Debug, Clone)]
pub struct NrtmStreamParser {
    source: String,
    object_class_filter: Option<Vec<ObjectClass>>,
}

fn parse_start_line(line: &str) -> Option<MirrorResult<StreamHeader>> {
    let rest = line.strip_prefix('%')?.trim_start();
    let head = rest.get(..5)?;
    if !head.eq_ignore_ascii_case("START") {
        return None;
    }
    let fields: Vec<&str> = rest[5..].split_whitespace().collect();
    let malformed = || Some(Err(MirrorError::protocol(format!("malformed START line: {line}"))));

    let [label, version, source, range, tail @ ..] = fields.as_slice() else {
        return malformed();
    };
    if !label.eq_ignore_ascii_case("Version:") {
        return malformed();
    }
    let Some(version) = NrtmVersion::parse(version) else {
        return Some(Err(MirrorError::protocol(format!(
            "unsupported NRTM version {version}"
        ))));
    };
    let Some((first, last)) = range.split_once('-') else {
        return malformed();
    };
    let (Ok(first), Ok(last)) = (first.parse::<u64>(), last.parse::<u64>()) else {
        return malformed();
    };
    let filtered = match tail {
        [] => false,
        [flag] if flag.eq_ignore_ascii_case("FILTERED") => true,
        _ => return malformed(),
    };
    Some(Ok(StreamHeader {
        version,
        source: source.to_ascii_uppercase(),
        first,
        last,
        filtered,
    }))
}

/// `ADD`, `DEL`, `ADD 12` or `DEL 12`
fn parse_operation_line(line: &str) -> Option<MirrorResult<(DatabaseOperation, Option<u64>)>> {
    let mut parts = line.split_whitespace();
    let operation = match parts.next()?.to_ascii_uppercase().as_str() {
        "ADD" => DatabaseOperation::AddOrUpdate,
        "DEL" => DatabaseOperation::Delete,
        _ => return None,
    };
    let serial = match parts.next() {
        None => None,
        Some(serial) => match serial.parse::<u64>() {
            Ok(serial) => Some(serial),
            Err(_) => {
                return Some(Err(MirrorError::protocol(format!(
                    "invalid serial on operation line: {line}"
                ))));
            }
        },
    };
    if parts.next().is_some() {
        return Some(Err(MirrorError::protocol(format!("malformed operation line: {line}"))));
    }
    Some(Ok((operation, serial)))
}

/// `%END SRC` / `% END SRC`
fn is_end_marker(line: &str, source: &str) -> bool {
    let Some(rest) = line.strip_prefix('%') else {
        return false;
    };
    let mut words = rest.split_whitespace();
    matches!(
        (words.next(), words.next(), words.next()),
        (Some(end), Some(name), None)
            if end.eq_ignore_ascii_case("END") && name.eq_ignore_ascii_case(source)
    )
}

fn is_error_line(line: &str) -> bool {
    line.strip_prefix('%')
        .map(str::trim_start)
        .and_then(|rest| rest.get(..5))
        .is_some_and(|head| head.eq_ignore_ascii_case("ERROR"))
}

impl NrtmStreamParser {
    pub fn new(source: impl Into<String>, object_class_filter: Option<Vec<ObjectClass>>) -> Self {
        Self {
            source: source.into().to_ascii_uppercase(),
            object_class_filter,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parse a complete response
    ///
    /// A response with no `START` line and no operations is valid and
    /// empty; this is what a server answers when there are no newer updates.
    #[instrument(skip(self, text), fields(source = %self.source, bytes = text.len()))]
    pub fn parse(&self, text: &str) -> MirrorResult<ParsedStream> {
        let paragraphs = split_paragraphs(text);
        let mut stream = ParsedStream::default();
        let mut last_comment: Option<&str> = None;
        let mut previous_serial: Option<u64> = None;

        let mut iter = paragraphs.iter();
        while let Some(paragraph) = iter.next() {
            let first_line = paragraph.lines().next().unwrap_or_default();

            if is_comment_paragraph(paragraph) {
                if is_error_line(first_line) {
                    return Err(MirrorError::protocol(format!(
                        "server returned an error: {}",
                        paragraph.trim_end()
                    )));
                }
                if let Some(header) = parse_start_line(first_line) {
                    let header = header?;
                    if stream.header.is_some() {
                        return Err(MirrorError::protocol("encountered a second START line"));
                    }
                    if header.source != self.source {
                        return Err(MirrorError::protocol(format!(
                            "START line names source {}, expected {}",
                            header.source, self.source
                        )));
                    }
                    debug!(first = header.first, last = header.last, version = header.version.as_str(), "Stream header");
                    stream.header = Some(header);
                } else {
                    last_comment = Some(first_line);
                }
                continue;
            }

            let Some(parsed) = parse_operation_line(first_line) else {
                return Err(MirrorError::protocol(format!(
                    "expected an operation line, found: {first_line}"
                )));
            };
            let (operation, explicit_serial) = parsed?;
            let Some(header) = &stream.header else {
                return Err(MirrorError::protocol(
                    "encountered an operation before a valid START line",
                ));
            };

            let expected = previous_serial.map_or(header.first, |serial| serial + 1);
            let serial = match explicit_serial {
                Some(serial) if serial < expected => {
                    return Err(MirrorError::protocol(format!(
                        "operation serial {serial} served out of order, expected {expected} or later"
                    )));
                }
                Some(serial) => serial,
                None => expected,
            };
            // Version 1 servers do not count serials reliably
            if header.version == NrtmVersion::V3 && serial > header.last {
                return Err(MirrorError::protocol(format!(
                    "operation serial {serial} is beyond the declared range {}-{}",
                    header.first, header.last
                )));
            }

            // Object text may share the paragraph of its operation line
            let inline = paragraph
                .split_once('\n')
                .map(|(_, rest)| rest)
                .filter(|rest| !rest.trim().is_empty());
            let object_text = match inline {
                Some(text) => text.to_string(),
                None => iter
                    .next()
                    .filter(|next| !is_comment_paragraph(next))
                    .cloned()
                    .ok_or_else(|| {
                        MirrorError::protocol(format!(
                            "operation {operation} {serial} is not followed by an object"
                        ))
                    })?,
            };

            stream.operations.push(NrtmOperation {
                source: self.source.clone(),
                operation,
                serial,
                object_text,
                object_class_filter: self.object_class_filter.clone(),
            });
            previous_serial = Some(serial);
        }

        if let Some(header) = &stream.header {
            if !last_comment.is_some_and(|line| is_end_marker(line, &self.source)) {
                return Err(MirrorError::protocol(format!(
                    "stream for {} did not end with an END marker, assuming truncation",
                    self.source
                )));
            }
            if header.version == NrtmVersion::V3 && previous_serial != Some(header.last) {
                return Err(MirrorError::protocol(format!(
                    "version 3 stream declared last serial {} but ended at {}",
                    header.last,
                    previous_serial.map_or_else(|| "no operation".to_string(), |s| s.to_string())
                )));
            }
        }

        debug!(operations = stream.operations.len(), "Parsed NRTM stream");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MNTNER_A: &str = "mntner: TEST-MNT\nsource: TEST\n";
    const MNTNER_B: &str = "mntner: OTHER-MNT\nsource: TEST\n";

    fn parser() -> NrtmStreamParser {
        NrtmStreamParser::new("test", None)
    }

    fn v3(range: &str, body: &str) -> String {
        format!("% START Version: 3 TEST {range}\n\n{body}\n%END TEST\n")
    }

    // ============================================================================
    // Headers and markers
    // ============================================================================

    #[test]
    fn test_start_line_variants() {
        let header = parse_start_line("%START Version: 3 test 10-20 FILTERED").unwrap().unwrap();
        assert_eq!(header.version, NrtmVersion::V3);
        assert_eq!(header.source, "TEST");
        assert_eq!((header.first, header.last), (10, 20));
        assert!(header.filtered);

        assert!(parse_start_line("% Warning: there are no newer updates available").is_none());
        assert!(parse_start_line("% START Version: 2 TEST 1-2").unwrap().is_err());
    }

    #[test]
    fn test_end_marker() {
        assert!(is_end_marker("%END TEST", "TEST"));
        assert!(is_end_marker("% END test", "TEST"));
        assert!(!is_end_marker("%END OTHER", "TEST"));
    }

    #[test]
    fn test_no_newer_updates_is_empty() {
        let stream = parser()
            .parse("% Warning: there are no newer updates available\n")
            .unwrap();
        assert!(stream.header.is_none());
        assert!(stream.operations.is_empty());
    }

    // ============================================================================
    // Operations
    // ============================================================================

    #[test]
    fn test_v3_stream() {
        let text = v3("101-103", &format!("DEL 101\n\n{MNTNER_A}\nADD 103\n\n{MNTNER_B}"));
        let stream = parser().parse(&text).unwrap();
        assert_eq!(stream.operations.len(), 2);
        assert_eq!(stream.operations[0].operation, DatabaseOperation::Delete);
        assert_eq!(stream.operations[0].serial, 101);
        assert_eq!(stream.operations[1].serial, 103);
        assert_eq!(stream.operations[1].object_text, MNTNER_B);
        assert_eq!(stream.highest_serial(), Some(103));
    }

    #[test]
    fn test_v1_implicit_serials() {
        let text = format!(
            "%START Version: 1 TEST 11-12\n\nADD\n\n{MNTNER_A}\nDEL\n\n{MNTNER_B}\n%END TEST\n"
        );
        let stream = parser().parse(&text).unwrap();
        let serials: Vec<u64> = stream.operations.iter().map(|op| op.serial).collect();
        assert_eq!(serials, vec![11, 12]);
    }

    #[test]
    fn test_v1_may_exceed_declared_range() {
        let text = format!(
            "%START Version: 1 TEST 11-11\n\nADD\n\n{MNTNER_A}\nADD\n\n{MNTNER_B}\n%END TEST\n"
        );
        let stream = parser().parse(&text).unwrap();
        let serials: Vec<u64> = stream.operations.iter().map(|op| op.serial).collect();
        assert_eq!(serials, vec![11, 12]);
        assert_eq!(stream.highest_serial(), Some(12));
    }

    #[test]
    fn test_v3_beyond_declared_range() {
        let text = v3("11-11", &format!("ADD 11\n\n{MNTNER_A}\nADD 12\n\n{MNTNER_B}"));
        assert!(matches!(parser().parse(&text), Err(MirrorError::Protocol(_))));
    }

    #[test]
    fn test_v3_truncated() {
        let text = v3("101-103", &format!("ADD 101\n\n{MNTNER_A}\nADD 102\n\n{MNTNER_B}"));
        assert!(matches!(parser().parse(&text), Err(MirrorError::Protocol(_))));
    }

    #[test]
    fn test_missing_end_marker() {
        let text = format!("% START Version: 3 TEST 1-1\n\nADD 1\n\n{MNTNER_A}");
        assert!(parser().parse(&text).is_err());
    }

    #[test]
    fn test_out_of_order() {
        let text = v3("10-12", &format!("ADD 11\n\n{MNTNER_A}\nADD 10\n\n{MNTNER_B}"));
        let err = parser().parse(&text).unwrap_err();
        assert!(err.to_string().contains("out of order"));
    }

    #[test]
    fn test_operation_before_start() {
        let text = format!("ADD 1\n\n{MNTNER_A}");
        assert!(parser().parse(&text).is_err());
    }

    #[test]
    fn test_second_start_and_wrong_source() {
        let twice = format!(
            "% START Version: 3 TEST 1-1\n\n% START Version: 3 TEST 1-1\n\nADD 1\n\n{MNTNER_A}\n%END TEST\n"
        );
        assert!(parser().parse(&twice).is_err());
        let other = "% START Version: 3 OTHER 1-1\n\n%END OTHER\n";
        assert!(parser().parse(other).is_err());
    }

    #[test]
    fn test_missing_object() {
        let text = v3("1-1", "ADD 1\n");
        assert!(parser().parse(&text).is_err());
    }

    #[test]
    fn test_server_error() {
        let err = parser()
            .parse("%ERROR:401: invalid range: Not within 1-10\n")
            .unwrap_err();
        assert!(err.to_string().contains("invalid range"));
    }
}
