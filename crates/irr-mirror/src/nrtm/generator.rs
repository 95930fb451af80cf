//! Serving the journal as NRTM responses

use tracing::{debug, instrument};

use irr_storage::DatabaseHandler;

use crate::error::{MirrorError, MirrorResult};
use crate::nrtm::parser::NrtmVersion;

pub const NO_NEWER_UPDATES: &str = "% Warning: there are no newer updates available";
const NO_UPDATES: &str = "% Warning: there are no updates available";

/// Builds NRTM responses from a source's journal
#[derive(Debug, Clone, Copy, Default)]
pub struct NrtmGenerator;

impl NrtmGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Response for `-g SOURCE:version:start-end`; `end` of `None` means LAST
    #[instrument(skip(self, handler))]
    pub fn generate(
        &self,
        handler: &mut DatabaseHandler,
        source: &str,
        version: NrtmVersion,
        serial_start: u64,
        serial_end: Option<u64>,
    ) -> MirrorResult<String> {
        let source = source.to_ascii_uppercase();
        if !handler.context().journaling_enabled_for(&source) {
            return Err(MirrorError::protocol(format!(
                "No journal kept for {source}, unable to serve NRTM queries"
            )));
        }
        let Some(status) = handler.source_status(&source)? else {
            return Err(MirrorError::protocol(format!(
                "There are no journal entries for {source}"
            )));
        };
        if let Some(end) = serial_end
            && end < serial_start
        {
            return Err(MirrorError::protocol(format!(
                "Start of the serial range ({serial_start}) must be lower or equal to end of the serial range ({end})"
            )));
        }

        let (Some(oldest), Some(newest)) = (status.serial_oldest_journal, status.serial_newest_journal)
        else {
            return Ok(NO_UPDATES.to_string());
        };
        if serial_start < oldest {
            return Err(MirrorError::protocol(format!(
                "Serials {serial_start} - {oldest} do not exist"
            )));
        }
        match serial_end {
            Some(end) if end > newest => {
                return Err(MirrorError::protocol(format!(
                    "Serials {newest} - {end} do not exist"
                )));
            }
            None if serial_start == newest + 1 => return Ok(NO_NEWER_UPDATES.to_string()),
            None if serial_start > newest => {
                return Err(MirrorError::protocol(format!(
                    "Serials {newest} - {serial_start} do not exist"
                )));
            }
            _ => {}
        }

        let serial_end = serial_end.unwrap_or(newest);
        let entries = handler.journal_entries(&source, serial_start, Some(serial_end))?;
        debug!(entries = entries.len(), "Generating NRTM response");

        let mut output = format!(
            "%START Version: {} {source} {serial_start}-{serial_end}\n",
            version.as_str()
        );
        for entry in &entries {
            output.push('\n');
            output.push_str(entry.operation.nrtm_keyword());
            if version == NrtmVersion::V3 {
                output.push_str(&format!(" {}", entry.serial));
            }
            output.push_str("\n\n");
            output.push_str(&entry.object_text);
            if !entry.object_text.ends_with('\n') {
                output.push('\n');
            }
        }
        output.push_str(&format!("\n%END {source}"));
        Ok(output)
    }
}
