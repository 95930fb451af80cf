//! Daemon settings
//!
//! Loaded from TOML. Source names are case-folded to upper case on load so
//! every lookup can assume canonical names.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::object_class::ObjectClass;
use crate::record::PSEUDO_SOURCE;

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Directory holding the record, journal and ROA databases
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Global journaling switch; sources additionally need `keep_journal`
    #[serde(default = "default_true")]
    pub journaling_enabled: bool,
    /// Capacity of the write-behind cache
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub rpki: RpkiSettings,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceSettings>,
}

/// Per-source mirroring settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSettings {
    /// Full export files, imported in order
    #[serde(default)]
    pub import_source: Vec<String>,
    /// File holding the serial matching the export
    pub import_serial_source: Option<String>,
    pub nrtm_host: Option<String>,
    /// Defaults to 43 when only the host is set
    pub nrtm_port: Option<u16>,
    #[serde(default)]
    pub keep_journal: bool,
    /// Only these classes are imported when set
    pub object_class_filter: Option<Vec<ObjectClass>>,
    /// Higher wins when routes of different sources overlap
    pub route_object_preference: Option<u32>,
    /// Seconds between mirror runs
    #[serde(default = "default_import_timer")]
    pub import_timer: u64,
}

impl SourceSettings {
    pub fn nrtm_enabled(&self) -> bool {
        self.nrtm_host.as_deref().is_some_and(|h| !h.is_empty())
    }

    pub fn nrtm_port(&self) -> u16 {
        self.nrtm_port.unwrap_or(DEFAULT_NRTM_PORT)
    }
}

/// RPKI settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpkiSettings {
    /// ROA export location; RPKI awareness is enabled when set
    pub roa_source: Option<String>,
    #[serde(default = "default_roa_timer")]
    pub roa_import_timer: u64,
    /// Sources whose routes are never validated
    #[serde(default)]
    pub excluded_sources: Vec<String>,
    #[serde(default = "default_pseudo_irr_remarks")]
    pub pseudo_irr_remarks: String,
}

impl Default for RpkiSettings {
    fn default() -> Self {
        Self {
            roa_source: None,
            roa_import_timer: default_roa_timer(),
            excluded_sources: Vec::new(),
            pseudo_irr_remarks: default_pseudo_irr_remarks(),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Rolling file output directory
    pub directory: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./irr-data")
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    5000
}

const DEFAULT_NRTM_PORT: u16 = 43;

fn default_import_timer() -> u64 {
    300
}

fn default_roa_timer() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_pseudo_irr_remarks() -> String {
    "This route object represents routing data retrieved from the RPKI. \
     It is not stored in any IRR database."
        .to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            journaling_enabled: true,
            batch_size: default_batch_size(),
            rpki: RpkiSettings::default(),
            log: LogSettings::default(),
            sources: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load and validate settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let mut settings: Settings = toml::from_str(text)?;
        settings.normalise();
        settings.validate()?;
        Ok(settings)
    }

    fn normalise(&mut self) {
        let sources = std::mem::take(&mut self.sources);
        self.sources = sources
            .into_iter()
            .map(|(name, source)| (name.to_ascii_uppercase(), source))
            .collect();
        for excluded in &mut self.rpki.excluded_sources {
            *excluded = excluded.to_ascii_uppercase();
        }
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be positive".into()));
        }
        for (name, source) in &self.sources {
            let valid_name = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-');
            if !valid_name {
                return Err(ConfigError::Invalid(format!("invalid source name {name:?}")));
            }
            if self.rpki_enabled() && name == PSEUDO_SOURCE {
                return Err(ConfigError::Invalid(format!(
                    "source name {PSEUDO_SOURCE} is reserved for RPKI pseudo records"
                )));
            }
            if source.nrtm_port.is_some() && !source.nrtm_enabled() {
                return Err(ConfigError::Invalid(format!(
                    "source {name}: nrtm_port set without nrtm_host"
                )));
            }
            if source.import_serial_source.is_some() && source.import_source.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "source {name}: import_serial_source set without import_source"
                )));
            }
            if source.object_class_filter.as_ref().is_some_and(Vec::is_empty) {
                return Err(ConfigError::Invalid(format!(
                    "source {name}: object_class_filter must not be empty"
                )));
            }
        }
        Ok(())
    }

    pub fn source(&self, name: &str) -> Option<&SourceSettings> {
        self.sources.get(&name.to_ascii_uppercase())
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn rpki_enabled(&self) -> bool {
        self.rpki.roa_source.is_some()
    }

    /// Whether changes to `source` are written to the journal
    pub fn journaling_enabled_for(&self, source: &str) -> bool {
        self.journaling_enabled && self.source(source).is_some_and(|s| s.keep_journal)
    }

    /// Sources with a configured route preference
    pub fn route_preferences(&self) -> HashMap<String, u32> {
        self.sources
            .iter()
            .filter_map(|(name, s)| s.route_object_preference.map(|p| (name.clone(), p)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
data_dir = "/tmp/irr"

[rpki]
roa_source = "https://example.net/roas.json"
excluded_sources = ["legacy"]

[sources.example]
import_source = ["https://example.net/example.db.gz"]
import_serial_source = "https://example.net/EXAMPLE.CURRENTSERIAL"
nrtm_host = "nrtm.example.net"
keep_journal = true
object_class_filter = ["route", "route6"]
route_object_preference = 900
"#;

    #[test]
    fn test_parse_sample() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        let source = settings.source("EXAMPLE").unwrap();
        assert!(source.nrtm_enabled());
        assert_eq!(source.nrtm_port(), 43);
        assert_eq!(
            source.object_class_filter.as_deref(),
            Some(&[ObjectClass::Route, ObjectClass::Route6][..])
        );
        assert!(settings.rpki_enabled());
        assert_eq!(settings.rpki.excluded_sources, vec!["LEGACY".to_string()]);
        assert!(settings.journaling_enabled_for("example"));
        assert_eq!(settings.route_preferences().get("EXAMPLE"), Some(&900));
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert!(settings.journaling_enabled);
        assert!(!settings.rpki_enabled());
        assert_eq!(settings.log.format, LogFormat::Pretty);
        assert!(!settings.journaling_enabled_for("ANY"));
    }

    #[test]
    fn test_unknown_class_rejected() {
        let text = "[sources.X]\nobject_class_filter = [\"irt\"]\n";
        assert!(matches!(
            Settings::from_toml_str(text),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_reserved_pseudo_source() {
        let text = "[rpki]\nroa_source = \"file:///roas.json\"\n[sources.rpki]\n";
        assert!(matches!(
            Settings::from_toml_str(text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_serial_source_requires_import_source() {
        let text = "[sources.X]\nimport_serial_source = \"file:///X.CURRENTSERIAL\"\n";
        assert!(Settings::from_toml_str(text).is_err());
    }

    #[test]
    fn test_nrtm_port_requires_host() {
        let text = "[sources.X]\nnrtm_port = 4343\n";
        assert!(matches!(
            Settings::from_toml_str(text),
            Err(ConfigError::Invalid(_))
        ));
        let text = "[sources.X]\nnrtm_host = \"nrtm.example.net\"\nnrtm_port = 4343\n";
        let settings = Settings::from_toml_str(text).unwrap();
        assert_eq!(settings.source("x").unwrap().nrtm_port(), 4343);
    }
}
