//! Engine configuration, loaded from TOML
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```toml
//! compress = true
//! skip_unparseable = false
//!
//! [stamp]
//! width = 150.0
//! height = 75.0
//! caption_prefix = "Digitally signed by: "
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::date::DEFAULT_DATE_FORMAT;
use crate::error::ConfigError;

/// Top-level settings shared by the library pipeline and the CLI
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Flate-compress unfiltered streams on output
    pub compress: bool,
    /// Drop sources that fail to parse instead of failing the job
    pub skip_unparseable: bool,
    pub stamp: StampLayout,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compress: true,
            skip_unparseable: false,
            stamp: StampLayout::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

/// Geometry and wording of the signature stamp, in points
///
/// The image is anchored to the bottom-right corner of the page. The two
/// text lines start at the image's left edge; their `y` values are
/// baselines measured from the bottom of the page.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StampLayout {
    pub width: f64,
    pub height: f64,
    pub margin_right: f64,
    pub margin_bottom: f64,
    pub caption_size: f64,
    pub caption_y: f64,
    pub date_size: f64,
    pub date_y: f64,
    /// Gray level of the date line, 0 is black
    pub date_gray: f64,
    pub caption_prefix: String,
    pub date_prefix: String,
    /// chrono format string for the date line
    pub date_format: String,
}

impl Default for StampLayout {
    fn default() -> Self {
        Self {
            width: 150.0,
            height: 75.0,
            margin_right: 50.0,
            margin_bottom: 50.0,
            caption_size: 10.0,
            caption_y: 30.0,
            date_size: 8.0,
            date_y: 15.0,
            date_gray: 0.5,
            caption_prefix: "Digitally signed by: ".to_string(),
            date_prefix: "Date: ".to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}
