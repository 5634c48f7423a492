//! Per-job render settings.

use serde::{Deserialize, Serialize};

use crate::EncodingConfig;

/// Suffix appended to the source stem when no output path is requested.
pub const DEFAULT_OUTPUT_SUFFIX: &str = " - blur";
/// Default output container.
pub const DEFAULT_CONTAINER: &str = "mp4";

/// Settings for a single render.
///
/// `filters` is opaque to the queue: it is serialized and handed to the
/// generator script unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Appended to the source file stem when deriving the output name
    #[serde(default = "default_output_suffix")]
    pub output_suffix: String,

    /// Output container extension, without the dot
    #[serde(default = "default_container")]
    pub container: String,

    /// Copy the source audio stream instead of re-encoding it
    #[serde(default = "default_copy_audio")]
    pub copy_audio: bool,

    /// Encoder settings
    #[serde(default)]
    pub encoding: EncodingConfig,

    /// Frame-processing parameters for the generator
    #[serde(default)]
    pub filters: serde_json::Value,
}

fn default_output_suffix() -> String {
    DEFAULT_OUTPUT_SUFFIX.to_string()
}
fn default_container() -> String {
    DEFAULT_CONTAINER.to_string()
}
fn default_copy_audio() -> bool {
    true
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            output_suffix: default_output_suffix(),
            container: default_container(),
            copy_audio: true,
            encoding: EncodingConfig::default(),
            filters: serde_json::Value::Null,
        }
    }
}

impl RenderSettings {
    /// Replace the generator filter parameters.
    pub fn with_filters(mut self, filters: serde_json::Value) -> Self {
        self.filters = filters;
        self
    }

    /// Replace the encoder settings.
    pub fn with_encoding(mut self, encoding: EncodingConfig) -> Self {
        self.encoding = encoding;
        self
    }

    /// Filters as compact JSON for the generator command line.
    pub fn filters_json(&self) -> String {
        match &self.filters {
            serde_json::Value::Null => "{}".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_filters_serialize_as_object() {
        assert_eq!(RenderSettings::default().filters_json(), "{}");
    }

    #[test]
    fn test_filters_passed_through() {
        let settings = RenderSettings::default().with_filters(json!({"blur_amount": 1.5}));
        assert_eq!(settings.filters_json(), r#"{"blur_amount":1.5}"#);
    }

    #[test]
    fn test_deserialize_defaults() {
        let settings: RenderSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, RenderSettings::default());
    }
}
