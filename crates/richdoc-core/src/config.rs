//! Editor configuration.
//!
//! Every field has a default, so a JSON document only needs the keys it changes:
//!
//! ```rust
//! use richdoc_core::{EditorConfig, WrapMode};
//!
//! let config = EditorConfig::from_json_str(r#"{ "wrap_mode": "word", "history_capacity": 10 }"#).unwrap();
//! assert_eq!(config.wrap_mode, WrapMode::Word);
//! assert_eq!(config.history_capacity, 10);
//! assert_eq!(config.tab_width, 4);
//! ```

use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::layout::{DEFAULT_FONT_SIZE, DEFAULT_TAB_WIDTH, LayoutConfig, WrapMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document is not valid JSON or has wrongly typed fields.
    #[error("invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),
    /// A field holds a value the editor cannot work with.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Knobs of the editor kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Maximum number of undo steps.
    pub history_capacity: usize,
    /// Width of the root content in pixels.
    pub viewport_width: f32,
    /// Soft wrapping mode.
    pub wrap_mode: WrapMode,
    /// Units per line for [`WrapMode::Char`].
    pub wrap_columns: usize,
    /// Tab advance in spaces.
    pub tab_width: usize,
    /// Left inset of quote environments.
    pub quote_inset: f32,
    /// Horizontal inset of code environments.
    pub code_inset: f32,
    /// Left inset of list environments.
    pub list_inset: f32,
    /// Vertical padding inside sub-environments.
    pub environment_padding: f32,
    /// Space between paragraphs.
    pub paragraph_spacing: f32,
    /// Font size of runs without an explicit size.
    pub default_font_size: f32,
    /// Size used for images that are not loaded yet (width, height).
    pub image_placeholder: (u32, u32),
}

impl Default for EditorConfig {
    fn default() -> Self {
        let layout = LayoutConfig::default();
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            viewport_width: layout.viewport_width,
            wrap_mode: WrapMode::default(),
            wrap_columns: 80,
            tab_width: DEFAULT_TAB_WIDTH,
            quote_inset: layout.quote_inset,
            code_inset: layout.code_inset,
            list_inset: layout.list_inset,
            environment_padding: layout.environment_padding,
            paragraph_spacing: layout.paragraph_spacing,
            default_font_size: DEFAULT_FONT_SIZE,
            image_placeholder: layout.image_placeholder,
        }
    }
}

impl EditorConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EditorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values the layout pipeline cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.viewport_width.is_finite() && self.viewport_width > 0.0) {
            return Err(ConfigError::Invalid {
                field: "viewport_width",
                reason: "must be a positive number",
            });
        }
        if self.tab_width == 0 {
            return Err(ConfigError::Invalid {
                field: "tab_width",
                reason: "must be greater than 0",
            });
        }
        if self.wrap_mode == WrapMode::Char && self.wrap_columns == 0 {
            return Err(ConfigError::Invalid {
                field: "wrap_columns",
                reason: "must be greater than 0 for char wrapping",
            });
        }
        if !(self.default_font_size.is_finite() && self.default_font_size > 0.0) {
            return Err(ConfigError::Invalid {
                field: "default_font_size",
                reason: "must be a positive number",
            });
        }
        Ok(())
    }

    /// Geometry part of the configuration.
    pub fn layout_config(&self) -> LayoutConfig {
        LayoutConfig {
            viewport_width: self.viewport_width,
            tab_width: self.tab_width,
            quote_inset: self.quote_inset,
            code_inset: self.code_inset,
            list_inset: self.list_inset,
            environment_padding: self.environment_padding,
            paragraph_spacing: self.paragraph_spacing,
            default_font_size: self.default_font_size,
            image_placeholder: self.image_placeholder,
        }
    }
}
