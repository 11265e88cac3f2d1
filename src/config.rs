//! Runtime configuration, read from TOML.
//!
//! Every section and field has a default, so an empty file (or no file) is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::font::FontFamily;
use crate::protocol::{DEFAULT_MTU, FRAMEBUFFER_UUID, PREFERRED_MTU, SERVICE_UUID};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "BADGEY_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BadgeConfig {
    pub render: RenderConfig,
    pub link: LinkConfig,
    pub fonts: FontsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Gamma applied to canvas luma right before dithering.
    pub gamma: f32,
    /// Pixels per point for text blocks.
    pub text_scale: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            gamma: 1.0,
            text_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub preferred_mtu: u16,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub scan_seconds: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            preferred_mtu: PREFERRED_MTU,
            service_uuid: SERVICE_UUID,
            characteristic_uuid: FRAMEBUFFER_UUID,
            scan_seconds: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontFiles {
    pub regular: PathBuf,
    #[serde(default)]
    pub bold: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FontsConfig {
    pub sans: Option<FontFiles>,
    pub serif: Option<FontFiles>,
    pub mono: Option<FontFiles>,
}

impl FontsConfig {
    pub fn entries(&self) -> impl Iterator<Item = (FontFamily, &FontFiles)> {
        [
            (FontFamily::Sans, self.sans.as_ref()),
            (FontFamily::Serif, self.serif.as_ref()),
            (FontFamily::Mono, self.mono.as_ref()),
        ]
        .into_iter()
        .filter_map(|(family, files)| Some((family, files?)))
    }

    /// Makes relative font paths relative to `base`.
    fn rebase(&mut self, base: &Path) {
        for files in [&mut self.sans, &mut self.serif, &mut self.mono].into_iter().flatten() {
            if files.regular.is_relative() {
                files.regular = base.join(&files.regular);
            }
            if let Some(bold) = files.bold.as_mut().filter(|p| p.is_relative()) {
                *bold = base.join(&*bold);
            }
        }
    }
}

impl BadgeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`; font paths inside are taken relative to the file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.fonts.rebase(base);
        }
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Loads `path` if given, else the file named by `BADGEY_CONFIG`, else defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        match path.map(Path::to_path_buf).or(from_env) {
            Some(p) => Self::load(&p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let gamma = self.render.gamma;
        if !gamma.is_finite() || gamma <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "render.gamma",
                reason: format!("must be a positive number, got {gamma}"),
            });
        }
        let text_scale = self.render.text_scale;
        if !text_scale.is_finite() || text_scale <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "render.text_scale",
                reason: format!("must be a positive number, got {text_scale}"),
            });
        }
        if self.link.preferred_mtu < DEFAULT_MTU {
            return Err(ConfigError::Invalid {
                field: "link.preferred_mtu",
                reason: format!("must be at least {DEFAULT_MTU}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = BadgeConfig::from_toml_str("").unwrap();
        assert_eq!(config, BadgeConfig::default());
        assert_eq!(config.render.gamma, 1.0);
        assert_eq!(config.link.preferred_mtu, 247);
        assert_eq!(config.link.service_uuid, SERVICE_UUID);
        assert_eq!(config.fonts.entries().count(), 0);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = BadgeConfig::from_toml_str(
            r#"
            [render]
            gamma = 1.4

            [link]
            characteristic_uuid = "00000000-0000-0000-0000-0000000000aa"

            [fonts.mono]
            regular = "fonts/mono.ttf"
            "#,
        )
        .unwrap();
        assert_eq!(config.render.gamma, 1.4);
        assert_eq!(config.render.text_scale, 1.0);
        assert_eq!(config.link.preferred_mtu, PREFERRED_MTU);
        assert_eq!(config.link.characteristic_uuid, Uuid::from_u128(0xaa));
        let fonts: Vec<_> = config.fonts.entries().collect();
        assert_eq!(fonts.len(), 1);
        assert_eq!(fonts[0].0, FontFamily::Mono);
        assert!(fonts[0].1.bold.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        let err = BadgeConfig::from_toml_str("[render]\ngamma = 0.0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "render.gamma", .. }));

        let err = BadgeConfig::from_toml_str("[link]\npreferred_mtu = 10").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "link.preferred_mtu", .. }));

        let err = BadgeConfig::from_toml_str("[render]\ngamma = \"bright\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn font_paths_are_rebased() {
        let mut fonts = FontsConfig {
            sans: Some(FontFiles {
                regular: PathBuf::from("a.ttf"),
                bold: Some(PathBuf::from("/abs/b.ttf")),
            }),
            ..FontsConfig::default()
        };
        fonts.rebase(Path::new("/etc/badgey"));
        let sans = fonts.sans.unwrap();
        assert_eq!(sans.regular, PathBuf::from("/etc/badgey/a.ttf"));
        assert_eq!(sans.bold, Some(PathBuf::from("/abs/b.ttf")));
    }
}
