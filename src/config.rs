use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;

use crate::{adapter::SiteRules, app::Cli, settings::SettingsConfig, validator::EligibilityConfig};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub settings: SettingsConfig,
    pub eligibility: EligibilityConfig,
    pub site: SiteRules,
}

impl Config {
    pub fn read(file: &mut impl Read) -> anyhow::Result<Self> {
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .context("Failed to read config file")?;

        let config = toml::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    pub fn read_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut file = File::open(path).context("Failed to open config file")?;
        Self::read(&mut file)
    }

    pub fn from_cli_args(args: &Cli) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(config_path) => Self::read_path(config_path)?,
            None => {
                let default_config = PathBuf::from(DEFAULT_CONFIG_PATH);
                if default_config.exists() {
                    log::info!("Using default config file {DEFAULT_CONFIG_PATH}");
                    Self::read_path(default_config)?
                } else {
                    log::warn!("No config file found; using default config");
                    Config::default()
                }
            }
        };
        if args.audio {
            config.settings.audio_enabled = true;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use crate::{
        adapter::{InsertionMethod, Placement, PlacementAnchor},
        settings::BindingAction,
    };

    use super::*;

    const TEST_CONFIG: &str = r##"
[settings]
remember_speed = true
force_last_saved_speed = true
last_speed = 1.5

[settings.speeds]
"https://example.com/a.mp4" = 2.0

[[settings.key_bindings]]
action = "fast"
key = 71
value = 2.5

[eligibility]
min_width = 100.0

[site]
container_selectors = ["#player"]
ignore_selectors = [".preview video"]
placement = { anchor = "media", method = "before" }
"##;

    #[test]
    fn should_parse_config() {
        // given
        let mut config_file = Cursor::new(TEST_CONFIG);

        // when
        let config = Config::read(&mut config_file).unwrap();

        // then
        assert!(config.settings.remember_speed);
        assert!(config.settings.force_last_saved_speed);
        assert!(!config.settings.audio_enabled);
        assert_eq!(config.settings.last_speed, 1.5);
        assert_eq!(
            config.settings.speeds.get("https://example.com/a.mp4"),
            Some(&2.0)
        );
        assert_eq!(config.settings.key_bindings.len(), 1);
        assert_eq!(config.settings.key_bindings[0].action, BindingAction::Fast);
        assert_eq!(
            config.eligibility,
            EligibilityConfig {
                min_width: 100.0,
                min_height: 40.0
            }
        );
        assert_eq!(
            config.site,
            SiteRules {
                container_selectors: vec!["#player".to_string()],
                ignore_selectors: vec![".preview video".to_string()],
                placement: Placement {
                    anchor: PlacementAnchor::Media,
                    method: InsertionMethod::Before,
                },
                ..SiteRules::default()
            }
        );
    }

    #[test]
    fn should_default_missing_sections() {
        // given
        let mut config_file = Cursor::new("");

        // when
        let config = Config::read(&mut config_file).unwrap();

        // then
        assert_eq!(config, Config::default());
        assert_eq!(config.settings.key_bindings.len(), 7);
    }

    #[test]
    fn should_return_error_on_invalid_syntax() {
        // given
        let mut config_file = Cursor::new("[settings]\nlast_speed = ");

        // when
        let result = Config::read(&mut config_file);

        // then
        assert!(result.is_err());
    }

    #[test]
    fn should_apply_cli_overrides() {
        // given
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TEST_CONFIG.as_bytes()).unwrap();
        let cli = Cli {
            page: PathBuf::from("page.json"),
            config: Some(file.path().to_string_lossy().into_owned()),
            audio: true,
        };

        // when
        let config = Config::from_cli_args(&cli).unwrap();

        // then
        assert!(config.settings.audio_enabled);
        assert!(config.settings.remember_speed);
    }

    #[test]
    fn should_fail_on_missing_explicit_config() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli {
            page: PathBuf::from("page.json"),
            config: Some(dir.path().join("missing.toml").to_string_lossy().into_owned()),
            audio: false,
        };

        // then
        assert!(Config::from_cli_args(&cli).is_err());
    }
}
