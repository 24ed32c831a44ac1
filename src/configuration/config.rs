#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use std::env;
use std::path;

use anyhow::bail;
use anyhow::Result;
use clap::ArgMatches;
use clap::Command;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use strum::EnumIter;
use strum::EnumVariantNames;
use strum::IntoEnumIterator;
use tokio::fs;

static CONFIG: Lazy<DashMap<String, String>> = Lazy::new(DashMap::new);

#[derive(Clone, Copy, Debug, Eq, PartialEq, EnumIter, EnumVariantNames, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ConfigKey {
    AccessToken,
    ApiUrl,
    ConfigFile,
    FirstByteTimeout,
    IdentityToken,
    PollDeadline,
    PollInterval,
    ProgressTimeout,
    ThreadId,
    ThreadListLimit,
    WebSearch,
}

pub struct Config {}

impl Config {
    pub fn get(key: ConfigKey) -> String {
        if let Some(val) = CONFIG.get(&key.to_string()) {
            return val.to_string();
        }

        return "".to_string();
    }

    pub fn set(key: ConfigKey, value: &str) {
        CONFIG.insert(key.to_string(), value.to_string());
    }

    pub fn default(key: ConfigKey) -> String {
        #[cfg(not(target_os = "macos"))]
        let config_path = dirs::config_dir()
            .unwrap_or_else(env::temp_dir)
            .join("parley/config.toml");
        #[cfg(target_os = "macos")]
        let config_path = path::PathBuf::from(env::var("HOME").unwrap_or_default())
            .join(".config/parley/config.toml");

        let res = match key {
            ConfigKey::AccessToken => "",
            ConfigKey::ApiUrl => "",
            ConfigKey::FirstByteTimeout => "30000",
            ConfigKey::IdentityToken => "",
            ConfigKey::PollDeadline => "60000",
            ConfigKey::PollInterval => "1200",
            ConfigKey::ProgressTimeout => "120000",
            ConfigKey::ThreadListLimit => "50",
            ConfigKey::WebSearch => "false",

            // Special
            ConfigKey::ConfigFile => return config_path.to_string_lossy().to_string(),
            ConfigKey::ThreadId => "",
        };

        return res.to_string();
    }

    pub async fn load(cmd: Command, clap_arg_matches: Vec<&ArgMatches>) -> Result<()> {
        for key in ConfigKey::iter() {
            Config::set(key, &Config::default(key))
        }

        let mut config_file = Config::default(ConfigKey::ConfigFile);
        for matches in clap_arg_matches.as_slice() {
            if let Ok(Some(arg_config_file)) =
                matches.try_get_one::<String>(&ConfigKey::ConfigFile.to_string())
            {
                config_file = arg_config_file.to_string();
            }
        }

        let config_path = path::PathBuf::from(config_file);
        if config_path.exists() {
            let toml_str = fs::read_to_string(config_path).await?;
            Config::apply_toml(&cmd, &toml_str)?;
        }

        for key in ConfigKey::iter() {
            for matches in clap_arg_matches.as_slice() {
                if let Ok(Some(val)) = matches.try_get_one::<String>(&key.to_string()) {
                    if val.is_empty() {
                        continue;
                    }
                    Config::set(key, val)
                }
            }
        }

        tracing::debug!(
            api_url = Config::get(ConfigKey::ApiUrl),
            thread_id = Config::get(ConfigKey::ThreadId),
            web_search = Config::get(ConfigKey::WebSearch),
            first_byte_timeout = Config::get(ConfigKey::FirstByteTimeout),
            progress_timeout = Config::get(ConfigKey::ProgressTimeout),
            "config"
        );

        return Ok(());
    }

    fn apply_toml(cmd: &Command, toml_str: &str) -> Result<()> {
        let doc = toml_str.parse::<toml_edit::Document>()?;

        for key in ConfigKey::iter() {
            if let Some(val) = doc.get(&key.to_string()) {
                // Use clap value parsers to do validation.
                let mut possible_values = vec![];
                if let Some(arg) = cmd.get_arguments().find(|e| {
                    return e.get_long() == Some(key.to_string().as_str());
                }) {
                    possible_values = arg
                        .get_possible_values()
                        .iter()
                        .map(|e| return e.get_name().to_string())
                        .collect::<Vec<String>>();
                }

                if let Some(val_int) = val.as_integer() {
                    Config::set(key, &val_int.to_string());
                } else if let Some(val_bool) = val.as_bool() {
                    Config::set(key, &val_bool.to_string());
                } else if let Some(val_str) = val.as_str() {
                    if val_str.is_empty() {
                        continue;
                    }
                    if !possible_values.is_empty()
                        && !possible_values.contains(&val_str.to_string())
                    {
                        bail!(format!("config.toml has an invalid value for key '{key}': {val_str}\nPossible values are: {}", possible_values.join(", ")));
                    }
                    Config::set(key, val_str);
                } else {
                    bail!(format!(
                        "config.toml has an unsupported value type for key '{key}'"
                    ));
                }
            }
        }

        return Ok(());
    }

    /// Numeric settings are stored as strings like everything else.
    pub fn get_u64(key: ConfigKey) -> Result<u64> {
        let raw = Config::get(key);
        match raw.trim().parse::<u64>() {
            Ok(val) => return Ok(val),
            Err(_) => bail!(format!("Config key '{key}' must be a whole number, got '{raw}'")),
        }
    }

    pub fn get_bool(key: ConfigKey) -> bool {
        return matches!(
            Config::get(key).trim().to_lowercase().as_str(),
            "true" | "1" | "yes"
        );
    }

    pub fn serialize_default(cmd: Command) -> String {
        let toml_str = ConfigKey::iter()
            .filter_map(|key| {
                if key == ConfigKey::ThreadId || key == ConfigKey::ConfigFile {
                    return None;
                }

                let arg = cmd.get_arguments().find(|e| {
                    return e.get_long() == Some(key.to_string().as_str());
                })?;

                let mut description = arg
                    .get_help()
                    .map(|help| return help.to_string())
                    .unwrap_or_default();

                description = description
                    .split("[default:")
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string();

                if !arg.get_possible_values().is_empty() {
                    let possible_values = arg
                        .get_possible_values()
                        .iter()
                        .map(|e| return e.get_name().to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    description = format!("{description} [possible values: {}]", possible_values);
                }

                let mut val = Config::default(key);
                if val.is_empty() {
                    val = format!("# {key} = \"\"");
                } else if val.parse::<i64>().is_ok() || val.parse::<bool>().is_ok() {
                    val = format!("{key} = {val}");
                } else {
                    val = format!("{key} = \"{val}\"");
                }

                return Some(format!("# {description}\n{val}"));
            })
            .collect::<Vec<String>>()
            .join("\n\n");

        return toml_str;
    }
}
