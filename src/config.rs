use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::PackError;
use crate::pipeline::ConversionOptions;
use crate::versions::DEFAULT_SOURCE_URL;

pub const CONFIG_FILE: &str = "packshift.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub include_snapshots: Option<bool>,
    #[serde(default)]
    pub smart_naming: Option<bool>,
    #[serde(default)]
    pub bundle: Option<bool>,
    #[serde(default)]
    pub output_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub source_url: String,
    pub options: ConversionOptions,
    pub output_dir: Utf8PathBuf,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `packshift.json` from the working directory when no
    /// path is given. Only an explicit path has to exist.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, PackError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| PackError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| PackError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, PackError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(PackError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let source_url = config
            .source_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string());

        Ok(ResolvedConfig {
            schema_version,
            source_url,
            options: ConversionOptions {
                include_snapshots: config.include_snapshots.unwrap_or(false),
                smart_naming: config.smart_naming.unwrap_or(false),
                bundle: config.bundle.unwrap_or(false),
            },
            output_dir: config
                .output_dir
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| Utf8PathBuf::from(".")),
        })
    }
}
