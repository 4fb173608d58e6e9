//! config command - Write or show the configuration file
//!
//! `init` writes a fresh configuration bound to one bucket; `show` prints
//! the configuration currently in effect and where it was read from.

use clap::{Args, Subcommand};
use serde::Serialize;

use blobkit_core::{BackendConfig, BackendKind, Config, ConfigManager, Error, MultipartSettings};

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write a new configuration file
    Init(InitArgs),

    /// Show the configuration in effect
    Show,
}

/// Arguments for `config init`
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Backend kind (s3 or memory)
    #[arg(long, default_value = "s3", value_parser = parse_kind)]
    pub kind: BackendKind,

    /// Bucket every command operates on
    #[arg(long)]
    pub bucket: Option<String>,

    /// Endpoint URL for S3-compatible providers
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Region
    #[arg(long)]
    pub region: Option<String>,

    /// Use path-style bucket addressing
    #[arg(long)]
    pub path_style: bool,

    /// Multipart part size in bytes
    #[arg(long)]
    pub part_size: Option<u64>,

    /// Concurrent part uploads
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Age in seconds after which expire reclaims an upload
    #[arg(long)]
    pub expire_after: Option<u64>,

    /// Overwrite an existing configuration file
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    fn to_config(&self) -> Config {
        let bucket = match (&self.bucket, self.kind) {
            (Some(bucket), _) => bucket.clone(),
            (None, BackendKind::Memory) => "memory".to_string(),
            (None, BackendKind::S3) => String::new(),
        };

        let mut multipart = MultipartSettings::default();
        if let Some(part_size) = self.part_size {
            multipart.part_size = part_size;
        }
        if let Some(concurrency) = self.concurrency {
            multipart.concurrency = concurrency;
        }
        if let Some(secs) = self.expire_after {
            multipart.expire_after_secs = secs;
        }

        Config {
            backend: BackendConfig {
                kind: self.kind,
                bucket,
                endpoint: self.endpoint.clone(),
                region: self.region.clone(),
                path_style: self.path_style,
            },
            multipart,
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
struct ConfigOutput {
    path: String,
    #[serde(flatten)]
    config: Config,
}

/// Execute a config subcommand
pub fn execute(cmd: ConfigCommands, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let manager = match ConfigManager::new() {
        Ok(manager) => manager,
        Err(e) => return formatter.fail("Failed to locate configuration", &e),
    };

    match cmd {
        ConfigCommands::Init(args) => execute_init(args, &manager, &formatter),
        ConfigCommands::Show => execute_show(&manager, &formatter),
    }
}

fn execute_init(args: InitArgs, manager: &ConfigManager, formatter: &Formatter) -> ExitCode {
    let path = manager.config_path().display().to_string();
    if manager.config_path().exists() && !args.force {
        let err = Error::Conflict(format!("{path} already exists (use --force to overwrite)"));
        return formatter.fail("Refusing to overwrite configuration", &err);
    }

    let config = args.to_config();
    if let Err(e) = config.backend.validate() {
        return formatter.fail("Invalid configuration", &e);
    }
    if let Err(e) = manager.save(&config) {
        return formatter.fail("Failed to save configuration", &e);
    }

    if formatter.is_json() {
        formatter.json(&ConfigOutput { path, config });
    } else {
        formatter.success(&format!(
            "Configuration written to {path} ({} bucket '{}')",
            config.backend.kind, config.backend.bucket
        ));
    }
    ExitCode::Success
}

fn execute_show(manager: &ConfigManager, formatter: &Formatter) -> ExitCode {
    let config = match manager.load() {
        Ok(config) => config,
        Err(e) => return formatter.fail("Failed to load configuration", &e),
    };
    let path = manager.config_path().display().to_string();

    if formatter.is_json() {
        formatter.json(&ConfigOutput { path, config });
        return ExitCode::Success;
    }

    let backend = &config.backend;
    formatter.println(&format!("Path        : {path}"));
    formatter.println(&format!("Backend     : {}", backend.kind));
    formatter.println(&format!("Bucket      : {}", backend.bucket));
    if let Some(endpoint) = &backend.endpoint {
        formatter.println(&format!("Endpoint    : {endpoint}"));
    }
    if let Some(region) = &backend.region {
        formatter.println(&format!("Region      : {region}"));
    }
    if backend.path_style {
        formatter.println("Path style  : yes");
    }
    formatter.println(&format!(
        "Part size   : {}",
        humansize::format_size(config.multipart.part_size, humansize::BINARY)
    ));
    formatter.println(&format!("Concurrency : {}", config.multipart.concurrency));
    formatter.println(&format!("Expire after: {}s", config.multipart.expire_after_secs));
    ExitCode::Success
}

fn parse_kind(s: &str) -> Result<BackendKind, String> {
    match s.to_ascii_lowercase().as_str() {
        "s3" => Ok(BackendKind::S3),
        "memory" => Ok(BackendKind::Memory),
        _ => Err(format!("unknown backend kind '{s}' (expected s3 or memory)")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_args(kind: BackendKind) -> InitArgs {
        InitArgs {
            kind,
            bucket: None,
            endpoint: None,
            region: None,
            path_style: false,
            part_size: None,
            concurrency: None,
            expire_after: None,
            force: false,
        }
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("s3").unwrap(), BackendKind::S3);
        assert_eq!(parse_kind("Memory").unwrap(), BackendKind::Memory);
        assert!(parse_kind("gcs").is_err());
    }

    #[test]
    fn test_memory_init_defaults_bucket() {
        let config = init_args(BackendKind::Memory).to_config();
        assert_eq!(config.backend.bucket, "memory");
        assert!(config.backend.validate().is_ok());
    }

    #[test]
    fn test_s3_init_requires_bucket() {
        let config = init_args(BackendKind::S3).to_config();
        assert!(config.backend.validate().is_err());
    }

    #[test]
    fn test_init_overrides_multipart_settings() {
        let mut args = init_args(BackendKind::S3);
        args.bucket = Some("data".into());
        args.endpoint = Some("http://localhost:9000".into());
        args.path_style = true;
        args.concurrency = Some(8);
        args.expire_after = Some(3600);

        let config = args.to_config();
        assert!(config.backend.validate().is_ok());
        assert!(config.backend.path_style);
        assert_eq!(config.multipart.concurrency, 8);
        assert_eq!(config.multipart.expire_after_secs, 3600);
        assert_eq!(config.multipart.part_size, MultipartSettings::default().part_size);
    }

    #[test]
    fn test_config_output_flattens() {
        let output = ConfigOutput {
            path: "/tmp/config.toml".into(),
            config: init_args(BackendKind::Memory).to_config(),
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["path"], "/tmp/config.toml");
        assert_eq!(json["backend"]["kind"], "memory");
    }
}
