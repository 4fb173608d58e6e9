//! CLI command definitions and execution
//!
//! Every command loads the configuration, builds the configured backend and
//! drives it through the `StorageBackend` contract only.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::debug;

use blobkit_core::{
    BackendKind, BlobItem, Config, ConfigManager, ListBlobsInput, MemoryBackend, Metadata,
    StorageBackend,
};
use blobkit_s3::S3Backend;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

mod bucket;
mod caps;
mod cat;
mod check;
mod completions;
mod config;
mod cp;
mod expire;
mod ls;
mod mv;
pub mod put;
mod rm;
mod stat;

/// bk - blobkit operator CLI
///
/// Drives one bucket on an S3-compatible store (or an in-process memory
/// backend) through the blobkit storage contract.
#[derive(Parser, Debug)]
#[command(name = "bk")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format: human-readable or JSON
    #[arg(long, global = true, default_value = "false")]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, default_value = "false")]
    pub no_color: bool,

    /// Disable progress bar
    #[arg(long, global = true, default_value = "false")]
    pub no_progress: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true, default_value = "false")]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true, default_value = "false")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show or write the configuration file
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show backend capabilities
    Caps,

    /// List blobs under a prefix
    Ls(ls::LsArgs),

    /// Show blob metadata
    Stat(stat::StatArgs),

    /// Write blob contents to stdout
    Cat(cat::CatArgs),

    /// Upload a file, in parts when it is large
    Put(put::PutArgs),

    /// Copy a blob inside the bucket
    Cp(cp::CpArgs),

    /// Rename a blob
    Mv(mv::MvArgs),

    /// Remove blobs
    Rm(rm::RmArgs),

    /// Create the configured bucket
    Mb,

    /// Remove the configured bucket
    Rb(bucket::RbArgs),

    /// Abort abandoned multipart uploads
    Expire(expire::ExpireArgs),

    /// Run the conformance suite against the configured backend
    Check(check::CheckArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

/// Execute the CLI command and return an exit code
pub async fn execute(cli: Cli) -> ExitCode {
    let output_config = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        no_progress: cli.no_progress,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Config(cmd) => config::execute(cmd, output_config),
        Commands::Caps => caps::execute(output_config).await,
        Commands::Ls(args) => ls::execute(args, output_config).await,
        Commands::Stat(args) => stat::execute(args, output_config).await,
        Commands::Cat(args) => cat::execute(args, output_config).await,
        Commands::Put(args) => put::execute(args, output_config).await,
        Commands::Cp(args) => cp::execute(args, output_config).await,
        Commands::Mv(args) => mv::execute(args, output_config).await,
        Commands::Rm(args) => rm::execute(args, output_config).await,
        Commands::Mb => bucket::make(output_config).await,
        Commands::Rb(args) => bucket::remove(args, output_config).await,
        Commands::Expire(args) => expire::execute(args, output_config).await,
        Commands::Check(args) => check::execute(args, output_config).await,
        Commands::Completions(args) => completions::execute(args),
    }
}

/// Loaded configuration plus the backend it describes
pub(crate) struct Session {
    pub config: Config,
    pub backend: Arc<dyn StorageBackend>,
}

impl Session {
    /// Bucket the backend is bound to
    pub fn bucket(&self) -> &str {
        bucket_name(&self.config)
    }
}

/// Load the configuration, build the backend and bind it to its bucket
///
/// Fails before any command runs when the bucket is missing or unreachable.
pub(crate) async fn open_backend(formatter: &Formatter) -> Result<Session, ExitCode> {
    let session = open_unbound(formatter).await?;
    let bucket = session.bucket();
    if let Err(e) = session.backend.init(bucket).await {
        return Err(formatter.fail(&format!("Failed to open bucket '{bucket}'"), &e));
    }
    debug!(bucket, "bucket ready");
    Ok(session)
}

/// Like [`open_backend`] but without checking the bucket, for `mb`
pub(crate) async fn open_unbound(formatter: &Formatter) -> Result<Session, ExitCode> {
    let config = ConfigManager::new()
        .and_then(|manager| manager.load())
        .map_err(|e| formatter.fail("Failed to load configuration", &e))?;

    let backend = build_backend(&config)
        .await
        .map_err(|e| formatter.fail("Failed to create backend", &e))?;
    debug!(kind = %config.backend.kind, bucket = %config.backend.bucket, "backend built");

    Ok(Session { config, backend })
}

fn bucket_name(config: &Config) -> &str {
    match (config.backend.kind, config.backend.bucket.as_str()) {
        (BackendKind::Memory, "") => "memory",
        (_, name) => name,
    }
}

async fn build_backend(config: &Config) -> blobkit_core::Result<Arc<dyn StorageBackend>> {
    let expire_after = config.multipart.expire_after();
    let backend: Arc<dyn StorageBackend> = match config.backend.kind {
        BackendKind::Memory => {
            Arc::new(MemoryBackend::new(bucket_name(config)).with_expire_after(expire_after))
        }
        BackendKind::S3 => {
            Arc::new(S3Backend::new(&config.backend).await?.with_expire_after(expire_after))
        }
    };
    Ok(backend)
}

/// Every blob under `prefix`, following continuation tokens
pub(crate) async fn list_all(
    backend: &dyn StorageBackend,
    prefix: &str,
    delimiter: Option<&str>,
    page_size: Option<u32>,
) -> blobkit_core::Result<(Vec<String>, Vec<BlobItem>)> {
    let mut prefixes = Vec::new();
    let mut items = Vec::new();
    let mut token = None;

    loop {
        let page = backend
            .list_blobs(ListBlobsInput {
                prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
                delimiter: delimiter.map(str::to_string),
                max_keys: page_size,
                continuation_token: token.take(),
                ..Default::default()
            })
            .await?;

        prefixes.extend(page.prefixes);
        items.extend(page.items);
        match page.next_continuation_token {
            Some(next) if page.is_truncated => token = Some(next),
            _ => return Ok((prefixes, items)),
        }
    }
}

/// Parse a `key=value` metadata argument
pub(crate) fn parse_meta(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}

pub(crate) fn to_metadata(pairs: &[(String, String)]) -> Metadata {
    pairs.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobkit_core::PutBlobInput;

    #[test]
    fn test_parse_meta() {
        assert_eq!(
            parse_meta("origin=cli").unwrap(),
            ("origin".to_string(), "cli".to_string())
        );
        assert_eq!(parse_meta("empty=").unwrap().1, "");
        assert!(parse_meta("novalue").is_err());
        assert!(parse_meta("=value").is_err());
    }

    #[tokio::test]
    async fn test_list_all_follows_tokens() {
        let backend = MemoryBackend::new("b");
        for key in ["a/1", "a/2", "a/3", "a/sub/4", "b/5"] {
            backend
                .put_blob(PutBlobInput::new(key, b"x".to_vec()))
                .await
                .unwrap();
        }

        let (prefixes, items) = list_all(&backend, "a/", Some("/"), Some(1)).await.unwrap();
        assert_eq!(prefixes, vec!["a/sub/".to_string()]);
        let keys: Vec<_> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, ["a/1", "a/2", "a/3"]);

        let (_, items) = list_all(&backend, "", None, None).await.unwrap();
        assert_eq!(items.len(), 5);
    }

    #[tokio::test]
    async fn test_build_memory_backend_defaults_bucket() {
        let mut config = Config::default();
        config.backend.kind = BackendKind::Memory;
        assert_eq!(bucket_name(&config), "memory");
        let backend = build_backend(&config).await.unwrap();
        assert!(backend.init("memory").await.is_ok());
    }

    #[tokio::test]
    async fn test_session_binds_configured_bucket() {
        let mut config = Config::default();
        config.backend.kind = BackendKind::Memory;
        config.backend.bucket = "scratch".into();
        let session = Session {
            backend: build_backend(&config).await.unwrap(),
            config,
        };
        assert_eq!(session.bucket(), "scratch");
        assert!(session.backend.init(session.bucket()).await.is_ok());
        assert!(session.backend.init("memory").await.is_err());
    }
}
