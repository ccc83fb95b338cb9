//! reelcache - operator tool for the repository cache
//!
//! Usage:
//!   reelcache key <namespace> <filter-json> [field...]
//!   reelcache invalidate <namespace>
//!   reelcache ttl <key>
//!
//! The store is chosen from the environment (`REELCACHE_STORE`,
//! `REELCACHE_LMDB_PATH`, `REELCACHE_LMDB_MAX_MB`, `REELCACHE_REDIS_URL`).

mod store;

use std::process::ExitCode;
use std::time::Duration;

use reelcache_core::{derive_key, CacheConfig, CacheError, CacheKey, ConfigError, StoreError};
use reelcache_storage::RepositoryCache;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::store::StoreSpec;

const ENV_LOG_FORMAT: &str = "REELCACHE_LOG_FORMAT";
const DEFAULT_LOG_FILTER: &str = "reelcache_storage=info,reelcache_cli=info,warn";

const USAGE: &str = "\
Usage:
  reelcache key <namespace> <filter-json> [field...]
  reelcache invalidate <namespace>
  reelcache ttl <key>";

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Key {
        namespace: String,
        filter: serde_json::Value,
        fields: Vec<String>,
    },
    Invalidate {
        namespace: String,
    },
    Ttl {
        key: String,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::Cache(e.into())
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        Self::Cache(e.into())
    }
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Cache(_) => 1,
        }
    }
}

fn parse_args(args: &[String]) -> Result<Command, CliError> {
    let usage = |msg: &str| CliError::Usage(msg.to_string());

    match args {
        [cmd, namespace, filter, fields @ ..] if cmd == "key" => {
            let filter = serde_json::from_str(filter)
                .map_err(|e| CliError::Usage(format!("filter is not valid JSON: {}", e)))?;
            Ok(Command::Key {
                namespace: namespace.clone(),
                filter,
                fields: fields.to_vec(),
            })
        }
        [cmd, namespace] if cmd == "invalidate" => Ok(Command::Invalidate {
            namespace: namespace.clone(),
        }),
        [cmd, key] if cmd == "ttl" => Ok(Command::Ttl { key: key.clone() }),
        [cmd, ..] if matches!(cmd.as_str(), "key" | "invalidate" | "ttl") => {
            Err(usage(&format!("wrong number of arguments for `{}`", cmd)))
        }
        [cmd, ..] => Err(usage(&format!("unknown command `{}`", cmd))),
        [] => Err(usage("missing command")),
    }
}

fn format_ttl(ttl: Option<Duration>) -> String {
    match ttl {
        None => "missing".to_string(),
        Some(d) if d == Duration::MAX => "no expiry".to_string(),
        Some(d) => format!("{}s", d.as_secs()),
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // Logs go to stderr so command output stays pipeable.
    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("failed to initialize logging: {}", e);
    }
}

async fn run(command: Command) -> Result<String, CliError> {
    match command {
        Command::Key {
            namespace,
            filter,
            fields,
        } => {
            let projection = (!fields.is_empty()).then_some(fields.as_slice());
            let key = derive_key(&namespace, &filter, projection).map_err(CacheError::from)?;
            Ok(key.to_string())
        }
        Command::Invalidate { namespace } => {
            let config = CacheConfig::from_env()?;
            let store = StoreSpec::from_env()?.open().await?;
            let cache = RepositoryCache::try_new(store, config)?;
            let removed = cache.invalidate_namespace(&namespace).await?;
            tracing::info!(%namespace, removed, backend = cache.store().backend_name(), "invalidated");
            Ok(removed.to_string())
        }
        Command::Ttl { key } => {
            let key = CacheKey::parse(&key).map_err(CacheError::from)?;
            let store = StoreSpec::from_env()?.open().await?;
            let ttl = store.ttl(key.as_str()).await?;
            Ok(format_ttl(ttl))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!();
            eprintln!("{}", USAGE);
            return ExitCode::from(e.exit_code());
        }
    };

    match run(command).await {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_key_command() {
        let command = parse_args(&args(&["key", "videos", r#"{"id": 7}"#, "title", "slug"])).unwrap();
        assert_eq!(
            command,
            Command::Key {
                namespace: "videos".to_string(),
                filter: json!({"id": 7}),
                fields: vec!["title".to_string(), "slug".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_other_commands() {
        assert_eq!(
            parse_args(&args(&["invalidate", "users"])).unwrap(),
            Command::Invalidate {
                namespace: "users".to_string()
            }
        );
        assert_eq!(
            parse_args(&args(&["ttl", "users:abc"])).unwrap(),
            Command::Ttl {
                key: "users:abc".to_string()
            }
        );
    }

    #[test]
    fn test_usage_errors_exit_with_two() {
        for bad in [
            args(&[]),
            args(&["purge"]),
            args(&["invalidate"]),
            args(&["ttl", "a", "b"]),
            args(&["key", "videos", "{not json"]),
        ] {
            let err = parse_args(&bad).unwrap_err();
            assert!(matches!(err, CliError::Usage(_)), "{:?}", bad);
            assert_eq!(err.exit_code(), 2);
        }
    }

    #[test]
    fn test_format_ttl() {
        assert_eq!(format_ttl(None), "missing");
        assert_eq!(format_ttl(Some(Duration::MAX)), "no expiry");
        assert_eq!(format_ttl(Some(Duration::from_secs(42))), "42s");
    }

    #[tokio::test]
    async fn test_key_command_matches_library() {
        let output = run(Command::Key {
            namespace: "Videos".to_string(),
            filter: json!({}),
            fields: Vec::new(),
        })
        .await
        .unwrap();
        assert_eq!(
            output,
            "videos:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }
}
