use crate::{
    gateway::Handler,
    services::link_issuer::{
        DEFAULT_LINK_SECONDS, LinkPolicy, MAX_LINK_SECONDS, MIN_LINK_SECONDS,
    },
};
use anyhow::{Context, Result};
use clap::Parser;
use rand::{RngCore, rngs::OsRng};
use std::{env, path::PathBuf, str::FromStr};
use url::Url;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub bucket: String,
    pub public_url: Url,
    pub signing_secret: SigningSecret,
    pub link_policy: LinkPolicy,
}

/// HMAC key for signed links. Never printed.
#[derive(Clone)]
pub struct SigningSecret {
    bytes: Vec<u8>,
    pub generated: bool,
}

impl SigningSecret {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningSecret")
            .field("generated", &self.generated)
            .finish_non_exhaustive()
    }
}

/// What the process was asked to do.
#[derive(Debug, Clone)]
pub enum Mode {
    Serve,
    Migrate,
    Seed,
    Invoke { handler: Handler, event: PathBuf },
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "CineDB movie catalog API")]
pub struct Args {
    /// Host to bind to (overrides CINEDB_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CINEDB_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where poster objects are stored (overrides CINEDB_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides CINEDB_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket holding poster objects (overrides CINEDB_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Base URL that signed links point at (overrides CINEDB_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Run migrations and exit
    #[arg(long, conflicts_with_all = ["invoke", "seed"])]
    pub migrate: bool,

    /// Insert the sample movies and exit
    #[arg(long, conflicts_with = "invoke")]
    pub seed: bool,

    /// Run a single gateway handler against one event and exit
    #[arg(long, value_enum, requires = "event")]
    pub invoke: Option<Handler>,

    /// Event JSON file for --invoke, or `-` for stdin
    #[arg(long)]
    pub event: Option<PathBuf>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the run mode.
    pub fn from_env_and_args() -> Result<(Self, Mode)> {
        let args = Args::parse();
        Self::from_args(args)
    }

    fn from_args(args: Args) -> Result<(Self, Mode)> {
        // --- Environment fallback ---
        let env_host = env::var("CINEDB_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("CINEDB_PORT", 8080u16)?;
        let env_storage = env::var("CINEDB_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("CINEDB_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/cinedb.db".into());
        let env_bucket = env::var("CINEDB_BUCKET").unwrap_or_else(|_| "cinedb-posters".into());

        let port = args.port.unwrap_or(env_port);
        let public_url = match args.public_url.or_else(|| env::var("CINEDB_PUBLIC_URL").ok()) {
            Some(raw) => raw,
            None => format!("http://localhost:{}", port),
        };
        let public_url = Url::parse(&public_url)
            .with_context(|| format!("parsing public URL `{}`", public_url))?;

        let signing_secret = match env::var("CINEDB_SIGNING_SECRET") {
            Ok(secret) if !secret.is_empty() => SigningSecret {
                bytes: secret.into_bytes(),
                generated: false,
            },
            _ => {
                let mut bytes = vec![0u8; 32];
                OsRng.fill_bytes(&mut bytes);
                SigningSecret {
                    bytes,
                    generated: true,
                }
            }
        };

        let link_policy = LinkPolicy::new(
            env_parse("CINEDB_DEFAULT_EXPIRATION", DEFAULT_LINK_SECONDS)?,
            env_parse("CINEDB_MIN_EXPIRATION", MIN_LINK_SECONDS)?,
            env_parse("CINEDB_MAX_EXPIRATION", MAX_LINK_SECONDS)?,
        )?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            bucket: args.bucket.unwrap_or(env_bucket),
            public_url,
            signing_secret,
            link_policy,
        };

        let mode = match (args.migrate, args.seed, args.invoke, args.event) {
            (true, _, _, _) => Mode::Migrate,
            (false, true, _, _) => Mode::Seed,
            (false, false, Some(handler), Some(event)) => Mode::Invoke { handler, event },
            _ => Mode::Serve,
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_mode_needs_an_event() {
        let args = Args::try_parse_from(["cinedb", "--invoke", "get-movie"]);
        assert!(args.is_err());

        let args =
            Args::try_parse_from(["cinedb", "--invoke", "get-movie", "--event", "-"]).unwrap();
        let (_, mode) = AppConfig::from_args(args).unwrap();
        assert!(matches!(
            mode,
            Mode::Invoke { handler: Handler::GetMovie, ref event } if event.as_os_str() == "-"
        ));
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "cinedb",
            "--port",
            "9090",
            "--bucket",
            "other-bucket",
            "--public-url",
            "https://cdn.example.com/base",
            "--migrate",
        ])
        .unwrap();
        let (cfg, mode) = AppConfig::from_args(args).unwrap();

        assert!(matches!(mode, Mode::Migrate));
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.bucket, "other-bucket");
        assert_eq!(cfg.public_url.as_str(), "https://cdn.example.com/base");
    }

    #[test]
    fn seed_is_its_own_mode() {
        let args = Args::try_parse_from(["cinedb", "--seed"]).unwrap();
        let (_, mode) = AppConfig::from_args(args).unwrap();
        assert!(matches!(mode, Mode::Seed));

        assert!(Args::try_parse_from(["cinedb", "--seed", "--migrate"]).is_err());
        assert!(
            Args::try_parse_from(["cinedb", "--seed", "--invoke", "list-movies", "--event", "-"])
                .is_err()
        );
    }

    #[test]
    fn secrets_are_not_printed() {
        let secret = SigningSecret {
            bytes: b"hunter2".to_vec(),
            generated: false,
        };
        assert!(!format!("{:?}", secret).contains("hunter2"));
    }
}
