use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use s3gate_auth::UploadTokenCodec;
use s3gate_storage::{InMemoryBackend, ObjectBackend};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Default)]
#[command(name = "s3gate", about = "S3-compatible protocol gateway")]
struct Cli {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value = "9000")]
    port: u16,

    /// Key id of the gateway user. Falls back to `S3GATE_ACCESS_KEY`.
    #[arg(long)]
    access_key: Option<String>,

    /// Secret of the gateway user. Falls back to `S3GATE_SECRET_KEY`.
    #[arg(long)]
    secret_key: Option<String>,

    /// Secret used to sign multipart upload ids. Falls back to
    /// `S3GATE_UPLOAD_TOKEN_SECRET`.
    #[arg(long)]
    upload_token_secret: Option<String>,

    /// Retired upload-id secret still accepted for uploads already in flight. Falls back
    /// to `S3GATE_PREVIOUS_UPLOAD_TOKEN_SECRET`.
    #[arg(long)]
    previous_upload_token_secret: Option<String>,

    /// Bucket readable and writable without credentials; created at startup. Repeatable.
    /// Falls back to the comma-separated `S3GATE_PUBLIC_BUCKETS`.
    #[arg(long = "public-bucket")]
    public_buckets: Vec<String>,

    /// Emit logs as JSON lines.
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

/// Command line merged with its environment fallbacks.
#[derive(Debug)]
struct Settings {
    addr: String,
    credentials: Option<(String, String)>,
    upload_token_secret: String,
    previous_upload_token_secret: Option<String>,
    public_buckets: Vec<String>,
}

impl Settings {
    fn resolve(cli: Cli, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let pick = |flag: Option<String>, var: &str| {
            flag.or_else(|| env(var)).filter(|value| !value.trim().is_empty())
        };

        let access_key = pick(cli.access_key, "S3GATE_ACCESS_KEY");
        let secret_key = pick(cli.secret_key, "S3GATE_SECRET_KEY");
        let credentials = match (access_key, secret_key) {
            (Some(access_key), Some(secret_key)) => Some((access_key, secret_key)),
            (None, None) => None,
            _ => bail!("--access-key and --secret-key must be given together"),
        };

        let upload_token_secret = pick(cli.upload_token_secret, "S3GATE_UPLOAD_TOKEN_SECRET")
            .context("--upload-token-secret (or S3GATE_UPLOAD_TOKEN_SECRET) is required")?;
        let previous_upload_token_secret = pick(
            cli.previous_upload_token_secret,
            "S3GATE_PREVIOUS_UPLOAD_TOKEN_SECRET",
        );

        let public_buckets = if cli.public_buckets.is_empty() {
            env("S3GATE_PUBLIC_BUCKETS")
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        } else {
            cli.public_buckets
        };

        Ok(Self {
            addr: format!("{}:{}", cli.host, cli.port),
            credentials,
            upload_token_secret,
            previous_upload_token_secret,
            public_buckets,
        })
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::from_default_env().add_directive("s3gate=info".parse()?);
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;
    let settings = Settings::resolve(cli, |var| std::env::var(var).ok())?;

    let mut backend = InMemoryBackend::new();
    match &settings.credentials {
        Some((access_key, secret_key)) => {
            backend = backend.with_user(access_key.as_str(), secret_key.as_str());
        }
        None => warn!("no credentials configured; only public buckets are reachable"),
    }
    for bucket in &settings.public_buckets {
        backend = backend.with_public_bucket(bucket.as_str());
    }
    for bucket in &settings.public_buckets {
        backend
            .create_bucket(None, bucket)
            .await
            .with_context(|| format!("failed to create public bucket {bucket}"))?;
        info!(%bucket, "public bucket ready");
    }

    let mut tokens = UploadTokenCodec::new(settings.upload_token_secret.as_bytes());
    if let Some(previous) = settings.previous_upload_token_secret.as_deref() {
        tokens = tokens.with_previous_secret(previous.as_bytes());
        info!("accepting upload ids signed with the previous secret");
    }

    let app = s3gate_s3_api::s3_router(Arc::new(backend), tokens);

    let listener = tokio::net::TcpListener::bind(&settings.addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.addr))?;
    info!("s3gate listening on {}", settings.addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{Cli, Settings};

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn cli() -> Cli {
        Cli {
            host: "127.0.0.1".to_string(),
            port: 9000,
            ..Cli::default()
        }
    }

    #[test]
    fn missing_token_secret_is_an_error() {
        assert!(Settings::resolve(cli(), env(&[])).is_err());
    }

    #[test]
    fn flags_take_precedence_over_environment() {
        let cli = Cli {
            upload_token_secret: Some("from-flag".to_string()),
            ..cli()
        };
        let settings = Settings::resolve(
            cli,
            env(&[
                ("S3GATE_UPLOAD_TOKEN_SECRET", "from-env"),
                ("S3GATE_ACCESS_KEY", "admin"),
                ("S3GATE_SECRET_KEY", "admin-secret"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.upload_token_secret, "from-flag");
        assert_eq!(
            settings.credentials,
            Some(("admin".to_string(), "admin-secret".to_string()))
        );
        assert_eq!(settings.addr, "127.0.0.1:9000");
    }

    #[test]
    fn half_configured_credentials_are_rejected() {
        let settings = Settings::resolve(
            cli(),
            env(&[
                ("S3GATE_UPLOAD_TOKEN_SECRET", "t"),
                ("S3GATE_ACCESS_KEY", "admin"),
            ]),
        );
        assert!(settings.is_err());
    }

    #[test]
    fn public_buckets_fall_back_to_environment_list() {
        let settings = Settings::resolve(
            cli(),
            env(&[
                ("S3GATE_UPLOAD_TOKEN_SECRET", "t"),
                ("S3GATE_PUBLIC_BUCKETS", "www, assets,,"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.public_buckets, ["www", "assets"]);
        assert!(settings.credentials.is_none());
    }
}
