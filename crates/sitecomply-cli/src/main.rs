use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use sitecomply_core::cache::{
    AuthoritativeCache, HttpAuthoritativeSource, NoAuthoritativeSource, DEFAULT_CACHE_TTL,
};
use sitecomply_core::fetch::{HttpFetcher, HttpRenderDelegate, RenderPool, DEFAULT_RENDER_PERMITS};
use sitecomply_core::fix::ValidationConfig;
use sitecomply_core::provider::{build_provider, NoopProvider, ProviderKind, ProviderSettings};
use sitecomply_core::report::{render_fix_result, render_scan_report, OutputFormat};
use sitecomply_core::sanitize::SanitizerConfig;
use sitecomply_core::scan::pipeline::ScanPipeline;
use sitecomply_core::{
    ArtifactType, CancelToken, Category, CheckKind, CheckSet, FixEngine, FixRequest,
    ProviderClient, ScanRequest, ScoreConfig, SiteContext, Telemetry, WhiteLabelSanitizer,
};

#[derive(Parser, Debug)]
#[command(
    name = "sitecomply",
    author,
    version,
    about = "Website compliance scanner and fix generator"
)]
struct Cli {
    /// Optional layered config file (TOML or YAML)
    #[arg(long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// YAML file describing the provider fallback chain
    #[arg(long = "providers-config", value_name = "FILE", global = true)]
    providers_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a website and print the compliance report
    Scan {
        url: String,
        /// Page cap for multi-page scans
        #[arg(long, default_value_t = 1)]
        max_pages: usize,
        /// Comma-separated check set (default: all checks)
        #[arg(long)]
        checks: Option<String>,
        /// Emit JSON instead of the human-readable report
        #[arg(long)]
        json: bool,
    },
    /// Generate a remediation artifact for a finding category
    Fix {
        /// Finding category (legal-notice, privacy-policy, cookie-consent, accessibility)
        category: String,
        /// Artifact type: code, legal-text, widget-config, guide
        #[arg(long, default_value = "legal-text")]
        artifact: String,
        #[arg(long, default_value = "en")]
        locale: String,
        #[arg(long, default_value = "")]
        site_name: String,
        #[arg(long, default_value = "example.com")]
        host: String,
        /// Emit JSON instead of the human-readable report
        #[arg(long)]
        json: bool,
    },
    /// List the available compliance checks
    ListChecks {
        /// Emit check names as JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
    /// Probe every configured provider
    Health,
}

/// Layered application configuration: defaults, then the optional config
/// file, then `SITECOMPLY__`-prefixed environment variables.
#[derive(Debug, Default, Deserialize)]
struct AppConfig {
    #[serde(default)]
    score: Option<ScoreConfig>,
    #[serde(default)]
    sanitizer: Option<SanitizerConfig>,
    #[serde(default)]
    validation: Option<ValidationConfig>,
    #[serde(default)]
    fetch_timeout_secs: Option<u64>,
    /// Cache TTL in humantime notation, e.g. "7d" or "12h".
    #[serde(default)]
    cache_ttl: Option<String>,
    #[serde(default)]
    render: Option<RenderConfig>,
    #[serde(default)]
    authoritative: Option<AuthoritativeConfig>,
}

#[derive(Debug, Deserialize)]
struct RenderConfig {
    endpoint: String,
    #[serde(default)]
    permits: Option<usize>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AuthoritativeConfig {
    endpoint: String,
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ProvidersFile {
    providers: Vec<ProviderEntry>,
}

#[derive(Debug, Deserialize)]
struct ProviderEntry {
    name: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let app = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan {
            url,
            max_pages,
            checks,
            json,
        } => scan(&app, &url, max_pages, checks.as_deref(), json).await,
        Commands::Fix {
            category,
            artifact,
            locale,
            site_name,
            host,
            json,
        } => {
            fix(
                &app,
                cli.providers_config.as_deref(),
                &category,
                &artifact,
                &locale,
                &site_name,
                &host,
                json,
            )
            .await
        }
        Commands::ListChecks { json } => list_checks(json),
        Commands::Health => health(cli.providers_config.as_deref()).await,
    }
}

async fn scan(
    app: &AppConfig,
    url: &str,
    max_pages: usize,
    checks: Option<&str>,
    json: bool,
) -> Result<()> {
    let fetch_timeout = Duration::from_secs(app.fetch_timeout_secs.unwrap_or(15));
    let fetcher = Arc::new(HttpFetcher::new(fetch_timeout)?);

    let renderer = match &app.render {
        Some(render) => {
            let timeout = Duration::from_secs(render.timeout_secs.unwrap_or(30));
            let delegate = HttpRenderDelegate::new(render.endpoint.clone(), timeout)?;
            RenderPool::new(
                Arc::new(delegate),
                render.permits.unwrap_or(DEFAULT_RENDER_PERMITS),
                timeout,
            )
        }
        None => RenderPool::noop(),
    };

    let score = app.score.clone().unwrap_or_default();
    score.validate()?;
    let pipeline = ScanPipeline::new(fetcher, renderer).with_score_config(score);

    let mut request = ScanRequest::new(url).with_max_pages(max_pages);
    if let Some(checks) = checks {
        request = request.with_checks(
            checks
                .parse::<CheckSet>()
                .map_err(anyhow::Error::msg)
                .context("invalid --checks value")?,
        );
    }

    let result = pipeline.run(&request, &CancelToken::new()).await?;
    let format = if json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    println!("{}", render_scan_report(&result, format)?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn fix(
    app: &AppConfig,
    providers_config: Option<&std::path::Path>,
    category: &str,
    artifact: &str,
    locale: &str,
    site_name: &str,
    host: &str,
    json: bool,
) -> Result<()> {
    let category: Category = category.parse().map_err(anyhow::Error::msg)?;
    let artifact: ArtifactType = artifact.parse().map_err(anyhow::Error::msg)?;

    let providers = build_chain(providers_config)?;
    let cache = build_cache(app)?;
    let telemetry = Arc::new(Telemetry::new());

    let mut engine = FixEngine::new(providers, cache, Arc::clone(&telemetry));
    if let Some(validation) = app.validation.clone() {
        engine = engine.with_validation(validation)?;
    }
    if let Some(sanitizer) = app.sanitizer.clone() {
        engine = engine.with_sanitizer(WhiteLabelSanitizer::new(sanitizer)?);
    }

    let site = SiteContext {
        site_name: site_name.to_string(),
        host: host.to_string(),
        locale: locale.to_string(),
    };
    let request = FixRequest::new(category, artifact, site).with_locale(locale);

    let result = engine.fix(&request).await?;
    let format = if json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    println!("{}", render_fix_result(&result, format)?);
    Ok(())
}

fn list_checks(json: bool) -> Result<()> {
    if json {
        let names: Vec<&str> = CheckKind::ALL.iter().map(|kind| kind.name()).collect();
        println!("{}", serde_json::to_string_pretty(&names)?);
        return Ok(());
    }
    for kind in CheckKind::ALL {
        println!("- {}", kind.name());
    }
    Ok(())
}

async fn health(providers_config: Option<&std::path::Path>) -> Result<()> {
    let providers = build_chain(providers_config)?;
    if providers.is_empty() {
        println!("No providers configured; fixes will use the deterministic template.");
        return Ok(());
    }
    for provider in &providers {
        print!("Checking provider {} ... ", provider.name());
        match provider.health().await {
            Ok(()) => println!("ok"),
            Err(err) => println!("failed ({err})"),
        }
    }
    Ok(())
}

/// Assemble the provider fallback chain, in order, from the providers
/// file; fall back to a single env-configured provider when no file is
/// given.
fn build_chain(
    providers_config: Option<&std::path::Path>,
) -> Result<Vec<Box<dyn ProviderClient>>> {
    let Some(path) = providers_config else {
        return chain_from_env();
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read providers config at {}", path.display()))?;
    let file: ProvidersFile = serde_yaml::from_str(&raw)
        .with_context(|| format!("invalid providers config at {}", path.display()))?;

    let mut chain: Vec<Box<dyn ProviderClient>> = Vec::new();
    for entry in file.providers {
        let kind: ProviderKind = entry.name.parse().map_err(anyhow::Error::msg)?;
        if kind == ProviderKind::Noop {
            chain.push(Box::new(NoopProvider));
            continue;
        }
        let mut settings = ProviderSettings::from_env()?;
        if let Some(model) = entry.model {
            settings.model = Some(model);
        }
        if let Some(endpoint) = entry.endpoint {
            settings.endpoint = Some(endpoint);
        }
        chain.push(build_provider(kind, &settings)?);
    }
    Ok(chain)
}

fn chain_from_env() -> Result<Vec<Box<dyn ProviderClient>>> {
    if std::env::var("SITECOMPLY_API_KEY").unwrap_or_default().trim().is_empty()
        && std::env::var("SITECOMPLY_PROVIDER").unwrap_or_default().trim() != "noop"
    {
        tracing::info!("no provider configured; fix requests fall back to templates");
        return Ok(Vec::new());
    }
    let settings = ProviderSettings::from_env()?;
    let kind: ProviderKind = settings.provider.parse().map_err(anyhow::Error::msg)?;
    Ok(vec![build_provider(kind, &settings)?])
}

fn build_cache(app: &AppConfig) -> Result<Arc<AuthoritativeCache>> {
    let ttl = match &app.cache_ttl {
        Some(raw) => humantime::parse_duration(raw)
            .with_context(|| format!("invalid cache_ttl `{raw}`"))?,
        None => DEFAULT_CACHE_TTL,
    };
    let cache = match &app.authoritative {
        Some(source) => {
            let timeout = Duration::from_secs(source.timeout_secs.unwrap_or(15));
            let source =
                HttpAuthoritativeSource::new(source.endpoint.clone(), source.api_key.clone(), timeout)?;
            AuthoritativeCache::new(Arc::new(source), ttl)
        }
        None => AuthoritativeCache::new(Arc::new(NoAuthoritativeSource), ttl),
    };
    Ok(Arc::new(cache))
}

fn load_config(path: Option<&std::path::Path>) -> Result<AppConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path.to_path_buf()));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("SITECOMPLY")
            .separator("__")
            .try_parsing(true),
    );
    let settings = builder
        .build()
        .context("failed to assemble layered configuration")?;
    settings
        .try_deserialize::<AppConfig>()
        .context("invalid application configuration")
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tokio=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}
