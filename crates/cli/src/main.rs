use access::{AccessControl, InMemoryPolicyStore, Permissions, ResourcePath};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{init_structured_logging, ConfigLoader, HostConfig, LoggingConfig};
use console::style;
use platform::{HealthService, InMemoryRouter, PermissionsService, PlatformBuilder};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "hostd")]
#[command(about = "Plugin host with resource-based access control")]
#[command(version)]
struct Cli {
    /// Extra configuration file, applied after the default locations
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start platform services and discovered extensions until interrupted
    Serve {
        /// TOML file with grants and group memberships
        #[arg(long)]
        policy: Option<PathBuf>,
    },
    /// Evaluate one permission check against a policy file
    Check {
        #[arg(long)]
        policy: PathBuf,
        /// `user/<uid>` or `group/<uid>`; defaults to the configured anonymous user
        #[arg(long)]
        principal: Option<String>,
        /// Names (`read|update`) or a bitmask (`0x06`)
        #[arg(long)]
        permissions: String,
        #[arg(long)]
        resource: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Serve { policy } => {
            init_structured_logging(LoggingConfig::from(&config.logging))?;
            serve(config, policy.as_deref()).await
        }
        Commands::Check {
            policy,
            principal,
            permissions,
            resource,
        } => {
            let principal = principal.unwrap_or_else(|| config.auth.anonymous_user.clone());
            check(&config, &policy, principal, &permissions, &resource).await
        }
    }
}

async fn load_config(extra: Option<&Path>) -> Result<HostConfig> {
    let loader = match extra {
        Some(path) => ConfigLoader::new().with_path(path),
        None => ConfigLoader::new(),
    };
    loader.load().await.context("failed to load configuration")
}

async fn load_policy(path: Option<&Path>) -> Result<Arc<InMemoryPolicyStore>> {
    let store = match path {
        Some(path) => InMemoryPolicyStore::from_file(path).await?,
        None => {
            warn!("no policy file given, starting with an empty policy store");
            InMemoryPolicyStore::new()
        }
    };
    Ok(Arc::new(store))
}

fn access_control(config: &HostConfig, store: Arc<InMemoryPolicyStore>) -> AccessControl {
    let access = AccessControl::new(store);
    match &config.auth.root_user {
        Some(root) => access.with_root_principal(root.clone()),
        None => access,
    }
}

async fn serve(config: HostConfig, policy: Option<&Path>) -> Result<ExitCode> {
    let store = load_policy(policy).await?;
    let access = access_control(&config, store.clone());
    let permissions =
        PermissionsService::new(access, store).with_admin_group(config.auth.admin_group_uid.clone());
    let router = Arc::new(InMemoryRouter::with_root(config.app.api_root.clone()));

    let platform = PlatformBuilder::from_config(&config)
        .router(router.clone())
        .service("health", Arc::new(HealthService::default()))
        .service("permissions", Arc::new(permissions))
        .on_shutdown(|| async {
            info!("Shutdown complete");
            Ok(())
        })
        .build()?;

    if let Err(e) = platform.start().await {
        error!(code = e.error_code(), "Startup aborted: {e}");
        if let Err(e) = platform.shutdown().await {
            warn!(error = %e, "shutdown after failed startup did not complete");
        }
        return Ok(ExitCode::FAILURE);
    }

    for (method, path) in router.routes() {
        info!(method = %method, path = %path, "route registered");
    }
    info!(port = config.app.port, api_root = %config.app.api_root, "Host ready");

    let signal = shutdown_signal().await?;
    info!(signal, "Shutting down...");
    platform.shutdown().await?;
    Ok(ExitCode::SUCCESS)
}

/// Resolves with the name of the first termination signal received.
#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut quit = signal(SignalKind::quit()).context("failed to install SIGQUIT handler")?;
    let name = tokio::select! {
        interrupted = tokio::signal::ctrl_c() => {
            interrupted?;
            "SIGINT"
        }
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

async fn check(
    config: &HostConfig,
    policy: &Path,
    principal: String,
    permissions: &str,
    resource: &str,
) -> Result<ExitCode> {
    let requested = Permissions::parse(permissions)
        .with_context(|| format!("unknown permissions: {permissions}"))?;
    let path = ResourcePath::parse(resource)?;
    let store = load_policy(Some(policy)).await?;
    let ctx = access_control(config, store).context_for(principal);

    let allowed = ctx.has_permissions(requested, &path).await?;
    let names = requested.names().join("|");
    if allowed {
        println!("{} {} may {} {}", style("ALLOW").green().bold(), ctx.principal(), names, path);
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{} {} may not {} {}", style("DENY").red().bold(), ctx.principal(), names, path);
        Ok(ExitCode::FAILURE)
    }
}
