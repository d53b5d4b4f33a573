mod api;
mod auth;
mod cli;
mod state;
mod tasks;
mod telemetry;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tower_http::trace::TraceLayer;

use sa_broadcaster::Broadcaster;
use sa_domain::config::ConfigSeverity;
use sa_engine::{CancelMap, EngineServices, EngineSubagentRunner};
use sa_providers::LlmRouter;
use sa_sessions::SessionStore;
use sa_tools::{ProcessManager, ToolRegistry};

use crate::auth::AuthState;
use crate::cli::{Cli, Command, ConfigAction};
use crate::state::AppState;
use crate::tasks::TaskCoordinator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli::load_config(cli.config.as_deref());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Config { action } => {
            run_config_action(action, config);
            Ok(())
        }
        Command::Serve => serve(config).await,
    }
}

fn run_config_action(action: ConfigAction, config: sa_domain::config::Config) {
    match action {
        ConfigAction::Validate => {
            let issues = config.validate();
            if issues.is_empty() {
                println!("configuration is valid");
                return;
            }
            for issue in &issues {
                println!("{issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
        }
        ConfigAction::Show => {
            match serde_json::to_string_pretty(&config) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("failed to serialize config: {e}"),
            }
        }
    }
}

async fn serve(config: sa_domain::config::Config) -> anyhow::Result<()> {
    let _telemetry = telemetry::init(&config.observability);
    tracing::info!("serialagent gateway starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Error => tracing::error!("{issue}"),
            ConfigSeverity::Warning => tracing::warn!("{issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!("refusing to start with invalid configuration, see logs above");
    }

    // ── Core services ────────────────────────────────────────────────
    // `ToolRegistry` and `EngineServices` are mutually referential: the
    // subagent tool needs a runner that recursively drives the engine,
    // and that runner needs the very `EngineServices` the registry is
    // part of. Build the registry and services first with no runner
    // wired up, then patch the runner in through the registry's `&self`
    // setter once `services` exists.
    let sessions = SessionStore::new(&config.state_root_dir)?;
    let broadcaster = Arc::new(Broadcaster::new());
    let tools = Arc::new(ToolRegistry::new());
    let process_manager = Arc::new(ProcessManager::new(config.tools.exec.clone()));

    let router = Arc::new(LlmRouter::from_config(&config.llm)?);
    for err in router.registry().init_errors() {
        tracing::warn!(
            provider_id = %err.provider_id,
            kind = %err.kind,
            error = %err.error,
            "provider failed to initialize, continuing without it"
        );
    }

    let workspace_root = PathBuf::from(&config.state_root_dir).join("workspace");
    std::fs::create_dir_all(&workspace_root)?;

    let services = Arc::new(EngineServices {
        sessions: sessions.clone(),
        broadcaster: broadcaster.clone(),
        tools: tools.clone(),
        router,
        process_manager,
        context: config.context.clone(),
        compaction: config.compaction.clone(),
        workspace_root,
    });

    let cancels = Arc::new(CancelMap::new());
    tools.set_subagent_runner(Arc::new(EngineSubagentRunner::new(
        services.clone(),
        cancels.clone(),
    )));

    let coordinator = Arc::new(TaskCoordinator::new(
        sessions.clone(),
        broadcaster.clone(),
        services.clone(),
        cancels.clone(),
        &config.state_root_dir,
        config.tasks.clamped().max_concurrent,
    )?);

    let auth = if config.admin.auth_enabled() {
        match std::env::var(&config.admin.jwt_secret_env) {
            Ok(secret) => {
                tracing::info!("bearer-token auth enabled");
                Some(AuthState::from_secret(&secret))
            }
            Err(_) => None,
        }
    } else {
        tracing::warn!("bearer-token auth disabled, all routes are unauthenticated");
        None
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let state = AppState {
        config: Arc::new(config),
        sessions,
        broadcaster,
        services,
        cancels,
        coordinator,
        auth,
    };

    let app = api::router(state).layer(TraceLayer::new_for_http());

    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
