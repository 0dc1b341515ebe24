//! # flowrunner - CLI
//!
//! Ponto de entrada do orquestrador. A CLI tem três subcomandos:
//!
//! ```bash
//! # Executa as suítes descobertas
//! flowrunner run --config flow.yaml
//!
//! # Só valida configuração, descoberta e grafo de dependências
//! flowrunner validate --config flow.yaml
//!
//! # Lista as suítes descobertas com prioridade e dependências
//! flowrunner list --config flow.yaml
//! ```
//!
//! Exit code 1 sempre que alguma suíte falhar; é o contrato com CI/CD.

use clap::{Parser, Subcommand};
use flowrunner::config::{EngineConfig, ExecutionMode};
use flowrunner::engine::FlowEngine;
use flowrunner::priority::{PriorityWeights, DEFAULT_TAG};
use flowrunner::{discovery, report, resolver};
use std::path::PathBuf;
use tracing::{error, info, Level};

// ============================================================================
// DEFINIÇÃO DA CLI
// ============================================================================

#[derive(Parser)]
#[command(name = "flowrunner")]
#[command(about = "Orquestrador declarativo de testes de API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Executa as suítes descobertas.
    Run {
        /// Arquivo de configuração YAML.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Diretório de suítes (sobrepõe test_directory da configuração).
        #[arg(short, long)]
        directory: Option<PathBuf>,

        /// Executa em paralelo dentro das camadas topológicas.
        #[arg(long, default_value = "false")]
        parallel: bool,

        /// Filtro por node_ids (separados por vírgula).
        #[arg(long)]
        node_ids: Option<String>,

        /// Filtro por prioridades (separadas por vírgula).
        #[arg(long)]
        priorities: Option<String>,

        /// Filtro por tags (separadas por vírgula).
        #[arg(long)]
        tags: Option<String>,

        /// Modo silencioso: apenas erros no stderr.
        #[arg(long, short = 's', default_value = "false")]
        silent: bool,

        /// Modo verbose: logs de debug.
        #[arg(long, short = 'v', default_value = "false")]
        verbose: bool,
    },

    /// Valida configuração, descoberta e grafo, sem executar nada.
    Validate {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        directory: Option<PathBuf>,
    },

    /// Lista as suítes descobertas.
    List {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        directory: Option<PathBuf>,
    },
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            directory,
            parallel,
            node_ids,
            priorities,
            tags,
            silent,
            verbose,
        } => {
            init_logging(silent, verbose);

            let mut engine_config = load_config(config);
            if let Some(dir) = directory {
                engine_config.test_directory = dir.display().to_string();
            }
            if parallel {
                engine_config.execution.mode = ExecutionMode::Parallel;
            }
            if let Some(ids) = node_ids {
                engine_config.filters.node_ids = split_csv(&ids);
            }
            if let Some(ps) = priorities {
                engine_config.filters.priorities = split_csv(&ps);
            }
            if let Some(ts) = tags {
                engine_config.filters.tags = split_csv(&ts);
            }

            run(engine_config).await;
        }

        Commands::Validate { config, directory } => {
            init_logging(false, false);
            let mut engine_config = load_config(config);
            if let Some(dir) = directory {
                engine_config.test_directory = dir.display().to_string();
            }
            validate(engine_config);
        }

        Commands::List { config, directory } => {
            init_logging(true, false);
            let mut engine_config = load_config(config);
            if let Some(dir) = directory {
                engine_config.test_directory = dir.display().to_string();
            }
            list(engine_config);
        }
    }
}

// ============================================================================
// SUBCOMANDOS
// ============================================================================

async fn run(config: EngineConfig) {
    let reporting = config.reporting.clone();
    let engine = match FlowEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "Configuração inválida");
            std::process::exit(1);
        }
    };

    // Ctrl-C cancela requisições em voo e marca o restante.
    let cancel = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            error!("Interrompido pelo usuário; cancelando execução");
            cancel.cancel();
        }
    });

    let result = match engine.run().await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Execução abortada");
            std::process::exit(1);
        }
    };

    if let Err(e) = report::render(&result, &reporting) {
        error!(error = %e, "Falha ao renderizar relatório");
    }

    if !result.all_passed() {
        std::process::exit(1);
    }
}

fn validate(config: EngineConfig) {
    if let Err(e) = config.validate() {
        error!(error = %e, "Configuração inválida");
        std::process::exit(1);
    }

    let specs = match discovery::discover(
        std::path::Path::new(&config.test_directory),
        &config.discovery,
    ) {
        Ok(specs) => specs,
        Err(e) => {
            error!(error = %e, "Descoberta falhou");
            std::process::exit(1);
        }
    };

    let weights = PriorityWeights::from_levels(&config.priorities.levels);
    match resolver::resolve(specs, &weights) {
        Ok(plan) => {
            info!(
                suites = plan.ordered.len(),
                layers = plan.layers.len(),
                "Configuração e grafo válidos"
            );
            println!("OK: {} suítes em {} camadas", plan.ordered.len(), plan.layers.len());
        }
        Err(e) => {
            error!(error = %e, "Grafo inválido");
            std::process::exit(1);
        }
    }
}

fn list(config: EngineConfig) {
    let specs = match discovery::discover(
        std::path::Path::new(&config.test_directory),
        &config.discovery,
    ) {
        Ok(specs) => specs,
        Err(e) => {
            eprintln!("Descoberta falhou: {}", e);
            std::process::exit(1);
        }
    };

    for spec in &specs {
        let priority = spec
            .metadata
            .priority
            .clone()
            .unwrap_or_else(|| DEFAULT_TAG.to_string());
        let deps: Vec<&str> = spec.depends.iter().map(|d| d.node_id.as_str()).collect();
        println!(
            "{:<20} {:<30} prioridade={:<8} steps={:<3} deps=[{}]",
            spec.node_id,
            spec.suite_name,
            priority,
            spec.steps.len(),
            deps.join(", "),
        );
    }
}

// ============================================================================
// APOIO
// ============================================================================

fn load_config(path: Option<PathBuf>) -> EngineConfig {
    match path {
        Some(path) => match EngineConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Erro na configuração: {}", e);
                std::process::exit(1);
            }
        },
        None => EngineConfig::default(),
    }
}

fn init_logging(silent: bool, verbose: bool) {
    let level = if silent {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .try_init();
}

fn split_csv(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
