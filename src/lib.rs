//! # flowrunner - Orquestrador Declarativo de Testes de API
//!
//! Dado um diretório de suítes YAML, o engine descobre os arquivos,
//! resolve o grafo de dependências entre suítes, ordena por prioridade
//! e executa cada uma como uma sequência de steps HTTP com validação,
//! captura de variáveis e propagação de exports entre suítes.
//!
//! ## Arquitetura (de baixo para cima)
//!
//! ```text
//! context    <- variáveis em 5 escopos + interpolação de templates
//! exports    <- registro de exports entre suítes
//! http       <- cliente HTTP + certificados de cliente por domínio
//! assertions <- validação da resposta (operadores + expressões)
//! capture    <- extração de valores da resposta
//! resolver   <- DAG de dependências (ciclos, ordem topológica)
//! priority   <- ordenação por prioridade dentro das camadas
//! strategies <- despacho de steps (request/scenario/iteration/input)
//! runner     <- execução de uma suíte
//! engine     <- pipeline completo (descoberta -> execução -> agregado)
//! ```

/// Validação de respostas com operadores e expressões.
pub mod assertions;

/// Extração de valores da resposta para o contexto.
pub mod capture;

/// Registro de configuração e carga de YAML.
pub mod config;

/// Contexto de variáveis em cinco escopos.
pub mod context;

/// Descoberta de arquivos de suíte.
pub mod discovery;

/// Orquestração ponta a ponta.
pub mod engine;

/// Tipos de erro por fase.
pub mod errors;

/// Registro de exports entre suítes.
pub mod exports;

/// Sublinguagem de expressões sandbox.
pub mod expression;

/// Callbacks de ciclo de vida.
pub mod hooks;

/// Cliente HTTP e certificados de cliente.
pub mod http;

/// Ordenação por prioridade.
pub mod priority;

/// Estruturas de dados das suítes e resultados.
pub mod protocol;

/// Navegação estrutural (JSONPath / caminhos pontuados).
pub mod query;

/// Relatórios (console, JSON).
pub mod report;

/// Resolução do grafo de dependências.
pub mod resolver;

/// Execução de uma suíte.
pub mod runner;

/// Estratégias de step.
pub mod strategies;

pub use config::EngineConfig;
pub use engine::FlowEngine;
pub use protocol::{AggregatedResult, Specification, SuiteResult};
