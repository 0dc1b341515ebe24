//! # Módulo Runner - Execução de Uma Suíte
//!
//! Executa uma especificação do começo ao fim:
//!
//! 1. Inicializa o contexto de variáveis (Global, Environment, Suite;
//!    Runtime limpo; visão de imports das dependências)
//! 2. Loop de steps na ordem declarada, com hooks `on_step_start` /
//!    `on_step_end` e retry por step conforme a configuração
//! 3. Falha sem `continue_on_failure` interrompe a suíte
//! 4. Publica os exports declarados no registro compartilhado
//!    (nome nunca preenchido = warning; fatal em modo estrito)
//! 5. Monta o `SuiteResult`
//!
//! O contexto pertence a este runner; escritor único. O registro de
//! exports é compartilhado atrás de um RwLock; escritas acontecem só
//! na publicação, leituras só na montagem dos imports.

use crate::context::VariableContext;
use crate::errors::ExportError;
use crate::exports::ExportRegistry;
use crate::hooks::{self, LifecycleHooks};
use crate::http::HttpClient;
use crate::protocol::{Specification, StepOutcome, StepStatus, SuiteResult, SuiteStatus};
use crate::strategies::{ExecutionEnv, StrategyFactory};
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

// ============================================================================
// CONFIGURAÇÃO DO RUNNER
// ============================================================================

/// Política de retry por step.
///
/// `max_attempts` conta a primeira tentativa: 3 significa no máximo
/// duas repetições. O retry esgota antes de a falha chegar ao loop da
/// suíte; só então `continue_on_failure` decide o destino.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub enabled: bool,
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 1,
            delay_ms: 0,
        }
    }
}

/// Parâmetros estáveis entre suítes.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub default_timeout_ms: u64,
    pub retry: RetrySettings,
    /// Em modo estrito, export declarado e nunca preenchido falha a suíte.
    pub strict_exports: bool,
    pub interpolation_cache: bool,
    pub env_prefix: String,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            retry: RetrySettings::default(),
            strict_exports: false,
            interpolation_cache: true,
            env_prefix: "FLOW_TEST_".to_string(),
        }
    }
}

// ============================================================================
// RUNNER
// ============================================================================

pub struct SuiteRunner {
    factory: Arc<StrategyFactory>,
    http: Arc<HttpClient>,
    hooks: Arc<dyn LifecycleHooks>,
    registry: Arc<RwLock<ExportRegistry>>,
    settings: RunnerSettings,
    global_variables: HashMap<String, Value>,
    default_base_url: Option<String>,
}

impl SuiteRunner {
    pub fn new(
        factory: Arc<StrategyFactory>,
        http: Arc<HttpClient>,
        hooks: Arc<dyn LifecycleHooks>,
        registry: Arc<RwLock<ExportRegistry>>,
        settings: RunnerSettings,
        global_variables: HashMap<String, Value>,
        default_base_url: Option<String>,
    ) -> Self {
        Self {
            factory,
            http,
            hooks,
            registry,
            settings,
            global_variables,
            default_base_url,
        }
    }

    /// Acesso ao registro compartilhado (o engine limpa namespaces em
    /// reentradas de dependência).
    pub fn registry_handle(&self) -> Arc<RwLock<ExportRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Executa a suíte. `variable_overrides` vem de reentradas de
    /// dependência (aresta com `variables`).
    pub async fn run(
        &self,
        spec: &Specification,
        variable_overrides: &HashMap<String, Value>,
        cancel: CancellationToken,
    ) -> SuiteResult {
        let start_time = Utc::now();
        let started = Instant::now();
        info!(node_id = %spec.node_id, suite = %spec.suite_name, "Suite starting");

        // Reserva do namespace antes de qualquer step.
        self.registry.write().await.register(
            spec.node_id.clone(),
            spec.suite_name.clone(),
            &spec.exports,
            spec.file_path.clone(),
        );

        let mut ctx = self.build_context(spec, variable_overrides).await;

        let mut steps: Vec<StepOutcome> = Vec::with_capacity(spec.steps.len());
        let mut suite_error: Option<String> = None;

        for step in &spec.steps {
            hooks::fire(
                "on_step_start",
                self.hooks.on_step_start(&spec.node_id, &step.name),
            )
            .await;

            let outcome = self
                .run_step_with_retry(spec, step, &mut ctx, &cancel)
                .await;

            // Captura virando export: encaminhamento incremental dos
            // nomes declarados, na hora em que aparecem.
            self.forward_declared_exports(spec, &outcome.captured).await;

            hooks::fire(
                "on_step_end",
                self.hooks.on_step_end(&spec.node_id, &outcome),
            )
            .await;

            let failed = outcome.status == StepStatus::Failure;
            let step_name = outcome.step_name.clone();
            let step_error = outcome.error.clone();
            steps.push(outcome);

            if failed && !step.continue_on_failure {
                suite_error = Some(format!(
                    "step '{}' falhou: {}",
                    step_name,
                    step_error.unwrap_or_else(|| "sem detalhe".to_string())
                ));
                break;
            }
            if cancel.is_cancelled() {
                suite_error = Some("cancelled: execução interrompida".to_string());
                break;
            }
        }

        // Publicação final dos exports declarados.
        if let Some(export_failure) = self.publish_exports(spec, &ctx).await {
            if suite_error.is_none() {
                suite_error = Some(export_failure);
            }
        }

        let exported = self
            .registry
            .read()
            .await
            .namespace_values(&spec.node_id)
            .map(|values| values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_else(BTreeMap::new);

        let steps_successful = steps
            .iter()
            .filter(|s| s.status == StepStatus::Success)
            .count();
        let steps_failed = steps
            .iter()
            .filter(|s| s.status == StepStatus::Failure)
            .count();
        let status = if suite_error.is_none() && steps_failed == 0 {
            SuiteStatus::Success
        } else {
            SuiteStatus::Failure
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            node_id = %spec.node_id,
            status = ?status,
            duration_ms,
            "Suite finished"
        );

        SuiteResult {
            node_id: spec.node_id.clone(),
            suite_name: spec.suite_name.clone(),
            status,
            start_time: start_time.to_rfc3339(),
            end_time: Utc::now().to_rfc3339(),
            duration_ms,
            steps_executed: steps.len(),
            steps_successful,
            steps_failed,
            steps,
            exported,
            error: suite_error,
        }
    }

    // ========================================================================
    // CONTEXTO
    // ========================================================================

    /// Monta o contexto da suíte: Global e Environment da configuração,
    /// Suite das variáveis declaradas (+ overrides), Imported da visão
    /// de exports das dependências.
    async fn build_context(
        &self,
        spec: &Specification,
        variable_overrides: &HashMap<String, Value>,
    ) -> VariableContext {
        let mut ctx = VariableContext::new();
        ctx.set_cache_enabled(self.settings.interpolation_cache);
        ctx.seed_global(&self.global_variables);
        ctx.load_environment(&self.settings.env_prefix);

        let mut suite_vars = spec.variables.clone();
        for (k, v) in variable_overrides {
            suite_vars.insert(k.clone(), v.clone());
        }
        ctx.seed_suite(&suite_vars);
        ctx.clear_runtime();

        let registry = self.registry.read().await;
        let mut namespaces: HashMap<String, HashMap<String, Value>> = HashMap::new();
        for dep in &spec.depends {
            if let Some(values) = registry.namespace_values(&dep.node_id) {
                namespaces.insert(dep.node_id.clone(), values.clone());
            }
        }
        let own = registry
            .namespace_values(&spec.node_id)
            .cloned()
            .unwrap_or_default();
        ctx.install_imports(&namespaces, &own);

        ctx
    }

    // ========================================================================
    // STEP COM RETRY
    // ========================================================================

    async fn run_step_with_retry(
        &self,
        spec: &Specification,
        step: &crate::protocol::Step,
        ctx: &mut VariableContext,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let max_attempts = if self.settings.retry.enabled {
            self.settings.retry.max_attempts.max(1)
        } else {
            1
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let mut env = ExecutionEnv {
                ctx: &mut *ctx,
                http: &self.http,
                base_url: spec
                    .base_url
                    .clone()
                    .or_else(|| self.default_base_url.clone()),
                default_timeout_ms: self.settings.default_timeout_ms,
                cancel: cancel.clone(),
            };

            let outcome = match self.factory.dispatch(step, &mut env).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Cancelamento: determinístico, sem retry.
                    error!(step = %step.name, error = %e, "Step cancelado");
                    return StepOutcome::failure(&step.name, 0, e.to_string());
                }
            };

            if outcome.status != StepStatus::Failure || attempt >= max_attempts {
                return outcome;
            }

            warn!(
                step = %step.name,
                attempt,
                max_attempts,
                delay_ms = self.settings.retry.delay_ms,
                "Step falhou; tentando novamente"
            );
            tokio::time::sleep(std::time::Duration::from_millis(self.settings.retry.delay_ms))
                .await;
        }
    }

    // ========================================================================
    // EXPORTS
    // ========================================================================

    /// Encaminha capturas cujo nome é um export declarado.
    async fn forward_declared_exports(
        &self,
        spec: &Specification,
        captured: &BTreeMap<String, Value>,
    ) {
        if captured.is_empty() || spec.exports.is_empty() {
            return;
        }
        let mut registry = self.registry.write().await;
        for name in &spec.exports {
            if let Some(value) = captured.get(name) {
                registry.set(&spec.node_id, name, value.clone());
            }
        }
        // Iterações publicam namespaceado; o nome cru pode estar lá dentro.
        for (name, value) in captured {
            if let Some(base) = name.split("_iteration_").next() {
                if base != name && spec.exports.iter().any(|e| e == base) {
                    registry.set(&spec.node_id, name, value.clone());
                }
            }
        }
    }

    /// Publica o valor corrente de cada export declarado. Nome sem
    /// valor é warning; ou falha, em modo estrito.
    async fn publish_exports(
        &self,
        spec: &Specification,
        ctx: &VariableContext,
    ) -> Option<String> {
        let mut missing: Vec<String> = Vec::new();
        {
            let mut registry = self.registry.write().await;
            for name in &spec.exports {
                match ctx.get(name) {
                    Some(value) => registry.set(&spec.node_id, name, value.clone()),
                    None if registry
                        .get(&format!("{}.{}", spec.node_id, name))
                        .is_some() =>
                    {
                        // Já encaminhado durante os steps.
                    }
                    None => missing.push(name.clone()),
                }
            }
        }

        if missing.is_empty() {
            return None;
        }

        for name in &missing {
            let err = ExportError::NeverBound {
                node_id: spec.node_id.clone(),
                name: name.clone(),
            };
            warn!(%err, "Export declarado sem valor");
        }

        if self.settings.strict_exports {
            Some(format!(
                "exports declarados sem valor em modo estrito: {}",
                missing.join(", ")
            ))
        } else {
            None
        }
    }
}
