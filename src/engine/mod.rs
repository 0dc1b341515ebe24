//! # Módulo Engine - Orquestração Ponta a Ponta
//!
//! Pipeline completo de uma execução:
//!
//! ```text
//! configuração → descoberta → filtros → resolução (DAG) → prioridade
//!      → execução (sequencial ou paralela por camada) → agregação
//! ```
//!
//! ## Concorrência
//!
//! No modo paralelo, até `max_parallel` suítes executam simultaneamente,
//! sempre dentro da mesma camada topológica; nenhuma camada começa
//! antes de a anterior terminar. O contexto de variáveis é por suíte;
//! o registro de exports é compartilhado atrás de RwLock (escritas só
//! na conclusão de suítes, leituras só na montagem de imports de
//! dependentes, que começam depois: a ordem topológica é a sincronização).
//!
//! ## Cancelamento
//!
//! O orçamento global (`execution.timeout`) arma um watchdog que
//! cancela o token; requisições em voo são abortadas e as suítes
//! restantes marcadas deterministicamente.

use crate::config::{EngineConfig, ExecutionMode};
use crate::discovery;
use crate::errors::DependencyError;
use crate::expression::{self, EvalScope};
use crate::exports::ExportRegistry;
use crate::hooks::{self, LifecycleHooks, NoopHooks};
use crate::http::HttpClient;
use crate::priority::{self, PriorityWeights, DEFAULT_TAG};
use crate::protocol::{
    AggregatedResult, EndpointTiming, PerformanceSummary, RunTotals, Specification, StepOutcome,
    SuiteResult, SuiteStatus,
};
use crate::resolver::{self, ResultCache};
use crate::runner::{RetrySettings, RunnerSettings, SuiteRunner};
use crate::strategies::{DefaultInputProvider, InputProvider, StrategyFactory};
use anyhow::Result;
use chrono::Utc;
use glob::Pattern;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// ENGINE
// ============================================================================

pub struct FlowEngine {
    config: EngineConfig,
    hooks: Arc<dyn LifecycleHooks>,
    input_provider: Arc<dyn InputProvider>,
    cancel: CancellationToken,
}

impl FlowEngine {
    /// Cria o engine validando a configuração antes de qualquer coisa.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            hooks: Arc::new(NoopHooks),
            input_provider: Arc::new(DefaultInputProvider),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn LifecycleHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_input_provider(mut self, provider: Arc<dyn InputProvider>) -> Self {
        self.input_provider = provider;
        self
    }

    /// Token para cancelamento externo (Ctrl-C, timeout do embedder).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Pipeline completo: descoberta → filtros → execução → agregado.
    pub async fn run(&self) -> Result<AggregatedResult> {
        let specs = discovery::discover(
            Path::new(&self.config.test_directory),
            &self.config.discovery,
        )?;
        for spec in &specs {
            hooks::fire("on_test_discovered", self.hooks.on_test_discovered(spec)).await;
        }
        self.run_specs(specs).await
    }

    /// Executa um conjunto de suítes já descobertas (útil para
    /// embedders que têm a própria descoberta).
    pub async fn run_specs(&self, specs: Vec<Specification>) -> Result<AggregatedResult> {
        let run_id = Uuid::new_v4().to_string();
        let start_time = Utc::now();
        let started = Instant::now();

        let filtered = self.apply_filters(specs);
        info!(run_id = %run_id, suites = filtered.len(), "Execução iniciando");
        hooks::fire(
            "on_execution_start",
            self.hooks
                .on_execution_start(&self.config.project_name, filtered.len()),
        )
        .await;

        let weights = PriorityWeights::from_levels(&self.config.priorities.levels);
        let plan = match resolver::resolve(filtered, &weights) {
            Ok(plan) => plan,
            Err(e) => {
                hooks::fire("on_error", self.hooks.on_error(&e.to_string())).await;
                error!(error = %e, "Resolução de dependências falhou; nada executado");
                return Err(e.into());
            }
        };
        let ordered = priority::order_within_layers(plan.ordered, &plan.layers, &weights);

        // Watchdog do orçamento global.
        if let Some(budget_ms) = self.config.execution.timeout {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(budget_ms)).await;
                warn!(budget_ms, "Orçamento global esgotado; cancelando execução");
                cancel.cancel();
            });
        }

        let registry = Arc::new(RwLock::new(ExportRegistry::new()));
        let runner = Arc::new(self.build_runner(Arc::clone(&registry)));

        let suites = match self.config.execution.mode {
            ExecutionMode::Sequential => {
                self.execute_sequential(&ordered, &plan.layers, Arc::clone(&runner))
                    .await
            }
            ExecutionMode::Parallel => {
                self.execute_parallel(&ordered, &plan.layers, Arc::clone(&runner))
                    .await
            }
        };

        let result = self.aggregate(run_id, start_time, started, suites);
        hooks::fire("on_execution_end", self.hooks.on_execution_end(&result)).await;
        info!(
            total = result.totals.total,
            failed = result.totals.failed,
            "Execução concluída"
        );
        Ok(result)
    }

    fn build_runner(&self, registry: Arc<RwLock<ExportRegistry>>) -> SuiteRunner {
        let certificates = self
            .config
            .certificate_registry()
            .expect("config validada no construtor");
        let http = Arc::new(HttpClient::new(certificates));
        let factory = StrategyFactory::standard(Arc::clone(&self.input_provider));

        SuiteRunner::new(
            factory,
            http,
            Arc::clone(&self.hooks),
            registry,
            RunnerSettings {
                default_timeout_ms: self.config.globals.timeouts.default,
                retry: RetrySettings {
                    enabled: self.config.execution.retry_failed.enabled,
                    max_attempts: self.config.execution.retry_failed.max_attempts,
                    delay_ms: self.config.execution.retry_failed.delay_ms,
                },
                strict_exports: self.config.strict_exports,
                interpolation_cache: self.config.interpolation_cache,
                env_prefix: self.config.env_prefix.clone(),
            },
            self.config.globals.variables.clone(),
            self.config.globals.base_url.clone(),
        )
    }

    // ========================================================================
    // FILTROS (AND-compostos)
    // ========================================================================

    fn apply_filters(&self, specs: Vec<Specification>) -> Vec<Specification> {
        let filters = &self.config.filters;
        if filters.is_empty() {
            return specs;
        }

        let file_patterns: Vec<Pattern> = filters
            .file_patterns
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .collect();
        let exclude_patterns: Vec<Pattern> = filters
            .exclude_patterns
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .collect();

        let before = specs.len();
        let kept: Vec<Specification> = specs
            .into_iter()
            .filter(|spec| {
                let priority = spec
                    .metadata
                    .priority
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TAG.to_string());

                if !filters.priorities.is_empty()
                    && !filters
                        .priorities
                        .iter()
                        .any(|p| p.eq_ignore_ascii_case(&priority))
                {
                    return false;
                }
                if !filters.node_ids.is_empty() && !filters.node_ids.contains(&spec.node_id) {
                    return false;
                }
                if !filters.suite_names.is_empty()
                    && !filters.suite_names.contains(&spec.suite_name)
                {
                    return false;
                }
                if !filters.tags.is_empty()
                    && !spec.metadata.tags.iter().any(|t| filters.tags.contains(t))
                {
                    return false;
                }
                let path = spec
                    .file_path
                    .as_ref()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                if !file_patterns.is_empty() && !file_patterns.iter().any(|p| p.matches(&path)) {
                    return false;
                }
                if exclude_patterns.iter().any(|p| p.matches(&path)) {
                    return false;
                }
                if let Some(max) = filters.max_duration_ms {
                    if spec.metadata.estimated_duration_ms.unwrap_or(0) > max {
                        return false;
                    }
                }
                true
            })
            .collect();

        info!(before, after = kept.len(), "Filtros aplicados");
        kept
    }

    // ========================================================================
    // EXECUÇÃO SEQUENCIAL
    // ========================================================================

    async fn execute_sequential(
        &self,
        ordered: &[Specification],
        _layers: &[Vec<String>],
        runner: Arc<SuiteRunner>,
    ) -> Vec<SuiteResult> {
        let by_id: HashMap<String, &Specification> =
            ordered.iter().map(|s| (s.node_id.clone(), s)).collect();
        let mut cache = ResultCache::new();
        let mut statuses: HashMap<String, SuiteStatus> = HashMap::new();
        let mut results: Vec<SuiteResult> = Vec::with_capacity(ordered.len());
        let mut abort_reason: Option<String> = None;

        for spec in ordered {
            if self.cancel.is_cancelled() && abort_reason.is_none() {
                abort_reason = Some("cancelled: orçamento global esgotado".to_string());
            }
            if let Some(reason) = &abort_reason {
                results.push(SuiteResult::skipped(spec, reason.clone(), now()));
                statuses.insert(spec.node_id.clone(), SuiteStatus::Skipped);
                continue;
            }

            if let Some(reason) = self.blocked_by_dependency(spec, &statuses) {
                warn!(node_id = %spec.node_id, %reason, "Suíte pulada");
                results.push(SuiteResult::skipped(spec, reason, now()));
                statuses.insert(spec.node_id.clone(), SuiteStatus::Skipped);
                continue;
            }

            // Reentradas de dependência conforme a política de cache.
            self.reenter_dependencies(spec, &by_id, &mut cache, &runner)
                .await;

            let result = self.run_one(spec, &runner, &HashMap::new()).await;
            statuses.insert(spec.node_id.clone(), result.status);
            cache.store(result.clone());

            let failed = result.status == SuiteStatus::Failure;
            results.push(result);

            if failed {
                abort_reason = self.fail_fast_reason(spec);
            }
        }

        results
    }

    // ========================================================================
    // EXECUÇÃO PARALELA (por camada)
    // ========================================================================

    async fn execute_parallel(
        &self,
        ordered: &[Specification],
        layers: &[Vec<String>],
        runner: Arc<SuiteRunner>,
    ) -> Vec<SuiteResult> {
        let by_id: HashMap<String, Specification> = ordered
            .iter()
            .map(|s| (s.node_id.clone(), s.clone()))
            .collect();
        let semaphore = Arc::new(Semaphore::new(self.config.execution.max_parallel.max(1)));
        let mut cache = ResultCache::new();
        let mut statuses: HashMap<String, SuiteStatus> = HashMap::new();
        let mut results_by_id: HashMap<String, SuiteResult> = HashMap::new();
        let mut abort_reason: Option<String> = None;

        for layer in layers {
            // Dentro da camada, a ordem de lançamento segue a prioridade
            // (ordered já reflete o desempate).
            let members: Vec<&Specification> = ordered
                .iter()
                .filter(|s| layer.contains(&s.node_id))
                .collect();

            let mut join_set: JoinSet<SuiteResult> = JoinSet::new();
            let spec_refs: HashMap<String, &Specification> =
                by_id.iter().map(|(k, v)| (k.clone(), v)).collect();

            for spec in members {
                if self.cancel.is_cancelled() && abort_reason.is_none() {
                    abort_reason = Some("cancelled: orçamento global esgotado".to_string());
                }
                if let Some(reason) = &abort_reason {
                    results_by_id.insert(
                        spec.node_id.clone(),
                        SuiteResult::skipped(spec, reason.clone(), now()),
                    );
                    statuses.insert(spec.node_id.clone(), SuiteStatus::Skipped);
                    continue;
                }
                if let Some(reason) = self.blocked_by_dependency(spec, &statuses) {
                    results_by_id.insert(
                        spec.node_id.clone(),
                        SuiteResult::skipped(spec, reason, now()),
                    );
                    statuses.insert(spec.node_id.clone(), SuiteStatus::Skipped);
                    continue;
                }

                // Reentradas rodam antes do paralelismo da camada, em
                // série, para não duplicar execuções da mesma dependência.
                self.reenter_dependencies(spec, &spec_refs, &mut cache, &runner)
                    .await;

                let runner = Arc::clone(&runner);
                let semaphore = Arc::clone(&semaphore);
                let spec = spec.clone();
                let suite_timeout = self.config.globals.timeouts.slow_tests;
                let cancel = self.cancel.clone();
                let hooks = Arc::clone(&self.hooks);

                join_set.spawn(async move {
                    let _permit = semaphore.acquire().await.expect("semáforo aberto");
                    run_suite_bounded(&spec, &runner, &HashMap::new(), suite_timeout, cancel, hooks)
                        .await
                });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(result) => {
                        statuses.insert(result.node_id.clone(), result.status);
                        cache.store(result.clone());
                        if result.status == SuiteStatus::Failure && abort_reason.is_none() {
                            if let Some(spec) = by_id.get(&result.node_id) {
                                abort_reason = self.fail_fast_reason(spec);
                            }
                        }
                        results_by_id.insert(result.node_id.clone(), result);
                    }
                    Err(e) => error!(error = %e, "Task de suíte terminou abruptamente"),
                }
            }
        }

        // Ordena os resultados pela ordem planejada.
        ordered
            .iter()
            .filter_map(|s| results_by_id.remove(&s.node_id))
            .collect()
    }

    // ========================================================================
    // APOIO À EXECUÇÃO
    // ========================================================================

    /// Falha/skip de dependência required bloqueia a suíte.
    fn blocked_by_dependency(
        &self,
        spec: &Specification,
        statuses: &HashMap<String, SuiteStatus>,
    ) -> Option<String> {
        for dep in &spec.depends {
            if !dep.required || !self.dependency_active(spec, dep) {
                continue;
            }
            match statuses.get(&dep.node_id) {
                Some(SuiteStatus::Success) => {}
                Some(status) => {
                    return Some(format!(
                        "dependência '{}' terminou como {:?}",
                        dep.node_id, status
                    ));
                }
                // Dependência filtrada para fora do run: sem resultado.
                None => {
                    return Some(format!(
                        "dependência '{}' não executou neste run",
                        dep.node_id
                    ));
                }
            }
        }
        None
    }

    /// Avalia a condição de ativação da aresta, quando declarada.
    fn dependency_active(&self, spec: &Specification, dep: &crate::protocol::Dependency) -> bool {
        let Some(condition) = &dep.condition else {
            return true;
        };
        let mut variables = self.config.globals.variables.clone();
        for (k, v) in &spec.variables {
            variables.insert(k.clone(), v.clone());
        }
        let scope = EvalScope::new().with_variables(
            serde_json::to_value(&variables).unwrap_or(Value::Null),
        );
        match expression::evaluate_bool(condition, &scope) {
            Ok(active) => active,
            Err(reason) => {
                warn!(
                    suite = %spec.node_id,
                    dependency = %dep.node_id,
                    %reason,
                    "Condição de dependência inválida; tratando como ativa"
                );
                true
            }
        }
    }

    /// Re-executa dependências cuja política de cache não permite reuso.
    ///
    /// Reentradas atualizam exports e cache; NUNCA entram na lista de
    /// resultados; cada node_id aparece no máximo uma vez no agregado.
    async fn reenter_dependencies(
        &self,
        spec: &Specification,
        by_id: &HashMap<String, &Specification>,
        cache: &mut ResultCache,
        runner: &Arc<SuiteRunner>,
    ) {
        for dep in &spec.depends {
            if !self.dependency_active(spec, dep) {
                continue;
            }
            // Reentrada pressupõe uma execução anterior: dependência que
            // nunca rodou (pulada, filtrada) não é ressuscitada aqui.
            if cache
                .lookup(&dep.node_id, crate::protocol::CachePolicy::Reuse(true))
                .is_none()
            {
                continue;
            }
            if cache.lookup(&dep.node_id, dep.cache).is_some() {
                continue;
            }
            let Some(dep_spec) = by_id.get(&dep.node_id) else {
                continue;
            };

            info!(
                suite = %spec.node_id,
                dependency = %dep.node_id,
                "Política de cache exige re-execução da dependência"
            );
            {
                let registry = runner_registry(runner);
                registry.write().await.clear_node_runtime(&dep.node_id);
            }
            let result = self.run_one(dep_spec, runner, &dep.variables).await;
            cache.store(result);
        }
    }

    async fn run_one(
        &self,
        spec: &Specification,
        runner: &Arc<SuiteRunner>,
        overrides: &HashMap<String, Value>,
    ) -> SuiteResult {
        run_suite_bounded(
            spec,
            runner,
            overrides,
            self.config.globals.timeouts.slow_tests,
            self.cancel.clone(),
            Arc::clone(&self.hooks),
        )
        .await
    }

    /// Razão de fail-fast após a falha de `spec`, se alguma política pedir.
    fn fail_fast_reason(&self, spec: &Specification) -> Option<String> {
        if !self.config.execution.continue_on_failure {
            return Some(format!(
                "fail-fast: suíte '{}' falhou e continue_on_failure=false",
                spec.node_id
            ));
        }
        if self.config.priorities.fail_fast_on_required {
            let priority = spec
                .metadata
                .priority
                .clone()
                .unwrap_or_else(|| DEFAULT_TAG.to_string());
            if self
                .config
                .priorities
                .required
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&priority))
            {
                return Some(format!(
                    "fail-fast: suíte de prioridade required '{}' falhou",
                    spec.node_id
                ));
            }
        }
        None
    }

    // ========================================================================
    // AGREGAÇÃO
    // ========================================================================

    fn aggregate(
        &self,
        run_id: String,
        start_time: chrono::DateTime<Utc>,
        started: Instant,
        suites: Vec<SuiteResult>,
    ) -> AggregatedResult {
        let totals = RunTotals {
            total: suites.len(),
            successful: suites
                .iter()
                .filter(|s| s.status == SuiteStatus::Success)
                .count(),
            failed: suites
                .iter()
                .filter(|s| s.status == SuiteStatus::Failure)
                .count(),
            skipped: suites
                .iter()
                .filter(|s| s.status == SuiteStatus::Skipped)
                .count(),
        };
        let executed = totals.successful + totals.failed;
        let success_rate = if executed == 0 {
            1.0
        } else {
            totals.successful as f64 / executed as f64
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let performance = self
            .config
            .reporting
            .include_performance_metrics
            .then(|| build_performance(&suites, duration_ms));
        let global_variables = self.config.reporting.include_variables_state.then(|| {
            self.config
                .globals
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<BTreeMap<String, Value>>()
        });

        AggregatedResult {
            project_name: self.config.project_name.clone(),
            run_id,
            start_time: start_time.to_rfc3339(),
            end_time: Utc::now().to_rfc3339(),
            duration_ms,
            suites,
            totals,
            success_rate,
            performance,
            global_variables,
        }
    }
}

// ============================================================================
// FUNÇÕES LIVRES
// ============================================================================

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Executa uma suíte com timeout e hooks de ciclo de vida.
async fn run_suite_bounded(
    spec: &Specification,
    runner: &Arc<SuiteRunner>,
    overrides: &HashMap<String, Value>,
    suite_timeout_ms: u64,
    cancel: CancellationToken,
    hooks_ref: Arc<dyn LifecycleHooks>,
) -> SuiteResult {
    hooks::fire("on_suite_start", hooks_ref.on_suite_start(spec)).await;

    let result = match tokio::time::timeout(
        std::time::Duration::from_millis(suite_timeout_ms),
        runner.run(spec, overrides, cancel),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            let mut failed = SuiteResult::skipped(
                spec,
                format!("timeout: suíte excedeu {}ms", suite_timeout_ms),
                now(),
            );
            failed.status = SuiteStatus::Failure;
            failed
        }
    };

    hooks::fire("on_suite_end", hooks_ref.on_suite_end(&result)).await;
    result
}

fn runner_registry(runner: &Arc<SuiteRunner>) -> Arc<RwLock<ExportRegistry>> {
    runner.registry_handle()
}

/// Resumo de performance a partir dos steps com resposta.
fn build_performance(suites: &[SuiteResult], total_duration_ms: u64) -> PerformanceSummary {
    let mut timings: Vec<(String, u64)> = Vec::new();
    for suite in suites {
        collect_timings(&suite.steps, &mut timings);
    }

    if timings.is_empty() {
        return PerformanceSummary {
            request_count: 0,
            min_response_time_ms: 0,
            avg_response_time_ms: 0.0,
            max_response_time_ms: 0,
            requests_per_second: 0.0,
            slowest_endpoints: Vec::new(),
        };
    }

    let count = timings.len();
    let min = timings.iter().map(|(_, d)| *d).min().unwrap_or(0);
    let max = timings.iter().map(|(_, d)| *d).max().unwrap_or(0);
    let sum: u64 = timings.iter().map(|(_, d)| *d).sum();
    let rps = if total_duration_ms == 0 {
        0.0
    } else {
        count as f64 / (total_duration_ms as f64 / 1000.0)
    };

    timings.sort_by(|a, b| b.1.cmp(&a.1));
    let slowest = timings
        .into_iter()
        .take(5)
        .map(|(url, duration_ms)| EndpointTiming { url, duration_ms })
        .collect();

    PerformanceSummary {
        request_count: count,
        min_response_time_ms: min,
        avg_response_time_ms: sum as f64 / count as f64,
        max_response_time_ms: max,
        requests_per_second: rps,
        slowest_endpoints: slowest,
    }
}

fn collect_timings(steps: &[StepOutcome], timings: &mut Vec<(String, u64)>) {
    for step in steps {
        if let (Some(request), Some(_)) = (&step.request, &step.response) {
            timings.push((request.url.clone(), step.duration_ms));
        }
        if let Some(nested) = &step.iteration_results {
            collect_timings(nested, timings);
        }
    }
}
