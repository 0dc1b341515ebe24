//! # Módulo de Resolução - Grafo de Dependências
//!
//! Constrói o DAG a partir das dependências declaradas e produz a lista
//! topologicamente ordenada de suítes, agrupada em camadas.
//!
//! ## Para todos entenderem:
//!
//! Se a suíte `users` depende de `auth`, então `auth` precisa terminar
//! com sucesso antes de `users` começar. O grafo organiza isso; as
//! camadas dizem o que pode rodar em paralelo.
//!
//! ```text
//!     [auth]   [setup]      <- camada 0 (sem dependências)
//!        \      /
//!         v    v
//!        [users]            <- camada 1
//!           |
//!           v
//!        [orders]           <- camada 2
//! ```
//!
//! ## Algoritmo
//!
//! - **Ciclos**: DFS com coloração branco/cinza/preto; encontrar um nó
//!   cinza na pilha significa ciclo, e a lista de node_ids ofensores é
//!   devolvida. O chamador aborta sem executar nenhum step.
//! - **Ordenação**: Kahn por camadas, com desempate determinístico
//!   (peso de prioridade desc, duração estimada asc, nome asc).
//! - **Dependência ausente**: required → aborta com erro; opcional →
//!   aresta descartada com warning.

use crate::errors::DependencyError;
use crate::priority::PriorityWeights;
use crate::protocol::{CachePolicy, Specification, SuiteResult};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

// ============================================================================
// PLANO RESOLVIDO
// ============================================================================

/// Saída da resolução: ordem total e camadas topológicas.
#[derive(Debug)]
pub struct ResolvedPlan {
    /// Suítes na ordem de execução.
    pub ordered: Vec<Specification>,

    /// node_ids agrupados por camada; dentro de cada camada a ordem
    /// já respeita o desempate de prioridade.
    pub layers: Vec<Vec<String>>,
}

// ============================================================================
// RESOLUÇÃO
// ============================================================================

/// Resolve o grafo de dependências das suítes descobertas.
pub fn resolve(
    specs: Vec<Specification>,
    weights: &PriorityWeights,
) -> Result<ResolvedPlan, DependencyError> {
    // Unicidade de node_id primeiro: o resto assume ids válidos.
    let mut seen = HashSet::new();
    for spec in &specs {
        if !seen.insert(spec.node_id.clone()) {
            return Err(DependencyError::DuplicateNodeId {
                node_id: spec.node_id.clone(),
            });
        }
    }

    let by_id: HashMap<String, &Specification> =
        specs.iter().map(|s| (s.node_id.clone(), s)).collect();

    // Arestas efetivas: dependência ausente aborta (required) ou é
    // descartada com warning (opcional).
    let mut edges: HashMap<String, Vec<String>> = HashMap::new();
    for spec in &specs {
        let mut deps = Vec::new();
        for dep in &spec.depends {
            if by_id.contains_key(&dep.node_id) {
                deps.push(dep.node_id.clone());
            } else if dep.required {
                return Err(DependencyError::Missing {
                    node_id: dep.node_id.clone(),
                    wanted_by: spec.node_id.clone(),
                });
            } else {
                warn!(
                    suite = %spec.node_id,
                    dependency = %dep.node_id,
                    "Dependência opcional não descoberta; aresta descartada"
                );
            }
        }
        edges.insert(spec.node_id.clone(), deps);
    }

    detect_cycle(&edges)?;

    // Kahn por camadas.
    let mut indegree: HashMap<&str, usize> = edges
        .iter()
        .map(|(id, deps)| (id.as_str(), deps.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (id, deps) in &edges {
        for dep in deps {
            dependents.entry(dep.as_str()).or_default().push(id.as_str());
        }
    }

    let mut remaining: HashSet<&str> = edges.keys().map(String::as_str).collect();
    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut ordered_ids: Vec<String> = Vec::new();

    while !remaining.is_empty() {
        let mut layer: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|id| indegree.get(id).copied().unwrap_or(0) == 0)
            .collect();
        debug_assert!(!layer.is_empty(), "ciclo deveria ter sido detectado");

        // Desempate determinístico dentro da camada.
        layer.sort_by(|a, b| {
            let sa = by_id[*a];
            let sb = by_id[*b];
            sort_key(sa, weights).cmp(&sort_key(sb, weights))
        });

        for id in &layer {
            remaining.remove(id);
            for dependent in dependents.get(id).cloned().unwrap_or_default() {
                if let Some(count) = indegree.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                }
            }
        }

        ordered_ids.extend(layer.iter().map(|s| s.to_string()));
        layers.push(layer.into_iter().map(String::from).collect());
    }

    info!(
        suites = ordered_ids.len(),
        layers = layers.len(),
        "Grafo de dependências resolvido"
    );

    let mut pool: HashMap<String, Specification> =
        specs.into_iter().map(|s| (s.node_id.clone(), s)).collect();
    let ordered = ordered_ids
        .iter()
        .map(|id| pool.remove(id).expect("id veio do próprio conjunto"))
        .collect();

    Ok(ResolvedPlan { ordered, layers })
}

/// Chave de ordenação: peso desc, duração estimada asc, nome asc.
fn sort_key(spec: &Specification, weights: &PriorityWeights) -> (i64, u64, String) {
    let weight = weights.weight_for(spec.metadata.priority.as_deref());
    let duration = spec.metadata.estimated_duration_ms.unwrap_or(u64::MAX);
    (-weight, duration, spec.suite_name.clone())
}

// ============================================================================
// DETECÇÃO DE CICLO (DFS COLORIDO)
// ============================================================================

/// Estado de cada nó: 0 = branco, 1 = cinza (na pilha), 2 = preto.
fn detect_cycle(edges: &HashMap<String, Vec<String>>) -> Result<(), DependencyError> {
    let mut color: HashMap<&str, u8> = edges.keys().map(|k| (k.as_str(), 0u8)).collect();
    let mut stack: Vec<&str> = Vec::new();

    for node in edges.keys() {
        if color[node.as_str()] == 0 {
            if let Some(cycle) = dfs(node.as_str(), edges, &mut color, &mut stack) {
                return Err(DependencyError::Cycle { nodes: cycle });
            }
        }
    }
    Ok(())
}

fn dfs<'a>(
    node: &'a str,
    edges: &'a HashMap<String, Vec<String>>,
    color: &mut HashMap<&'a str, u8>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    color.insert(node, 1);
    stack.push(node);

    if let Some(deps) = edges.get(node) {
        for dep in deps {
            match color.get(dep.as_str()).copied() {
                Some(1) => {
                    // Nó cinza na pilha: o ciclo é o trecho da pilha a
                    // partir dele.
                    let start = stack.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                Some(0) => {
                    if let Some(cycle) = dfs(dep.as_str(), edges, color, stack) {
                        return Some(cycle);
                    }
                }
                _ => {}
            }
        }
    }

    stack.pop();
    color.insert(node, 2);
    None
}

// ============================================================================
// CACHE DE RESULTADOS
// ============================================================================

/// Cache de resultados de suíte para reentradas de dependência.
///
/// Consulta conforme a política declarada na aresta:
/// `true` reusa sempre, `false` nunca, inteiro N reusa se a idade do
/// resultado for menor que N segundos.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: HashMap<String, CachedRun>,
}

#[derive(Debug)]
struct CachedRun {
    result: SuiteResult,
    stored_at: DateTime<Utc>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, result: SuiteResult) {
        self.entries.insert(
            result.node_id.clone(),
            CachedRun {
                result,
                stored_at: Utc::now(),
            },
        );
    }

    pub fn lookup(&self, node_id: &str, policy: CachePolicy) -> Option<&SuiteResult> {
        let entry = self.entries.get(node_id)?;
        match policy {
            CachePolicy::Reuse(true) => Some(&entry.result),
            CachePolicy::Reuse(false) => None,
            CachePolicy::MaxAgeSeconds(max_age) => {
                let age = Utc::now()
                    .signed_duration_since(entry.stored_at)
                    .num_seconds();
                (age >= 0 && (age as u64) < max_age).then_some(&entry.result)
            }
        }
    }
}

// ============================================================================
// TESTES
// ============================================================================
