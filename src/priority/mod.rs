//! # Módulo de Prioridade - Ordenação Dentro das Camadas
//!
//! Reordena as suítes **dentro de cada camada topológica**: maior
//! prioridade primeiro, depois duração estimada ascendente (rápidas
//! primeiro dentro da mesma faixa), depois nome. A ordem entre camadas
//! nunca muda; ela pertence ao resolvedor.
//!
//! Tags de prioridade são strings mapeadas para pesos inteiros pela
//! configuração (`priorities.levels`: a posição define o peso, do maior
//! para o menor). Sem configuração valem os padrões:
//! `critical, high, medium, low` → `4, 3, 2, 1`. Suíte sem tag é
//! tratada como `medium`.

use crate::protocol::Specification;
use std::collections::HashMap;

/// Tag atribuída a suítes sem prioridade explícita.
pub const DEFAULT_TAG: &str = "medium";

// ============================================================================
// PESOS
// ============================================================================

/// Mapeamento tag → peso inteiro.
#[derive(Debug, Clone)]
pub struct PriorityWeights {
    weights: HashMap<String, i64>,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self::from_levels(&[
            "critical".to_string(),
            "high".to_string(),
            "medium".to_string(),
            "low".to_string(),
        ])
    }
}

impl PriorityWeights {
    /// Constrói os pesos a partir da lista ordenada de níveis:
    /// a primeira tag recebe o maior peso.
    pub fn from_levels(levels: &[String]) -> Self {
        let total = levels.len() as i64;
        let weights = levels
            .iter()
            .enumerate()
            .map(|(i, tag)| (tag.to_lowercase(), total - i as i64))
            .collect();
        Self { weights }
    }

    /// Peso de uma tag; tag ausente ou desconhecida vale como `medium`.
    pub fn weight_for(&self, tag: Option<&str>) -> i64 {
        let tag = tag.unwrap_or(DEFAULT_TAG).to_lowercase();
        match self.weights.get(&tag) {
            Some(w) => *w,
            None => self.weights.get(DEFAULT_TAG).copied().unwrap_or(0),
        }
    }
}

// ============================================================================
// ORDENAÇÃO
// ============================================================================

/// Reordena cada camada in-place segundo (peso desc, duração asc, nome asc)
/// e devolve a lista total reordenada.
pub fn order_within_layers(
    ordered: Vec<Specification>,
    layers: &[Vec<String>],
    weights: &PriorityWeights,
) -> Vec<Specification> {
    let mut pool: HashMap<String, Specification> = ordered
        .into_iter()
        .map(|s| (s.node_id.clone(), s))
        .collect();

    let mut result = Vec::with_capacity(pool.len());
    for layer in layers {
        let mut members: Vec<Specification> = layer
            .iter()
            .filter_map(|id| pool.remove(id))
            .collect();
        // sort estável: empates preservam a ordem vinda do resolvedor
        members.sort_by(|a, b| {
            let ka = (
                -weights.weight_for(a.metadata.priority.as_deref()),
                a.metadata.estimated_duration_ms.unwrap_or(u64::MAX),
                a.suite_name.clone(),
            );
            let kb = (
                -weights.weight_for(b.metadata.priority.as_deref()),
                b.metadata.estimated_duration_ms.unwrap_or(u64::MAX),
                b.suite_name.clone(),
            );
            ka.cmp(&kb)
        });
        result.extend(members);
    }
    result
}

// ============================================================================
// TESTES
// ============================================================================
