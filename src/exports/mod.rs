//! # Módulo de Exports - Registro Entre Suítes
//!
//! Registro de duas camadas: node_id → (nome → valor), com um índice
//! achatado `"node.name"` → node_id para lookup O(1).
//!
//! O registro é criado no início da execução e descartado no fim;
//! nunca é um singleton estático. Cada suíte escreve somente no próprio
//! namespace, ao completar; leitores são suítes dependentes, que só
//! começam depois; a ordenação topológica é a sincronização.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

// ============================================================================
// TIPOS
// ============================================================================

/// Namespace reservado de uma suíte.
#[derive(Debug, Clone, Serialize)]
pub struct NodeNamespace {
    pub node_id: String,
    pub suite_name: String,
    /// Exports declarados na suíte; `set` fora desta lista gera warning.
    pub declared: Vec<String>,
    /// Arquivo de origem, para mensagens de diagnóstico.
    pub source_path: Option<PathBuf>,
    /// Valores efetivamente publicados.
    pub values: HashMap<String, Value>,
}

/// Resultado de `validate()`: problemas são devolvidos, nunca lançados.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RegistryAudit {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl RegistryAudit {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

// ============================================================================
// REGISTRO
// ============================================================================

/// Registro de exports de uma execução.
#[derive(Debug, Default)]
pub struct ExportRegistry {
    nodes: HashMap<String, NodeNamespace>,
    /// Índice achatado: "node.name" → node_id dono.
    index: HashMap<String, String>,
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserva o namespace de um nó e registra os exports esperados.
    ///
    /// Re-registro do mesmo node_id substitui a reserva (acontece em
    /// re-execuções de dependência) preservando valores já publicados.
    pub fn register(
        &mut self,
        node_id: impl Into<String>,
        suite_name: impl Into<String>,
        declared: &[String],
        source_path: Option<PathBuf>,
    ) {
        let node_id = node_id.into();
        let previous = self.nodes.remove(&node_id);
        let values = previous.map(|n| n.values).unwrap_or_default();
        self.nodes.insert(
            node_id.clone(),
            NodeNamespace {
                node_id,
                suite_name: suite_name.into(),
                declared: declared.to_vec(),
                source_path,
                values,
            },
        );
    }

    /// Publica um valor no namespace do nó.
    ///
    /// Nome não declarado é aceito, mas logado; o autor da suíte
    /// provavelmente esqueceu de listar o export.
    pub fn set(&mut self, node_id: &str, name: &str, value: Value) {
        let Some(node) = self.nodes.get_mut(node_id) else {
            warn!(node_id, name, "set em namespace não registrado; ignorando");
            return;
        };
        if !node.declared.iter().any(|d| d == name) {
            warn!(
                node_id,
                name, "Export não declarado na suíte; publicando mesmo assim"
            );
        }
        node.values.insert(name.to_string(), value);
        self.index
            .insert(format!("{}.{}", node_id, name), node_id.to_string());
    }

    /// Resolve `"node.name"` pelo índice achatado.
    pub fn get(&self, qualified: &str) -> Option<&Value> {
        let owner = self.index.get(qualified)?;
        let (_, name) = qualified.split_once('.')?;
        self.nodes.get(owner)?.values.get(name)
    }

    /// True se `"node.name"` está publicado.
    pub fn has_name(&self, qualified: &str) -> bool {
        self.index.contains_key(qualified)
    }

    /// Nomes qualificados publicados, ordenados.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.index.keys().cloned().collect();
        names.sort();
        names
    }

    /// node_ids registrados, ordenados.
    pub fn list_nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.nodes.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Informações do namespace de um nó.
    pub fn node_info(&self, node_id: &str) -> Option<&NodeNamespace> {
        self.nodes.get(node_id)
    }

    /// Valores publicados de um nó (visão para montar imports).
    pub fn namespace_values(&self, node_id: &str) -> Option<&HashMap<String, Value>> {
        self.nodes.get(node_id).map(|n| &n.values)
    }

    /// Remove os valores de um nó mantendo a reserva; usado entre
    /// re-execuções da mesma suíte.
    pub fn clear_node_runtime(&mut self, node_id: &str) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            for name in node.values.keys() {
                self.index.remove(&format!("{}.{}", node_id, name));
            }
            node.values.clear();
        }
    }

    /// Checagem de integridade: toda entrada do índice tem valor por
    /// trás, e todo export declarado foi populado.
    pub fn validate(&self) -> RegistryAudit {
        let mut audit = RegistryAudit::default();

        for (qualified, owner) in &self.index {
            let backed = qualified
                .split_once('.')
                .and_then(|(_, name)| self.nodes.get(owner).map(|n| n.values.contains_key(name)))
                .unwrap_or(false);
            if !backed {
                audit.errors.push(format!(
                    "Índice '{}' aponta para valor inexistente em '{}'",
                    qualified, owner
                ));
            }
        }

        for node in self.nodes.values() {
            for declared in &node.declared {
                if !node.values.contains_key(declared) {
                    audit.warnings.push(format!(
                        "Suíte '{}' declarou export '{}' ainda não populado",
                        node.node_id, declared
                    ));
                }
            }
        }

        audit
    }

    /// Visão serializável do estado, para testes congelarem.
    pub fn snapshot(&self) -> Value {
        let mut nodes: Vec<&NodeNamespace> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        serde_json::json!({
            "nodes": nodes,
            "index": self.index.iter().collect::<std::collections::BTreeMap<_, _>>(),
        })
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with_auth() -> ExportRegistry {
        let mut r = ExportRegistry::new();
        r.register("auth", "Authentication", &["token".to_string()], None);
        r
    }

    #[test]
    fn set_and_get_qualified() {
        let mut r = registry_with_auth();
        r.set("auth", "token", json!("tk-1"));
        assert_eq!(r.get("auth.token"), Some(&json!("tk-1")));
        assert!(r.has_name("auth.token"));
        assert!(!r.has_name("auth.other"));
    }

    #[test]
    fn undeclared_set_is_accepted() {
        let mut r = registry_with_auth();
        r.set("auth", "session", json!("s-9"));
        assert_eq!(r.get("auth.session"), Some(&json!("s-9")));
    }

    #[test]
    fn clear_node_runtime_keeps_reservation() {
        let mut r = registry_with_auth();
        r.set("auth", "token", json!("tk-1"));
        r.clear_node_runtime("auth");

        assert!(!r.has_name("auth.token"));
        assert!(r.node_info("auth").is_some());
        // Declaração continua valendo: validate aponta export pendente.
        let audit = r.validate();
        assert!(audit.errors.is_empty());
        assert_eq!(audit.warnings.len(), 1);
    }

    #[test]
    fn validate_flags_unpopulated_declared_export() {
        let r = registry_with_auth();
        let audit = r.validate();
        assert!(!audit.is_clean());
        assert!(audit.warnings[0].contains("token"));
    }

    #[test]
    fn validate_clean_after_publication() {
        let mut r = registry_with_auth();
        r.set("auth", "token", json!("tk"));
        assert!(r.validate().is_clean());
    }

    #[test]
    fn listings_are_sorted() {
        let mut r = ExportRegistry::new();
        r.register("b", "B", &[], None);
        r.register("a", "A", &[], None);
        r.set("b", "y", json!(1));
        r.set("a", "x", json!(2));

        assert_eq!(r.list_nodes(), vec!["a", "b"]);
        assert_eq!(r.list_names(), vec!["a.x", "b.y"]);
    }

    #[test]
    fn reregister_preserves_values() {
        let mut r = registry_with_auth();
        r.set("auth", "token", json!("tk"));
        r.register("auth", "Authentication", &["token".to_string()], None);
        assert_eq!(r.get("auth.token"), Some(&json!("tk")));
    }
}
