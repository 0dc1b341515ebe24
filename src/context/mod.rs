//! # Módulo de Contexto - Variáveis em Cinco Escopos
//!
//! O contexto de variáveis é a única entidade mutável de vida longa
//! durante a execução de uma suíte. Leituras resolvem contra a visão
//! mesclada dos cinco escopos, nesta precedência (maior primeiro):
//!
//! ```text
//! 1. Runtime      <- capturas e bindings de iteração
//! 2. Imported     <- exports de dependências ("node.name" achatado)
//! 3. Suite        <- variáveis literais da suíte
//! 4. Global       <- configuração do engine
//! 5. Environment  <- ambiente do processo (prefixo conhecido)
//! ```
//!
//! Escritas sempre têm escopo explícito; Runtime é o default.
//!
//! ## Interpolação
//!
//! Um template embute expressões `{{...}}` nas formas:
//! - `{{name}}`: nome simples
//! - `{{a.b.c}}`: caminho pontuado por valores estruturados
//! - `{{nodeId.name}}`: namespace explícito de exports
//! - `{{faker.<categoria>.<método>}}`: dados pseudo-aleatórios
//! - `{{$js:<expressão>}}`: expressão sandboxed (ver módulo expression)
//!
//! Expressão sem match resolve para string vazia e o evento é logado;
//! o template nunca fica sem substituição.
//!
//! ## Snapshot
//!
//! `snapshot()` devolve uma cópia integral dos escopos; `restore()`
//! reinstala tudo atomicamente. Iteração e cenários usam o par para
//! não vazar bindings locais.

mod faker;

use crate::errors::TemplateError;
use crate::expression::{self, EvalScope};
use crate::query;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

static TEMPLATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(.+?)\}\}").expect("valid template regex"));

// ============================================================================
// ESCOPOS
// ============================================================================

/// Um dos cinco escopos do contexto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Runtime,
    Imported,
    Suite,
    Global,
    Environment,
}

/// Cópia integral do estado, devolvida por `snapshot()`.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    runtime: HashMap<String, Value>,
    imported: HashMap<String, Value>,
    imported_namespaces: HashSet<String>,
    suite: HashMap<String, Value>,
    global: HashMap<String, Value>,
    environment: HashMap<String, Value>,
}

/// Entrada do cache de resolução de templates.
///
/// `deps` guarda os identificadores-raiz referenciados; qualquer escrita
/// em um deles invalida a entrada.
#[derive(Debug, Clone)]
struct CachedTemplate {
    value: Value,
    deps: HashSet<String>,
}

// ============================================================================
// CONTEXTO
// ============================================================================

/// Armazém hierárquico de variáveis de uma suíte.
///
/// Não é compartilhado entre suítes: cada runner é o único escritor
/// do seu contexto.
#[derive(Debug, Default)]
pub struct VariableContext {
    runtime: HashMap<String, Value>,
    imported: HashMap<String, Value>,
    imported_namespaces: HashSet<String>,
    suite: HashMap<String, Value>,
    global: HashMap<String, Value>,
    environment: HashMap<String, Value>,

    /// Resposta mais recente, visível para `{{$js:...}}`.
    last_response: Option<Value>,

    cache: HashMap<String, CachedTemplate>,
    cache_enabled: bool,
}

impl VariableContext {
    /// Cria um contexto vazio com cache habilitado.
    pub fn new() -> Self {
        Self {
            cache_enabled: true,
            ..Default::default()
        }
    }

    /// Liga/desliga o cache de resolução. O cache é consultivo:
    /// desabilitá-lo produz exatamente os mesmos resultados.
    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.cache_enabled = enabled;
        if !enabled {
            self.cache.clear();
        }
    }

    // ========================================================================
    // ESCRITA
    // ========================================================================

    /// Escreve no escopo indicado, invalidando entradas de cache
    /// que dependem do nome.
    pub fn set(&mut self, scope: Scope, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.invalidate(&name);
        let map = match scope {
            Scope::Runtime => &mut self.runtime,
            Scope::Imported => &mut self.imported,
            Scope::Suite => &mut self.suite,
            Scope::Global => &mut self.global,
            Scope::Environment => &mut self.environment,
        };
        map.insert(name, value);
    }

    /// Escrita no escopo default (Runtime).
    pub fn set_runtime(&mut self, name: impl Into<String>, value: Value) {
        self.set(Scope::Runtime, name, value);
    }

    /// Remove um nome do escopo Runtime.
    pub fn remove_runtime(&mut self, name: &str) {
        self.invalidate(name);
        self.runtime.remove(name);
    }

    /// Esvazia o escopo Runtime (início de suíte).
    pub fn clear_runtime(&mut self) {
        self.runtime.clear();
        self.cache.clear();
    }

    /// Substitui o escopo Suite.
    pub fn seed_suite(&mut self, variables: &HashMap<String, Value>) {
        self.suite = variables.clone();
        self.cache.clear();
    }

    /// Substitui o escopo Global.
    pub fn seed_global(&mut self, variables: &HashMap<String, Value>) {
        self.global = variables.clone();
        self.cache.clear();
    }

    /// Carrega o ambiente do processo: variáveis com o prefixo dado
    /// entram no escopo Environment com o sufixo em minúsculas.
    pub fn load_environment(&mut self, prefix: &str) {
        for (key, value) in std::env::vars() {
            if let Some(rest) = key.strip_prefix(prefix) {
                if !rest.is_empty() {
                    self.environment
                        .insert(rest.to_lowercase(), Value::String(value));
                }
            }
        }
        self.cache.clear();
    }

    /// Instala a visão de imports: exports de dependências como
    /// `"node.name"` e, para os próprios valores já publicados da
    /// suíte corrente, também o nome simples.
    pub fn install_imports(
        &mut self,
        namespaces: &HashMap<String, HashMap<String, Value>>,
        own_published: &HashMap<String, Value>,
    ) {
        self.imported.clear();
        self.imported_namespaces.clear();
        for (node_id, values) in namespaces {
            self.imported_namespaces.insert(node_id.clone());
            for (name, value) in values {
                self.imported
                    .insert(format!("{}.{}", node_id, name), value.clone());
            }
        }
        for (name, value) in own_published {
            self.imported.insert(name.clone(), value.clone());
        }
        self.cache.clear();
    }

    /// Registra a resposta mais recente para expressões `$js:`.
    pub fn set_last_response(&mut self, response_env: Value) {
        self.last_response = Some(response_env);
    }

    // ========================================================================
    // LEITURA
    // ========================================================================

    /// Resolve um nome simples pela precedência de escopos.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.runtime
            .get(name)
            .or_else(|| self.imported.get(name))
            .or_else(|| self.suite.get(name))
            .or_else(|| self.global.get(name))
            .or_else(|| self.environment.get(name))
    }

    /// Visão mesclada dos escopos como um objeto JSON, para a
    /// sublinguagem de expressões. Menor precedência entra primeiro
    /// para que escopos altos sobrescrevam.
    pub fn merged_view(&self) -> Value {
        let mut merged = Map::new();
        for map in [
            &self.environment,
            &self.global,
            &self.suite,
            &self.imported,
            &self.runtime,
        ] {
            for (k, v) in map.iter() {
                merged.insert(k.clone(), v.clone());
            }
        }
        Value::Object(merged)
    }

    /// Snapshot do escopo Runtime (para resultados de step).
    pub fn runtime_view(&self) -> &HashMap<String, Value> {
        &self.runtime
    }

    // ========================================================================
    // SNAPSHOT / RESTORE
    // ========================================================================

    /// Captura o estado completo dos cinco escopos.
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            runtime: self.runtime.clone(),
            imported: self.imported.clone(),
            imported_namespaces: self.imported_namespaces.clone(),
            suite: self.suite.clone(),
            global: self.global.clone(),
            environment: self.environment.clone(),
        }
    }

    /// Reinstala um snapshot, descartando qualquer mutação posterior.
    pub fn restore(&mut self, snapshot: ContextSnapshot) {
        self.runtime = snapshot.runtime;
        self.imported = snapshot.imported;
        self.imported_namespaces = snapshot.imported_namespaces;
        self.suite = snapshot.suite;
        self.global = snapshot.global;
        self.environment = snapshot.environment;
        self.cache.clear();
    }

    // ========================================================================
    // INTERPOLAÇÃO
    // ========================================================================

    /// Interpola um template string.
    ///
    /// Quando o template inteiro é uma única expressão (`"{{x}}"`),
    /// o resultado é a forma string do valor resolvido. Strings entram
    /// sem aspas; outros valores são serializados.
    pub fn interpolate_str(&mut self, template: &str) -> Result<String, TemplateError> {
        let mut result = String::new();
        let mut last_index = 0;

        for capture in TEMPLATE_RE.captures_iter(template) {
            let matched = capture.get(0).expect("regex match");
            result.push_str(&template[last_index..matched.start()]);
            let expr = capture.get(1).expect("regex group").as_str().trim();
            let resolved = self.resolve_expression(expr)?;
            result.push_str(&value_to_string(&resolved));
            last_index = matched.end();
        }

        result.push_str(&template[last_index..]);
        Ok(result)
    }

    /// Interpola recursivamente um valor estruturado.
    ///
    /// Strings que são exatamente uma expressão (`"{{users}}"`)
    /// resolvem para o valor estruturado, não para sua serialização;
    /// é assim que `iterate.over` recebe a sequência de verdade.
    pub fn interpolate_value(&mut self, value: &Value) -> Result<Value, TemplateError> {
        match value {
            Value::String(s) => {
                if let Some(expr) = whole_template(s) {
                    return self.resolve_expression(&expr);
                }
                Ok(Value::String(self.interpolate_str(s)?))
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.interpolate_value(item)?);
                }
                Ok(Value::Array(out))
            }
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.interpolate_value(v)?);
                }
                Ok(Value::Object(out))
            }
            _ => Ok(value.clone()),
        }
    }

    /// Resolve uma única expressão de template.
    ///
    /// Ordem de resolução:
    /// 1. `faker.<categoria>.<método>`
    /// 2. `$js:<expressão>` (sintaxe inválida → TemplateError)
    /// 3. nome/caminho contra a visão mesclada
    /// 4. namespace explícito `nodeId.name` (namespace conhecido sem o
    ///    export → UnknownExportError)
    /// 5. sem match → string vazia, com log
    fn resolve_expression(&mut self, expr: &str) -> Result<Value, TemplateError> {
        // Faker e $js: são voláteis; nunca entram no cache.
        if let Some(rest) = expr.strip_prefix("faker.") {
            let mut parts = rest.splitn(2, '.');
            let category = parts.next().unwrap_or_default();
            let method = parts.next().unwrap_or_default();
            return match faker::generate(category, method) {
                Some(v) => Ok(v),
                None => {
                    warn!(expression = %expr, "Gerador faker desconhecido; resolvendo para vazio");
                    Ok(Value::String(String::new()))
                }
            };
        }

        if let Some(js) = expr.strip_prefix("$js:") {
            let mut scope = EvalScope::new().with_variables(self.merged_view());
            if let Some(response) = &self.last_response {
                scope = scope.bind("response", response.clone());
                if let Some(body) = response.get("body") {
                    scope = scope.bind("body", body.clone());
                }
            }
            return expression::evaluate(js.trim(), &scope).map_err(|reason| {
                TemplateError::Syntax {
                    expr: expr.to_string(),
                    reason,
                }
            });
        }

        if self.cache_enabled {
            if let Some(entry) = self.cache.get(expr) {
                return Ok(entry.value.clone());
            }
        }

        let resolved = self.lookup(expr)?;
        let value = match resolved {
            Some(v) => v,
            None => {
                debug!(expression = %expr, "Expressão sem match; resolvendo para vazio");
                Value::String(String::new())
            }
        };

        if self.cache_enabled {
            self.cache.insert(
                expr.to_string(),
                CachedTemplate {
                    value: value.clone(),
                    deps: expression_deps(expr),
                },
            );
        }
        Ok(value)
    }

    /// Lookup de nome/caminho/namespace, sem cache.
    fn lookup(&self, expr: &str) -> Result<Option<Value>, TemplateError> {
        // Nome simples primeiro.
        if let Some(value) = self.get(expr) {
            return Ok(Some(value.clone()));
        }

        if let Some((root, rest)) = expr.split_once('.') {
            // Caminho pontuado: raiz resolvida por precedência,
            // resto navegado estruturalmente.
            if let Some(base) = self.get(root) {
                return Ok(query::walk_dotted(base, rest));
            }

            // Namespace explícito de exports.
            if self.imported_namespaces.contains(root) {
                if let Some(value) = self.imported.get(expr) {
                    return Ok(Some(value.clone()));
                }
                // "auth.user.id": export "user" com caminho "id".
                if let Some((name, path)) = rest.split_once('.') {
                    if let Some(base) = self.imported.get(&format!("{}.{}", root, name)) {
                        return Ok(query::walk_dotted(base, path));
                    }
                }
                return Err(TemplateError::UnknownExport {
                    namespace: root.to_string(),
                    name: rest.to_string(),
                });
            }
        }

        Ok(None)
    }

    /// Invalida entradas de cache cujo conjunto de dependências
    /// intersecta o nome escrito.
    fn invalidate(&mut self, written: &str) {
        if self.cache.is_empty() {
            return;
        }
        self.cache.retain(|_, entry| !entry.deps.contains(written));
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Se a string é exatamente um `{{...}}`, devolve a expressão interna.
fn whole_template(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if !trimmed.starts_with("{{") || !trimmed.ends_with("}}") {
        return None;
    }
    let inner = &trimmed[2..trimmed.len() - 2];
    // Um "{{a}} e {{b}}" não é template único.
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim().to_string())
}

/// Forma string de um valor: strings sem aspas, resto serializado.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        primitive => primitive.to_string(),
    }
}

/// Identificadores-raiz de uma expressão de lookup, para o cache.
fn expression_deps(expr: &str) -> HashSet<String> {
    let mut deps = HashSet::new();
    deps.insert(expr.to_string());
    if let Some((root, _)) = expr.split_once('.') {
        deps.insert(root.to_string());
    }
    deps
}

// ============================================================================
// TESTES
// ============================================================================
