//! # Executor HTTP - Requisições com Medição e Normalização
//!
//! Este é o único ponto do sistema que toca a rede. Uma operação:
//! `execute(step_name, request)` → registro completo da troca.
//!
//! ## O que o executor faz?
//!
//! 1. **Monta a URL final** (join com base_url quando o path é relativo)
//! 2. **Sanitiza headers** (valores com caracteres de controle são rejeitados)
//! 3. **Seleciona o cliente** (certificado de cliente por host, quando configurado)
//! 4. **Envia** com timeout por requisição e sinal de cancelamento
//! 5. **Captura a resposta** (status, headers, body decodificado, tamanho,
//!    linha cURL equivalente, texto cru)
//! 6. **Normaliza erros** de transporte em variantes tipadas com prefixo
//!    estável (timeout/connect/tls)
//!
//! ## Fluxo de execução:
//!
//! ```text
//! ┌────────────┐    ┌────────────┐    ┌────────────┐    ┌────────────┐
//! │ 1. URL +   │ →  │ 2. Headers │ →  │ 3. Send    │ →  │ 4. Decode  │
//! │    query   │    │    + body  │    │  (timeout, │    │  + record  │
//! └────────────┘    └────────────┘    │   cancel)  │    └────────────┘
//!                                     └────────────┘
//! ```
//!
//! Seguro para chamadas paralelas: o único estado mutável compartilhado
//! é o cache de credenciais por host, protegido por mutex (ver `certs`).

pub mod certs;

use crate::errors::{HttpError, StepError};
use crate::protocol::{HttpMethod, RequestRecord, ResponseRecord};
use certs::CertificateRegistry;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// ============================================================================
// TIPOS
// ============================================================================

/// Requisição pronta para envio: todos os templates já interpolados.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    /// URL absoluta ou path relativo (resolvido contra `base_url`).
    pub url: String,
    pub base_url: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, Value>,
    pub body: Option<Value>,
    pub timeout_ms: u64,
}

/// Registro completo de uma troca HTTP.
#[derive(Debug, Clone)]
pub struct HttpExchange {
    pub request: RequestRecord,
    pub response: ResponseRecord,
    pub duration_ms: u64,
}

// ============================================================================
// CLIENTE
// ============================================================================

/// Cliente HTTP do orquestrador.
///
/// Reusa um `reqwest::Client` (connection pool) para hosts sem
/// certificado; hosts com certificado ganham cliente dedicado em cache.
pub struct HttpClient {
    client: Client,
    certificates: CertificateRegistry,
}

impl HttpClient {
    pub fn new(certificates: CertificateRegistry) -> Self {
        Self {
            client: Client::new(),
            certificates,
        }
    }

    /// Executa uma requisição e devolve o registro da troca.
    ///
    /// Erros de transporte viram `HttpError` tipado; cancelamento do
    /// token vira `StepError::Cancelled`. Status 4xx/5xx NÃO é erro
    /// aqui; quem decide são as assertions.
    #[tracing::instrument(
        name = "http_request",
        skip_all,
        fields(step = %step_name, method = %request.method.as_str(), url = tracing::field::Empty)
    )]
    pub async fn execute(
        &self,
        step_name: &str,
        request: &PreparedRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpExchange, StepError> {
        let url = build_url(request)?;
        tracing::Span::current().record("url", url.as_str());

        let parsed = Url::parse(&url).map_err(|e| HttpError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        let host = parsed.host_str().unwrap_or_default().to_string();

        let headers = sanitize_headers(&request.headers)?;

        // Cliente dedicado quando há certificado para o host.
        let dedicated = self.certificates.client_for(&host).await?;
        let client: &Client = dedicated.as_deref().unwrap_or(&self.client);

        let method = Method::from_bytes(request.method.as_str().as_bytes())
            .expect("métodos do enum são sempre válidos");

        let mut builder = client
            .request(method, &url)
            .headers(headers)
            .timeout(std::time::Duration::from_millis(request.timeout_ms));

        if let Some(body) = &request.body {
            builder = match body {
                // String crua vai como texto; o autor controla o content-type.
                Value::String(s) => builder.body(s.clone()),
                structured => builder.json(structured),
            };
        }

        let request_record = RequestRecord {
            method: request.method.as_str().to_string(),
            url: url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        };
        let curl = curl_equivalent(&request_record);

        let start = Instant::now();
        let send = builder.send();
        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(StepError::Cancelled {
                    reason: format!("requisição '{}' cancelada", step_name),
                });
            }
            outcome = send => outcome,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                let err = HttpError::from_reqwest(&url, request.timeout_ms, &e);
                debug!(error = %err, "HTTP transport failure");
                return Err(err.into());
            }
        };

        let status = response.status().as_u16();
        let response_headers = headers_to_map(response.headers());
        let content_type = response_headers
            .get("content-type")
            .cloned()
            .unwrap_or_default();

        let bytes = response.bytes().await.map_err(|e| {
            StepError::Http(HttpError::from_reqwest(&url, request.timeout_ms, &e))
        })?;
        let size_bytes = bytes.len() as u64;
        let raw = String::from_utf8_lossy(&bytes).into_owned();

        // Decodificação best-effort: JSON quando o content-type indica,
        // string caso contrário (e fallback para string em JSON quebrado).
        let body = if content_type.contains("json") {
            serde_json::from_slice::<Value>(&bytes).unwrap_or(Value::String(raw.clone()))
        } else {
            serde_json::from_slice::<Value>(&bytes)
                .ok()
                .filter(|_| content_type.is_empty())
                .unwrap_or(Value::String(raw.clone()))
        };

        info!(
            status,
            duration_ms,
            size_bytes,
            "HTTP step finished"
        );

        Ok(HttpExchange {
            request: request_record,
            response: ResponseRecord {
                status_code: status,
                headers: response_headers,
                body,
                size_bytes,
                curl_command: Some(curl),
                raw_body: Some(raw),
            },
            duration_ms,
        })
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Monta a URL final: join com base quando relativa, query params
/// URL-encoded no fim.
fn build_url(request: &PreparedRequest) -> Result<String, HttpError> {
    let mut url = if request.url.starts_with("http://") || request.url.starts_with("https://") {
        request.url.clone()
    } else {
        let base = request.base_url.as_deref().ok_or_else(|| HttpError::InvalidUrl {
            url: request.url.clone(),
            reason: "path relativo sem base_url".to_string(),
        })?;
        let path = if request.url.starts_with('/') {
            request.url.clone()
        } else {
            format!("/{}", request.url)
        };
        format!("{}{}", base.trim_end_matches('/'), path)
    };

    if !request.params.is_empty() {
        let mut parts: Vec<String> = Vec::with_capacity(request.params.len());
        for (key, value) in &request.params {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            parts.push(format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(&text)
            ));
        }
        let separator = if url.contains('?') { '&' } else { '?' };
        url.push(separator);
        url.push_str(&parts.join("&"));
    }

    Ok(url)
}

/// Converte o mapa de headers rejeitando valores com caractere de controle.
fn sanitize_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap, HttpError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if value.chars().any(|c| c.is_control()) {
            return Err(HttpError::InvalidHeader { name: name.clone() });
        }
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| HttpError::InvalidHeader {
                name: name.clone(),
            })?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| HttpError::InvalidHeader {
                name: name.clone(),
            })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn headers_to_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| {
            v.to_str()
                .ok()
                .map(|value| (k.as_str().to_lowercase(), value.to_string()))
        })
        .collect()
}

/// Linha cURL equivalente, para reprodução manual da requisição.
fn curl_equivalent(request: &RequestRecord) -> String {
    let mut cmd = format!("curl -X {} '{}'", request.method, request.url);
    for (name, value) in &request.headers {
        cmd.push_str(&format!(" -H '{}: {}'", name, value));
    }
    if let Some(body) = &request.body {
        let payload = match body {
            Value::String(s) => s.clone(),
            structured => structured.to_string(),
        };
        cmd.push_str(&format!(" -d '{}'", payload));
    }
    cmd
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prepared(url: &str, base: Option<&str>) -> PreparedRequest {
        PreparedRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            base_url: base.map(String::from),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
            timeout_ms: 1000,
        }
    }

    #[test]
    fn absolute_url_is_kept() {
        let r = prepared("https://svc/x", Some("https://other"));
        assert_eq!(build_url(&r).unwrap(), "https://svc/x");
    }

    #[test]
    fn relative_url_joins_base() {
        let r = prepared("/users", Some("https://api.test/"));
        assert_eq!(build_url(&r).unwrap(), "https://api.test/users");

        let r = prepared("users", Some("https://api.test"));
        assert_eq!(build_url(&r).unwrap(), "https://api.test/users");
    }

    #[test]
    fn relative_url_without_base_is_invalid() {
        let r = prepared("/users", None);
        assert!(matches!(
            build_url(&r),
            Err(HttpError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn query_params_are_encoded() {
        let mut r = prepared("https://svc/q", None);
        r.params.insert("name".into(), json!("a b"));
        r.params.insert("n".into(), json!(3));
        let url = build_url(&r).unwrap();
        assert!(url.contains("name=a%20b"));
        assert!(url.contains("n=3"));
        assert!(url.contains('?'));
    }

    #[test]
    fn control_character_in_header_is_rejected() {
        let mut headers = BTreeMap::new();
        headers.insert("X-Bad".to_string(), "line\r\nbreak".to_string());
        assert!(matches!(
            sanitize_headers(&headers),
            Err(HttpError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn curl_line_includes_method_headers_body() {
        let record = RequestRecord {
            method: "POST".into(),
            url: "https://svc/login".into(),
            headers: [("content-type".to_string(), "application/json".to_string())]
                .into_iter()
                .collect(),
            body: Some(json!({"user": "ana"})),
        };
        let curl = curl_equivalent(&record);
        assert!(curl.starts_with("curl -X POST"));
        assert!(curl.contains("-H 'content-type: application/json'"));
        assert!(curl.contains(r#"-d '{"user":"ana"}'"#));
    }
}
