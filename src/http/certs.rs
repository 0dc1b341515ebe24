//! # Certificados de Cliente por Domínio
//!
//! Um registro mapeia padrões de domínio (wildcard `*` em fronteira de
//! label) para bundles de credencial. Dois formatos:
//!
//! - **PEM**: certificado + chave em arquivos separados, CA opcional
//! - **PKCS#12**: bundle único + passphrase
//!
//! Um registro de estratégias escolhe o loader examinando a credencial;
//! o loader lê os arquivos sob demanda e o cliente resultante fica em
//! cache por host. Por requisição, vence o primeiro padrão que casar;
//! a ordem de registro é a ordem de prioridade, controlada pelo chamador.

use crate::errors::HttpError;
use reqwest::{Certificate, Client, Identity};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

// ============================================================================
// CREDENCIAIS
// ============================================================================

/// Credencial de cliente em um dos formatos suportados.
#[derive(Debug, Clone)]
pub enum CertificateCredential {
    /// Certificado e chave PEM em arquivos separados.
    Pem {
        cert_path: PathBuf,
        key_path: PathBuf,
        ca_path: Option<PathBuf>,
        /// Chaves PEM cifradas não são suportadas pelo backend rustls;
        /// presença de passphrase aqui é erro de carga.
        passphrase: Option<String>,
    },
    /// Bundle PKCS#12 único.
    Pkcs12 {
        bundle_path: PathBuf,
        passphrase: String,
    },
}

/// Backend TLS exigido pela identidade carregada.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsBackend {
    Rustls,
    NativeTls,
}

/// Identidade carregada e pronta para construir um cliente.
pub struct LoadedBundle {
    pub identity: Identity,
    pub ca: Option<Certificate>,
    pub backend: TlsBackend,
}

// ============================================================================
// LOADERS (ESTRATÉGIAS)
// ============================================================================

/// Estratégia de carga de credencial. O registro seleciona o loader
/// examinando a configuração; a leitura de arquivos é sob demanda.
pub trait CredentialLoader: Send + Sync {
    fn can_load(&self, credential: &CertificateCredential) -> bool;
    fn load(&self, host: &str, credential: &CertificateCredential) -> Result<LoadedBundle, HttpError>;
}

/// Loader PEM: concatena cert + chave e usa o backend rustls.
pub struct PemLoader;

impl CredentialLoader for PemLoader {
    fn can_load(&self, credential: &CertificateCredential) -> bool {
        matches!(credential, CertificateCredential::Pem { .. })
    }

    fn load(&self, host: &str, credential: &CertificateCredential) -> Result<LoadedBundle, HttpError> {
        let CertificateCredential::Pem {
            cert_path,
            key_path,
            ca_path,
            passphrase,
        } = credential
        else {
            unreachable!("can_load garante a variante");
        };

        if passphrase.is_some() {
            return Err(HttpError::Certificate {
                host: host.to_string(),
                reason: "chave PEM cifrada não é suportada; use PKCS#12".to_string(),
            });
        }

        let read = |path: &PathBuf| {
            std::fs::read(path).map_err(|e| HttpError::Certificate {
                host: host.to_string(),
                reason: format!("{}: {}", path.display(), e),
            })
        };

        let mut pem = read(cert_path)?;
        pem.extend_from_slice(&read(key_path)?);
        let identity = Identity::from_pem(&pem).map_err(|e| HttpError::Certificate {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

        let ca = match ca_path {
            Some(path) => Some(Certificate::from_pem(&read(path)?).map_err(|e| {
                HttpError::Certificate {
                    host: host.to_string(),
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };

        Ok(LoadedBundle {
            identity,
            ca,
            backend: TlsBackend::Rustls,
        })
    }
}

/// Loader PKCS#12: bundle único, backend native-tls.
pub struct Pkcs12Loader;

impl CredentialLoader for Pkcs12Loader {
    fn can_load(&self, credential: &CertificateCredential) -> bool {
        matches!(credential, CertificateCredential::Pkcs12 { .. })
    }

    fn load(&self, host: &str, credential: &CertificateCredential) -> Result<LoadedBundle, HttpError> {
        let CertificateCredential::Pkcs12 {
            bundle_path,
            passphrase,
        } = credential
        else {
            unreachable!("can_load garante a variante");
        };

        let der = std::fs::read(bundle_path).map_err(|e| HttpError::Certificate {
            host: host.to_string(),
            reason: format!("{}: {}", bundle_path.display(), e),
        })?;
        let identity =
            Identity::from_pkcs12_der(&der, passphrase).map_err(|e| HttpError::Certificate {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        Ok(LoadedBundle {
            identity,
            ca: None,
            backend: TlsBackend::NativeTls,
        })
    }
}

// ============================================================================
// MATCHING DE DOMÍNIO
// ============================================================================

/// Casa um padrão de domínio contra um host.
///
/// `*` casa exatamente um label: `*.example.com` casa `api.example.com`
/// mas não `example.com` nem `a.b.example.com`.
pub fn domain_matches(pattern: &str, host: &str) -> bool {
    let pattern_labels: Vec<&str> = pattern.split('.').collect();
    let host_labels: Vec<&str> = host.split('.').collect();
    if pattern_labels.len() != host_labels.len() {
        return false;
    }
    pattern_labels
        .iter()
        .zip(host_labels.iter())
        .all(|(p, h)| *p == "*" || p.eq_ignore_ascii_case(h))
}

// ============================================================================
// REGISTRO
// ============================================================================

/// Entrada do registro: padrão de domínio → credencial.
pub struct CertificateEntry {
    pub pattern: String,
    pub credential: CertificateCredential,
}

/// Registro de certificados de cliente.
///
/// Sem estado mutável compartilhado além do cache por host, protegido
/// por mutex na primeira carga.
pub struct CertificateRegistry {
    entries: Vec<CertificateEntry>,
    loaders: Vec<Box<dyn CredentialLoader>>,
    cache: Mutex<HashMap<String, Arc<Client>>>,
}

impl Default for CertificateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CertificateRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            loaders: vec![Box::new(PemLoader), Box::new(Pkcs12Loader)],
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Registra um padrão. A ordem das chamadas define a prioridade.
    pub fn register(&mut self, pattern: impl Into<String>, credential: CertificateCredential) {
        self.entries.push(CertificateEntry {
            pattern: pattern.into(),
            credential,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Primeiro padrão que casa com o host, em ordem de registro.
    fn entry_for(&self, host: &str) -> Option<&CertificateEntry> {
        self.entries
            .iter()
            .find(|e| domain_matches(&e.pattern, host))
    }

    /// Devolve o cliente com identidade para o host, ou `None` quando
    /// nenhum padrão casa. Carga e construção acontecem uma vez por
    /// host; chamadas concorrentes esperam no mutex do cache.
    pub async fn client_for(&self, host: &str) -> Result<Option<Arc<Client>>, HttpError> {
        let Some(entry) = self.entry_for(host) else {
            return Ok(None);
        };

        let mut cache = self.cache.lock().await;
        if let Some(client) = cache.get(host) {
            debug!(host, "Certificado de cliente reusado do cache");
            return Ok(Some(Arc::clone(client)));
        }

        let loader = self
            .loaders
            .iter()
            .find(|l| l.can_load(&entry.credential))
            .ok_or_else(|| HttpError::Certificate {
                host: host.to_string(),
                reason: "nenhum loader para o formato de credencial".to_string(),
            })?;

        let bundle = loader.load(host, &entry.credential)?;

        let mut builder = Client::builder().identity(bundle.identity);
        builder = match bundle.backend {
            TlsBackend::Rustls => builder.use_rustls_tls(),
            TlsBackend::NativeTls => builder.use_native_tls(),
        };
        if let Some(ca) = bundle.ca {
            builder = builder.add_root_certificate(ca);
        }
        let client = builder.build().map_err(|e| HttpError::Certificate {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

        info!(host, pattern = %entry.pattern, "Certificado de cliente carregado");
        let client = Arc::new(client);
        cache.insert(host.to_string(), Arc::clone(&client));
        Ok(Some(client))
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_one_label() {
        assert!(domain_matches("*.example.com", "api.example.com"));
        assert!(!domain_matches("*.example.com", "example.com"));
        assert!(!domain_matches("*.example.com", "a.b.example.com"));
        assert!(domain_matches("api.*.com", "api.staging.com"));
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        assert!(domain_matches("API.Example.com", "api.example.com"));
        assert!(!domain_matches("api.example.com", "api.example.org"));
    }

    #[test]
    fn first_registered_pattern_wins() {
        let mut registry = CertificateRegistry::new();
        registry.register(
            "*.svc.local",
            CertificateCredential::Pkcs12 {
                bundle_path: PathBuf::from("/first.p12"),
                passphrase: "x".into(),
            },
        );
        registry.register(
            "api.svc.local",
            CertificateCredential::Pkcs12 {
                bundle_path: PathBuf::from("/second.p12"),
                passphrase: "x".into(),
            },
        );

        let entry = registry.entry_for("api.svc.local").unwrap();
        assert_eq!(entry.pattern, "*.svc.local");
    }

    #[test]
    fn no_pattern_no_client() {
        let registry = CertificateRegistry::new();
        assert!(registry.entry_for("plain.example.com").is_none());
    }

    #[tokio::test]
    async fn missing_pem_file_is_certificate_error() {
        let mut registry = CertificateRegistry::new();
        registry.register(
            "secure.test",
            CertificateCredential::Pem {
                cert_path: PathBuf::from("/nonexistent/cert.pem"),
                key_path: PathBuf::from("/nonexistent/key.pem"),
                ca_path: None,
                passphrase: None,
            },
        );

        let err = registry.client_for("secure.test").await.unwrap_err();
        assert!(matches!(err, HttpError::Certificate { .. }));
    }

    #[tokio::test]
    async fn encrypted_pem_is_rejected() {
        let mut registry = CertificateRegistry::new();
        registry.register(
            "secure.test",
            CertificateCredential::Pem {
                cert_path: PathBuf::from("/cert.pem"),
                key_path: PathBuf::from("/key.pem"),
                ca_path: None,
                passphrase: Some("secret".into()),
            },
        );

        let err = registry.client_for("secure.test").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("PKCS#12"));
    }
}
