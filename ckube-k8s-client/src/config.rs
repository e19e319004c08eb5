//! Loading and resolving a multi-context kubeconfig file.
//!
//! This is a deliberately small subset of `kube-client`'s config machinery:
//! no exec-plugin auth, no auth-provider plugins, no in-cluster service
//! account inference, no proxy URLs. ckube runs as a standalone proxy in
//! front of one or more clusters named explicitly in its own config file
//! (`default_cluster`/`clusters` in the ckube config, see `ckube::config`),
//! each pointing at a context name in a shared kubeconfig. A context not
//! backed by bearer/cert/basic auth is rejected rather than silently
//! falling back to anonymous access.
use std::{collections::HashMap, fs, path::Path};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Raw kubeconfig document, analogous to `~/.kube/config`.
#[allow(missing_docs)]
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Kubeconfig {
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    #[serde(rename = "users", default)]
    pub auth_infos: Vec<NamedAuthInfo>,
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    #[serde(rename = "current-context", default)]
    pub current_context: Option<String>,
}

/// A cluster entry paired with the name it's referenced by in `contexts`.
#[allow(missing_docs)]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: Cluster,
}

/// A kubeconfig `clusters[].cluster` entry: where the apiserver lives and
/// how to validate its certificate.
#[allow(missing_docs)]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cluster {
    pub server: String,
    #[serde(rename = "insecure-skip-tls-verify", default)]
    pub insecure_skip_tls_verify: bool,
    #[serde(rename = "certificate-authority", default)]
    pub certificate_authority: Option<String>,
    #[serde(rename = "certificate-authority-data", default)]
    pub certificate_authority_data: Option<String>,
}

/// A user entry paired with the name it's referenced by in `contexts`.
#[allow(missing_docs)]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamedAuthInfo {
    pub name: String,
    #[serde(rename = "user")]
    pub auth_info: AuthInfo,
}

/// A kubeconfig `users[].user` entry. Only bearer-token, basic, and
/// client-cert auth are supported; exec/auth-provider plugins are a
/// out of scope.
#[allow(missing_docs)]
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthInfo {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(rename = "client-certificate", default)]
    pub client_certificate: Option<String>,
    #[serde(rename = "client-certificate-data", default)]
    pub client_certificate_data: Option<String>,
    #[serde(rename = "client-key", default)]
    pub client_key: Option<String>,
    #[serde(rename = "client-key-data", default)]
    pub client_key_data: Option<String>,
}

/// A context entry paired with the name ckube's own `clusters.<name>.context`
/// refers to it by.
#[allow(missing_docs)]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: Context,
}

/// A kubeconfig `contexts[].context` entry binding a cluster to a user.
#[allow(missing_docs)]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Context {
    pub cluster: String,
    pub user: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// How a resolved context authenticates itself to the API server.
#[allow(missing_docs)]
#[derive(Clone, Debug)]
pub enum Identity {
    Bearer(SecretString),
    ClientCert { cert_pem: Vec<u8>, key_pem: Vec<u8> },
    Basic { username: String, password: SecretString },
}

/// Everything [`crate::Client`] needs to talk to one cluster: its URL, its
/// root CA bundle (if not using the platform trust store), and how to
/// authenticate.
#[allow(missing_docs)]
#[derive(Clone, Debug)]
pub struct ResolvedContext {
    pub cluster_url: http::Uri,
    pub root_cert_pem: Option<Vec<u8>>,
    pub accept_invalid_certs: bool,
    pub identity: Identity,
    pub default_namespace: String,
}

impl Kubeconfig {
    /// Read and parse a kubeconfig YAML document from `path`.
    pub fn read_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_owned(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(ConfigError::ParseYaml)
    }

    fn cluster(&self, name: &str) -> Result<&Cluster, ConfigError> {
        self.clusters
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.cluster)
            .ok_or_else(|| ConfigError::ClusterNotFound(name.to_owned()))
    }

    fn auth_info(&self, name: &str) -> Result<&AuthInfo, ConfigError> {
        self.auth_infos
            .iter()
            .find(|u| u.name == name)
            .map(|u| &u.auth_info)
            .ok_or_else(|| ConfigError::UserNotFound(name.to_owned()))
    }

    fn context(&self, name: &str) -> Result<&Context, ConfigError> {
        self.contexts
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.context)
            .ok_or_else(|| ConfigError::ContextNotFound(name.to_owned()))
    }

    /// Resolve a named context into connection details, reading any
    /// referenced certificate/key files from disk and base64-decoding any
    /// inline `-data` fields.
    pub fn resolve_context(&self, context_name: &str) -> Result<ResolvedContext, ConfigError> {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let context = self.context(context_name)?;
        let cluster = self.cluster(&context.cluster)?;
        let auth = self.auth_info(&context.user)?;

        let cluster_url = cluster
            .server
            .parse::<http::Uri>()
            .map_err(|_| ConfigError::ClusterNotFound(context.cluster.clone()))?;

        let root_cert_pem = if let Some(data) = &cluster.certificate_authority_data {
            Some(STANDARD.decode(data).map_err(|source| ConfigError::Base64Decode {
                field: "certificate-authority-data",
                source,
            })?)
        } else if let Some(path) = &cluster.certificate_authority {
            Some(fs::read(path).map_err(|source| ConfigError::ReadFile {
                path: path.into(),
                source,
            })?)
        } else {
            None
        };

        let identity = if let Some(token) = &auth.token {
            Identity::Bearer(SecretString::from(token.clone()))
        } else if auth.client_certificate_data.is_some() || auth.client_certificate.is_some() {
            let cert_pem = if let Some(data) = &auth.client_certificate_data {
                STANDARD.decode(data).map_err(|source| ConfigError::Base64Decode {
                    field: "client-certificate-data",
                    source,
                })?
            } else {
                fs::read(auth.client_certificate.as_ref().unwrap()).map_err(|source| {
                    ConfigError::ReadFile {
                        path: auth.client_certificate.as_ref().unwrap().into(),
                        source,
                    }
                })?
            };
            let key_pem = if let Some(data) = &auth.client_key_data {
                STANDARD.decode(data).map_err(|source| ConfigError::Base64Decode {
                    field: "client-key-data",
                    source,
                })?
            } else {
                fs::read(auth.client_key.as_ref().unwrap()).map_err(|source| ConfigError::ReadFile {
                    path: auth.client_key.as_ref().unwrap().into(),
                    source,
                })?
            };
            Identity::ClientCert { cert_pem, key_pem }
        } else if let (Some(username), Some(password)) = (&auth.username, &auth.password) {
            Identity::Basic {
                username: username.clone(),
                password: SecretString::from(password.clone()),
            }
        } else {
            return Err(ConfigError::NoCredentials(context_name.to_owned()));
        };

        Ok(ResolvedContext {
            cluster_url,
            root_cert_pem,
            accept_invalid_certs: cluster.insecure_skip_tls_verify,
            identity,
            default_namespace: context.namespace.clone().unwrap_or_else(|| "default".into()),
        })
    }

    /// Resolve every context named in `wanted` (ckube cluster name ->
    /// kubeconfig context name), short-circuiting on the first failure.
    pub fn resolve_all(
        &self,
        wanted: &HashMap<String, String>,
    ) -> Result<HashMap<String, ResolvedContext>, ConfigError> {
        wanted
            .iter()
            .map(|(cluster_name, context_name)| {
                self.resolve_context(context_name)
                    .map(|resolved| (cluster_name.clone(), resolved))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
clusters:
  - name: prod
    cluster:
      server: https://prod.example.com:6443
      certificate-authority-data: bm90LWEtcmVhbC1jZXJ0
contexts:
  - name: prod-admin
    context:
      cluster: prod
      user: admin
      namespace: kube-system
users:
  - name: admin
    user:
      token: s3cr3t
current-context: prod-admin
"#;

    #[test]
    fn resolves_bearer_token_context() {
        let kubeconfig: Kubeconfig = serde_yaml::from_str(SAMPLE).unwrap();
        let resolved = kubeconfig.resolve_context("prod-admin").unwrap();
        assert_eq!(resolved.cluster_url.host(), Some("prod.example.com"));
        assert_eq!(resolved.default_namespace, "kube-system");
        assert!(matches!(resolved.identity, Identity::Bearer(_)));
        assert!(resolved.root_cert_pem.is_some());
    }

    #[test]
    fn missing_context_is_reported() {
        let kubeconfig: Kubeconfig = serde_yaml::from_str(SAMPLE).unwrap();
        let err = kubeconfig.resolve_context("does-not-exist").unwrap_err();
        assert!(matches!(err, ConfigError::ContextNotFound(_)));
    }

    #[test]
    fn resolve_all_maps_cluster_names_to_contexts() {
        let kubeconfig: Kubeconfig = serde_yaml::from_str(SAMPLE).unwrap();
        let wanted = HashMap::from([("c1".to_string(), "prod-admin".to_string())]);
        let resolved = kubeconfig.resolve_all(&wanted).unwrap();
        assert!(resolved.contains_key("c1"));
    }
}
