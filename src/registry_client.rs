use crate::cnpj::Cnpj;
use crate::config::RegistrySettings;
use crate::errors::{AppError, ResultExt};
use crate::models::{
    CnaeAllowList, CnaeCode, CompanyRecord, LookupResult, INVALID_PAYLOAD_REASON,
    MISSING_FIELD_REASON,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde_json::Value;

/// Payload field holding the registration status description.
pub const SITUACAO_FIELD: &str = "descricao_situacao_cadastral";

/// Longest error body kept in a transport failure reason.
const MAX_ERROR_BODY: usize = 200;

/// Resolves one CNPJ against the registry.
///
/// Implementations never fail: every outcome, including network errors, is a
/// [`LookupResult`] value.
#[async_trait]
pub trait RegistryLookup: Send + Sync {
    async fn fetch(&self, cnpj: &Cnpj) -> LookupResult;
}

/// Client for the BrasilAPI CNPJ endpoint (`GET <base>/<cnpj>`).
#[derive(Clone)]
pub struct BrasilApiClient {
    client: reqwest::Client,
    base_url: String,
    allowlist: CnaeAllowList,
}

impl BrasilApiClient {
    /// Creates a new `BrasilApiClient`.
    ///
    /// # Arguments
    ///
    /// * `settings` - Base URL, timeout, identifying headers and CNAE allow-list.
    pub fn new(settings: &RegistrySettings) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(ref token) = settings.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                AppError::Config(format!("REGISTRY_TOKEN is not a valid header value: {}", e))
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .build()
            .context("Failed to create registry client")?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            allowlist: settings.cnae_allowlist.clone(),
        })
    }

    async fn request(&self, cnpj: &Cnpj) -> Result<Value, LookupResult> {
        let url = format!("{}/{}", self.base_url, cnpj);
        tracing::debug!("Registry request: {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                format!("timeout: {}", e)
            } else {
                e.to_string()
            };
            LookupResult::TransportError(reason)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = error_detail(&body);
            let reason = if detail.is_empty() {
                format!("HTTP {}", status)
            } else {
                format!("HTTP {}: {}", status, detail)
            };
            return Err(LookupResult::TransportError(reason));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| LookupResult::TransportError(e.to_string()))?;
        serde_json::from_slice::<Value>(&body)
            .map_err(|_| LookupResult::Malformed(INVALID_PAYLOAD_REASON.to_string()))
    }
}

#[async_trait]
impl RegistryLookup for BrasilApiClient {
    async fn fetch(&self, cnpj: &Cnpj) -> LookupResult {
        match self.request(cnpj).await {
            Ok(payload) => extract_fields(&payload, &self.allowlist),
            Err(failure) => failure,
        }
    }
}

/// Pulls the enrichment fields out of a registry payload.
///
/// The secondary classification is the first entry of `cnaes_secundarios`,
/// in the order the registry returned them, whose code is allow-listed.
/// Later matches are ignored even if they look more relevant.
pub fn extract_fields(payload: &Value, allowlist: &CnaeAllowList) -> LookupResult {
    let object = match payload.as_object() {
        Some(object) => object,
        None => return LookupResult::Malformed(INVALID_PAYLOAD_REASON.to_string()),
    };

    let situacao = match object
        .get(SITUACAO_FIELD)
        .and_then(|v| v.as_str())
    {
        Some(situacao) => situacao.to_string(),
        None => return LookupResult::Malformed(MISSING_FIELD_REASON.to_string()),
    };

    let cnae_principal = object
        .get("cnae_fiscal")
        .and_then(CnaeCode::from_json)
        .filter(|code| !code.is_zero())
        .map(|code| {
            let descricao = object
                .get("cnae_fiscal_descricao")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            format_cnae(&code, descricao)
        });

    let cnae_secundario = object
        .get("cnaes_secundarios")
        .and_then(|v| v.as_array())
        .and_then(|secundarios| {
            secundarios.iter().find_map(|item| {
                let code = item.get("codigo").and_then(CnaeCode::from_json)?;
                if !allowlist.contains(&code) {
                    return None;
                }
                let descricao = item.get("descricao").and_then(|v| v.as_str()).unwrap_or("");
                Some(format_cnae(&code, descricao))
            })
        });

    LookupResult::Success(CompanyRecord {
        situacao,
        cnae_principal,
        cnae_secundario,
    })
}

fn format_cnae(code: &CnaeCode, descricao: &str) -> String {
    format!("{} - {}", code, descricao)
}

/// Human-readable part of an error body: the JSON `message` when present,
/// otherwise the trimmed text, truncated.
fn error_detail(body: &str) -> String {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    message.chars().take(MAX_ERROR_BODY).collect()
}
