use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============ Lookup Results ============

/// Reason recorded for identifiers that fail normalization or check digits.
pub const INVALID_CNPJ_REASON: &str = "CNPJ inválido";
/// Reason recorded when the registry body is not a JSON object.
pub const INVALID_PAYLOAD_REASON: &str = "payload inválido";
/// Reason recorded when the registry body lacks the status field.
pub const MISSING_FIELD_REASON: &str = "campo não encontrado";

/// Fields extracted from a successful registry lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRecord {
    /// Registration status description (e.g., "ATIVA", "BAIXADA").
    pub situacao: String,
    /// Primary classification, formatted as `"NN.NN-N-NN - descrição"`.
    pub cnae_principal: Option<String>,
    /// First allow-listed secondary classification, same format.
    pub cnae_secundario: Option<String>,
}

/// Outcome of resolving one CNPJ. Created once, never updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// The registry returned the expected payload.
    Success(CompanyRecord),
    /// The identifier failed normalization or check digits.
    Invalid(String),
    /// The registry answered 2xx but not with the expected shape.
    Malformed(String),
    /// Network failure, timeout or non-2xx status.
    TransportError(String),
}

impl LookupResult {
    pub fn is_success(&self) -> bool {
        matches!(self, LookupResult::Success(_))
    }

    /// The failure reason, if any.
    pub fn error(&self) -> Option<&str> {
        match self {
            LookupResult::Success(_) => None,
            LookupResult::Invalid(reason)
            | LookupResult::Malformed(reason)
            | LookupResult::TransportError(reason) => Some(reason),
        }
    }

    /// Error kind for cache persistence, `None` on success.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            LookupResult::Success(_) => None,
            LookupResult::Invalid(_) => Some(ErrorKind::Invalid),
            LookupResult::Malformed(_) => Some(ErrorKind::Malformed),
            LookupResult::TransportError(_) => Some(ErrorKind::Transport),
        }
    }
}

/// Failure categories as stored in the cache file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Invalid,
    Malformed,
    Transport,
}

// ============ Cache File Models ============

/// One entry of the JSON cache file.
///
/// Entries written by earlier tooling only carry `situacao` and `erro`; the
/// missing fields default and the error kind is inferred from the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub situacao: Option<String>,
    #[serde(default)]
    pub cnae_principal: Option<String>,
    #[serde(default)]
    pub cnae_secundario: Option<String>,
    pub erro: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tipo_erro: Option<ErrorKind>,
    /// When the lookup happened (UTC).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consultado_em: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Builds the persisted form of a fresh lookup result.
    pub fn from_result(result: &LookupResult, consultado_em: DateTime<Utc>) -> Self {
        let mut entry = Self {
            situacao: None,
            cnae_principal: None,
            cnae_secundario: None,
            erro: result.error().map(str::to_string),
            tipo_erro: result.error_kind(),
            consultado_em: Some(consultado_em),
        };
        if let LookupResult::Success(record) = result {
            entry.situacao = Some(record.situacao.clone());
            entry.cnae_principal = record.cnae_principal.clone();
            entry.cnae_secundario = record.cnae_secundario.clone();
        }
        entry
    }

    /// Reconstructs the lookup result this entry was written for.
    ///
    /// `None` when the entry has neither a status nor an error; such an entry
    /// carries no result and the identifier has to be fetched again.
    pub fn to_result(&self) -> Option<LookupResult> {
        if let Some(erro) = self.erro.as_deref().filter(|e| !e.is_empty()) {
            let kind = self.tipo_erro.unwrap_or_else(|| infer_error_kind(erro));
            let reason = erro.to_string();
            return Some(match kind {
                ErrorKind::Invalid => LookupResult::Invalid(reason),
                ErrorKind::Malformed => LookupResult::Malformed(reason),
                ErrorKind::Transport => LookupResult::TransportError(reason),
            });
        }

        self.situacao.as_ref().map(|situacao| {
            LookupResult::Success(CompanyRecord {
                situacao: situacao.clone(),
                cnae_principal: self.cnae_principal.clone(),
                cnae_secundario: self.cnae_secundario.clone(),
            })
        })
    }
}

fn infer_error_kind(erro: &str) -> ErrorKind {
    match erro {
        INVALID_CNPJ_REASON => ErrorKind::Invalid,
        INVALID_PAYLOAD_REASON | MISSING_FIELD_REASON => ErrorKind::Malformed,
        _ => ErrorKind::Transport,
    }
}

// ============ Classification Codes (CNAE) ============

/// Secondary CNAE codes of interest (food and beverage wholesale/retail).
pub const DEFAULT_CNAE_ALLOWLIST: [&str; 16] = [
    "46.31-1-00",
    "46.32-0-03",
    "47.24-5-00",
    "46.33-8-01",
    "46.34-6-03",
    "47.22-9-01",
    "46.33-8-02",
    "46.35-4-01",
    "46.35-4-02",
    "10.91-1-01",
    "46.92-3-00",
    "47.21-1-04",
    "47.23-7-00",
    "56.11-2-04",
    "10.66-0-00",
    "46.17-6-00",
];

/// A 7-digit CNAE classification code.
///
/// BrasilAPI returns codes as integers (`4631100`) while people write them
/// masked (`46.31-1-00`); both parse to the same value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CnaeCode(String);

impl CnaeCode {
    /// Parses a masked or bare code. `None` if there are no digits or more than 7.
    pub fn parse(raw: &str) -> Option<Self> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() || digits.len() > 7 {
            return None;
        }
        Some(Self(format!("{:0>7}", digits)))
    }

    /// Parses a JSON number or string code.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => Self::parse(&n.to_string()),
            serde_json::Value::String(s) => Self::parse(s),
            _ => None,
        }
    }

    /// Code 0 is what the registry sends for "no secondary activity".
    pub fn is_zero(&self) -> bool {
        self.0.bytes().all(|b| b == b'0')
    }
}

impl fmt::Display for CnaeCode {
    /// Masked form, e.g. `46.31-1-00`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.0;
        write!(f, "{}.{}-{}-{}", &d[0..2], &d[2..4], &d[4..5], &d[5..7])
    }
}

/// Set of CNAE codes that qualify a secondary classification for output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CnaeAllowList(BTreeSet<CnaeCode>);

impl CnaeAllowList {
    /// Builds an allow-list, silently dropping entries that are not codes.
    pub fn new<'a>(codes: impl IntoIterator<Item = &'a str>) -> Self {
        Self(codes.into_iter().filter_map(CnaeCode::parse).collect())
    }

    pub fn contains(&self, code: &CnaeCode) -> bool {
        self.0.contains(code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for CnaeAllowList {
    fn default() -> Self {
        Self::new(DEFAULT_CNAE_ALLOWLIST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 5, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_cnae_code_parsing() {
        let masked = CnaeCode::parse("46.31-1-00").unwrap();
        let bare = CnaeCode::from_json(&serde_json::json!(4631100)).unwrap();
        assert_eq!(masked, bare);
        assert_eq!(masked.to_string(), "46.31-1-00");

        // Leading zero lost in numeric form
        let padded = CnaeCode::from_json(&serde_json::json!(1091101)).unwrap();
        assert_eq!(padded.to_string(), "10.91-1-01");
        let short = CnaeCode::parse("111301").unwrap();
        assert_eq!(short.to_string(), "01.11-3-01");

        assert!(CnaeCode::parse("").is_none());
        assert!(CnaeCode::parse("123456789").is_none());
        assert!(CnaeCode::from_json(&serde_json::json!(null)).is_none());
        assert!(CnaeCode::parse("0").unwrap().is_zero());
    }

    #[test]
    fn test_default_allowlist_has_sixteen_codes() {
        let allow = CnaeAllowList::default();
        assert_eq!(allow.len(), 16);
        assert!(allow.contains(&CnaeCode::parse("4617600").unwrap()));
        assert!(!allow.contains(&CnaeCode::parse("4711302").unwrap()));
    }

    #[test]
    fn test_success_entry_round_trip() {
        let result = LookupResult::Success(CompanyRecord {
            situacao: "ATIVA".to_string(),
            cnae_principal: Some("47.11-3-02 - Comércio varejista".to_string()),
            cnae_secundario: None,
        });
        let entry = CacheEntry::from_result(&result, ts());

        assert_eq!(entry.situacao.as_deref(), Some("ATIVA"));
        assert_eq!(entry.erro, None);
        assert_eq!(entry.tipo_erro, None);
        assert_eq!(entry.to_result(), Some(result));
    }

    #[test]
    fn test_error_entry_keeps_kind() {
        let result = LookupResult::TransportError("HTTP 404 Not Found".to_string());
        let entry = CacheEntry::from_result(&result, ts());

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["tipo_erro"], "transport");
        assert_eq!(json["situacao"], serde_json::Value::Null);
        assert_eq!(entry.to_result(), Some(result));
    }

    #[test]
    fn test_legacy_entries_infer_kind() {
        let invalid: CacheEntry =
            serde_json::from_str(r#"{"situacao": null, "erro": "CNPJ inválido"}"#).unwrap();
        assert_eq!(
            invalid.to_result(),
            Some(LookupResult::Invalid(INVALID_CNPJ_REASON.to_string()))
        );

        let malformed: CacheEntry =
            serde_json::from_str(r#"{"situacao": null, "erro": "campo não encontrado"}"#).unwrap();
        assert!(matches!(malformed.to_result(), Some(LookupResult::Malformed(_))));

        let transport: CacheEntry = serde_json::from_str(
            r#"{"situacao": null, "erro": "429 Client Error: Too Many Requests"}"#,
        )
        .unwrap();
        assert!(matches!(
            transport.to_result(),
            Some(LookupResult::TransportError(_))
        ));

        let ok: CacheEntry =
            serde_json::from_str(r#"{"situacao": "BAIXADA", "erro": null}"#).unwrap();
        assert_eq!(
            ok.to_result(),
            Some(LookupResult::Success(CompanyRecord {
                situacao: "BAIXADA".to_string(),
                cnae_principal: None,
                cnae_secundario: None,
            }))
        );
    }

    #[test]
    fn test_entry_without_status_or_error_has_no_result() {
        let empty: CacheEntry = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.to_result(), None);

        let nulls: CacheEntry =
            serde_json::from_str(r#"{"situacao": null, "erro": null}"#).unwrap();
        assert_eq!(nulls.to_result(), None);

        let blank_error: CacheEntry =
            serde_json::from_str(r#"{"situacao": null, "erro": ""}"#).unwrap();
        assert_eq!(blank_error.to_result(), None);
    }
}
