use crate::models::{CnaeAllowList, DEFAULT_CNAE_ALLOWLIST};
use crate::projection::Projection;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_REGISTRY_BASE_URL: &str = "https://brasilapi.com.br/api/cnpj/v1";

/// Settings for the registry HTTP client.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
    /// Static bearer token, sent as `Authorization` when set.
    pub token: Option<String>,
    pub cnae_allowlist: CnaeAllowList,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REGISTRY_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            user_agent: default_user_agent(),
            token: None,
            cnae_allowlist: CnaeAllowList::default(),
        }
    }
}

/// Settings the enrichment engine is constructed with.
#[derive(Debug, Clone)]
pub struct EnrichmentSettings {
    pub projection: Projection,
    /// 0-based column holding the CNPJ.
    pub id_column: usize,
    /// 0-based output columns, one per projected value.
    pub output_columns: Vec<usize>,
    /// First data row to process; earlier rows are left untouched.
    pub start_row: usize,
    /// Snapshot the table after this many consulted rows.
    pub checkpoint_every: usize,
    /// Fixed pause after each remote fetch.
    pub row_delay: Duration,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            projection: Projection::Situacao,
            id_column: 5,
            output_columns: vec![6],
            start_row: 0,
            checkpoint_every: 100,
            row_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// CSV file, or a directory of per-sheet CSV files when `sheet` is set.
    pub source_path: PathBuf,
    pub sheet: Option<String>,
    pub output_path: PathBuf,
    pub cache_path: PathBuf,
    pub delimiter: u8,
    /// Start from the previous partial output when it exists.
    pub resume_from_output: bool,
    pub enrichment: EnrichmentSettings,
    pub registry: RegistrySettings,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup (environment, map in tests).
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let source_path = var("ENRICH_SOURCE_PATH")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow::anyhow!("ENRICH_SOURCE_PATH environment variable required"))?;
        let sheet = var("ENRICH_SHEET").map(|s| s.trim().to_string());

        let stem = output_stem(&source_path, sheet.as_deref());
        let output_path = var("ENRICH_OUTPUT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("{}_enriquecido.csv", stem)));
        let cache_path = var("ENRICH_CACHE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("{}_cache.json", stem)));

        let delimiter = match var("ENRICH_DELIMITER") {
            Some(d) => {
                let bytes = d.as_bytes();
                if bytes.len() != 1 {
                    anyhow::bail!("ENRICH_DELIMITER must be a single ASCII character");
                }
                bytes[0]
            }
            None => b',',
        };

        let projection = match var("ENRICH_PROJECTION") {
            Some(p) => p.parse::<Projection>()?,
            None => Projection::Situacao,
        };

        let id_column = parse_or(&var, "ENRICH_ID_COLUMN", 5usize)?;
        let output_columns = match var("ENRICH_OUTPUT_COLUMNS") {
            Some(list) => parse_columns(&list)?,
            None => projection.default_output_columns(),
        };
        if output_columns.len() != projection.arity() {
            anyhow::bail!(
                "ENRICH_OUTPUT_COLUMNS must list {} column(s) for projection '{}'",
                projection.arity(),
                projection
            );
        }
        if output_columns.contains(&id_column) {
            anyhow::bail!("ENRICH_OUTPUT_COLUMNS must not include the identifier column");
        }

        let checkpoint_every = parse_or(&var, "ENRICH_CHECKPOINT_EVERY", 100usize)?;
        if checkpoint_every == 0 {
            anyhow::bail!("ENRICH_CHECKPOINT_EVERY must be at least 1");
        }

        let enrichment = EnrichmentSettings {
            projection,
            id_column,
            output_columns,
            start_row: parse_or(&var, "ENRICH_START_ROW", 0usize)?,
            checkpoint_every,
            row_delay: Duration::from_millis(parse_or(&var, "ENRICH_DELAY_MS", 500u64)?),
        };

        let base_url = var("REGISTRY_BASE_URL")
            .unwrap_or_else(|| DEFAULT_REGISTRY_BASE_URL.to_string());
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            anyhow::bail!("REGISTRY_BASE_URL must start with http:// or https://");
        }

        let cnae_allowlist = match var("ENRICH_CNAE_ALLOWLIST") {
            Some(list) => {
                let allow = CnaeAllowList::new(list.split(',').map(str::trim));
                if allow.is_empty() {
                    anyhow::bail!("ENRICH_CNAE_ALLOWLIST has no valid CNAE codes");
                }
                allow
            }
            None => CnaeAllowList::new(DEFAULT_CNAE_ALLOWLIST),
        };

        let registry = RegistrySettings {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(parse_or(&var, "REGISTRY_TIMEOUT_SECS", 30u64)?),
            user_agent: var("REGISTRY_USER_AGENT").unwrap_or_else(default_user_agent),
            token: var("REGISTRY_TOKEN"),
            cnae_allowlist,
        };

        let config = Self {
            source_path,
            sheet,
            output_path,
            cache_path,
            delimiter,
            resume_from_output: parse_or(&var, "ENRICH_RESUME_FROM_OUTPUT", false)?,
            enrichment,
            registry,
        };

        tracing::debug!("Source: {}", config.source_path.display());
        if let Some(ref sheet) = config.sheet {
            tracing::debug!("Sheet: {}", sheet);
        }
        tracing::debug!("Output: {}", config.output_path.display());
        tracing::debug!("Cache: {}", config.cache_path.display());
        tracing::debug!("Registry Base URL: {}", config.registry.base_url);

        Ok(config)
    }
}

fn default_user_agent() -> String {
    format!("cnpj-enrichment/{}", env!("CARGO_PKG_VERSION"))
}

/// `<dir>/<stem>` of the source, with the sheet name appended when selecting a sheet.
fn output_stem(source: &Path, sheet: Option<&str>) -> String {
    match sheet {
        Some(sheet) => source.join(sheet).display().to_string(),
        None => source.with_extension("").display().to_string(),
    }
}

fn parse_or<T, V>(var: &V, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}

fn parse_columns(list: &str) -> anyhow::Result<Vec<usize>> {
    list.split(',')
        .map(|c| {
            c.trim()
                .parse::<usize>()
                .map_err(|_| anyhow::anyhow!("ENRICH_OUTPUT_COLUMNS has an invalid column: {}", c))
        })
        .collect()
}
