/// Persistent lookup cache
///
/// Maps each CNPJ to the first result ever obtained for it. Entries are never
/// evicted or refreshed; stale data is acceptable and a wrong entry is fixed
/// by deleting it from the cache file by hand.
///
/// Storage sits behind [`CacheStore`] so the engine does not care whether the
/// map lives in a JSON file or only in memory.
use crate::cnpj::Cnpj;
use crate::errors::{AppError, ResultExt};
use crate::models::{CacheEntry, CnaeAllowList, LookupResult};
use crate::registry_client::{extract_fields, SITUACAO_FIELD};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Durable backing for the lookup cache.
pub trait CacheStore {
    /// Reads every entry. Missing or unreadable storage yields an empty map.
    fn load(&self) -> BTreeMap<String, CacheEntry>;

    /// Replaces the stored map with `entries`.
    fn flush(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<(), AppError>;
}

/// Cache stored as a pretty-printed JSON object keyed by CNPJ.
///
/// Besides its own entries it reads files where each value is the raw
/// registry payload; those go through the same field extraction as a fresh
/// lookup, using the configured allow-list.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    allowlist: CnaeAllowList,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            allowlist: CnaeAllowList::default(),
        }
    }

    pub fn with_allowlist(mut self, allowlist: CnaeAllowList) -> Self {
        self.allowlist = allowlist;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl CacheStore for JsonFileStore {
    fn load(&self) -> BTreeMap<String, CacheEntry> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    "No cache file at {}, starting empty",
                    self.path.display()
                );
                return BTreeMap::new();
            }
            Err(e) => {
                tracing::warn!(
                    "Cache file {} is unreadable ({}), starting empty",
                    self.path.display(),
                    e
                );
                return BTreeMap::new();
            }
        };

        let raw = match serde_json::from_str::<BTreeMap<String, Value>>(&content) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    "Cache file {} is corrupt ({}), starting empty",
                    self.path.display(),
                    e
                );
                return BTreeMap::new();
            }
        };

        let mut entries = BTreeMap::new();
        for (key, value) in raw {
            match decode_entry(value, &self.allowlist) {
                Some(entry) => {
                    entries.insert(key, entry);
                }
                None => tracing::warn!("Unreadable cache entry for {}, ignoring it", key),
            }
        }
        entries
    }

    fn flush(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(entries)?;
        let temp_path = self.temp_path();

        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);

        // Atomic on the same filesystem
        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Decodes one stored value, either a [`CacheEntry`] or a raw registry payload.
fn decode_entry(value: Value, allowlist: &CnaeAllowList) -> Option<CacheEntry> {
    if value.get(SITUACAO_FIELD).and_then(Value::as_str).is_some() {
        let mut entry = CacheEntry::from_result(&extract_fields(&value, allowlist), Utc::now());
        // Lookup time unknown
        entry.consultado_em = None;
        return Some(entry);
    }
    serde_json::from_value(value).ok()
}

/// Non-durable store. Clones share state, so a test can keep a handle and
/// inspect what the engine flushed.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, CacheEntry>>>,
    flushes: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store, as if a previous run had flushed `entries`.
    pub fn with_entries(entries: BTreeMap<String, CacheEntry>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
            flushes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Last flushed snapshot.
    pub fn snapshot(&self) -> BTreeMap<String, CacheEntry> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl CacheStore for MemoryStore {
    fn load(&self) -> BTreeMap<String, CacheEntry> {
        self.snapshot()
    }

    fn flush(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<(), AppError> {
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = entries.clone();
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory map with write-through persistence.
pub struct LookupCache<S: CacheStore> {
    store: S,
    entries: BTreeMap<String, CacheEntry>,
}

impl<S: CacheStore> LookupCache<S> {
    /// Loads whatever the store holds.
    ///
    /// Entries that hold no result (neither a status nor an error) are
    /// dropped, so their identifiers are fetched again and overwritten on the
    /// next flush.
    pub fn load(store: S) -> Self {
        let mut entries = store.load();
        let before = entries.len();
        entries.retain(|_, entry| entry.to_result().is_some());
        if entries.len() < before {
            tracing::warn!(
                "Dropped {} cache entries without status or error",
                before - entries.len()
            );
        }
        tracing::info!("Lookup cache loaded with {} entries", entries.len());
        Self { store, entries }
    }

    pub fn get(&self, cnpj: &Cnpj) -> Option<LookupResult> {
        self.entries.get(cnpj.as_str()).and_then(CacheEntry::to_result)
    }

    pub fn contains(&self, cnpj: &Cnpj) -> bool {
        self.entries.contains_key(cnpj.as_str())
    }

    /// Records `result` for `cnpj` and flushes.
    ///
    /// Existing entries are never replaced; returns `false` in that case and
    /// skips the flush. A failed flush is logged, the entry stays in memory
    /// and goes out with the next successful flush.
    pub fn put(&mut self, cnpj: Cnpj, result: &LookupResult) -> bool {
        if self.entries.contains_key(cnpj.as_str()) {
            return false;
        }
        self.entries.insert(
            cnpj.as_str().to_string(),
            CacheEntry::from_result(result, Utc::now()),
        );

        if let Err(e) = self.flush() {
            tracing::error!("Failed to persist cache entry for {}: {}", cnpj, e);
        }
        true
    }

    pub fn flush(&self) -> Result<(), AppError> {
        self.store.flush(&self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cnpj::normalize;
    use crate::models::CompanyRecord;

    fn ativa() -> LookupResult {
        LookupResult::Success(CompanyRecord {
            situacao: "ATIVA".to_string(),
            cnae_principal: None,
            cnae_secundario: None,
        })
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{\"11222333000181\": {\"situacao\": ").unwrap();

        let cache = LookupCache::load(JsonFileStore::new(&path));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_writes_through_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");
        let cnpj = normalize("11.222.333/0001-81").unwrap();

        let mut cache = LookupCache::load(JsonFileStore::new(&path));
        assert!(cache.put(cnpj.clone(), &ativa()));
        assert!(path.exists());
        assert!(!dir.path().join("nested").join("cache.json.tmp").exists());

        let reloaded = LookupCache::load(JsonFileStore::new(&path));
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get(&cnpj), Some(ativa()));
    }

    #[test]
    fn test_put_never_overwrites() {
        let store = MemoryStore::new();
        let cnpj = normalize("11222333000181").unwrap();
        let mut cache = LookupCache::load(store.clone());

        assert!(cache.put(cnpj.clone(), &ativa()));
        assert!(!cache.put(
            cnpj.clone(),
            &LookupResult::TransportError("timeout".to_string())
        ));

        assert_eq!(cache.get(&cnpj), Some(ativa()));
        assert_eq!(store.flush_count(), 1);
    }

    #[test]
    fn test_file_is_plain_key_object_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut cache = LookupCache::load(JsonFileStore::new(&path));
        cache.put(
            normalize("00000000000000").unwrap(),
            &LookupResult::Invalid("CNPJ inválido".to_string()),
        );

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["00000000000000"]["erro"], "CNPJ inválido");
        assert_eq!(raw["00000000000000"]["tipo_erro"], "invalid");
    }

    #[test]
    fn test_raw_registry_payloads_load_as_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cnpj_cache.json");
        fs::write(
            &path,
            r#"{
                "11222333000181": {
                    "cnpj": "11222333000181",
                    "descricao_situacao_cadastral": "ATIVA",
                    "cnae_fiscal": 4639701,
                    "cnae_fiscal_descricao": "Comércio atacadista de produtos alimentícios em geral",
                    "cnaes_secundarios": [
                        {"codigo": 4712100, "descricao": "Minimercados"},
                        {"codigo": 4631100, "descricao": "Comércio atacadista de leite"}
                    ]
                },
                "33000167000101": {"situacao": "BAIXADA", "erro": null}
            }"#,
        )
        .unwrap();

        let cache = LookupCache::load(JsonFileStore::new(&path));
        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.get(&normalize("11222333000181").unwrap()),
            Some(LookupResult::Success(CompanyRecord {
                situacao: "ATIVA".to_string(),
                cnae_principal: Some(
                    "46.39-7-01 - Comércio atacadista de produtos alimentícios em geral"
                        .to_string()
                ),
                cnae_secundario: Some("46.31-1-00 - Comércio atacadista de leite".to_string()),
            }))
        );
        assert!(matches!(
            cache.get(&normalize("33000167000101").unwrap()),
            Some(LookupResult::Success(_))
        ));
    }

    #[test]
    fn test_entries_without_result_are_cache_misses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(
            &path,
            r#"{
                "11222333000181": {},
                "33000167000101": {"situacao": null, "erro": null},
                "00000000000191": 42,
                "11444777000161": {"situacao": "ATIVA"}
            }"#,
        )
        .unwrap();

        let mut cache = LookupCache::load(JsonFileStore::new(&path));
        assert_eq!(cache.len(), 1);

        let empty = normalize("11222333000181").unwrap();
        assert_eq!(cache.get(&empty), None);
        assert!(!cache.contains(&empty));
        assert!(!cache.contains(&normalize("00000000000191").unwrap()));

        // A fresh result replaces the unusable entry on disk
        assert!(cache.put(empty.clone(), &ativa()));
        let reloaded = LookupCache::load(JsonFileStore::new(&path));
        assert_eq!(reloaded.get(&empty), Some(ativa()));
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_memory_store_entries_without_result_are_dropped() {
        let mut seeded = BTreeMap::new();
        seeded.insert(
            "11222333000181".to_string(),
            serde_json::from_str::<CacheEntry>("{}").unwrap(),
        );
        let cache = LookupCache::load(MemoryStore::with_entries(seeded));
        assert!(cache.is_empty());
    }
}
