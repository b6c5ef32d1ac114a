use super::{Config, EmbeddingProviderKind, Secret, VectorBackend};

fn parse_kind<T: serde::de::DeserializeOwned>(var: &str, value: &str) -> Option<T> {
    let parsed = serde_json::from_value(serde_json::Value::String(value.to_owned())).ok();
    if parsed.is_none() {
        tracing::warn!("ignoring invalid {var} value: {value}");
    }
    parsed
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_embedding();
        self.apply_env_overrides_repository();
        self.apply_env_overrides_indexing();
    }

    fn apply_env_overrides_embedding(&mut self) {
        if let Ok(v) = std::env::var("TRAWL_EMBEDDING_PROVIDER")
            && let Some(kind) = parse_kind::<EmbeddingProviderKind>("TRAWL_EMBEDDING_PROVIDER", &v)
        {
            self.embedding.provider = kind;
        }
        if let Ok(v) = std::env::var("TRAWL_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("TRAWL_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("TRAWL_EMBEDDING_DIMENSION")
            && let Ok(dimension) = v.parse::<usize>()
        {
            self.embedding.dimension = dimension;
        }
        if let Ok(v) = std::env::var("TRAWL_EMBEDDING_BATCH_SIZE")
            && let Ok(size) = v.parse::<usize>()
        {
            self.embedding.batch_size = size;
        }
        if let Ok(v) = std::env::var("TRAWL_EMBEDDING_CACHE_ENABLED")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.embedding.cache_enabled = enabled;
        }
        if let Ok(v) = std::env::var("TRAWL_EMBEDDING_CACHE_CAPACITY")
            && let Ok(capacity) = v.parse::<usize>()
        {
            self.embedding.cache_capacity = capacity;
        }
        if let Ok(v) = std::env::var("TRAWL_OPENAI_API_KEY")
            && !v.is_empty()
        {
            self.secrets.openai_api_key = Some(Secret::new(v));
        }
        if let Ok(v) = std::env::var("TRAWL_VECTOR_BACKEND")
            && let Some(backend) = parse_kind::<VectorBackend>("TRAWL_VECTOR_BACKEND", &v)
        {
            self.vector_store.backend = backend;
        }
        if let Ok(v) = std::env::var("TRAWL_QDRANT_URL") {
            self.vector_store.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("TRAWL_QDRANT_COLLECTION") {
            self.vector_store.collection = v;
        }
    }

    fn apply_env_overrides_repository(&mut self) {
        if let Ok(v) = std::env::var("TRAWL_STORAGE_PATH") {
            self.repository.storage_path = v.into();
        }
        if let Ok(v) = std::env::var("TRAWL_CACHE_TTL_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.repository.cache_ttl_secs = secs;
        }
        if let Ok(v) = std::env::var("TRAWL_FETCH_TIMEOUT_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.repository.fetch_timeout_secs = secs;
        }
        if let Ok(v) = std::env::var("TRAWL_MAX_FETCH_ATTEMPTS")
            && let Ok(n) = v.parse::<u32>()
        {
            self.repository.max_fetch_attempts = n;
        }
        if let Ok(v) = std::env::var("TRAWL_ALLOWED_HOSTS") {
            self.repository.allowed_hosts = split_list(&v);
        }
        if let Ok(v) = std::env::var("TRAWL_GIT_BINARY") {
            self.repository.git_binary = v;
        }
    }

    fn apply_env_overrides_indexing(&mut self) {
        if let Ok(v) = std::env::var("TRAWL_CHUNK_SIZE")
            && let Ok(size) = v.parse::<usize>()
        {
            self.indexing.chunk_size = size;
        }
        if let Ok(v) = std::env::var("TRAWL_CHUNK_OVERLAP")
            && let Ok(overlap) = v.parse::<usize>()
        {
            self.indexing.chunk_overlap = overlap;
        }
        if let Ok(v) = std::env::var("TRAWL_INDEX_BATCH_SIZE")
            && let Ok(size) = v.parse::<usize>()
        {
            self.indexing.batch_size = size;
        }
        if let Ok(v) = std::env::var("TRAWL_REGISTRY_PATH") {
            self.indexing.registry_path = (!v.is_empty()).then(|| v.into());
        }
        if let Ok(v) = std::env::var("TRAWL_TOP_K")
            && let Ok(k) = v.parse::<usize>()
        {
            self.retrieval.top_k = k;
        }
        if let Ok(v) = std::env::var("TRAWL_SCORE_THRESHOLD")
            && let Ok(threshold) = v.parse::<f32>()
        {
            self.retrieval.score_threshold = threshold;
        }
    }
}
