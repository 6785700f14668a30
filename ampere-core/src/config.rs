//! Cache configuration
//!
//! Configuration is loaded from environment variables or a TOML document, on
//! top of defaults suitable for a single dashboard process.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

// ============================================================================
// NAMESPACE SETTINGS
// ============================================================================

/// Capacity and lifetime settings for one cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceSettings {
    /// Default time-to-live for entries.
    pub ttl: Duration,
    /// Maximum number of live entries.
    pub max_items: usize,
    /// Whether reads refresh an entry's recency.
    pub touch_on_get: bool,
}

impl Default for NamespaceSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300), // 5 minutes
            max_items: 500,
            touch_on_get: true,
        }
    }
}

impl NamespaceSettings {
    pub fn new(ttl: Duration, max_items: usize) -> Self {
        Self {
            ttl,
            max_items,
            ..Default::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_touch_on_get(mut self, touch_on_get: bool) -> Self {
        self.touch_on_get = touch_on_get;
        self
    }

    /// Reject settings that would make a namespace unusable.
    pub fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.max_items == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("{field}.max_items"),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: format!("{field}.ttl"),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// CATEGORY TTLS
// ============================================================================

/// Time-to-live per cached result category of a data access service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryTtls {
    pub by_id: Duration,
    pub find: Duration,
    pub paginated: Duration,
    pub count: Duration,
    pub aggregate: Duration,
}

impl Default for CategoryTtls {
    fn default() -> Self {
        Self {
            by_id: Duration::from_secs(600),
            find: Duration::from_secs(300),
            paginated: Duration::from_secs(300),
            count: Duration::from_secs(120),
            aggregate: Duration::from_secs(600),
        }
    }
}

impl CategoryTtls {
    /// Same TTL for every category.
    pub fn uniform(ttl: Duration) -> Self {
        Self {
            by_id: ttl,
            find: ttl,
            paginated: ttl,
            count: ttl,
            aggregate: ttl,
        }
    }
}

// ============================================================================
// CACHE SETTINGS
// ============================================================================

/// Top-level cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Settings applied to namespaces created without explicit options.
    pub default_namespace: NamespaceSettings,
    /// Deduplicate concurrent misses on the same key.
    pub single_flight: bool,
    /// Per-category TTLs used by data access services.
    pub categories: CategoryTtls,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_namespace: NamespaceSettings::default(),
            single_flight: true,
            categories: CategoryTtls::default(),
        }
    }
}

/// On-disk shape of [`CacheSettings`]; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheSettingsFile {
    ttl_secs: Option<u64>,
    max_items: Option<usize>,
    touch_on_get: Option<bool>,
    single_flight: Option<bool>,
    #[serde(default)]
    categories: CategoryTtlsFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CategoryTtlsFile {
    by_id_secs: Option<u64>,
    find_secs: Option<u64>,
    paginated_secs: Option<u64>,
    count_secs: Option<u64>,
    aggregate_secs: Option<u64>,
}

impl CacheSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_namespace(mut self, settings: NamespaceSettings) -> Self {
        self.default_namespace = settings;
        self
    }

    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn with_categories(mut self, categories: CategoryTtls) -> Self {
        self.categories = categories;
        self
    }

    /// Create CacheSettings from environment variables.
    ///
    /// Environment variables:
    /// - `AMPERE_CACHE_TTL_SECS`: default namespace TTL (default: 300)
    /// - `AMPERE_CACHE_MAX_ITEMS`: default namespace capacity (default: 500)
    /// - `AMPERE_CACHE_TOUCH_ON_GET`: "true" or "false" (default: true)
    /// - `AMPERE_CACHE_SINGLE_FLIGHT`: "true" or "false" (default: true)
    /// - `AMPERE_CACHE_TTL_{BY_ID,FIND,PAGINATED,COUNT,AGGREGATE}_SECS`:
    ///   per-category TTL overrides
    ///
    /// Unparseable values fall back to the default for that field.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |name: &str, fallback: Duration| {
            lookup(name)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };
        let flag = |name: &str, fallback: bool| {
            lookup(name)
                .map(|s| match s.trim().to_lowercase().as_str() {
                    "true" | "1" => true,
                    "false" | "0" => false,
                    _ => fallback,
                })
                .unwrap_or(fallback)
        };

        let max_items = lookup("AMPERE_CACHE_MAX_ITEMS")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.default_namespace.max_items);

        let categories = CategoryTtls {
            by_id: secs("AMPERE_CACHE_TTL_BY_ID_SECS", defaults.categories.by_id),
            find: secs("AMPERE_CACHE_TTL_FIND_SECS", defaults.categories.find),
            paginated: secs("AMPERE_CACHE_TTL_PAGINATED_SECS", defaults.categories.paginated),
            count: secs("AMPERE_CACHE_TTL_COUNT_SECS", defaults.categories.count),
            aggregate: secs("AMPERE_CACHE_TTL_AGGREGATE_SECS", defaults.categories.aggregate),
        };

        Self {
            default_namespace: NamespaceSettings {
                ttl: secs("AMPERE_CACHE_TTL_SECS", defaults.default_namespace.ttl),
                max_items,
                touch_on_get: flag(
                    "AMPERE_CACHE_TOUCH_ON_GET",
                    defaults.default_namespace.touch_on_get,
                ),
            },
            single_flight: flag("AMPERE_CACHE_SINGLE_FLIGHT", defaults.single_flight),
            categories,
        }
    }

    /// Parse settings from a TOML document and validate them.
    ///
    /// ```toml
    /// ttl_secs = 120
    /// max_items = 1000
    /// single_flight = false
    ///
    /// [categories]
    /// count_secs = 30
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: CacheSettingsFile = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;

        let defaults = Self::default();
        let secs = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_secs).unwrap_or(fallback)
        };

        let settings = Self {
            default_namespace: NamespaceSettings {
                ttl: secs(file.ttl_secs, defaults.default_namespace.ttl),
                max_items: file
                    .max_items
                    .unwrap_or(defaults.default_namespace.max_items),
                touch_on_get: file
                    .touch_on_get
                    .unwrap_or(defaults.default_namespace.touch_on_get),
            },
            single_flight: file.single_flight.unwrap_or(defaults.single_flight),
            categories: CategoryTtls {
                by_id: secs(file.categories.by_id_secs, defaults.categories.by_id),
                find: secs(file.categories.find_secs, defaults.categories.find),
                paginated: secs(file.categories.paginated_secs, defaults.categories.paginated),
                count: secs(file.categories.count_secs, defaults.categories.count),
                aggregate: secs(file.categories.aggregate_secs, defaults.categories.aggregate),
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Validate every namespace-shaped setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_namespace.validate("default_namespace")?;
        let categories = [
            ("categories.by_id", self.categories.by_id),
            ("categories.find", self.categories.find),
            ("categories.paginated", self.categories.paginated),
            ("categories.count", self.categories.count),
            ("categories.aggregate", self.categories.aggregate),
        ];
        for (field, ttl) in categories {
            if ttl.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}
