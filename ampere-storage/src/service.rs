//! Cached data access service.
//!
//! One [`DataAccessService`] per collection. Reads go through the shared
//! [`CacheManager`] using five category namespaces; writes go straight to the
//! driver and then invalidate the categories they can affect.

use std::sync::Arc;
use std::time::Duration;

use ampere_cache::{generate_key, CacheManager, WrapOptions};
use ampere_core::{
    AmpereError, AmpereResult, CategoryTtls, Document, EntityId, FindOptions, NamespaceSettings, Page,
    PaginationMeta, Populate, Sort, ID_FIELD,
};
use serde_json::{json, Value};

use crate::driver::DocumentStore;
use crate::sanitize::sanitize_filter;

// ============================================================================
// CATEGORIES
// ============================================================================

/// Cache category. Each maps to namespace `{collection}:{suffix}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    ById,
    Find,
    Paginated,
    Count,
    Aggregate,
}

impl CacheCategory {
    pub const ALL: [Self; 5] = [
        Self::ById,
        Self::Find,
        Self::Paginated,
        Self::Count,
        Self::Aggregate,
    ];

    /// Categories whose results can change when any document changes.
    pub const LISTS: [Self; 4] = [Self::Find, Self::Paginated, Self::Count, Self::Aggregate];

    pub fn suffix(self) -> &'static str {
        match self {
            Self::ById => "byId",
            Self::Find => "find",
            Self::Paginated => "paginated",
            Self::Count => "count",
            Self::Aggregate => "aggregate",
        }
    }

    pub fn namespace(self, collection: &str) -> String {
        format!("{}:{}", collection, self.suffix())
    }

    pub fn ttl(self, ttls: &CategoryTtls) -> Duration {
        match self {
            Self::ById => ttls.by_id,
            Self::Find => ttls.find,
            Self::Paginated => ttls.paginated,
            Self::Count => ttls.count,
            Self::Aggregate => ttls.aggregate,
        }
    }
}

// ============================================================================
// OPTIONS
// ============================================================================

/// Options for [`DataAccessService::get_by_id`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    pub populate: Vec<Populate>,
    pub select: Vec<String>,
    pub bypass_cache: bool,
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_populate(mut self, populate: Populate) -> Self {
        self.populate.push(populate);
        self
    }

    pub fn with_select(mut self, fields: &[&str]) -> Self {
        self.select = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// Options for [`DataAccessService::query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub sort: Option<Sort>,
    pub limit: Option<u64>,
    pub skip: u64,
    pub populate: Vec<Populate>,
    pub select: Vec<String>,
    pub bypass_cache: bool,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_populate(mut self, populate: Populate) -> Self {
        self.populate.push(populate);
        self
    }

    pub fn with_select(mut self, fields: &[&str]) -> Self {
        self.select = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    fn find_options(&self) -> FindOptions {
        FindOptions {
            sort: self.sort.clone(),
            limit: self.limit,
            skip: self.skip,
            select: self.select.clone(),
            populate: self.populate.clone(),
        }
    }
}

/// Options for [`DataAccessService::paginate`]. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginateOptions {
    pub page: u64,
    pub limit: u64,
    pub sort: Option<Sort>,
    pub populate: Vec<Populate>,
    pub select: Vec<String>,
    pub bypass_cache: bool,
}

impl Default for PaginateOptions {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 10,
            sort: None,
            populate: Vec::new(),
            select: Vec::new(),
            bypass_cache: false,
        }
    }
}

impl PaginateOptions {
    pub fn new(page: u64, limit: u64) -> Self {
        Self {
            page,
            limit,
            ..Self::default()
        }
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_populate(mut self, populate: Populate) -> Self {
        self.populate.push(populate);
        self
    }

    pub fn with_select(mut self, fields: &[&str]) -> Self {
        self.select = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// Options for [`DataAccessService::aggregate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateOptions {
    pub bypass_cache: bool,
    /// Overrides the aggregate category TTL for this result.
    pub ttl: Option<Duration>,
}

impl AggregateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// Options for [`DataAccessService::count`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountOptions {
    pub bypass_cache: bool,
}

/// Shapes the document returned by [`DataAccessService::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub populate: Vec<Populate>,
    pub select: Vec<String>,
}

fn wrap_options(bypass_cache: bool) -> WrapOptions {
    WrapOptions {
        bypass_cache,
        ..WrapOptions::default()
    }
}

// ============================================================================
// SERVICE
// ============================================================================

/// Cache-aside access to one collection of a [`DocumentStore`].
pub struct DataAccessService<D: DocumentStore> {
    collection: String,
    store: Arc<D>,
    cache: Arc<CacheManager>,
}

impl<D: DocumentStore> DataAccessService<D> {
    pub fn new(collection: impl Into<String>, store: Arc<D>, cache: Arc<CacheManager>) -> Self {
        Self {
            collection: collection.into(),
            store,
            cache,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn store(&self) -> &Arc<D> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Namespace name for a category of this collection.
    pub fn namespace_name(&self, category: CacheCategory) -> String {
        category.namespace(&self.collection)
    }

    // Registers the namespace with its category TTL on first use, including
    // after a `clear_all` dropped it.
    fn namespace(&self, category: CacheCategory) -> String {
        let name = self.namespace_name(category);
        let settings = self.cache.settings();
        let ns_settings: NamespaceSettings = settings
            .default_namespace
            .with_ttl(category.ttl(&settings.categories));
        self.cache.get_cache(&name, Some(ns_settings));
        name
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Insert a document, then invalidate every list category.
    ///
    /// Any by-id entry already cached for the new id (a remembered miss) is
    /// dropped too.
    pub async fn create(&self, data: Document) -> AmpereResult<Document> {
        let created = self.store.insert(&self.collection, data).await?;
        if let Some(id) = created.get(ID_FIELD).and_then(Value::as_str) {
            self.invalidate_document(id);
        }
        self.invalidate_lists();
        Ok(created)
    }

    /// Apply `patch` to one document.
    ///
    /// Returns `None` when no document has that id; the cache is left alone
    /// in that case.
    pub async fn update(
        &self,
        id: &str,
        patch: &Value,
        options: UpdateOptions,
    ) -> AmpereResult<Option<Document>> {
        let id = EntityId::parse(id)?;
        let Some(updated) = self.store.update_by_id(&self.collection, &id, patch).await? else {
            return Ok(None);
        };
        self.invalidate_document(id.as_str());
        self.invalidate_lists();

        if options.populate.is_empty() && options.select.is_empty() {
            return Ok(Some(updated));
        }
        let find = FindOptions {
            select: options.select,
            populate: options.populate,
            ..FindOptions::default()
        };
        self.store.find_by_id(&self.collection, &id, &find).await
    }

    /// Delete one document. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> AmpereResult<bool> {
        let id = EntityId::parse(id)?;
        let removed = self.store.delete_by_id(&self.collection, &id).await?;
        if removed {
            self.invalidate_document(id.as_str());
            self.invalidate_lists();
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Fetch one document by id. Malformed ids are rejected before the store
    /// or the cache is touched.
    pub async fn get_by_id(&self, id: &str, options: GetOptions) -> AmpereResult<Option<Document>> {
        let id = EntityId::parse(id)?;
        let ns = self.namespace(CacheCategory::ById);
        let params = json!({
            "id": id.as_str(),
            "populate": options.populate,
            "select": options.select,
        });
        // The id prefix keeps pattern invalidation working when the rest of
        // the key is digested.
        let key = format!("{}|{}", id, generate_key("getById", Some(&params)));
        let find = FindOptions {
            select: options.select,
            populate: options.populate,
            ..FindOptions::default()
        };

        self.cache
            .wrap(
                &ns,
                &key,
                || async { self.store.find_by_id(&self.collection, &id, &find).await },
                wrap_options(options.bypass_cache),
            )
            .await
    }

    /// Find documents matching `filter`. The filter is sanitized first and the
    /// same sanitized filter feeds both the key and the store.
    pub async fn query(&self, filter: &Value, options: QueryOptions) -> AmpereResult<Vec<Document>> {
        let filter = sanitize_filter(filter);
        let find = options.find_options();
        let ns = self.namespace(CacheCategory::Find);
        let key = generate_key("find", Some(&json!({"filter": filter, "options": find})));

        self.cache
            .wrap(
                &ns,
                &key,
                || async { self.store.find(&self.collection, &filter, &find).await },
                wrap_options(options.bypass_cache),
            )
            .await
    }

    /// One page of documents plus pagination metadata.
    ///
    /// The data and the total are read from the store directly and the
    /// combined page is cached under the paginated category.
    pub async fn paginate(
        &self,
        filter: &Value,
        options: PaginateOptions,
    ) -> AmpereResult<Page<Document>> {
        let filter = sanitize_filter(filter);
        let page = options.page.max(1);
        let limit = options.limit.max(1);
        let find = FindOptions {
            sort: options.sort,
            limit: Some(limit),
            skip: (page - 1).saturating_mul(limit),
            select: options.select,
            populate: options.populate,
        };
        let ns = self.namespace(CacheCategory::Paginated);
        let key = generate_key(
            "paginate",
            Some(&json!({
                "filter": filter,
                "page": page,
                "limit": limit,
                "sort": find.sort,
                "select": find.select,
                "populate": find.populate,
            })),
        );

        self.cache
            .wrap(
                &ns,
                &key,
                || async {
                    let data = self.store.find(&self.collection, &filter, &find).await?;
                    let total = self.store.count(&self.collection, &filter).await?;
                    Ok::<_, AmpereError>(Page {
                        data,
                        pagination: PaginationMeta::new(total, page, limit),
                    })
                },
                wrap_options(options.bypass_cache),
            )
            .await
    }

    /// Run an aggregation pipeline, cached by the pipeline's structure.
    pub async fn aggregate(
        &self,
        pipeline: &[Value],
        options: AggregateOptions,
    ) -> AmpereResult<Vec<Document>> {
        let ns = self.namespace(CacheCategory::Aggregate);
        let key = generate_key("aggregate", Some(pipeline));
        let wrap = WrapOptions {
            ttl: options.ttl,
            bypass_cache: options.bypass_cache,
            skip_cache: false,
        };

        self.cache
            .wrap(
                &ns,
                &key,
                || async { self.store.aggregate(&self.collection, pipeline).await },
                wrap,
            )
            .await
    }

    /// Count documents matching `filter` (sanitized as in [`query`](Self::query)).
    pub async fn count(&self, filter: &Value, options: CountOptions) -> AmpereResult<u64> {
        let filter = sanitize_filter(filter);
        let ns = self.namespace(CacheCategory::Count);
        let key = generate_key("count", Some(&filter));

        self.cache
            .wrap(
                &ns,
                &key,
                || async { self.store.count(&self.collection, &filter).await },
                wrap_options(options.bypass_cache),
            )
            .await
    }

    // ------------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------------

    /// Drop every cached read of this collection.
    pub fn invalidate_all(&self) {
        for category in CacheCategory::ALL {
            self.cache.invalidate_pattern(&self.namespace_name(category), "");
        }
    }

    fn invalidate_lists(&self) {
        let mut removed = 0;
        for category in CacheCategory::LISTS {
            // Every key contains the empty pattern.
            removed += self.cache.invalidate_pattern(&self.namespace_name(category), "");
        }
        tracing::debug!(collection = %self.collection, removed, "List caches invalidated");
    }

    fn invalidate_document(&self, id: &str) {
        let prefix = format!("{}|", id.to_ascii_lowercase());
        let removed = self
            .cache
            .invalidate_pattern(&self.namespace_name(CacheCategory::ById), &prefix);
        tracing::debug!(collection = %self.collection, id, removed, "Document cache invalidated");
    }
}

impl<D: DocumentStore> std::fmt::Debug for DataAccessService<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataAccessService")
            .field("collection", &self.collection)
            .finish()
    }
}
