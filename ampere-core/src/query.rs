//! Query shapes shared by the store driver boundary and the cached service.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored document. Always a JSON object carrying an `_id` string field.
pub type Document = Value;

/// Name of the identifier field on every stored document.
pub const ID_FIELD: &str = "_id";

/// Sort direction for a single-field sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Signed form used by document stores (1 / -1).
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Asc => 1,
            Self::Desc => -1,
        }
    }
}

/// Single-field sort order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Relation expansion directive.
///
/// The value at `path` (an id, or an array of ids) is replaced by the
/// referenced document(s) from `collection`, optionally projected by `select`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Populate {
    pub path: String,
    pub collection: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select: Vec<String>,
}

impl Populate {
    pub fn new(path: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            collection: collection.into(),
            select: Vec::new(),
        }
    }

    pub fn with_select(mut self, fields: &[&str]) -> Self {
        self.select = fields.iter().map(|f| f.to_string()).collect();
        self
    }
}

/// Options for a find against a store driver.
///
/// `select` is either an inclusion list (`["name", "email"]`) or an exclusion
/// list (`["-password"]`); mixing the two is treated as inclusion of the
/// non-prefixed fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FindOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Sort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default)]
    pub skip: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub populate: Vec<Populate>,
}

impl FindOptions {
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

    pub fn with_select(mut self, fields: &[&str]) -> Self {
        self.select = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_populate(mut self, populate: Populate) -> Self {
        self.populate.push(populate);
        self
    }
}

/// Pagination metadata returned alongside a page of results.
///
/// Serialized with the field names the dashboard front end consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub total: u64,
    #[serde(rename = "totalPaginas")]
    pub total_pages: u64,
    #[serde(rename = "paginaActual")]
    pub current_page: u64,
    #[serde(rename = "limite")]
    pub limit: u64,
    #[serde(rename = "haySiguiente")]
    pub has_next: bool,
    #[serde(rename = "hayAnterior")]
    pub has_previous: bool,
}

impl PaginationMeta {
    /// Compute metadata for `page` (1-based) of size `limit` over `total` items.
    pub fn new(total: u64, page: u64, limit: u64) -> Self {
        let limit = limit.max(1);
        let page = page.max(1);
        let total_pages = total.div_ceil(limit);
        Self {
            total,
            total_pages,
            current_page: page,
            limit,
            has_next: page < total_pages,
            has_previous: page > 1,
        }
    }

    /// Number of items to skip to reach the current page.
    pub fn skip(&self) -> u64 {
        (self.current_page - 1) * self.limit
    }
}

/// A page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(rename = "paginacion")]
    pub pagination: PaginationMeta,
}
