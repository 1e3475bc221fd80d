use std::fmt;

/// Identifies a distinct fetchable resource-plus-parameters combination.
///
/// Equality is structural: two keys naming the same resource with the same
/// parameters are the same key, no matter where they were constructed. The
/// [`Display`](fmt::Display) form is a stable serialization usable as a
/// mapping key or a metrics tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheKey {
    /// A product listing, filtered by a (possibly empty) search keyword.
    ///
    /// The empty keyword is the full listing.
    ProductList {
        /// Trimmed search keyword.
        keyword: String,
    },
    /// A single product detail.
    ProductDetail {
        /// Backend product id.
        id: u32,
    },
    /// The reserved session entry ("who is logged in").
    Session,
    /// The admin user roster.
    AdminUsers,
}

impl CacheKey {
    /// Creates the key for a product listing.
    ///
    /// The keyword is trimmed so that `"bike"` and `" bike "` name the same
    /// entry.
    pub fn product_list(keyword: &str) -> Self {
        CacheKey::ProductList {
            keyword: keyword.trim().to_owned(),
        }
    }

    /// Creates the key for a single product detail.
    pub fn product_detail(id: u32) -> Self {
        CacheKey::ProductDetail { id }
    }

    /// The resource family this key belongs to.
    ///
    /// Families are the unit of expiry configuration and of invalidation:
    /// a product mutation invalidates every key of the `Products` family.
    pub fn family(&self) -> CacheFamily {
        match self {
            CacheKey::ProductList { .. } | CacheKey::ProductDetail { .. } => CacheFamily::Products,
            CacheKey::Session => CacheFamily::Session,
            CacheKey::AdminUsers => CacheFamily::Users,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::ProductList { keyword } => write!(f, "products/list/{keyword}"),
            CacheKey::ProductDetail { id } => write!(f, "products/detail/{id}"),
            CacheKey::Session => f.write_str("session"),
            CacheKey::AdminUsers => f.write_str("users/admin"),
        }
    }
}

/// The resource families the store distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheFamily {
    /// Product listings and details.
    Products,
    /// The session probe result.
    Session,
    /// The admin user roster.
    Users,
}

impl AsRef<str> for CacheFamily {
    fn as_ref(&self) -> &str {
        match self {
            CacheFamily::Products => "products",
            CacheFamily::Session => "session",
            CacheFamily::Users => "users",
        }
    }
}

impl fmt::Display for CacheFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}
