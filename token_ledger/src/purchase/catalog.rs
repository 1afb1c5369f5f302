//! Token package catalog.
//!
//! Packages are the priced bundles a user can buy. A confirmed purchase that
//! names a package is credited with the catalog's token counts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use super::errors::{PurchaseError, PurchaseResult};
use super::models::{PackageId, PurchaseTokens};
use crate::db::timeouts::{DEFAULT_QUERY_TIMEOUT, with_timeout};

/// A purchasable token bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPackage {
    pub id: PackageId,
    pub name: String,
    pub token_amount: i64,
    pub bonus_tokens: i64,
    /// Price in minor units of `currency`
    pub price_minor_units: i64,
    pub currency: String,
    pub recommended: bool,
    pub description: Option<String>,
    pub display_order: i32,
    pub is_active: bool,
}

impl TokenPackage {
    pub fn tokens(&self) -> PurchaseTokens {
        PurchaseTokens {
            base: self.token_amount,
            bonus: self.bonus_tokens,
        }
    }

    pub fn total_tokens(&self) -> PurchaseResult<i64> {
        self.tokens().total()
    }

    /// Price of one token in major units, rounded to 3 decimals
    pub fn value_per_token(&self) -> Option<f64> {
        let total = self.total_tokens().ok().filter(|total| *total > 0)?;
        let per_token = self.price_minor_units as f64 / 100.0 / total as f64;
        Some((per_token * 1000.0).round() / 1000.0)
    }
}

/// Package as presented to buyers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageListing {
    #[serde(flatten)]
    pub package: TokenPackage,
    pub total_tokens: i64,
    pub value_per_token: Option<f64>,
}

impl TryFrom<TokenPackage> for PackageListing {
    type Error = PurchaseError;

    fn try_from(package: TokenPackage) -> PurchaseResult<Self> {
        Ok(Self {
            total_tokens: package.total_tokens()?,
            value_per_token: package.value_per_token(),
            package,
        })
    }
}

/// Packages seeded into a fresh catalog
pub fn default_packages() -> Vec<TokenPackage> {
    let package = |id: PackageId,
                   name: &str,
                   token_amount: i64,
                   bonus_tokens: i64,
                   price: i64,
                   recommended: bool| TokenPackage {
        id,
        name: name.to_string(),
        token_amount,
        bonus_tokens,
        price_minor_units: price,
        currency: "GBP".to_string(),
        recommended,
        description: None,
        display_order: id as i32,
        is_active: true,
    };
    vec![
        package(1, "Starter", 10, 0, 500, false),
        package(2, "Popular", 25, 5, 1000, true),
        package(3, "Pro", 60, 15, 2000, false),
    ]
}

/// Storage for token packages
#[async_trait]
pub trait PackageStore: Send + Sync {
    /// Packages ordered by display order then token amount
    async fn packages(&self, active_only: bool) -> PurchaseResult<Vec<TokenPackage>>;

    /// Package by id, active or not
    async fn package(&self, id: PackageId) -> PurchaseResult<Option<TokenPackage>>;
}

/// In-memory package store
pub struct MemoryPackageStore {
    packages: RwLock<Vec<TokenPackage>>,
}

impl MemoryPackageStore {
    pub fn new(packages: Vec<TokenPackage>) -> Self {
        Self {
            packages: RwLock::new(packages),
        }
    }

    /// Add or replace a package
    pub fn upsert(&self, package: TokenPackage) {
        let mut packages = self.packages.write().unwrap_or_else(PoisonError::into_inner);
        packages.retain(|existing| existing.id != package.id);
        packages.push(package);
    }
}

impl Default for MemoryPackageStore {
    fn default() -> Self {
        Self::new(default_packages())
    }
}

#[async_trait]
impl PackageStore for MemoryPackageStore {
    async fn packages(&self, active_only: bool) -> PurchaseResult<Vec<TokenPackage>> {
        let packages = self.packages.read().unwrap_or_else(PoisonError::into_inner);
        let mut listed: Vec<TokenPackage> = packages
            .iter()
            .filter(|package| !active_only || package.is_active)
            .cloned()
            .collect();
        listed.sort_by_key(|package| (package.display_order, package.token_amount));
        Ok(listed)
    }

    async fn package(&self, id: PackageId) -> PurchaseResult<Option<TokenPackage>> {
        let packages = self.packages.read().unwrap_or_else(PoisonError::into_inner);
        Ok(packages.iter().find(|package| package.id == id).cloned())
    }
}

/// Read access to the package catalog
#[derive(Clone)]
pub struct PackageCatalog {
    store: Arc<dyn PackageStore>,
    query_timeout: Duration,
}

impl PackageCatalog {
    pub fn new(store: Arc<dyn PackageStore>) -> Self {
        Self {
            store,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Catalog over the default packages, held in memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPackageStore::default()))
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    /// Active packages with their derived totals
    pub async fn list_packages(&self) -> PurchaseResult<Vec<PackageListing>> {
        let packages = with_timeout(self.query_timeout, self.store.packages(true)).await?;
        packages.into_iter().map(PackageListing::try_from).collect()
    }

    pub async fn get_package(&self, id: PackageId) -> PurchaseResult<Option<TokenPackage>> {
        with_timeout(self.query_timeout, self.store.package(id)).await
    }
}
