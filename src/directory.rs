//! Company directory
//!
//! Maps the name a user picks to the provider's company id plus the display
//! context used by web search. Backed by the `universe` table when a
//! database is configured, otherwise by a fixed list.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use crate::error::DirectoryError;
use crate::models::{CompanyContext, CompanyId};

#[async_trait]
pub trait CompanyDirectory: Send + Sync {
    /// Resolve a company by name, ignoring case and surrounding whitespace.
    async fn resolve(&self, name: &str) -> Result<CompanyContext, DirectoryError>;

    /// All known companies, sorted by display name.
    async fn list(&self) -> Result<Vec<CompanyContext>, DirectoryError>;
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

//
// ================= Static directory =================
//

/// Fixed in-memory directory
pub struct StaticCompanyDirectory {
    companies: Vec<CompanyContext>,
}

impl StaticCompanyDirectory {
    pub fn new(mut companies: Vec<CompanyContext>) -> Self {
        companies.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Self { companies }
    }

    /// A handful of European large caps as (name, ISIN, Quartr id) rows.
    ///
    /// Keyed by Quartr id, the id the document provider queries. The ids are
    /// illustrative; deployments with a `universe` table use
    /// [`PgCompanyDirectory`] instead.
    pub fn sample() -> Self {
        let entries = [
            ("Airbus SE", "NL0000235190", "4742"),
            ("ASML Holding NV", "NL0010273215", "5113"),
            ("AstraZeneca PLC", "GB0009895292", "1380"),
            ("BASF SE", "DE000BASF111", "2275"),
            ("BNP Paribas SA", "FR0000131104", "3021"),
            ("Allianz SE", "DE0008404005", "1904"),
        ];

        Self::new(
            entries
                .into_iter()
                .map(|(name, isin, quartr_id)| CompanyContext::new(quartr_id, name).with_isin(isin))
                .collect(),
        )
    }
}

#[async_trait]
impl CompanyDirectory for StaticCompanyDirectory {
    async fn resolve(&self, name: &str) -> Result<CompanyContext, DirectoryError> {
        let wanted = normalize(name);
        self.companies
            .iter()
            .find(|c| normalize(&c.display_name) == wanted)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(name.trim().to_string()))
    }

    async fn list(&self) -> Result<Vec<CompanyContext>, DirectoryError> {
        Ok(self.companies.clone())
    }
}

//
// ================= Postgres directory =================
//

/// Directory over the `universe` table ("Name", "ISIN", "Quartr Id")
pub struct PgCompanyDirectory {
    pool: PgPool,
}

impl PgCompanyDirectory {
    /// Create a lazily connecting directory; nothing is dialed until first use.
    pub fn connect_lazy(database_url: &str) -> Result<Self, DirectoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        info!("Company directory backend: postgres");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_company(row: &sqlx::postgres::PgRow) -> Option<CompanyContext> {
        let quartr_id: Option<String> = row.try_get("quartr_id").ok().flatten();
        let name: String = row.try_get("name").ok()?;
        let isin: Option<String> = row.try_get("isin").ok().flatten();

        let mut company = CompanyContext::new(CompanyId::new(quartr_id?), name);
        company.isin = isin;
        Some(company)
    }
}

#[async_trait]
impl CompanyDirectory for PgCompanyDirectory {
    async fn resolve(&self, name: &str) -> Result<CompanyContext, DirectoryError> {
        let row = sqlx::query(
            r#"
            SELECT "Name" AS name, "ISIN" AS isin, "Quartr Id"::text AS quartr_id
            FROM universe
            WHERE lower(trim("Name")) = $1
            LIMIT 1
            "#,
        )
        .bind(normalize(name))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Company lookup failed");
            DirectoryError::Unavailable(e.to_string())
        })?;

        row.as_ref()
            .and_then(Self::row_to_company)
            .ok_or_else(|| DirectoryError::NotFound(name.trim().to_string()))
    }

    async fn list(&self) -> Result<Vec<CompanyContext>, DirectoryError> {
        let rows = sqlx::query(
            r#"
            SELECT "Name" AS name, "ISIN" AS isin, "Quartr Id"::text AS quartr_id
            FROM universe
            ORDER BY "Name" ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        // Rows without a provider id cannot be queried, so they are skipped.
        Ok(rows.iter().filter_map(Self::row_to_company).collect())
    }
}
