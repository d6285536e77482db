//! Tenant policy: which tables are isolated and when the discriminator applies.

use std::collections::BTreeSet;

use crate::id::TenantId;
use crate::table::AppTable;

/// Static tenant-isolation policy for one engine.
///
/// A table is isolated unless it is in the shared set. Isolated tables carry
/// the tenant column on every record; reads are constrained to the policy's
/// tenant and writes are stamped with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantPolicy {
    tenant: TenantId,
    tenant_column: String,
    shared: BTreeSet<String>,
}

impl TenantPolicy {
    pub const DEFAULT_TENANT_COLUMN: &'static str = "app_id";

    /// Policy for `tenant` with the application's shared tables.
    pub fn new(tenant: impl Into<TenantId>) -> Self {
        Self {
            tenant: tenant.into(),
            tenant_column: Self::DEFAULT_TENANT_COLUMN.to_string(),
            shared: AppTable::shared().map(|t| t.as_str().to_string()).collect(),
        }
    }

    pub fn with_tenant_column(mut self, column: impl Into<String>) -> Self {
        self.tenant_column = column.into();
        self
    }

    /// Replace the shared-table set.
    pub fn with_shared_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Add one table to the shared set.
    pub fn share(mut self, table: impl Into<String>) -> Self {
        self.shared.insert(table.into());
        self
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn tenant_column(&self) -> &str {
        &self.tenant_column
    }

    pub fn shared_tables(&self) -> impl Iterator<Item = &str> {
        self.shared.iter().map(String::as_str)
    }

    pub fn is_isolated(&self, table: &str) -> bool {
        !self.shared.contains(table)
    }

    /// Whether the tenant discriminator is injected for this call.
    pub fn should_inject(&self, table: &str, skip_tenant_filter: bool) -> bool {
        self.is_isolated(table) && !skip_tenant_filter && !self.tenant.is_empty()
    }

    /// A copy of this policy serving another tenant.
    pub fn for_tenant(&self, tenant: impl Into<TenantId>) -> Self {
        Self {
            tenant: tenant.into(),
            ..self.clone()
        }
    }
}
