use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::clock::SalonClock;
use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::{self, NotifyHub};

/// Manages per-tenant engines. Each tenant is one salon with its own
/// Engine, WAL, compactor and notice log.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    clock: SalonClock,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, clock: SalonClock) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            clock,
        }
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        // Two connections may race to open the same tenant; only one wins.
        let entry = match self.engines.entry(tenant.to_string()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(vacant) => vacant,
        };

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, self.clock, notify.clone())?);

        tokio::spawn(notify::run_notice_log(tenant.to_string(), notify.subscribe()));
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        entry.insert(engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!(tenant, "salon loaded");
        Ok(engine)
    }
}
