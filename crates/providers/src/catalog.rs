//! Model catalog and policy-driven resolution.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tether_domain::config::ModelPolicy;
use tether_domain::{Error, Result};

use crate::provider::ModelProvider;

/// One model advertised by a registered provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Model id (e.g. `"mock-small"`).
    pub id: String,
    /// Name of the provider instance that serves it.
    pub provider: String,
    pub supports_tools: bool,
    pub supports_vision: bool,
    /// Blended cost per million tokens, used for cheapest-first ordering.
    pub cost_per_mtok_usd: f64,
}

/// The outcome of model resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub primary: ModelRecord,
}

/// Registry of providers and the models they serve.
#[derive(Default)]
pub struct ProviderKit {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    records: Vec<ModelRecord>,
}

impl ProviderKit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider together with the models it advertises.
    pub fn register(&mut self, provider: Arc<dyn ModelProvider>, records: Vec<ModelRecord>) {
        self.providers.insert(provider.name().to_string(), provider);
        self.records.extend(records);
    }

    pub fn list_model_records(&self) -> Vec<ModelRecord> {
        self.records.clone()
    }

    pub fn provider(&self, name: &str) -> Result<Arc<dyn ModelProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Model(format!("no provider named '{name}'")))
    }

    /// Resolve the model for a run/turn against the policy.
    pub fn resolve(&self, policy: &ModelPolicy) -> Result<Resolution> {
        resolve(&self.records, policy)
    }
}

/// Filter the records by the policy constraints, then pick the first
/// preferred model present, else the cheapest candidate.
pub fn resolve(records: &[ModelRecord], policy: &ModelPolicy) -> Result<Resolution> {
    let candidates: Vec<&ModelRecord> = records
        .iter()
        .filter(|r| !policy.require_tools || r.supports_tools)
        .filter(|r| !policy.require_vision || r.supports_vision)
        .filter(|r| {
            policy
                .max_cost_usd
                .map(|max| r.cost_per_mtok_usd <= max)
                .unwrap_or(true)
        })
        .collect();

    if candidates.is_empty() {
        return Err(Error::Model(
            "no model satisfies the configured policy".into(),
        ));
    }

    for preferred in &policy.preferred_models {
        if let Some(hit) = candidates.iter().find(|r| &r.id == preferred) {
            return Ok(Resolution {
                primary: (*hit).clone(),
            });
        }
    }

    let cheapest = candidates.iter().min_by(|a, b| {
        a.cost_per_mtok_usd
            .partial_cmp(&b.cost_per_mtok_usd)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    match cheapest {
        Some(record) => Ok(Resolution {
            primary: (*record).clone(),
        }),
        None => Err(Error::Model(
            "no model satisfies the configured policy".into(),
        )),
    }
}
