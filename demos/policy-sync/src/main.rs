//! Policy sync demo.
//!
//! # Purpose
//! Wires configuration, logging, the Postgres adapter and a casbin enforcer,
//! then walks through the adapter's lifecycle against a real database.
//!
//! # High-level flow
//! 1. Load adapter config from `CASBIN_PG_*` env vars (optional YAML override).
//! 2. Build an enforcer over the default RBAC model; this loads stored rules.
//! 3. Seed a few rules when the table is empty (auto-saved one by one).
//! 4. Check a couple of requests, then save the whole policy (replace-all).
//! 5. Rebuild the enforcer from storage and confirm the decisions survive.
mod observability;

use anyhow::{Context, Result};
use casbin::{CoreApi, Enforcer, MgmtApi};
use casbin_pg_adapter::model::default_model;
use casbin_pg_adapter::{AdapterConfig, PgAdapter};

const REQUESTS: [(&str, &str, &str); 3] = [
    ("alice", "data1", "read"),
    ("alice", "data1", "write"),
    ("bob", "data2", "write"),
];

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();
    let config = AdapterConfig::from_env_or_yaml().context("adapter config")?;
    tracing::info!(
        table = %config.table_name,
        database_specified = config.database_specified,
        "starting policy sync demo"
    );

    let mut enforcer = build_enforcer(&config).await?;
    if enforcer.get_policy().is_empty() {
        seed(&mut enforcer).await?;
    }
    report(&enforcer)?;

    enforcer.save_policy().await.context("save policy")?;
    tracing::info!(rules = enforcer.get_policy().len(), "policy saved");

    let reloaded = build_enforcer(&config).await?;
    report(&reloaded)?;
    Ok(())
}

async fn build_enforcer(config: &AdapterConfig) -> Result<Enforcer> {
    let model = default_model().await.context("parse model")?;
    let adapter = PgAdapter::new(config.clone())?;
    let enforcer = Enforcer::new(model, adapter)
        .await
        .context("load policy")?;
    tracing::info!(
        rules = enforcer.get_policy().len(),
        groupings = enforcer.get_grouping_policy().len(),
        "enforcer ready"
    );
    Ok(enforcer)
}

async fn seed(enforcer: &mut Enforcer) -> Result<()> {
    let rules = [
        ["data1_admin", "data1", "read"],
        ["data1_admin", "data1", "write"],
        ["bob", "data2", "write"],
    ];
    for rule in rules {
        enforcer
            .add_policy(rule.iter().map(|v| v.to_string()).collect())
            .await
            .context("add policy")?;
    }
    enforcer
        .add_grouping_policy(vec!["alice".to_string(), "data1_admin".to_string()])
        .await
        .context("add grouping")?;
    tracing::info!("seeded demo policy");
    Ok(())
}

fn report(enforcer: &Enforcer) -> Result<()> {
    for (sub, obj, act) in REQUESTS {
        let allowed = enforcer.enforce((sub, obj, act))?;
        tracing::info!(sub, obj, act, allowed, "decision");
    }
    Ok(())
}
