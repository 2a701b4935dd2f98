//! Default RBAC model shipped with the adapter.
use casbin::DefaultModel;

// Embed the casbin model so deployments don't need a separate config file.
pub const MODEL_CONF: &str = include_str!("model.conf");

/// Parse [`MODEL_CONF`] into a fresh casbin model.
pub async fn default_model() -> casbin::Result<DefaultModel> {
    DefaultModel::from_str(MODEL_CONF).await
}
