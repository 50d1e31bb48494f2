//! Deployer request handlers
//!
//! Each view checks the user is logged in, then validates its parameters,
//! and only then calls the deployer. Views return the `Response` payload on
//! success and the `Error` message on failure.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::authn::user::User;
use crate::bundles::deployer::Deployer;
use crate::bundles::models::{DeploymentId, WatcherId};
use crate::bundles::utils::{prepare_bundle, select_bundle};

/// Result of a view: the response payload or an error message
pub type ViewResult = Result<Value, String>;

/// Context of a deployer request
#[derive(Debug, Clone)]
pub struct Request {
    pub params: Value,
    pub user: User,
}

#[derive(Debug, Deserialize)]
struct ImportParams {
    #[serde(rename = "Name", default)]
    name: Option<String>,

    #[serde(rename = "YAML")]
    yaml: String,

    #[serde(rename = "BundleID", default)]
    bundle_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeploymentParams {
    #[serde(rename = "DeploymentId")]
    deployment_id: DeploymentId,
}

#[derive(Debug, Deserialize)]
struct WatcherParams {
    #[serde(rename = "WatcherId")]
    watcher_id: WatcherId,
}

fn invalid(reason: impl std::fmt::Display) -> String {
    format!("invalid request: {}", reason)
}

fn require_authenticated_user(request: &Request) -> Result<(), String> {
    if request.user.is_authenticated {
        Ok(())
    } else {
        Err("unauthorized access: no user logged in".to_string())
    }
}

fn parse_params<T: DeserializeOwned>(request: &Request) -> Result<T, String> {
    serde_json::from_value(request.params.clone())
        .map_err(|e| invalid(format!("invalid data parameters: {}", e)))
}

/// Validate a bundle and schedule its deployment
pub async fn import_bundle(request: Request, deployer: &Deployer) -> ViewResult {
    require_authenticated_user(&request)?;
    let params: ImportParams = parse_params(&request)?;

    let (name, mut bundle) = select_bundle(&params.yaml, params.name.as_deref()).map_err(invalid)?;
    prepare_bundle(&mut bundle).map_err(invalid)?;

    if let Some(err) = deployer.validate(&request.user, &name, &bundle).await {
        return Err(invalid(err));
    }

    let deployment_id = deployer.import_bundle(&request.user, &name, bundle, params.bundle_id, None);
    debug!("Import of {} requested by {}", name, request.user.username);
    Ok(json!({"DeploymentId": deployment_id}))
}

/// Start watching a deployment
pub async fn watch(request: Request, deployer: &Deployer) -> ViewResult {
    require_authenticated_user(&request)?;
    let params: DeploymentParams = parse_params(&request)?;

    let watcher_id = deployer
        .watch(params.deployment_id)
        .ok_or_else(|| invalid("deployment not found"))?;
    Ok(json!({"WatcherId": watcher_id}))
}

/// Wait for the next deployment changes
pub async fn next(request: Request, deployer: &Deployer) -> ViewResult {
    require_authenticated_user(&request)?;
    let params: WatcherParams = parse_params(&request)?;

    let changes = deployer
        .next(params.watcher_id)
        .await
        .ok_or_else(|| invalid("invalid watcher identifier"))?;
    Ok(json!({"Changes": changes}))
}

/// Cancel a scheduled deployment
pub async fn cancel(request: Request, deployer: &Deployer) -> ViewResult {
    require_authenticated_user(&request)?;
    let params: DeploymentParams = parse_params(&request)?;

    match deployer.cancel(params.deployment_id) {
        Some(err) => Err(invalid(err)),
        None => Ok(json!({})),
    }
}

/// Last known change of every deployment
pub async fn status(request: Request, deployer: &Deployer) -> ViewResult {
    require_authenticated_user(&request)?;
    Ok(json!({"LastChanges": deployer.status()}))
}
