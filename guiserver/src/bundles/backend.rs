//! Blocking bundle validation and import
//!
//! Both operations talk to the live environment and may take minutes, so the
//! deployer only ever calls them from a blocking worker thread.

use std::collections::BTreeMap;
use std::process::Command;
use std::time::Duration;

use anyhow::{bail, Context};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::bundles::models::Bundle;

/// Options forwarded to the import command
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Maximum time the whole import may take
    pub timeout: Duration,

    /// Time to wait for relations to settle
    pub rel_wait: Duration,

    /// Number of retries for failed unit hooks
    pub retry_count: u32,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2700),
            rel_wait: Duration::from_secs(60),
            retry_count: 0,
        }
    }
}

/// Blocking access to the environment a bundle is deployed into
pub trait BundleBackend: Send + Sync + 'static {
    /// Check the bundle can be deployed in the environment
    fn validate(&self, api_url: &str, password: &SecretString, bundle: &Bundle)
        -> anyhow::Result<()>;

    /// Deploy the bundle, returning once the import finished
    fn import_bundle(
        &self,
        api_url: &str,
        password: &SecretString,
        name: &str,
        bundle: &Bundle,
        options: &ImportOptions,
    ) -> anyhow::Result<()>;
}

/// Backend running an external deployer command
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: String,
}

impl CommandBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl BundleBackend for CommandBackend {
    fn validate(
        &self,
        _api_url: &str,
        _password: &SecretString,
        bundle: &Bundle,
    ) -> anyhow::Result<()> {
        check_structure(bundle)
    }

    fn import_bundle(
        &self,
        api_url: &str,
        password: &SecretString,
        name: &str,
        bundle: &Bundle,
        options: &ImportOptions,
    ) -> anyhow::Result<()> {
        let mut document = BTreeMap::new();
        document.insert(name, bundle);
        let contents = serde_yaml::to_string(&document).context("cannot serialize the bundle")?;

        let path = std::env::temp_dir().join(format!("guiserver-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents)
            .with_context(|| format!("cannot write {}", path.display()))?;

        info!("Importing bundle {} with {}", name, self.program);
        let output = Command::new(&self.program)
            .arg("-c")
            .arg(&path)
            .args(["-t", &options.timeout.as_secs().to_string()])
            .args(["-w", &options.rel_wait.as_secs().to_string()])
            .args(["--retry", &options.retry_count.to_string()])
            .arg(name)
            .env("JUJU_API_URL", api_url)
            .env("JUJU_API_PASSWORD", password.expose_secret())
            .output();

        if let Err(e) = std::fs::remove_file(&path) {
            warn!("Unable to remove {}: {}", path.display(), e);
        }

        let output = output.with_context(|| format!("cannot run {}", self.program))?;
        debug!("{} exited with {}", self.program, output.status);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} {}: {}", self.program, output.status, stderr.trim());
        }
        Ok(())
    }
}

/// Structural checks that do not need the environment
pub fn check_structure(bundle: &Bundle) -> anyhow::Result<()> {
    if bundle.services.is_empty() {
        bail!("the bundle does not define any services");
    }
    for (name, service) in &bundle.services {
        if service.charm.as_deref().map_or(true, str::is_empty) {
            bail!("service {} does not specify a charm", name);
        }
    }
    for endpoint in bundle.relation_endpoints() {
        let service = endpoint.split(':').next().unwrap_or_default();
        if !bundle.services.contains_key(service) {
            bail!("relation endpoint {} refers to an unknown service", endpoint);
        }
    }
    Ok(())
}
