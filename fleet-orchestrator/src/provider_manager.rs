use std::env;
use std::fs;
use std::sync::Arc;

use fleet_providers::ComputeProvider;

pub struct ProviderManager;

impl ProviderManager {
    /// Build the named provider from the environment. `None` when the name is unknown, the
    /// provider was compiled out, or its credentials are missing.
    pub fn get_provider(provider_name: &str) -> Option<Arc<dyn ComputeProvider>> {
        match provider_name.to_lowercase().as_str() {
            #[cfg(feature = "provider-scaleway")]
            "scaleway" => {
                let project_id = env::var("SCALEWAY_PROJECT_ID")
                    .ok()
                    .map(|s| s.trim().to_string())?;
                // Prefer *_FILE for secrets (Docker/K8s friendly), fallback to env var.
                let secret_key = env::var("SCALEWAY_SECRET_KEY_FILE")
                    .ok()
                    .and_then(|path| fs::read_to_string(path).ok())
                    .or_else(|| env::var("SCALEWAY_SECRET_KEY").ok())
                    .map(|s| s.trim().to_string())?;
                if project_id.is_empty() || secret_key.is_empty() {
                    return None;
                }
                let provider =
                    fleet_providers::scaleway::ScalewayProvider::new(project_id, secret_key)
                        .map_err(|e| tracing::error!("cannot build Scaleway client: {}", e))
                        .ok()?;
                Some(Arc::new(provider))
            }
            #[cfg(feature = "provider-mock")]
            "mock" => {
                let boot_polls = env::var("FLEET_MOCK_BOOT_POLLS")
                    .ok()
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(1);
                Some(Arc::new(
                    fleet_providers::mock::MockProvider::new().with_boot_polls(boot_polls),
                ))
            }
            _ => None,
        }
    }
}
