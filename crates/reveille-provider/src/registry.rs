//! Provider registry — creates provider instances from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info};

use crate::claude::ClaudeProvider;
use crate::codex::CodexProvider;
use crate::config::ProviderConfig;
use crate::types::Provider;

/// Instantiate providers for every configured name.
///
/// Unknown names are logged and skipped rather than failing the whole set.
pub fn build_providers(
    configs: &HashMap<String, ProviderConfig>,
) -> HashMap<String, Arc<dyn Provider>> {
    let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();

    for (name, config) in configs {
        let provider: Arc<dyn Provider> = match name.as_str() {
            "claude" => Arc::new(ClaudeProvider::new(config.clone())),
            "codex" => Arc::new(CodexProvider::new(config.clone())),
            other => {
                error!(provider = other, "unknown provider, skipping");
                continue;
            }
        };
        info!(provider = %name, "registered provider");
        providers.insert(name.clone(), provider);
    }

    providers
}
