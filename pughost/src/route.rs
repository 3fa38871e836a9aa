use tracing::{debug, info};

use crate::control::{ControlApi, RouteSpec};
use crate::error::{Error, Result};
use crate::scenario::ScenarioStore;

/// The single route this tool manages. Any previous route of this name is
/// replaced on startup.
pub const ROUTE_NAME: &str = "pughost";

impl RouteSpec {
    /// Route from `localhost:<proxyPort>` to the store's upstream.
    pub fn for_store(store: &ScenarioStore) -> Self {
        Self::new(
            ROUTE_NAME,
            format!("localhost:{}", store.proxy_port),
            store.upstream.clone(),
        )
    }
}

/// Replace any route named `spec.name` with `spec`.
///
/// A failed delete is ignored (the route usually does not exist). A failed
/// create is fatal.
pub async fn ensure_route(api: &ControlApi, spec: &RouteSpec) -> Result<()> {
    match api.delete_proxy(&spec.name).await {
        Ok(()) => debug!(route = %spec.name, "removed stale route"),
        Err(err) => debug!(route = %spec.name, "no stale route to remove: {err}"),
    }

    api.create_proxy(spec)
        .await
        .map_err(|source| Error::RouteConfig {
            route: spec.name.clone(),
            source,
        })?;

    info!(route = %spec.name, "{} -> {}", spec.listen, spec.upstream);
    Ok(())
}
