use std::sync::Arc;

use super::Middleware;

/// Assemble the final chain of one route.
///
/// Order: the guard (only when the route requires auth), the controller's shared middlewares,
/// the route's markers in declaration order (validation already sits at the front), then the
/// middlewares attached directly to the route.
#[must_use]
pub fn compose(
    guard: Option<&Arc<dyn Middleware>>,
    requires_auth: bool,
    shared: &[Arc<dyn Middleware>],
    markers: &[Arc<dyn Middleware>],
    route_level: &[Arc<dyn Middleware>],
) -> Vec<Arc<dyn Middleware>> {
    let guard = guard.filter(|_| requires_auth);
    let mut chain =
        Vec::with_capacity(usize::from(guard.is_some()) + shared.len() + markers.len() + route_level.len());
    if let Some(guard) = guard {
        chain.push(Arc::clone(guard));
    }
    chain.extend(shared.iter().map(Arc::clone));
    chain.extend(markers.iter().map(Arc::clone));
    chain.extend(route_level.iter().map(Arc::clone));
    chain
}
