//! Route registration: a vector walked in insertion order, glob
//! patterns matched with [`crate::fnmatch::fnmatch`], plus the built-in
//! 404 fallback route reachable implicitly when nothing else claims a
//! request.

use crate::http::Session;

/// Status a route handler returns for a given session state. Legality
/// per state is enforced by the session engine in `http.rs`, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStatus {
    Error,
    Close,
    NotFound,
    Found,
    Next,
    Done,
    More,
}

/// A route handler: called once per session state transition for as
/// long as the route owns the session.
pub trait RouteHandler: Send + Sync {
    fn call(&self, sess: &mut Session, state: crate::http::SessionState) -> RouteStatus;
}

impl<F> RouteHandler for F
where
    F: Fn(&mut Session, crate::http::SessionState) -> RouteStatus + Send + Sync,
{
    fn call(&self, sess: &mut Session, state: crate::http::SessionState) -> RouteStatus {
        (self)(sess, state)
    }
}

/// A single registered route. `pattern` is borrowed, not copied — routes
/// are registered once at startup and live for the server's lifetime,
/// mirroring the original's `ews_route_append` (which stores the pattern
/// pointer as-is, with a comment that it is "not copied").
pub struct Route {
    pub pattern: &'static str,
    pub handler: Box<dyn RouteHandler>,
}

/// The registered route list, walked in insertion order on every
/// `REQUEST_BEGIN`, with the built-in 404 fallback always reachable one
/// past the end so a walk that exhausts every registered pattern still
/// lands somewhere.
pub struct RouteList {
    routes: Vec<Route>,
    fallback: Route,
}

impl Default for RouteList {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteList {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            fallback: not_found_route(),
        }
    }

    pub fn append(&mut self, pattern: &'static str, handler: impl RouteHandler + 'static) {
        self.routes.push(Route {
            pattern,
            handler: Box::new(handler),
        });
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }

    /// Registered routes only, in insertion order — the fallback is not
    /// included since callers pattern-match it separately at `len()`.
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Fetch a route by index, where `len()` itself addresses the
    /// built-in fallback — the one index always valid no matter how
    /// many routes are registered.
    pub fn get(&self, idx: usize) -> &Route {
        if idx < self.routes.len() {
            &self.routes[idx]
        } else {
            &self.fallback
        }
    }

    /// All patterns worth trying for a request, registered routes first
    /// then the fallback, paired with the index `get()` expects back.
    pub fn patterns(&self) -> impl Iterator<Item = (usize, &'static str)> + '_ {
        self.routes
            .iter()
            .map(|r| r.pattern)
            .chain(std::iter::once(self.fallback.pattern))
            .enumerate()
    }
}

fn not_found_handler(sess: &mut Session, state: crate::http::SessionState) -> RouteStatus {
    use crate::http::SessionState::*;
    match state {
        RequestBegin => RouteStatus::Found,
        RequestHeader | RequestBody => RouteStatus::Next,
        ResponseBegin => {
            sess.error(404, "Not Found");
            RouteStatus::Done
        }
        _ => RouteStatus::Done,
    }
}

/// The built-in immutable fallback route, consulted only when no
/// registered route both matches the path and returns `Found`.
pub fn not_found_route() -> Route {
    Route {
        pattern: "*",
        handler: Box::new(not_found_handler),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fnmatch::fnmatch;

    #[test]
    fn list_preserves_insertion_order() {
        let mut list = RouteList::new();
        list.append("/a", |_: &mut Session, _| RouteStatus::Found);
        list.append("/b", |_: &mut Session, _| RouteStatus::Found);
        let patterns: Vec<&str> = list.iter().map(|r| r.pattern).collect();
        assert_eq!(patterns, vec!["/a", "/b"]);
    }

    #[test]
    fn not_found_route_matches_everything() {
        let route = not_found_route();
        assert!(fnmatch(route.pattern, "/anything/at/all"));
    }
}
