//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup. Routes can be collected
//! into [`Group`]s that share a path prefix and middleware; groups are
//! flattened into the per-method trees when they are added, so a grouped
//! route costs the same to look up as any other.
//!
//! Unmatched requests are answered here: `404 Not Found`, or
//! `405 Method Not Allowed` with an `Allow` header when the path exists under
//! other methods. Router-wide middleware ([`Router::layer`]) wraps that
//! dispatch, so it sees unmatched requests too.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use http::header::{ALLOW, HeaderValue};
use matchit::Router as MatchitRouter;

use crate::context::Context;
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{BoxedMiddleware, Middleware, compose};
use crate::service::Service;

/// The application router.
///
/// Build it once at startup and turn it into a [`Service`] with
/// [`into_service`](Router::into_service). Every builder method returns
/// `self` so registrations chain.
///
/// ```rust
/// use http::Method;
/// use strata::middleware::{AccessLog, Compress};
/// use strata::{Context, Group, Router};
///
/// fn get_user(ctx: &mut Context) {
///     let id = ctx.request.param("id").unwrap_or("unknown").to_owned();
///     let _ = ctx.response.write_json(&serde_json::json!({ "id": id }));
/// }
///
/// let service = Router::new()
///     .layer(AccessLog::new())
///     .on(Method::GET, "/health", |ctx: &mut Context| ctx.response.write_header(204))
///     .group(
///         Group::new("/api")
///             .layer(Compress::new())
///             .on(Method::GET, "/users/{id}", get_user),
///     )
///     .into_service();
/// ```
#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    middlewares: Vec<BoxedMiddleware>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax and are read back with
    /// [`Request::param`](crate::Request::param); `{*rest}` matches the
    /// remainder of the path.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`.
    pub fn on<H>(self, method: Method, path: &str, handler: H) -> Self
    where
        H: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.add(method, path, Arc::new(handler))
    }

    /// Adds middleware that runs for every request, matched or not. The
    /// first layer added is the outermost.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Adds every route of `group` (and its sub-groups).
    pub fn group(self, group: Group) -> Self {
        let mut routes = Vec::new();
        group.flatten("", &[], &mut routes);

        routes
            .into_iter()
            .fold(self, |router, (method, path, handler)| router.add(method, &path, handler))
    }

    fn add(mut self, method: Method, path: &str, handler: BoxedHandler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// The routing table wrapped in the router-wide middleware.
    pub fn into_handler(self) -> BoxedHandler {
        let dispatch: BoxedHandler = Arc::new(Dispatch { routes: self.routes });
        compose(dispatch, &self.middlewares)
    }

    pub fn into_service(self) -> Service {
        Service::new(self.into_handler())
    }
}

// ── Groups ────────────────────────────────────────────────────────────────────

/// Routes sharing a path prefix and middleware.
///
/// Group middleware wraps only the group's routes, inside the router's
/// middleware and inside any enclosing group's.
pub struct Group {
    prefix: String,
    middlewares: Vec<BoxedMiddleware>,
    routes: Vec<(Method, String, BoxedHandler)>,
    groups: Vec<Group>,
}

impl Group {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            middlewares: Vec::new(),
            routes: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Registers a route; `path` is relative to the group prefix.
    pub fn on<H>(mut self, method: Method, path: &str, handler: H) -> Self
    where
        H: Fn(&mut Context) + Send + Sync + 'static,
    {
        let handler: BoxedHandler = Arc::new(handler);
        self.routes.push((method, path.to_owned(), handler));
        self
    }

    /// Nests `group` under this group's prefix and middleware.
    pub fn group(mut self, group: Group) -> Self {
        self.groups.push(group);
        self
    }

    fn flatten(
        self,
        parent_prefix: &str,
        parent_middlewares: &[BoxedMiddleware],
        out: &mut Vec<(Method, String, BoxedHandler)>,
    ) {
        let prefix = join_path(parent_prefix, &self.prefix);
        let middlewares: Vec<BoxedMiddleware> =
            parent_middlewares.iter().chain(&self.middlewares).cloned().collect();

        for (method, path, handler) in self.routes {
            out.push((method, join_path(&prefix, &path), compose(handler, &middlewares)));
        }

        for group in self.groups {
            group.flatten(&prefix, &middlewares, out);
        }
    }
}

/// Joins two path segments with exactly one `/` between them, keeping a
/// trailing slash on `path`.
fn join_path(prefix: &str, path: &str) -> String {
    let joined = format!("/{prefix}/{path}");

    let mut out = String::with_capacity(joined.len());
    for c in joined.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }

    if out.len() > 1 && !path.ends_with('/') && out.ends_with('/') {
        out.pop();
    }

    out
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

struct Dispatch {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

enum Lookup {
    Found(BoxedHandler, HashMap<String, String>),
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

impl Dispatch {
    fn lookup(&self, method: &Method, path: &str) -> Lookup {
        let tree = match self.routes.get(method) {
            // HEAD is served by the GET route; hyper drops the body.
            None if *method == Method::HEAD => self.routes.get(&Method::GET),
            tree => tree,
        };

        if let Some(matched) = tree.and_then(|tree| tree.at(path).ok()) {
            let params = matched
                .params
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Lookup::Found(Arc::clone(matched.value), params);
        }

        let mut allowed: Vec<Method> = self
            .routes
            .iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(method, _)| method.clone())
            .collect();

        if allowed.is_empty() {
            return Lookup::NotFound;
        }

        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Lookup::MethodNotAllowed(allowed)
    }
}

impl Handler for Dispatch {
    fn call(&self, ctx: &mut Context) {
        match self.lookup(ctx.request.method(), ctx.request.path()) {
            Lookup::Found(handler, params) => {
                ctx.request.params = params;
                handler.call(ctx);
            }
            Lookup::MethodNotAllowed(allowed) => {
                let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    ctx.response.headers_mut().insert(ALLOW, value);
                }
                ctx.response.error(405);
            }
            Lookup::NotFound => ctx.response.error(404),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use http::StatusCode;

    use super::*;
    use crate::middleware::from_fn;
    use crate::middleware::testing::{context, get};
    use crate::transport::Capture;

    fn send(router: Router, req: http::Request<Bytes>) -> Capture {
        let app = router.into_handler();
        let (mut ctx, capture) = context(req);
        app.call(&mut ctx);
        ctx.response.complete().unwrap();
        capture
    }

    fn echo_param(ctx: &mut Context) {
        let id = ctx.request.param("id").unwrap_or("").to_owned();
        ctx.response.write_text(&id).unwrap();
    }

    #[test]
    fn routes_by_method_and_path() {
        let router = Router::new()
            .on(Method::GET, "/users/{id}", echo_param)
            .on(Method::POST, "/users", |ctx: &mut Context| ctx.response.write_header(201));

        let capture = send(router, get("/users/42"));

        assert_eq!(capture.status(), Some(StatusCode::OK));
        assert_eq!(capture.body(), b"42");
    }

    #[test]
    fn unknown_path_is_404() {
        let capture = send(Router::new().on(Method::GET, "/", echo_param), get("/nope"));

        assert_eq!(capture.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(capture.body(), b"Not Found\n");
    }

    #[test]
    fn wrong_method_is_405_with_allow() {
        let router = Router::new()
            .on(Method::PUT, "/users/{id}", echo_param)
            .on(Method::GET, "/users/{id}", echo_param);

        let req = http::Request::delete("/users/1").body(Bytes::new()).unwrap();
        let capture = send(router, req);

        assert_eq!(capture.status(), Some(StatusCode::METHOD_NOT_ALLOWED));
        assert_eq!(capture.headers().get(ALLOW).unwrap(), "GET, PUT");
    }

    #[test]
    fn head_uses_get_route() {
        let router = Router::new().on(Method::GET, "/users/{id}", echo_param);

        let req = http::Request::head("/users/7").body(Bytes::new()).unwrap();
        let capture = send(router, req);

        assert_eq!(capture.status(), Some(StatusCode::OK));
    }

    #[test]
    fn groups_prefix_routes_and_nest_middleware() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let tag = |name: &'static str| {
            let log = Arc::clone(&log);
            from_fn(move |ctx, next| {
                log.lock().unwrap().push(name);
                next.run(ctx);
            })
        };

        let router = Router::new().layer(tag("router")).group(
            Group::new("/api/")
                .layer(tag("api"))
                .group(Group::new("v1").layer(tag("v1")).on(Method::GET, "/users/{id}", echo_param)),
        );

        let capture = send(router, get("/api/v1/users/9"));

        assert_eq!(capture.body(), b"9");
        assert_eq!(*log.lock().unwrap(), ["router", "api", "v1"]);
    }

    #[test]
    fn router_middleware_sees_unmatched_requests() {
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        let router = Router::new().layer(from_fn(move |ctx, next| {
            *counter.lock().unwrap() += 1;
            next.run(ctx);
        }));

        send(router, get("/missing"));

        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    #[should_panic(expected = "invalid route")]
    fn conflicting_route_panics() {
        let _ = Router::new()
            .on(Method::GET, "/users/{id}", echo_param)
            .on(Method::GET, "/users/{name}", echo_param);
    }

    #[test]
    fn join_path_normalises_slashes() {
        assert_eq!(join_path("", "/users"), "/users");
        assert_eq!(join_path("/api/", "/users"), "/api/users");
        assert_eq!(join_path("api", "users/"), "/api/users/");
        assert_eq!(join_path("/api", ""), "/api");
        assert_eq!(join_path("", ""), "/");
    }
}
