//! Route registration building blocks
//!
//! [`RouteGroup`] is the batch registration surface handed to
//! `Server::register_routes` callbacks, [`RouteDescriptor`] describes a single
//! route for `Server::routes`, and [`Middleware`] erases any `tower::Layer`
//! that axum accepts so it can be stored and applied later.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::Request,
    handler::Handler,
    response::IntoResponse,
    routing::{on, MethodFilter, MethodRouter, Route},
    Router,
};
use tower::{Layer, Service};

use crate::error::{Error, Result};

/// HTTP methods accepted by route registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub(crate) fn filter(&self) -> MethodFilter {
        match self {
            HttpMethod::Get => MethodFilter::GET,
            HttpMethod::Post => MethodFilter::POST,
            HttpMethod::Put => MethodFilter::PUT,
            HttpMethod::Patch => MethodFilter::PATCH,
            HttpMethod::Delete => MethodFilter::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(Error::UnsupportedMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Scope {
    /// Every request passing through the router, matched or not
    Router,
    /// Only requests that matched one of the router's routes
    Routes,
}

type ApplyFn = dyn Fn(Router, Scope) -> Router + Send + Sync;

/// A stored middleware layer
#[derive(Clone)]
pub struct Middleware {
    apply: Arc<ApplyFn>,
}

impl Middleware {
    /// Wrap any layer axum's `Router::layer` accepts, e.g.
    /// `Middleware::new(axum::middleware::from_fn(auth))` or a `tower_http` layer.
    pub fn new<L>(layer: L) -> Self
    where
        L: Layer<Route> + Clone + Send + Sync + 'static,
        L::Service: Service<Request> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request>>::Response: IntoResponse + 'static,
        <L::Service as Service<Request>>::Error: Into<Infallible> + 'static,
        <L::Service as Service<Request>>::Future: Send + 'static,
    {
        Self {
            apply: Arc::new(move |router: Router, scope: Scope| match scope {
                Scope::Router => router.layer(layer.clone()),
                Scope::Routes => router.route_layer(layer.clone()),
            }),
        }
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Middleware")
    }
}

/// Wrap `router` so the first middleware in `middleware` runs first.
pub(crate) fn wrap_router(router: Router, middleware: &[Middleware]) -> Router {
    apply_in_order(router, middleware, Scope::Router)
}

/// Like [`wrap_router`], but only matched routes pass through the middleware.
/// `router` must contain at least one route.
pub(crate) fn wrap_routes(router: Router, middleware: &[Middleware]) -> Router {
    apply_in_order(router, middleware, Scope::Routes)
}

fn apply_in_order(router: Router, middleware: &[Middleware], scope: Scope) -> Router {
    // the last layer applied is the outermost one
    middleware
        .iter()
        .rev()
        .fold(router, |router, m| (m.apply)(router, scope))
}

/// A path-prefixed set of routes sharing middleware
pub struct RouteGroup {
    base: String,
    router: Router,
    middleware: Vec<Middleware>,
    routes: Vec<(HttpMethod, String)>,
}

impl RouteGroup {
    pub(crate) fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            router: Router::new(),
            middleware: Vec::new(),
            routes: Vec::new(),
        }
    }

    /// Prefix every route of this group is registered under
    pub fn base_path(&self) -> &str {
        &self.base
    }

    /// Add middleware to every route of the group, including ones registered earlier
    pub fn use_middleware(&mut self, middleware: impl IntoIterator<Item = Middleware>) -> &mut Self {
        self.middleware.extend(middleware);
        self
    }

    pub fn get<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.add(HttpMethod::Get, path, handler)
    }

    pub fn post<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.add(HttpMethod::Post, path, handler)
    }

    pub fn put<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.add(HttpMethod::Put, path, handler)
    }

    pub fn patch<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.add(HttpMethod::Patch, path, handler)
    }

    pub fn delete<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.add(HttpMethod::Delete, path, handler)
    }

    /// Register a route by method name.
    ///
    /// Unsupported methods are logged and nothing is registered.
    pub fn handle<H, T>(&mut self, method: &str, path: &str, handler: H) -> Result<&mut Self>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let method = parse_method(method)?;
        Ok(self.add(method, path, handler))
    }

    /// Routes registered so far, with their full paths
    pub fn routes(&self) -> &[(HttpMethod, String)] {
        &self.routes
    }

    fn add<H, T>(&mut self, method: HttpMethod, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let full = to_axum_path(&join_paths(&self.base, path));
        self.router = std::mem::take(&mut self.router).route(&full, on(method.filter(), handler));
        self.routes.push((method, full));
        self
    }

    /// The group's routes with its middleware applied, or `None` if it is empty
    pub(crate) fn into_router(self) -> Option<Router> {
        if self.routes.is_empty() {
            return None;
        }
        Some(wrap_routes(self.router, &self.middleware))
    }
}

impl fmt::Debug for RouteGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteGroup")
            .field("base", &self.base)
            .field("routes", &self.routes)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

type Endpoint = Box<dyn FnOnce(MethodFilter) -> MethodRouter + Send>;

/// One route for bulk registration: method, path, handler and the middleware
/// that wraps only this route.
pub struct RouteDescriptor {
    pub path: String,
    pub method: String,
    pub middleware: Vec<Middleware>,
    endpoint: Endpoint,
}

impl RouteDescriptor {
    pub fn new<H, T>(method: impl Into<String>, path: impl Into<String>, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        Self {
            path: path.into(),
            method: method.into(),
            middleware: Vec::new(),
            endpoint: Box::new(move |filter| on(filter, handler)),
        }
    }

    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Build a router holding just this route, wrapped in its middleware.
    pub(crate) fn into_router(self) -> Result<(HttpMethod, String, Router)> {
        let method = parse_method(&self.method)?;
        let path = to_axum_path(&self.path);
        let router = Router::new().route(&path, (self.endpoint)(method.filter()));
        Ok((method, path, wrap_routes(router, &self.middleware)))
    }
}

impl fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

pub(crate) fn parse_method(method: &str) -> Result<HttpMethod> {
    method.parse().inspect_err(|_| {
        tracing::warn!("Unsupported method: {}", method);
    })
}

/// Join a group prefix and a relative path with a single `/`.
/// A trailing slash on `relative` is kept.
pub fn join_paths(base: &str, relative: &str) -> String {
    if relative.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

/// Rewrite `:param` and `*rest` segments to axum's `{param}` / `{*rest}` form.
pub fn to_axum_path(path: &str) -> String {
    let segments: Vec<String> = path
        .trim_start_matches('/')
        .split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{}}}", name)
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{}}}", name)
            } else {
                segment.to_string()
            }
        })
        .collect();
    format!("/{}", segments.join("/"))
}
