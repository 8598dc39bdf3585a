//! Extension points and their hook registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::BoxError;
use crate::pipeline::builder::AppBuilder;

/// Named extension points, in the order the worker emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionPoint {
    Init,
    ConfigureLogger,
    ConfigureBodyParser,
    ConfigureCookieParser,
    ConfigureSession,
    ConfigureStatic,
    ConfigureCache,
    ConfigureRouter,
    ConfigureRoutes,
    ConfigureErrorHandlers,
    ConfigureUnhandledErrorHandler,
    Start,
    Ready,
}

impl ExtensionPoint {
    pub const ALL: [ExtensionPoint; 13] = [
        ExtensionPoint::Init,
        ExtensionPoint::ConfigureLogger,
        ExtensionPoint::ConfigureBodyParser,
        ExtensionPoint::ConfigureCookieParser,
        ExtensionPoint::ConfigureSession,
        ExtensionPoint::ConfigureStatic,
        ExtensionPoint::ConfigureCache,
        ExtensionPoint::ConfigureRouter,
        ExtensionPoint::ConfigureRoutes,
        ExtensionPoint::ConfigureErrorHandlers,
        ExtensionPoint::ConfigureUnhandledErrorHandler,
        ExtensionPoint::Start,
        ExtensionPoint::Ready,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionPoint::Init => "init",
            ExtensionPoint::ConfigureLogger => "configure-logger",
            ExtensionPoint::ConfigureBodyParser => "configure-body-parser",
            ExtensionPoint::ConfigureCookieParser => "configure-cookie-parser",
            ExtensionPoint::ConfigureSession => "configure-session",
            ExtensionPoint::ConfigureStatic => "configure-static",
            ExtensionPoint::ConfigureCache => "configure-cache",
            ExtensionPoint::ConfigureRouter => "configure-router",
            ExtensionPoint::ConfigureRoutes => "configure-routes",
            ExtensionPoint::ConfigureErrorHandlers => "configure-error-handlers",
            ExtensionPoint::ConfigureUnhandledErrorHandler => "configure-unhandled-error-handler",
            ExtensionPoint::Start => "start",
            ExtensionPoint::Ready => "ready",
        }
    }
}

impl fmt::Display for ExtensionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a hook (or a stage) asks of the stages that depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageOutcome {
    #[default]
    Continue,
    /// Veto: dependents skip their default action.
    Skip,
}

pub type HookFuture<'a> = BoxFuture<'a, Result<StageOutcome, BoxError>>;

type HookFn = Arc<dyn for<'a> Fn(&'a mut AppBuilder) -> HookFuture<'a> + Send + Sync>;

/// Ordered hook callbacks per extension point.
///
/// Any number of hooks may be attached to a point; they run in registration
/// order.
#[derive(Clone, Default)]
pub struct Hooks {
    by_point: HashMap<ExtensionPoint, Vec<HookFn>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a hook to `point`.
    ///
    /// ```ignore
    /// hooks.on(ExtensionPoint::ConfigureCache, |_app| {
    ///     Box::pin(async { Ok(StageOutcome::Skip) })
    /// });
    /// ```
    pub fn on<F>(&mut self, point: ExtensionPoint, hook: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut AppBuilder) -> HookFuture<'a> + Send + Sync + 'static,
    {
        self.by_point.entry(point).or_default().push(Arc::new(hook));
        self
    }

    /// Number of hooks attached to `point`.
    pub fn count(&self, point: ExtensionPoint) -> usize {
        self.by_point.get(&point).map_or(0, Vec::len)
    }

    /// Run every hook attached to `point`.
    ///
    /// All hooks run even after one vetoes; the result is `Skip` if any did.
    /// The first error stops the emit.
    pub async fn emit(
        &self,
        point: ExtensionPoint,
        app: &mut AppBuilder,
    ) -> Result<StageOutcome, BoxError> {
        let Some(hooks) = self.by_point.get(&point) else {
            return Ok(StageOutcome::Continue);
        };
        let mut outcome = StageOutcome::Continue;
        for hook in hooks {
            if hook(&mut *app).await? == StageOutcome::Skip {
                tracing::debug!(point = %point, "Hook vetoed default action");
                outcome = StageOutcome::Skip;
            }
        }
        Ok(outcome)
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for point in ExtensionPoint::ALL {
            let count = self.count(point);
            if count > 0 {
                map.entry(&point.as_str(), &count);
            }
        }
        map.finish()
    }
}
