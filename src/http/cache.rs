//! No-cache headers for dynamic responses.

use axum::http::{header, HeaderValue};
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::set_header::SetResponseHeaderLayer;

pub const CACHE_CONTROL_VALUE: &str = "no-cache, no-store, must-revalidate";

type SetHeader = SetResponseHeaderLayer<HeaderValue>;

pub type NoCacheLayer = Stack<SetHeader, Stack<SetHeader, Stack<SetHeader, Identity>>>;

/// Adds `Cache-Control`, `Pragma` and `Expires`, unless the handler set them.
pub fn no_cache_layer() -> NoCacheLayer {
    ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_VALUE),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::EXPIRES,
            HeaderValue::from_static("0"),
        ))
        .into_inner()
}
