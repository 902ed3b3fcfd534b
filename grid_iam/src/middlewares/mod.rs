//! HTTP middleware surface
//!
//! Thin axum layer over the IAM service: authenticates the request, parks
//! the [`Principal`] in request extensions for handlers, and renders every
//! authentication failure as a single opaque unauthenticated response so
//! clients cannot probe which check rejected them. Sub-reasons are logged
//! server-side.

use std::sync::Arc;

use axum::{
  extract::{Request, State},
  http::StatusCode,
  middleware::Next,
  response::{IntoResponse, Response},
  Router,
};
use tower::ServiceBuilder;
use tower_http::{
  trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
  LatencyUnit,
};
use tracing::Level;

use crate::auth::AuthRequest;
use crate::error::IamError;
use crate::models::Principal;
use crate::service::IamService;

/// Map a domain error onto the HTTP status the handler layer renders.
pub fn status_for(err: &IamError) -> StatusCode {
  match err {
    IamError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
    IamError::NotFound(_) => StatusCode::NOT_FOUND,
    IamError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
    IamError::AlreadyAssigned(_)
    | IamError::VersionMismatch { .. }
    | IamError::RoleInUse(_)
    | IamError::UniqueViolation(_) => StatusCode::CONFLICT,
    IamError::Enforcer(_) | IamError::Store(_) | IamError::Init(_) | IamError::Internal(_) => {
      StatusCode::INTERNAL_SERVER_ERROR
    }
  }
}

fn unauthenticated() -> Response {
  (StatusCode::UNAUTHORIZED, "unauthenticated").into_response()
}

/// Authenticate the request and expose the resulting [`Principal`] through
/// request extensions. Intended for `axum::middleware::from_fn_with_state`.
pub async fn authenticate_middleware(
  State(service): State<Arc<IamService>>,
  mut req: Request,
  next: Next,
) -> Response {
  let auth_request = AuthRequest::new(req.headers().clone());
  match service.authenticate_request(&auth_request).await {
    Ok(Some(principal)) => {
      req.extensions_mut().insert::<Principal>(principal);
      next.run(req).await
    }
    Ok(None) => unauthenticated(),
    Err(err) if err.is_authentication_failure() => {
      tracing::warn!(error = %err, "request rejected");
      unauthenticated()
    }
    Err(err) => {
      tracing::error!(error = %err, "authentication pipeline error");
      (status_for(&err), "internal error").into_response()
    }
  }
}

/// Apply common observability middleware to a router.
pub trait SetLayer {
  fn set_layer(self) -> Self;
}

impl<S> SetLayer for Router<S>
where
  S: Clone + Send + Sync + 'static,
{
  fn set_layer(self) -> Self {
    self.layer(
      ServiceBuilder::new().layer(
        TraceLayer::new_for_http()
          .make_span_with(DefaultMakeSpan::new())
          .on_request(DefaultOnRequest::new().level(Level::INFO))
          .on_response(
            DefaultOnResponse::new()
              .level(Level::INFO)
              .latency_unit(LatencyUnit::Micros),
          ),
      ),
    )
  }
}
