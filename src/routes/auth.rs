use axum::{
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::Deserialize;
use tracing::debug;

use crate::{error::AppError, services::identity::Principal, state::SharedState};

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Caller identity proven by a signed token.
///
/// The token is read from the `Authorization: Bearer` header, or from the
/// `token` query parameter for clients that cannot set headers (EventSource).
#[derive(Debug, Clone)]
pub struct Authenticated(pub Principal);

impl FromRequestParts<SharedState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .or_else(|| query_token(parts))
            .ok_or_else(|| AppError::Unauthorized("missing identity token".into()))?;

        state.tokens().verify(&token).map(Authenticated).map_err(|err| {
            debug!(error = %err, "rejected identity token");
            AppError::Unauthorized(err.to_string())
        })
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn query_token(parts: &Parts) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(query)| query.token)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn parts(uri: &str, header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn header_wins_over_query() {
        let parts = parts("/sse/quiz/q1?token=fromquery", Some("Bearer fromheader"));
        assert_eq!(bearer_token(&parts).as_deref(), Some("fromheader"));
        assert_eq!(query_token(&parts).as_deref(), Some("fromquery"));
    }

    #[test]
    fn other_schemes_are_ignored() {
        let parts = parts("/quiz/q1", Some("Basic abc"));
        assert_eq!(bearer_token(&parts), None);
        assert_eq!(query_token(&parts), None);
    }
}
