pub mod auth;
pub mod location;
pub mod map;
pub mod stats;

use actix_web::HttpResponse;
use serde::Serialize;
use uuid::Uuid;

use crate::middleware::auth::Claims;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Pull the authenticated user id out of the JWT claims, or produce the 401
/// the handler should return. Claims are always present behind the auth
/// middleware; a malformed subject means a token we never issued.
pub fn authenticated_user(claims: &Claims) -> Result<Uuid, HttpResponse> {
    claims.user_id().map_err(|_| {
        log::warn!("❌ Token subject is not a valid user id");
        HttpResponse::Unauthorized().json(ErrorResponse::new("Invalid token subject"))
    })
}
