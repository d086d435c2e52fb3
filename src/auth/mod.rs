/*!
 * # Actor identity
 *
 * Authentication happens upstream. The gateway forwards the verified identity in
 * three headers which are trusted as-is:
 *
 * - `X-Actor-Id`: user id (UUID)
 * - `X-Actor-Role`: `supervisor`, `vendor` or `admin`
 * - `X-Org-Id`: organization the actor acts for
 */

use crate::errors::ServiceError;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const ORG_ID_HEADER: &str = "x-org-id";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Role {
    Supervisor,
    Vendor,
    Admin,
}

/// Verified caller of a procurement operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
    pub org_id: i32,
}

impl Actor {
    pub fn new(id: Uuid, role: Role, org_id: i32) -> Self {
        Self { id, role, org_id }
    }

    pub fn supervisor(id: Uuid, org_id: i32) -> Self {
        Self::new(id, Role::Supervisor, org_id)
    }

    pub fn vendor(id: Uuid, org_id: i32) -> Self {
        Self::new(id, Role::Vendor, org_id)
    }

    pub fn admin(id: Uuid, org_id: i32) -> Self {
        Self::new(id, Role::Admin, org_id)
    }

    pub fn require(&self, role: Role) -> Result<(), ServiceError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "{} role required, caller is {}",
                role, self.role
            )))
        }
    }
}

/// Extractor for the gateway identity headers.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedActor(pub Actor);

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, ServiceError> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized(format!("missing {} header", name)))
}

impl AuthenticatedActor {
    pub fn from_parts(parts: &Parts) -> Result<Self, ServiceError> {
        let id = header(parts, ACTOR_ID_HEADER)?
            .parse::<Uuid>()
            .map_err(|_| ServiceError::Unauthorized("malformed actor id".to_string()))?;
        let role = header(parts, ACTOR_ROLE_HEADER)?
            .parse::<Role>()
            .map_err(|_| ServiceError::Unauthorized("unknown actor role".to_string()))?;
        let org_id = header(parts, ORG_ID_HEADER)?
            .parse::<i32>()
            .map_err(|_| ServiceError::Unauthorized("malformed organization id".to_string()))?;

        Ok(Self(Actor::new(id, role, org_id)))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedActor
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_parts(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn identity_headers_produce_an_actor() {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let parsed = AuthenticatedActor::from_parts(&parts(&[
            (ACTOR_ID_HEADER, id_str.as_str()),
            (ACTOR_ROLE_HEADER, "Vendor"),
            (ORG_ID_HEADER, "7"),
        ]))
        .unwrap();

        assert_eq!(parsed.0, Actor::vendor(id, 7));
    }

    #[test]
    fn missing_or_malformed_headers_are_unauthorized() {
        assert_matches!(
            AuthenticatedActor::from_parts(&parts(&[])),
            Err(ServiceError::Unauthorized(_))
        );

        let id = Uuid::new_v4().to_string();
        assert_matches!(
            AuthenticatedActor::from_parts(&parts(&[
                (ACTOR_ID_HEADER, id.as_str()),
                (ACTOR_ROLE_HEADER, "auditor"),
                (ORG_ID_HEADER, "1"),
            ])),
            Err(ServiceError::Unauthorized(_))
        );
    }

    #[test]
    fn require_rejects_other_roles() {
        let actor = Actor::supervisor(Uuid::new_v4(), 1);
        assert!(actor.require(Role::Supervisor).is_ok());
        assert_matches!(actor.require(Role::Admin), Err(ServiceError::Forbidden(_)));
    }
}
