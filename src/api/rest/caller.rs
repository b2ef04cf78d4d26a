use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::caller::{AccountStatus, Caller, Role};

const USER_ID_HEADER: &str = "x-user-id";
const ROLE_HEADER: &str = "x-user-role";
const STATUS_HEADER: &str = "x-user-status";

/// The identity gateway in front of this service authenticates the request
/// and forwards the principal in trusted headers.
pub struct CallerIdentity(pub Caller);

#[async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)?
            .parse::<Uuid>()
            .map_err(|err| AppError::Unauthorized(format!("malformed {USER_ID_HEADER}: {err}")))?;
        let role = header(parts, ROLE_HEADER)?
            .parse::<Role>()
            .map_err(|err| AppError::Unauthorized(err.to_string()))?;
        let status = match parts.headers.get(STATUS_HEADER) {
            Some(_) => header(parts, STATUS_HEADER)?
                .parse::<AccountStatus>()
                .map_err(|err| AppError::Unauthorized(err.to_string()))?,
            None => AccountStatus::Active,
        };

        Ok(Self(Caller {
            user_id,
            role,
            status,
        }))
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, AppError> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| AppError::Unauthorized(format!("missing {name} header")))?
        .to_str()
        .map_err(|_| AppError::Unauthorized(format!("{name} header is not valid text")))
}
