use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    Rider,
    Driver,
    Admin,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccountStatus {
    Active,
    Pending,
    Suspended,
}

/// The authenticated principal on whose behalf an operation runs. Supplied by
/// the identity collaborator; never constructed from unverified input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub role: Role,
    pub status: AccountStatus,
}

impl Caller {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            role,
            status: AccountStatus::Active,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_role(&self, role: Role) -> Result<(), AppError> {
        if self.role != role {
            return Err(AppError::Unauthorized(format!(
                "{} role required, caller is {}",
                role, self.role
            )));
        }
        if self.status != AccountStatus::Active {
            return Err(AppError::Unauthorized(format!(
                "account {} is {:?}",
                self.user_id, self.status
            )));
        }
        Ok(())
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        self.require_role(Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Rider => "rider",
            Role::Driver => "driver",
            Role::Admin => "admin",
        };
        f.write_str(name)
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rider" | "user" => Ok(Role::Rider),
            "driver" => Ok(Role::Driver),
            "admin" => Ok(Role::Admin),
            other => Err(AppError::InvalidArgument(format!("unknown role: {other}"))),
        }
    }
}

impl FromStr for AccountStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(AccountStatus::Active),
            "pending" => Ok(AccountStatus::Pending),
            "suspended" => Ok(AccountStatus::Suspended),
            other => Err(AppError::InvalidArgument(format!(
                "unknown account status: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspended_caller_fails_role_check() {
        let mut caller = Caller::new(Uuid::new_v4(), Role::Rider);
        caller.status = AccountStatus::Suspended;
        assert!(matches!(
            caller.require_role(Role::Rider),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn legacy_user_role_parses_as_rider() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::Rider);
        assert!("pilot".parse::<Role>().is_err());
    }
}
