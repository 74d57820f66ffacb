//! Request actor and ownership checks.

use crate::ids::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of an authenticated caller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Books services and posts jobs
    Customer,
    /// Offers services and quotes on jobs
    Provider,
    /// Back-office operator
    Admin,
    /// Background processes (auto-confirm, webhooks, payout sweep)
    System,
}

impl Role {
    /// Stable string form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Provider => "provider",
            Self::Admin => "admin",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "provider" => Ok(Self::Provider),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The authenticated identity performing an action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// User performing the action
    pub user_id: UserId,
    /// Role the user acts in
    pub role: Role,
}

impl Actor {
    /// A customer actor
    #[must_use]
    pub const fn customer(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Customer,
        }
    }

    /// A provider actor
    #[must_use]
    pub const fn provider(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Provider,
        }
    }

    /// An admin actor
    #[must_use]
    pub const fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    /// The system actor used by background processes
    #[must_use]
    pub fn system() -> Self {
        Self {
            user_id: UserId::from_uuid(uuid::Uuid::nil()),
            role: Role::System,
        }
    }

    /// Admin role
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// System role
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    /// Admins and system processes bypass ownership checks
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        self.is_admin() || self.is_system()
    }

    /// Which side of a customer/provider relationship this actor is on.
    ///
    /// A user who is both customer and provider on the same record is
    /// resolved by role.
    #[must_use]
    pub fn party_in(&self, customer_id: UserId, provider_id: UserId) -> Option<Party> {
        match self.role {
            Role::Customer if self.user_id == customer_id => Some(Party::Customer),
            Role::Provider if self.user_id == provider_id => Some(Party::Provider),
            _ => None,
        }
    }

    /// Whether the actor may see a record between these two users
    #[must_use]
    pub fn can_view(&self, customer_id: UserId, provider_id: UserId) -> bool {
        self.is_privileged() || self.user_id == customer_id || self.user_id == provider_id
    }
}

/// One side of a booking or job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    /// The customer side
    Customer,
    /// The provider side
    Provider,
}

impl Party {
    /// The other side
    #[must_use]
    pub const fn counterpart(self) -> Self {
        match self {
            Self::Customer => Self::Provider,
            Self::Provider => Self::Customer,
        }
    }
}
