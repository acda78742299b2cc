//! Principal Contract
//! Mission: typed, explicitly-passed caller identity, never trusted from ambient headers

use serde::{Deserialize, Serialize};

/// Roles attested by the upstream IAM adapter. The core never infers a role from a
/// caller-supplied header; it only ever sees a `Principal` built from validated claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Merchant,
    OpsAdmin,
    PlatformAdmin,
    FinanceAdmin,
    ComplianceAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Merchant => "merchant",
            Role::OpsAdmin => "ops_admin",
            Role::PlatformAdmin => "platform_admin",
            Role::FinanceAdmin => "finance_admin",
            Role::ComplianceAdmin => "compliance_admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "customer" => Some(Role::Customer),
            "merchant" => Some(Role::Merchant),
            "ops_admin" => Some(Role::OpsAdmin),
            "platform_admin" => Some(Role::PlatformAdmin),
            "finance_admin" => Some(Role::FinanceAdmin),
            "compliance_admin" => Some(Role::ComplianceAdmin),
            _ => None,
        }
    }

    pub fn is_finance_admin(&self) -> bool {
        matches!(self, Role::FinanceAdmin)
    }
}

/// The authenticated, role-bearing identity attached to a mutating request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub actor_id: String,
    pub role: Role,
    pub tenant: String,
}

impl Principal {
    pub fn new(actor_id: impl Into<String>, role: Role, tenant: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            role,
            tenant: tenant.into(),
        }
    }
}
