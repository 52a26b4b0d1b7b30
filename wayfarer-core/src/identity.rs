use serde::{Deserialize, Serialize};

status_enum! {
    /// Role carried in the access token.
    Role {
        User => "user",
        Vendor => "vendor",
        Admin => "admin",
    }
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new(id, Role::User)
    }

    pub fn vendor(id: impl Into<String>) -> Self {
        Self::new(id, Role::Vendor)
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_vendor(&self) -> bool {
        self.role == Role::Vendor
    }

    /// Label written to the audit trail.
    pub fn label(&self) -> String {
        format!("{}:{}", self.role, self.id)
    }
}
