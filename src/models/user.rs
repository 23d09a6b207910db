use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::CustomerRef;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub created_at: NaiveDateTime,
}

impl User {
    pub fn is_owner(&self) -> bool {
        self.role == Role::Owner
    }

    /// Chat room and notification key shared by a customer and the shop.
    pub fn channel_key(&self) -> String {
        customer_channel(&self.id)
    }

    pub fn to_ref(&self) -> CustomerRef {
        CustomerRef {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
        }
    }
}

pub fn customer_channel(customer_id: &str) -> String {
    format!("customer_{customer_id}")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Customer,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Owner => "owner",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "owner" => Role::Owner,
            _ => Role::Customer,
        }
    }
}
