use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TAX_RATE: Decimal = Decimal::from_parts(85, 0, 0, false, 1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub invoice_number: Option<String>,
    pub customer_id: String,
    pub appointment_id: Option<String>,
    pub items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub status: InvoiceStatus,
    pub payment_method: PaymentMethod,
    pub due_date: Option<NaiveDateTime>,
    pub paid_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: ItemCategory,
    #[serde(default = "default_quantity")]
    pub quantity: Decimal,
    #[serde(default)]
    pub unit_price: Decimal,
    /// Supplied by the caller; never recomputed from quantity and unit price.
    #[serde(default)]
    pub total: Decimal,
}

fn default_quantity() -> Decimal {
    Decimal::ONE
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemCategory {
    #[default]
    Labor,
    Parts,
    Diagnostic,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    #[default]
    Draft,
    Sent,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => InvoiceStatus::Sent,
            "paid" => InvoiceStatus::Paid,
            "overdue" => InvoiceStatus::Overdue,
            "cancelled" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Draft,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Online,
    Check,
    #[default]
    #[serde(rename = "")]
    Unspecified,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Online => "online",
            PaymentMethod::Check => "check",
            PaymentMethod::Unspecified => "",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "cash" => PaymentMethod::Cash,
            "card" => PaymentMethod::Card,
            "online" => PaymentMethod::Online,
            "check" => PaymentMethod::Check,
            _ => PaymentMethod::Unspecified,
        }
    }
}
