use chrono::{NaiveDateTime, Utc};
use rusqlite::Connection;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Invoice, InvoiceStatus, LineItem, PaymentMethod, DEFAULT_TAX_RATE};
use crate::services::lifecycle::parse_appointment_date;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Two-place currency rounding, halves away from zero.
pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn amount_out_of_range() -> AppError {
    AppError::Validation("invoice amounts are out of range".to_string())
}

/// Rebuilds subtotal, tax and total from the line items, tax rate and discount.
/// The total is not floored, so a discount larger than the bill goes negative.
/// Leaves the invoice untouched and returns `Validation` if any step overflows.
pub fn recompute_totals(invoice: &mut Invoice) -> Result<(), AppError> {
    let subtotal = invoice
        .items
        .iter()
        .try_fold(Decimal::ZERO, |acc, item| acc.checked_add(item.total))
        .ok_or_else(amount_out_of_range)?;
    let tax = subtotal
        .checked_mul(invoice.tax_rate)
        .and_then(|v| v.checked_div(HUNDRED))
        .map(round_currency)
        .ok_or_else(amount_out_of_range)?;
    let total = subtotal
        .checked_add(tax)
        .and_then(|v| v.checked_sub(invoice.discount))
        .map(round_currency)
        .ok_or_else(amount_out_of_range)?;

    invoice.subtotal = subtotal;
    invoice.tax = tax;
    invoice.total = total;
    Ok(())
}

pub fn generate_invoice_number(now: &NaiveDateTime) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("INV-{}-{suffix}", now.format("%Y%m%d"))
}

/// The only path by which invoices reach storage.
pub fn save_invoice(conn: &Connection, invoice: &mut Invoice) -> Result<(), AppError> {
    let now = Utc::now().naive_utc();
    if invoice.invoice_number.is_none() {
        invoice.invoice_number = Some(generate_invoice_number(&now));
    }
    if invoice.status == InvoiceStatus::Paid && invoice.paid_at.is_none() {
        invoice.paid_at = Some(now);
    }
    invoice.updated_at = now;
    recompute_totals(invoice)?;
    queries::upsert_invoice(conn, invoice)?;
    Ok(())
}

fn parse_due_date(raw: Option<String>) -> Result<Option<NaiveDateTime>, AppError> {
    raw.map(|s| {
        parse_appointment_date(&s).ok_or_else(|| AppError::Validation(format!("invalid due_date: {s}")))
    })
    .transpose()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewInvoice {
    pub customer_id: String,
    pub appointment_id: Option<String>,
    #[serde(default)]
    pub items: Vec<LineItem>,
    pub tax_rate: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub status: Option<InvoiceStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub due_date: Option<String>,
    pub notes: Option<String>,
}

pub fn create_invoice(conn: &Connection, req: NewInvoice) -> Result<Invoice, AppError> {
    if queries::get_user(conn, &req.customer_id)?.is_none() {
        return Err(AppError::Validation(format!(
            "unknown customer: {}",
            req.customer_id
        )));
    }

    let now = Utc::now().naive_utc();
    let mut invoice = Invoice {
        id: uuid::Uuid::new_v4().to_string(),
        invoice_number: None,
        customer_id: req.customer_id,
        appointment_id: req.appointment_id,
        items: req.items,
        subtotal: Decimal::ZERO,
        tax_rate: req.tax_rate.unwrap_or(DEFAULT_TAX_RATE),
        tax: Decimal::ZERO,
        discount: req.discount.unwrap_or(Decimal::ZERO),
        total: Decimal::ZERO,
        status: req.status.unwrap_or_default(),
        payment_method: req.payment_method.unwrap_or_default(),
        due_date: parse_due_date(req.due_date)?,
        paid_at: None,
        notes: req.notes,
        created_at: now,
        updated_at: now,
    };

    save_invoice(conn, &mut invoice)?;
    tracing::info!(
        invoice_id = %invoice.id,
        number = invoice.invoice_number.as_deref().unwrap_or_default(),
        total = %invoice.total,
        "invoice created"
    );
    Ok(invoice)
}

/// Partial invoice update; totals are recomputed on save regardless of which
/// fields changed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoicePatch {
    pub items: Option<Vec<LineItem>>,
    pub tax_rate: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub status: Option<InvoiceStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub due_date: Option<String>,
    pub notes: Option<String>,
}

pub fn update_invoice(conn: &Connection, id: &str, patch: InvoicePatch) -> Result<Invoice, AppError> {
    let tx = conn.unchecked_transaction()?;

    let mut invoice = queries::get_invoice(&tx, id)?
        .ok_or_else(|| AppError::NotFound("invoice not found".to_string()))?;

    if let Some(items) = patch.items {
        invoice.items = items;
    }
    if let Some(rate) = patch.tax_rate {
        invoice.tax_rate = rate;
    }
    if let Some(discount) = patch.discount {
        invoice.discount = discount;
    }
    if let Some(status) = patch.status {
        invoice.status = status;
    }
    if let Some(method) = patch.payment_method {
        invoice.payment_method = method;
    }
    if let Some(due) = parse_due_date(patch.due_date)? {
        invoice.due_date = Some(due);
    }
    if let Some(notes) = patch.notes {
        invoice.notes = Some(notes);
    }

    save_invoice(&tx, &mut invoice)?;
    tx.commit()?;
    Ok(invoice)
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequest {
    pub invoice_id: String,
    pub method: Option<PaymentMethod>,
    pub card_last4: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub success: bool,
    pub transaction_id: String,
    pub invoice: Invoice,
    pub message: String,
}

/// Simulated payment: marks the customer's invoice paid without contacting
/// any gateway.
pub fn pay_invoice(
    conn: &Connection,
    customer_id: &str,
    req: PaymentRequest,
) -> Result<PaymentReceipt, AppError> {
    let tx = conn.unchecked_transaction()?;

    let mut invoice = queries::get_invoice(&tx, &req.invoice_id)?
        .filter(|inv| inv.customer_id == customer_id)
        .ok_or_else(|| AppError::NotFound("invoice not found".to_string()))?;

    let now = Utc::now();
    invoice.status = InvoiceStatus::Paid;
    invoice.paid_at = Some(now.naive_utc());
    invoice.payment_method = match req.method {
        Some(PaymentMethod::Unspecified) | None => PaymentMethod::Online,
        Some(method) => method,
    };
    invoice.notes = Some(match req.card_last4.as_deref().filter(|s| !s.is_empty()) {
        Some(last4) => format!("Payment processed via card ending {last4}"),
        None => "Payment processed".to_string(),
    });

    save_invoice(&tx, &mut invoice)?;
    tx.commit()?;

    let transaction_id = format!("TXN-{}", now.timestamp_millis());
    tracing::info!(invoice_id = %invoice.id, transaction_id = %transaction_id, "payment recorded");

    Ok(PaymentReceipt {
        success: true,
        transaction_id,
        invoice,
        message: "Payment processed successfully".to_string(),
    })
}
