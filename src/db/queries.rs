use std::collections::HashMap;
use std::str::FromStr;

use anyhow::Context;
use chrono::NaiveDateTime;
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

use crate::models::{
    Appointment, AppointmentStatus, AppointmentView, ChatMessage, ChatRoom, CustomerRef, Invoice,
    InvoiceStatus, PaymentMethod, Role, ServiceType, User, Vehicle,
};

pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn fmt_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT).with_context(|| format!("bad timestamp: {s}"))
}

fn parse_opt_ts(s: Option<String>) -> anyhow::Result<Option<NaiveDateTime>> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_decimal(s: &str) -> anyhow::Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("bad decimal: {s}"))
}

fn parse_opt_decimal(s: Option<String>) -> anyhow::Result<Option<Decimal>> {
    s.as_deref().map(parse_decimal).transpose()
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<anyhow::Result<T>>>) -> anyhow::Result<Vec<T>> {
    let mut out = vec![];
    for row in rows {
        out.push(row??);
    }
    Ok(out)
}

// ── Users ──

const USER_COLUMNS: &str = "id, name, email, phone, role, created_at";

pub fn insert_user(conn: &Connection, user: &User) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO users (id, name, email, phone, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user.id,
            user.name,
            user.email,
            user.phone,
            user.role.as_str(),
            fmt_ts(&user.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &str) -> anyhow::Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    conn.query_row(&sql, params![id], |row| Ok(parse_user_row(row)))
        .optional()?
        .transpose()
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> anyhow::Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
    conn.query_row(&sql, params![email], |row| Ok(parse_user_row(row)))
        .optional()?
        .transpose()
}

pub fn update_profile(
    conn: &Connection,
    id: &str,
    name: Option<&str>,
    phone: Option<&str>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE users SET name = COALESCE(?1, name), phone = COALESCE(?2, phone) WHERE id = ?3",
        params![name, phone, id],
    )?;
    Ok(count > 0)
}

pub fn list_customers(conn: &Connection) -> anyhow::Result<Vec<User>> {
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users WHERE role = 'customer' ORDER BY created_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| Ok(parse_user_row(row)))?;
    collect(rows)
}

pub fn set_password_hash(conn: &Connection, user_id: &str, hash: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE id = ?2",
        params![hash, user_id],
    )?;
    Ok(count > 0)
}

/// A user and their stored password hash, looked up by email.
pub fn get_credentials(conn: &Connection, email: &str) -> anyhow::Result<Option<(User, String)>> {
    let sql = format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = ?1");
    conn.query_row(&sql, params![email], |row| {
        Ok(parse_user_row(row).and_then(|user| Ok((user, row.get::<_, String>(6)?))))
    })
    .optional()?
    .transpose()
}

pub fn count_owners(conn: &Connection) -> anyhow::Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM users WHERE role = 'owner'", [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

fn parse_user_row(row: &rusqlite::Row) -> anyhow::Result<User> {
    let role: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        role: Role::parse(&role),
        created_at: parse_ts(&created_at)?,
    })
}

// ── Appointments ──

const APPOINTMENT_COLUMNS: &str = "id, customer_id, service, service_type, description, vehicle, date, time_slot, \
     duration_minutes, status, status_history, mechanic, bay, notes, estimated_cost, final_cost, \
     repair_notes, parts, completed_at, created_at, updated_at";

pub fn insert_appointment(conn: &Connection, appt: &Appointment) -> anyhow::Result<()> {
    let sql = format!(
        "INSERT INTO appointments ({APPOINTMENT_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)"
    );
    conn.execute(
        &sql,
        params![
            appt.id,
            appt.customer_id,
            appt.service,
            appt.service_type.as_str(),
            appt.description,
            appt.vehicle.as_ref().map(serde_json::to_string).transpose()?,
            fmt_ts(&appt.date),
            appt.time_slot,
            appt.duration_minutes,
            appt.status.as_str(),
            serde_json::to_string(&appt.status_history)?,
            appt.mechanic,
            appt.bay,
            appt.notes,
            appt.estimated_cost.map(|d| d.to_string()),
            appt.final_cost.map(|d| d.to_string()),
            serde_json::to_string(&appt.repair_notes)?,
            serde_json::to_string(&appt.parts)?,
            appt.completed_at.as_ref().map(fmt_ts),
            fmt_ts(&appt.created_at),
            fmt_ts(&appt.updated_at),
        ],
    )?;
    Ok(())
}

/// Writes every mutable column back. `id`, `customer_id` and `created_at` are never touched.
pub fn save_appointment(conn: &Connection, appt: &Appointment) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE appointments SET
           service = ?2, service_type = ?3, description = ?4, vehicle = ?5, date = ?6,
           time_slot = ?7, duration_minutes = ?8, status = ?9, status_history = ?10,
           mechanic = ?11, bay = ?12, notes = ?13, estimated_cost = ?14, final_cost = ?15,
           repair_notes = ?16, parts = ?17, completed_at = ?18, updated_at = ?19
         WHERE id = ?1",
        params![
            appt.id,
            appt.service,
            appt.service_type.as_str(),
            appt.description,
            appt.vehicle.as_ref().map(serde_json::to_string).transpose()?,
            fmt_ts(&appt.date),
            appt.time_slot,
            appt.duration_minutes,
            appt.status.as_str(),
            serde_json::to_string(&appt.status_history)?,
            appt.mechanic,
            appt.bay,
            appt.notes,
            appt.estimated_cost.map(|d| d.to_string()),
            appt.final_cost.map(|d| d.to_string()),
            serde_json::to_string(&appt.repair_notes)?,
            serde_json::to_string(&appt.parts)?,
            appt.completed_at.as_ref().map(fmt_ts),
            fmt_ts(&appt.updated_at),
        ],
    )?;
    Ok(count > 0)
}

pub fn get_appointment(conn: &Connection, id: &str) -> anyhow::Result<Option<Appointment>> {
    let sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1");
    conn.query_row(&sql, params![id], |row| Ok(parse_appointment_row(row)))
        .optional()?
        .transpose()
}

pub fn get_appointments_for_customer(
    conn: &Connection,
    customer_id: &str,
) -> anyhow::Result<Vec<Appointment>> {
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE customer_id = ?1 ORDER BY date DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![customer_id], |row| Ok(parse_appointment_row(row)))?;
    collect(rows)
}

#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    pub status: Option<AppointmentStatus>,
    pub customer_id: Option<String>,
    pub date_from: Option<NaiveDateTime>,
    pub date_to: Option<NaiveDateTime>,
}

/// Filtered listing, earliest appointment first. Date bounds are inclusive.
pub fn list_appointments(
    conn: &Connection,
    filter: &AppointmentFilter,
) -> anyhow::Result<Vec<Appointment>> {
    let mut clauses: Vec<String> = vec![];
    let mut params_vec: Vec<Box<dyn ToSql>> = vec![];

    if let Some(status) = filter.status {
        params_vec.push(Box::new(status.as_str()));
        clauses.push(format!("status = ?{}", params_vec.len()));
    }
    if let Some(customer_id) = &filter.customer_id {
        params_vec.push(Box::new(customer_id.clone()));
        clauses.push(format!("customer_id = ?{}", params_vec.len()));
    }
    if let Some(from) = &filter.date_from {
        params_vec.push(Box::new(fmt_ts(from)));
        clauses.push(format!("date >= ?{}", params_vec.len()));
    }
    if let Some(to) = &filter.date_to {
        params_vec.push(Box::new(fmt_ts(to)));
        clauses.push(format!("date <= ?{}", params_vec.len()));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments {where_sql} ORDER BY date ASC");

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(parse_appointment_row(row)))?;
    collect(rows)
}

pub fn count_appointments_by_status(
    conn: &Connection,
) -> anyhow::Result<HashMap<AppointmentStatus, i64>> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM appointments GROUP BY status")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut counts = HashMap::new();
    for row in rows {
        let (status, count) = row?;
        match AppointmentStatus::parse(&status) {
            Some(status) => {
                counts.insert(status, count);
            }
            None => tracing::warn!(status = %status, "unknown appointment status in storage"),
        }
    }
    Ok(counts)
}

/// Counts appointments scheduled at or after `from`, and at or before `to` when given.
pub fn count_appointments_between(
    conn: &Connection,
    from: &NaiveDateTime,
    to: Option<&NaiveDateTime>,
) -> anyhow::Result<i64> {
    let count = match to {
        Some(to) => conn.query_row(
            "SELECT COUNT(*) FROM appointments WHERE date >= ?1 AND date <= ?2",
            params![fmt_ts(from), fmt_ts(to)],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT COUNT(*) FROM appointments WHERE date >= ?1",
            params![fmt_ts(from)],
            |row| row.get(0),
        )?,
    };
    Ok(count)
}

#[derive(Debug, Clone, serde::Serialize, PartialEq)]
pub struct ServiceCount {
    pub service: String,
    pub count: i64,
}

pub fn service_breakdown(conn: &Connection, limit: i64) -> anyhow::Result<Vec<ServiceCount>> {
    let mut stmt = conn.prepare(
        "SELECT service, COUNT(*) AS n FROM appointments
         GROUP BY service ORDER BY n DESC, service ASC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(ServiceCount {
            service: row.get(0)?,
            count: row.get(1)?,
        })
    })?;

    let mut breakdown = vec![];
    for row in rows {
        breakdown.push(row?);
    }
    Ok(breakdown)
}

pub fn get_customer_ref(conn: &Connection, id: &str) -> anyhow::Result<Option<CustomerRef>> {
    Ok(get_user(conn, id)?.map(|u| u.to_ref()))
}

/// Resolves the customer of each appointment, looking every customer up once.
pub fn attach_customers(
    conn: &Connection,
    appointments: Vec<Appointment>,
) -> anyhow::Result<Vec<AppointmentView>> {
    let mut cache: HashMap<String, Option<CustomerRef>> = HashMap::new();
    let mut views = Vec::with_capacity(appointments.len());

    for appointment in appointments {
        let customer = match cache.get(&appointment.customer_id) {
            Some(found) => found.clone(),
            None => {
                let found = get_customer_ref(conn, &appointment.customer_id)?;
                cache.insert(appointment.customer_id.clone(), found.clone());
                found
            }
        };
        views.push(AppointmentView {
            appointment,
            customer,
        });
    }
    Ok(views)
}

fn parse_appointment_row(row: &rusqlite::Row) -> anyhow::Result<Appointment> {
    let service_type: String = row.get(3)?;
    let vehicle: Option<String> = row.get(5)?;
    let date: String = row.get(6)?;
    let status: String = row.get(9)?;
    let status_history: String = row.get(10)?;
    let repair_notes: String = row.get(16)?;
    let parts: String = row.get(17)?;
    let created_at: String = row.get(19)?;
    let updated_at: String = row.get(20)?;

    Ok(Appointment {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        service: row.get(2)?,
        service_type: ServiceType::parse(&service_type),
        description: row.get(4)?,
        vehicle: vehicle.as_deref().map(serde_json::from_str).transpose()?,
        date: parse_ts(&date)?,
        time_slot: row.get(7)?,
        duration_minutes: row.get(8)?,
        status: AppointmentStatus::parse(&status)
            .with_context(|| format!("unknown appointment status: {status}"))?,
        status_history: serde_json::from_str(&status_history)?,
        mechanic: row.get(11)?,
        bay: row.get(12)?,
        notes: row.get(13)?,
        estimated_cost: parse_opt_decimal(row.get(14)?)?,
        final_cost: parse_opt_decimal(row.get(15)?)?,
        repair_notes: serde_json::from_str(&repair_notes)?,
        parts: serde_json::from_str(&parts)?,
        completed_at: parse_opt_ts(row.get(18)?)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

// ── Invoices ──

const INVOICE_COLUMNS: &str = "id, invoice_number, customer_id, appointment_id, items, subtotal, tax_rate, tax, \
     discount, total, status, payment_method, due_date, paid_at, notes, created_at, updated_at";

/// Inserts or overwrites an invoice. `invoice_number` must already be assigned.
pub fn upsert_invoice(conn: &Connection, invoice: &Invoice) -> anyhow::Result<()> {
    let number = invoice
        .invoice_number
        .as_deref()
        .context("invoice number must be assigned before saving")?;

    let sql = format!(
        "INSERT INTO invoices ({INVOICE_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
         ON CONFLICT(id) DO UPDATE SET
           appointment_id = excluded.appointment_id,
           items = excluded.items,
           subtotal = excluded.subtotal,
           tax_rate = excluded.tax_rate,
           tax = excluded.tax,
           discount = excluded.discount,
           total = excluded.total,
           status = excluded.status,
           payment_method = excluded.payment_method,
           due_date = excluded.due_date,
           paid_at = excluded.paid_at,
           notes = excluded.notes,
           updated_at = excluded.updated_at"
    );
    conn.execute(
        &sql,
        params![
            invoice.id,
            number,
            invoice.customer_id,
            invoice.appointment_id,
            serde_json::to_string(&invoice.items)?,
            invoice.subtotal.to_string(),
            invoice.tax_rate.to_string(),
            invoice.tax.to_string(),
            invoice.discount.to_string(),
            invoice.total.to_string(),
            invoice.status.as_str(),
            invoice.payment_method.as_str(),
            invoice.due_date.as_ref().map(fmt_ts),
            invoice.paid_at.as_ref().map(fmt_ts),
            invoice.notes,
            fmt_ts(&invoice.created_at),
            fmt_ts(&invoice.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_invoice(conn: &Connection, id: &str) -> anyhow::Result<Option<Invoice>> {
    let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1");
    conn.query_row(&sql, params![id], |row| Ok(parse_invoice_row(row)))
        .optional()?
        .transpose()
}

pub fn get_invoices_for_customer(
    conn: &Connection,
    customer_id: &str,
) -> anyhow::Result<Vec<Invoice>> {
    let sql = format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE customer_id = ?1 ORDER BY created_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![customer_id], |row| Ok(parse_invoice_row(row)))?;
    collect(rows)
}

pub fn list_invoices(
    conn: &Connection,
    status: Option<InvoiceStatus>,
) -> anyhow::Result<Vec<Invoice>> {
    let invoices = match status {
        Some(status) => {
            let sql = format!(
                "SELECT {INVOICE_COLUMNS} FROM invoices WHERE status = ?1 ORDER BY created_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![status.as_str()], |row| Ok(parse_invoice_row(row)))?;
            collect(rows)?
        }
        None => {
            let sql =
                format!("SELECT {INVOICE_COLUMNS} FROM invoices ORDER BY created_at DESC, rowid DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| Ok(parse_invoice_row(row)))?;
            collect(rows)?
        }
    };
    Ok(invoices)
}

fn parse_invoice_row(row: &rusqlite::Row) -> anyhow::Result<Invoice> {
    let items: String = row.get(4)?;
    let subtotal: String = row.get(5)?;
    let tax_rate: String = row.get(6)?;
    let tax: String = row.get(7)?;
    let discount: String = row.get(8)?;
    let total: String = row.get(9)?;
    let status: String = row.get(10)?;
    let payment_method: String = row.get(11)?;
    let created_at: String = row.get(15)?;
    let updated_at: String = row.get(16)?;

    Ok(Invoice {
        id: row.get(0)?,
        invoice_number: row.get(1)?,
        customer_id: row.get(2)?,
        appointment_id: row.get(3)?,
        items: serde_json::from_str(&items)?,
        subtotal: parse_decimal(&subtotal)?,
        tax_rate: parse_decimal(&tax_rate)?,
        tax: parse_decimal(&tax)?,
        discount: parse_decimal(&discount)?,
        total: parse_decimal(&total)?,
        status: InvoiceStatus::parse(&status),
        payment_method: PaymentMethod::parse(&payment_method),
        due_date: parse_opt_ts(row.get(12)?)?,
        paid_at: parse_opt_ts(row.get(13)?)?,
        notes: row.get(14)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

// ── Vehicles ──

const VEHICLE_COLUMNS: &str =
    "id, owner_id, make, model, year, license_plate, vin, color, mileage, notes, created_at";

pub fn insert_vehicle(conn: &Connection, vehicle: &Vehicle) -> anyhow::Result<()> {
    let sql = format!(
        "INSERT INTO vehicles ({VEHICLE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
    );
    conn.execute(
        &sql,
        params![
            vehicle.id,
            vehicle.owner_id,
            vehicle.make,
            vehicle.model,
            vehicle.year,
            vehicle.license_plate,
            vehicle.vin,
            vehicle.color,
            vehicle.mileage,
            vehicle.notes,
            fmt_ts(&vehicle.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_vehicle(conn: &Connection, id: &str, owner_id: &str) -> anyhow::Result<Option<Vehicle>> {
    let sql = format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE id = ?1 AND owner_id = ?2");
    conn.query_row(&sql, params![id, owner_id], |row| Ok(parse_vehicle_row(row)))
        .optional()?
        .transpose()
}

pub fn get_vehicles_for_owner(conn: &Connection, owner_id: &str) -> anyhow::Result<Vec<Vehicle>> {
    let sql = format!(
        "SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![owner_id], |row| Ok(parse_vehicle_row(row)))?;
    collect(rows)
}

pub fn save_vehicle(conn: &Connection, vehicle: &Vehicle) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE vehicles SET make = ?3, model = ?4, year = ?5, license_plate = ?6, vin = ?7,
           color = ?8, mileage = ?9, notes = ?10
         WHERE id = ?1 AND owner_id = ?2",
        params![
            vehicle.id,
            vehicle.owner_id,
            vehicle.make,
            vehicle.model,
            vehicle.year,
            vehicle.license_plate,
            vehicle.vin,
            vehicle.color,
            vehicle.mileage,
            vehicle.notes,
        ],
    )?;
    Ok(count > 0)
}

pub fn delete_vehicle(conn: &Connection, id: &str, owner_id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "DELETE FROM vehicles WHERE id = ?1 AND owner_id = ?2",
        params![id, owner_id],
    )?;
    Ok(count > 0)
}

fn parse_vehicle_row(row: &rusqlite::Row) -> anyhow::Result<Vehicle> {
    let created_at: String = row.get(10)?;
    Ok(Vehicle {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        make: row.get(2)?,
        model: row.get(3)?,
        year: row.get(4)?,
        license_plate: row.get(5)?,
        vin: row.get(6)?,
        color: row.get(7)?,
        mileage: row.get(8)?,
        notes: row.get(9)?,
        created_at: parse_ts(&created_at)?,
    })
}

// ── Messages ──

const MESSAGE_COLUMNS: &str =
    "id, room_id, message, sender_id, sender_name, sender_role, is_read, created_at";

pub fn insert_message(conn: &Connection, msg: &ChatMessage) -> anyhow::Result<()> {
    let sql = format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)");
    conn.execute(
        &sql,
        params![
            msg.id,
            msg.room_id,
            msg.message,
            msg.sender_id,
            msg.sender_name,
            msg.sender_role.as_str(),
            msg.read as i32,
            msg.created_at,
        ],
    )?;
    Ok(())
}

/// The most recent `limit` messages of a room, oldest first.
pub fn get_room_messages(
    conn: &Connection,
    room_id: &str,
    limit: i64,
) -> anyhow::Result<Vec<ChatMessage>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM (
             SELECT rowid AS seq, * FROM messages WHERE room_id = ?1 ORDER BY rowid DESC LIMIT ?2
         ) ORDER BY seq ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![room_id, limit], parse_message_row)?;

    let mut messages = vec![];
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

/// Marks everything in the room not sent by `reader_id` as read.
pub fn mark_room_read(conn: &Connection, room_id: &str, reader_id: &str) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE messages SET is_read = 1 WHERE room_id = ?1 AND sender_id != ?2 AND is_read = 0",
        params![room_id, reader_id],
    )?;
    Ok(count)
}

pub fn get_chat_rooms(conn: &Connection) -> anyhow::Result<Vec<ChatRoom>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.room_id, m.message, m.sender_id, m.sender_name, m.sender_role, m.is_read, m.created_at,
                (SELECT COUNT(*) FROM messages m2 WHERE m2.room_id = m.room_id AND m2.is_read = 0) AS unread
         FROM messages m
         INNER JOIN (
             SELECT room_id, MAX(rowid) AS max_seq FROM messages GROUP BY room_id
         ) latest ON m.rowid = latest.max_seq
         ORDER BY m.rowid DESC",
    )?;

    let rows = stmt.query_map([], |row| {
        let last_message = parse_message_row(row)?;
        Ok(ChatRoom {
            room_id: last_message.room_id.clone(),
            last_message,
            unread: row.get(8)?,
        })
    })?;

    let mut rooms = vec![];
    for row in rows {
        rooms.push(row?);
    }
    Ok(rooms)
}

fn parse_message_row(row: &rusqlite::Row) -> rusqlite::Result<ChatMessage> {
    let sender_role: String = row.get(5)?;
    Ok(ChatMessage {
        id: row.get(0)?,
        room_id: row.get(1)?,
        message: row.get(2)?,
        sender_id: row.get(3)?,
        sender_name: row.get(4)?,
        sender_role: Role::parse(&sender_role),
        read: row.get::<_, i32>(6)? != 0,
        created_at: row.get(7)?,
    })
}
