pub mod appointment;
pub mod invoice;
pub mod message;
pub mod user;
pub mod vehicle;

pub use appointment::{
    Appointment, AppointmentStatus, AppointmentView, CustomerRef, Part, RepairNote, ServiceType,
    StatusEntry, VehicleSnapshot,
};
pub use invoice::{Invoice, InvoiceStatus, ItemCategory, LineItem, PaymentMethod, DEFAULT_TAX_RATE};
pub use message::{ChatMessage, ChatRoom};
pub use user::{customer_channel, Role, User};
pub use vehicle::Vehicle;
