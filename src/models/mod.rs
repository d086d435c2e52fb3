// Procurement entities
pub mod asset;
pub mod purchase_order_entity;
pub mod serial_sequence;

// Reference data, read-only for this service
pub mod category;
pub mod location;
pub mod room;
pub mod user;
pub mod vendor_registration;

pub use purchase_order_entity as purchase_order;
