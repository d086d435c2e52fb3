// Procurement workflow
pub mod procurement;
pub mod purchase_order_status;

// Asset materialization and serial numbering
pub mod assets;
pub mod serials;

// Read-only collaborators
pub mod reference;
