//! Admin and control API under `/api`: runtime-config read/patch, key-pool
//! CRUD, dashboard stats, log streaming, gallery, and optimizer tools.

mod compose;
mod router;

pub use router::admin_router;
