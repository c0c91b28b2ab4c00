//! Server crate for ovpnd: the axum API surface over `ovpnd-lib`.

pub mod api;
