//! Community Lifecycle (C5) and user-scoped writes (C6).

pub mod lifecycle;
pub mod writes;
