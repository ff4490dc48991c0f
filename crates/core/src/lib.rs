//! Marketplace domain types and the pure rules shared by storage and the HTTP layer.
pub mod access;
pub mod order;
pub mod partnership;
pub mod pricing;
pub mod types;
pub mod validation;
