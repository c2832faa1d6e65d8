//! Core types shared by the dbdb adapter and its transports.

pub mod collation;
pub mod document;
pub mod error;
pub mod session;
pub mod store;
pub mod view_query;
