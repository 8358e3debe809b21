pub mod common;
pub mod completions;
pub mod current;
pub mod delete;
pub mod get;
pub mod invite;
pub mod label;
pub mod list;
pub mod outbox;
pub mod put;
pub mod status;
pub mod sync;
