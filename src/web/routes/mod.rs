pub mod admin;
pub mod invite;
pub mod share;
