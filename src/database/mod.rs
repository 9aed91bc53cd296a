pub mod attendee_repo;
pub mod schema;
