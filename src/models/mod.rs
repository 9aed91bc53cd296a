pub mod attendees;

pub use attendees::AttendeeRow;
