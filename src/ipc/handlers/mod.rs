pub mod backup;
pub mod catalog;
pub mod core;
pub mod groups;
pub mod lessons;
pub mod session;
pub mod students;
