pub mod backup_exchange;
pub mod checkin;
pub mod core;
pub mod documents;
pub mod donations;
pub mod meetings;
pub mod members;
pub mod points;
pub mod reports;
pub mod sessions;
