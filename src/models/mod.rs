pub mod assignment;
pub mod empty_trip;
pub mod notification;
pub mod trip;
