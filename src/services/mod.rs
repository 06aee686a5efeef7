pub mod dispatch;
pub mod erp;
pub mod poller;
pub mod sessions;
