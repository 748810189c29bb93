pub mod payment_api;
pub mod poller;
pub mod sessions;
