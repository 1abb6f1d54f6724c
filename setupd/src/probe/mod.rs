pub mod interfaces;
pub mod port;
pub mod static_ip;
pub mod stub_listener;
