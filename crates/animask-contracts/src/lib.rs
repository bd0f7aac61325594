pub mod chat;
pub mod data_url;
pub mod events;
pub mod session;
pub mod settings;
pub mod wire;
