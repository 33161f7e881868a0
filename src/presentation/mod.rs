pub mod channel;
pub mod plugin;
