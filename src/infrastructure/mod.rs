pub mod logging;
pub mod reader;
