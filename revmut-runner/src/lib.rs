pub mod commands;
pub mod interrupt;
pub mod logging;
pub mod options;
