//! CLI Commands

pub mod check;
pub mod plugins;
pub mod run;

pub use check::CheckCommand;
pub use plugins::PluginsCommand;
pub use run::RunCommand;
