/*
[INPUT]:  Public API exports for helios-orchestrator crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod config;
pub mod decimal;
pub mod events;
pub mod optimizer;
pub mod rate_budget;
pub mod reconciler;
pub mod simulator;
pub mod stop_coordinator;
pub mod stop_manager;
pub mod stores;
pub mod trailing;
pub mod validator;
pub mod variant;

pub use config::StrategyConfig;
pub use optimizer::LiveOptimizerController;
