pub mod ai_ensemble;
pub mod backtester;
pub mod confluence;
pub mod engine;
pub mod kill_zone;
pub mod risk_manager;
pub mod signal_generator;
pub mod validator;

pub use ai_ensemble::{AiAssessment, AiEnsemble};
pub use backtester::{BacktestConfig, BacktestReport, TradePlan};
pub use confluence::ConfluenceCalculator;
pub use engine::{EngineHealth, MarketAnalysis, SignalEngine, SignalOutcome};
pub use kill_zone::{KillZone, KillZoneManager};
pub use risk_manager::{RiskManager, RiskParams, RiskPlan};
pub use signal_generator::SignalGenerator;
pub use validator::MultiLayerValidator;
