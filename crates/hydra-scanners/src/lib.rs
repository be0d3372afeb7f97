//! Built-in scanner modules for the Hydra pipeline.
//!
//! Everything here sits behind the core's narrow `Scanner` contract: a
//! filesystem snapshot in, findings out, errors surfaced as `Err` and turned
//! into failed agent runs by the dispatcher.
//!
//! # Modules
//!
//! - [`account_validation`] — Anchor account checks
//! - [`cpi_safety`] — cross-program invocation targets
//! - [`pda_seeds`] — PDA bumps and balance arithmetic
//! - [`signals`] — language-agnostic deterministic signals
//! - [`llm_focus`] — reasoner-backed scanners, one per focus area

pub mod account_validation;
pub mod cpi_safety;
pub mod llm_focus;
pub mod pda_seeds;
pub mod signals;

mod support;

use std::sync::Arc;
use std::time::Duration;

use hydra_core::cache::ScanCache;
use hydra_core::config::HydraConfig;
use hydra_core::reasoner::Reasoner;
use hydra_core::scanner::{AgentTask, ScannerTask};

pub use account_validation::AccountValidationScanner;
pub use cpi_safety::CpiSafetyScanner;
pub use llm_focus::{FocusArea, LlmFocusScanner};
pub use pda_seeds::PdaSeedsScanner;
pub use signals::SignalsScanner;

/// Compose the standard task set for one scan.
///
/// The three domain scanners and the deterministic-signals adapter are
/// always included; reasoner-backed focus scanners are appended with the
/// long deadline when a reasoner is available.
pub fn build_task_set(
    config: &HydraConfig,
    reasoner: Option<Arc<dyn Reasoner>>,
    cache: Option<Arc<ScanCache>>,
) -> Vec<Arc<dyn AgentTask>> {
    let agent_timeout = Duration::from_millis(config.agent_timeout_ms);
    let llm_timeout = Duration::from_millis(config.llm_agent_timeout_ms);

    let mut tasks: Vec<Arc<dyn AgentTask>> = vec![
        Arc::new(ScannerTask::new(
            Arc::new(AccountValidationScanner::new(cache.clone())),
            agent_timeout,
        )),
        Arc::new(ScannerTask::new(
            Arc::new(CpiSafetyScanner::new(cache.clone())),
            agent_timeout,
        )),
        Arc::new(ScannerTask::new(
            Arc::new(PdaSeedsScanner::new(cache.clone())),
            agent_timeout,
        )),
        Arc::new(ScannerTask::new(
            Arc::new(SignalsScanner::new(cache)),
            agent_timeout,
        )),
    ];

    if let Some(reasoner) = reasoner {
        for focus in FocusArea::all() {
            tasks.push(Arc::new(ScannerTask::new(
                Arc::new(LlmFocusScanner::new(*focus, Arc::clone(&reasoner))),
                llm_timeout,
            )));
        }
    }

    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_core::reasoner::ScriptedReasoner;

    #[test]
    fn builtin_task_set_has_four_scanners() {
        let tasks = build_task_set(&HydraConfig::default(), None, None);
        let ids: Vec<_> = tasks.iter().map(|t| t.agent_id().to_string()).collect();
        assert_eq!(
            ids,
            vec![
                "account-validation",
                "cpi-safety",
                "pda-seeds",
                "deterministic-signals",
            ]
        );
    }

    #[test]
    fn reasoner_appends_focus_scanners_with_long_deadline() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![]));
        let config = HydraConfig::default();
        let tasks = build_task_set(&config, Some(reasoner), None);

        assert_eq!(tasks.len(), 4 + FocusArea::all().len());
        let llm_task = tasks
            .iter()
            .find(|t| t.agent_id().starts_with("llm-focus:"))
            .unwrap();
        assert_eq!(
            llm_task.timeout(),
            Duration::from_millis(config.llm_agent_timeout_ms)
        );
    }
}
