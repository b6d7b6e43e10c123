use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use crangon::config::ConfigEngine;
use crangon::env::{BUNDLED_ENV, ENTRY_POINT, StdTerminal, Workers};
use crangon::namespace::Registry;
use crangon::sandbox::{Bridge, SandboxSession, SessionOutcome};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line args
    let args: Vec<String> = env::args().collect();
    let Some(script) = args.get(1).map(PathBuf::from) else {
        eprintln!("usage: crangon <script.rhai>");
        return ExitCode::from(2);
    };

    // Load config before logging so the configured level applies
    let mut config = ConfigEngine::new();
    let config_result = config.load_default();
    let settings = config.settings();
    crangon::logging::init(&settings.log_level);
    if let Err(e) = config_result {
        error!("{e}");
    }

    let code = match std::fs::read_to_string(&script) {
        Ok(code) => code,
        Err(e) => {
            error!("Failed to read {}: {e}", script.display());
            return ExitCode::FAILURE;
        }
    };

    let registry = Registry::new();
    let bridge = match Bridge::new(registry.clone(), settings.sandbox) {
        Ok(bridge) => bridge,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    crangon::env::install(&registry, &bridge, Arc::new(StdTerminal));

    if let Err(e) = registry.trigger(ENTRY_POINT, vec![code.into()]) {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    info!("Running {}", script.display());

    // A sandbox may replace itself through env/tasks:spawn, so follow the
    // newest session until one ends without being replaced
    let outcome = loop {
        let Some(session) = latest_session(&registry) else {
            error!("No sandbox session was started");
            return ExitCode::FAILURE;
        };
        let outcome = session.wait().await;
        match latest_session(&registry) {
            Some(newer) if newer.id() != session.id() => continue,
            _ => break outcome,
        }
    };

    match serde_json::to_string(&outcome) {
        Ok(report) => eprintln!("{report}"),
        Err(e) => error!("Failed to report outcome: {e}"),
    }

    match outcome {
        SessionOutcome::Completed => ExitCode::SUCCESS,
        SessionOutcome::Faulted(_) | SessionOutcome::Terminated => ExitCode::FAILURE,
    }
}

fn latest_session(registry: &Registry) -> Option<SandboxSession> {
    registry
        .lookup(BUNDLED_ENV)
        .ok()?
        .state()
        .get::<Workers>()?
        .latest()
        .cloned()
}
