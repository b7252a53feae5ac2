use std::{path::Path, sync::Arc};

use tracing_appender::non_blocking::WorkerGuard;

use crate::{
    domain::clock::SystemClock,
    infra::{self, error::AppError},
    usecases::context::AppContext,
};

/// Startup result. `log_guard` flushes file logging on drop and must be
/// held for the life of the program.
#[derive(Debug)]
pub struct Bootstrapped {
    pub context: AppContext,
    pub log_guard: Option<WorkerGuard>,
}

pub fn bootstrap(config_path: Option<&Path>) -> Result<Bootstrapped, AppError> {
    let context = build_context(config_path)?;
    let log_guard = infra::logging::init(&context.config.logging)?;

    Ok(Bootstrapped { context, log_guard })
}

fn build_context(config_path: Option<&Path>) -> Result<AppContext, AppError> {
    let config = infra::config::load(config_path)?;

    Ok(AppContext::new(config, Arc::new(SystemClock)))
}
