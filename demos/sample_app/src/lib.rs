//! A small site used to exercise `ewe_simulate` end to end: a home page, a
//! session/cookie counter, a secured action behind forms authentication and
//! a log on form protected by an anti-forgery token.

pub mod controllers;
pub mod views;

use std::path::PathBuf;

use ewe_routing::application::{Application, HostEnvironment};
use ewe_routing::errors::ApplicationError;

/// The deployment root shipped with this crate (`site/`).
#[must_use]
pub fn site_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("site")
}

/// Builds the application for `environment`.
pub fn build_application(environment: HostEnvironment) -> Result<Application, ApplicationError> {
    let builder = Application::builder(environment)
        .ignore_route("{resource}.axd/{*pathInfo}")?
        .map_route(
            "Default",
            "{controller}/{action}/{id}",
            &[("controller", "Home"), ("action", "Index"), ("id", "")],
        )?
        .controller(controllers::home())?
        .controller(controllers::account())?;

    let application = views::register(builder).build()?;
    tracing::info!("sample_app: application ready");
    Ok(application)
}
