use std::sync::Arc;

use ewe_routing::controllers::{Action, Controller, ControllerContext, ControllerDescriptor, ControllerType};
use ewe_routing::cookies::Cookie;
use ewe_routing::errors::ActionError;
use ewe_routing::filters::{Authorize, HandleError, ValidateAntiForgeryToken};
use ewe_routing::requests::Method;
use ewe_routing::results::{ActionResult, ViewData, ViewResult};

pub const WELCOME_MESSAGE: &str = "Welcome to ewe MVC!";
pub const SESSION_COUNTER: &str = "myIncrementingSessionItem";
pub const LAST_FAILURE: &str = "lastFailure";
pub const LOGIN_FAILED: &str = "Either the username or password is incorrect.";

#[derive(Debug, Default)]
pub struct HomeController {
    /// The message the last action handed to its view.
    pub message: Option<String>,
}

impl Controller for HomeController {}

#[derive(Debug, Default)]
pub struct AccountController;

impl Controller for AccountController {}

fn failed(err: impl ToString) -> ActionError {
    ActionError::failed(err.to_string())
}

fn increment_counter(_: &mut HomeController, ctx: &ControllerContext) -> Result<ActionResult, ActionError> {
    let session = ctx
        .http()
        .session()
        .ok_or_else(|| ActionError::failed("session state is not available"))?;
    let next = session.get::<i64>(SESSION_COUNTER).unwrap_or(0) + 1;
    session.set(SESSION_COUNTER, next).map_err(failed)?;

    ctx.http()
        .response()
        .append_cookie(Cookie::new("mycookie", "myval"));
    Ok(ActionResult::content("OK"))
}

pub fn home() -> Arc<dyn ControllerDescriptor> {
    ControllerType::<HomeController>::new("Home")
        .action(Action::new("Index", |home: &mut HomeController, _| {
            home.message = Some(String::from(WELCOME_MESSAGE));
            Ok(ActionResult::View(
                ViewResult::default_view().with_data("Message", WELCOME_MESSAGE),
            ))
        }))
        .action(Action::new("DoStuffWithSessionAndCookies", increment_counter))
        .action(
            Action::new("SecretAction", |_, ctx| {
                let name = ctx.http().user().map(|user| user.name().to_owned()).unwrap_or_default();
                Ok(ActionResult::content(format!("Hello, you're logged in as {name}")))
            })
            .authorization_filter(Authorize::new()),
        )
        .action(Action::new("Dashboard", |home: &mut HomeController, _| {
            home.message = Some(String::from("dashboard"));
            Ok(ActionResult::view())
        }))
        .action(Action::new("Summary", |_, ctx| {
            if !ctx.is_child_action() {
                return Err(ActionError::failed("Summary can only be rendered inside a page"));
            }
            Ok(ActionResult::content("<aside>3 new messages</aside>"))
        }))
        .action(Action::new("Broken", |_, ctx| {
            if let Some(session) = ctx.http().session() {
                session.set(LAST_FAILURE, "Broken").map_err(failed)?;
            }
            Err(ActionError::failed("the message store is unavailable"))
        }))
        .action(
            Action::new("Guarded", |_, _| {
                Err(ActionError::failed("the message store is unavailable"))
            })
            .handle_errors(HandleError::new()),
        )
        .action(Action::new("Echo", echo))
        .action(
            Action::new("Forget", |_, ctx| {
                if let Some(session) = ctx.http().session() {
                    session.clear();
                }
                Ok(ActionResult::content("forgotten"))
            })
            .accept_verbs(&[Method::DELETE]),
        )
        .build()
}

/// Answers with what the request carried: verb, `Accept`, `Authorization`
/// and the `q` parameter.
fn echo(_: &mut HomeController, ctx: &ControllerContext) -> Result<ActionResult, ActionError> {
    let request = ctx.http().request();
    let header = |name: &str| request.header(name).unwrap_or("-").to_owned();
    Ok(ActionResult::content(format!(
        "{} accept={} authorization={} q={}",
        request.method(),
        header("accept"),
        header("authorization"),
        ctx.param("q").unwrap_or("-")
    )))
}

fn log_on(_: &mut AccountController, ctx: &ControllerContext) -> Result<ActionResult, ActionError> {
    let username = ctx.param("username").unwrap_or_default();
    let password = ctx.param("password").unwrap_or_default();

    if username == "steve" && password == "secret" {
        let forms = ctx.http().services().forms();
        return Ok(forms.redirect_from_login_page(ctx.http(), username));
    }

    tracing::debug!("AccountController: rejected log on for {:?}", username);
    let mut view_data = ViewData::new();
    view_data.insert("username", username);
    view_data.model_state_mut().add_model_error("username", LOGIN_FAILED);
    Ok(ActionResult::View(ViewResult::default_view().with_view_data(view_data)))
}

pub fn account() -> Arc<dyn ControllerDescriptor> {
    ControllerType::<AccountController>::new("Account")
        .action(Action::new("LogOn", |_, _| Ok(ActionResult::view())).accept_verbs(&[Method::GET]))
        .action(
            Action::new("LogOn", log_on)
                .accept_verbs(&[Method::POST])
                .authorization_filter(ValidateAntiForgeryToken),
        )
        .action(Action::new("LogOff", |_, ctx| {
            ctx.http().services().forms().sign_out(ctx.http());
            Ok(ActionResult::redirect("/"))
        }))
        .build()
}
