use ewe_routing::errors::PipelineError;
use ewe_routing::results::ActionResult;
use ewe_routing::StatusCode;
use ewe_sample_app::controllers::{
    HomeController, LAST_FAILURE, LOGIN_FAILED, SESSION_COUNTER, WELCOME_MESSAGE,
};
use ewe_sample_app::{build_application, site_root};
use ewe_simulate::transfer::{Captured, RestoredValue};
use ewe_simulate::{
    code_unit, extract_anti_forgery_token, simulate, BrowsingSession, CapturedContext, Closure,
    IsolationBoundary, RequestOptions, Restore, SimulateError, SimulateResult, Transferable, TransferError,
};
use serde::Serialize;

fn boundary() -> IsolationBoundary {
    simulate(site_root(), build_application).expect("sample site boundary")
}

fn run(script: &Closure) {
    boundary().run_browsing_script(script).expect("browsing script");
}

fn counter(session: &BrowsingSession) -> Option<i64> {
    session.session().and_then(|state| state.get::<i64>(SESSION_COUNTER))
}

fn root_url_renders_index_view(_: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    let result = session.get("")?;

    let view = result.view_result().expect("index returns a view");
    assert_eq!(view.view_name(), "Index");
    assert_eq!(view.view_data().get_str("Message"), Some(WELCOME_MESSAGE));
    assert!(result.response_text().contains("<!DOCTYPE html"));
    assert!(result.response_text().contains(WELCOME_MESSAGE));

    let home = result
        .post_handler_context()
        .and_then(|context| context.controller().downcast_ref::<HomeController>())
        .expect("home controller");
    assert_eq!(home.message.as_deref(), Some(WELCOME_MESSAGE));
    Ok(())
}

#[test]
fn root_url_renders_the_index_view() {
    run(&Closure::new(code_unit!(root_url_renders_index_view)));
}

fn session_and_cookies(_: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    let url = "home/DoStuffWithSessionAndCookies";
    assert!(session.session().is_none());

    let result = session.get(url)?;
    assert_eq!(result.response_text(), "OK");
    assert_eq!(session.cookies().value("mycookie"), Some("myval"));
    assert_eq!(counter(session), Some(1));

    session.get(url)?;
    assert_eq!(counter(session), Some(2));
    session.get(url)?;
    assert_eq!(counter(session), Some(3));

    session
        .session()
        .expect("session state")
        .set(SESSION_COUNTER, 10)?;
    session.get(url)?;
    assert_eq!(counter(session), Some(11));
    Ok(())
}

#[test]
fn session_state_and_cookies_persist_across_requests() {
    run(&Closure::new(code_unit!(session_and_cookies)));
}

#[test]
fn browsing_sessions_are_independent() {
    let counts = boundary()
        .run_inside(|domain| -> SimulateResult<(Option<i64>, Option<i64>)> {
            let url = "home/DoStuffWithSessionAndCookies";
            let mut first = domain.browse();
            let mut second = domain.browse();

            first.get(url)?;
            first.get(url)?;
            second.get(url)?;
            Ok((counter(&first), counter(&second)))
        })
        .expect("boundary")
        .expect("requests");

    assert_eq!(counts, (Some(2), Some(1)));
}

struct Credentials {
    user: String,
    password: String,
}

impl Transferable for Credentials {
    fn decompose(&self, path: &str) -> Result<Captured, TransferError> {
        Captured::structure(path)
            .field("user", &self.user)?
            .field("password", &self.password)?
            .finish()
    }
}

impl Restore for Credentials {
    fn restore(value: &RestoredValue, name: &str) -> Result<Self, TransferError> {
        let fields = value.fields(name)?;
        Ok(Self {
            user: fields.get("user")?,
            password: fields.get("password")?,
        })
    }
}

#[derive(Serialize)]
struct LogOnForm<'a> {
    #[serde(rename = "UserName")]
    user_name: &'a str,
    #[serde(rename = "Password")]
    password: &'a str,
    #[serde(rename = "__RequestVerificationToken")]
    token: String,
}

fn log_in(captured: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    let secured: String = captured.get("secured_url")?;
    let credentials: Credentials = captured.get("credentials")?;

    let initial = session.get(&secured)?;
    let login_url = initial.redirect_location().expect("redirected to log on");
    assert!(login_url.starts_with("/Account/LogOn"), "redirected to {login_url}");
    assert!(initial.post_handler_context().is_none());

    let form = session.get(&login_url)?;
    let token = extract_anti_forgery_token(form.response_text()).expect("anti-forgery token");

    let logged_in = session.post(
        &login_url,
        &LogOnForm {
            user_name: &credentials.user,
            password: &credentials.password,
            token,
        },
    )?;
    assert_eq!(logged_in.redirect_location().as_deref(), Some(secured.as_str()));

    let after = session.get(&secured)?;
    assert_eq!(after.response_text(), "Hello, you're logged in as steve");
    Ok(())
}

#[test]
fn log_in_process_returns_to_the_secured_action() {
    let script = Closure::new(code_unit!(log_in))
        .capture("secured_url", "/home/SecretAction")
        .capture(
            "credentials",
            Credentials {
                user: String::from("steve"),
                password: String::from("secret"),
            },
        );
    run(&script);
}

fn wrong_password(_: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    let form = session.get("Account/LogOn")?;
    let token = extract_anti_forgery_token(form.response_text()).expect("anti-forgery token");

    let rejected = session.post(
        "Account/LogOn",
        &LogOnForm {
            user_name: "steve",
            password: "guess",
            token,
        },
    )?;
    assert_eq!(rejected.status(), StatusCode::OK);
    assert!(rejected.response_text().contains(LOGIN_FAILED));

    let view = rejected.view_result().expect("log on view");
    assert_eq!(view.view_data().model_state().errors_for("username"), [LOGIN_FAILED]);
    Ok(())
}

#[test]
fn wrong_password_renders_the_form_with_errors() {
    run(&Closure::new(code_unit!(wrong_password)));
}

fn missing_token(_: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    session.get("Account/LogOn")?;
    let outcome = session.post(
        "Account/LogOn",
        &serde_json::json!({ "UserName": "steve", "Password": "secret" }),
    );
    assert!(matches!(outcome, Err(SimulateError::Application(_))));
    assert!(session.cookies().get(".SAMPLEAUTH").is_none());
    Ok(())
}

#[test]
fn posting_without_the_token_is_rejected() {
    run(&Closure::new(code_unit!(missing_token)));
}

fn child_actions(_: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    let result = session.get("home/dashboard")?;
    assert!(result.response_text().contains("<h2>Dashboard</h2>"));
    assert!(result.response_text().contains("<aside>3 new messages</aside>"));

    let handler = result.post_handler_context().expect("post-handler context");
    assert_eq!(handler.descriptor().action_name(), "Dashboard");
    assert_eq!(handler.route_data().action(), Some("dashboard"));

    let finished = result.post_result_context().expect("post-result context");
    assert_eq!(finished.route_data().action(), Some("Summary"));
    assert!(matches!(finished.result(), ActionResult::Content(_)));
    Ok(())
}

#[test]
fn first_completed_contexts_win_with_child_actions() {
    run(&Closure::new(code_unit!(child_actions)));
}

fn static_content(_: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    let result = session.get("/Content/site.css")?;

    assert_eq!(result.status(), StatusCode::OK);
    assert_eq!(result.response().content_type(), "text/css");
    assert!(result.response_text().contains("font-family"));
    assert!(result.post_handler_context().is_none());
    assert!(result.post_result_context().is_none());
    assert!(session.session().is_none());

    let missing = session.get("/Content/missing.css")?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[test]
fn static_files_are_served_without_contexts() {
    run(&Closure::new(code_unit!(static_content)));
}

fn unhandled_error(_: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    match session.get("home/broken") {
        Err(SimulateError::Application(PipelineError::Unhandled { action, .. })) => {
            assert_eq!(action, "Broken");
        }
        other => panic!("expected an unhandled application error, got {other:?}"),
    }

    let handler = session
        .capture_slot()
        .post_handler_context()
        .expect("post-handler context");
    assert!(handler.exception().is_some());
    assert!(!handler.exception_handled());
    assert!(session.cookies().get("sample_session").is_some());
    assert!(session.session().is_none());

    session.get("")?;
    let state = session.session().expect("session state");
    assert_eq!(state.get::<String>(LAST_FAILURE).as_deref(), Some("Broken"));
    Ok(())
}

#[test]
fn unhandled_errors_fail_the_call_after_merging_cookies() {
    run(&Closure::new(code_unit!(unhandled_error)));
}

fn handled_error(_: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    let result = session.get("home/guarded")?;

    assert_eq!(result.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        result.response_text(),
        "An error occurred while processing your request."
    );
    let handler = result.post_handler_context().expect("post-handler context");
    assert!(handler.exception().is_some());
    assert!(handler.exception_handled());
    assert!(result.content_result().is_some());
    Ok(())
}

#[test]
fn handled_errors_complete_normally() {
    run(&Closure::new(code_unit!(handled_error)));
}

fn delete_requests(_: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    session.get("home/DoStuffWithSessionAndCookies")?;
    assert_eq!(counter(session), Some(1));

    let forgotten = session.delete("home/forget")?;
    assert_eq!(forgotten.response_text(), "forgotten");
    assert_eq!(counter(session), None);

    let wrong_verb = session.get("home/forget")?;
    assert_eq!(wrong_verb.status(), StatusCode::NOT_FOUND);
    assert!(wrong_verb.post_handler_context().is_none());
    Ok(())
}

#[test]
fn delete_verb_reaches_delete_only_actions() {
    run(&Closure::new(code_unit!(delete_requests)));
}

fn header_overrides(_: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    let options = RequestOptions::default()
        .accept("application/json")
        .basic_auth("u", "p");

    let fetched = session.get_with("home/echo?q=hello world", &options)?;
    assert_eq!(
        fetched.response_text(),
        "GET accept=application/json authorization=Basic dTpw q=hello world"
    );

    let posted = session.post_with("home/echo", &serde_json::json!({ "q": "posted" }), &options)?;
    assert_eq!(
        posted.response_text(),
        "POST accept=application/json authorization=Basic dTpw q=posted"
    );

    let deleted = session.delete_with("home/echo", &options)?;
    assert_eq!(
        deleted.response_text(),
        "DELETE accept=application/json authorization=Basic dTpw q=-"
    );

    let plain = session.get("home/echo")?;
    assert_eq!(plain.response_text(), "GET accept=- authorization=- q=-");
    Ok(())
}

#[test]
fn accept_and_basic_auth_overrides_reach_the_application() {
    run(&Closure::new(code_unit!(header_overrides)));
}

fn unencoded_query(_: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    let result = session.get("home/echo?q=hello world & more")?;
    assert_eq!(result.status(), StatusCode::OK);
    assert!(result.response_text().ends_with("q=hello world "), "{}", result.response_text());

    let index = session.get("~/home/index?q=two words")?;
    assert!(index.view_result().is_some());
    Ok(())
}

#[test]
fn targets_with_spaces_are_sent_encoded() {
    run(&Closure::new(code_unit!(unencoded_query)));
}

fn untouched_sessions(_: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    session.get("")?;
    session.get("home/dashboard")?;
    assert!(session.cookies().get("sample_session").is_none());

    session.get("home/DoStuffWithSessionAndCookies")?;
    assert!(session.cookies().get("sample_session").is_some());
    Ok(())
}

#[test]
fn sessions_are_only_issued_once_written() {
    run(&Closure::new(code_unit!(untouched_sessions)));
}
