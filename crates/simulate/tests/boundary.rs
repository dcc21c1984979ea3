use std::sync::atomic::{AtomicUsize, Ordering};

use ewe_sample_app::{build_application, site_root};
use ewe_simulate::{
    code_unit, simulate, BoundaryConfig, BrowsingSession, CapturedContext, Closure, IsolationBoundary,
    Opaque, RequestOptions, SimulateError, TransferError,
};
use tracing_test::traced_test;

static OPAQUE_RUNS: AtomicUsize = AtomicUsize::new(0);

fn boundary() -> IsolationBoundary {
    simulate(site_root(), build_application).expect("sample site boundary")
}

#[test]
#[traced_test]
fn initialize_reports_the_ready_application() {
    let boundary = boundary();

    assert_eq!(boundary.application_root(), site_root().as_path());
    assert!(logs_contain("IsolationBoundary: application at"));
}

#[test]
fn application_runs_on_the_named_boundary_thread() {
    let config = BoundaryConfig::default().with_thread_name("sample-site");
    let boundary = IsolationBoundary::initialize_with(site_root(), config, build_application)
        .expect("sample site boundary");

    let (thread_name, app_name) = boundary
        .run_inside(|domain| {
            (
                std::thread::current().name().map(String::from),
                domain.application().environment().manifest().name.clone(),
            )
        })
        .expect("boundary");

    assert_eq!(thread_name.as_deref(), Some("sample-site"));
    assert_eq!(app_name, "sample_app");
}

#[test]
fn missing_manifest_is_a_configuration_error() {
    let empty = tempfile::tempdir().expect("tempdir");

    match simulate(empty.path(), build_application) {
        Err(SimulateError::Configuration { path, .. }) => {
            assert!(path.ends_with("bin/app.toml"), "reported {}", path.display());
        }
        other => panic!("expected a configuration error, got {other:?}"),
    }
}

fn never_runs(_: &CapturedContext, _: &mut BrowsingSession) -> anyhow::Result<()> {
    OPAQUE_RUNS.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

#[test]
fn untransferable_captures_fail_before_running() {
    let script = Closure::new(code_unit!(never_runs))
        .capture("helper", Opaque(std::sync::Mutex::new(1)));

    match boundary().run_browsing_script(&script) {
        Err(SimulateError::Transfer(TransferError::NotTransferable { path, .. })) => {
            assert_eq!(path, "helper");
        }
        other => panic!("expected a transfer error, got {other:?}"),
    }
    assert_eq!(OPAQUE_RUNS.load(Ordering::SeqCst), 0);
}

fn visit_home(captured: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    let path: String = captured.get("path")?;
    let result = session.get(&path)?;
    anyhow::ensure!(result.view_result().is_some(), "{path} did not render a view");
    Ok(())
}

fn run_nested(captured: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    captured.closure("visit")?.invoke(session)?;
    captured.closure("visit")?.invoke(session)?;
    anyhow::ensure!(session.session().is_some(), "nested visits kept no session");
    Ok(())
}

#[test]
fn nested_closures_share_the_browsing_session() {
    let visit = Closure::new(code_unit!(visit_home)).capture("path", "/");
    let script = Closure::new(code_unit!(run_nested)).capture("visit", visit);

    boundary().run_browsing_script(&script).expect("nested script");
}

fn failing_script(_: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    session.get("")?;
    anyhow::bail!("the home page looked wrong")
}

#[test]
fn script_failures_are_reported_to_the_caller() {
    match boundary().run_browsing_script(&Closure::new(code_unit!(failing_script))) {
        Err(SimulateError::Script(err)) => {
            assert_eq!(err.to_string(), "the home page looked wrong");
        }
        other => panic!("expected a script error, got {other:?}"),
    }
}

fn bad_target(_: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    session.get("home/index\u{7}")?;
    Ok(())
}

#[test]
fn simulate_errors_keep_their_type_across_the_boundary() {
    let outcome = boundary().run_browsing_script(&Closure::new(code_unit!(bad_target)));
    assert!(matches!(outcome, Err(SimulateError::InvalidArgument(_))), "{outcome:?}");
}

fn panicking_script(_: &CapturedContext, _: &mut BrowsingSession) -> anyhow::Result<()> {
    panic!("assertion inside the boundary")
}

#[test]
#[should_panic(expected = "assertion inside the boundary")]
fn panics_resume_on_the_calling_thread() {
    let _ = boundary().run_browsing_script(&Closure::new(code_unit!(panicking_script)));
}

#[test]
fn boundary_keeps_serving_after_a_panic() {
    let boundary = boundary();

    let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        boundary.run_inside(|_| -> u32 { panic!("first job fails") })
    }));
    assert!(caught.is_err());

    let answer = boundary.run_inside(|_| 42).expect("boundary");
    assert_eq!(answer, 42);
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Visit {
    path: String,
    accept: String,
}

fn stateful_visit(captured: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
    let visit: Visit = captured.state()?;
    let result = session.get_with(&visit.path, &RequestOptions::default().accept(visit.accept))?;
    anyhow::ensure!(
        result.response_text() == "GET accept=text/html authorization=- q=-",
        "unexpected echo: {}",
        result.response_text()
    );
    Ok(())
}

#[test]
fn serializable_state_travels_with_the_script() {
    let script = Closure::new(code_unit!(stateful_visit))
        .with_state(&Visit {
            path: String::from("home/echo"),
            accept: String::from("text/html"),
        })
        .expect("serializable state");

    boundary().run_browsing_script(&script).expect("stateful script");
}
