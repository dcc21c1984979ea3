use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use ewe_routing::controllers::{ActionDescriptor, Controller};
use ewe_routing::errors::ActionError;
use ewe_routing::filters::{ActionExecutedContext, ResultExecutedContext};
use ewe_routing::response::HttpResponse;
use ewe_routing::results::ActionResult;
use ewe_routing::routes::RouteData;
use ewe_routing::session::SessionState;

/// What the action filters saw once the action had run.
#[derive(Clone)]
pub struct ActionExecutedSnapshot {
    descriptor: Arc<dyn ActionDescriptor>,
    controller: Arc<dyn Controller>,
    canceled: bool,
    exception: Option<ActionError>,
    exception_handled: bool,
    result: Option<ActionResult>,
    route_data: RouteData,
}

impl ActionExecutedSnapshot {
    #[must_use]
    pub fn from_context(context: &ActionExecutedContext<'_>) -> Self {
        Self {
            descriptor: context.descriptor().clone(),
            controller: context.controller().clone(),
            canceled: context.canceled(),
            exception: context.exception().cloned(),
            exception_handled: context.exception_handled(),
            result: context.result().cloned(),
            route_data: context.controller_context().route_data().clone(),
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &Arc<dyn ActionDescriptor> {
        &self.descriptor
    }

    #[must_use]
    pub fn controller(&self) -> &dyn Controller {
        &*self.controller
    }

    #[must_use]
    pub fn canceled(&self) -> bool {
        self.canceled
    }

    #[must_use]
    pub fn exception(&self) -> Option<&ActionError> {
        self.exception.as_ref()
    }

    #[must_use]
    pub fn exception_handled(&self) -> bool {
        self.exception_handled
    }

    #[must_use]
    pub fn result(&self) -> Option<&ActionResult> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn route_data(&self) -> &RouteData {
        &self.route_data
    }
}

impl fmt::Debug for ActionExecutedSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionExecutedSnapshot")
            .field("descriptor", &self.descriptor)
            .field("canceled", &self.canceled)
            .field("exception", &self.exception)
            .field("exception_handled", &self.exception_handled)
            .field("result", &self.result)
            .field("route_data", &self.route_data)
            .finish_non_exhaustive()
    }
}

/// What the result filters saw once the result had executed.
#[derive(Clone)]
pub struct ResultExecutedSnapshot {
    controller: Arc<dyn Controller>,
    canceled: bool,
    exception: Option<ActionError>,
    exception_handled: bool,
    result: ActionResult,
    route_data: RouteData,
}

impl ResultExecutedSnapshot {
    #[must_use]
    pub fn from_context(context: &ResultExecutedContext<'_>) -> Self {
        Self {
            controller: context.controller().clone(),
            canceled: context.canceled(),
            exception: context.exception().cloned(),
            exception_handled: context.exception_handled(),
            result: context.result().clone(),
            route_data: context.controller_context().route_data().clone(),
        }
    }

    #[must_use]
    pub fn controller(&self) -> &dyn Controller {
        &*self.controller
    }

    #[must_use]
    pub fn canceled(&self) -> bool {
        self.canceled
    }

    #[must_use]
    pub fn exception(&self) -> Option<&ActionError> {
        self.exception.as_ref()
    }

    #[must_use]
    pub fn exception_handled(&self) -> bool {
        self.exception_handled
    }

    #[must_use]
    pub fn result(&self) -> &ActionResult {
        &self.result
    }

    #[must_use]
    pub fn route_data(&self) -> &RouteData {
        &self.route_data
    }
}

impl fmt::Debug for ResultExecutedSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultExecutedSnapshot")
            .field("canceled", &self.canceled)
            .field("exception", &self.exception)
            .field("exception_handled", &self.exception_handled)
            .field("result", &self.result)
            .field("route_data", &self.route_data)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Slots {
    post_handler: Option<ActionExecutedSnapshot>,
    post_result: Option<ResultExecutedSnapshot>,
    session: Option<SessionState>,
    response: Option<HttpResponse>,
}

/// Per-session holder for the transient objects of the request in flight.
///
/// Every field is written at most once between two [`CaptureSlot::reset_all`]
/// calls; later offers are ignored.
#[derive(Clone, Default)]
pub struct CaptureSlot {
    slots: Arc<Mutex<Slots>>,
}

fn offer<T>(slot: &mut Option<T>, value: T) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(value);
    true
}

impl CaptureSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Slots) -> R) -> R {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut slots)
    }

    pub fn reset_all(&self) {
        self.with(|slots| *slots = Slots::default());
    }

    pub fn offer_post_handler(&self, snapshot: ActionExecutedSnapshot) -> bool {
        self.with(|slots| offer(&mut slots.post_handler, snapshot))
    }

    pub fn offer_post_result(&self, snapshot: ResultExecutedSnapshot) -> bool {
        self.with(|slots| offer(&mut slots.post_result, snapshot))
    }

    pub fn offer_session(&self, session: SessionState) -> bool {
        self.with(|slots| offer(&mut slots.session, session))
    }

    pub fn offer_response(&self, response: HttpResponse) -> bool {
        self.with(|slots| offer(&mut slots.response, response))
    }

    #[must_use]
    pub fn post_handler_context(&self) -> Option<ActionExecutedSnapshot> {
        self.with(|slots| slots.post_handler.clone())
    }

    #[must_use]
    pub fn post_result_context(&self) -> Option<ResultExecutedSnapshot> {
        self.with(|slots| slots.post_result.clone())
    }

    #[must_use]
    pub fn session(&self) -> Option<SessionState> {
        self.with(|slots| slots.session.clone())
    }

    #[must_use]
    pub fn response(&self) -> Option<HttpResponse> {
        self.with(|slots| slots.response.clone())
    }
}

impl fmt::Debug for CaptureSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with(|slots| {
            f.debug_struct("CaptureSlot")
                .field("post_handler", &slots.post_handler.is_some())
                .field("post_result", &slots.post_result.is_some())
                .field("session", &slots.session.is_some())
                .field("response", &slots.response.is_some())
                .finish()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_offer_wins_until_reset() {
        let slot = CaptureSlot::new();
        let first = SessionState::new("first");

        assert!(slot.offer_session(first));
        assert!(!slot.offer_session(SessionState::new("second")));
        assert_eq!(slot.session().map(|s| String::from(s.id())).as_deref(), Some("first"));

        slot.reset_all();
        assert!(slot.session().is_none());
        assert!(slot.offer_session(SessionState::new("third")));
        assert_eq!(slot.session().map(|s| String::from(s.id())).as_deref(), Some("third"));
    }

    #[test]
    fn clones_share_the_same_fields() {
        let slot = CaptureSlot::new();
        let handle = slot.clone();

        let response = HttpResponse::new();
        response.write("body");
        assert!(handle.offer_response(response));

        assert_eq!(slot.response().map(|r| r.output()).as_deref(), Some("body"));
        assert!(slot.post_handler_context().is_none());
        assert!(slot.post_result_context().is_none());
    }
}
