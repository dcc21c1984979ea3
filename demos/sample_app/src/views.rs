use ewe_routing::application::ApplicationBuilder;
use ewe_routing::errors::ActionError;
use ewe_routing::results::ViewContext;

fn open_page(view: &mut ViewContext<'_>, title: &str) {
    view.write("<!DOCTYPE html>\n<html>\n<head>\n<title>");
    view.write_encoded(title);
    view.write("</title>\n<link href=\"/Content/site.css\" rel=\"stylesheet\" type=\"text/css\" />\n</head>\n<body>\n");
    match view.user().map(|user| user.name().to_owned()) {
        Some(name) => {
            view.write("<div id=\"logindisplay\">Welcome <b>");
            view.write_encoded(&name);
            view.write("</b>! [ <a href=\"/Account/LogOff\">Log Off</a> ]</div>\n");
        }
        None => view.write("<div id=\"logindisplay\">[ <a href=\"/Account/LogOn\">Log On</a> ]</div>\n"),
    }
}

fn close_page(view: &mut ViewContext<'_>) {
    view.write("</body>\n</html>\n");
}

fn home_index(view: &mut ViewContext<'_>) -> Result<(), ActionError> {
    let message = view.view_data().get_str("Message").unwrap_or_default().to_owned();
    open_page(view, "Home Page");
    view.write("<h2>");
    view.write_encoded(&message);
    view.write("</h2>\n");
    close_page(view);
    Ok(())
}

fn home_dashboard(view: &mut ViewContext<'_>) -> Result<(), ActionError> {
    open_page(view, "Dashboard");
    view.write("<h2>Dashboard</h2>\n");
    view.render_action("Summary", "Home")?;
    close_page(view);
    Ok(())
}

fn account_log_on(view: &mut ViewContext<'_>) -> Result<(), ActionError> {
    let username = view.view_data().get_str("username").unwrap_or_default().to_owned();
    let errors: Vec<String> = view
        .model_state()
        .iter()
        .flat_map(|(_, messages)| messages.iter().cloned())
        .collect();
    let token = view.anti_forgery_token();

    open_page(view, "Log On");
    view.write("<h2>Log On</h2>\n");
    if !errors.is_empty() {
        view.write("<ul class=\"validation-summary-errors\">\n");
        for error in &errors {
            view.write("<li>");
            view.write_encoded(error);
            view.write("</li>\n");
        }
        view.write("</ul>\n");
    }
    view.write("<form method=\"post\">\n");
    view.write(&token);
    view.write("\n<input name=\"username\" type=\"text\" value=\"");
    view.write_encoded(&username);
    view.write("\" />\n<input name=\"password\" type=\"password\" />\n<input type=\"submit\" value=\"Log On\" />\n</form>\n");
    close_page(view);
    Ok(())
}

pub fn register(builder: ApplicationBuilder) -> ApplicationBuilder {
    builder
        .view("Home", "Index", home_index)
        .view("Home", "Dashboard", home_dashboard)
        .view("Account", "LogOn", account_log_on)
}
