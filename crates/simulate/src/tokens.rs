use ewe_routing::security::ANTI_FORGERY_FIELD;
use lazy_regex::regex;

/// Pulls the anti-forgery token out of a rendered form.
///
/// Looks for the hidden field exactly as the host renders it:
/// `<input name="__RequestVerificationToken" type="hidden" value="..." />`.
#[must_use]
pub fn extract_anti_forgery_token(html: &str) -> Option<String> {
    let field = regex!(r#"<input name="(?P<name>[^"]+)" type="hidden" value="(?P<value>[^"]+)" />"#);
    field
        .captures_iter(html)
        .find(|captures| &captures["name"] == ANTI_FORGERY_FIELD)
        .map(|captures| String::from(&captures["value"]))
}
