use serde::Serialize;
use serde_json::Value;

use crate::errors::{SimulateError, SimulateResult};

/// Flattens a serializable record into ordered form fields.
///
/// `null` members are skipped, nested records are prefixed with
/// `<outer>.` and sequences repeat their key once per element.
pub fn to_form_fields<T: Serialize + ?Sized>(record: &T) -> SimulateResult<Vec<(String, String)>> {
    let value = serde_json::to_value(record)
        .map_err(|err| SimulateError::invalid(format!("form data could not be serialized: {err}")))?;

    let Value::Object(members) = value else {
        return Err(SimulateError::invalid("form data must be a record of named fields"));
    };

    let mut fields = Vec::new();
    for (name, member) in members {
        flatten(&name, member, &mut fields);
    }
    Ok(fields)
}

fn flatten(key: &str, value: Value, fields: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::String(text) => fields.push((String::from(key), text)),
        Value::Bool(_) | Value::Number(_) => fields.push((String::from(key), value.to_string())),
        Value::Array(items) => {
            for item in items {
                flatten(key, item, fields);
            }
        }
        Value::Object(members) => {
            for (name, member) in members {
                flatten(&format!("{key}.{name}"), member, fields);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Serialize)]
    struct LogOn<'a> {
        username: &'a str,
        password: &'a str,
        remember_me: bool,
        return_url: Option<&'a str>,
    }

    #[test]
    fn record_fields_keep_declaration_order_and_skip_nulls() {
        let fields = to_form_fields(&LogOn {
            username: "steve",
            password: "secret",
            remember_me: false,
            return_url: None,
        })
        .expect("fields");

        assert_eq!(
            fields,
            vec![
                (String::from("username"), String::from("steve")),
                (String::from("password"), String::from("secret")),
                (String::from("remember_me"), String::from("false")),
            ]
        );
    }

    #[test]
    fn nested_records_are_prefixed() {
        let fields = to_form_fields(&json!({ "Form": { "name": "hello", "age": 30 } })).expect("fields");

        assert_eq!(
            fields,
            vec![
                (String::from("Form.name"), String::from("hello")),
                (String::from("Form.age"), String::from("30")),
            ]
        );
    }

    #[test]
    fn sequences_repeat_their_key() {
        let fields = to_form_fields(&json!({ "tag": ["a", "b"] })).expect("fields");
        assert_eq!(
            fields,
            vec![
                (String::from("tag"), String::from("a")),
                (String::from("tag"), String::from("b")),
            ]
        );
    }

    #[test]
    fn non_records_are_rejected() {
        assert!(matches!(
            to_form_fields(&"just text"),
            Err(SimulateError::InvalidArgument(_))
        ));
        assert!(matches!(
            to_form_fields(&[1, 2]),
            Err(SimulateError::InvalidArgument(_))
        ));
    }
}
