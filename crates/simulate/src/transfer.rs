//! Moving test closures across the isolation boundary.
//!
//! Rust closures cannot be sent as data, so a transferable closure is a
//! registered [`CodeUnit`] (a plain function pointer known by a stable
//! [`CodeId`]) plus the variables it captured. [`capture`] decomposes those
//! variables into a [`ClosureEnvelope`], which is what crosses the boundary
//! (as JSON). On the other side [`restore`] looks the code unit up again and
//! rebinds it to a [`CapturedContext`] rebuilt from the envelope.
//!
//! ```ignore
//! fn log_in(captured: &CapturedContext, session: &mut BrowsingSession) -> anyhow::Result<()> {
//!     let user: String = captured.get("user")?;
//!     session.get("Account/LogOn")?;
//!     Ok(())
//! }
//!
//! let script = Closure::new(code_unit!(log_in)).capture("user", String::from("steve"));
//! boundary.run_browsing_script(&script)?;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{PoisonError, RwLock};

use derive_more::derive::{Display, From};
use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::browsing::BrowsingSession;
use crate::errors::TransferError;

/// Stable identity of a registered code unit.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Display)]
#[serde(transparent)]
pub struct CodeId(String);

impl From<&str> for CodeId {
    fn from(value: &str) -> Self {
        Self(String::from(value))
    }
}

impl CodeId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The function every transferable closure runs: its restored captures and
/// the browsing session created for it inside the boundary.
pub type ScriptBody = fn(&CapturedContext, &mut BrowsingSession) -> anyhow::Result<()>;

lazy_static! {
    static ref CODE_UNITS: RwLock<HashMap<CodeId, ScriptBody>> = RwLock::new(HashMap::new());
}

fn lookup(id: &CodeId) -> Result<ScriptBody, TransferError> {
    CODE_UNITS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(id)
        .copied()
        .ok_or_else(|| TransferError::UnknownCode(id.clone()))
}

/// A function registered under a [`CodeId`] so it can be found again after
/// crossing the boundary. Creating one registers it.
#[derive(Clone)]
pub struct CodeUnit {
    id: CodeId,
}

impl CodeUnit {
    pub fn new(id: impl Into<CodeId>, body: ScriptBody) -> Self {
        let id = id.into();
        let previous = CODE_UNITS
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), body);
        if previous.is_none() {
            tracing::debug!("CodeUnit: registered {}", id);
        }
        Self { id }
    }

    #[must_use]
    pub fn id(&self) -> &CodeId {
        &self.id
    }
}

impl fmt::Debug for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CodeUnit").field(&self.id).finish()
    }
}

/// Registers a function as a [`CodeUnit`] named after the calling module.
///
/// `code_unit!(my_script)` registers the function item `my_script`;
/// `code_unit!("name", |captured, session| { .. })` registers a
/// non-capturing closure under `name`.
#[macro_export]
macro_rules! code_unit {
    ($body:ident) => {
        $crate::transfer::CodeUnit::new(concat!(module_path!(), "::", stringify!($body)), $body)
    };
    ($name:literal, $body:expr) => {
        $crate::transfer::CodeUnit::new(concat!(module_path!(), "::", $name), $body)
    };
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Char(char),
    Str(String),
}

/// One captured variable in wire form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Captured {
    Primitive(Primitive),
    NestedClosure(Box<ClosureEnvelope>),
    StructuredValue(BTreeMap<String, Captured>),
}

impl Captured {
    /// Starts decomposing a plain-data struct found at `path`.
    #[must_use]
    pub fn structure(path: &str) -> Structure<'_> {
        Structure {
            path,
            fields: BTreeMap::new(),
        }
    }
}

/// Field-by-field builder for [`Captured::StructuredValue`].
pub struct Structure<'p> {
    path: &'p str,
    fields: BTreeMap<String, Captured>,
}

impl Structure<'_> {
    pub fn field(mut self, name: &str, value: &dyn Transferable) -> Result<Self, TransferError> {
        let path = format!("{}.{name}", self.path);
        let captured = value.decompose(&path)?;
        self.fields.insert(String::from(name), captured);
        Ok(self)
    }

    pub fn finish(self) -> Result<Captured, TransferError> {
        if self.fields.is_empty() {
            return Err(TransferError::not_transferable(
                self.path,
                "a structured value needs at least one field",
            ));
        }
        Ok(Captured::StructuredValue(self.fields))
    }
}

/// A closure in wire form: its code identity and captured variables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClosureEnvelope {
    code: CodeId,
    direct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<Value>,
    #[serde(default)]
    captures: BTreeMap<String, Captured>,
}

impl ClosureEnvelope {
    #[must_use]
    pub fn code(&self) -> &CodeId {
        &self.code
    }

    /// Whether the closure captured nothing and was sent as-is.
    #[must_use]
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    #[must_use]
    pub fn captures(&self) -> &BTreeMap<String, Captured> {
        &self.captures
    }

    pub fn to_wire(&self) -> Result<String, TransferError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_wire(wire: &str) -> Result<Self, TransferError> {
        Ok(serde_json::from_str(wire)?)
    }
}

/// Values that can be captured by a transferable closure.
pub trait Transferable {
    /// Decomposes the value; `path` names it in errors.
    fn decompose(&self, path: &str) -> Result<Captured, TransferError>;
}

macro_rules! transferable_primitive {
    ($variant:ident($target:ty): $($ty:ty),*) => {
        $(
            impl Transferable for $ty {
                fn decompose(&self, _path: &str) -> Result<Captured, TransferError> {
                    Ok(Captured::Primitive(Primitive::$variant(<$target>::from(*self))))
                }
            }
        )*
    };
}

transferable_primitive!(Int(i64): i8, i16, i32, i64);
transferable_primitive!(UInt(u64): u8, u16, u32, u64);
transferable_primitive!(Bool(bool): bool);
transferable_primitive!(Char(char): char);

impl Transferable for usize {
    fn decompose(&self, path: &str) -> Result<Captured, TransferError> {
        let value = u64::try_from(*self)
            .map_err(|_| TransferError::not_transferable(path, "value does not fit in 64 bits"))?;
        Ok(Captured::Primitive(Primitive::UInt(value)))
    }
}

impl Transferable for f64 {
    fn decompose(&self, path: &str) -> Result<Captured, TransferError> {
        if !self.is_finite() {
            return Err(TransferError::not_transferable(
                path,
                "non-finite floats have no wire representation",
            ));
        }
        Ok(Captured::Primitive(Primitive::Float(*self)))
    }
}

impl Transferable for f32 {
    fn decompose(&self, path: &str) -> Result<Captured, TransferError> {
        f64::from(*self).decompose(path)
    }
}

impl Transferable for String {
    fn decompose(&self, _path: &str) -> Result<Captured, TransferError> {
        Ok(Captured::Primitive(Primitive::Str(self.clone())))
    }
}

impl Transferable for &str {
    fn decompose(&self, _path: &str) -> Result<Captured, TransferError> {
        Ok(Captured::Primitive(Primitive::Str(String::from(*self))))
    }
}

impl<T: Transferable> Transferable for Option<T> {
    fn decompose(&self, path: &str) -> Result<Captured, TransferError> {
        match self {
            Some(value) => value.decompose(path),
            None => Ok(Captured::Primitive(Primitive::Null)),
        }
    }
}

/// Wraps a value that must stay on its side of the boundary. Capturing one
/// fails with [`TransferError::NotTransferable`].
#[derive(Debug)]
pub struct Opaque<T>(pub T);

impl<T> Transferable for Opaque<T> {
    fn decompose(&self, path: &str) -> Result<Captured, TransferError> {
        Err(TransferError::not_transferable(
            path,
            "opaque values cannot be decomposed",
        ))
    }
}

/// A code unit plus the variables it closes over.
pub struct Closure {
    unit: CodeUnit,
    state: Option<Value>,
    captures: Vec<(String, Box<dyn Transferable>)>,
}

impl Closure {
    #[must_use]
    pub fn new(unit: CodeUnit) -> Self {
        Self {
            unit,
            state: None,
            captures: Vec::new(),
        }
    }

    /// Attaches serializable state that travels with the closure as a whole.
    pub fn with_state<S: Serialize>(mut self, state: &S) -> Result<Self, TransferError> {
        self.state = Some(serde_json::to_value(state)?);
        Ok(self)
    }

    /// Captures `value` as `name`, replacing an earlier capture of that name.
    #[must_use]
    pub fn capture<T: Transferable + 'static>(mut self, name: impl Into<String>, value: T) -> Self {
        let name = name.into();
        self.captures.retain(|(existing, _)| *existing != name);
        self.captures.push((name, Box::new(value)));
        self
    }

    #[must_use]
    pub fn code(&self) -> &CodeId {
        self.unit.id()
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.captures.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("Closure")
            .field("code", self.unit.id())
            .field("captures", &names)
            .field("state", &self.state)
            .finish()
    }
}

impl Transferable for Closure {
    fn decompose(&self, path: &str) -> Result<Captured, TransferError> {
        let envelope = capture_at(self, Some(path))?;
        Ok(Captured::NestedClosure(Box::new(envelope)))
    }
}

/// Decomposes `closure` into its wire form.
pub fn capture(closure: &Closure) -> Result<ClosureEnvelope, TransferError> {
    capture_at(closure, None)
}

fn capture_at(closure: &Closure, prefix: Option<&str>) -> Result<ClosureEnvelope, TransferError> {
    let mut captures = BTreeMap::new();
    for (name, value) in &closure.captures {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{name}"),
            None => name.clone(),
        };
        captures.insert(name.clone(), value.decompose(&path)?);
    }

    Ok(ClosureEnvelope {
        code: closure.unit.id().clone(),
        direct: captures.is_empty(),
        state: closure.state.clone(),
        captures,
    })
}

/// Resolves the envelope's code unit and rebinds it to the restored captures.
pub fn restore(envelope: ClosureEnvelope) -> Result<RestoredClosure, TransferError> {
    let body = lookup(&envelope.code)?;
    let values = envelope
        .captures
        .into_iter()
        .map(|(name, captured)| Ok((name, restore_value(captured)?)))
        .collect::<Result<BTreeMap<_, _>, TransferError>>()?;

    Ok(RestoredClosure {
        code: envelope.code,
        body,
        context: CapturedContext {
            values,
            state: envelope.state,
        },
    })
}

fn restore_value(captured: Captured) -> Result<RestoredValue, TransferError> {
    Ok(match captured {
        Captured::Primitive(primitive) => RestoredValue::Primitive(primitive),
        Captured::NestedClosure(envelope) => RestoredValue::Closure(restore(*envelope)?),
        Captured::StructuredValue(fields) => RestoredValue::Structured(
            fields
                .into_iter()
                .map(|(name, field)| Ok((name, restore_value(field)?)))
                .collect::<Result<BTreeMap<_, _>, TransferError>>()?,
        ),
    })
}

/// A captured variable after crossing the boundary.
#[derive(Clone, Debug)]
pub enum RestoredValue {
    Primitive(Primitive),
    Closure(RestoredClosure),
    Structured(BTreeMap<String, RestoredValue>),
}

impl RestoredValue {
    /// Field access for restoring a structured value captured as `name`.
    pub fn fields<'a>(&'a self, name: &str) -> Result<Fields<'a>, TransferError> {
        match self {
            RestoredValue::Structured(values) => Ok(Fields {
                path: String::from(name),
                values,
            }),
            _ => Err(TransferError::mismatch(name, "structured value")),
        }
    }

    fn primitive(&self, name: &str, expected: &'static str) -> Result<&Primitive, TransferError> {
        match self {
            RestoredValue::Primitive(primitive) => Ok(primitive),
            _ => Err(TransferError::mismatch(name, expected)),
        }
    }
}

pub struct Fields<'a> {
    path: String,
    values: &'a BTreeMap<String, RestoredValue>,
}

impl Fields<'_> {
    pub fn get<T: Restore>(&self, field: &str) -> Result<T, TransferError> {
        let path = format!("{}.{field}", self.path);
        let value = self
            .values
            .get(field)
            .ok_or_else(|| TransferError::MissingCapture(path.clone()))?;
        T::restore(value, &path)
    }
}

/// Values that can be read back out of a [`CapturedContext`].
pub trait Restore: Sized {
    fn restore(value: &RestoredValue, name: &str) -> Result<Self, TransferError>;
}

macro_rules! restore_integer {
    ($($ty:ty),*) => {
        $(
            impl Restore for $ty {
                fn restore(value: &RestoredValue, name: &str) -> Result<Self, TransferError> {
                    let converted = match value.primitive(name, stringify!($ty))? {
                        Primitive::Int(number) => <$ty>::try_from(*number).ok(),
                        Primitive::UInt(number) => <$ty>::try_from(*number).ok(),
                        _ => None,
                    };
                    converted.ok_or_else(|| TransferError::mismatch(name, stringify!($ty)))
                }
            }
        )*
    };
}

restore_integer!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl Restore for f64 {
    fn restore(value: &RestoredValue, name: &str) -> Result<Self, TransferError> {
        match value.primitive(name, "f64")? {
            Primitive::Float(number) => Ok(*number),
            _ => Err(TransferError::mismatch(name, "f64")),
        }
    }
}

impl Restore for f32 {
    #[allow(clippy::cast_possible_truncation)]
    fn restore(value: &RestoredValue, name: &str) -> Result<Self, TransferError> {
        match value.primitive(name, "f32")? {
            Primitive::Float(number) if number.abs() <= f64::from(f32::MAX) => Ok(*number as f32),
            _ => Err(TransferError::mismatch(name, "f32")),
        }
    }
}

impl Restore for bool {
    fn restore(value: &RestoredValue, name: &str) -> Result<Self, TransferError> {
        match value.primitive(name, "bool")? {
            Primitive::Bool(flag) => Ok(*flag),
            _ => Err(TransferError::mismatch(name, "bool")),
        }
    }
}

impl Restore for char {
    fn restore(value: &RestoredValue, name: &str) -> Result<Self, TransferError> {
        match value.primitive(name, "char")? {
            Primitive::Char(character) => Ok(*character),
            _ => Err(TransferError::mismatch(name, "char")),
        }
    }
}

impl Restore for String {
    fn restore(value: &RestoredValue, name: &str) -> Result<Self, TransferError> {
        match value.primitive(name, "string")? {
            Primitive::Str(text) => Ok(text.clone()),
            _ => Err(TransferError::mismatch(name, "string")),
        }
    }
}

impl<T: Restore> Restore for Option<T> {
    fn restore(value: &RestoredValue, name: &str) -> Result<Self, TransferError> {
        match value {
            RestoredValue::Primitive(Primitive::Null) => Ok(None),
            other => T::restore(other, name).map(Some),
        }
    }
}

/// The variables a restored closure runs against.
#[derive(Clone, Debug, Default)]
pub struct CapturedContext {
    values: BTreeMap<String, RestoredValue>,
    state: Option<Value>,
}

impl CapturedContext {
    pub fn get<T: Restore>(&self, name: &str) -> Result<T, TransferError> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| TransferError::MissingCapture(String::from(name)))?;
        T::restore(value, name)
    }

    pub fn closure(&self, name: &str) -> Result<&RestoredClosure, TransferError> {
        match self.values.get(name) {
            Some(RestoredValue::Closure(closure)) => Ok(closure),
            Some(_) => Err(TransferError::mismatch(name, "closure")),
            None => Err(TransferError::MissingCapture(String::from(name))),
        }
    }

    /// The state attached with [`Closure::with_state`].
    pub fn state<T: DeserializeOwned>(&self) -> Result<T, TransferError> {
        let state = self
            .state
            .clone()
            .ok_or_else(|| TransferError::MissingCapture(String::from("state")))?;
        Ok(serde_json::from_value(state)?)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A code unit bound to its restored captures, ready to run.
#[derive(Clone)]
pub struct RestoredClosure {
    code: CodeId,
    body: ScriptBody,
    context: CapturedContext,
}

impl RestoredClosure {
    #[must_use]
    pub fn code(&self) -> &CodeId {
        &self.code
    }

    #[must_use]
    pub fn context(&self) -> &CapturedContext {
        &self.context
    }

    pub fn invoke(&self, session: &mut BrowsingSession) -> anyhow::Result<()> {
        (self.body)(&self.context, session)
    }
}

impl fmt::Debug for RestoredClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestoredClosure")
            .field("code", &self.code)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Credentials {
        user: String,
        password: Option<String>,
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

    struct Marker;

    impl Transferable for Marker {
        fn decompose(&self, path: &str) -> Result<Captured, TransferError> {
            Captured::structure(path).finish()
        }
    }

    fn noop(_captured: &CapturedContext, _session: &mut BrowsingSession) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn closure_without_captures_is_sent_directly() {
        let closure = Closure::new(code_unit!(noop));
        let envelope = capture(&closure).expect("captured");

        assert!(envelope.is_direct());
        assert!(envelope.captures().is_empty());
        assert!(envelope.code().as_str().ends_with("::noop"));
    }

    #[test]
    fn primitives_and_structs_survive_the_wire() {
        let closure = Closure::new(code_unit!(noop))
            .capture("count", 3_i32)
            .capture("ratio", 0.5_f64)
            .capture("label", "hello")
            .capture(
                "login",
                Credentials {
                    user: String::from("steve"),
                    password: None,
                },
            );

        let wire = capture(&closure).and_then(|envelope| envelope.to_wire()).expect("wire");
        let restored = ClosureEnvelope::from_wire(&wire)
            .and_then(restore)
            .expect("restored");

        let context = restored.context();
        assert_eq!(context.get::<i32>("count").expect("count"), 3);
        assert!((context.get::<f64>("ratio").expect("ratio") - 0.5).abs() < f64::EPSILON);
        assert_eq!(context.get::<String>("label").expect("label"), "hello");

        let login: Credentials = context.get("login").expect("login");
        assert_eq!(login.user, "steve");
        assert_eq!(login.password, None);
    }

    #[test]
    fn single_precision_floats_read_back_as_f32() {
        let closure = Closure::new(code_unit!(noop))
            .capture("scale", 1.25_f32)
            .capture("huge", f64::MAX);

        let restored = restore(capture(&closure).expect("captured")).expect("restored");
        let context = restored.context();
        assert!((context.get::<f32>("scale").expect("scale") - 1.25).abs() < f32::EPSILON);
        assert!(matches!(
            context.get::<f32>("huge"),
            Err(TransferError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn nested_closures_are_restored_with_their_own_captures() {
        let helper = Closure::new(code_unit!("helper", |_captured, _session| Ok(())))
            .capture("depth", 2_u8);
        let closure = Closure::new(code_unit!(noop)).capture("helper", helper);

        let envelope = capture(&closure).expect("captured");
        assert!(!envelope.is_direct());
        assert!(matches!(
            envelope.captures().get("helper"),
            Some(Captured::NestedClosure(_))
        ));

        let restored = restore(envelope).expect("restored");
        let nested = restored.context().closure("helper").expect("nested");
        assert!(nested.code().as_str().ends_with("::helper"));
        assert_eq!(nested.context().get::<u8>("depth").expect("depth"), 2);
    }

    #[test]
    fn opaque_values_fail_at_capture_naming_the_path() {
        let helper = Closure::new(code_unit!(noop)).capture("secret", Opaque(vec![1_u8]));
        let closure = Closure::new(code_unit!(noop)).capture("helper", helper);

        match capture(&closure) {
            Err(TransferError::NotTransferable { path, .. }) => assert_eq!(path, "helper.secret"),
            other => panic!("expected NotTransferable, got {other:?}"),
        }
    }

    #[test]
    fn empty_structs_and_non_finite_floats_are_rejected() {
        let empty = Closure::new(code_unit!(noop)).capture("marker", Marker);
        assert!(matches!(
            capture(&empty),
            Err(TransferError::NotTransferable { path, .. }) if path == "marker"
        ));

        let nan = Closure::new(code_unit!(noop)).capture("ratio", f64::NAN);
        assert!(matches!(
            capture(&nan),
            Err(TransferError::NotTransferable { path, .. }) if path == "ratio"
        ));
    }

    #[test]
    fn unknown_code_identity_cannot_be_restored() {
        let wire = r#"{"code":"nowhere::missing","direct":true}"#;
        let envelope = ClosureEnvelope::from_wire(wire).expect("envelope");

        assert!(matches!(
            restore(envelope),
            Err(TransferError::UnknownCode(code)) if code.as_str() == "nowhere::missing"
        ));
    }

    #[test]
    fn typed_reads_report_mismatches_and_missing_names() {
        let closure = Closure::new(code_unit!(noop)).capture("count", 300_u32);
        let restored = restore(capture(&closure).expect("captured")).expect("restored");
        let context = restored.context();

        assert!(matches!(
            context.get::<u8>("count"),
            Err(TransferError::TypeMismatch { .. })
        ));
        assert!(matches!(
            context.get::<String>("missing"),
            Err(TransferError::MissingCapture(name)) if name == "missing"
        ));
        assert!(context.closure("count").is_err());
    }

    #[test]
    fn state_travels_with_the_closure() {
        let closure = Closure::new(code_unit!(noop))
            .with_state(&serde_json::json!({ "attempts": 2 }))
            .expect("state");
        let restored = restore(capture(&closure).expect("captured")).expect("restored");

        let state: serde_json::Value = restored.context().state().expect("state");
        assert_eq!(state["attempts"], 2);
    }
}
