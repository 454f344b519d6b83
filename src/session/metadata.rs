use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::panic::PanicHookInfo;

/// Why a dump was taken
///
/// Serialized as a bare string. Unknown strings are kept verbatim in
/// [`DumpReason::Other`] so records written by newer producers still load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DumpReason {
    Shutdown,
    Autosave,
    UncaughtException,
    Other(String),
}

impl DumpReason {
    pub fn as_str(&self) -> &str {
        match self {
            DumpReason::Shutdown => "shutdown",
            DumpReason::Autosave => "autosave",
            DumpReason::UncaughtException => "uncaught-exception",
            DumpReason::Other(reason) => reason,
        }
    }
}

impl From<String> for DumpReason {
    fn from(value: String) -> Self {
        match value.as_str() {
            "shutdown" => DumpReason::Shutdown,
            "autosave" => DumpReason::Autosave,
            "uncaught-exception" => DumpReason::UncaughtException,
            _ => DumpReason::Other(value),
        }
    }
}

impl From<DumpReason> for String {
    fn from(reason: DumpReason) -> Self {
        match reason {
            DumpReason::Other(reason) => reason,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for DumpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured description of an uncaught fault, stored in `meta.error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultInfo {
    pub message: String,
    #[serde(default)]
    pub stack: String,
    /// Additional fields, flattened next to `message` and `stack`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FaultInfo {
    /// Create a fault description with an empty stack
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: String::new(),
            extra: Map::new(),
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Describe an `anyhow` error, keeping its cause chain (and backtrace when
    /// captured) as the stack text
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        Self::new(error.to_string()).with_stack(format!("{:?}", error))
    }

    /// Describe any standard error, walking its source chain
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut stack = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            stack.push_str("\nCaused by: ");
            stack.push_str(&cause.to_string());
            source = cause.source();
        }

        Self::new(error.to_string()).with_stack(stack)
    }

    /// Describe a panic from inside a panic hook
    pub fn from_panic(info: &PanicHookInfo<'_>) -> Self {
        let payload = info.payload();
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "Box<dyn Any>".to_string()
        };

        let backtrace = std::backtrace::Backtrace::force_capture();
        let mut fault = Self::new(message)
            .with_stack(backtrace.to_string())
            .with_field("kind", "panic");

        if let Some(location) = info.location() {
            fault = fault.with_field(
                "location",
                format!(
                    "{}:{}:{}",
                    location.file(),
                    location.line(),
                    location.column()
                ),
            );
        }
        if let Some(name) = std::thread::current().name() {
            fault = fault.with_field("thread", name);
        }

        fault
    }
}

impl fmt::Display for FaultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Metadata describing when and why a record was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Milliseconds since the Unix epoch
    pub at: i64,
    pub reason: DumpReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FaultInfo>,
}

impl SessionMeta {
    /// Stamp metadata with the current time
    pub fn now(reason: DumpReason, error: Option<FaultInfo>) -> Self {
        Self {
            at: Utc::now().timestamp_millis(),
            reason,
            error,
        }
    }

    /// `at` as a UTC timestamp, if it is in range
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.at)
    }
}

/// The persisted unit: metadata plus the opaque application state
///
/// Field order is significant: `meta` is always written before `state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    meta: SessionMeta,
    state: Value,
}

impl SessionRecord {
    pub fn new(meta: SessionMeta, state: Value) -> Self {
        Self { meta, state }
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    pub fn reason(&self) -> &DumpReason {
        &self.meta.reason
    }

    pub fn error(&self) -> Option<&FaultInfo> {
        self.meta.error.as_ref()
    }

    pub fn state(&self) -> &Value {
        &self.state
    }

    /// Take the state, deserialized into the application's own type
    pub fn state_as<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.state)
    }

    pub fn into_state(self) -> Value {
        self.state
    }
}
