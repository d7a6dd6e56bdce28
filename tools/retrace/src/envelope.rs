//! Record envelopes, the operation contract and the kind registry.
//!
//! Every intercepted call is captured as an [`Envelope`]: the call's params,
//! its result and a process-wide sequence number. Envelopes hold
//! `serde_json::Value` so the store and the persisted log stay uniform; the
//! typed view lives in each operation's `Params`/`Result` structs and is
//! recovered through the [`Operation`] trait.

use crate::errors::RetraceError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ── Envelope ──────────────────────────────────────────────────────────────────

/// One captured call. `result` is `Value::Null` for operations that record
/// no result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub params: Value,
    pub result: Value,
    pub seq: u64,
}

/// The persisted form of one envelope: the envelope plus its kind name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortableEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub params: Value,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub seq: u64,
}

impl PortableEntry {
    pub fn new(kind: &str, envelope: Envelope) -> Self {
        Self {
            kind: kind.to_string(),
            params: envelope.params,
            result: envelope.result,
            seq: envelope.seq,
        }
    }

    pub fn into_envelope(self) -> (String, Envelope) {
        (
            self.kind,
            Envelope {
                params: self.params,
                result: self.result,
                seq: self.seq,
            },
        )
    }
}

// ── Operation contract ────────────────────────────────────────────────────────

/// Per-kind contract tying a recordable operation to its params, recorded
/// result and the value the caller actually receives.
///
/// `Output` is what the host function returns; `Result` is what gets
/// persisted. They differ when a call returns several values (the result
/// struct's fields expand back into a tuple) or nothing (`Result = ()` is
/// persisted as JSON null).
pub trait Operation {
    const NAME: &'static str;
    const GROUP: Option<&'static str> = None;

    type Params: Serialize + DeserializeOwned + PartialEq;
    type Result: Serialize + DeserializeOwned;
    type Output;

    fn to_result(output: &Self::Output) -> Self::Result;
    fn to_output(result: Self::Result) -> Self::Output;

    /// Per-call veto: returning false makes the wrapper treat this call as
    /// unrecorded in every mode.
    fn include(_params: &Self::Params) -> bool {
        true
    }
}

// ── Kind registry ─────────────────────────────────────────────────────────────

fn check_decodes<T: DeserializeOwned>(kind: &str, value: &Value) -> Result<(), RetraceError> {
    serde_json::from_value::<T>(value.clone())
        .map(|_| ())
        .map_err(|e| RetraceError::RecordingParse(format!("{kind}: {e}")))
}

/// Registered metadata for one record kind. The checkers are monomorphized
/// decoders used to validate hydrated envelopes against the registered
/// params and result types.
#[derive(Debug, Clone)]
pub struct KindEntry {
    pub name: &'static str,
    pub group: Option<&'static str>,
    params_checker: fn(&str, &Value) -> Result<(), RetraceError>,
    result_checker: fn(&str, &Value) -> Result<(), RetraceError>,
}

impl KindEntry {
    pub fn validate_params(&self, params: &Value) -> Result<(), RetraceError> {
        (self.params_checker)(self.name, params)
    }

    pub fn validate_result(&self, result: &Value) -> Result<(), RetraceError> {
        (self.result_checker)(self.name, result)
    }
}

/// Explicit map of every record kind a recorder is willing to handle.
/// Recording, replaying or hydrating a kind that was never registered is a
/// fatal error.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    kinds: BTreeMap<&'static str, KindEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<O: Operation>(&mut self) {
        self.kinds.insert(
            O::NAME,
            KindEntry {
                name: O::NAME,
                group: O::GROUP,
                params_checker: check_decodes::<O::Params>,
                result_checker: check_decodes::<O::Result>,
            },
        );
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn get(&self, kind: &str) -> Option<&KindEntry> {
        self.kinds.get(kind)
    }

    pub fn expect_kind(&self, kind: &str) -> Result<&KindEntry, RetraceError> {
        self.kinds
            .get(kind)
            .ok_or_else(|| RetraceError::UnregisteredKind(kind.to_string()))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &KindEntry> {
        self.kinds.values()
    }
}

// ── operation! ────────────────────────────────────────────────────────────────

/// Declares a recordable operation from a field list: the params struct, the
/// result struct and the [`Operation`] impl, with the kind name derived as
/// `<Op>Record`. Three result forms are supported:
///
/// ```ignore
/// operation! {
///     op: Touch,
///     params: TouchParams { path: String },
/// }
///
/// operation! {
///     op: ReadNote,
///     params: ReadNoteParams { path: String },
///     result: ReadNoteResult { contents: String },
/// }
///
/// operation! {
///     op: RunCmd,
///     group: "Process",
///     params: RunCmdParams { cmd: Vec<String> },
///     result: RunCmdResult { stdout: String, stderr: String },
/// }
/// ```
///
/// A single result field makes `Output` that field's type; several fields
/// expand to a tuple in declaration order; no `result` line means nothing is
/// recorded beyond the call itself (`Output = ()`). Operations that need a
/// per-call veto or bespoke conversions implement [`Operation`] by hand.
#[macro_export]
macro_rules! operation {
    (
        op: $op:ident,
        params: $params:ident { $($pf:ident : $pt:ty),* $(,)? } $(,)?
    ) => {
        $crate::operation!(@structs $op, $params { $($pf : $pt),* });
        impl $crate::envelope::Operation for $op {
            const NAME: &'static str = concat!(stringify!($op), "Record");
            type Params = $params;
            type Result = ();
            type Output = ();
            fn to_result(_output: &Self::Output) -> Self::Result {}
            fn to_output(_result: Self::Result) -> Self::Output {}
        }
    };
    (
        op: $op:ident,
        group: $group:literal,
        params: $params:ident { $($pf:ident : $pt:ty),* $(,)? } $(,)?
    ) => {
        $crate::operation!(@structs $op, $params { $($pf : $pt),* });
        impl $crate::envelope::Operation for $op {
            const NAME: &'static str = concat!(stringify!($op), "Record");
            const GROUP: Option<&'static str> = Some($group);
            type Params = $params;
            type Result = ();
            type Output = ();
            fn to_result(_output: &Self::Output) -> Self::Result {}
            fn to_output(_result: Self::Result) -> Self::Output {}
        }
    };
    (
        op: $op:ident,
        params: $params:ident { $($pf:ident : $pt:ty),* $(,)? },
        result: $result:ident { $rf:ident : $rt:ty $(,)? } $(,)?
    ) => {
        $crate::operation!(@structs $op, $params { $($pf : $pt),* });
        $crate::operation!(@result_struct $result { $rf : $rt });
        impl $crate::envelope::Operation for $op {
            const NAME: &'static str = concat!(stringify!($op), "Record");
            type Params = $params;
            type Result = $result;
            type Output = $rt;
            fn to_result(output: &Self::Output) -> Self::Result {
                $result { $rf: output.clone() }
            }
            fn to_output(result: Self::Result) -> Self::Output {
                result.$rf
            }
        }
    };
    (
        op: $op:ident,
        group: $group:literal,
        params: $params:ident { $($pf:ident : $pt:ty),* $(,)? },
        result: $result:ident { $rf:ident : $rt:ty $(,)? } $(,)?
    ) => {
        $crate::operation!(@structs $op, $params { $($pf : $pt),* });
        $crate::operation!(@result_struct $result { $rf : $rt });
        impl $crate::envelope::Operation for $op {
            const NAME: &'static str = concat!(stringify!($op), "Record");
            const GROUP: Option<&'static str> = Some($group);
            type Params = $params;
            type Result = $result;
            type Output = $rt;
            fn to_result(output: &Self::Output) -> Self::Result {
                $result { $rf: output.clone() }
            }
            fn to_output(result: Self::Result) -> Self::Output {
                result.$rf
            }
        }
    };
    (
        op: $op:ident,
        params: $params:ident { $($pf:ident : $pt:ty),* $(,)? },
        result: $result:ident { $rf0:ident : $rt0:ty, $($rf:ident : $rt:ty),+ $(,)? } $(,)?
    ) => {
        $crate::operation!(@structs $op, $params { $($pf : $pt),* });
        $crate::operation!(@result_struct $result { $rf0 : $rt0, $($rf : $rt),+ });
        impl $crate::envelope::Operation for $op {
            const NAME: &'static str = concat!(stringify!($op), "Record");
            type Params = $params;
            type Result = $result;
            type Output = ($rt0, $($rt),+);
            fn to_result(output: &Self::Output) -> Self::Result {
                let ($rf0, $($rf),+) = output;
                $result { $rf0: $rf0.clone(), $($rf: $rf.clone()),+ }
            }
            fn to_output(result: Self::Result) -> Self::Output {
                (result.$rf0, $(result.$rf),+)
            }
        }
    };
    (
        op: $op:ident,
        group: $group:literal,
        params: $params:ident { $($pf:ident : $pt:ty),* $(,)? },
        result: $result:ident { $rf0:ident : $rt0:ty, $($rf:ident : $rt:ty),+ $(,)? } $(,)?
    ) => {
        $crate::operation!(@structs $op, $params { $($pf : $pt),* });
        $crate::operation!(@result_struct $result { $rf0 : $rt0, $($rf : $rt),+ });
        impl $crate::envelope::Operation for $op {
            const NAME: &'static str = concat!(stringify!($op), "Record");
            const GROUP: Option<&'static str> = Some($group);
            type Params = $params;
            type Result = $result;
            type Output = ($rt0, $($rt),+);
            fn to_result(output: &Self::Output) -> Self::Result {
                let ($rf0, $($rf),+) = output;
                $result { $rf0: $rf0.clone(), $($rf: $rf.clone()),+ }
            }
            fn to_output(result: Self::Result) -> Self::Output {
                (result.$rf0, $(result.$rf),+)
            }
        }
    };
    (@structs $op:ident, $params:ident { $($pf:ident : $pt:ty),* }) => {
        pub struct $op;

        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        pub struct $params {
            $(pub $pf: $pt,)*
        }
    };
    (@result_struct $result:ident { $($rf:ident : $rt:ty),+ }) => {
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        pub struct $result {
            $(pub $rf: $rt,)+
        }
    };
}
