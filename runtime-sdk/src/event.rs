//! Event types for runtimes.

/// An event emitted by the runtime.
///
/// This trait can be derived:
/// ```
/// # #[cfg(feature = "evm-runtime-sdk-macros")]
/// # mod example {
/// # use evm_runtime_sdk_macros::Event;
/// const MODULE_NAME: &str = "my-module";
/// #[derive(Clone, Debug, cbor::Encode, Event)]
/// #[sdk_event(autonumber)] // `module_name` meta is required if `MODULE_NAME` isn't in scope
/// enum MyEvent {
///    Greeting(String),      // autonumbered to 0
///    #[sdk_event(code = 2)] // manually numbered to 2 (`code` is required if not autonumbering)
///    DontPanic,             // autonumbered to 1
///    Salutation {           // autonumbered to 3
///        plural: bool,
///    }
/// }
/// # }
/// ```
pub trait Event: Sized + cbor::Encode {
    /// Name of the module that emitted the event.
    fn module_name() -> &'static str;

    /// Code uniquely identifying the event.
    fn code(&self) -> u32;

    /// Whether any variant of the event uses the given code.
    fn has_variant_with_code(code: u32) -> bool;

    /// Converts an emitted event into a tag that can be emitted by the runtime.
    ///
    /// # Key
    ///
    /// ```text
    /// <module (variable size bytes)> <code (big-endian u32)>
    /// ```
    ///
    /// # Value
    ///
    /// CBOR-serialized event value.
    ///
    fn into_event_tag(self) -> EventTag {
        etag_for_event(Self::module_name(), self.code(), cbor::to_value(self))
    }
}

impl Event for () {
    fn module_name() -> &'static str {
        "(none)"
    }

    fn code(&self) -> u32 {
        Default::default()
    }

    fn has_variant_with_code(_code: u32) -> bool {
        false
    }
}

/// An event tag (key/value pair).
#[derive(Clone, Debug, Default, PartialEq, Eq, cbor::Encode, cbor::Decode)]
pub struct EventTag {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Generate an EventTag corresponding to the passed event triple.
pub fn etag_for_event(module_name: &str, code: u32, value: cbor::Value) -> EventTag {
    EventTag {
        key: [module_name.as_bytes(), &code.to_be_bytes()].concat(),
        value: cbor::to_vec(value),
    }
}
