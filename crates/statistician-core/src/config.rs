use crate::registry::Scope;

/// What a sweep does with a field whose node is not readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnavailablePolicy {
    /// Keep the last observed value.
    #[default]
    Retain,
    /// Put the field back to its sentinel.
    Reset,
}

/// What an empty error text does to the scalar text field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorTextPolicy {
    /// Store the "no error" marker.
    #[default]
    Latest,
    /// Store the marker only while no real error text has been seen.
    KeepLastError,
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub unavailable: UnavailablePolicy,
    pub error_text: ErrorTextPolicy,
    /// Node map holding `CriticalTemperature` and `OverTemperature`.
    pub temperature_flags_scope: Scope,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            unavailable: UnavailablePolicy::Retain,
            error_text: ErrorTextPolicy::Latest,
            temperature_flags_scope: Scope::Control,
        }
    }
}
