use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Logical grouping of parameter nodes on a device or its link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// The camera's own node map.
    Control,
    /// The stream grabber node map.
    Stream,
    /// The transport layer node map.
    Transport,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scope::Control => "control",
            Scope::Stream => "stream",
            Scope::Transport => "transport",
        };
        f.write_str(name)
    }
}

/// Transport family of the bound device. Selects which counter subset a
/// sweep populates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// Class A: frame/resync counters, pipe counters and raw port registers.
    Usb,
    /// Class B: packet and resend counters, camera-side last error.
    GigE,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Usb => f.write_str("usb"),
            DeviceClass::GigE => f.write_str("gige"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeValue {
    Integer(i64),
    String(String),
    /// Symbolic value of an enumeration node.
    Enumeration(String),
    Boolean(bool),
}

impl NodeValue {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeValue::Integer(_) => "integer",
            NodeValue::String(_) => "string",
            NodeValue::Enumeration(_) => "enumeration",
            NodeValue::Boolean(_) => "boolean",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("device lost")]
    DeviceLost,
    #[error("{scope} node {name}: {reason}")]
    NodeAccess {
        scope: Scope,
        name: String,
        reason: String,
    },
    #[error("port read at {address:#010X} failed: {reason}")]
    PortAccess { address: u32, reason: String },
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Read access to a device's parameter nodes, as exposed by the camera SDK.
///
/// Implementations are shared between the acquisition thread and the
/// statistics poller, so every method takes `&self`.
pub trait ParameterRegistry: Send + Sync {
    fn is_open(&self) -> bool;
    fn device_class(&self) -> Result<DeviceClass, RegistryError>;
    /// Direct addressed access to the device's control port, if it has one.
    fn control_port(&self) -> Result<Option<Arc<dyn ControlPort>>, RegistryError>;
    /// `Ok(false)` when the node does not exist or is currently not readable.
    fn is_readable(&self, scope: Scope, name: &str) -> Result<bool, RegistryError>;
    fn read(&self, scope: Scope, name: &str) -> Result<NodeValue, RegistryError>;
}

pub trait ControlPort: Send + Sync {
    fn read_raw(&self, address: u32, length: u32) -> Result<Vec<u8>, RegistryError>;
}
