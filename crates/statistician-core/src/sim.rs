use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::registry::{ControlPort, DeviceClass, NodeValue, ParameterRegistry, RegistryError, Scope};

#[derive(Debug, Clone)]
enum Source {
    Fixed(NodeValue),
    /// Values served in order; the last one is held once the queue drains.
    Script {
        pending: VecDeque<NodeValue>,
        held: Option<NodeValue>,
    },
    Counter { next: i64, step: i64 },
}

impl Source {
    fn next_value(&mut self) -> Option<NodeValue> {
        match self {
            Source::Fixed(value) => Some(value.clone()),
            Source::Script { pending, held } => {
                if let Some(value) = pending.pop_front() {
                    *held = Some(value.clone());
                    return Some(value);
                }
                held.clone()
            }
            Source::Counter { next, step } => {
                let value = *next;
                *next = next.saturating_add(*step);
                Some(NodeValue::Integer(value))
            }
        }
    }
}

#[derive(Debug)]
struct SimNode {
    source: Source,
    readable: bool,
}

#[derive(Debug, Default)]
struct SimState {
    nodes: HashMap<(Scope, String), SimNode>,
    registers: HashMap<u32, u32>,
    reads: u64,
    lose_after: Option<u64>,
    panic_after: Option<u64>,
    lost: bool,
    strict_registers: bool,
    register_width: Option<u32>,
}

impl SimState {
    fn check_present(&self) -> Result<(), RegistryError> {
        let exhausted = self.lose_after.is_some_and(|limit| self.reads >= limit);
        if self.lost || exhausted {
            return Err(RegistryError::DeviceLost);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortMode {
    Present,
    Absent,
    Failing,
}

/// In-memory stand-in for a camera's parameter registry.
///
/// Nodes are configured up front with the builder methods; reads are served
/// from per-node sources. Cloning shares the underlying state.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    class: Option<DeviceClass>,
    open: bool,
    port: PortMode,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedDevice {
    pub fn new(class: DeviceClass) -> Self {
        Self {
            class: Some(class),
            open: true,
            port: PortMode::Present,
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// A device exposing every statistic node, with counters that advance on
    /// each read and a couple of transient errors early in the session.
    pub fn typical(class: DeviceClass) -> Self {
        let failed_buffer_text = match class {
            DeviceClass::Usb => "The image stream is out of sync.\n",
            DeviceClass::GigE => "The buffer was incompletely grabbed.\n",
        };

        let device = Self::new(class)
            .with_value(Scope::Stream, "Statistic_Last_Failed_Buffer_Status", NodeValue::Integer(0))
            .with_counter(Scope::Stream, "Statistic_Total_Buffer_Count", 0, 1)
            .with_value(Scope::Stream, "Statistic_Failed_Buffer_Count", NodeValue::Integer(1))
            .with_value(Scope::Control, "TemperatureAbs", NodeValue::Integer(41))
            .with_value(Scope::Transport, "Statistic_Last_Error_Status", NodeValue::Integer(0))
            .with_script(
                Scope::Transport,
                "Statistic_Last_Error_Status_Text",
                vec![NodeValue::String(String::new())],
            )
            .with_script(
                Scope::Stream,
                "Statistic_Last_Failed_Buffer_Status_Text",
                vec![
                    NodeValue::String(String::new()),
                    NodeValue::String(failed_buffer_text.to_string()),
                    NodeValue::String(String::new()),
                ],
            )
            .with_value(Scope::Control, "TemperatureState", NodeValue::Enumeration("Ok".to_string()))
            .with_value(Scope::Control, "CriticalTemperature", NodeValue::Boolean(false))
            .with_value(Scope::Control, "OverTemperature", NodeValue::Boolean(false));

        match class {
            DeviceClass::Usb => device
                .with_value(Scope::Stream, "Statistic_Missed_Frame_Count", NodeValue::Integer(0))
                .with_value(Scope::Stream, "Statistic_Resynchronization_Count", NodeValue::Integer(1))
                .with_counter(Scope::Stream, "Statistic_Last_Block_Id", 0, 1)
                .with_value(Scope::Transport, "Statistic_Read_Pipe_Reset_Count", NodeValue::Integer(0))
                .with_value(Scope::Transport, "Statistic_Write_Pipe_Reset_Count", NodeValue::Integer(0))
                .with_value(Scope::Transport, "Statistic_Read_Operations_Failed_Count", NodeValue::Integer(0))
                .with_value(Scope::Transport, "Statistic_Write_Operations_Failed_Count", NodeValue::Integer(0))
                .with_register(0xAFFB_0010, 0)
                .with_register(0xAFFB_0004, 2)
                .with_register(0xAFFB_000C, 0)
                .with_register(0xAFFB_0020, 0)
                .with_register(0xAFFB_0008, 1)
                .with_register(0xAFFB_0014, 3),
            DeviceClass::GigE => device
                .with_value(Scope::Stream, "Statistic_Buffer_Underrun_Count", NodeValue::Integer(0))
                .with_counter(Scope::Stream, "Statistic_Total_Packet_Count", 0, 1_200)
                .with_value(Scope::Stream, "Statistic_Resend_Request_Count", NodeValue::Integer(2))
                .with_value(Scope::Stream, "Statistic_Resend_Packet_Count", NodeValue::Integer(5))
                .with_value(Scope::Stream, "Statistic_Failed_Packet_Count", NodeValue::Integer(0))
                .with_script(
                    Scope::Stream,
                    "LastError",
                    vec![
                        NodeValue::Enumeration(String::new()),
                        NodeValue::Enumeration("Overtrigger".to_string()),
                        NodeValue::Enumeration(String::new()),
                    ],
                ),
        }
    }

    fn insert(self, scope: Scope, name: &str, source: Source) -> Self {
        self.lock().nodes.insert(
            (scope, name.to_string()),
            SimNode {
                source,
                readable: true,
            },
        );
        self
    }

    pub fn with_value(self, scope: Scope, name: &str, value: NodeValue) -> Self {
        self.insert(scope, name, Source::Fixed(value))
    }

    /// Serves `values` in order on successive reads, then keeps returning the
    /// last one.
    pub fn with_script(self, scope: Scope, name: &str, values: Vec<NodeValue>) -> Self {
        self.insert(
            scope,
            name,
            Source::Script {
                pending: values.into(),
                held: None,
            },
        )
    }

    pub fn with_counter(self, scope: Scope, name: &str, start: i64, step: i64) -> Self {
        self.insert(scope, name, Source::Counter { next: start, step })
    }

    /// Declares a node that exists but never reports itself readable.
    pub fn unreadable(self, scope: Scope, name: &str) -> Self {
        {
            let mut state = self.lock();
            let node = state
                .nodes
                .entry((scope, name.to_string()))
                .or_insert(SimNode {
                    source: Source::Fixed(NodeValue::Integer(0)),
                    readable: false,
                });
            node.readable = false;
        }
        self
    }

    pub fn with_register(self, address: u32, value: u32) -> Self {
        self.lock().registers.insert(address, value);
        self
    }

    pub fn without_control_port(mut self) -> Self {
        self.port = PortMode::Absent;
        self
    }

    pub fn with_failing_port(mut self) -> Self {
        self.port = PortMode::Failing;
        self
    }

    /// The device cannot tell which transport family it belongs to.
    pub fn with_failing_class(mut self) -> Self {
        self.class = None;
        self
    }

    pub fn closed(mut self) -> Self {
        self.open = false;
        self
    }

    /// Every access fails with [`RegistryError::DeviceLost`] once `reads`
    /// values have been served.
    pub fn lose_after(self, reads: u64) -> Self {
        self.lock().lose_after = Some(reads);
        self
    }

    /// The registry panics on the first access after `reads` values have
    /// been served, as a buggy vendor SDK would.
    pub fn panic_after(self, reads: u64) -> Self {
        self.lock().panic_after = Some(reads);
        self
    }

    /// Port reads at addresses without a configured register fail instead of
    /// returning zero.
    pub fn strict_port(self) -> Self {
        self.lock().strict_registers = true;
        self
    }

    /// Port reads return `width` bytes whatever length was asked for.
    pub fn with_register_width(self, width: u32) -> Self {
        self.lock().register_width = Some(width);
        self
    }

    /// Flips readability of an existing node while a session is running.
    pub fn set_readable(&self, scope: Scope, name: &str, readable: bool) {
        if let Some(node) = self.lock().nodes.get_mut(&(scope, name.to_string())) {
            node.readable = readable;
        }
    }

    /// Simulates the device being unplugged.
    pub fn disconnect(&self) {
        self.lock().lost = true;
    }

    /// Number of node and register values served so far.
    pub fn reads(&self) -> u64 {
        self.lock().reads
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn access(&self) -> Result<MutexGuard<'_, SimState>, RegistryError> {
        let state = self.lock();
        let due = state.panic_after.filter(|limit| state.reads >= *limit);
        if let Some(limit) = due {
            drop(state);
            panic!("simulated registry fault after {limit} reads");
        }
        state.check_present()?;
        Ok(state)
    }
}

impl ParameterRegistry for SimulatedDevice {
    fn is_open(&self) -> bool {
        self.open
    }

    fn device_class(&self) -> Result<DeviceClass, RegistryError> {
        self.class
            .ok_or_else(|| RegistryError::Unsupported("device class not reported".to_string()))
    }

    fn control_port(&self) -> Result<Option<Arc<dyn ControlPort>>, RegistryError> {
        match self.port {
            PortMode::Present => Ok(Some(Arc::new(SimulatedPort {
                state: Arc::clone(&self.state),
            }))),
            PortMode::Absent => Ok(None),
            PortMode::Failing => Err(RegistryError::Unsupported(
                "control port not accessible".to_string(),
            )),
        }
    }

    fn is_readable(&self, scope: Scope, name: &str) -> Result<bool, RegistryError> {
        let state = self.access()?;
        Ok(state
            .nodes
            .get(&(scope, name.to_string()))
            .is_some_and(|node| node.readable))
    }

    fn read(&self, scope: Scope, name: &str) -> Result<NodeValue, RegistryError> {
        let mut state = self.access()?;

        let no_value = || RegistryError::NodeAccess {
            scope,
            name: name.to_string(),
            reason: "node is not readable".to_string(),
        };
        let value = match state.nodes.get_mut(&(scope, name.to_string())) {
            Some(node) if node.readable => node.source.next_value().ok_or_else(no_value)?,
            _ => return Err(no_value()),
        };
        state.reads += 1;
        Ok(value)
    }
}

/// Register window of a [`SimulatedDevice`].
#[derive(Debug)]
pub struct SimulatedPort {
    state: Arc<Mutex<SimState>>,
}

impl ControlPort for SimulatedPort {
    fn read_raw(&self, address: u32, length: u32) -> Result<Vec<u8>, RegistryError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.check_present()?;

        let value = match state.registers.get(&address) {
            Some(value) => *value,
            None if state.strict_registers => {
                return Err(RegistryError::PortAccess {
                    address,
                    reason: "no register mapped".to_string(),
                })
            }
            None => 0,
        };
        let mut bytes = value.to_le_bytes().to_vec();
        bytes.resize(state.register_width.unwrap_or(length) as usize, 0);
        state.reads += 1;
        Ok(bytes)
    }
}
