use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use tracing::{debug, error, trace, warn};

use crate::config::{CollectorConfig, ErrorTextPolicy, UnavailablePolicy};
use crate::registry::{ControlPort, DeviceClass, NodeValue, ParameterRegistry, RegistryError, Scope};
use crate::snapshot::{RawCounters, SessionEnd, Snapshot, NO_ERROR, UNSET_COUNT, UNSET_TEXT};

type CountSlot = fn(&mut Snapshot) -> &mut i64;
type TextSlot = fn(&mut Snapshot) -> (&mut String, Option<&mut BTreeSet<String>>);
type FlagSlot = fn(&mut Snapshot) -> &mut Option<bool>;
type RawSlot = fn(&mut RawCounters) -> &mut Option<u64>;

struct CountField {
    scope: Scope,
    name: &'static str,
    slot: CountSlot,
}

struct TextField {
    scope: Scope,
    name: &'static str,
    slot: TextSlot,
}

/// Fields read on top of the common set for one device class.
struct ClassFields {
    counts: &'static [CountField],
    texts: &'static [TextField],
    raw_registers: bool,
}

const COMMON_COUNTS: &[CountField] = &[
    CountField {
        scope: Scope::Stream,
        name: "Statistic_Last_Failed_Buffer_Status",
        slot: |s| &mut s.last_failed_buffer_status,
    },
    CountField {
        scope: Scope::Stream,
        name: "Statistic_Total_Buffer_Count",
        slot: |s| &mut s.total_buffers,
    },
    CountField {
        scope: Scope::Stream,
        name: "Statistic_Failed_Buffer_Count",
        slot: |s| &mut s.failed_buffers,
    },
    CountField {
        scope: Scope::Control,
        name: "TemperatureAbs",
        slot: |s| &mut s.current_temperature,
    },
    CountField {
        scope: Scope::Transport,
        name: "Statistic_Last_Error_Status",
        slot: |s| &mut s.tl_last_error_status,
    },
];

const COMMON_TEXTS: &[TextField] = &[
    TextField {
        scope: Scope::Transport,
        name: "Statistic_Last_Error_Status_Text",
        slot: |s| (&mut s.tl_last_error_status_text, Some(&mut s.tl_error_status_texts)),
    },
    TextField {
        scope: Scope::Stream,
        name: "Statistic_Last_Failed_Buffer_Status_Text",
        slot: |s| {
            (
                &mut s.last_failed_buffer_status_text,
                Some(&mut s.failed_buffer_status_texts),
            )
        },
    },
    TextField {
        scope: Scope::Control,
        name: "TemperatureState",
        slot: |s| (&mut s.temperature_state, None),
    },
];

const TEMPERATURE_FLAGS: [(&str, FlagSlot); 2] = [
    ("CriticalTemperature", |s| &mut s.critical_temperature),
    ("OverTemperature", |s| &mut s.over_temperature),
];

static USB_FIELDS: ClassFields = ClassFields {
    counts: &[
        CountField {
            scope: Scope::Stream,
            name: "Statistic_Missed_Frame_Count",
            slot: |s| &mut s.missed_frames,
        },
        CountField {
            scope: Scope::Stream,
            name: "Statistic_Resynchronization_Count",
            slot: |s| &mut s.resync_count,
        },
        CountField {
            scope: Scope::Stream,
            name: "Statistic_Last_Block_Id",
            slot: |s| &mut s.last_block_id,
        },
        CountField {
            scope: Scope::Transport,
            name: "Statistic_Read_Pipe_Reset_Count",
            slot: |s| &mut s.read_pipe_resets,
        },
        CountField {
            scope: Scope::Transport,
            name: "Statistic_Write_Pipe_Reset_Count",
            slot: |s| &mut s.write_pipe_resets,
        },
        CountField {
            scope: Scope::Transport,
            name: "Statistic_Read_Operations_Failed_Count",
            slot: |s| &mut s.read_operations_failed,
        },
        CountField {
            scope: Scope::Transport,
            name: "Statistic_Write_Operations_Failed_Count",
            slot: |s| &mut s.write_operations_failed,
        },
    ],
    texts: &[],
    raw_registers: true,
};

static GIGE_FIELDS: ClassFields = ClassFields {
    counts: &[
        CountField {
            scope: Scope::Stream,
            name: "Statistic_Buffer_Underrun_Count",
            slot: |s| &mut s.buffer_underruns,
        },
        CountField {
            scope: Scope::Stream,
            name: "Statistic_Total_Packet_Count",
            slot: |s| &mut s.total_packets,
        },
        CountField {
            scope: Scope::Stream,
            name: "Statistic_Resend_Request_Count",
            slot: |s| &mut s.resend_requests,
        },
        CountField {
            scope: Scope::Stream,
            name: "Statistic_Resend_Packet_Count",
            slot: |s| &mut s.resent_packets,
        },
        CountField {
            scope: Scope::Stream,
            name: "Statistic_Failed_Packet_Count",
            slot: |s| &mut s.failed_packets,
        },
    ],
    texts: &[TextField {
        scope: Scope::Stream,
        name: "LastError",
        slot: |s| (&mut s.last_error, Some(&mut s.last_errors)),
    }],
    raw_registers: false,
};

/// Control port registers holding the link-level error counters.
pub(crate) const RAW_REGISTERS: [(u32, RawSlot); 6] = [
    (0xAFFB_0010, |r| &mut r.epu),
    (0xAFFB_0004, |r| &mut r.pe),
    (0xAFFB_000C, |r| &mut r.ur),
    (0xAFFB_0020, |r| &mut r.epr),
    (0xAFFB_0008, |r| &mut r.le),
    (0xAFFB_0014, |r| &mut r.lr),
];

const RAW_REGISTER_LEN: u32 = 4;

fn class_fields(class: DeviceClass) -> &'static ClassFields {
    match class {
        DeviceClass::Usb => &USB_FIELDS,
        DeviceClass::GigE => &GIGE_FIELDS,
    }
}

/// One full pass over every field the device class exposes.
pub(crate) struct Sweep<'a, R: ParameterRegistry + ?Sized> {
    registry: &'a R,
    port: Option<&'a dyn ControlPort>,
    class: DeviceClass,
    config: &'a CollectorConfig,
}

impl<'a, R: ParameterRegistry + ?Sized> Sweep<'a, R> {
    pub(crate) fn new(
        registry: &'a R,
        port: Option<&'a dyn ControlPort>,
        class: DeviceClass,
        config: &'a CollectorConfig,
    ) -> Self {
        Self {
            registry,
            port,
            class,
            config,
        }
    }

    pub(crate) fn run(&self, snapshot: &mut Snapshot) -> Result<(), RegistryError> {
        let fields = class_fields(self.class);

        for field in COMMON_COUNTS.iter().chain(fields.counts) {
            self.read_count(field, snapshot)?;
        }

        for field in COMMON_TEXTS.iter().chain(fields.texts) {
            self.read_text(field, snapshot)?;
        }

        for (name, slot) in TEMPERATURE_FLAGS {
            self.read_flag(self.config.temperature_flags_scope, name, slot(snapshot))?;
        }

        if fields.raw_registers {
            if let Some(port) = self.port {
                for (address, slot) in RAW_REGISTERS {
                    let bytes = port.read_raw(address, RAW_REGISTER_LEN)?;
                    if bytes.len() != RAW_REGISTER_LEN as usize {
                        debug!(address, len = bytes.len(), "unexpected register width");
                    }
                    *slot(&mut snapshot.raw) = Some(decode_le(&bytes));
                }
            }
        }

        Ok(())
    }

    /// `None` when the node is not readable this sweep.
    fn fetch(&self, scope: Scope, name: &str) -> Result<Option<NodeValue>, RegistryError> {
        if !self.registry.is_readable(scope, name)? {
            trace!(%scope, node = name, "node not readable");
            return Ok(None);
        }
        self.registry.read(scope, name).map(Some)
    }

    fn read_count(&self, field: &CountField, snapshot: &mut Snapshot) -> Result<(), RegistryError> {
        let slot = (field.slot)(snapshot);
        match self.fetch(field.scope, field.name)? {
            Some(NodeValue::Integer(value)) => *slot = value,
            Some(other) => {
                debug!(scope = %field.scope, node = field.name, kind = other.kind(), "expected integer node");
                self.mark_unavailable(slot, UNSET_COUNT);
            }
            None => self.mark_unavailable(slot, UNSET_COUNT),
        }
        Ok(())
    }

    fn read_flag(&self, scope: Scope, name: &str, slot: &mut Option<bool>) -> Result<(), RegistryError> {
        match self.fetch(scope, name)? {
            Some(NodeValue::Boolean(value)) => *slot = Some(value),
            Some(other) => {
                debug!(%scope, node = name, kind = other.kind(), "expected boolean node");
                self.mark_unavailable(slot, None);
            }
            None => self.mark_unavailable(slot, None),
        }
        Ok(())
    }

    fn read_text(&self, field: &TextField, snapshot: &mut Snapshot) -> Result<(), RegistryError> {
        let (slot, history) = (field.slot)(snapshot);
        let text = match self.fetch(field.scope, field.name)? {
            Some(NodeValue::String(text)) | Some(NodeValue::Enumeration(text)) => text,
            Some(other) => {
                debug!(scope = %field.scope, node = field.name, kind = other.kind(), "expected text node");
                self.mark_unavailable(slot, UNSET_TEXT.to_string());
                return Ok(());
            }
            None => {
                self.mark_unavailable(slot, UNSET_TEXT.to_string());
                return Ok(());
            }
        };

        // TemperatureState is a state name, not an error text: an empty
        // reading is stored as is and never becomes the "no error" marker.
        let Some(history) = history else {
            *slot = text;
            return Ok(());
        };

        if text.is_empty() {
            let seen_error = slot.as_str() != UNSET_TEXT && slot.as_str() != NO_ERROR;
            let keep = seen_error && self.config.error_text == ErrorTextPolicy::KeepLastError;
            if !keep {
                *slot = NO_ERROR.to_string();
            }
            return Ok(());
        }

        history.insert(text.clone());
        *slot = text;
        Ok(())
    }

    fn mark_unavailable<T>(&self, slot: &mut T, sentinel: T) {
        if self.config.unavailable == UnavailablePolicy::Reset {
            *slot = sentinel;
        }
    }
}

fn decode_le(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(8)
        .rev()
        .fold(0_u64, |acc, byte| (acc << 8) | u64::from(*byte))
}

/// What the poller thread hands back when it exits.
pub(crate) struct PollerExit {
    pub snapshot: Snapshot,
    pub end: SessionEnd,
    pub ended_at: DateTime<Utc>,
}

pub(crate) struct PollerContext<R: ParameterRegistry + ?Sized> {
    pub registry: Arc<R>,
    pub port: Option<Arc<dyn ControlPort>>,
    pub class: DeviceClass,
    pub config: CollectorConfig,
    pub stop: Arc<AtomicBool>,
    pub sweeps: Arc<AtomicU64>,
}

/// Body of the poller thread: sweeps until asked to stop or the device
/// faults.
pub(crate) fn poll_loop<R: ParameterRegistry + ?Sized>(
    ctx: PollerContext<R>,
    mut snapshot: Snapshot,
) -> PollerExit {
    let exit = |snapshot, end| PollerExit {
        snapshot,
        end,
        ended_at: Utc::now(),
    };

    if !ctx.registry.is_open() {
        warn!(class = %ctx.class, "device is not open, statistics poller exiting");
        return exit(snapshot, SessionEnd::DeviceClosed);
    }

    let sweep = Sweep::new(ctx.registry.as_ref(), ctx.port.as_deref(), ctx.class, &ctx.config);

    while !ctx.stop.load(Ordering::Acquire) {
        // A panic mid-sweep leaves the fields read so far; earlier sweeps stay intact.
        match panic::catch_unwind(AssertUnwindSafe(|| sweep.run(&mut snapshot))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(error = %err, sweeps = ctx.sweeps.load(Ordering::Relaxed), "statistics sweep failed, poller exiting");
                return exit(snapshot, SessionEnd::DeviceLost(err.to_string()));
            }
            Err(_) => {
                error!(sweeps = ctx.sweeps.load(Ordering::Relaxed), "statistics sweep panicked, keeping last known values");
                return exit(snapshot, SessionEnd::Panicked);
            }
        }
        ctx.sweeps.fetch_add(1, Ordering::Relaxed);
        thread::yield_now();
    }

    exit(snapshot, SessionEnd::Stopped)
}
