use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::DeviceClass;

/// Placeholder for a counter that has never been read.
pub const UNSET_COUNT: i64 = -1;
/// Placeholder for a text field that has never been read.
pub const UNSET_TEXT: &str = "-1";
/// Stored in place of an empty error/status text.
pub const NO_ERROR: &str = "(no error)\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub device_class: DeviceClass,

    pub total_buffers: i64,
    pub failed_buffers: i64,
    pub buffer_underruns: i64,
    pub total_packets: i64,
    pub resend_requests: i64,
    pub resent_packets: i64,
    pub failed_packets: i64,
    pub missed_frames: i64,
    pub resync_count: i64,
    pub last_block_id: i64,
    pub last_failed_buffer_status: i64,
    pub tl_last_error_status: i64,
    pub current_temperature: i64,
    pub read_pipe_resets: i64,
    pub write_pipe_resets: i64,
    pub read_operations_failed: i64,
    pub write_operations_failed: i64,

    pub critical_temperature: Option<bool>,
    pub over_temperature: Option<bool>,

    pub temperature_state: String,
    pub last_failed_buffer_status_text: String,
    pub last_error: String,
    pub tl_last_error_status_text: String,

    pub failed_buffer_status_texts: BTreeSet<String>,
    pub tl_error_status_texts: BTreeSet<String>,
    pub last_errors: BTreeSet<String>,

    pub raw: RawCounters,
}

impl Snapshot {
    pub fn new(device_class: DeviceClass) -> Self {
        Self {
            device_class,
            total_buffers: UNSET_COUNT,
            failed_buffers: UNSET_COUNT,
            buffer_underruns: UNSET_COUNT,
            total_packets: UNSET_COUNT,
            resend_requests: UNSET_COUNT,
            resent_packets: UNSET_COUNT,
            failed_packets: UNSET_COUNT,
            missed_frames: UNSET_COUNT,
            resync_count: UNSET_COUNT,
            last_block_id: UNSET_COUNT,
            last_failed_buffer_status: UNSET_COUNT,
            tl_last_error_status: UNSET_COUNT,
            current_temperature: UNSET_COUNT,
            read_pipe_resets: UNSET_COUNT,
            write_pipe_resets: UNSET_COUNT,
            read_operations_failed: UNSET_COUNT,
            write_operations_failed: UNSET_COUNT,
            critical_temperature: None,
            over_temperature: None,
            temperature_state: UNSET_TEXT.to_string(),
            last_failed_buffer_status_text: UNSET_TEXT.to_string(),
            last_error: UNSET_TEXT.to_string(),
            tl_last_error_status_text: UNSET_TEXT.to_string(),
            failed_buffer_status_texts: BTreeSet::new(),
            tl_error_status_texts: BTreeSet::new(),
            last_errors: BTreeSet::new(),
            raw: RawCounters::default(),
        }
    }
}

/// Low-level link counters read straight from control port registers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCounters {
    pub epu: Option<u64>,
    pub pe: Option<u64>,
    pub ur: Option<u64>,
    pub epr: Option<u64>,
    pub le: Option<u64>,
    pub lr: Option<u64>,
}

/// How a polling session came to an end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum SessionEnd {
    Stopped,
    /// The device was already closed when the poller started.
    DeviceClosed,
    DeviceLost(String),
    Panicked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub end: SessionEnd,
    pub sweeps: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl SessionReport {
    pub fn is_clean(&self) -> bool {
        self.end == SessionEnd::Stopped
    }
}
