use std::fmt::{self, Display, Write};

use statistician_core::{DeviceClass, SessionEnd, SessionReport, Snapshot};

const LABEL_WIDTH: usize = 39;

fn field(out: &mut impl Write, label: &str, value: impl Display) -> fmt::Result {
    writeln!(out, "   {label:<LABEL_WIDTH$}: {value}")
}

/// Error texts carry their own trailing newline.
fn text(value: &str) -> &str {
    value.trim_end_matches('\n')
}

fn flag(value: Option<bool>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

fn raw(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn session_line(report: &SessionReport) -> String {
    let elapsed_ms = (report.ended_at - report.started_at).num_milliseconds();
    let end = match &report.end {
        SessionEnd::Stopped => "stopped".to_string(),
        SessionEnd::DeviceClosed => "device was closed".to_string(),
        SessionEnd::DeviceLost(reason) => format!("device lost ({reason})"),
        SessionEnd::Panicked => "poller panicked".to_string(),
    };
    format!("{end} after {} sweeps in {elapsed_ms} ms", report.sweeps)
}

pub fn render_human(
    snapshot: &Snapshot,
    report: Option<&SessionReport>,
    out: &mut impl Write,
) -> fmt::Result {
    writeln!(out, "=== Acquisition Statistics ===")?;
    writeln!(out, "Device:     {}", snapshot.device_class)?;
    if let Some(report) = report {
        writeln!(out, "Session:    {}", session_line(report))?;
        writeln!(
            out,
            "Window:     {} .. {}",
            report.started_at.to_rfc3339(),
            report.ended_at.to_rfc3339()
        )?;
    }
    writeln!(
        out,
        "Thermal:    temperature={} state={} critical={} over={}",
        snapshot.current_temperature,
        text(&snapshot.temperature_state),
        flag(snapshot.critical_temperature),
        flag(snapshot.over_temperature),
    )?;

    match snapshot.device_class {
        DeviceClass::Usb => render_usb(snapshot, out),
        DeviceClass::GigE => render_gige(snapshot, out),
    }
}

fn render_usb(s: &Snapshot, out: &mut impl Write) -> fmt::Result {
    writeln!(out, "  Grab Engine:")?;
    field(out, "Total Processed Buffers", s.total_buffers)?;
    field(out, "Total Failed Buffers", s.failed_buffers)?;
    field(out, "Last BlockID (starts at 0)", s.last_block_id)?;
    field(out, "Total Missed Frames", s.missed_frames)?;
    field(out, "Resynchronizations", s.resync_count)?;
    field(out, "Last Failed Buffer Status", s.last_failed_buffer_status)?;
    field(out, "Last Failed Buffer Status Text", text(&s.last_failed_buffer_status_text))?;
    for entry in &s.failed_buffer_status_texts {
        field(out, "Failed Buffer Status Text logged", text(entry))?;
    }

    writeln!(out, "  Transport Layer:")?;
    field(out, "Read Pipe Reset Count", s.read_pipe_resets)?;
    field(out, "Write Pipe Reset Count", s.write_pipe_resets)?;
    field(out, "Read Operations Failed Count", s.read_operations_failed)?;
    field(out, "Write Operations Failed Count", s.write_operations_failed)?;
    field(out, "Last Error Status", s.tl_last_error_status)?;
    field(out, "Last Error Status Text", text(&s.tl_last_error_status_text))?;
    for entry in &s.tl_error_status_texts {
        field(out, "Error Status Text logged", text(entry))?;
    }
    field(out, "EPU", raw(s.raw.epu))?;
    field(out, "PE", raw(s.raw.pe))?;
    field(out, "UR", raw(s.raw.ur))?;
    field(out, "EPR", raw(s.raw.epr))?;
    field(out, "LE", raw(s.raw.le))?;
    field(out, "LR", raw(s.raw.lr))
}

fn render_gige(s: &Snapshot, out: &mut impl Write) -> fmt::Result {
    writeln!(out, "  Camera:")?;
    field(out, "Last Error", text(&s.last_error))?;
    for entry in &s.last_errors {
        field(out, "Error logged", text(entry))?;
    }

    writeln!(out, "  Grab Engine:")?;
    field(out, "Total Frames Received", s.total_buffers)?;
    field(out, "Total Failed Buffers", s.failed_buffers)?;
    field(out, "Total Buffer Underruns", s.buffer_underruns)?;
    field(out, "Last Failed Buffer Status", s.last_failed_buffer_status)?;
    field(out, "Last Failed Buffer Status Text", text(&s.last_failed_buffer_status_text))?;
    for entry in &s.failed_buffer_status_texts {
        field(out, "Failed Buffer Status Text logged", text(entry))?;
    }

    writeln!(out, "  Transport Layer:")?;
    field(out, "Total Packets Received", s.total_packets)?;
    field(out, "Total Packet Resend Requests", s.resend_requests)?;
    field(out, "Total Resent Packets", s.resent_packets)?;
    field(out, "Total Failed (unrecoverable) Packets", s.failed_packets)?;
    field(out, "Last Error Status", s.tl_last_error_status)?;
    field(out, "Last Error Status Text", text(&s.tl_last_error_status_text))?;
    for entry in &s.tl_error_status_texts {
        field(out, "Error Status Text logged", text(entry))?;
    }
    Ok(())
}
