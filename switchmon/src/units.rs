//! Human readable byte magnitudes for chart axes and tooltips.

/// Binary unit labels, each 1024 times the previous.
pub const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

const STEP: f64 = 1024.0;

/// Format a byte count as `"{value:.2} {unit}"`.
///
/// The value is divided by 1024 until it drops below 1024 or the units run
/// out. Anything at or beyond 1024 TB stays in TB, so `1024^5` formats as
/// `"1024.00 TB"`. Negative values are below 1024 from the start and keep the
/// `B` label: `-5.0` formats as `"-5.00 B"`.
#[must_use]
pub fn format_bytes(value: f64) -> String {
    let mut value = value;
    let mut unit = UNITS[0];

    for next in &UNITS[1..] {
        if value < STEP {
            break;
        }
        value /= STEP;
        unit = next;
    }

    format!("{value:.2} {unit}")
}

/// Label chart ticks with [`format_bytes`].
///
/// Ticks below zero are dropped rather than labeled. This only concerns the
/// axis: negative data points produced by counter resets are still plotted.
#[must_use]
pub fn axis_labels(ticks: &[f64]) -> Vec<(f64, String)> {
    ticks
        .iter()
        .copied()
        .filter(|tick| *tick >= 0.0)
        .map(|tick| (tick, format_bytes(tick)))
        .collect()
}

/// Label a single tick, returning an empty label where [`axis_labels`] would
/// drop it.
#[must_use]
pub fn axis_label(tick: f64) -> String {
    if tick >= 0.0 {
        format_bytes(tick)
    } else {
        String::new()
    }
}
