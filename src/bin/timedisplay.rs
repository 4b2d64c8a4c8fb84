//! Human readable wall-clock durations for the end-of-run report.

use std::time::Duration;

pub fn pretty_print_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}.{:03}s", s, d.subsec_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_scale_with_magnitude() {
        assert_eq!(pretty_print_duration(Duration::from_millis(1500)), "1.500s");
        assert_eq!(pretty_print_duration(Duration::from_secs(61)), "1m 01s");
        assert_eq!(pretty_print_duration(Duration::from_secs(3723)), "1h 02m 03s");
    }
}
