//! # Bluetooth Device Discovery
//!
//! Inquiry-based scanning for nearby devices, annotated with the printer
//! heuristic from [`device`](crate::device).
//!
//! Discovery shells out to `hcitool scan` for the inquiry itself and to
//! `bluetoothctl info` for per-device detail (name, class, pairing state,
//! RSSI). All output parsing lives in pure functions so the text formats
//! are covered by unit tests without a radio.

use std::process::Command;
use std::time::Duration;

use tracing::{debug, warn};

use crate::device::{DeviceInfo, MacAddress};
use crate::error::PrinterError;

/// One inquiry length unit is 1.28 seconds (Bluetooth baseband constant).
const INQUIRY_UNIT_MS: u64 = 1280;

/// Longest inquiry hcitool accepts, in units.
const MAX_INQUIRY_UNITS: u64 = 48;

/// Convert a scan duration to hcitool `--length` units, rounding up and
/// clamping to the valid range.
fn inquiry_length(timeout: Duration) -> u64 {
    let ms = timeout.as_millis() as u64;
    ms.div_ceil(INQUIRY_UNIT_MS).clamp(1, MAX_INQUIRY_UNITS)
}

/// Scan for nearby Bluetooth devices, blocking for roughly `timeout`.
///
/// Devices the controller cannot name are reported as "Unknown".
pub fn scan_devices(timeout: Duration) -> Result<Vec<DeviceInfo>, PrinterError> {
    let length = inquiry_length(timeout);
    let output = Command::new("hcitool")
        .args(["scan", "--flush", &format!("--length={length}")])
        .output()
        .map_err(|e| PrinterError::Transport(format!("Failed to run hcitool scan: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PrinterError::Transport(format!(
            "hcitool scan failed: {}",
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let found = parse_hcitool_scan(&stdout);
    debug!("inquiry found {} device(s)", found.len());

    let mut devices = Vec::with_capacity(found.len());
    for (mac, name) in found {
        devices.push(describe_device(mac, name));
    }
    Ok(devices)
}

/// Fetch per-device detail via `bluetoothctl info`. Falls back to what the
/// inquiry reported when the controller has no record of the device.
pub fn describe_device(mac: MacAddress, inquiry_name: String) -> DeviceInfo {
    let detail = Command::new("bluetoothctl")
        .arg("info")
        .arg(mac.to_string())
        .output();

    match detail {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            parse_info_output(mac, &inquiry_name, &stdout)
        }
        Ok(_) | Err(_) => {
            warn!("no controller record for {mac}, using inquiry data only");
            let looks_like_printer = DeviceInfo::printer_heuristic(0, &inquiry_name);
            DeviceInfo {
                mac,
                name: inquiry_name,
                device_class: 0,
                looks_like_printer,
                is_paired: false,
                signal_strength: None,
            }
        }
    }
}

// ============================================================================
// OUTPUT PARSERS
// ============================================================================

/// Parse `hcitool scan` output: a header line, then one `MAC\tName` line per
/// device. Lines that don't start with a valid MAC are skipped.
fn parse_hcitool_scan(output: &str) -> Vec<(MacAddress, String)> {
    let mut found = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        let mut fields = line.split_whitespace();
        let Some(first) = fields.next() else {
            continue;
        };
        let Ok(mac) = first.parse::<MacAddress>() else {
            continue;
        };
        let name = fields.collect::<Vec<_>>().join(" ");
        let name = if name.is_empty() {
            "Unknown".to_string()
        } else {
            name
        };
        found.push((mac, name));
    }
    found
}

/// Parse `bluetoothctl info` output into a [`DeviceInfo`].
///
/// Relevant lines look like:
///
/// ```text
/// Device AA:BB:CC:DD:EE:FF (public)
///         Name: TSP650II
///         Class: 0x00040680
///         Paired: yes
///         RSSI: -52
/// ```
fn parse_info_output(mac: MacAddress, fallback_name: &str, output: &str) -> DeviceInfo {
    let mut name = fallback_name.to_string();
    let mut device_class = 0u32;
    let mut is_paired = false;
    let mut signal_strength = None;

    for line in output.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("Name:") {
            name = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("Class:") {
            let value = value.trim().trim_start_matches("0x");
            if let Ok(class) = u32::from_str_radix(value, 16) {
                device_class = class;
            }
        } else if let Some(value) = line.strip_prefix("Paired:") {
            is_paired = value.trim() == "yes";
        } else if let Some(value) = line.strip_prefix("RSSI:") {
            // Newer BlueZ prints "RSSI: 0xffffffcc (-52)"; take the last
            // parenthesized or plain decimal form.
            let value = value.trim();
            let decimal = value
                .rsplit(['(', ')'])
                .find_map(|part| part.trim().parse::<i32>().ok());
            signal_strength = decimal;
        }
    }

    let looks_like_printer = DeviceInfo::printer_heuristic(device_class, &name);
    DeviceInfo {
        mac,
        name,
        device_class,
        looks_like_printer,
        is_paired,
        signal_strength,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_inquiry_length_units() {
        assert_eq!(inquiry_length(Duration::from_secs(0)), 1);
        assert_eq!(inquiry_length(Duration::from_millis(1280)), 1);
        assert_eq!(inquiry_length(Duration::from_secs(10)), 8);
        // Clamped to the hcitool maximum.
        assert_eq!(inquiry_length(Duration::from_secs(600)), 48);
    }

    #[test]
    fn test_parse_hcitool_scan() {
        let output = "Scanning ...\n\
                      \t00:11:62:0A:0B:0C\tStar Micronics TSP650II\n\
                      \tAA:BB:CC:DD:EE:FF\tJBL Flip 5\n\
                      \t11:22:33:44:55:66\n";
        let found = parse_hcitool_scan(output);

        assert_eq!(found.len(), 3);
        assert_eq!(found[0].0.to_string(), "00:11:62:0A:0B:0C");
        assert_eq!(found[0].1, "Star Micronics TSP650II");
        assert_eq!(found[1].1, "JBL Flip 5");
        // Nameless devices get a placeholder.
        assert_eq!(found[2].1, "Unknown");
    }

    #[test]
    fn test_parse_hcitool_scan_skips_noise() {
        let output = "Scanning ...\nInquiry failed: whatever\n";
        assert!(parse_hcitool_scan(output).is_empty());
    }

    #[test]
    fn test_parse_info_output_printer() {
        let mac: MacAddress = "00:11:62:0A:0B:0C".parse().unwrap();
        let output = "Device 00:11:62:0A:0B:0C (public)\n\
                      \tName: TSP650II\n\
                      \tClass: 0x00040680\n\
                      \tPaired: yes\n\
                      \tTrusted: yes\n\
                      \tRSSI: -52\n";
        let info = parse_info_output(mac, "fallback", output);

        assert_eq!(info.name, "TSP650II");
        assert_eq!(info.device_class, 0x00040680);
        assert!(info.is_paired);
        assert_eq!(info.signal_strength, Some(-52));
        // Class 0x...0680 is not the printer class, but the name matches.
        assert!(info.looks_like_printer);
    }

    #[test]
    fn test_parse_info_output_class_match() {
        let mac: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let output = "Device AA:BB:CC:DD:EE:FF\n\tName: Mystery Box\n\tClass: 0x001680\n";
        let info = parse_info_output(mac, "x", output);

        assert_eq!(info.device_class, 0x1680);
        assert!(info.looks_like_printer);
        assert!(!info.is_paired);
        assert_eq!(info.signal_strength, None);
    }

    #[test]
    fn test_parse_info_output_hex_rssi_form() {
        let mac: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let output = "\tRSSI: 0xffffffcc (-52)\n";
        let info = parse_info_output(mac, "x", output);
        assert_eq!(info.signal_strength, Some(-52));
    }

    #[test]
    fn test_parse_info_output_uses_fallback_name() {
        let mac: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let info = parse_info_output(mac, "Inquiry Name", "Device AA:BB:CC:DD:EE:FF\n");
        assert_eq!(info.name, "Inquiry Name");
        assert!(!info.looks_like_printer);
    }
}
