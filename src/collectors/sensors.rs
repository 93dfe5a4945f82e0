//! Hardware sensor metrics from lm-sensors.
//!
//! `sensors -j` emits a nested, effectively schemaless JSON document:
//! `{chip: {"Adapter": ..., sensor: {key: number, ...}, ...}, ...}`. The
//! numeric leaf keys follow a naming convention only, so this collector
//! walks the value tree generically and picks one reading per metric family
//! by key prefix and suffix.

use crate::collectors::local_hostname;
use crate::metrics::MetricsCollector;
use serde_json::Value;
use std::collections::HashMap;
use tokio::process::Command;
use tracing::warn;

/// Metric family a sensor key maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum SensorFamily {
    Temperature,
    Fan,
    Voltage,
    Power,
}

/// Classify a sensor reading key. The second value marks a priority
/// reading: `power*_input` beats `power*_average`.
pub(crate) fn classify_sensor_key(key: &str) -> Option<(SensorFamily, bool)> {
    if key.starts_with("temp") && key.ends_with("_input") {
        Some((SensorFamily::Temperature, true))
    } else if key.starts_with("fan") && key.ends_with("_input") {
        Some((SensorFamily::Fan, true))
    } else if key.starts_with("in") && key.ends_with("_input") {
        Some((SensorFamily::Voltage, true))
    } else if key.starts_with("power") && key.ends_with("_input") {
        Some((SensorFamily::Power, true))
    } else if key.starts_with("power") && key.ends_with("_average") {
        Some((SensorFamily::Power, false))
    } else {
        None
    }
}

/// Select at most one reading per family from a sensor's key/value map.
pub(crate) fn select_readings(
    sensor: &serde_json::Map<String, Value>,
) -> HashMap<SensorFamily, f64> {
    let mut readings = HashMap::new();
    let mut has_priority: HashMap<SensorFamily, bool> = HashMap::new();

    for (key, value) in sensor {
        let value = match value.as_f64() {
            Some(value) => value,
            None => continue,
        };
        let (family, is_priority) = match classify_sensor_key(key) {
            Some(classified) => classified,
            None => continue,
        };

        if is_priority || !has_priority.get(&family).copied().unwrap_or(false) {
            readings.insert(family, value);
            has_priority.insert(family, is_priority);
        }
    }

    readings
}

/// Run `sensors -j` and emit one sample per selected reading. A missing
/// binary or non-zero exit is a silent skip; lm-sensors is optional.
pub async fn collect(mx: &MetricsCollector) {
    let output = match Command::new("sensors").arg("-j").output().await {
        Ok(output) if output.status.success() => output.stdout,
        _ => return,
    };

    let data: Value = match serde_json::from_slice(&output) {
        Ok(data) => data,
        Err(e) => {
            warn!("Failed to parse sensors JSON: {e}");
            return;
        }
    };

    emit_sensor_readings(mx, &data, local_hostname());
}

/// Walk the chip → sensor → reading tree and emit samples.
pub(crate) fn emit_sensor_readings(mx: &MetricsCollector, data: &Value, hostname: &str) {
    let chips = match data.as_object() {
        Some(chips) => chips,
        None => return,
    };

    for (chip, chip_data) in chips {
        let chip_map = match chip_data.as_object() {
            Some(chip_map) => chip_map,
            None => continue,
        };

        let adapter = chip_map
            .get("Adapter")
            .and_then(Value::as_str)
            .unwrap_or("");

        for (sensor, sensor_data) in chip_map {
            if sensor == "Adapter" {
                continue;
            }
            let sensor_map = match sensor_data.as_object() {
                Some(sensor_map) => sensor_map,
                None => continue,
            };

            let labels = &[hostname, chip.as_str(), adapter, sensor.as_str()];
            for (family, value) in select_readings(sensor_map) {
                let gauge = match family {
                    SensorFamily::Temperature => &mx.sensor_temperature,
                    SensorFamily::Fan => &mx.sensor_fan_rpm,
                    SensorFamily::Voltage => &mx.sensor_voltage,
                    SensorFamily::Power => &mx.sensor_power,
                };
                gauge.with_label_values(labels).set(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::tests::test_collector;
    use serde_json::json;

    #[test]
    fn classify_follows_the_prefix_suffix_table() {
        assert_eq!(
            classify_sensor_key("temp1_input"),
            Some((SensorFamily::Temperature, true))
        );
        assert_eq!(classify_sensor_key("fan2_input"), Some((SensorFamily::Fan, true)));
        assert_eq!(
            classify_sensor_key("in0_input"),
            Some((SensorFamily::Voltage, true))
        );
        assert_eq!(
            classify_sensor_key("power1_input"),
            Some((SensorFamily::Power, true))
        );
        assert_eq!(
            classify_sensor_key("power1_average"),
            Some((SensorFamily::Power, false))
        );
        assert_eq!(classify_sensor_key("temp1_max"), None);
        assert_eq!(classify_sensor_key("curr1_input"), None);
    }

    #[test]
    fn power_input_beats_power_average() {
        let sensor = json!({
            "power1_average": 12.5,
            "power1_input": 14.0,
        });
        let readings = select_readings(sensor.as_object().unwrap());
        assert_eq!(readings.get(&SensorFamily::Power), Some(&14.0));

        let only_average = json!({ "power1_average": 12.5 });
        let readings = select_readings(only_average.as_object().unwrap());
        assert_eq!(readings.get(&SensorFamily::Power), Some(&12.5));
    }

    #[test]
    fn readings_are_emitted_per_chip_and_sensor() {
        let mx = test_collector();
        let data = json!({
            "coretemp-isa-0000": {
                "Adapter": "ISA adapter",
                "Package id 0": { "temp1_input": 54.0, "temp1_max": 105.0 },
                "Core 0": { "temp2_input": 52.0 },
            },
            "nct6798-isa-0290": {
                "Adapter": "ISA adapter",
                "fan1": { "fan1_input": 1220.0 },
                "in0": { "in0_input": 1.02 },
            },
        });

        emit_sensor_readings(&mx, &data, "pve1");

        assert_eq!(
            mx.sensor_temperature
                .with_label_values(&["pve1", "coretemp-isa-0000", "ISA adapter", "Package id 0"])
                .get(),
            54.0
        );
        assert_eq!(
            mx.sensor_fan_rpm
                .with_label_values(&["pve1", "nct6798-isa-0290", "ISA adapter", "fan1"])
                .get(),
            1220.0
        );
        assert_eq!(
            mx.sensor_voltage
                .with_label_values(&["pve1", "nct6798-isa-0290", "ISA adapter", "in0"])
                .get(),
            1.02
        );
    }
}
