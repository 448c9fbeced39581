//! Text and JSON renderings of an [`UncertaintyReport`].
//!
//! We keep formatting code in one place so:
//! - the engines stay free of presentation concerns
//! - the table, the record and the on-screen summary read the same numbers

use serde_json::{Map, Value, json};

use crate::error::MeasureError;
use crate::uncertainty::{Method, SlotSummary, Statistics, UncertaintyReport};

const RULE_WIDTH: usize = 32;
const MAX_DECIMALS: usize = 12;

/// `# [lower, upper]` per interval followed by one `mean stddev` row per slot.
///
/// Slots without any successful measurement leave an empty row.
pub fn format_ascii(report: &UncertaintyReport) -> String {
    let mut lines = Vec::new();
    for interval in &report.intervals {
        lines.push(format!("# [{:.2}, {:.2}]", interval.limits.lower, interval.limits.upper));
        for slot in &interval.slots {
            lines.push(match &slot.statistics {
                Some(s) => format!("{} {}", s.mean, s.stddev),
                None => String::new(),
            });
        }
        lines.push(String::new());
    }
    lines.join("\n").trim().to_string()
}

fn bands_json(s: &Statistics, record: &mut Map<String, Value>) {
    for (k, (lo, hi)) in s.bands.iter().enumerate() {
        record.insert(format!("{}-sigma", k + 1), json!([lo, hi]));
    }
}

fn slot_json(method: Method, slot: &SlotSummary) -> Value {
    let mut record = Map::new();
    let stats = slot.statistics.as_ref();
    match method {
        Method::MonteCarlo => {
            record.insert("success_rate".into(), json!(slot.success_rate()));
            record.insert("min".into(), json!(stats.and_then(|s| s.min)));
            record.insert("max".into(), json!(stats.and_then(|s| s.max)));
            record.insert("mean".into(), json!(stats.map(|s| s.mean)));
            record.insert("median".into(), json!(stats.map(|s| s.median)));
        }
        Method::Covariance => {
            record.insert("location".into(), json!(stats.map(|s| s.mean)));
        }
    }
    record.insert("stddev".into(), json!(stats.map(|s| s.stddev)));
    if let Some(reference) = slot.reference {
        record.insert("reference".into(), json!(reference));
        record.insert("unit".into(), json!(slot.unit.label()));
    }
    match stats {
        Some(s) => bands_json(s, &mut record),
        None => {
            for k in 1..=3 {
                record.insert(format!("{k}-sigma"), Value::Null);
            }
        }
    }
    Value::Object(record)
}

/// `{"method": feature, "limits": [{"lower", "upper", "results": [...]}]}`.
pub fn format_json(report: &UncertaintyReport) -> Result<String, MeasureError> {
    let limits: Vec<Value> = report
        .intervals
        .iter()
        .map(|interval| {
            json!({
                "lower": interval.limits.lower,
                "upper": interval.limits.upper,
                "results": interval.slots.iter().map(|s| slot_json(report.method, s)).collect::<Vec<_>>(),
            })
        })
        .collect();
    let out = json!({
        "method": report.feature,
        "uncertainty": report.method.name(),
        "limits": limits,
    });
    Ok(serde_json::to_string(&out)?)
}

/// Decimal places that resolve `stddev` to about two significant digits.
fn decimals(stddev: f64) -> usize {
    if !(stddev.is_finite() && stddev > 0.0) {
        return 2;
    }
    let d = (2.0 - stddev.log10()).trunc();
    if d <= 2.0 { 2 } else { (d as usize).min(MAX_DECIMALS) }
}

fn value(v: f64, d: usize, unit: &str) -> String {
    if unit.is_empty() {
        format!("{v:.d$}")
    } else {
        format!("{v:.d$} {unit}")
    }
}

/// Operator-facing block for one slot: success rate (Monte Carlo only),
/// location and spread, and the sigma bands with their half-widths.
pub fn format_summary(method: Method, slot: &SlotSummary) -> String {
    let mut s = format!("{}\n\n", "-".repeat(RULE_WIDTH));
    if method == Method::MonteCarlo {
        s.push_str(&format!(
            "  Success rate:\n    {}/{} ({:.2}%)\n\n",
            slot.successes,
            slot.trials,
            100.0 * slot.success_rate()
        ));
    }
    let Some(stats) = &slot.statistics else {
        if method == Method::Covariance {
            s.push_str("  Location: unavailable\n\n");
        }
        return s;
    };

    let unit = slot.unit.label();
    let d = decimals(stats.stddev);
    match method {
        Method::MonteCarlo => {
            if let (Some(min), Some(max)) = (stats.min, stats.max) {
                s.push_str(&format!("  Min: {}\n", value(min, d, unit)));
                s.push_str(&format!("  Max: {}\n\n", value(max, d, unit)));
            }
            s.push_str(&format!("  Mean: {}\n", value(stats.mean, d, unit)));
            s.push_str(&format!("  Median: {}\n", value(stats.median, d, unit)));
        }
        Method::Covariance => {
            s.push_str(&format!("  Location: {}\n", value(stats.mean, d, unit)));
        }
    }
    s.push_str(&format!("  Stddev: {}\n\n", value(stats.stddev, d, unit)));

    let halves = stats.half_widths();
    for (k, ((lo, hi), half)) in stats.bands.iter().zip(halves).enumerate() {
        s.push_str(&format!("  {}s: {lo:.d$}, {}\n", k + 1, value(*hi, d, unit)));
        s.push_str(&format!("      ~ +/-{}\n", value(half, d, unit)));
    }
    s.push('\n');
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Limits, Unit};
    use crate::uncertainty::IntervalSummary;

    fn report(method: Method, statistics: Option<Statistics>, reference: Option<f64>) -> UncertaintyReport {
        UncertaintyReport {
            method,
            feature: "velocity.gaussians".into(),
            intervals: vec![IntervalSummary {
                limits: Limits::new(6000.0, 6300.0),
                slots: vec![SlotSummary {
                    reference,
                    unit: if reference.is_some() { Unit::Velocity } else { Unit::Native },
                    successes: if statistics.is_some() { 9 } else { 0 },
                    trials: 10,
                    statistics,
                }],
            }],
        }
    }

    #[test]
    fn ascii_table_groups_by_interval() {
        let s = Statistics::from_samples(&[1.0, 2.0, 3.0]).unwrap();
        let text = format_ascii(&report(Method::MonteCarlo, Some(s), None));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# [6000.00, 6300.00]");
        assert!(lines[1].starts_with("2 0.816"), "{}", lines[1]);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn json_record_uses_reported_units() {
        let s = Statistics::normal(-11000.0, 150.0);
        let text = format_json(&report(Method::Covariance, Some(s), Some(6355.0))).unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["method"], "velocity.gaussians");
        let r = &v["limits"][0]["results"][0];
        assert_eq!(r["location"], -11000.0);
        assert_eq!(r["unit"], "km/s");
        assert_eq!(r["1-sigma"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn failed_slot_serializes_nulls() {
        let text = format_json(&report(Method::MonteCarlo, None, None)).unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        let r = &v["limits"][0]["results"][0];
        assert_eq!(r["success_rate"], 0.0);
        assert!(r["mean"].is_null());
        assert!(r["3-sigma"].is_null());
    }

    #[test]
    fn summary_precision_follows_stddev() {
        assert_eq!(decimals(0.5), 2);
        assert_eq!(decimals(0.004), 4);
        assert_eq!(decimals(250.0), 2);
        assert_eq!(decimals(0.0), 2);

        let s = Statistics::from_samples(&[6100.0, 6100.004, 6100.008]).unwrap();
        let text = format_summary(Method::MonteCarlo, report(Method::MonteCarlo, Some(s), None).slot(0, 0).unwrap());
        assert!(text.contains("Success rate:\n    9/10 (90.00%)"), "{text}");
        assert!(text.contains("  Mean: 6100.0040\n"), "{text}");
        assert!(text.contains("  1s: "), "{text}");
        assert!(text.contains("~ +/-"), "{text}");
    }
}
