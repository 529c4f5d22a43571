//! Human-readable per-column report.

use std::fmt;

use crate::bench::Measurement;
use crate::scheduler::ColumnAdvice;

/// Report block of one column.
///
/// Measurements are listed smallest first with their size relative to the
/// current encoding's measurement, or to the smallest one when the current
/// encoding was not measured.
pub struct ColumnReport<'a>(pub &'a ColumnAdvice);

impl ColumnReport<'_> {
    fn reference_size(&self) -> Option<u64> {
        let advice = self.0;
        let current = advice
            .selection
            .as_ref()
            .and_then(|s| s.current.as_ref())
            .map(|m| m.physical_size_bytes);
        current.or_else(|| advice.measurements.iter().map(|m| m.physical_size_bytes).min())
    }

    fn marker(&self, measurement: &Measurement) -> &'static str {
        let Some(selection) = &self.0.selection else {
            return "";
        };
        let is_current = selection
            .current
            .as_ref()
            .is_some_and(|c| c.config == measurement.config);
        let is_winner = selection.winner.config == measurement.config;
        match (is_current, is_winner) {
            (true, true) => " <<<CURRENT <<<RECOMMENDED",
            (true, false) => " <<<CURRENT",
            (false, true) => " <<<RECOMMENDED",
            (false, false) => "",
        }
    }
}

fn percent_of(size: u64, reference: Option<u64>) -> String {
    match reference {
        Some(reference) if reference > 0 => {
            format!("{:.2} %", 100.0 * size as f64 / reference as f64)
        }
        _ => "n/a".to_string(),
    }
}

impl fmt::Display for ColumnReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let advice = self.0;
        let name = &advice.column.name;
        writeln!(f, "----- {name} -----")?;

        let reference = self.reference_size();
        let mut sorted: Vec<&Measurement> = advice.measurements.iter().collect();
        sorted.sort_by_key(|m| m.physical_size_bytes);
        for measurement in sorted {
            writeln!(
                f,
                "-- {name} {} {} {} {}{}",
                measurement.config.compression_type,
                measurement.config.level,
                measurement.human_size,
                percent_of(measurement.physical_size_bytes, reference),
                self.marker(measurement)
            )?;
        }

        for failure in &advice.failures {
            writeln!(f, "-- warning: {failure}")?;
        }

        if advice.selection.is_none() {
            match &advice.error {
                Some(error) => writeln!(f, "-- {name} could not be benchmarked: {error}")?,
                None => writeln!(f, "-- {name} could not be benchmarked")?,
            }
        }
        Ok(())
    }
}

/// Report of every column, in the order given.
pub fn render_report(advice: &[ColumnAdvice]) -> String {
    advice
        .iter()
        .map(|column| ColumnReport(column).to_string())
        .collect()
}
