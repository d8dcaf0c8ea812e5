//! The loss-history file: one loss value per line, no header. Training writes it; the plotting
//! side reads the first column back as the y-series, in file order.

use crate::error::{Error, Result};
use std::{
    env,
    io::{BufRead, Write},
    path::PathBuf,
};

/// Environment variable naming the file the binaries record per-step losses to.
pub const HISTORY_FILE_ENV: &str = "LOSS_HISTORY_FILE";

pub const TITLE: &str = "Loss over Time";
pub const X_LABEL: &str = "Training Pairs";
pub const Y_LABEL: &str = "Loss";

pub fn history_path() -> Option<PathBuf> {
    env::var_os(HISTORY_FILE_ENV).map(PathBuf::from)
}

/// Appends loss values to a writer, one per line.
pub struct LossRecorder<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> LossRecorder<W> {
    pub fn new(writer: W) -> LossRecorder<W> {
        LossRecorder { writer, written: 0 }
    }

    pub fn record(&mut self, loss: f64) -> Result<()> {
        writeln!(self.writer, "{loss}")?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Reads the first comma-separated column of every non-empty line, preserving order.
pub fn read_loss_history<R: BufRead>(reader: R) -> Result<Vec<f64>> {
    let mut values = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let first = line.split(',').next().unwrap_or_default().trim();
        let value = first.parse::<f64>().map_err(|error| Error::LossHistory {
            line: index + 1,
            reason: format!("`{first}` is not a number: {error}"),
        })?;
        values.push(value);
    }
    Ok(values)
}

/// A plot-ready loss series: the value of every training pair against its index.
#[derive(Clone, Debug, PartialEq)]
pub struct LossCurve {
    pub title: &'static str,
    pub x_label: &'static str,
    pub y_label: &'static str,
    pub points: Vec<(usize, f64)>,
}

impl LossCurve {
    pub fn from_history(values: &[f64]) -> LossCurve {
        LossCurve {
            title: TITLE,
            x_label: X_LABEL,
            y_label: Y_LABEL,
            points: values.iter().copied().enumerate().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The (min, max) of the y values, ignoring NaN. `None` when there is nothing finite to plot.
    pub fn y_range(&self) -> Option<(f64, f64)> {
        self.points
            .iter()
            .map(|&(_, y)| y)
            .filter(|y| !y.is_nan())
            .fold(None, |range, y| match range {
                None => Some((y, y)),
                Some((low, high)) => Some((low.min(y), high.max(y))),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_values_in_file_order() {
        let values = read_loss_history(Cursor::new("0.9\n0.5\n0.2\n")).unwrap();
        assert_eq!(values, [0.9, 0.5, 0.2]);

        let curve = LossCurve::from_history(&values);
        assert_eq!(curve.points, [(0, 0.9), (1, 0.5), (2, 0.2)]);
        assert_eq!(curve.title, "Loss over Time");
        assert_eq!(curve.y_range(), Some((0.2, 0.9)));
    }

    #[test]
    fn only_the_first_column_is_read() {
        let values = read_loss_history(Cursor::new("1.5,99\n\n2.5, 7\n")).unwrap();
        assert_eq!(values, [1.5, 2.5]);
    }

    #[test]
    fn unparsable_lines_report_their_number() {
        let result = read_loss_history(Cursor::new("0.1\nloss\n"));
        assert!(matches!(result, Err(Error::LossHistory { line: 2, .. })));
    }

    #[test]
    fn recorder_output_reads_back() {
        let mut recorder = LossRecorder::new(Vec::new());
        for value in [0.75, 0.5, f64::NAN] {
            recorder.record(value).unwrap();
        }
        assert_eq!(recorder.written(), 3);

        let bytes = recorder.into_inner();
        let values = read_loss_history(Cursor::new(bytes)).unwrap();
        assert_eq!(values[..2], [0.75, 0.5]);
        assert!(values[2].is_nan());
    }
}
