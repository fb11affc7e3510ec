//! Arrival-time prediction and timeliness bands.
//!
//! Offsets are measured from product time to arrival time. With more than four
//! samples the single earliest and single latest sample are left out of the
//! mean and standard deviation; the predicted arrival is
//! `product time + mean + stddev`, truncated to whole seconds.

use chrono::{DateTime, TimeDelta, Utc};
use ecgate_store::{DataFile, DataTransfer, Store};

use crate::error::Result;

/// One past arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrivalSample {
    /// When the file arrived.
    pub arrived_at: DateTime<Utc>,
    /// Product time of the file.
    pub product_time: DateTime<Utc>,
}

impl ArrivalSample {
    fn offset_ms(&self) -> i64 {
        (self.arrived_at - self.product_time).num_milliseconds()
    }
}

/// Predicted arrival window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrivalPrediction {
    /// Earliest arrival seen.
    pub earliest: DateTime<Utc>,
    /// Latest arrival seen.
    pub latest: DateTime<Utc>,
    /// Predicted arrival.
    pub predicted: DateTime<Utc>,
}

/// Predict the arrival of a product from past arrivals of the same class.
///
/// With no samples all three times are `scheduled`, or now when unset.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn predict(
    samples: &[ArrivalSample],
    product_time: DateTime<Utc>,
    scheduled: Option<DateTime<Utc>>,
) -> ArrivalPrediction {
    let offsets: Vec<i64> = samples.iter().map(ArrivalSample::offset_ms).collect();
    let n = offsets.len();
    if n == 0 {
        let fallback = scheduled.unwrap_or_else(Utc::now);
        return ArrivalPrediction {
            earliest: fallback,
            latest: fallback,
            predicted: fallback,
        };
    }

    // First occurrence of each extreme
    let mut earliest_pos = 0;
    let mut latest_pos = 0;
    for (i, offset) in offsets.iter().enumerate() {
        if *offset < offsets[earliest_pos] {
            earliest_pos = i;
        }
        if *offset > offsets[latest_pos] {
            latest_pos = i;
        }
    }
    let trim = n > 4 && earliest_pos != latest_pos;
    let kept: Vec<f64> = offsets
        .iter()
        .enumerate()
        .filter(|(i, _)| !trim || (*i != earliest_pos && *i != latest_pos))
        .map(|(_, offset)| *offset as f64)
        .collect();

    let count = kept.len() as f64;
    let mean = kept.iter().sum::<f64>() / count;
    let variance = kept.iter().map(|o| (mean - o).powi(2)).sum::<f64>() / count;
    let stddev = variance.sqrt();

    ArrivalPrediction {
        earliest: shift(product_time, offsets[earliest_pos] as f64),
        latest: shift(product_time, offsets[latest_pos] as f64),
        predicted: shift(product_time, mean + stddev),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn shift(date: DateTime<Utc>, millis: f64) -> DateTime<Utc> {
    let seconds = (millis / 1000.0).trunc() as i64;
    date + TimeDelta::seconds(seconds)
}

/// Predict the arrival of a transfer's file from the destination's history of
/// files with the same stream and time.
///
/// # Errors
///
/// Returns a storage error.
pub fn predict_transfer<S: Store + ?Sized>(
    store: &S,
    transfer: &DataTransfer,
    data_file: &DataFile,
) -> Result<ArrivalPrediction> {
    let mut samples = Vec::new();
    for past in store.list_transfers_by_destination(&transfer.destination)? {
        if past.id == transfer.id || past.data_file_id == data_file.id {
            continue;
        }
        let Some(file) = store.get_data_file(past.data_file_id)? else {
            continue;
        };
        if file.meta_stream == data_file.meta_stream && file.meta_time == data_file.meta_time {
            samples.push(ArrivalSample {
                arrived_at: file.arrived_at,
                product_time: file.time_base,
            });
        }
    }
    tracing::trace!(
        transfer_id = %transfer.id,
        samples = samples.len(),
        "predicting arrival"
    );
    Ok(predict(
        &samples,
        data_file.time_base,
        Some(transfer.scheduled_at),
    ))
}

/// Timeliness band of a transfer, in escalating order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Timeliness {
    /// No prediction available.
    None = 0,
    /// Before the target time.
    BeforeTarget = 1,
    /// Before the predicted time.
    BeforePredicted = 2,
    /// At or after the predicted time.
    Late = 3,
    /// At or after predicted plus twice the range.
    Late2 = 4,
    /// At or after predicted plus four times the range.
    Late4 = 5,
    /// At or after predicted plus six times the range (at least five minutes).
    Late6 = 6,
}

impl Timeliness {
    /// Numeric band.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Display severity.
    #[must_use]
    pub const fn color(self) -> &'static str {
        match self {
            Self::None => "white",
            Self::BeforeTarget => "cyan",
            Self::BeforePredicted => "green",
            Self::Late => "blue",
            Self::Late2 => "yellow",
            Self::Late4 => "orange",
            Self::Late6 => "red",
        }
    }
}

/// Classify a finish time (or now) against a prediction.
#[must_use]
pub fn classify(
    prediction: Option<&ArrivalPrediction>,
    finished_at: Option<DateTime<Utc>>,
) -> Timeliness {
    let Some(prediction) = prediction else {
        return Timeliness::None;
    };
    let at = finished_at.unwrap_or_else(Utc::now);
    let range = prediction.latest - prediction.earliest;
    let predicted = prediction.predicted;
    if at >= predicted + (range * 6).max(TimeDelta::minutes(5)) {
        Timeliness::Late6
    } else if at >= predicted + range * 4 {
        Timeliness::Late4
    } else if at >= predicted + range * 2 {
        Timeliness::Late2
    } else if at >= predicted {
        Timeliness::Late
    } else {
        Timeliness::BeforePredicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn product_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn samples(minutes: &[i64]) -> Vec<ArrivalSample> {
        minutes
            .iter()
            .enumerate()
            .map(|(day, m)| {
                let base = product_time() - TimeDelta::days(day as i64 + 1);
                ArrivalSample {
                    arrived_at: base + TimeDelta::minutes(*m),
                    product_time: base,
                }
            })
            .collect()
    }

    #[test]
    fn trims_extremes_with_more_than_four_samples() {
        let prediction = predict(&samples(&[10, 20, 30, 40, 1000]), product_time(), None);
        assert_eq!(prediction.earliest, product_time() + TimeDelta::minutes(10));
        assert_eq!(prediction.latest, product_time() + TimeDelta::minutes(1000));
        // mean 30 min, stddev sqrt(200/3) min = 489.897 s
        assert_eq!(
            prediction.predicted,
            product_time() + TimeDelta::minutes(30) + TimeDelta::seconds(489)
        );
        assert!(prediction.earliest <= prediction.latest);
    }

    #[test]
    fn keeps_all_samples_up_to_four() {
        let prediction = predict(&samples(&[10, 20, 30, 40]), product_time(), None);
        // mean 25 min, stddev sqrt(125) min = 670.82 s
        assert_eq!(
            prediction.predicted,
            product_time() + TimeDelta::minutes(25) + TimeDelta::seconds(670)
        );
    }

    #[test]
    fn identical_samples_are_not_trimmed() {
        let prediction = predict(&samples(&[5, 5, 5, 5, 5]), product_time(), None);
        assert_eq!(prediction.predicted, product_time() + TimeDelta::minutes(5));
        assert_eq!(prediction.earliest, prediction.latest);
    }

    #[test]
    fn no_history_uses_scheduled_time() {
        let scheduled = product_time() + TimeDelta::hours(3);
        let prediction = predict(&[], product_time(), Some(scheduled));
        assert_eq!(prediction.earliest, scheduled);
        assert_eq!(prediction.latest, scheduled);
        assert_eq!(prediction.predicted, scheduled);
    }

    #[test]
    fn bands() {
        let p = product_time();
        let prediction = ArrivalPrediction {
            earliest: p,
            latest: p + TimeDelta::minutes(10),
            predicted: p + TimeDelta::minutes(30),
        };
        let at = |m: i64| Some(p + TimeDelta::minutes(m));
        assert_eq!(classify(None, at(0)), Timeliness::None);
        assert_eq!(classify(Some(&prediction), at(29)), Timeliness::BeforePredicted);
        assert_eq!(classify(Some(&prediction), at(30)), Timeliness::Late);
        assert_eq!(classify(Some(&prediction), at(50)), Timeliness::Late2);
        assert_eq!(classify(Some(&prediction), at(70)), Timeliness::Late4);
        assert_eq!(classify(Some(&prediction), at(90)), Timeliness::Late6);
        assert_eq!(Timeliness::Late6.color(), "red");
    }

    #[test]
    fn sixth_band_has_a_five_minute_floor() {
        let p = product_time();
        let prediction = ArrivalPrediction {
            earliest: p,
            latest: p,
            predicted: p,
        };
        assert_eq!(
            classify(Some(&prediction), Some(p + TimeDelta::minutes(4))),
            Timeliness::Late4
        );
        assert_eq!(
            classify(Some(&prediction), Some(p + TimeDelta::minutes(5))),
            Timeliness::Late6
        );
    }
}
