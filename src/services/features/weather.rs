use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::services::stats::finite_or_zero;

/// Raw daily weather row as handed over by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub date: NaiveDate,
    pub tmin_c: f64,
    pub tmax_c: f64,
    pub tavg_c: f64,
    pub precip_mm: f64,
}

/// Same-day weather stressors joined onto every cell of a date.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WeatherStressors {
    /// 1.0 when the daily minimum is at or below freezing.
    pub freeze: f64,
    /// Day-over-day change in mean temperature (this day minus the previous record).
    pub temp_drop_c: f64,
    pub precip_mm: f64,
    /// 1.0 when precipitation reaches the heavy-rain threshold.
    pub heavy_rain: f64,
}

/// Derives stressors keyed by date. Records are ordered by date and duplicates after the
/// first row for a date are dropped; the temperature change of the first record is zero.
pub fn derive_stressors(
    records: &[WeatherRecord],
    heavy_rain_mm: f64,
) -> BTreeMap<NaiveDate, WeatherStressors> {
    let mut by_date: BTreeMap<NaiveDate, &WeatherRecord> = BTreeMap::new();
    for record in records {
        by_date.entry(record.date).or_insert(record);
    }

    let mut out = BTreeMap::new();
    let mut previous_avg: Option<f64> = None;
    for (date, record) in by_date {
        let tavg = finite_or_zero(record.tavg_c);
        let temp_drop_c = previous_avg.map(|prev| tavg - prev).unwrap_or(0.0);
        previous_avg = Some(tavg);
        let precip_mm = finite_or_zero(record.precip_mm);
        out.insert(
            date,
            WeatherStressors {
                freeze: if record.tmin_c <= 0.0 { 1.0 } else { 0.0 },
                temp_drop_c,
                precip_mm,
                heavy_rain: if precip_mm >= heavy_rain_mm { 1.0 } else { 0.0 },
            },
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
    }

    fn record(d: u32, tmin: f64, tavg: f64, precip: f64) -> WeatherRecord {
        WeatherRecord {
            date: day(d),
            tmin_c: tmin,
            tmax_c: tavg + 4.0,
            tavg_c: tavg,
            precip_mm: precip,
        }
    }

    #[test]
    fn derives_freeze_rain_and_temperature_change() {
        let records = vec![
            record(2, -3.0, 1.0, 30.0),
            record(1, 2.0, 6.0, 0.0),
            record(2, 10.0, 12.0, 0.0),
        ];
        let stressors = derive_stressors(&records, 25.0);
        assert_eq!(stressors.len(), 2);

        let first = stressors[&day(1)];
        assert_eq!(first.freeze, 0.0);
        assert_eq!(first.temp_drop_c, 0.0);

        let second = stressors[&day(2)];
        assert_eq!(second.freeze, 1.0);
        assert_eq!(second.heavy_rain, 1.0);
        assert_eq!(second.temp_drop_c, -5.0);
    }

    #[test]
    fn non_finite_values_become_zero() {
        let stressors = derive_stressors(&[record(1, 5.0, f64::NAN, f64::INFINITY)], 25.0);
        let only = stressors[&day(1)];
        assert_eq!(only.precip_mm, 0.0);
        assert_eq!(only.heavy_rain, 0.0);
        assert_eq!(only.temp_drop_c, 0.0);
    }
}
