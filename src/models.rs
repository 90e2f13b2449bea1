//! Data models for the tank telemetry pipeline.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Where a stored sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Polled from the provider's live feed.
    Remote,
    /// Pulled in by a historical import.
    Import,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Remote => "remote",
            DataSource::Import => "import",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown data source: {0}")]
pub struct UnknownDataSource(String);

impl TryFrom<String> for DataSource {
    type Error = UnknownDataSource;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "remote" => Ok(DataSource::Remote),
            "import" => Ok(DataSource::Import),
            _ => Err(UnknownDataSource(value)),
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized sample ready for ingestion (no id yet).
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    // ---
    pub temperature: f64,
    pub level: f64,
    pub pump_status: bool,
    pub heater_status: bool,
    /// Observation time; `None` means "now" at insert time.
    pub timestamp: Option<DateTime<Utc>>,
    pub source: DataSource,
}

/// A sample as stored in the primary store.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    // ---
    pub id: i64,
    pub temperature: f64,
    pub level: f64,
    pub pump_status: bool,
    pub heater_status: bool,
    #[sqlx(rename = "recorded_at")]
    pub timestamp: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub source: DataSource,
}

impl Reading {
    /// Build an unsaved reading with a caller-chosen id, used when serving
    /// samples fetched straight from the provider.
    pub fn transient(id: i64, sample: NewReading) -> Self {
        // ---
        Reading {
            id,
            temperature: sample.temperature,
            level: sample.level,
            pump_status: sample.pump_status,
            heater_status: sample.heater_status,
            timestamp: sample.timestamp.unwrap_or_else(Utc::now),
            source: sample.source,
        }
    }
}

/// In-memory record of the last commanded actuator states.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuatorState {
    pub pump_status: bool,
    pub heater_status: bool,
    pub last_update: DateTime<Utc>,
}

/// Annotated copy of a primary reading held by the secondary store.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BackupReading {
    // ---
    pub id: i64,
    pub temperature: f64,
    pub level: f64,
    pub pump_status: bool,
    pub heater_status: bool,
    #[sqlx(rename = "recorded_at")]
    pub timestamp: DateTime<Utc>,
    pub temperature_trend: f64,
    pub level_trend: f64,
    pub is_temp_critical: bool,
    pub is_level_critical: bool,
    #[sqlx(try_from = "String")]
    pub data_source: DataSource,
    pub data_quality: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Temperature,
    WaterLevel,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Temperature => "temperature",
            AlertKind::WaterLevel => "water_level",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AlertKind::Temperature => "Temperature outside critical limits",
            AlertKind::WaterLevel => "Water level outside critical limits",
        }
    }
}

/// Alert severity, stored as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
        }
    }
}

/// Alert row to be written alongside a critical backup reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAlert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub reading_id: i64,
}

/// One rollup row per calendar day in the secondary store.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailyStat {
    // ---
    #[sqlx(rename = "stat_date")]
    pub date: NaiveDate,
    pub min_temp: f64,
    pub max_temp: f64,
    pub avg_temp: f64,
    pub min_level: f64,
    pub max_level: f64,
    pub avg_level: f64,
    /// Minutes, assuming one sample per five minutes.
    pub pump_active_time: i64,
    pub heater_active_time: i64,
    pub reading_count: i64,
}

/// Operator setpoints (singleton row).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Setpoints {
    pub temp_min: f64,
    pub temp_max: f64,
    pub level_min: f64,
    pub level_max: f64,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// `{temp:{min,max}, level:{min,max}}` view used to annotate read responses.
#[derive(Debug, Clone, Serialize)]
pub struct SetpointRanges {
    pub temp: Range,
    pub level: Range,
}

#[derive(Debug, Clone, Serialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl From<&Setpoints> for SetpointRanges {
    fn from(s: &Setpoints) -> Self {
        SetpointRanges {
            temp: Range {
                min: s.temp_min,
                max: s.temp_max,
            },
            level: Range {
                min: s.level_min,
                max: s.level_max,
            },
        }
    }
}

/// User-facing system settings (singleton row).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    // ---
    pub system_name: String,
    pub update_interval: i32,
    pub data_retention: i32,
    pub email_alerts: bool,
    pub push_alerts: bool,
    pub alert_email: Option<String>,
    pub temp_critical_min: f64,
    pub temp_warning_min: f64,
    pub temp_warning_max: f64,
    pub temp_critical_max: f64,
    pub level_critical_min: f64,
    pub level_warning_min: f64,
    pub level_warning_max: f64,
    pub level_critical_max: f64,
    pub chart_type: String,
    pub dark_mode: bool,
    pub use_24_hour_time: bool,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Setpoints {
    /// Boundary check run before an update reaches the store.
    pub fn validate(&self) -> Result<(), String> {
        // ---
        let all = [self.temp_min, self.temp_max, self.level_min, self.level_max];
        if all.iter().any(|v| !v.is_finite()) {
            return Err("setpoints must be finite numbers".into());
        }
        if self.temp_min >= self.temp_max {
            return Err("tempMin must be lower than tempMax".into());
        }
        if self.level_min >= self.level_max {
            return Err("levelMin must be lower than levelMax".into());
        }
        Ok(())
    }
}

impl Settings {
    /// Boundary check run before an update reaches the store.
    pub fn validate(&self) -> Result<(), String> {
        // ---
        if self.system_name.trim().is_empty() {
            return Err("systemName must not be empty".into());
        }
        if self.update_interval <= 0 || self.data_retention <= 0 {
            return Err("updateInterval and dataRetention must be positive".into());
        }
        let ordered = |name: &str, bounds: [f64; 4]| {
            let sorted = bounds.windows(2).all(|w| w[0] <= w[1]);
            if bounds.iter().all(|v| v.is_finite()) && sorted && bounds[0] < bounds[3] {
                Ok(())
            } else {
                Err(format!(
                    "{name} thresholds must satisfy criticalMin <= warningMin <= warningMax <= criticalMax"
                ))
            }
        };
        ordered(
            "temperature",
            [
                self.temp_critical_min,
                self.temp_warning_min,
                self.temp_warning_max,
                self.temp_critical_max,
            ],
        )?;
        ordered(
            "level",
            [
                self.level_critical_min,
                self.level_warning_min,
                self.level_warning_max,
                self.level_critical_max,
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn settings() -> Settings {
        Settings {
            system_name: "Aquaponia".into(),
            update_interval: 1,
            data_retention: 30,
            email_alerts: true,
            push_alerts: true,
            alert_email: None,
            temp_critical_min: 18.0,
            temp_warning_min: 20.0,
            temp_warning_max: 28.0,
            temp_critical_max: 30.0,
            level_critical_min: 50.0,
            level_warning_min: 60.0,
            level_warning_max: 85.0,
            level_critical_max: 90.0,
            chart_type: "classic".into(),
            dark_mode: false,
            use_24_hour_time: true,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn data_source_round_trips_through_text() {
        // ---
        for source in [DataSource::Remote, DataSource::Import] {
            let parsed = DataSource::try_from(source.as_str().to_string()).unwrap();
            assert_eq!(parsed, source);
        }
        assert!(DataSource::try_from("thingspeak".to_string()).is_err());
    }

    #[test]
    fn setpoints_require_ordered_bounds() {
        // ---
        let mut sp = Setpoints {
            temp_min: 20.0,
            temp_max: 30.0,
            level_min: 60.0,
            level_max: 90.0,
            updated_at: Utc::now(),
        };
        assert!(sp.validate().is_ok());

        sp.temp_min = 31.0;
        assert!(sp.validate().is_err());

        sp.temp_min = 20.0;
        sp.level_max = f64::NAN;
        assert!(sp.validate().is_err());
    }

    #[test]
    fn settings_thresholds_must_nest() {
        // ---
        assert!(settings().validate().is_ok());

        let mut bad = settings();
        bad.temp_warning_max = 31.0;
        assert!(bad.validate().is_err());

        let mut empty_name = settings();
        empty_name.system_name = "  ".into();
        assert!(empty_name.validate().is_err());
    }

    #[test]
    fn setpoint_ranges_view() {
        // ---
        let sp = Setpoints {
            temp_min: 20.0,
            temp_max: 30.0,
            level_min: 60.0,
            level_max: 90.0,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(SetpointRanges::from(&sp)).unwrap();
        assert_eq!(json["temp"]["min"], 20.0);
        assert_eq!(json["level"]["max"], 90.0);
    }

    #[test]
    fn reading_serializes_camel_case() {
        // ---
        let reading = Reading::transient(
            10_000,
            NewReading {
                temperature: 25.0,
                level: 70.0,
                pump_status: true,
                heater_status: false,
                timestamp: None,
                source: DataSource::Import,
            },
        );
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["id"], 10_000);
        assert_eq!(json["pumpStatus"], true);
        assert_eq!(json["heaterStatus"], false);
        assert_eq!(json["source"], "import");
    }
}
