use crate::serde_helpers::*;
use serde::Deserialize;
use std::fmt;

/// A row type that can be read from one of the feed files
pub trait FeedRecord: for<'de> Deserialize<'de> {
    /// Conventional name of the file holding these rows
    const FILE_NAME: &'static str;
    /// Columns that must be present for a row to be usable
    const REQUIRED_COLUMNS: &'static [&'static str];

    /// Checks that go beyond the column types, run after a successful deserialization
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

fn non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        Err(format!("empty {field}"))
    } else {
        Ok(())
    }
}

/// A physical stop or station. See `stops.txt`
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StopRecord {
    /// Unique technical identifier of the stop
    #[serde(rename = "stop_id")]
    pub id: String,
    /// Name of the location, as shown to riders
    #[serde(rename = "stop_name")]
    pub name: String,
    /// Latitude of the stop, `None` when the column is empty
    #[serde(rename = "stop_lat", deserialize_with = "de_with_optional_float", default)]
    pub latitude: Option<f64>,
    /// Longitude of the stop, `None` when the column is empty
    #[serde(rename = "stop_lon", deserialize_with = "de_with_optional_float", default)]
    pub longitude: Option<f64>,
    /// Short text or a number that identifies the location for riders
    #[serde(rename = "stop_code", default)]
    pub code: Option<String>,
}

impl FeedRecord for StopRecord {
    const FILE_NAME: &'static str = "stops.txt";
    const REQUIRED_COLUMNS: &'static [&'static str] =
        &["stop_id", "stop_name", "stop_lat", "stop_lon"];

    fn validate(&self) -> Result<(), String> {
        non_empty("stop_id", &self.id)?;
        match (self.latitude, self.longitude) {
            (Some(lat), _) if !lat.is_finite() => Err(format!("non finite latitude {lat}")),
            (_, Some(lon)) if !lon.is_finite() => Err(format!("non finite longitude {lon}")),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for StopRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// One point of a shape. See `shapes.txt`
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ShapePointRecord {
    /// Identifier of the shape the point belongs to
    pub shape_id: String,
    /// Latitude of the shape point
    #[serde(rename = "shape_pt_lat")]
    pub latitude: f64,
    /// Longitude of the shape point
    #[serde(rename = "shape_pt_lon")]
    pub longitude: f64,
    /// Position of the point in its shape, starting at 0
    #[serde(rename = "shape_pt_sequence")]
    pub sequence: u32,
}

impl FeedRecord for ShapePointRecord {
    const FILE_NAME: &'static str = "shapes.txt";
    const REQUIRED_COLUMNS: &'static [&'static str] = &[
        "shape_id",
        "shape_pt_lat",
        "shape_pt_lon",
        "shape_pt_sequence",
    ];

    fn validate(&self) -> Result<(), String> {
        non_empty("shape_id", &self.shape_id)?;
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(format!(
                "non finite coordinates {}, {}",
                self.latitude, self.longitude
            ));
        }
        Ok(())
    }
}

/// A line with its ordered list of stops. See `routes.txt`
///
/// Unlike a plain GTFS route, the `stops` column carries the ordered stop ids
/// of the line as one comma separated (and usually quoted) value.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct RouteRecord {
    /// Unique technical identifier of the line
    #[serde(rename = "route_id")]
    pub id: String,
    /// Raw, comma separated, ordered list of stop ids
    pub stops: String,
    /// Short name of the line, like "32" or "100X"
    #[serde(rename = "route_short_name", default)]
    pub short_name: String,
    /// Full name of the line
    #[serde(rename = "route_long_name", default)]
    pub long_name: String,
    /// Type of transportation, kept verbatim
    #[serde(default)]
    pub route_type: String,
    /// Description of the line
    #[serde(rename = "route_desc", default)]
    pub desc: String,
    /// Line color, kept verbatim
    #[serde(rename = "route_color", default)]
    pub color: String,
    /// Text color, kept verbatim
    #[serde(rename = "route_text_color", default)]
    pub text_color: String,
}

impl FeedRecord for RouteRecord {
    const FILE_NAME: &'static str = "routes.txt";
    const REQUIRED_COLUMNS: &'static [&'static str] = &["route_id", "stops"];

    fn validate(&self) -> Result<(), String> {
        non_empty("route_id", &self.id)
    }
}

impl fmt::Display for RouteRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.long_name.is_empty() {
            write!(f, "{}", self.short_name)
        } else if self.short_name.is_empty() {
            write!(f, "{}", self.long_name)
        } else {
            write!(f, "{} - {}", self.short_name, self.long_name)
        }
    }
}

/// Timetable of a line. See `schedules.txt`
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct ScheduleRecord {
    /// Line the timetable belongs to
    pub route_id: String,
    /// Explicit direction, when the producer knows it
    #[serde(default)]
    pub direction: Option<String>,
    /// Departure times on weekdays, verbatim
    #[serde(default)]
    pub weekday_times: String,
    /// Departure times on saturdays, verbatim
    #[serde(default)]
    pub saturday_times: String,
    /// Departure times on sundays, verbatim
    #[serde(default)]
    pub sunday_times: String,
    /// Free text notes
    #[serde(rename = "color_notes", default)]
    pub notes: String,
    /// Short name of the line
    #[serde(rename = "route_short_name", default)]
    pub short_name: String,
}

impl FeedRecord for ScheduleRecord {
    const FILE_NAME: &'static str = "schedules.txt";
    const REQUIRED_COLUMNS: &'static [&'static str] = &["route_id"];

    fn validate(&self) -> Result<(), String> {
        non_empty("route_id", &self.route_id)
    }
}

