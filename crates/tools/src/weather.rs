//! Weather forecast tool.
//!
//! Forecasts come from a [`ForecastService`]: Open-Meteo in production, or a
//! deterministic synthetic source for offline runs and tests.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use replybot_core::context::RequestContext;
use replybot_core::error::ToolError;
use replybot_core::tool::Tool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const TOOL_NAME: &str = "weather_forecast";

/// One day's forecast for one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub location: String,
    pub date: NaiveDate,
    pub condition: String,
    pub temperature_max_c: f64,
    pub temperature_min_c: f64,
    /// Percent, 0..=100
    pub precipitation_probability: u8,
}

#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error("Unknown location: {0}")]
    UnknownLocation(String),

    #[error("{service}: {detail}")]
    Upstream { service: String, detail: String },
}

#[async_trait]
pub trait ForecastService: Send + Sync {
    fn name(&self) -> &str;

    /// Forecast for `location`, `days_ahead` days from today (0 = today).
    async fn forecast(&self, location: &str, days_ahead: u8) -> Result<Forecast, ForecastError>;
}

#[derive(Debug, Deserialize)]
pub struct WeatherArgs {
    pub location: String,
    #[serde(default)]
    pub days_ahead: u8,
}

pub struct WeatherForecastTool {
    service: Arc<dyn ForecastService>,
}

impl WeatherForecastTool {
    pub fn new(service: Arc<dyn ForecastService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for WeatherForecastTool {
    type Args = WeatherArgs;
    type Output = Forecast;

    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Get the daily weather forecast for a city: condition, high and low temperature in Celsius, and chance of precipitation."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "minLength": 1,
                    "description": "City name, e.g. \"Tokyo\""
                },
                "days_ahead": {
                    "type": "integer",
                    "minimum": 0,
                    "maximum": 6,
                    "description": "0 for today, 1 for tomorrow, up to 6"
                }
            },
            "required": ["location"],
            "additionalProperties": false
        })
    }

    fn response_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "location": { "type": "string" },
                "date": { "type": "string" },
                "condition": { "type": "string" },
                "temperature_max_c": { "type": "number" },
                "temperature_min_c": { "type": "number" },
                "precipitation_probability": { "type": "integer", "minimum": 0, "maximum": 100 }
            },
            "required": [
                "location",
                "date",
                "condition",
                "temperature_max_c",
                "temperature_min_c",
                "precipitation_probability"
            ]
        })
    }

    async fn execute(
        &self,
        _ctx: &RequestContext,
        args: WeatherArgs,
    ) -> Result<Forecast, ToolError> {
        debug!(
            location = %args.location,
            days_ahead = args.days_ahead,
            source = self.service.name(),
            "Fetching forecast"
        );
        self.service
            .forecast(&args.location, args.days_ahead)
            .await
            .map_err(|e| match e {
                ForecastError::UnknownLocation(location) => {
                    ToolError::NotFound(format!("location \"{location}\""))
                }
                ForecastError::Upstream { service, detail } => ToolError::Upstream {
                    tool_name: TOOL_NAME.into(),
                    service,
                    detail,
                },
            })
    }
}

/// Describe a WMO weather interpretation code.
pub fn describe_wmo_code(code: u32) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 | 48 => "Fog",
        51 | 53 | 55 | 56 | 57 => "Drizzle",
        61 | 63 | 66 => "Rain",
        65 | 67 => "Heavy rain",
        71 | 73 | 75 | 77 => "Snow",
        80..=82 => "Rain showers",
        85 | 86 => "Snow showers",
        95 => "Thunderstorm",
        96 | 99 => "Thunderstorm with hail",
        _ => "Unknown",
    }
}

// --- Open-Meteo ---

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

pub struct OpenMeteo {
    client: reqwest::Client,
    timezone: String,
}

impl OpenMeteo {
    pub fn new(timezone: impl Into<String>, timeout: Duration) -> Result<Self, ForecastError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| upstream(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            timezone: timezone.into(),
        })
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ForecastError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| upstream(e.to_string()))?;
        if !response.status().is_success() {
            return Err(upstream(format!("{url} returned {}", response.status())));
        }
        response.json().await.map_err(|e| upstream(e.to_string()))
    }
}

fn upstream(detail: String) -> ForecastError {
    ForecastError::Upstream {
        service: "open-meteo".into(),
        detail,
    }
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<Place>,
}

#[derive(Debug, Deserialize)]
struct Place {
    name: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    daily: Daily,
}

#[derive(Debug, Deserialize)]
struct Daily {
    time: Vec<NaiveDate>,
    weather_code: Vec<Option<u32>>,
    temperature_2m_max: Vec<Option<f64>>,
    temperature_2m_min: Vec<Option<f64>>,
    precipitation_probability_max: Vec<Option<f64>>,
}

impl Daily {
    fn day(&self, place: &str, index: usize) -> Result<Forecast, ForecastError> {
        let missing = || upstream(format!("no forecast for day {index}"));
        Ok(Forecast {
            location: place.to_string(),
            date: *self.time.get(index).ok_or_else(missing)?,
            condition: describe_wmo_code(
                self.weather_code
                    .get(index)
                    .copied()
                    .flatten()
                    .ok_or_else(missing)?,
            )
            .to_string(),
            temperature_max_c: self
                .temperature_2m_max
                .get(index)
                .copied()
                .flatten()
                .ok_or_else(missing)?,
            temperature_min_c: self
                .temperature_2m_min
                .get(index)
                .copied()
                .flatten()
                .ok_or_else(missing)?,
            precipitation_probability: self
                .precipitation_probability_max
                .get(index)
                .copied()
                .flatten()
                .unwrap_or(0.0)
                .clamp(0.0, 100.0)
                .round() as u8,
        })
    }
}

#[async_trait]
impl ForecastService for OpenMeteo {
    fn name(&self) -> &str {
        "open-meteo"
    }

    async fn forecast(&self, location: &str, days_ahead: u8) -> Result<Forecast, ForecastError> {
        let geo: GeocodingResponse = self
            .fetch_json(
                GEOCODING_URL,
                &[("name", location.to_string()), ("count", "1".into())],
            )
            .await?;
        let place = geo
            .results
            .into_iter()
            .next()
            .ok_or_else(|| ForecastError::UnknownLocation(location.to_string()))?;

        let forecast: ForecastResponse = self
            .fetch_json(
                FORECAST_URL,
                &[
                    ("latitude", place.latitude.to_string()),
                    ("longitude", place.longitude.to_string()),
                    (
                        "daily",
                        "weather_code,temperature_2m_max,temperature_2m_min,precipitation_probability_max".into(),
                    ),
                    ("timezone", self.timezone.clone()),
                    ("forecast_days", "7".into()),
                ],
            )
            .await?;

        let label = match &place.country {
            Some(country) => format!("{}, {country}", place.name),
            None => place.name.clone(),
        };
        forecast.daily.day(&label, days_ahead as usize)
    }
}

// --- Synthetic ---

/// Deterministic forecasts derived from the location name and date.
pub struct SyntheticForecast;

#[async_trait]
impl ForecastService for SyntheticForecast {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn forecast(&self, location: &str, days_ahead: u8) -> Result<Forecast, ForecastError> {
        let date = Utc::now().date_naive() + ChronoDuration::days(days_ahead as i64);
        Ok(synthetic_forecast(location, date))
    }
}

fn synthetic_forecast(location: &str, date: NaiveDate) -> Forecast {
    let seed = format!("{}:{date}", location.to_lowercase());
    let hash: u32 = seed
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));

    let codes = [0, 1, 2, 3, 45, 61, 65, 71, 80, 95];
    let code = codes[(hash as usize / 7) % codes.len()];
    let max = ((hash % 35) as f64) - 2.0;
    let spread = 3.0 + (hash % 8) as f64;
    let precipitation = match code {
        61 | 65 | 80 | 95 => 60 + (hash % 40) as u8,
        71 => 50 + (hash % 30) as u8,
        _ => (hash % 30) as u8,
    };

    Forecast {
        location: location.to_string(),
        date,
        condition: describe_wmo_code(code).to_string(),
        temperature_max_c: max,
        temperature_min_c: max - spread,
        precipitation_probability: precipitation,
    }
}
