//! Local time, date and current weather for the `getSystemInfo` tool.
//!
//! Location comes from configured coordinates or, when none are set, from
//! IP geolocation. Weather is Open-Meteo's `current_weather`; the city name
//! comes from a reverse geocoder. Every failure collapses into one
//! [`LookupFailure`] whose text is reported to the agent in place of the
//! weather line.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

const WEATHER_URL: &str = "https://api.open-meteo.com/v1/forecast";
const REVERSE_GEOCODE_URL: &str = "https://api.bigdatacloud.net/data/reverse-geocode-client";
const IP_LOCATION_URL: &str = "https://ipapi.co/json/";

/// Current conditions at the user's location.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub city: String,
    pub temperature_c: f64,
    pub condition: &'static str,
}

impl std::fmt::Display for WeatherReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Location: {}. Temperature: {}°C. Conditions: {}.",
            self.city, self.temperature_c, self.condition
        )
    }
}

/// Why no weather could be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LookupFailure {
    #[error("Location permission denied. Enable location access in the settings.")]
    NoPermission,
    #[error("Location is currently unavailable.")]
    Unavailable,
    #[error("The weather service could not be reached (API error).")]
    ServiceError,
    #[error("Getting the location timed out.")]
    Timeout,
    #[error("An unknown error occurred while getting the location.")]
    Unknown,
}

/// Source of the weather part of the system-info answer.
pub trait SystemInfo: Send + Sync {
    fn lookup(&self) -> Pin<Box<dyn Future<Output = Result<WeatherReport, LookupFailure>> + Send + '_>>;
}

/// Build the `getSystemInfo` answer: time and date always, weather if it
/// arrives within `timeout`.
pub async fn describe_now(info: &dyn SystemInfo, timeout: Duration) -> String {
    let weather = match tokio::time::timeout(timeout, info.lookup()).await {
        Ok(result) => result,
        Err(_) => Err(LookupFailure::Timeout),
    };
    if let Err(failure) = &weather {
        warn!(?failure, "Weather lookup failed");
    }
    describe_at(Local::now(), weather)
}

fn describe_at(now: DateTime<Local>, weather: Result<WeatherReport, LookupFailure>) -> String {
    let weather_status = match weather {
        Ok(report) => report.to_string(),
        Err(failure) => failure.to_string(),
    };
    json!({
        "time": now.format("%H:%M").to_string(),
        "date": now.format("%A, %-d %B").to_string(),
        "weatherStatus": weather_status,
    })
    .to_string()
}

/// Condition text for a WMO weather interpretation code.
pub fn wmo_condition(code: i64) -> &'static str {
    match code {
        0 => "Clear",
        1 | 2 => "Partly cloudy",
        3 => "Overcast",
        45..=48 => "Foggy",
        51..=67 => "Rainy",
        71..=77 => "Snowy",
        80..=82 => "Rain showers",
        95.. => "Thunderstorm",
        _ => "Cloudy",
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current_weather: CurrentWeather,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature: f64,
    weathercode: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ReverseGeocode {
    city: Option<String>,
    locality: Option<String>,
    principal_subdivision: Option<String>,
}

impl ReverseGeocode {
    fn place_name(self) -> String {
        [self.city, self.locality, self.principal_subdivision]
            .into_iter()
            .flatten()
            .find(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "Unknown location".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct IpLocation {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// Open-Meteo weather at a fixed or IP-derived location.
pub struct OpenMeteoWeather {
    client: reqwest::Client,
    location_enabled: bool,
    fixed_location: Option<(f64, f64)>,
}

impl OpenMeteoWeather {
    pub fn new(location_enabled: bool, fixed_location: Option<(f64, f64)>) -> Self {
        Self {
            client: reqwest::Client::new(),
            location_enabled,
            fixed_location,
        }
    }

    async fn locate(&self) -> Result<(f64, f64), LookupFailure> {
        if !self.location_enabled {
            return Err(LookupFailure::NoPermission);
        }
        if let Some(coords) = self.fixed_location {
            return Ok(coords);
        }

        let resp = self
            .client
            .get(IP_LOCATION_URL)
            .send()
            .await
            .map_err(|e| {
                debug!(error = %e, "IP geolocation request failed");
                LookupFailure::Unavailable
            })?;
        if !resp.status().is_success() {
            debug!(status = %resp.status(), "IP geolocation refused");
            return Err(LookupFailure::Unavailable);
        }
        let location: IpLocation = resp.json().await.map_err(|_| LookupFailure::Unknown)?;
        location
            .latitude
            .zip(location.longitude)
            .ok_or(LookupFailure::Unknown)
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, LookupFailure> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                debug!(url, error = %e, "Weather request failed");
                LookupFailure::ServiceError
            })?;
        if !resp.status().is_success() {
            debug!(url, status = %resp.status(), "Weather service error");
            return Err(LookupFailure::ServiceError);
        }
        resp.json().await.map_err(|_| LookupFailure::ServiceError)
    }

    async fn report(&self) -> Result<WeatherReport, LookupFailure> {
        let (latitude, longitude) = self.locate().await?;
        let coords = [
            ("latitude", latitude.to_string()),
            ("longitude", longitude.to_string()),
        ];

        let mut weather_query = coords.to_vec();
        weather_query.push(("current_weather", "true".into()));
        let forecast: ForecastResponse = self.fetch_json(WEATHER_URL, &weather_query).await?;

        let mut geocode_query = coords.to_vec();
        geocode_query.push(("localityLanguage", "en".into()));
        let place: ReverseGeocode = self.fetch_json(REVERSE_GEOCODE_URL, &geocode_query).await?;

        Ok(WeatherReport {
            city: place.place_name(),
            temperature_c: forecast.current_weather.temperature,
            condition: wmo_condition(forecast.current_weather.weathercode),
        })
    }
}

impl SystemInfo for OpenMeteoWeather {
    fn lookup(&self) -> Pin<Box<dyn Future<Output = Result<WeatherReport, LookupFailure>> + Send + '_>> {
        Box::pin(self.report())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::Value;

    use super::*;

    struct NeverAnswers;

    impl SystemInfo for NeverAnswers {
        fn lookup(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<WeatherReport, LookupFailure>> + Send + '_>> {
            Box::pin(std::future::pending())
        }
    }

    #[test]
    fn test_wmo_mapping() {
        assert_eq!(wmo_condition(0), "Clear");
        assert_eq!(wmo_condition(2), "Partly cloudy");
        assert_eq!(wmo_condition(3), "Overcast");
        assert_eq!(wmo_condition(45), "Foggy");
        assert_eq!(wmo_condition(61), "Rainy");
        assert_eq!(wmo_condition(75), "Snowy");
        assert_eq!(wmo_condition(81), "Rain showers");
        assert_eq!(wmo_condition(99), "Thunderstorm");
        assert_eq!(wmo_condition(10), "Cloudy");
    }

    #[test]
    fn test_place_name_fallbacks() {
        let geo: ReverseGeocode =
            serde_json::from_str(r#"{"city":"","locality":"Kadikoy","principalSubdivision":"Istanbul"}"#)
                .unwrap();
        assert_eq!(geo.place_name(), "Kadikoy");
        let geo: ReverseGeocode = serde_json::from_str(r#"{"principalSubdivision":"Istanbul"}"#).unwrap();
        assert_eq!(geo.place_name(), "Istanbul");
        assert_eq!(ReverseGeocode::default().place_name(), "Unknown location");
    }

    #[test]
    fn test_describe_formats_time_and_date() {
        let now = Local.with_ymd_and_hms(2024, 3, 5, 9, 7, 0).unwrap();
        let report = WeatherReport {
            city: "Izmir".into(),
            temperature_c: 18.5,
            condition: "Clear",
        };
        let payload: Value = serde_json::from_str(&describe_at(now, Ok(report))).unwrap();
        assert_eq!(payload["time"], "09:07");
        assert_eq!(payload["date"], "Tuesday, 5 March");
        assert_eq!(
            payload["weatherStatus"],
            "Location: Izmir. Temperature: 18.5°C. Conditions: Clear."
        );
    }

    #[tokio::test]
    async fn test_slow_lookup_times_out() {
        let payload = describe_now(&NeverAnswers, Duration::from_millis(20)).await;
        let payload: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(payload["weatherStatus"], LookupFailure::Timeout.to_string());
    }

    #[tokio::test]
    async fn test_disabled_location_is_permission_failure() {
        let weather = OpenMeteoWeather::new(false, Some((1.0, 2.0)));
        assert_eq!(weather.lookup().await, Err(LookupFailure::NoPermission));
    }
}
