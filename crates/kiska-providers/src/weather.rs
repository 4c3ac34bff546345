//! OpenWeatherMap current conditions for the weather indicator.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use kiska_core::config::WeatherConfig;

const OPENWEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// What the weather indicator shows. Fields are display-ready strings so the
/// "unavailable" placeholder fits the same shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub temperature: String,
    pub condition: String,
    pub location: String,
    pub icon: String,
    pub humidity: String,
    pub wind_speed: String,
    pub feels_like: String,
}

impl WeatherReport {
    /// Placeholder shown when conditions cannot be fetched.
    pub fn unavailable() -> Self {
        Self {
            temperature: "--".into(),
            condition: "Unknown".into(),
            location: "Unknown".into(),
            icon: "01d".into(),
            humidity: "--".into(),
            wind_speed: "--".into(),
            feels_like: "--".into(),
        }
    }

    pub fn icon_url(&self) -> String {
        format!("https://openweathermap.org/img/wn/{}@2x.png", self.icon)
    }
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    name: String,
    main: MainBlock,
    weather: Vec<ConditionBlock>,
    wind: WindBlock,
}

#[derive(Debug, Deserialize)]
struct MainBlock {
    temp: f64,
    feels_like: f64,
    humidity: u32,
}

#[derive(Debug, Deserialize)]
struct ConditionBlock {
    main: String,
    icon: String,
}

#[derive(Debug, Deserialize)]
struct WindBlock {
    speed: f64,
}

impl From<CurrentWeather> for WeatherReport {
    fn from(w: CurrentWeather) -> Self {
        let (condition, icon) = w
            .weather
            .into_iter()
            .next()
            .map(|c| (c.main, c.icon))
            .unwrap_or_else(|| ("Unknown".into(), "01d".into()));
        Self {
            temperature: format!("{}", w.main.temp.round() as i64),
            condition,
            location: w.name,
            icon,
            humidity: w.main.humidity.to_string(),
            wind_speed: w.wind.speed.to_string(),
            feels_like: format!("{}", w.main.feels_like.round() as i64),
        }
    }
}

pub struct WeatherClient {
    config: WeatherConfig,
    base_url: String,
    client: reqwest::Client,
}

impl WeatherClient {
    pub fn new(config: WeatherConfig) -> Self {
        Self {
            config,
            base_url: OPENWEATHER_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Fetch conditions for `location` (or the configured default).
    pub async fn current(&self, location: Option<&str>) -> anyhow::Result<WeatherReport> {
        let api_key = self
            .config
            .resolve_api_key()
            .ok_or_else(|| anyhow::anyhow!("No weather API key configured"))?;
        let location = location.unwrap_or(&self.config.location);
        debug!(location, units = %self.config.units, "Fetching weather");

        let resp = self
            .client
            .get(format!("{}/weather", self.base_url))
            .query(&[
                ("q", location),
                ("units", self.config.units.as_str()),
                ("appid", api_key.as_str()),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Weather API error {status}: {body}");
        }

        let current: CurrentWeather = resp.json().await?;
        Ok(current.into())
    }

    /// Like [`Self::current`], but any failure yields [`WeatherReport::unavailable`].
    pub async fn current_or_placeholder(&self, location: Option<&str>) -> WeatherReport {
        match self.current(location).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Weather fetch failed");
                WeatherReport::unavailable()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_current_weather() {
        let body = r#"{
            "name": "London",
            "main": { "temp": 61.7, "feels_like": 60.2, "humidity": 72 },
            "weather": [{ "main": "Clouds", "icon": "04d" }],
            "wind": { "speed": 9.2 }
        }"#;
        let report: WeatherReport = serde_json::from_str::<CurrentWeather>(body).unwrap().into();
        assert_eq!(report.temperature, "62");
        assert_eq!(report.feels_like, "60");
        assert_eq!(report.condition, "Clouds");
        assert_eq!(report.humidity, "72");
        assert_eq!(report.wind_speed, "9.2");
        assert!(report.icon_url().ends_with("/04d@2x.png"));
    }

    #[tokio::test]
    async fn test_missing_key_falls_back_to_placeholder() {
        let client = WeatherClient::new(WeatherConfig::default());
        assert!(client.current(None).await.is_err());
        assert_eq!(client.current_or_placeholder(None).await, WeatherReport::unavailable());
    }
}
