use std::fs;
use std::sync::{Arc, RwLock};

use directories::ProjectDirs;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Coefficients for the footprint estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimationParams {
    pub kwh_per_call: f64,
    pub pue: f64,
    pub water_l_per_kwh: f64,
    pub co2_kg_per_kwh: f64,
}

impl Default for EstimationParams {
    fn default() -> Self {
        Self {
            kwh_per_call: 0.0003,
            pue: 1.5,
            water_l_per_kwh: 1.8,
            co2_kg_per_kwh: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub base_url: String,
    pub user_id: String,
    pub telemetry_enabled: bool,
    pub privacy_local_only: bool,
    pub custom_providers: Vec<String>,
    pub estimation_params: EstimationParams,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            user_id: String::new(),
            telemetry_enabled: false,
            privacy_local_only: true,
            custom_providers: Vec::new(),
            estimation_params: EstimationParams::default(),
        }
    }
}

/// Deserialize one field, keeping `default` when it is missing or has the wrong shape.
fn field<T: DeserializeOwned>(obj: &serde_json::Map<String, Value>, key: &str, default: T) -> T {
    obj.get(key)
        .and_then(|v| T::deserialize(v).ok())
        .unwrap_or(default)
}

impl EstimationParams {
    pub fn from_value(value: &Value) -> Self {
        let d = Self::default();
        let Some(obj) = value.as_object() else {
            return d;
        };
        Self {
            kwh_per_call: field(obj, "kwhPerCall", d.kwh_per_call),
            pue: field(obj, "pue", d.pue),
            water_l_per_kwh: field(obj, "waterLPerKwh", d.water_l_per_kwh),
            co2_kg_per_kwh: field(obj, "co2KgPerKwh", d.co2_kg_per_kwh),
        }
    }
}

impl Settings {
    /// Build settings from a possibly partial object. Every field falls back to
    /// its default on its own, including the nested estimation parameters.
    pub fn from_value(value: &Value) -> Self {
        let d = Self::default();
        let Some(obj) = value.as_object() else {
            return d;
        };
        Self {
            base_url: field(obj, "baseUrl", d.base_url),
            user_id: field(obj, "userId", d.user_id),
            telemetry_enabled: field(obj, "telemetryEnabled", d.telemetry_enabled),
            privacy_local_only: field(obj, "privacyLocalOnly", d.privacy_local_only),
            custom_providers: field(obj, "customProviders", d.custom_providers),
            estimation_params: obj
                .get("estimationParams")
                .map(EstimationParams::from_value)
                .unwrap_or_default(),
        }
    }

    /// Telemetry goes out only when enabled, not local-only, and both
    /// identifiers are present.
    pub fn telemetry_target(&self) -> Option<(&str, &str)> {
        if !self.telemetry_enabled || self.privacy_local_only {
            return None;
        }
        if self.base_url.is_empty() || self.user_id.is_empty() {
            return None;
        }
        Some((self.base_url.as_str(), self.user_id.as_str()))
    }
}

pub fn load_settings() -> Settings {
    let Some(dirs) = ProjectDirs::from("", "", "ecomind") else {
        return Settings::default();
    };

    let path = dirs.config_dir().join("config.toml");
    let Ok(data) = fs::read_to_string(&path) else {
        return Settings::default();
    };

    match parse_toml(&data) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid config, using defaults");
            Settings::default()
        }
    }
}

fn parse_toml(data: &str) -> Result<Settings, toml::de::Error> {
    let doc: toml::Value = toml::from_str(data)?;
    let value = serde_json::to_value(doc).unwrap_or(Value::Null);
    Ok(Settings::from_value(&value))
}

/// Shared view of the current settings. Readers always see the latest
/// `replace`d value.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<Settings>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn current(&self) -> Settings {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, settings: Settings) {
        match self.inner.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_input_gives_defaults() {
        assert_eq!(Settings::from_value(&json!({})), Settings::default());
        assert_eq!(Settings::from_value(&Value::Null), Settings::default());
    }

    #[test]
    fn missing_estimation_params_fall_back() {
        let s = Settings::from_value(&json!({
            "baseUrl": "https://api.example.com",
            "userId": "test-user",
            "telemetryEnabled": true,
        }));
        assert_eq!(s.base_url, "https://api.example.com");
        assert_eq!(s.user_id, "test-user");
        assert!(s.telemetry_enabled);
        assert_eq!(s.estimation_params, EstimationParams::default());
    }

    #[test]
    fn partial_estimation_params_are_preserved() {
        let s = Settings::from_value(&json!({
            "estimationParams": { "kwhPerCall": 0.001 }
        }));
        let d = EstimationParams::default();
        assert_eq!(s.estimation_params.kwh_per_call, 0.001);
        assert_eq!(s.estimation_params.pue, d.pue);
        assert_eq!(s.estimation_params.water_l_per_kwh, d.water_l_per_kwh);
        assert_eq!(s.estimation_params.co2_kg_per_kwh, d.co2_kg_per_kwh);
    }

    #[test]
    fn malformed_fields_fall_back_one_by_one() {
        let s = Settings::from_value(&json!({
            "userId": 42,
            "customProviders": "api.custom.com",
            "privacyLocalOnly": false,
            "estimationParams": { "pue": "high", "co2KgPerKwh": 0.2 }
        }));
        assert_eq!(s.user_id, "");
        assert!(s.custom_providers.is_empty());
        assert!(!s.privacy_local_only);
        assert_eq!(s.estimation_params.pue, 1.5);
        assert_eq!(s.estimation_params.co2_kg_per_kwh, 0.2);
    }

    #[test]
    fn toml_document_uses_same_keys() {
        let s = parse_toml(
            r#"
            userId = "me"
            customProviders = ["api.custom.com", "localhost:3000"]

            [estimationParams]
            pue = 1.2
            "#,
        )
        .unwrap();
        assert_eq!(s.user_id, "me");
        assert_eq!(s.custom_providers, vec!["api.custom.com", "localhost:3000"]);
        assert_eq!(s.estimation_params.pue, 1.2);
        assert_eq!(s.estimation_params.kwh_per_call, 0.0003);
    }

    #[test]
    fn telemetry_target_needs_everything() {
        let mut s = Settings {
            base_url: "https://collector".into(),
            user_id: "u1".into(),
            telemetry_enabled: true,
            privacy_local_only: false,
            ..Settings::default()
        };
        assert_eq!(s.telemetry_target(), Some(("https://collector", "u1")));
        s.user_id.clear();
        assert_eq!(s.telemetry_target(), None);
        s.user_id = "u1".into();
        s.privacy_local_only = true;
        assert_eq!(s.telemetry_target(), None);
    }

    #[test]
    fn handle_sees_replacements() {
        let handle = SettingsHandle::default();
        let clone = handle.clone();
        let mut next = Settings::default();
        next.estimation_params.pue = 2.0;
        handle.replace(next);
        assert_eq!(clone.current().estimation_params.pue, 2.0);
    }
}
