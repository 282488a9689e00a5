//! Settings file and Graph credentials

use crate::error::{RateSheetError, RateSheetResult};
use crate::excel::DEFAULT_SHEET_PREFERENCE;
use crate::filter::ErcotNarrowing;
use crate::mapper::{MapperOptions, MappingProfile};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MASTER_FILE: &str = "DAILY PRICING - new.xlsx";
pub const DEFAULT_MASTER_FOLDER: &str = "/Kilowatt/Client Pricing Sheets";
pub const DEFAULT_TEMPLATE_SHEET: &str = "IMPORT";
pub const DEFAULT_LOGIN_BASE: &str = "https://login.microsoftonline.com";
pub const DEFAULT_GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Remote folders used by transfer commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// Folder holding the master workbook
    pub master_folder: String,
    /// Folder rate sheets are uploaded to and fetched from
    pub upload_folder: Option<String>,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            master_folder: DEFAULT_MASTER_FOLDER.to_string(),
            upload_folder: None,
        }
    }
}

/// Pipeline settings, loaded from YAML
///
/// ```yaml
/// master_path: "DAILY PRICING - new.xlsx"
/// matrix_sheet: "matrix table"
/// rep_name: HUDSON
/// price_multiplier: 1.0
/// ercot:
///   utilities: [ONCOR, CPL]
///   load_factor: "0-100%"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub master_path: PathBuf,
    pub backup_dir: Option<PathBuf>,
    pub matrix_sheet: String,
    pub template_sheet: String,
    pub profile: MappingProfile,
    pub rep_name: String,
    pub price_multiplier: f64,
    pub min_mwh: f64,
    pub max_mwh: f64,
    pub max_meters: f64,
    pub ercot: ErcotNarrowing,
    pub remote: RemoteSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let mapper = MapperOptions::default();
        Self {
            master_path: PathBuf::from(DEFAULT_MASTER_FILE),
            backup_dir: None,
            matrix_sheet: DEFAULT_SHEET_PREFERENCE.to_string(),
            template_sheet: DEFAULT_TEMPLATE_SHEET.to_string(),
            profile: MappingProfile::default(),
            rep_name: mapper.rep_name,
            price_multiplier: mapper.price_multiplier,
            min_mwh: mapper.min_mwh,
            max_mwh: mapper.max_mwh,
            max_meters: mapper.max_meters,
            ercot: ErcotNarrowing::default(),
            remote: RemoteSettings::default(),
        }
    }
}

impl Settings {
    /// Read a settings file; `None` gives the defaults
    pub fn load(path: Option<&Path>) -> RateSheetResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path).map_err(|e| {
            RateSheetError::Config(format!("Cannot read settings {}: {}", path.display(), e))
        })?;
        let settings: Settings = serde_yaml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> RateSheetResult<()> {
        if !self.price_multiplier.is_finite() || self.price_multiplier <= 0.0 {
            return Err(RateSheetError::Config(format!(
                "price_multiplier must be positive, got {}",
                self.price_multiplier
            )));
        }
        if self.min_mwh > self.max_mwh {
            return Err(RateSheetError::Config(format!(
                "min_mwh ({}) exceeds max_mwh ({})",
                self.min_mwh, self.max_mwh
            )));
        }
        Ok(())
    }

    /// Mapper constants; price date defaults to today
    pub fn mapper_options(&self, price_date: Option<NaiveDate>) -> MapperOptions {
        MapperOptions {
            price_date: price_date.unwrap_or_else(|| Local::now().date_naive()),
            rep_name: self.rep_name.clone(),
            price_multiplier: self.price_multiplier,
            min_mwh: self.min_mwh,
            max_mwh: self.max_mwh,
            max_meters: self.max_meters,
        }
    }
}

/// Graph API credentials and site coordinates
#[derive(Clone, PartialEq)]
pub struct GraphConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub site_hostname: String,
    pub site_path: String,
    pub upload_folder: Option<String>,
    pub master_file_name: String,
    pub login_base: String,
    pub graph_base: String,
}

impl fmt::Debug for GraphConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("site_hostname", &self.site_hostname)
            .field("site_path", &self.site_path)
            .field("upload_folder", &self.upload_folder)
            .field("master_file_name", &self.master_file_name)
            .field("login_base", &self.login_base)
            .field("graph_base", &self.graph_base)
            .finish()
    }
}

impl GraphConfig {
    /// Read from the process environment (call `dotenvy::dotenv()` first for `.env`)
    pub fn from_env() -> RateSheetResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through an arbitrary lookup; every missing key is reported at once
    pub fn from_lookup<F>(lookup: F) -> RateSheetResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| -> Option<String> {
            keys.iter()
                .filter_map(|k| lookup(k))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        let required: [(&str, &[&str]); 5] = [
            ("TENANT_ID", &["TENANT_ID", "AZURE_TENANT_ID"]),
            ("CLIENT_ID", &["CLIENT_ID", "AZURE_CLIENT_ID"]),
            ("CLIENT_SECRET", &["CLIENT_SECRET", "AZURE_CLIENT_SECRET"]),
            ("SITE_HOSTNAME", &["SITE_HOSTNAME"]),
            ("SITE_PATH", &["SITE_PATH"]),
        ];

        let mut values = Vec::with_capacity(required.len());
        let mut missing = Vec::new();
        for (name, keys) in required {
            match get(keys) {
                Some(v) => values.push(v),
                None => missing.push(name),
            }
        }
        if !missing.is_empty() {
            return Err(RateSheetError::Config(format!(
                "Missing environment variables: {}",
                missing.join(", ")
            )));
        }

        let mut values = values.into_iter();
        let mut next = || values.next().unwrap_or_default();
        Ok(Self {
            tenant_id: next(),
            client_id: next(),
            client_secret: next(),
            site_hostname: next(),
            site_path: next().trim_matches('/').to_string(),
            upload_folder: get(&["SHAREPOINT_UPLOAD_FOLDER"]),
            master_file_name: get(&["DAILY_PRICING_FILE_NAME"])
                .unwrap_or_else(|| DEFAULT_MASTER_FILE.to_string()),
            login_base: get(&["GRAPH_LOGIN_BASE"])
                .unwrap_or_else(|| DEFAULT_LOGIN_BASE.to_string()),
            graph_base: get(&["GRAPH_API_BASE"])
                .unwrap_or_else(|| DEFAULT_GRAPH_BASE.to_string()),
        })
    }
}
