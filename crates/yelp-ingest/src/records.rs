//! Typed input records, one struct per dataset kind.
//!
//! Unknown fields in the Yelp dumps (`attributes`, `is_open`, `compliment_*`,
//! ...) are ignored. Missing required fields or wrongly typed values fail
//! deserialization, which the record source reports as a parse error.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct BusinessRecord {
    pub business_id: String,
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, deserialize_with = "list_or_csv")]
    pub categories: Vec<String>,
    /// Day name -> opening hours, e.g. `"Monday": "10:0-21:0"`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub hours: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub name: String,
    #[serde(deserialize_with = "flexible_date")]
    pub yelping_since: NaiveDate,
    pub review_count: i64,
    pub fans: i64,
    pub average_stars: f64,
    pub funny: i64,
    pub useful: i64,
    pub cool: i64,
    #[serde(default, deserialize_with = "list_or_csv")]
    pub friends: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewRecord {
    pub review_id: String,
    pub user_id: String,
    pub business_id: String,
    pub stars: f64,
    #[serde(deserialize_with = "flexible_date")]
    pub date: NaiveDate,
    pub text: String,
    pub useful: i64,
    pub funny: i64,
    pub cool: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckinRecord {
    pub business_id: String,
    /// Day name -> hour ("20:00") -> number of check-ins.
    pub time: BTreeMap<String, BTreeMap<String, i64>>,
}

/// Replace embedded line breaks so one value stays on one line.
pub fn clean_text(value: &str) -> String {
    if value.contains(['\n', '\r']) {
        value.replace("\r\n", " ").replace(['\n', '\r'], " ")
    } else {
        value.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrCsv {
    List(Vec<String>),
    Csv(String),
}

/// Accepts `["a", "b"]`, `"a, b"`, `"None"` or `null`.
fn list_or_csv<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match Option::<ListOrCsv>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(ListOrCsv::List(items)) => items,
        Some(ListOrCsv::Csv(text)) if text.trim() == "None" => Vec::new(),
        Some(ListOrCsv::Csv(text)) => text.split(',').map(str::to_string).collect(),
    };

    Ok(items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect())
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `YYYY-MM-DD`, optionally followed by a time of day which is dropped.
fn flexible_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let day = raw.trim().split([' ', 'T']).next().unwrap_or_default();
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|e| serde::de::Error::custom(format!("invalid date '{raw}': {e}")))
}
