// Encar-specific JSON parsing: search pages, vehicle details, accident records
use crate::model::{AccidentRecord, ListingId, ListingSummary, ParserError, VehicleDetail};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawSearchPage {
    #[serde(default)]
    count: Option<i64>,
    #[serde(default)]
    search_results: Option<Vec<RawSummary>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawSummary {
    #[serde(default)]
    id: Value,
    manufacturer: Option<String>,
    model_group: Option<String>,
    model: Option<String>,
    badge: Option<String>,
    fuel_type: Option<String>,
    transmission: Option<String>,
    color: Option<String>,
    #[serde(default)]
    year: Value,
    mileage: Option<f64>,
    price: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDetail {
    #[serde(default)]
    vehicle_no: Value,
    category: Option<RawCategory>,
    spec: Option<RawSpec>,
    manage: Option<RawManage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCategory {
    manufacturer_name: Option<String>,
    model_name: Option<String>,
    grade_name: Option<String>,
    #[serde(default)]
    year_month: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSpec {
    fuel_name: Option<String>,
    color_name: Option<String>,
    mileage: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManage {
    first_advertised_date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAccident {
    #[serde(default)]
    reg_date: Value,
    owner_change_cnt: Option<i64>,
    accident_cnt: Option<i64>,
    my_accident_cnt: Option<i64>,
    other_accident_cnt: Option<i64>,
    my_accident_cost: Option<f64>,
    other_accident_cost: Option<f64>,
    robber_cnt: Option<i64>,
    flood_total_loss_cnt: Option<i64>,
    total_loss_cnt: Option<i64>,
}

/// One parsed search page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub total: Option<i64>,
    pub items: Vec<ListingSummary>,
}

/// Parses a search response. Entries without a usable id are dropped.
pub fn parse_search_page(body: &str) -> Result<SearchPage, ParserError> {
    let raw: RawSearchPage = serde_json::from_str(body)?;
    let items = raw
        .search_results
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| match parse_id(&entry.id) {
            Some(id) => Some(ListingSummary {
                id,
                manufacturer: entry.manufacturer,
                model_group: entry.model_group,
                model: entry.model,
                badge: entry.badge,
                fuel_type: entry.fuel_type,
                transmission: entry.transmission,
                color: entry.color,
                year: value_to_string(&entry.year),
                mileage: entry.mileage.map(|m| m as i64),
                price: entry.price,
            }),
            None => {
                debug!("Skipping search entry without id: {:?}", entry.id);
                None
            }
        })
        .collect();

    Ok(SearchPage {
        total: raw.count,
        items,
    })
}

/// Parses the vehicle detail payload. The registration number is mandatory.
pub fn parse_detail(body: &str) -> Result<VehicleDetail, ParserError> {
    let raw: RawDetail = serde_json::from_str(body)?;
    let vehicle_no = value_to_string(&raw.vehicle_no)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ParserError::MissingField("vehicleNo"))?;

    let category = raw.category.unwrap_or_default();
    let spec = raw.spec.unwrap_or_default();
    let manage = raw.manage.unwrap_or_default();

    Ok(VehicleDetail {
        vehicle_no,
        manufacturer_name: category.manufacturer_name,
        model_name: category.model_name,
        grade_name: category.grade_name,
        year_month: value_to_string(&category.year_month),
        fuel_name: spec.fuel_name,
        color_name: spec.color_name,
        mileage: spec.mileage.map(|m| m as i64),
        first_advertised_at: manage.first_advertised_date_time,
    })
}

/// Parses the accident history summary. An empty or non-object body means
/// the record is not available.
pub fn parse_accident(body: &str) -> Result<AccidentRecord, ParserError> {
    if body.trim().is_empty() {
        return Err(ParserError::MissingField("accident summary"));
    }
    let value: Value = serde_json::from_str(body)?;
    match &value {
        Value::Object(map) if !map.is_empty() => {}
        _ => return Err(ParserError::MissingField("accident summary")),
    }
    let raw: RawAccident = serde_json::from_value(value)?;

    Ok(AccidentRecord {
        reg_date: value_to_string(&raw.reg_date),
        owner_changes: raw.owner_change_cnt,
        accidents_total: raw.accident_cnt,
        accidents_own: raw.my_accident_cnt,
        accidents_other: raw.other_accident_cnt,
        repair_cost_own: raw.my_accident_cost,
        repair_cost_other: raw.other_accident_cost,
        theft_count: raw.robber_cnt.unwrap_or(0),
        flood_count: raw.flood_total_loss_cnt.unwrap_or(0),
        total_loss_count: raw.total_loss_cnt.unwrap_or(0),
    })
}

fn parse_id(value: &Value) -> Option<ListingId> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) if f.fract() == 0.0 => format!("{}", f as i64),
            _ => n.to_string(),
        }),
        _ => None,
    }
}
