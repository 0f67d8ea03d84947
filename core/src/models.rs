use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// --- Meal slots ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

pub const MEAL_TYPES: &[&str] = &["breakfast", "lunch", "dinner", "snack"];

impl MealType {
    pub const ALL: [MealType; 4] = [Self::Breakfast, Self::Lunch, Self::Dinner, Self::Snack];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Breakfast => "breakfast",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
            Self::Snack => "snack",
        }
    }

    /// Storage code. Notes are ordered by this code within a page.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::Breakfast => 1,
            Self::Lunch => 2,
            Self::Dinner => 3,
            Self::Snack => 4,
        }
    }

    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.code() == code)
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MealType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "breakfast" => Ok(Self::Breakfast),
            "lunch" => Ok(Self::Lunch),
            "dinner" => Ok(Self::Dinner),
            "snack" => Ok(Self::Snack),
            _ => bail!(
                "Invalid meal type '{s}'. Must be one of: {}",
                MEAL_TYPES.join(", ")
            ),
        }
    }
}

impl Serialize for MealType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MealType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// --- Catalog ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub products_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub name: String,
    /// Calories per 100 g.
    pub calories_cost: f64,
    pub default_quantity: f64,
    pub category_id: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub category_name: Option<String>,
}

/// Create/edit payload for a product.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    pub calories_cost: f64,
    #[serde(default = "default_quantity")]
    pub default_quantity: f64,
    pub category_id: i64,
}

fn default_quantity() -> f64 {
    100.0
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProductsSearchRequest {
    pub name: Option<String>,
    pub category_id: Option<i64>,
    pub page_number: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductsSearchResult {
    pub products: Vec<Product>,
    pub total_count: i64,
}

// --- Diary ---

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// `None` until the page has been stored.
    pub id: Option<i64>,
    pub date: NaiveDate,
    pub notes: Vec<Note>,
}

impl Page {
    #[must_use]
    pub fn new(date: NaiveDate) -> Self {
        Self {
            id: None,
            date,
            notes: Vec::new(),
        }
    }

    #[must_use]
    pub fn total_calories(&self) -> f64 {
        self.notes.iter().map(|n| n.calories).sum()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: Option<i64>,
    pub page_id: Option<i64>,
    pub product_id: i64,
    pub product_name: String,
    pub quantity: f64,
    pub meal_type: MealType,
    pub display_order: i64,
    pub calories: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNote {
    pub product_id: i64,
    pub quantity: f64,
    pub meal_type: MealType,
    #[serde(default)]
    pub display_order: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateNote {
    pub product_id: Option<i64>,
    pub quantity: Option<f64>,
    pub meal_type: Option<MealType>,
    pub display_order: Option<i64>,
}

impl UpdateNote {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.product_id.is_none()
            && self.quantity.is_none()
            && self.meal_type.is_none()
            && self.display_order.is_none()
    }
}

/// Row of the page list.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageItem {
    pub id: i64,
    pub date: NaiveDate,
    pub count_notes: i64,
    pub count_calories: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[serde(alias = "asc")]
    Ascending,
    #[default]
    #[serde(alias = "desc")]
    Descending,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PagesFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub sort_order: SortOrder,
    pub page_number: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagesSearchResult {
    pub pages: Vec<PageItem>,
    pub total_count: i64,
}

// --- Export / Import file ---

/// JSON export file. The same shape is accepted back by the importer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFile {
    /// `null` entries are kept so the importer can reject them.
    #[serde(default)]
    pub pages: Vec<Option<PageSnapshot>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub date: NaiveDate,
    /// Absent and `null` both deserialize to `None`, which is distinct from `[]`.
    #[serde(default)]
    pub notes: Option<Vec<NoteSnapshot>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteSnapshot {
    pub product_name: String,
    pub quantity: f64,
    pub meal_type: MealType,
    pub display_order: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub pages_created: usize,
    pub pages_updated: usize,
    pub notes_imported: usize,
}

// --- Calculations ---

/// Calories for `quantity` grams of a product costing `calories_cost` per 100 g.
#[must_use]
pub fn calories_for(calories_cost: f64, quantity: f64) -> f64 {
    calories_cost * quantity / 100.0
}

// --- Validation ---

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 500;

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("Invalid date '{s}'. Use YYYY-MM-DD"))
}

/// Trim a category name and reject empty ones.
pub fn validate_category_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        bail!("Category name must not be empty");
    }
    Ok(trimmed.to_string())
}

pub fn validate_new_product(product: &NewProduct) -> Result<()> {
    if product.name.trim().is_empty() {
        bail!("Product name must not be empty");
    }
    if !product.calories_cost.is_finite() || product.calories_cost < 0.0 {
        bail!("caloriesCost must not be negative");
    }
    if !product.default_quantity.is_finite() || product.default_quantity <= 0.0 {
        bail!("defaultQuantity must be greater than 0");
    }
    Ok(())
}

pub fn validate_quantity(quantity: f64) -> Result<()> {
    if !quantity.is_finite() || quantity <= 0.0 {
        bail!("quantity must be greater than 0");
    }
    Ok(())
}

/// Resolve optional paging arguments into `(page_number, page_size)`.
pub fn resolve_paging(page_number: Option<i64>, page_size: Option<i64>) -> Result<(i64, i64)> {
    let number = page_number.unwrap_or(1);
    let size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if number < 1 {
        bail!("pageNumber must be at least 1");
    }
    if !(1..=MAX_PAGE_SIZE).contains(&size) {
        bail!("pageSize must be between 1 and {MAX_PAGE_SIZE}");
    }
    Ok((number, size))
}

pub fn validate_date_range(start: NaiveDate, end: NaiveDate) -> Result<()> {
    if start > end {
        bail!("Start date {start} is after end date {end}");
    }
    Ok(())
}
