use crate::error::CourierError;
use crate::types::{CentralStockEntry, TechnicianStockEntry};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Name,
    Qty,
    Mrp,
    SpareId,
}

impl SortField {
    pub fn parse(value: &str) -> Result<Self, CourierError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "qty" | "quantity" => Ok(Self::Qty),
            "mrp" | "price" => Ok(Self::Mrp),
            "spare_id" => Ok(Self::SpareId),
            other => Err(CourierError::Validation(format!(
                "unknown sort field '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(value: &str) -> Result<Self, CourierError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(CourierError::Validation(format!(
                "unknown sort order '{other}'"
            ))),
        }
    }

    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Asc => ordering,
            Self::Desc => ordering.reverse(),
        }
    }
}

/// Filter and ordering applied to a fresh stock snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct StockQuery {
    pub search: Option<String>,
    pub sort_by: SortField,
    pub order: SortOrder,
}

impl Default for StockQuery {
    fn default() -> Self {
        Self {
            search: None,
            sort_by: SortField::Name,
            order: SortOrder::Asc,
        }
    }
}

impl StockQuery {
    /// Build a query from raw request parameters. Blank values fall back to defaults.
    pub fn from_params(
        search: Option<&str>,
        sort_by: Option<&str>,
        order: Option<&str>,
    ) -> Result<Self, CourierError> {
        let search = search
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_lowercase);
        let sort_by = match sort_by.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => SortField::parse(value)?,
            None => SortField::Name,
        };
        let order = match order.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => SortOrder::parse(value)?,
            None => SortOrder::Asc,
        };
        Ok(Self {
            search,
            sort_by,
            order,
        })
    }

    fn matches(&self, spare_id: &str, name: &str) -> bool {
        match &self.search {
            Some(needle) => {
                spare_id.to_lowercase().contains(needle.as_str())
                    || name.to_lowercase().contains(needle.as_str())
            }
            None => true,
        }
    }

    pub fn apply_central(&self, stock: Vec<CentralStockEntry>) -> Vec<CentralStockEntry> {
        let mut filtered = stock
            .into_iter()
            .filter(|entry| self.matches(&entry.spare_id, &entry.name))
            .collect::<Vec<_>>();

        filtered.sort_by(|a, b| {
            let ordering = match self.sort_by {
                SortField::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
                SortField::Qty => a.qty.cmp(&b.qty),
                SortField::Mrp => a.mrp.total_cmp(&b.mrp),
                SortField::SpareId => a.spare_id.cmp(&b.spare_id),
            };
            self.order.apply(ordering)
        });
        filtered
    }

    /// Technician rows carry no price, so `mrp` ordering is rejected.
    pub fn apply_technician(
        &self,
        stock: Vec<TechnicianStockEntry>,
    ) -> Result<Vec<TechnicianStockEntry>, CourierError> {
        if self.sort_by == SortField::Mrp {
            return Err(CourierError::Validation(
                "technician stock cannot be sorted by mrp".to_string(),
            ));
        }

        let mut filtered = stock
            .into_iter()
            .filter(|entry| self.matches(&entry.spare_id, &entry.name))
            .collect::<Vec<_>>();

        filtered.sort_by(|a, b| {
            let ordering = match self.sort_by {
                SortField::Qty => a.qty.cmp(&b.qty),
                SortField::SpareId => a.spare_id.cmp(&b.spare_id),
                SortField::Name | SortField::Mrp => {
                    a.name.to_lowercase().cmp(&b.name.to_lowercase())
                }
            };
            self.order.apply(ordering)
        });
        Ok(filtered)
    }
}
