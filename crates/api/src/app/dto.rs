use serde::{Deserialize, Serialize};

use keel_core::{DocumentFilter, Metadata, PageRequest, ValidationErrors};

use crate::app::catalog::{ITEM_SORT_SAFELIST, Item};

// -------------------------
// Request DTOs
// -------------------------

/// Query string of `GET /items`.
#[derive(Debug, Default, Deserialize)]
pub struct ListItemsQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub sort: Option<String>,
    pub name: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

impl ListItemsQuery {
    pub fn page_request(&self) -> Result<PageRequest, ValidationErrors> {
        PageRequest::from_query(
            self.page.unwrap_or(1),
            self.page_size.unwrap_or(20),
            self.sort.clone().unwrap_or_else(|| "id".to_string()),
            ITEM_SORT_SAFELIST,
        )
    }

    pub fn filter(&self) -> DocumentFilter {
        let mut filter = DocumentFilter::new();
        if let Some(name) = &self.name {
            filter = filter.eq("name", name.as_str());
        }
        if let Some(min) = self.min_price {
            filter = filter.gte("price", min);
        }
        if let Some(max) = self.max_price {
            filter = filter.lte("price", max);
        }
        filter
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateItemRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
}

impl UpdateItemRequest {
    pub fn apply(self, item: &mut Item) {
        if let Some(name) = self.name {
            item.name = name;
        }
        if let Some(description) = self.description {
            item.description = description;
        }
        if let Some(price) = self.price {
            item.price = price;
        }
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct ItemEnvelope {
    pub item: Item,
}

#[derive(Debug, Serialize)]
pub struct ItemPage {
    pub items: Vec<Item>,
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use keel_core::{Condition, SortDirection};

    use super::*;

    #[test]
    fn list_query_defaults() {
        let page = ListItemsQuery::default().page_request().unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, 20);
        assert_eq!(page.sort_direction(), SortDirection::Ascending);
    }

    #[test]
    fn negative_page_is_a_validation_error() {
        let query = ListItemsQuery {
            page: Some(-1),
            ..ListItemsQuery::default()
        };
        let errors = query.page_request().unwrap_err();
        assert_eq!(
            errors.get("page"),
            Some("must be greater or equal to 0 and lower or equal to 10 million")
        );
        assert_eq!(errors.get("page_size"), None);
    }

    #[test]
    fn price_bounds_become_range_conditions() {
        let query = ListItemsQuery {
            min_price: Some(1.0),
            max_price: Some(5.0),
            ..ListItemsQuery::default()
        };
        assert_eq!(
            query.filter().conditions(),
            &[
                Condition::Gte {
                    field: "price",
                    value: 1.0
                },
                Condition::Lte {
                    field: "price",
                    value: 5.0
                },
            ]
        );
    }

    #[test]
    fn partial_update_touches_only_given_fields() {
        let mut item = Item::new("bolt", "hex", 1.0);
        UpdateItemRequest {
            price: Some(2.0),
            ..UpdateItemRequest::default()
        }
        .apply(&mut item);
        assert_eq!(item.name, "bolt");
        assert_eq!(item.price, 2.0);
    }
}
