//! Storefront catalog, order and profile endpoints
//!
//! Thin pass-through: payloads stay JSON and every call goes through the
//! [`RequestPipeline`] for token attachment and 401 recovery.

use super::ApiError;
use crate::pipeline::{ApiRequest, RequestPipeline};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default page size of the product listing
pub const DEFAULT_PAGE_SIZE: u32 = 12;

/// Filters for `GET /store/products`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductQuery {
    pub q: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub sort: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for ProductQuery {
    fn default() -> Self {
        Self {
            q: None,
            brand: None,
            category: None,
            min_price: None,
            max_price: None,
            sort: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ProductQuery {
    fn to_request(&self) -> ApiRequest {
        let mut request = ApiRequest::get("/store/products");
        let text = [
            ("q", &self.q),
            ("brand", &self.brand),
            ("category", &self.category),
        ];
        for (key, value) in text {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                request = request.with_query(key, value);
            }
        }
        if let Some(min) = self.min_price {
            request = request.with_query("minPrice", min);
        }
        if let Some(max) = self.max_price {
            request = request.with_query("maxPrice", max);
        }
        if let Some(sort) = self.sort.as_deref().filter(|v| !v.is_empty()) {
            request = request.with_query("sort", sort);
        }
        request
            .with_query("page", self.page.max(1))
            .with_query("pageSize", self.page_size)
    }
}

/// One page of products
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProductPage {
    pub items: Vec<Value>,
    pub total: u64,
}

impl ProductPage {
    pub fn total_pages(&self, page_size: u32) -> u64 {
        if page_size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(page_size))
    }
}

/// Body of `PUT /auth/update-profile`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub zip_code: Option<String>,
}

/// Storefront REST API, authorized through the session
#[derive(Clone, Debug)]
pub struct StorefrontApi {
    pipeline: RequestPipeline,
}

impl StorefrontApi {
    pub const fn new(pipeline: RequestPipeline) -> Self {
        Self { pipeline }
    }

    pub const fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    /// List products matching `query`
    ///
    /// # Errors
    ///
    /// Any [`ApiError`] from the request.
    pub async fn products(&self, query: &ProductQuery) -> Result<ProductPage, ApiError> {
        let page: Option<ProductPage> = self.pipeline.send(&query.to_request()).await?;
        Ok(page.unwrap_or_default())
    }

    /// Product with images and specifications
    ///
    /// # Errors
    ///
    /// Any [`ApiError`] from the request.
    pub async fn product_full(&self, id: &str) -> Result<Value, ApiError> {
        self.pipeline
            .send(&ApiRequest::get(format!("/store/product-full/{id}")))
            .await
    }

    /// Free-text product search
    ///
    /// # Errors
    ///
    /// Any [`ApiError`] from the request.
    pub async fn search(&self, q: &str) -> Result<Vec<Value>, ApiError> {
        let results: Option<Vec<Value>> = self
            .pipeline
            .send(&ApiRequest::get("/product/search").with_query("q", q))
            .await?;
        Ok(results.unwrap_or_default())
    }

    /// Orders of the signed-in user
    ///
    /// # Errors
    ///
    /// Any [`ApiError`] from the request.
    pub async fn user_orders(&self) -> Result<Vec<Value>, ApiError> {
        let orders: Option<Vec<Value>> = self
            .pipeline
            .send(&ApiRequest::get("/order/user-orders"))
            .await?;
        Ok(orders.unwrap_or_default())
    }

    /// Every order in the store; admin only
    ///
    /// # Errors
    ///
    /// Any [`ApiError`] from the request.
    pub async fn all_orders(&self) -> Result<Vec<Value>, ApiError> {
        let orders: Option<Vec<Value>> = self
            .pipeline
            .send(&ApiRequest::get("/order/all-orders"))
            .await?;
        Ok(orders.unwrap_or_default())
    }

    /// Update the signed-in user's profile
    ///
    /// # Errors
    ///
    /// Any [`ApiError`] from the request.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<(), ApiError> {
        let request =
            ApiRequest::put("/auth/update-profile").with_json(serde_json::to_value(update)?);
        self.pipeline.send_unit(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_query_only_pages() {
        let request = ProductQuery::default().to_request();
        assert_eq!(
            request.query(),
            &[
                ("page".to_string(), "1".to_string()),
                ("pageSize".to_string(), "12".to_string())
            ]
        );
    }

    #[test]
    fn test_query_skips_empty_filters() {
        let query = ProductQuery {
            q: Some("boot".into()),
            brand: Some(String::new()),
            min_price: Some(10.5),
            sort: Some("price_desc".into()),
            page: 0,
            ..ProductQuery::default()
        };
        let keys: Vec<_> = query
            .to_request()
            .query()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        assert_eq!(
            keys,
            vec!["q=boot", "minPrice=10.5", "sort=price_desc", "page=1", "pageSize=12"]
        );
    }

    #[test]
    fn test_total_pages() {
        let page = ProductPage {
            items: Vec::new(),
            total: 25,
        };
        assert_eq!(page.total_pages(12), 3);
        assert_eq!(page.total_pages(0), 0);
    }

    #[test]
    fn test_profile_update_wire_names() {
        let update = ProfileUpdate {
            zip_code: Some("75001".into()),
            ..ProfileUpdate::default()
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["zipCode"], "75001");
        assert!(value.get("addressLine1").is_some());
        assert!(value.get("addressLine2").is_some());
    }
}
