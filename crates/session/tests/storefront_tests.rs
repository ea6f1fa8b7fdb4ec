//! Storefront boundary API through the request pipeline

mod common;

use common::{Harness, bearer, long_lived_token};
use serde_json::json;
use storefront_session::{ApiError, ProductQuery, ProfileUpdate};
use wiremock::matchers::{body_json, header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_products_sends_filters_and_pages() {
    let harness = Harness::start().await;

    Mock::given(method("GET"))
        .and(path("/store/products"))
        .and(query_param("q", "boot"))
        .and(query_param("category", "shoes"))
        .and(query_param("maxPrice", "99.5"))
        .and(query_param("page", "2"))
        .and(query_param("pageSize", "12"))
        .and(query_param_is_missing("brand"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "id": 1, "name": "Trail boot" }],
            "total": 13
        })))
        .expect(1)
        .mount(&harness.server)
        .await;

    let page = harness
        .storefront
        .products(&ProductQuery {
            q: Some("boot".into()),
            category: Some("shoes".into()),
            max_price: Some(99.5),
            page: 2,
            ..ProductQuery::default()
        })
        .await
        .unwrap();

    assert_eq!(page.items.len(), 1);
    assert_eq!(page.total, 13);
    assert_eq!(page.total_pages(12), 2);
}

#[tokio::test]
async fn test_anonymous_catalog_browsing() {
    let harness = Harness::start().await;
    harness.session.initialize().await;

    Mock::given(method("GET"))
        .and(path("/product/search"))
        .and(query_param("q", "lamp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 3 }])))
        .mount(&harness.server)
        .await;

    let results = harness.storefront.search("lamp").await.unwrap();
    assert_eq!(results, vec![json!({ "id": 3 })]);
}

#[tokio::test]
async fn test_update_profile_puts_form() {
    let harness = Harness::start().await;
    harness.mount_profile().await;

    let token = long_lived_token("a");
    harness.sign_in(&token, "r1").await;

    Mock::given(method("PUT"))
        .and(path("/auth/update-profile"))
        .and(header("authorization", bearer(&token).as_str()))
        .and(body_json(json!({
            "fullName": "Ada King",
            "addressLine1": null,
            "addressLine2": null,
            "city": "Paris",
            "state": null,
            "country": null,
            "zipCode": null
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&harness.server)
        .await;

    harness
        .storefront
        .update_profile(&ProfileUpdate {
            full_name: Some("Ada King".into()),
            city: Some("Paris".into()),
            ..ProfileUpdate::default()
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let harness = Harness::start().await;
    harness.mount_profile().await;
    harness.sign_in(&long_lived_token("a"), "r1").await;

    Mock::given(method("GET"))
        .and(path("/store/product-full/404"))
        .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
        .expect(1)
        .mount(&harness.server)
        .await;

    let result = harness.storefront.product_full("404").await;
    assert!(matches!(result, Err(ApiError::NotFound(_))));
    assert!(harness.session.is_authenticated());
}
