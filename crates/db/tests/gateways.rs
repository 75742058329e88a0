//! Integration tests for the gateway repository.

use sqlx::PgPool;

use keyway_db::models::gateway::CreateGateway;
use keyway_db::repositories::GatewayRepo;

#[sqlx::test(migrations = "./migrations")]
async fn registration_and_endpoint_lookup(pool: PgPool) {
    let first = GatewayRepo::create(
        &pool,
        &CreateGateway {
            facility_id: 100,
            endpoint_url: "http://gw-a.local/commands".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(first.facility_id, 100);
    assert_eq!(first.endpoint_url, "http://gw-a.local/commands");

    GatewayRepo::create(
        &pool,
        &CreateGateway {
            facility_id: 100,
            endpoint_url: "http://gw-b.local/commands".to_string(),
        },
    )
    .await
    .unwrap();
    GatewayRepo::create(
        &pool,
        &CreateGateway {
            facility_id: 200,
            endpoint_url: "http://gw-c.local/commands".to_string(),
        },
    )
    .await
    .unwrap();

    // Lookup is facility-scoped and ordered by registration.
    let endpoints = GatewayRepo::endpoints_for_facility(&pool, 100).await.unwrap();
    assert_eq!(
        endpoints,
        vec![
            "http://gw-a.local/commands".to_string(),
            "http://gw-b.local/commands".to_string(),
        ]
    );

    let none = GatewayRepo::endpoints_for_facility(&pool, 999).await.unwrap();
    assert!(none.is_empty());
}
