//! edupay HTTP Server
//!
//! Axum-based server exposing checkout, pricing, entitlement, and
//! payment-provider webhook endpoints for the course platform.

mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edupay_core::{
    AccessService, AuditEmitter, CheckoutService, Course, MemoryEntitlementStore,
    MemoryOrderLedger, MemoryPlanStore, MemorySubscriptionStore, PlanType, PricingCatalog,
    PricingResolver, ProviderGateway, SettlementService, SubscriptionPlan,
    audit::spawn_audit_logger,
};
use edupay_providers::{ClickProvider, PaymeProvider};

use crate::handlers::{
    all_courses_pricing, cancel_subscription, click_webhook, course_pricing, create_checkout,
    extend_subscription, health_check, list_providers, order_status, payme_webhook,
    payment_history, purchase_pricing, refund_payment, roadmap_credits, user_course_accesses,
};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    // Stores
    let ledger = Arc::new(MemoryOrderLedger::new());
    let subscriptions = Arc::new(MemorySubscriptionStore::new());
    let plans = Arc::new(MemoryPlanStore::new());
    let entitlements = Arc::new(MemoryEntitlementStore::new());

    if std::env::var("SEED_DEMO_CATALOG").is_ok() {
        seed_demo_catalog(&plans);
        tracing::info!("✓ Demo catalog seeded");
    }

    // Audit trail drains into the log on a background task
    let (audit, audit_rx) = AuditEmitter::channel();
    spawn_audit_logger(audit_rx);

    // Settlement and gateways
    let settlement = Arc::new(SettlementService::new(
        ledger.clone(),
        subscriptions.clone(),
        entitlements.clone(),
        audit.clone(),
    ));
    let payme = Arc::new(PaymeProvider::from_env(settlement.clone()));
    let click = Arc::new(ClickProvider::from_env(settlement.clone()));

    for (name, configured) in [
        ("Payme", payme.is_configured()),
        ("Click", click.is_configured()),
    ] {
        if configured {
            tracing::info!("✓ {name} configured");
        } else {
            tracing::warn!("⚠ {name} not configured - checkout via {name} disabled");
        }
    }

    // Checkout orchestration
    let pricing = PricingResolver::new(PricingCatalog::from_env(), plans.clone());
    let access = Arc::new(AccessService::new(
        entitlements.clone(),
        subscriptions.clone(),
        plans.clone(),
    ));
    let gateways: Vec<Arc<dyn ProviderGateway>> = vec![payme.clone(), click.clone()];
    let checkout = Arc::new(
        CheckoutService::new(
            ledger,
            subscriptions.clone(),
            plans,
            entitlements,
            pricing,
            access.as_ref().clone(),
            gateways,
        )
        .with_audit(audit),
    );

    let admin_token = std::env::var("ADMIN_API_TOKEN").ok();
    if admin_token.is_none() {
        tracing::warn!("⚠ ADMIN_API_TOKEN not set - admin endpoints disabled");
    }

    let state = AppState {
        checkout,
        settlement,
        access,
        subscriptions,
        payme,
        click,
        admin_token,
    };

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        // Health
        .route("/health", get(health_check))
        // Checkout
        .route("/checkout", post(create_checkout))
        .route("/checkout/status/{order_id}", get(order_status))
        .route("/checkout/providers", get(list_providers))
        // Pricing
        .route("/pricing/purchases", get(purchase_pricing))
        .route("/pricing/courses", get(all_courses_pricing))
        .route("/pricing/courses/{course_id}", get(course_pricing))
        // User-facing entitlement queries
        .route("/payments/history", get(payment_history))
        .route("/roadmap/credits", get(roadmap_credits))
        .route("/courses/access", get(user_course_accesses))
        // Admin
        .route("/payments/{order_id}/refund", post(refund_payment))
        .route("/admin/subscriptions/{subscription_id}/extend", post(extend_subscription))
        .route("/admin/subscriptions/{subscription_id}/cancel", post(cancel_subscription))
        // Provider webhooks
        .route("/webhooks/payme", post(payme_webhook))
        .route("/webhooks/click", post(click_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🚀 edupay server running on http://{addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Local-development catalog: one course with a monthly plan plus a
/// platform-wide plan.
fn seed_demo_catalog(plans: &MemoryPlanStore) {
    plans.add_course(Course {
        id: "course-go".into(),
        slug: "go-for-backend".into(),
        title: "Go for Backend Engineers".into(),
    });
    plans.add_plan(SubscriptionPlan {
        id: "plan-go-monthly".into(),
        slug: "go-for-backend-monthly".into(),
        name: "Go for Backend Engineers".into(),
        plan_type: PlanType::Course,
        course_id: Some("course-go".into()),
        price_monthly: 150_000,
        currency: "UZS".into(),
        is_active: true,
    });
    plans.add_plan(SubscriptionPlan {
        id: "plan-global".into(),
        slug: "all-access".into(),
        name: "All Access".into(),
        plan_type: PlanType::Global,
        course_id: None,
        price_monthly: 500_000,
        currency: "UZS".into(),
        is_active: true,
    });
}
