//! Route and toxic configuration against the fake control API.

use pughost::control::{ControlApi, RouteSpec, ToxicDirective, ToxicKind};
use pughost::route::{ensure_route, ROUTE_NAME};
use pughost::scenario::ScenarioStore;
use pughost::test_utils::FakeControlApi;
use pughost::toxics;
use pughost::Error;

#[tokio::test]
async fn ensure_route_is_idempotent() {
    let fake = FakeControlApi::start().await.unwrap();
    let api = ControlApi::new(fake.url());
    let spec = RouteSpec::for_store(&ScenarioStore::default());

    ensure_route(&api, &spec).await.unwrap();
    let once = fake.routes();

    ensure_route(&api, &spec).await.unwrap();
    assert_eq!(fake.routes(), once);
    assert_eq!(fake.routes(), vec![spec.clone()]);

    let methods: Vec<_> = fake
        .requests()
        .into_iter()
        .map(|r| (r.method, r.path))
        .collect();
    let route_path = format!("/proxies/{ROUTE_NAME}");
    assert_eq!(
        methods,
        vec![
            ("DELETE".to_owned(), route_path.clone()),
            ("POST".to_owned(), "/proxies".to_owned()),
            ("DELETE".to_owned(), route_path),
            ("POST".to_owned(), "/proxies".to_owned()),
        ]
    );
}

#[tokio::test]
async fn stale_route_is_replaced() {
    let fake = FakeControlApi::start().await.unwrap();
    fake.insert_route(RouteSpec::new(ROUTE_NAME, "localhost:9999", "localhost:1"));
    let api = ControlApi::new(fake.url());
    let spec = RouteSpec::for_store(&ScenarioStore::default());

    ensure_route(&api, &spec).await.unwrap();

    let routes = fake.routes();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].listen, "localhost:3001");
    assert_eq!(routes[0].upstream, "localhost:3000");
}

#[tokio::test]
async fn rejected_creation_is_fatal() {
    let fake = FakeControlApi::start().await.unwrap();
    fake.reject_route_creation(500);
    let api = ControlApi::new(fake.url());
    let spec = RouteSpec::for_store(&ScenarioStore::default());

    match ensure_route(&api, &spec).await {
        Err(Error::RouteConfig { route, source }) => {
            assert_eq!(route, ROUTE_NAME);
            assert_eq!(source.status(), Some(500));
            assert!(source.to_string().contains("rejected by test"));
        }
        other => panic!("expected RouteConfig, got {other:?}"),
    }
}

#[tokio::test]
async fn toxic_failures_do_not_stop_the_rest() {
    let fake = FakeControlApi::start().await.unwrap();
    fake.reject_toxic(ToxicKind::Bandwidth);
    let api = ControlApi::new(fake.url());
    let spec = RouteSpec::for_store(&ScenarioStore::default());
    ensure_route(&api, &spec).await.unwrap();

    let store = ScenarioStore::default();
    let directives = toxics::translate(store.scenario("mobile_3g_slow").unwrap());
    let report = toxics::apply(&api, &spec.name, &directives).await;

    assert_eq!(report.applied, vec!["latency_downstream", "timeout_downstream"]);
    assert_eq!(report.failed_kinds(), vec![ToxicKind::Bandwidth]);
    assert_eq!(
        fake.toxics(&spec.name),
        vec![
            ToxicDirective::latency(1000, 500),
            ToxicDirective::timeout(0, 0.02)
        ]
    );
}

#[tokio::test]
async fn toxics_on_missing_route_warn() {
    let fake = FakeControlApi::start().await.unwrap();
    let api = ControlApi::new(fake.url());

    let report = toxics::apply(&api, "ghost", &[ToxicDirective::bandwidth(1)]).await;

    assert!(report.applied.is_empty());
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].source.status(), Some(404));
}
