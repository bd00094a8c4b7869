use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hyper::Request;
use switchyard::predicate::{MatchContext, PathMatcher, Predicate, TextMatcher};
use switchyard::routing::{CompiledRuleSet, Router};
use switchyard::RequestView;

fn build_router(rule_count: usize) -> Router<usize> {
    (0..rule_count).fold(Router::new(usize::MAX), |router, i| {
        let rule = CompiledRuleSet::compile(
            format!("rule-{i}"),
            None,
            &[
                Predicate::path(PathMatcher::literal(format!("/api/v1/endpoint{i}/"))),
                Predicate::user_agent(TextMatcher::pattern("(?i)mozilla")),
            ],
        )
        .unwrap();
        router.route(rule, i)
    })
}

fn view(path: &str) -> RequestView {
    let req = Request::builder()
        .uri(path)
        .header("host", "bench.local")
        .header("user-agent", "Mozilla/5.0")
        .body(())
        .unwrap();
    RequestView::from_request(&req, Some("192.168.1.10".parse().unwrap()))
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("router_dispatch");
    let ctx = MatchContext::without_campaigns();

    for rule_count in [10, 100, 1000].iter() {
        let router = build_router(*rule_count);
        let cases = [
            ("match_first", view("/api/v1/endpoint0/item")),
            (
                "match_last",
                view(&format!("/api/v1/endpoint{}/item", rule_count - 1)),
            ),
            ("match_none", view("/not/found")),
        ];

        group.throughput(Throughput::Elements(1));
        for (name, req) in &cases {
            group.bench_with_input(BenchmarkId::new(*name, rule_count), rule_count, |b, _| {
                b.iter(|| {
                    tokio_test::block_on(router.dispatch(black_box(req), black_box(&ctx)))
                });
            });
        }
    }

    group.finish();
}

fn bench_ip_predicate(c: &mut Criterion) {
    let ctx = MatchContext::without_campaigns();
    let router = Router::new(0usize).route(
        CompiledRuleSet::compile("office", None, &[Predicate::ip("192.168.0.0/16")]).unwrap(),
        1,
    );
    let req = view("/");

    c.bench_function("ip_predicate_dispatch", |b| {
        b.iter(|| tokio_test::block_on(router.dispatch(black_box(&req), black_box(&ctx))))
    });
}

criterion_group!(benches, bench_dispatch, bench_ip_predicate);
criterion_main!(benches);
