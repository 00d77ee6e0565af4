use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use webgate::request::{expected_length, Request};
use webgate::RoutingTable;

fn simple_request_parse_benchmark(c: &mut Criterion) {
    let request = b"GET / HTTP/1.1\r\nHost: localhost:8000\r\nUser-Agent: Test\r\n\r\n";

    c.bench_function("simple_request_parse", |b| {
        b.iter(|| {
            let _ = Request::try_from(black_box(request), 0).unwrap();
        });
    });
}

fn proxied_request_parse_benchmark(c: &mut Criterion) {
    let request = b"POST /api/v1/orders?page=2&sort=desc HTTP/1.1\r\n\
                    Host: gateway.local\r\n\
                    User-Agent: Mozilla/5.0 (X11; Linux x86_64)\r\n\
                    Accept: application/json\r\n\
                    Content-Type: application/json\r\n\
                    X-Forwarded-For: 10.0.0.1\r\n\
                    Authorization: Basic YWRtaW46c2VjcmV0\r\n\
                    Content-Length: 27\r\n\
                    \r\n\
                    {\"item\":\"book\",\"qty\":3}\r\n\r\n";

    c.bench_function("proxied_request_parse", |b| {
        b.iter(|| {
            let _ = Request::try_from(black_box(request), 0).unwrap();
        });
    });
}

fn expected_length_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("expected_length");

    let requests = [
        ("incomplete", b"GET / HTTP/1.1\r\nHost: localhost\r\n".as_slice()),
        ("no_body", b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n".as_slice()),
        (
            "with_body",
            b"POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: 4096\r\n\r\n".as_slice(),
        ),
    ];

    for (name, request) in requests.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(name), request, |b, request| {
            b.iter(|| expected_length(black_box(request)));
        });
    }

    group.finish();
}

fn request_parse_headers_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_parse_headers");

    for count in [4, 16, 64].iter() {
        let mut request = String::from("GET /index.html HTTP/1.1\r\n");
        for i in 0..*count {
            request.push_str(&format!("X-Custom-{}: value-{}\r\n", i, i));
        }
        request.push_str("\r\n");
        group.bench_with_input(BenchmarkId::from_parameter(count), &request, |b, request| {
            b.iter(|| {
                let _ = Request::try_from(black_box(request.as_bytes()), 0).unwrap();
            });
        });
    }

    group.finish();
}

fn routing_match_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing_match");

    let table: toml::Table = toml::from_str(
        r#"
        "=/health" = { return = "200 OK" }
        "^~/static/" = { root = "./static" }
        "~^/api/v(?P<version>\\d+)/" = { proxy_pass = "http://127.0.0.1:9001" }
        "~*\\.(css|js|png)$" = { root = "./static", cache_control = "max-age=3600" }
        "__default__" = { spa_fallback = true, root = "./static", index_file = "index.html" }
        "#,
    )
    .unwrap();
    let routing = RoutingTable::compile(&table).unwrap();

    let paths = [
        ("exact", "/health"),
        ("prefix", "/static/css/site.css"),
        ("regex_capture", "/api/v2/orders"),
        ("regex_icase", "/assets/LOGO.PNG"),
        ("spa", "/dashboard/settings"),
    ];

    for (name, path) in paths.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(name), path, |b, path| {
            b.iter(|| routing.match_path(black_box(path)).is_some());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    simple_request_parse_benchmark,
    proxied_request_parse_benchmark,
    expected_length_benchmark,
    request_parse_headers_benchmark,
    routing_match_benchmark
);
criterion_main!(benches);
