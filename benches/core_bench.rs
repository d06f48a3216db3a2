//! Benchmarks for rafiki synthesis.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rafiki::core::app::App;
use rafiki::core::types::{AppConfig, Environment, NetworkConfig};
use rafiki::core::{hasher, parser, resolver};
use rafiki::stacks;

fn image_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("assets/container-image");
    std::fs::create_dir_all(&image).unwrap();
    std::fs::write(image.join("Dockerfile"), "FROM nginx:1.27-alpine\n").unwrap();
    dir
}

fn bench_compose_and_synth(c: &mut Criterion) {
    let dir = image_dir();
    let config = AppConfig::default();
    c.bench_function("compose_and_synth", |b| {
        b.iter(|| {
            let mut app = App::new(Environment::default());
            stacks::compose_at(&mut app, black_box(&config), dir.path()).unwrap();
            black_box(app.synth().unwrap());
        });
    });
}

fn bench_network_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("network_stage");
    for azs in [1, 2, 4] {
        let config = NetworkConfig {
            max_azs: azs,
            nat_gateways: azs,
            ..NetworkConfig::default()
        };
        group.bench_with_input(BenchmarkId::from_parameter(azs), &config, |b, config| {
            b.iter(|| {
                let mut app = App::default();
                let handle = stacks::network::NetworkStack::new(config)
                    .build(&mut app)
                    .unwrap();
                black_box(handle);
            });
        });
    }
    group.finish();
}

fn bench_creation_order(c: &mut Criterion) {
    let dir = image_dir();
    let mut app = App::default();
    stacks::compose_at(&mut app, &AppConfig::default(), dir.path()).unwrap();
    let template = app.stack("WebSocketEcsStack").unwrap().template().clone();
    c.bench_function("creation_order_compute", |b| {
        b.iter(|| black_box(resolver::creation_order(black_box(&template)).unwrap()));
    });
}

fn bench_yaml_parse(c: &mut Criterion) {
    let yaml = r#"
version: "1.0"
name: bench-config
network:
  cidr: 10.20.0.0/16
  max_azs: 3
  nat_gateways: 2
compute:
  instance_type: t3.small
  container:
    environment:
      LOG_LEVEL: info
      PORT: "8080"
edge:
  logging: true
  custom_headers:
    X-Origin-Verify: secret
"#;

    c.bench_function("yaml_parse_config", |b| {
        b.iter(|| {
            let config = parser::parse_config(black_box(yaml)).unwrap();
            black_box(parser::validate_config(&config));
        });
    });
}

fn bench_blake3_string(c: &mut Criterion) {
    let mut group = c.benchmark_group("blake3_template");
    for size in [1024, 16384, 65536] {
        let input: String = "x".repeat(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| black_box(hasher::hash_string(black_box(input))));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_compose_and_synth,
    bench_network_scaling,
    bench_creation_order,
    bench_yaml_parse,
    bench_blake3_string
);
criterion_main!(benches);
