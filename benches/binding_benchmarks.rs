//! Performance benchmarks for crossing the native/script boundary.
//!
//! - Calls: native functions of different arities called from script
//! - Dispatch: overloaded functions and commutative operators
//! - Codec: sequences and maps moved in both directions
//!
//! ## Profiling with Puffin
//!
//! ```bash
//! cargo bench --features profile-with-puffin -- --profile-time 5
//! ```

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use luabind::{Context, Overloads, TypeRegistry, Usertype};
use std::collections::HashMap;
use std::hint::black_box;

#[cfg(feature = "profile-with-puffin")]
static FRAME_VIEW: std::sync::OnceLock<puffin::GlobalFrameView> = std::sync::OnceLock::new();

#[cfg(feature = "profile-with-puffin")]
fn setup_profiler() {
    puffin::set_scopes_on(true);
    FRAME_VIEW.get_or_init(puffin::GlobalFrameView::default);
}

#[cfg(not(feature = "profile-with-puffin"))]
fn setup_profiler() {}

/// Call at the end of each benchmark iteration to flush profiling data.
#[cfg(feature = "profile-with-puffin")]
fn end_profiling_frame() {
    puffin::GlobalProfiler::lock().new_frame();
}

#[cfg(not(feature = "profile-with-puffin"))]
fn end_profiling_frame() {}

#[derive(Usertype, Clone, Copy, Debug, PartialEq)]
#[usertype(name = "vec2", flat)]
struct Vec2 {
    #[usertype(get, set)]
    x: f64,
    #[usertype(get, set)]
    y: f64,
}

const LOOP: i64 = 1000;

fn call_context() -> Context {
    let ctx = Context::with_types(TypeRegistry::new().with::<Vec2>()).unwrap();
    ctx.provide_fn("nothing", || {}).unwrap();
    ctx.provide_fn("add3", |a: i64, b: i64, c: i64| a + b + c).unwrap();
    ctx.provide_overloads(
        "pick",
        Overloads::new()
            .with(|a: f64, b: f64, c: f64| a * b * c)
            .with(|a: String, b: f64, c: String| a.len() as f64 + b + c.len() as f64)
            .with(|a: bool, b: f64, c: bool| if a && c { b } else { -b }),
    )
    .unwrap();
    ctx.provide_member_fn::<Vec2, _>("new", |x: f64, y: f64| Vec2 { x, y })
        .unwrap();
    ctx.provide_member_overloads::<Vec2>(
        "__mul",
        Overloads::new().commutative(|v: &Vec2, k: f64| Vec2 { x: v.x * k, y: v.y * k }),
    )
    .unwrap();
    ctx.load_and_call(
        "function loop_nothing(n) for i = 1, n do nothing() end end
         function loop_add3(n) local s = 0 for i = 1, n do s = s + add3(i, 1, 2) end return s end
         function loop_pick(n)
             local s = 0
             for i = 1, n do s = s + pick(true, i, false) + pick('ab', i, 'c') end
             return s
         end
         function loop_scale(n)
             local v = vec2.new(1, 1)
             for i = 1, n do v = 1.0001 * (v * 0.9999) end
             return v.x
         end",
    )
    .unwrap();
    ctx
}

/// Native calls driven from a script loop.
fn call_benchmarks(c: &mut Criterion) {
    setup_profiler();
    let ctx = call_context();

    let mut group = c.benchmark_group("calls");
    group.throughput(Throughput::Elements(LOOP as u64));

    let loop_nothing = ctx.extract_fn::<(i64,), ()>("loop_nothing").unwrap();
    group.bench_function("no_args", |b| {
        b.iter(|| {
            loop_nothing.call((black_box(LOOP),)).unwrap();
            end_profiling_frame();
        });
    });

    let loop_add3 = ctx.extract_fn::<(i64,), i64>("loop_add3").unwrap();
    group.bench_function("three_integers", |b| {
        b.iter(|| {
            let sum = loop_add3.call((black_box(LOOP),)).unwrap();
            end_profiling_frame();
            black_box(sum)
        });
    });

    group.finish();
}

/// Overload resolution and operator mirroring.
fn dispatch_benchmarks(c: &mut Criterion) {
    let ctx = call_context();

    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(LOOP as u64));

    let loop_pick = ctx.extract_fn::<(i64,), f64>("loop_pick").unwrap();
    group.bench_function("overloaded_three_args", |b| {
        b.iter(|| {
            let sum = loop_pick.call((black_box(LOOP),)).unwrap();
            end_profiling_frame();
            black_box(sum)
        });
    });

    let loop_scale = ctx.extract_fn::<(i64,), f64>("loop_scale").unwrap();
    group.bench_function("commutative_operator", |b| {
        b.iter(|| {
            let x = loop_scale.call((black_box(LOOP),)).unwrap();
            end_profiling_frame();
            black_box(x)
        });
    });

    group.finish();
}

/// Moving collections across the boundary.
fn codec_benchmarks(c: &mut Criterion) {
    let ctx = Context::new().unwrap();
    ctx.load_and_call("function echo(t) return t end").unwrap();

    let mut group = c.benchmark_group("codec");
    for len in [16usize, 256, 4096] {
        let values: Vec<i64> = (0..len as i64).collect();
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("vec_round_trip", len), &values, |b, values| {
            let echo = ctx.extract_fn::<(&Vec<i64>,), Vec<i64>>("echo").unwrap();
            b.iter(|| {
                let back = echo.call((black_box(values),)).unwrap();
                end_profiling_frame();
                black_box(back)
            });
        });

        let map: HashMap<String, f64> = (0..len).map(|i| (format!("k{i}"), i as f64)).collect();
        group.bench_with_input(BenchmarkId::new("map_provide_extract", len), &map, |b, map| {
            b.iter(|| {
                ctx.provide("scratch", black_box(map.clone())).unwrap();
                let back = ctx.extract::<HashMap<String, f64>>("scratch").unwrap();
                end_profiling_frame();
                black_box(back)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, call_benchmarks, dispatch_benchmarks, codec_benchmarks);
criterion_main!(benches);
