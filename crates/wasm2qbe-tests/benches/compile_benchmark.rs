use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use wasm2qbe::{compile, CompileOptions};
use wasm2qbe_tests::*;

fn wasm(source: &str) -> Vec<u8> {
    wat::parse_str(source).unwrap()
}

/// A module with many small functions, to give the parallel path work.
fn many_functions(n: usize) -> Vec<u8> {
    let mut source = String::from("(module\n");
    for i in 0..n {
        source.push_str(&format!(
            "(func (export \"f{i}\") (param i32) (result i32)
               (local i32)
               block loop
                 local.get 0 i32.eqz br_if 1
                 local.get 1 local.get 0 i32.const {i} i32.mul i32.add local.set 1
                 local.get 0 i32.const 1 i32.sub local.set 0
                 br 0
               end end
               local.get 1)\n"
        ));
    }
    source.push(')');
    wasm(&source)
}

fn compile_programs_bench(c: &mut Criterion) {
    let modules: Vec<Vec<u8>> = [
        programs::COLLATZ,
        programs::FIB,
        programs::GCD,
        programs::MEMORY,
        programs::DISPATCH,
    ]
    .iter()
    .map(|p| wasm(p))
    .collect();
    let options = CompileOptions::default();
    c.bench_function("compile sample programs", |b| {
        b.iter(|| {
            for p in &modules {
                black_box(compile(black_box(p), &options).unwrap());
            }
        })
    });
}

fn compile_sequential_bench(c: &mut Criterion) {
    let bytes = many_functions(500);
    let options = CompileOptions::default();
    c.bench_function("compile 500 functions sequential", |b| {
        b.iter(|| compile(black_box(&bytes), &options).unwrap())
    });
}

fn compile_parallel_bench(c: &mut Criterion) {
    let bytes = many_functions(500);
    let options = CompileOptions {
        parallel: true,
        ..CompileOptions::default()
    };
    c.bench_function("compile 500 functions parallel", |b| {
        b.iter(|| compile(black_box(&bytes), &options).unwrap())
    });
}

// ─── Evaluator ───────────────────────────────────────────────────────────────

fn fib_20_ir_bench(c: &mut Criterion) {
    let mut m = Instance::from_wat(programs::FIB, &CompileOptions::default()).unwrap();
    m.set_fuel(u64::MAX);
    c.bench_function("fib 20 evaluated IR", |b| {
        b.iter(|| m.call_i32("fib", &[black_box(20)]).unwrap())
    });
}

fn fib_20_orig_bench(c: &mut Criterion) {
    c.bench_function("fib 20 plain rust", |b| b.iter(|| fib_orig(black_box(20))));
}

criterion_group!(
    benches,
    compile_programs_bench,
    compile_sequential_bench,
    compile_parallel_bench,
    fib_20_ir_bench,
    fib_20_orig_bench
);
criterion_main!(benches);
