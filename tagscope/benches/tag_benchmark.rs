//! Run with:
//!   cargo bench --bench tag_benchmark

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use tagscope::{
    CatchPolicy, ContextCreateInfo, EntityTable, ExecutionContext, ScopeArena,
    TagState, TagStates, Value,
};

fn context() -> ExecutionContext {
    ExecutionContext::new(ContextCreateInfo::default())
}

/// Jump from `depth` transparent frames below the claiming region.
fn unwind_through(ec: &mut ExecutionContext, depth: usize) -> TagState {
    let outcome = ec.exec_protected(CatchPolicy::Kinds(TagStates::BREAK), |ec| {
        for _ in 0..depth {
            ec.push_tag(CatchPolicy::Transparent)?;
        }
        ec.jump::<()>(TagState::Break, Value::Nil)
    });
    match outcome {
        Ok(outcome) => outcome.state(),
        Err(_) => TagState::Fatal,
    }
}

fn bench_tags(c: &mut Criterion) {
    let mut group = c.benchmark_group("tags");

    group.bench_function("push_pop", |b| {
        let mut ec = context();
        b.iter(|| {
            let tag = ec.push_tag(CatchPolicy::Transparent).ok();
            if let Some(tag) = tag {
                ec.pop_tag(black_box(tag));
            }
        })
    });

    group.bench_function("exec_protected_normal", |b| {
        let mut ec = context();
        b.iter(|| ec.exec_protected(CatchPolicy::All, |_| Ok(black_box(1))).is_ok())
    });

    for depth in [0, 8, 64] {
        group.bench_function(format!("unwind_{depth}"), |b| {
            let mut ec = context();
            b.iter(|| unwind_through(&mut ec, black_box(depth)))
        });
    }

    group.finish();
}

fn bench_scopes(c: &mut Criterion) {
    let mut group = c.benchmark_group("scopes");

    group.bench_function("push_and_collect", |b| {
        let mut scopes = ScopeArena::new(EntityTable::OBJECT);
        let mut table = EntityTable::new();
        let class = table.define_class("Bench");
        b.iter(|| {
            let mut cursor = scopes.top();
            for _ in 0..16 {
                cursor = scopes.push(cursor, class, false);
            }
            scopes.collect(&[])
        })
    });

    group.bench_function("copy_on_write_refinement", |b| {
        let mut scopes = ScopeArena::new(EntityTable::OBJECT);
        let mut table = EntityTable::new();
        let string = table.define_class("String");
        let loud = table.define_module("Loud");
        let top = scopes.top();
        let base = scopes.activate_refinement(top, string, loud);
        b.iter(|| {
            let child = scopes.push(base, string, false);
            let owned = scopes.activate_refinement(child, string, black_box(loud));
            scopes.collect(&[owned]).scopes_freed
        })
    });

    group.finish();
}

criterion_group!(benches, bench_tags, bench_scopes);
criterion_main!(benches);
