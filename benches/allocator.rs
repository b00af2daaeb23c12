use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scratchmem::{Arena, Mem, GMEM};
use scratchmem::tmem::TmemRing;

fn bench_arena_alloc(c: &mut Criterion) {
    c.bench_function("arena_alloc_16bytes", |b| {
        let arena = Arena::with_capacity(&GMEM, 4 << 20, 4 << 20);
        let start = arena.total_count();
        b.iter(|| {
            let ptr = arena.alloc(black_box(16), 8);
            black_box(ptr);
            // Truncate within the block; no traffic to the parent.
            arena.pop_to(start);
        });
    });

    c.bench_function("arena_grow_in_place", |b| {
        let arena = Arena::with_capacity(&GMEM, 4 << 20, 4 << 20);
        let start = arena.total_count();
        b.iter(|| {
            let ptr = arena.alloc(16, 8);
            let grown = arena.grow(ptr, 16, black_box(64), 8);
            black_box(grown);
            arena.pop_to(start);
        });
    });
}

fn bench_scratch_scope(c: &mut Criterion) {
    c.bench_function("tmem_scope_open_close", |b| {
        let ring = TmemRing::new(&GMEM, 1 << 20);
        b.iter(|| {
            let tm = ring.scope();
            black_box(tm.alloc(black_box(64), 8));
        });
    });

    c.bench_function("tmem_scope_pinned", |b| {
        let ring = TmemRing::new(&GMEM, 1 << 20);
        b.iter(|| {
            let out = ring.scope();
            let _pin = out.pin(true);
            let tm = ring.scope();
            black_box(tm.alloc(black_box(64), 8));
        });
    });
}

criterion_group!(benches, bench_arena_alloc, bench_scratch_scope);
criterion_main!(benches);
