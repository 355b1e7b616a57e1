//! Criterion benchmarks for the dispatch pipeline live under `benches/`.
