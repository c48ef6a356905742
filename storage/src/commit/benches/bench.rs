use criterion::criterion_main;

mod root;

criterion_main!(root::benches);
