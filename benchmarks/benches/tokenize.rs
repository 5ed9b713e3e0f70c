//! Benchmark du chemin texte : tokenisation + dispatch d'une boucle synthétique.

use std::cell::Cell as StdCell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use cifra_core::{CategoryHandler, CellType, CifResult, Dispatcher, Row};
use cifra_parser::TextReader;

struct Count(Rc<StdCell<u64>>);

impl CategoryHandler for Count {
    fn on_row(&mut self, row: &Row<'_>) -> CifResult<()> {
        black_box(row.at(0));
        self.0.set(self.0.get() + 1);
        Ok(())
    }
}

/// Un bloc avec une boucle `_atom` de `rows` rangées, quatre colonnes.
fn synthetic(rows: usize) -> String {
    let mut out = String::from("data_bench\nloop_\n_atom.id\n_atom.x\n_atom.y\n_atom.z\n");
    for i in 0..rows {
        out.push_str(&format!("{i} {}.5 {}.25 {}.125\n", i % 100, i % 57, i % 31));
    }
    out
}

fn bench_tokenize(c: &mut Criterion) {
    let mut group = c.benchmark_group("text_loop");
    for rows in [1_000usize, 10_000, 50_000] {
        let src = synthetic(rows);
        group.throughput(Throughput::Bytes(src.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &src, |b, src| {
            b.iter(|| {
                let count = Rc::new(StdCell::new(0));
                let mut disp = Dispatcher::new();
                let cat = disp.register_category("_atom", Box::new(Count(Rc::clone(&count))));
                for key in ["id", "x", "y", "z"] {
                    disp.register_keyword(cat, key, CellType::Str);
                }
                let mut rd = TextReader::new(src.as_bytes());
                while rd.read_block(&mut disp).unwrap() {}
                assert_eq!(count.get() as usize, rows);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_tokenize);
criterion_main!(benches);
