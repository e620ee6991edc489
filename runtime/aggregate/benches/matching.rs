//! Micro-benchmark of the match-list resolution scan.
//!
//! Matching walks every match entry left to right and scans the registry in
//! registration order for each, so the interesting cost is N entries against
//! M registered components. The wanted components sit at the registry tail,
//! forcing each entry to walk the full list.

use std::any::Any;
use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use manifold_aggregate::{
    AggregateContext, AggregateDriver, BindContext, ComponentOps, DeviceId, MatchList, Registry,
    Result,
};

struct NopComponent;

impl ComponentOps for NopComponent {
    fn bind(&self, _ctx: &mut BindContext<'_>, _data: &mut (dyn Any + Send)) -> Result<()> {
        Ok(())
    }

    fn unbind(&self, _ctx: &mut BindContext<'_>, _data: &mut (dyn Any + Send)) {}
}

struct NopDriver;

impl AggregateDriver for NopDriver {
    fn probe(&self, agg: &mut AggregateContext<'_>) -> Result<()> {
        agg.bind_all(&mut ())
    }

    fn remove(&self, agg: &mut AggregateContext<'_>) {
        agg.unbind_all(&mut ());
    }
}

fn pci(index: u16) -> DeviceId {
    DeviceId::Pci {
        vendor: 0x1af4,
        device: index,
    }
}

fn registry_with(components: u16) -> Registry {
    let registry = Registry::new();
    for index in 0..components {
        registry
            .add_component(pci(index), Arc::new(NopComponent))
            .unwrap();
    }
    registry
}

fn bench_matching(c: &mut Criterion) {
    for (registered, wanted) in [(64u16, 4u16), (256, 16)] {
        c.bench_function(&format!("resolve_{}_of_{}", wanted, registered), |b| {
            b.iter_batched(
                || {
                    let registry = registry_with(registered);
                    let mut list = MatchList::new();
                    for index in (registered - wanted)..registered {
                        list.add_device(pci(index)).unwrap();
                    }
                    (registry, list)
                },
                |(registry, list)| {
                    black_box(
                        registry
                            .register_aggregate(
                                DeviceId::Platform { name: "bench" },
                                Arc::new(NopDriver),
                                list,
                            )
                            .unwrap(),
                    )
                },
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, bench_matching);
criterion_main!(benches);
